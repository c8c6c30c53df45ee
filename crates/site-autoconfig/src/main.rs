//! Site autoconfiguration CLI application.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use shared::{Config, ContentType, DataPaths, JsonProviderStore, ProviderStore};
use site_autoconfig::{
    AutoconfigOptions, Autoconfigurator, CancelToken, Catalog, DynamicCatalog, SiteClient, TemplateLibrary,
    TransformEngine,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze a site and generate a provider config for it
    Analyze {
        /// Site URL (scheme optional)
        url: String,

        /// Provider name (derived from the host by default)
        #[arg(long)]
        name: Option<String>,

        /// Restrict generation to anime or manga
        #[arg(long)]
        content_type: Option<ContentType>,

        /// Search term used for discovery and validation
        #[arg(long)]
        query: Option<String>,

        #[arg(long)]
        skip_validation: bool,

        /// Analyze without saving the config
        #[arg(long)]
        dry_run: bool,

        /// Whole-run timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Save the config even when validation fails
        #[arg(long)]
        save_partial: bool,

        /// Write the full analysis result as JSON to the reports directory
        #[arg(long)]
        report: bool,
    },

    /// List stored providers
    List,

    /// Print a stored provider config
    Show { name: String },

    /// Delete a stored provider
    Remove { name: String },

    /// Write the configuration in effect to the config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Run a search through a stored provider
    Search {
        name: String,
        query: String,

        #[arg(long, default_value_t = 1)]
        page: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Initialize logging
    let mut log_config = shared::LogConfig::from_settings(&config.logging, &config.log_dir(), "site-autoconfig");
    if args.verbose {
        log_config.default_level = tracing::Level::DEBUG;
    }
    shared::logging::init(log_config)?;

    info!(config_file = %args.config.display(), "Loaded configuration");

    let data_paths = DataPaths::new(config.data_dir());
    data_paths
        .create_dirs()
        .context("Failed to create data directories")?;

    let store = Arc::new(
        JsonProviderStore::new(config.providers_dir()).context("Failed to open provider store")?,
    );

    match args.command {
        Command::Analyze {
            url,
            name,
            content_type,
            query,
            skip_validation,
            dry_run,
            timeout_secs,
            save_partial,
            report,
        } => {
            let client = SiteClient::new(&config.http).context("Failed to create HTTP client")?;
            let autoconfigurator = Autoconfigurator::new(
                Arc::new(client),
                store,
                TemplateLibrary::new(),
                config.discovery.clone(),
                config.autoconfig.clone(),
            );
            let options = AutoconfigOptions {
                provider_name: name,
                content_type,
                test_query: query,
                skip_validation,
                dry_run,
                timeout: timeout_secs.map(Duration::from_secs),
                save_partial: save_partial.then_some(true),
            };

            let result = autoconfigurator.analyze_and_configure(&url, options).await;

            info!("=== Analysis Complete ===");
            info!(
                "Architecture: {} (confidence {:.2})",
                result.fingerprint.architecture, result.fingerprint.confidence
            );
            info!("Template: {}", result.template_id.as_deref().unwrap_or("-"));
            if let Some(validation) = &result.validation {
                info!(
                    "Validation: {} ({} results)",
                    if validation.passed { "passed" } else { "failed" },
                    validation.result_count
                );
            }
            info!("Saved: {}", result.saved);
            for diagnostic in &result.diagnostics {
                info!("[{}] {:?}: {}", diagnostic.stage, diagnostic.severity, diagnostic.message);
            }

            if report {
                let provider = result
                    .config
                    .as_ref()
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| "unknown".to_string());
                let path = data_paths.report_file(&provider, &Utc::now().format("%Y%m%d-%H%M%S").to_string());
                let content = serde_json::to_string_pretty(&result).context("Failed to serialize report")?;
                tokio::fs::write(&path, content)
                    .await
                    .with_context(|| format!("Failed to write report: {}", path.display()))?;
                info!(path = %path.display(), "Report written");
            }

            if !result.success {
                warn!("Analysis did not produce a validated config");
                std::process::exit(1);
            }
        }

        Command::List => {
            let names = store.list_all().await?;
            if names.is_empty() {
                println!("No providers stored in {}", config.providers_dir().display());
            }
            for name in names {
                match store.load(&name).await {
                    Ok(Some(provider)) => println!(
                        "{:<24} {:<6} {:<8} {:<14} {:.2}",
                        provider.name,
                        provider.content_type.as_str(),
                        provider.api.as_str(),
                        provider.template_id,
                        provider.confidence
                    ),
                    Ok(None) => {}
                    Err(e) => warn!(provider = %name, error = %e, "Failed to load provider"),
                }
            }
        }

        Command::Show { name } => {
            let Some(provider) = store.load(&name).await? else {
                bail!("No provider named '{}'", name);
            };
            println!("{}", serde_json::to_string_pretty(&provider)?);
        }

        Command::Remove { name } => {
            if !store.remove(&name).await? {
                bail!("No provider named '{}'", name);
            }
            println!("Removed {}", name);
        }

        Command::InitConfig { force } => {
            if args.config.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", args.config.display());
            }
            config.save(&args.config)?;
            println!("Wrote {}", args.config.display());
        }

        Command::Search { name, query, page } => {
            let Some(provider) = store.load(&name).await? else {
                bail!("No provider named '{}'", name);
            };
            let client = SiteClient::new(&config.http).context("Failed to create HTTP client")?;
            let catalog = DynamicCatalog::new(provider, Arc::new(TransformEngine::new(Arc::new(client))));
            let cancel = CancelToken::with_timeout(config.autoconfig.default_timeout());

            let results = catalog
                .search(&query, page, &cancel)
                .await
                .with_context(|| format!("Search through '{}' failed", name))?;
            info!(provider = %name, results = results.len(), "Search complete");
            for item in results {
                println!("{}", serde_json::to_string(&item.fields)?);
            }
        }
    }

    Ok(())
}
