//! Analysis run orchestration.
//!
//! Stages run strictly in order: probe, discovery, matching, introspection,
//! fingerprint, template selection, generation, validation, persistence.
//! Every stage failure becomes a [`Diagnostic`]; the run itself never fails.
//! One [`CancelToken`] built from the run timeout is threaded through all
//! network stages, and a run that times out still reports what it gathered.

use crate::cancel::CancelToken;
use crate::discovery::EndpointDiscoverer;
use crate::fingerprint::{FingerprintEngine, FingerprintInput};
use crate::generator;
use crate::graphql::{self, Introspector};
use crate::http::HttpFetcher;
use crate::matcher::PatternMatcher;
use crate::models::{
    AutoconfigOptions, AutoconfigResult, CandidateEndpoint, ContentSchema, Diagnostic, EndpointKind, Severity, SiteProfile, Stage,
};
use crate::probe::{normalize_base_url, Prober};
use crate::templates::{Evidence, TemplateLibrary};
use crate::transform::TransformEngine;
use crate::validator::Validator;
use shared::config::{AutoconfigConfig, DiscoveryConfig};
use shared::{DynamicProviderConfig, ProviderStore};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Diagnostics of one run, mirrored to the log
#[derive(Default)]
struct RunLog {
    diagnostics: Vec<Diagnostic>,
}

impl RunLog {
    fn note(&mut self, stage: Stage, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Info => info!(stage = %stage, "{}", message),
            Severity::Warning => warn!(stage = %stage, "{}", message),
            Severity::Error => error!(stage = %stage, "{}", message),
        }
        self.diagnostics.push(Diagnostic {
            stage,
            severity,
            message,
        });
    }

    fn info(&mut self, stage: Stage, message: impl Into<String>) {
        self.note(stage, Severity::Info, message);
    }

    fn warning(&mut self, stage: Stage, message: impl Into<String>) {
        self.note(stage, Severity::Warning, message);
    }

    fn error(&mut self, stage: Stage, message: impl Into<String>) {
        self.note(stage, Severity::Error, message);
    }

    /// Record a timeout once; returns whether the run is out of time
    fn check_timeout(&mut self, cancel: &CancelToken, stage: Stage, timed_out: &mut bool) -> bool {
        if cancel.is_cancelled() && !*timed_out {
            *timed_out = true;
            self.error(stage, "timed out, continuing with partial evidence");
        }
        *timed_out
    }
}

/// Runs the whole pipeline against one site
pub struct Autoconfigurator {
    prober: Prober,
    discoverer: EndpointDiscoverer,
    matcher: PatternMatcher,
    introspector: Introspector,
    fingerprints: FingerprintEngine,
    templates: TemplateLibrary,
    engine: TransformEngine,
    store: Arc<dyn ProviderStore>,
    discovery: DiscoveryConfig,
    settings: AutoconfigConfig,
}

impl Autoconfigurator {
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        store: Arc<dyn ProviderStore>,
        templates: TemplateLibrary,
        discovery: DiscoveryConfig,
        settings: AutoconfigConfig,
    ) -> Self {
        Self {
            prober: Prober::new(fetcher.clone()),
            discoverer: EndpointDiscoverer::new(fetcher.clone(), discovery.clone()),
            matcher: PatternMatcher::new(&discovery),
            introspector: Introspector::new(fetcher.clone()),
            fingerprints: FingerprintEngine::default(),
            templates,
            engine: TransformEngine::new(fetcher),
            store,
            discovery,
            settings,
        }
    }

    pub fn engine(&self) -> &TransformEngine {
        &self.engine
    }

    /// Analyze `site_url` and derive, validate and persist a provider config
    pub async fn analyze_and_configure(&self, site_url: &str, options: AutoconfigOptions) -> AutoconfigResult {
        let timeout = options.timeout.unwrap_or_else(|| self.settings.default_timeout());
        let cancel = CancelToken::with_timeout(timeout);
        let mut log = RunLog::default();
        let mut timed_out = false;

        let base = normalize_base_url(site_url).unwrap_or_else(|_| site_url.trim().to_string());
        let name = options
            .provider_name
            .clone()
            .unwrap_or_else(|| generator::provider_name_for(&base));
        let test_query = options
            .test_query
            .clone()
            .unwrap_or_else(|| self.discovery.default_test_query.clone());
        info!(url = %base, provider = %name, timeout_secs = timeout.as_secs(), "Starting analysis");

        // Probe
        let (profile, reachable) = match self.prober.probe(site_url, &cancel).await {
            Ok(profile) => {
                log.info(
                    Stage::Probe,
                    format!("detected technologies: {}", join_or_none(profile.technologies.iter())),
                );
                (profile, true)
            }
            Err(e) => {
                log.error(Stage::Probe, e.to_string());
                (SiteProfile::empty(&base), false)
            }
        };
        log.check_timeout(&cancel, Stage::Probe, &mut timed_out);

        // Discovery
        let endpoints: Vec<CandidateEndpoint> = if reachable && !timed_out {
            let found = self.discoverer.discover(&profile, &test_query, &cancel).await;
            if found.is_empty() {
                log.warning(Stage::Discovery, "no endpoint answered with structured data");
            } else {
                log.info(
                    Stage::Discovery,
                    format!("{} endpoint(s) accepted, best {}", found.len(), found[0].url),
                );
            }
            log.check_timeout(&cancel, Stage::Discovery, &mut timed_out);
            found
        } else {
            Vec::new()
        };

        // Matching
        let mut schema: ContentSchema = self.matcher.match_endpoints(&profile, &endpoints);
        match schema.missing_required() {
            _ if schema.is_empty() => log.warning(Stage::Matching, "no entity list found in any response"),
            Some(role) => log.warning(Stage::Matching, format!("no {} field inferred", role)),
            None => log.info(
                Stage::Matching,
                format!("entity list at '{}' with {} role(s)", schema.items_path, schema.fields.len()),
            ),
        }

        // Introspection
        let graphql_endpoint = endpoints.iter().find(|e| e.kind == EndpointKind::Graphql);
        let graphql_info = match graphql_endpoint {
            Some(endpoint) if !timed_out => match self.introspector.introspect(&endpoint.url, &profile, &cancel).await {
                Ok(Some(info)) => {
                    log.info(
                        Stage::Introspection,
                        format!(
                            "{} queries, {} candidate(s)",
                            info.queries.len(),
                            info.total_candidates()
                        ),
                    );
                    if graphql::refine_schema(&mut schema, &info, options.content_type) {
                        log.info(Stage::Introspection, "content schema refined from GraphQL types");
                    }
                    Some(info)
                }
                Ok(None) => {
                    log.warning(Stage::Introspection, format!("introspection unavailable at {}", endpoint.url));
                    None
                }
                Err(e) => {
                    log.error(Stage::Introspection, e.to_string());
                    None
                }
            },
            _ => None,
        };
        log.check_timeout(&cancel, Stage::Introspection, &mut timed_out);

        // Fingerprint
        let fingerprint = self.fingerprints.analyze(&FingerprintInput {
            profile: &profile,
            endpoints: &endpoints,
            schema: &schema,
            graphql: graphql_info.as_ref(),
        });
        log.info(
            Stage::Fingerprint,
            format!("{} (confidence {:.2})", fingerprint.architecture, fingerprint.confidence),
        );

        let evidence = Evidence {
            profile: &profile,
            endpoints: &endpoints,
            schema: &schema,
            graphql: graphql_info.as_ref(),
            fingerprint: &fingerprint,
        };
        let generated = self.generate(&evidence, &name, &options, &mut log);

        let mut result = AutoconfigResult {
            success: false,
            config: None,
            template_id: None,
            fingerprint: fingerprint.clone(),
            validation: None,
            saved: false,
            timed_out,
            diagnostics: Vec::new(),
        };

        let (template_id, config) = match generated {
            Generated::Config { template_id, config } => (template_id, config),
            Generated::Skeleton(config) => {
                log.error(
                    Stage::Generation,
                    "every template failed, emitted a provisional skeleton config (not saved)",
                );
                result.template_id = Some("generic".to_string());
                result.config = Some(config);
                result.diagnostics = log.diagnostics;
                return result;
            }
        };
        result.template_id = Some(template_id);

        // Validation
        let validated = if timed_out {
            log.warning(Stage::Validation, "validation skipped: run timed out");
            false
        } else if options.skip_validation {
            log.info(Stage::Validation, "validation skipped");
            true
        } else {
            let validation = Validator::new(&self.engine).validate(&config, &test_query, &cancel).await;
            let passed = validation.passed;
            if passed {
                log.info(
                    Stage::Validation,
                    format!("passed with {} result(s)", validation.result_count),
                );
            } else {
                let reason = validation
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("failing fields: {}", join_or_none(validation.failed_fields().iter())));
                log.warning(Stage::Validation, format!("validation failed: {}", reason));
            }
            for warning in &validation.warnings {
                log.warning(Stage::Validation, warning.clone());
            }
            result.validation = Some(validation);
            log.check_timeout(&cancel, Stage::Validation, &mut timed_out);
            passed
        };
        result.timed_out = timed_out;
        result.success = validated && !timed_out;

        // Persistence
        let save_partial = options.save_partial.unwrap_or(self.settings.save_partial);
        if options.dry_run {
            log.info(Stage::Persistence, "dry run, config not saved");
        } else if timed_out {
            log.warning(Stage::Persistence, "config not saved: run timed out");
        } else if !validated && !save_partial {
            log.warning(Stage::Persistence, "config not saved: validation failed");
        } else {
            match self.store.save(&config).await {
                Ok(()) => {
                    result.saved = true;
                    log.info(Stage::Persistence, format!("saved provider '{}'", config.name));
                }
                Err(e) => log.error(Stage::Persistence, format!("failed to save provider: {:#}", e)),
            }
        }

        info!(
            provider = %name,
            success = result.success,
            saved = result.saved,
            template = result.template_id.as_deref().unwrap_or("-"),
            "Analysis finished"
        );
        result.config = Some(config);
        result.diagnostics = log.diagnostics;
        result
    }

    /// Try templates best first; specialised ones only above the threshold
    fn generate(
        &self,
        evidence: &Evidence<'_>,
        name: &str,
        options: &AutoconfigOptions,
        log: &mut RunLog,
    ) -> Generated {
        let threshold = f64::from(self.settings.template_threshold);
        let ranked = self.templates.ranked(evidence, options.content_type);
        log.info(
            Stage::TemplateSelection,
            ranked
                .iter()
                .map(|s| format!("{}={:.0}", s.template.id, s.score))
                .collect::<Vec<_>>()
                .join(", "),
        );

        for scored in ranked
            .iter()
            .filter(|s| s.template.is_generic() || s.score >= threshold)
        {
            match scored.template.apply(evidence, name, options.content_type) {
                Ok(config) => {
                    log.info(
                        Stage::Generation,
                        format!("template {} produced the config", scored.template.id),
                    );
                    return Generated::Config {
                        template_id: scored.template.id.to_string(),
                        config,
                    };
                }
                Err(e) => log.warning(Stage::Generation, format!("template {} failed: {}", scored.template.id, e)),
            }
        }

        Generated::Skeleton(generator::skeleton(
            evidence.profile,
            name,
            options.content_type,
            evidence.fingerprint.confidence,
        ))
    }
}

enum Generated {
    Config { template_id: String, config: DynamicProviderConfig },
    Skeleton(DynamicProviderConfig),
}

fn join_or_none<I, S>(items: I) -> String
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    let joined: Vec<String> = items.map(|s| s.as_ref().to_string()).collect();
    if joined.is_empty() {
        "none".to_string()
    } else {
        joined.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::graphql::fixtures;
    use crate::http::stub::StubFetcher;
    use crate::http::HttpMethod;
    use crate::models::Architecture;
    use serde_json::json;
    use shared::{ContentType, JsonProviderStore};
    use std::time::Duration;
    use tempfile::TempDir;

    fn autoconfigurator(stub: StubFetcher, dir: &TempDir) -> (Autoconfigurator, Arc<JsonProviderStore>) {
        let store = Arc::new(JsonProviderStore::new(dir.path()).unwrap());
        let auto = Autoconfigurator::new(
            Arc::new(stub),
            store.clone(),
            TemplateLibrary::new(),
            DiscoveryConfig::default(),
            AutoconfigConfig::default(),
        );
        (auto, store)
    }

    fn graphql_site() -> StubFetcher {
        StubFetcher::new()
            .get_html("https://site.test/", "<html><body><div id=\"app\"></div></body></html>")
            .get_json(
                "https://site.test/graphql",
                json!({"errors": [{"message": "Must provide query string."}]}),
            )
            .post_json_when("https://site.test/graphql", "__typename", json!({"data": {"__typename": "Query"}}))
            .post_json_when("https://site.test/graphql", "__schema", fixtures::show_schema())
            .post_json_when(
                "https://site.test/graphql",
                "Page(search",
                json!({"data": {"Page": [
                    {"name": "Cowboy Bebop", "id": "1", "coverImage": "/covers/1.jpg",
                     "episodes": [{"id": "e1", "number": 1, "title": "Asteroid Blues"}]}
                ]}}),
            )
            .post_json_when(
                "https://site.test/graphql",
                "episodes(showId",
                json!({"data": {"episodes": [
                    {"id": "e1", "number": 1, "title": "Asteroid Blues", "streamUrl": "/s/e1.m3u8"}
                ]}}),
            )
    }

    fn rest_site() -> StubFetcher {
        StubFetcher::new()
            .get_html("https://site.test/", "<html><body><h1>Catalog</h1></body></html>")
            .get_json(
                "https://site.test/api/search?q=",
                json!({"results": [{"title": "X", "id": "1", "thumb": "u"}]}),
            )
            .get_json(
                "https://site.test/api/anime/1/episodes",
                json!({"episodes": [{"id": "ep-1", "number": 1}, {"id": "ep-2", "number": 2}]}),
            )
    }

    #[tokio::test]
    async fn test_known_graphql_site() {
        let dir = TempDir::new().unwrap();
        let (auto, store) = autoconfigurator(graphql_site(), &dir);
        let result = auto
            .analyze_and_configure("https://site.test", AutoconfigOptions::default())
            .await;

        assert!(result.success, "{:?}", result.diagnostics);
        assert!(result.fingerprint.architecture.is_graphql());
        assert!(result.fingerprint.confidence >= 0.6);
        assert_eq!(result.template_id.as_deref(), Some("graphql-anime"));

        let config = result.config.as_ref().unwrap();
        assert_eq!(config.name, "site");
        assert_eq!(config.search.field("title").unwrap().path, "name");
        assert!(result.validation.as_ref().unwrap().passed);
        assert!(result.saved);
        assert_eq!(store.load("site").await.unwrap().as_ref(), Some(config));
    }

    #[tokio::test]
    async fn test_rest_site() {
        let dir = TempDir::new().unwrap();
        let (auto, store) = autoconfigurator(rest_site(), &dir);
        let options = AutoconfigOptions {
            provider_name: Some("catalog".to_string()),
            ..AutoconfigOptions::default()
        };
        let result = auto.analyze_and_configure("site.test", options).await;

        assert!(result.success, "{:?}", result.diagnostics);
        assert_eq!(result.fingerprint.architecture, Architecture::RestGeneric);
        assert_eq!(result.template_id.as_deref(), Some("rest-anime"));
        let config = result.config.unwrap();
        assert_eq!(config.search.field("image").unwrap().path, "thumb");
        assert!(store.load("catalog").await.unwrap().is_some());
        assert!(result.validation.unwrap().warnings.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let dir = TempDir::new().unwrap();
        let stub = StubFetcher::new().fail(
            HttpMethod::Get,
            "https://down.test/",
            FetchError::Network {
                url: "https://down.test/".to_string(),
                reason: "dns error: no such host".to_string(),
            },
        );
        let (auto, store) = autoconfigurator(stub, &dir);
        let result = auto
            .analyze_and_configure("https://down.test", AutoconfigOptions::default())
            .await;

        assert!(!result.success);
        assert_eq!(result.fingerprint.architecture, Architecture::Unknown);
        assert_eq!(result.template_id.as_deref(), Some("generic"));
        assert!(result.config.is_some());
        assert!(result.has_diagnostic(Stage::Probe, "no such host"));
        assert!(!result.saved);
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skip_validation() {
        let dir = TempDir::new().unwrap();
        let (auto, _) = autoconfigurator(rest_site(), &dir);
        let options = AutoconfigOptions {
            skip_validation: true,
            dry_run: true,
            ..AutoconfigOptions::default()
        };
        let result = auto.analyze_and_configure("https://site.test", options).await;

        assert!(result.success);
        assert!(result.validation.is_none());
        assert!(result.has_diagnostic(Stage::Validation, "validation skipped"));
        assert!(!result.saved);
        assert!(result.has_diagnostic(Stage::Persistence, "dry run"));
    }

    #[tokio::test]
    async fn test_failed_validation_is_saved_only_when_partial_allowed() {
        // the second result has an empty title, so validation fails on it
        let stub = || {
            StubFetcher::new()
                .get_html("https://site.test/", "<html></html>")
                .get_json(
                    "https://site.test/api/search?q=",
                    json!({"results": [{"title": "X", "id": "1"}, {"title": "", "id": "2"}]}),
                )
        };
        let options = |save_partial| AutoconfigOptions {
            content_type: Some(ContentType::Anime),
            save_partial: Some(save_partial),
            ..AutoconfigOptions::default()
        };

        let dir = TempDir::new().unwrap();
        let (auto, store) = autoconfigurator(stub(), &dir);
        let result = auto.analyze_and_configure("https://site.test", options(false)).await;
        assert!(!result.success);
        assert_eq!(result.validation.as_ref().unwrap().failed_fields(), vec!["title"]);
        assert!(!result.saved);
        assert!(result.has_diagnostic(Stage::Persistence, "validation failed"));
        assert!(store.list_all().await.unwrap().is_empty());

        let dir = TempDir::new().unwrap();
        let (auto, store) = autoconfigurator(stub(), &dir);
        let result = auto.analyze_and_configure("https://site.test", options(true)).await;
        assert!(!result.success);
        assert!(result.saved);
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_returns_partial_result() {
        let dir = TempDir::new().unwrap();
        let stub = StubFetcher::new().hang(HttpMethod::Get, "https://site.test/");
        let (auto, _) = autoconfigurator(stub, &dir);
        let options = AutoconfigOptions {
            timeout: Some(Duration::from_millis(50)),
            ..AutoconfigOptions::default()
        };
        let result = auto.analyze_and_configure("https://site.test", options).await;

        assert!(result.timed_out);
        assert!(!result.success);
        assert!(result.has_diagnostic(Stage::Probe, "timed out"));
        assert!(!result.saved);
    }
}
