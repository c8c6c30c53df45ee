//! Provider store for generated configurations.
//!
//! One pretty-printed JSON file per provider. Writes go through a temporary
//! file and a rename so a reader never observes a half-written config, and
//! writes to the same provider name are serialized.

use crate::models::DynamicProviderConfig;
use crate::paths::sanitize_name;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Load/save contract for generated provider configs
#[async_trait]
pub trait ProviderStore: Send + Sync {
    /// Load a provider config by name
    async fn load(&self, name: &str) -> Result<Option<DynamicProviderConfig>>;

    /// Save (or overwrite) a provider config
    async fn save(&self, config: &DynamicProviderConfig) -> Result<()>;

    /// Names of all stored providers, sorted
    async fn list_all(&self) -> Result<Vec<String>>;
}

/// File-backed provider store
pub struct JsonProviderStore {
    /// Root store directory
    dir: PathBuf,
    /// Write locks of providers with a write in flight
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl JsonProviderStore {
    /// Create a new store rooted at `dir`
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create provider directory: {}", dir.display()))?;
        info!(dir = %dir.display(), "Provider store initialized");

        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn provider_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_name(name)))
    }

    fn write_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(sanitize_name(name))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Forget the lock of `name` once no other writer holds or awaits it
    fn release_lock(&self, name: &str) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = sanitize_name(name);
        if locks.get(&key).map(|l| Arc::strong_count(l) == 1).unwrap_or(false) {
            locks.remove(&key);
        }
    }

    /// Remove a stored provider. Returns whether a file was removed.
    pub async fn remove(&self, name: &str) -> Result<bool> {
        let removed = {
            let lock = self.write_lock(name);
            let _guard = lock.lock().await;
            self.remove_file(name).await
        };
        self.release_lock(name);
        removed
    }

    async fn remove_file(&self, name: &str) -> Result<bool> {
        let path = self.provider_path(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(provider = name, "Provider removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    async fn write_file(&self, name: &str, content: String) -> Result<PathBuf> {
        let path = self.provider_path(name);
        let tmp = path.with_extension("json.tmp");

        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write provider file: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace provider file: {}", path.display()))?;
        Ok(path)
    }
}

#[async_trait]
impl ProviderStore for JsonProviderStore {
    async fn load(&self, name: &str) -> Result<Option<DynamicProviderConfig>> {
        let path = self.provider_path(name);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(provider = name, "Provider not found");
                return Ok(None);
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read provider file: {}", path.display()))
            }
        };

        let config: DynamicProviderConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse provider file: {}", path.display()))?;

        debug!(provider = name, "Provider loaded");
        Ok(Some(config))
    }

    async fn save(&self, config: &DynamicProviderConfig) -> Result<()> {
        let content = serde_json::to_string_pretty(config)
            .context("Failed to serialize provider config")?;

        let written = {
            let lock = self.write_lock(&config.name);
            let _guard = lock.lock().await;
            self.write_file(&config.name, content).await
        };
        self.release_lock(&config.name);

        let path = written?;
        info!(provider = %config.name, path = %path.display(), "Provider saved");
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list provider directory: {}", self.dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::sample_config;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_and_load() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = JsonProviderStore::new(temp_dir.path())?;

        let config = sample_config("example");
        store.save(&config).await?;

        let loaded = store.load("example").await?;
        assert_eq!(loaded, Some(config));
        Ok(())
    }

    #[tokio::test]
    async fn test_load_missing() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = JsonProviderStore::new(temp_dir.path())?;

        assert_eq!(store.load("nothing").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_overwrite_existing_provider() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = JsonProviderStore::new(temp_dir.path())?;

        let mut config = sample_config("example");
        store.save(&config).await?;

        config.confidence = 0.25;
        config.template_id = "generic".to_string();
        store.save(&config).await?;

        let loaded = store.load("example").await?.unwrap();
        assert_eq!(loaded.template_id, "generic");
        assert_eq!(store.list_all().await?, vec!["example".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_saves_leave_valid_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = Arc::new(JsonProviderStore::new(temp_dir.path())?);

        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let mut config = sample_config("shared-name");
                config.confidence = i as f64 / 10.0;
                store.save(&config).await
            }));
        }
        for task in tasks {
            task.await??;
        }

        let loaded = store.load("shared-name").await?;
        assert!(loaded.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_and_remove() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = JsonProviderStore::new(temp_dir.path())?;

        store.save(&sample_config("beta")).await?;
        store.save(&sample_config("alpha")).await?;
        std::fs::write(temp_dir.path().join("notes.txt"), "ignored")?;

        assert_eq!(store.list_all().await?, vec!["alpha".to_string(), "beta".to_string()]);

        assert!(store.remove("alpha").await?);
        assert!(!store.remove("alpha").await?);
        assert_eq!(store.list_all().await?, vec!["beta".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_write_locks_are_released() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = Arc::new(JsonProviderStore::new(temp_dir.path())?);

        let mut tasks = Vec::new();
        for i in 0..4 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.save(&sample_config(&format!("provider-{}", i % 2))).await
            }));
        }
        for task in tasks {
            task.await??;
        }
        assert!(store.locks.lock().unwrap().is_empty());

        assert!(store.remove("provider-0").await?);
        assert!(!store.remove("missing").await?);
        assert!(store.locks.lock().unwrap().is_empty());
        assert_eq!(store.list_all().await?, vec!["provider-1".to_string()]);
        Ok(())
    }
}
