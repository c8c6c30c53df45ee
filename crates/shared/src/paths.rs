//! File path utilities for organizing data files.
//!
//! Analysis reports and logs live under one data root; the provider store
//! directory is configured separately and only borrows [`sanitize_name`].

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// File path manager for data files
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    /// Create a new DataPaths with the given root directory
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Get the root data directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for analysis reports
    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    /// Report file for one analysis run, stamped with `YYYYmmdd-HHMMSS`
    pub fn report_file(&self, name: &str, stamp: &str) -> PathBuf {
        self.reports_dir()
            .join(format!("{}-{}.json", sanitize_name(name), stamp))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Create all data directories
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [self.reports_dir(), self.logs_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Make a provider name safe to use as a file stem.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "provider".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_report_paths() {
        let paths = DataPaths::new("/data");
        assert_eq!(
            paths.report_file("example", "20260101-120000"),
            PathBuf::from("/data/reports/example-20260101-120000.json")
        );
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("my site.org"), "my_site_org");
        assert_eq!(sanitize_name("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_name("   "), "provider");
    }

    #[test]
    fn test_create_dirs() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let paths = DataPaths::new(temp_dir.path());
        paths.create_dirs()?;

        assert!(paths.reports_dir().is_dir());
        assert!(paths.logs_dir().is_dir());
        Ok(())
    }
}
