//! Shared library for the site autoconfiguration tools.
//!
//! This crate provides common functionality used by the analysis pipeline
//! and its command-line front end:
//! - Configuration management
//! - Logging infrastructure
//! - File path utilities
//! - Generated provider config model
//! - Provider store

pub mod config;
pub mod logging;
pub mod models;
pub mod paths;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use logging::LogConfig;
pub use models::*;
pub use paths::DataPaths;
pub use store::{JsonProviderStore, ProviderStore};

/// Common result type using anyhow::Error
pub type Result<T> = anyhow::Result<T>;
