//! Site autoconfiguration library.
//!
//! Analyzes an unknown content site and derives a [`shared::DynamicProviderConfig`]
//! for it: the site is probed, data endpoints are discovered, JSON responses
//! and GraphQL schemas are matched against content roles, the architecture is
//! fingerprinted, a template turns the evidence into a config, and the config
//! is validated against the live site before it is stored.

pub mod cancel;
pub mod catalog;
pub mod discovery;
pub mod error;
pub mod fingerprint;
pub mod generator;
pub mod graphql;
pub mod http;
pub mod jsonpath;
pub mod matcher;
pub mod models;
pub mod orchestrator;
pub mod probe;
pub mod templates;
pub mod transform;
pub mod validator;

pub use cancel::CancelToken;
pub use catalog::{Capability, Catalog, DynamicCatalog, LeafResolver};
pub use discovery::EndpointDiscoverer;
pub use error::{EngineError, FetchError, GenerationError, ProbeError};
pub use fingerprint::FingerprintEngine;
pub use graphql::{GraphQLSchemaInfo, Introspector};
pub use http::{HttpFetcher, SiteClient};
pub use matcher::PatternMatcher;
pub use models::{AutoconfigOptions, AutoconfigResult, Diagnostic, Fingerprint, Stage};
pub use orchestrator::Autoconfigurator;
pub use probe::Prober;
pub use templates::TemplateLibrary;
pub use transform::{ExecutionMode, OperationParams, TransformEngine};
pub use validator::{ValidationResult, Validator};
