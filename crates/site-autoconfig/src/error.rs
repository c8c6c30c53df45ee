//! Typed errors of the analysis pipeline and the transform engine.

use shared::OperationKind;
use thiserror::Error;

use crate::models::FieldRole;

/// Outbound request failure
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("network error for {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    /// Transient errors are worth a retry
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network { .. } | FetchError::Timeout { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::InvalidRequest(_) => false,
        }
    }
}

/// The whole run was cancelled or hit its deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled or timed out")]
pub struct Cancelled;

/// Root page of the site could not be fetched
#[derive(Debug, Clone, Error)]
#[error("probe of {url} failed: {reason}")]
pub struct ProbeError {
    pub url: String,
    pub reason: String,
}

/// A template could not produce a complete config
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("no {0} field could be inferred")]
    MissingRole(FieldRole),

    #[error("template needs a {0} endpoint but none was discovered")]
    MissingEndpoint(&'static str),

    #[error("no candidate query for {0}")]
    NoCandidateQuery(String),

    #[error("generated config is incomplete: {}", .0.join(", "))]
    Incomplete(Vec<String>),
}

/// Failure of one transform engine operation
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("provider has no {0} operation")]
    UnsupportedOperation(OperationKind),

    #[error("failed to build request: {0}")]
    BuildRequest(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("response is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("GraphQL errors: {0}")]
    Graphql(String),

    #[error("items not found at '{path}'")]
    ItemsNotFound { path: String },

    #[error("required field '{field}' failed on item {index}: {reason}")]
    Extraction {
        field: String,
        index: usize,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let url = "https://example.org".to_string();
        assert!(FetchError::Timeout { url: url.clone() }.is_transient());
        assert!(FetchError::Status { url: url.clone(), status: 503 }.is_transient());
        assert!(FetchError::Status { url: url.clone(), status: 429 }.is_transient());
        assert!(!FetchError::Status { url, status: 404 }.is_transient());
        assert!(!FetchError::InvalidRequest("bad".into()).is_transient());
    }

    #[test]
    fn test_generation_error_messages() {
        let err = GenerationError::MissingRole(FieldRole::Title);
        assert_eq!(err.to_string(), "no title field could be inferred");

        let err = GenerationError::Incomplete(vec!["search.id".into(), "children.request".into()]);
        assert_eq!(
            err.to_string(),
            "generated config is incomplete: search.id, children.request"
        );
    }
}
