//! Introspection client.

use super::types::IntrospectionResponse;
use super::GraphQLSchemaInfo;
use crate::cancel::CancelToken;
use crate::error::Cancelled;
use crate::http::{HttpFetcher, HttpRequest};
use crate::models::SiteProfile;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Standard introspection query, trimmed to what candidate generation needs
pub const INTROSPECTION_QUERY: &str = r#"query IntrospectionQuery {
  __schema {
    queryType { name }
    types {
      kind
      name
      fields(includeDeprecated: true) {
        name
        args { name type { ...TypeRef } defaultValue }
        type { ...TypeRef }
      }
    }
  }
}

fragment TypeRef on __Type {
  kind
  name
  ofType {
    kind
    name
    ofType {
      kind
      name
      ofType {
        kind
        name
        ofType { kind name }
      }
    }
  }
}"#;

pub struct Introspector {
    fetcher: Arc<dyn HttpFetcher>,
}

impl Introspector {
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self { fetcher }
    }

    /// Recover the schema of `endpoint`.
    ///
    /// `Ok(None)` means the endpoint is opaque: introspection is disabled,
    /// failed or returned something unusable.
    pub async fn introspect(
        &self,
        endpoint: &str,
        profile: &SiteProfile,
        cancel: &CancelToken,
    ) -> Result<Option<GraphQLSchemaInfo>, Cancelled> {
        info!(endpoint = %endpoint, "Running GraphQL introspection");

        let request = profile.required_headers.iter().fold(
            HttpRequest::post_json(endpoint, json!({ "query": INTROSPECTION_QUERY })),
            |req, (name, value)| req.header(name.clone(), value.clone()),
        );

        let response = match cancel.run(self.fetcher.send(request)).await? {
            Ok(response) => response,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Introspection request failed");
                return Ok(None);
            }
        };

        let Some(body) = response.json() else {
            warn!(endpoint = %endpoint, status = response.status, "Introspection answered without JSON");
            return Ok(None);
        };
        let parsed: IntrospectionResponse = match serde_json::from_value(body) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Unexpected introspection shape");
                return Ok(None);
            }
        };

        let Some(data) = parsed.data else {
            let reason = parsed
                .errors
                .unwrap_or_default()
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            info!(endpoint = %endpoint, reason = %reason, "Introspection disabled");
            return Ok(None);
        };

        let Some(schema) = GraphQLSchemaInfo::from_schema(endpoint, data.schema) else {
            warn!(endpoint = %endpoint, "Schema has no query root");
            return Ok(None);
        };

        for (target, candidates) in &schema.candidates {
            debug!(
                target = ?target,
                count = candidates.len(),
                best = candidates.first().map(|c| c.name.as_str()).unwrap_or("-"),
                "Candidate queries"
            );
        }
        info!(
            endpoint = %endpoint,
            queries = schema.queries.len(),
            types = schema.types.len(),
            candidates = schema.total_candidates(),
            "Introspection complete"
        );
        Ok(Some(schema))
    }
}
