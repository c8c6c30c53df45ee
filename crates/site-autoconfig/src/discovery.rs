//! Endpoint discovery.
//!
//! Tries REST path conventions and GraphQL endpoint paths against the site
//! and keeps those answering with structured data. Probes run concurrently
//! with a bounded worker count; a failing probe never affects its siblings.

use crate::cancel::CancelToken;
use crate::http::{HttpFetcher, HttpMethod, HttpRequest};
use crate::matcher::{self, classify_key, Shape};
use crate::models::{CandidateEndpoint, EndpointKind, FieldRole, SiteProfile};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use shared::config::DiscoveryConfig;
use std::sync::Arc;
use tracing::{debug, info};

/// REST search conventions, `{query}` is the test term
const REST_SEARCH_PATHS: &[&str] = &[
    "/search?q={query}",
    "/api/search?q={query}",
    "/api/search?query={query}",
    "/api/v1/search?q={query}",
    "/api/anime?search={query}",
    "/api/manga?search={query}",
    "/api/series?search={query}",
    "/wp-json/wp/v2/search?search={query}",
    "/wp-json/wp/v2/posts?search={query}",
];

/// Single-entity conventions, `{id}` is a slug of the test term
const REST_DETAIL_PATHS: &[&str] = &["/anime/{id}", "/manga/{id}", "/api/anime/{id}", "/api/manga/{id}"];

const GRAPHQL_PATHS: &[&str] = &["/graphql", "/api/graphql"];

/// One thing to try
#[derive(Debug, Clone, PartialEq)]
enum Probe {
    Rest { template: String, detail: bool },
    Graphql { url: String },
}

/// Finds API endpoints answering with structured data
pub struct EndpointDiscoverer {
    fetcher: Arc<dyn HttpFetcher>,
    settings: DiscoveryConfig,
}

impl EndpointDiscoverer {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, settings: DiscoveryConfig) -> Self {
        Self { fetcher, settings }
    }

    /// Probe every candidate and return the accepted ones, best first
    pub async fn discover(
        &self,
        profile: &SiteProfile,
        test_query: &str,
        cancel: &CancelToken,
    ) -> Vec<CandidateEndpoint> {
        let probes = self.plan(profile);
        info!(
            url = %profile.base_url,
            candidates = probes.len(),
            workers = self.settings.max_concurrent_probes,
            "Discovering endpoints"
        );

        let results: Vec<(usize, Option<CandidateEndpoint>)> = stream::iter(probes.into_iter().enumerate())
            .map(|(index, probe)| async move {
                (index, self.try_probe(profile, &probe, test_query, cancel).await)
            })
            .buffer_unordered(self.settings.max_concurrent_probes.max(1))
            .collect()
            .await;

        // Arrival order is meaningless; rank by kind, score, then declaration order.
        let mut accepted: Vec<(usize, CandidateEndpoint)> = results
            .into_iter()
            .filter_map(|(index, found)| found.map(|endpoint| (index, endpoint)))
            .collect();
        accepted.sort_by(|(ia, a), (ib, b)| {
            a.kind
                .cmp(&b.kind)
                .then(b.entity_score.total_cmp(&a.entity_score))
                .then(ia.cmp(ib))
        });

        info!(
            url = %profile.base_url,
            accepted = accepted.len(),
            cancelled = cancel.is_cancelled(),
            "Endpoint discovery complete"
        );
        accepted.into_iter().map(|(_, endpoint)| endpoint).collect()
    }

    /// Candidate list in declaration order: GraphQL paths, hinted endpoints,
    /// REST search conventions, configured extras, detail conventions.
    fn plan(&self, profile: &SiteProfile) -> Vec<Probe> {
        let base = profile.base_url.trim_end_matches('/');
        let mut probes: Vec<Probe> = Vec::new();
        let mut push = |probe: Probe| {
            if !probes.contains(&probe) {
                probes.push(probe);
            }
        };

        for path in GRAPHQL_PATHS {
            push(Probe::Graphql {
                url: format!("{}{}", base, path),
            });
        }
        for hint in &profile.api_hints {
            if hint.trim_end_matches('/').ends_with("graphql") {
                push(Probe::Graphql { url: hint.clone() });
            } else if hint.ends_with('=') {
                push(Probe::Rest {
                    template: format!("{}{{query}}", hint),
                    detail: false,
                });
            } else {
                push(Probe::Rest {
                    template: hint.clone(),
                    detail: false,
                });
            }
        }
        let search_paths = REST_SEARCH_PATHS
            .iter()
            .map(|p| p.to_string())
            .chain(self.settings.extra_rest_paths.iter().cloned());
        for path in search_paths {
            push(Probe::Rest {
                template: absolute(base, &path),
                detail: false,
            });
        }
        for path in REST_DETAIL_PATHS {
            push(Probe::Rest {
                template: absolute(base, path),
                detail: true,
            });
        }

        probes
    }

    async fn try_probe(
        &self,
        profile: &SiteProfile,
        probe: &Probe,
        test_query: &str,
        cancel: &CancelToken,
    ) -> Option<CandidateEndpoint> {
        let request = match probe {
            Probe::Rest { template, .. } => HttpRequest::get(fill_template(template, test_query)),
            Probe::Graphql { url } => HttpRequest::post_json(url.clone(), json!({ "query": "{ __typename }" })),
        };
        let request = profile
            .required_headers
            .iter()
            .fold(request, |req, (name, value)| req.header(name.clone(), value.clone()));
        let url = request.url.clone();

        let response = match cancel.run(self.fetcher.send(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                debug!(url = %url, error = %e, "Probe failed");
                return None;
            }
            Err(_) => {
                debug!(url = %url, "Probe cancelled");
                return None;
            }
        };
        if !response.is_success() {
            debug!(url = %url, status = response.status, "Probe rejected by status");
            return None;
        }
        let Some(body) = response.json() else {
            debug!(url = %url, "Probe answered without JSON");
            return None;
        };

        let candidate = match probe {
            Probe::Graphql { url } => {
                if !body.get("data").map(Value::is_object).unwrap_or(false) {
                    debug!(url = %url, "No GraphQL data in response");
                    return None;
                }
                CandidateEndpoint {
                    kind: EndpointKind::Graphql,
                    method: HttpMethod::Post,
                    url: url.clone(),
                    template: url.clone(),
                    detail: false,
                    body,
                    entity_score: 1.0,
                }
            }
            Probe::Rest { template, detail } => {
                let score = if *detail {
                    single_entity_score(&body)
                } else {
                    matcher::entity_list_score(&body, self.settings.max_json_depth)
                };
                if score <= 0.0 {
                    debug!(url = %url, "Response does not look like entities");
                    return None;
                }
                CandidateEndpoint {
                    kind: EndpointKind::Rest,
                    method: HttpMethod::Get,
                    url: url.clone(),
                    template: template.clone(),
                    detail: *detail,
                    body,
                    entity_score: score,
                }
            }
        };

        debug!(url = %url, score = candidate.entity_score, "Endpoint accepted");
        Some(candidate)
    }
}

fn absolute(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Substitute the test term into a probe template
fn fill_template(template: &str, test_query: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(test_query.as_bytes()).collect();
    template
        .replace("{query}", &encoded)
        .replace("{id}", &slugify(test_query))
}

/// `Attack on Titan!` -> `attack-on-titan`
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for c in text.trim().chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Half weight for a single object, scaled by its core role coverage
fn single_entity_score(body: &Value) -> f64 {
    let Some(object) = body.as_object() else {
        return 0.0;
    };
    if object.len() < 2 {
        return 0.0;
    }
    let roles: Vec<FieldRole> = object
        .iter()
        .filter_map(|(key, value)| classify_key(key, Shape::of(value)))
        .collect();
    if !FieldRole::REQUIRED.iter().any(|r| roles.contains(r)) {
        return 0.0;
    }
    let covered = FieldRole::CORE.iter().filter(|r| roles.contains(r)).count();
    0.5 * covered as f64 / FieldRole::CORE.len() as f64
}
