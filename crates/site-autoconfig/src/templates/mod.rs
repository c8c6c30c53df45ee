//! Template library.
//!
//! A closed set of strategies, each scoring itself in `0..=100` against the
//! gathered evidence and turning that evidence into a
//! [`DynamicProviderConfig`]. The library is built once and passed to the
//! orchestrator; it holds no mutable state.

pub mod generic;
pub mod graphql;
pub mod rest;

use crate::error::GenerationError;
use crate::graphql::GraphQLSchemaInfo;
use crate::models::{CandidateEndpoint, ContentSchema, EndpointKind, Fingerprint, SiteProfile};
use shared::{ContentType, ContentTypes, DynamicProviderConfig};

/// Everything a template may look at
#[derive(Debug, Clone, Copy)]
pub struct Evidence<'a> {
    pub profile: &'a SiteProfile,
    pub endpoints: &'a [CandidateEndpoint],
    pub schema: &'a ContentSchema,
    pub graphql: Option<&'a GraphQLSchemaInfo>,
    pub fingerprint: &'a Fingerprint,
}

impl<'a> Evidence<'a> {
    /// Best REST search endpoint (endpoints are ranked by discovery)
    pub fn search_endpoint(&self) -> Option<&'a CandidateEndpoint> {
        self.endpoints
            .iter()
            .find(|e| e.kind == EndpointKind::Rest && !e.detail)
    }

    /// REST detail endpoint, preferring one named after the content type
    pub fn detail_endpoint(&self, content_type: ContentType) -> Option<&'a CandidateEndpoint> {
        let mut details = self
            .endpoints
            .iter()
            .filter(|e| e.kind == EndpointKind::Rest && e.detail);
        let named = details
            .clone()
            .find(|e| e.template.contains(&format!("/{}/", content_type.as_str())));
        named.or_else(|| details.next())
    }
}

/// Strategy variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Graphql(ContentType),
    Rest(ContentType),
    Generic,
}

/// A registered template
#[derive(Debug, Clone)]
pub struct ProviderTemplate {
    pub id: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub supported: ContentTypes,
    pub strategy: Strategy,
}

impl ProviderTemplate {
    /// Match score in `0..=100`. Pure: equal evidence gives an equal score.
    pub fn score(&self, evidence: &Evidence<'_>) -> f64 {
        let score = match self.strategy {
            Strategy::Graphql(content_type) => graphql::score(evidence, content_type),
            Strategy::Rest(content_type) => rest::score(evidence, content_type),
            Strategy::Generic => generic::score(evidence),
        };
        score.clamp(0.0, 100.0)
    }

    /// Build a config named `name`. Fails when a required role is missing.
    pub fn apply(
        &self,
        evidence: &Evidence<'_>,
        name: &str,
        content_type: Option<ContentType>,
    ) -> Result<DynamicProviderConfig, GenerationError> {
        if let Some(role) = evidence.schema.missing_required() {
            return Err(GenerationError::MissingRole(role));
        }
        match self.strategy {
            Strategy::Graphql(content_type) => graphql::apply(evidence, name, content_type),
            Strategy::Rest(content_type) => rest::apply(evidence, name, content_type),
            Strategy::Generic => generic::apply(evidence, name, content_type),
        }
    }

    pub fn supports(&self, content_type: Option<ContentType>) -> bool {
        content_type.map(|ct| self.supported.contains(ct)).unwrap_or(true)
    }

    pub fn is_generic(&self) -> bool {
        self.strategy == Strategy::Generic
    }
}

/// A template with its score for one run
#[derive(Debug, Clone)]
pub struct ScoredTemplate<'a> {
    pub template: &'a ProviderTemplate,
    pub score: f64,
}

/// Read-only template registry
#[derive(Debug, Clone)]
pub struct TemplateLibrary {
    templates: Vec<ProviderTemplate>,
}

impl Default for TemplateLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateLibrary {
    /// Registry with the built-in templates, most specific first
    pub fn new() -> Self {
        Self {
            templates: vec![
                ProviderTemplate {
                    id: "graphql-anime",
                    display_name: "GraphQL anime API",
                    description: "Searches a GraphQL schema exposing shows and their episodes",
                    supported: ContentTypes::ANIME,
                    strategy: Strategy::Graphql(ContentType::Anime),
                },
                ProviderTemplate {
                    id: "graphql-manga",
                    display_name: "GraphQL manga API",
                    description: "Searches a GraphQL schema exposing series and their chapters",
                    supported: ContentTypes::MANGA,
                    strategy: Strategy::Graphql(ContentType::Manga),
                },
                ProviderTemplate {
                    id: "rest-anime",
                    display_name: "REST anime API",
                    description: "JSON search endpoint with anime detail and episode paths",
                    supported: ContentTypes::ANIME,
                    strategy: Strategy::Rest(ContentType::Anime),
                },
                ProviderTemplate {
                    id: "rest-manga",
                    display_name: "REST manga API",
                    description: "JSON search endpoint with manga detail and chapter paths",
                    supported: ContentTypes::MANGA,
                    strategy: Strategy::Rest(ContentType::Manga),
                },
                ProviderTemplate {
                    id: "generic",
                    display_name: "Generic",
                    description: "Maps the inferred content schema directly",
                    supported: ContentTypes::ALL,
                    strategy: Strategy::Generic,
                },
            ],
        }
    }

    pub fn get_all(&self) -> &[ProviderTemplate] {
        &self.templates
    }

    pub fn get_by_id(&self, id: &str) -> Option<&ProviderTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    /// Templates supporting `content_type`, best score first. Ties keep
    /// registration order.
    pub fn ranked(&self, evidence: &Evidence<'_>, content_type: Option<ContentType>) -> Vec<ScoredTemplate<'_>> {
        let mut scored: Vec<ScoredTemplate<'_>> = self
            .templates
            .iter()
            .filter(|t| t.supports(content_type))
            .map(|template| ScoredTemplate {
                template,
                score: template.score(evidence),
            })
            .collect();
        // Stable sort keeps registration order among equal scores.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored
    }

    /// Highest scoring template. Generic always scores above zero, so
    /// there is always a match.
    pub fn find_best_match(&self, evidence: &Evidence<'_>, content_type: Option<ContentType>) -> Option<ScoredTemplate<'_>> {
        self.ranked(evidence, content_type).into_iter().next()
    }
}
