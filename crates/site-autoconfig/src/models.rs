//! Evidence produced and consumed by the analysis pipeline.
//!
//! `SiteProfile`, `ContentSchema` and `Fingerprint` live for a single run;
//! only the generated `DynamicProviderConfig` outlives it.

use crate::http::HttpMethod;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{ContentType, DynamicProviderConfig};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// One response observed while probing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedEndpoint {
    pub url: String,
    pub method: HttpMethod,
    pub status: u16,
    pub content_type: Option<String>,
    /// Body prefix kept for later stages and reports
    pub sample_body: String,
}

/// What was observed when probing a site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteProfile {
    pub base_url: String,
    pub technologies: BTreeSet<String>,
    pub endpoints: Vec<ObservedEndpoint>,
    /// API URLs referenced by the root page
    pub api_hints: Vec<String>,
    /// Headers needed for access (referer, user agent)
    pub required_headers: BTreeMap<String, String>,
}

impl SiteProfile {
    /// Profile of a site nothing is known about
    pub fn empty(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            technologies: BTreeSet::new(),
            endpoints: Vec::new(),
            api_hints: Vec::new(),
            required_headers: BTreeMap::new(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.technologies.contains(tag)
    }
}

/// API style of a discovered endpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Graphql,
    Rest,
}

/// An endpoint that answered with structured data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateEndpoint {
    pub kind: EndpointKind,
    pub method: HttpMethod,
    /// Concrete URL that was probed
    pub url: String,
    /// URL with the test term replaced by `{query}` (or slug by `{id}`)
    pub template: String,
    /// Whether the template addresses a single entity (`/anime/{id}`)
    pub detail: bool,
    pub body: Value,
    /// 0..1, how much the body looks like a list of entities
    pub entity_score: f64,
}

/// Logical role of a field inside an entity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum FieldRole {
    Title,
    Id,
    Image,
    Description,
    Url,
    Number,
    EpisodeList,
    ChapterList,
    PageList,
    StreamUrl,
}

impl FieldRole {
    pub const ALL: [FieldRole; 10] = [
        FieldRole::Title,
        FieldRole::Id,
        FieldRole::Image,
        FieldRole::Description,
        FieldRole::Url,
        FieldRole::Number,
        FieldRole::EpisodeList,
        FieldRole::ChapterList,
        FieldRole::PageList,
        FieldRole::StreamUrl,
    ];

    /// Roles every generated config needs
    pub const REQUIRED: [FieldRole; 2] = [FieldRole::Title, FieldRole::Id];

    /// Roles used to measure how entity-like an object is
    pub const CORE: [FieldRole; 3] = [FieldRole::Title, FieldRole::Id, FieldRole::Image];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldRole::Title => "title",
            FieldRole::Id => "id",
            FieldRole::Image => "image",
            FieldRole::Description => "description",
            FieldRole::Url => "url",
            FieldRole::Number => "number",
            FieldRole::EpisodeList => "episodeList",
            FieldRole::ChapterList => "chapterList",
            FieldRole::PageList => "pageList",
            FieldRole::StreamUrl => "streamUrl",
        }
    }

    /// Whether the role names a list of child entities
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            FieldRole::EpisodeList | FieldRole::ChapterList | FieldRole::PageList
        )
    }
}

impl std::fmt::Display for FieldRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where one role lives inside an entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldMapping {
    /// Dotted path relative to the entity
    pub path: String,
    /// Fraction of sampled entities exhibiting the key
    pub confidence: f64,
    /// `Type.field` when the mapping came from a GraphQL schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Request that produced the schema's sample
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaSource {
    Rest {
        url: String,
        template: String,
    },
    Graphql {
        endpoint: String,
        query_name: String,
        document: String,
        variables: BTreeMap<String, String>,
    },
}

/// Inferred entity shape
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentSchema {
    pub source: Option<SchemaSource>,
    /// Path from the response root to the entity list
    pub items_path: String,
    /// Depth of the entity list in the response
    pub depth: usize,
    /// Number of entities sampled
    pub sample_size: usize,
    pub fields: BTreeMap<FieldRole, FieldMapping>,
    /// Child-entity roles resolved inside the child list (`episodes[].number`)
    #[serde(default)]
    pub child_fields: BTreeMap<FieldRole, FieldMapping>,
}

impl ContentSchema {
    pub fn field(&self, role: FieldRole) -> Option<&FieldMapping> {
        self.fields.get(&role).filter(|m| !m.path.is_empty())
    }

    pub fn has(&self, role: FieldRole) -> bool {
        self.field(role).is_some()
    }

    /// Fraction of `roles` present in the schema
    pub fn coverage(&self, roles: &[FieldRole]) -> f64 {
        if roles.is_empty() {
            return 0.0;
        }
        let present = roles.iter().filter(|r| self.has(**r)).count();
        present as f64 / roles.len() as f64
    }

    pub fn missing_required(&self) -> Option<FieldRole> {
        FieldRole::REQUIRED.into_iter().find(|r| !self.has(*r))
    }

    /// First child-list role present (episodes before chapters before pages)
    pub fn child_list(&self) -> Option<(FieldRole, &FieldMapping)> {
        [FieldRole::EpisodeList, FieldRole::ChapterList, FieldRole::PageList]
            .into_iter()
            .find_map(|role| self.field(role).map(|m| (role, m)))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Architecture classification of a site
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Architecture {
    GraphqlKnown,
    GraphqlGeneric,
    RestKnown,
    RestGeneric,
    Unknown,
}

impl Architecture {
    pub fn is_graphql(&self) -> bool {
        matches!(self, Architecture::GraphqlKnown | Architecture::GraphqlGeneric)
    }

    pub fn is_rest(&self) -> bool {
        matches!(self, Architecture::RestKnown | Architecture::RestGeneric)
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Architecture::GraphqlKnown | Architecture::RestKnown)
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Architecture::GraphqlKnown => "graphql-known",
            Architecture::GraphqlGeneric => "graphql-generic",
            Architecture::RestKnown => "rest-known",
            Architecture::RestGeneric => "rest-generic",
            Architecture::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Site classification with confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fingerprint {
    pub architecture: Architecture,
    pub confidence: f64,
    pub matched_signatures: Vec<String>,
    pub recommendations: Vec<String>,
}

impl Fingerprint {
    pub fn unknown() -> Self {
        Self {
            architecture: Architecture::Unknown,
            confidence: 0.0,
            matched_signatures: Vec::new(),
            recommendations: Vec::new(),
        }
    }
}

/// Options of one analysis run. Every field has a default.
#[derive(Debug, Clone, Default)]
pub struct AutoconfigOptions {
    /// Provider name; derived from the host when absent
    pub provider_name: Option<String>,
    /// Restrict templates to one content type
    pub content_type: Option<ContentType>,
    /// Search term for probing and validation
    pub test_query: Option<String>,
    pub skip_validation: bool,
    /// Analyze without persisting
    pub dry_run: bool,
    /// Whole-run timeout
    pub timeout: Option<Duration>,
    /// Persist even when validation fails
    pub save_partial: Option<bool>,
}

/// Pipeline stage, used to tag diagnostics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Probe,
    Discovery,
    Matching,
    Introspection,
    Fingerprint,
    TemplateSelection,
    Generation,
    Validation,
    Persistence,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Probe => "probe",
            Stage::Discovery => "discovery",
            Stage::Matching => "matching",
            Stage::Introspection => "introspection",
            Stage::Fingerprint => "fingerprint",
            Stage::TemplateSelection => "template_selection",
            Stage::Generation => "generation",
            Stage::Validation => "validation",
            Stage::Persistence => "persistence",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub stage: Stage,
    pub severity: Severity,
    pub message: String,
}

/// Outcome of one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoconfigResult {
    pub success: bool,
    pub config: Option<DynamicProviderConfig>,
    pub template_id: Option<String>,
    pub fingerprint: Fingerprint,
    pub validation: Option<crate::validator::ValidationResult>,
    pub saved: bool,
    pub timed_out: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl AutoconfigResult {
    pub fn has_diagnostic(&self, stage: Stage, needle: &str) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.stage == stage && d.message.contains(needle))
    }
}
