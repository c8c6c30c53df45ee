//! Data models for generated provider configurations.
//!
//! A [`DynamicProviderConfig`] is the long-lived artifact of an analysis run:
//! it describes how to query one site (requests, item selection, field
//! extraction and transformation steps) and is interpreted at run time by the
//! transform engine. Everything here is plain serde data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Kind of catalog a provider serves
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Anime,
    Manga,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Anime => "anime",
            ContentType::Manga => "manga",
        }
    }

    /// Name of the child entity: episodes for anime, chapters for manga.
    pub fn child_noun(&self) -> &'static str {
        match self {
            ContentType::Anime => "episodes",
            ContentType::Manga => "chapters",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown content type: {0} (expected anime or manga)")]
pub struct ParseContentTypeError(String);

impl std::str::FromStr for ContentType {
    type Err = ParseContentTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anime" => Ok(ContentType::Anime),
            "manga" => Ok(ContentType::Manga),
            other => Err(ParseContentTypeError(other.to_string())),
        }
    }
}

/// Set of content types, stored as bit flags
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ContentTypes(u8);

impl ContentTypes {
    pub const NONE: ContentTypes = ContentTypes(0);
    pub const ANIME: ContentTypes = ContentTypes(0b01);
    pub const MANGA: ContentTypes = ContentTypes(0b10);
    pub const ALL: ContentTypes = ContentTypes(0b11);

    pub fn contains(&self, content_type: ContentType) -> bool {
        self.0 & Self::from(content_type).0 != 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl From<ContentType> for ContentTypes {
    fn from(content_type: ContentType) -> Self {
        match content_type {
            ContentType::Anime => ContentTypes::ANIME,
            ContentType::Manga => ContentTypes::MANGA,
        }
    }
}

impl std::ops::BitOr for ContentTypes {
    type Output = ContentTypes;

    fn bitor(self, rhs: Self) -> Self::Output {
        ContentTypes(self.0 | rhs.0)
    }
}

/// API style of a generated provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApiKind {
    Rest,
    Graphql,
}

impl ApiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKind::Rest => "rest",
            ApiKind::Graphql => "graphql",
        }
    }
}

/// Operations a generated provider exposes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Free-text search returning series entries
    Search,
    /// Detail page of one series
    Detail,
    /// Child entities of a series (episodes or chapters)
    Children,
    /// Leaf resolution (stream URLs or page images)
    Leaf,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Search => "search",
            OperationKind::Detail => "detail",
            OperationKind::Children => "children",
            OperationKind::Leaf => "leaf",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to build the HTTP request of an operation.
///
/// Templates may contain `{query}`, `{id}`, `{url}` and `{page}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestTemplate {
    /// GET against an absolute or base-relative URL
    Get { url: String },
    /// POST of a GraphQL document with templated variables
    Graphql {
        endpoint: String,
        query: String,
        #[serde(default)]
        variables: BTreeMap<String, String>,
    },
}

impl RequestTemplate {
    pub fn is_empty(&self) -> bool {
        match self {
            RequestTemplate::Get { url } => url.trim().is_empty(),
            RequestTemplate::Graphql { endpoint, query, .. } => {
                endpoint.trim().is_empty() || query.trim().is_empty()
            }
        }
    }
}

/// Where the entities of a response live
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", content = "path", rename_all = "snake_case")]
pub enum ItemSelector {
    /// The response (or the object at the path) is a single entity
    Single(String),
    /// The array at the path holds the entities
    List(String),
    /// Locate the first entity list structurally
    Auto,
}

/// Literal transformation applied to an extracted string, in declaration order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformStep {
    PercentDecode,
    HtmlUnescape,
    Trim,
    Replace { from: String, to: String },
    RegexReplace { pattern: String, replacement: String },
    /// Join a relative URL against `base`, or the provider base URL when absent
    UrlJoin {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base: Option<String>,
    },
}

/// Extraction rule for one logical field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldRule {
    /// Logical field name (title, id, image, ...)
    pub name: String,
    /// Dotted path relative to the entity (`title.romaji`, `images[0].url`)
    pub path: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<TransformStep>,
}

impl FieldRule {
    pub fn required(name: &str, path: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            path: path.into(),
            required: true,
            transforms: Vec::new(),
        }
    }

    pub fn optional(name: &str, path: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, path)
        }
    }

    pub fn with_transforms(mut self, transforms: Vec<TransformStep>) -> Self {
        self.transforms = transforms;
        self
    }
}

/// One executable operation of a provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationSpec {
    pub request: RequestTemplate,
    pub items: ItemSelector,
    pub fields: Vec<FieldRule>,
}

impl OperationSpec {
    pub fn field(&self, name: &str) -> Option<&FieldRule> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn has_non_empty_field(&self, name: &str) -> bool {
        self.field(name).map(|f| !f.path.trim().is_empty()).unwrap_or(false)
    }
}

/// Generated, persisted description of how to query a site
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DynamicProviderConfig {
    pub name: String,
    pub content_type: ContentType,
    pub api: ApiKind,
    pub base_url: String,
    /// Template (or generator) that produced this config
    pub template_id: String,
    /// Headers needed for access (referer, user agent, ...)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub search: OperationSpec,
    pub detail: OperationSpec,
    pub children: OperationSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf: Option<OperationSpec>,
    /// Fingerprint confidence at generation time
    pub confidence: f64,
    pub generated_at: DateTime<Utc>,
}

impl DynamicProviderConfig {
    pub fn operation(&self, kind: OperationKind) -> Option<&OperationSpec> {
        match kind {
            OperationKind::Search => Some(&self.search),
            OperationKind::Detail => Some(&self.detail),
            OperationKind::Children => Some(&self.children),
            OperationKind::Leaf => self.leaf.as_ref(),
        }
    }

    /// Names of required elements that are missing or empty.
    ///
    /// A usable config has a search operation extracting a title and an
    /// identifier, a detail request and a child-entity list.
    pub fn missing_required(&self) -> Vec<String> {
        let mut missing = Vec::new();

        if self.name.trim().is_empty() {
            missing.push("name".to_string());
        }
        if self.base_url.trim().is_empty() {
            missing.push("base_url".to_string());
        }
        if self.search.request.is_empty() {
            missing.push("search.request".to_string());
        }
        for field in ["title", "id"] {
            if !self.search.has_non_empty_field(field) {
                missing.push(format!("search.{}", field));
            }
        }
        if self.detail.request.is_empty() {
            missing.push("detail.request".to_string());
        }
        if self.children.request.is_empty() {
            missing.push("children.request".to_string());
        }
        if matches!(&self.children.items, ItemSelector::Single(_)) {
            missing.push("children.items".to_string());
        }
        if !self.children.has_non_empty_field("id") && !self.children.has_non_empty_field("url") {
            missing.push("children.id".to_string());
        }

        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_required().is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::sample_config;
    use super::*;

    #[test]
    fn test_content_type_parse() {
        assert_eq!("Anime".parse::<ContentType>().unwrap(), ContentType::Anime);
        assert_eq!("manga".parse::<ContentType>().unwrap(), ContentType::Manga);
        assert!("novel".parse::<ContentType>().is_err());
    }

    #[test]
    fn test_content_type_flags() {
        let both = ContentTypes::ANIME | ContentTypes::MANGA;
        assert_eq!(both, ContentTypes::ALL);
        assert!(both.contains(ContentType::Manga));
        assert!(!ContentTypes::ANIME.contains(ContentType::Manga));
        assert!(!ContentTypes::NONE.contains(ContentType::Anime));
    }

    #[test]
    fn test_config_round_trip() {
        let mut config = sample_config("example");
        config.leaf = Some(OperationSpec {
            request: RequestTemplate::Graphql {
                endpoint: "/graphql".to_string(),
                query: "query ($id: String) { sources(id: $id) { url } }".to_string(),
                variables: BTreeMap::from([("id".to_string(), "{id}".to_string())]),
            },
            items: ItemSelector::List("data.sources".to_string()),
            fields: vec![FieldRule::required("url", "url").with_transforms(vec![
                TransformStep::RegexReplace {
                    pattern: "^//".to_string(),
                    replacement: "https://".to_string(),
                },
                TransformStep::Replace {
                    from: "\\u002F".to_string(),
                    to: "/".to_string(),
                },
                TransformStep::PercentDecode,
            ])],
        });

        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: DynamicProviderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_complete_config_has_no_missing_fields() {
        assert!(sample_config("example").is_complete());
    }

    #[test]
    fn test_missing_required_fields_are_reported() {
        let mut config = sample_config("example");
        config.search.fields.retain(|f| f.name != "title");
        config.detail.request = RequestTemplate::Get { url: String::new() };

        let missing = config.missing_required();
        assert!(missing.contains(&"search.title".to_string()));
        assert!(missing.contains(&"detail.request".to_string()));
        assert!(!config.is_complete());
    }

    #[test]
    fn test_serialized_shape() {
        let config = sample_config("example");
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["search"]["request"]["kind"], "get");
        assert_eq!(value["search"]["items"]["mode"], "list");
        assert_eq!(value["children"]["items"]["mode"], "auto");
        assert_eq!(value["search"]["fields"][0]["transforms"][0]["op"], "html_unescape");
    }
}
