//! GraphQL schema recovery and candidate query generation.
//!
//! [`Introspector`] runs the standard introspection query against an
//! endpoint; the resulting [`GraphQLSchemaInfo`] keeps the query root, the
//! object types and ranked [`CandidateQuery`] lists per [`TargetEntity`].

pub mod introspect;
pub mod queries;
pub mod types;

pub use introspect::{Introspector, INTROSPECTION_QUERY};
pub use queries::{generate_queries, lookup_query, LookupQuery};

use crate::models::{ContentSchema, FieldMapping, FieldRole, SchemaSource};
use serde::{Deserialize, Serialize};
use shared::ContentType;
use std::collections::BTreeMap;
use types::{FieldDef, SchemaDoc, TypeKind, TypeRef};

/// Entity a candidate query is meant to fetch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum TargetEntity {
    Anime,
    Manga,
    Episode,
    Chapter,
}

impl TargetEntity {
    pub const ALL: [TargetEntity; 4] = [
        TargetEntity::Anime,
        TargetEntity::Manga,
        TargetEntity::Episode,
        TargetEntity::Chapter,
    ];

    /// Type-name terms that identify the target
    pub fn terms(&self) -> &'static [&'static str] {
        match self {
            TargetEntity::Anime => &["anime", "show", "series", "media", "video", "title"],
            TargetEntity::Manga => &["manga", "comic", "manhwa", "manhua", "book", "series", "media", "title"],
            TargetEntity::Episode => &["episode", "video"],
            TargetEntity::Chapter => &["chapter", "issue"],
        }
    }

    /// Roles whose presence measures coverage for the target
    pub fn roles(&self) -> &'static [FieldRole] {
        match self {
            TargetEntity::Anime => &[FieldRole::Title, FieldRole::Id, FieldRole::Image, FieldRole::EpisodeList],
            TargetEntity::Manga => &[FieldRole::Title, FieldRole::Id, FieldRole::Image, FieldRole::ChapterList],
            TargetEntity::Episode | TargetEntity::Chapter => &[FieldRole::Id, FieldRole::Number, FieldRole::Title],
        }
    }

    pub fn is_series(&self) -> bool {
        matches!(self, TargetEntity::Anime | TargetEntity::Manga)
    }

    pub fn series_for(content_type: ContentType) -> TargetEntity {
        match content_type {
            ContentType::Anime => TargetEntity::Anime,
            ContentType::Manga => TargetEntity::Manga,
        }
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            TargetEntity::Anime | TargetEntity::Episode => ContentType::Anime,
            TargetEntity::Manga | TargetEntity::Chapter => ContentType::Manga,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryArg {
    pub name: String,
    /// SDL type (`String!`)
    pub type_name: String,
    pub required: bool,
}

/// A field of the query root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryField {
    pub name: String,
    pub args: Vec<QueryArg>,
    pub return_type: TypeRef,
}

/// Object or interface type of the schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeInfo {
    pub name: String,
    pub kind: TypeKind,
    pub fields: Vec<FieldDef>,
}

impl TypeInfo {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A generated query ready to be executed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateQuery {
    /// Query root field, or `root.inner` for unwrapped connections
    pub name: String,
    pub purpose: TargetEntity,
    pub confidence: f64,
    /// Entity type returned in the result list
    pub entity_type: String,
    pub document: String,
    /// Variable templates (`search` -> `{query}`)
    pub variables: BTreeMap<String, String>,
    /// Path of the entity list inside the response
    pub result_path: String,
    pub fields: BTreeMap<FieldRole, FieldMapping>,
    pub child_fields: BTreeMap<FieldRole, FieldMapping>,
}

/// Schema recovered from an endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQLSchemaInfo {
    pub endpoint: String,
    pub query_type: String,
    pub queries: Vec<QueryField>,
    pub types: BTreeMap<String, TypeInfo>,
    pub candidates: BTreeMap<TargetEntity, Vec<CandidateQuery>>,
}

impl GraphQLSchemaInfo {
    /// Build from an introspection document. `None` without a query root.
    pub fn from_schema(endpoint: &str, schema: SchemaDoc) -> Option<Self> {
        let query_type = schema
            .query_type
            .and_then(|q| q.name)
            .unwrap_or_else(|| "Query".to_string());

        let mut types = BTreeMap::new();
        for full in schema.types {
            let Some(name) = full.name else { continue };
            if name.starts_with("__") || !matches!(full.kind, TypeKind::Object | TypeKind::Interface) {
                continue;
            }
            types.insert(
                name.clone(),
                TypeInfo {
                    name,
                    kind: full.kind,
                    fields: full.fields.unwrap_or_default(),
                },
            );
        }

        let queries = types
            .get(&query_type)?
            .fields
            .iter()
            .map(|f| QueryField {
                name: f.name.clone(),
                args: f
                    .args
                    .iter()
                    .map(|a| QueryArg {
                        name: a.name.clone(),
                        type_name: a.ty.render(),
                        required: a.ty.is_non_null() && a.default_value.is_none(),
                    })
                    .collect(),
                return_type: f.ty.clone(),
            })
            .collect();

        let mut info = Self {
            endpoint: endpoint.to_string(),
            query_type,
            queries,
            types,
            candidates: BTreeMap::new(),
        };
        for target in TargetEntity::ALL {
            let ranked = generate_queries(&info, target);
            info.candidates.insert(target, ranked);
        }
        Some(info)
    }

    pub fn object_type(&self, name: &str) -> Option<&TypeInfo> {
        self.types.get(name)
    }

    /// Highest ranked candidate for `target`
    pub fn best(&self, target: TargetEntity) -> Option<&CandidateQuery> {
        self.candidates.get(&target).and_then(|c| c.first())
    }

    /// Best series query, restricted to one content type when given
    pub fn best_series(&self, content_type: Option<ContentType>) -> Option<&CandidateQuery> {
        let targets = match content_type {
            Some(ct) => vec![TargetEntity::series_for(ct)],
            None => vec![TargetEntity::Anime, TargetEntity::Manga],
        };
        targets
            .into_iter()
            .filter_map(|t| self.best(t))
            .fold(None, |best: Option<&CandidateQuery>, c| match best {
                Some(b) if b.confidence >= c.confidence => Some(b),
                _ => Some(c),
            })
    }

    pub fn total_candidates(&self) -> usize {
        self.candidates.values().map(Vec::len).sum()
    }
}

/// Content schema described by a candidate query
pub fn schema_from_candidate(endpoint: &str, candidate: &CandidateQuery) -> ContentSchema {
    ContentSchema {
        source: Some(SchemaSource::Graphql {
            endpoint: endpoint.to_string(),
            query_name: candidate.name.clone(),
            document: candidate.document.clone(),
            variables: candidate.variables.clone(),
        }),
        items_path: candidate.result_path.clone(),
        depth: candidate.result_path.split('.').count(),
        sample_size: 0,
        fields: candidate.fields.clone(),
        child_fields: candidate.child_fields.clone(),
    }
}

/// Refine a structurally inferred schema with the best series query.
///
/// GraphQL evidence replaces structural mappings; roles only seen in JSON
/// samples are kept.
pub fn refine_schema(schema: &mut ContentSchema, info: &GraphQLSchemaInfo, content_type: Option<ContentType>) -> bool {
    let Some(candidate) = info.best_series(content_type) else {
        return false;
    };
    let refined = schema_from_candidate(&info.endpoint, candidate);

    let mut fields = std::mem::take(&mut schema.fields);
    fields.retain(|role, _| !refined.fields.contains_key(role));
    fields.extend(refined.fields.clone());

    *schema = ContentSchema { fields, ..refined };
    true
}
