//! REST strategies for JSON search endpoints.

use super::Evidence;
use crate::error::GenerationError;
use crate::generator::{field_rules, finalize, rest_operations, search_request};
use crate::models::{Architecture, FieldRole, SchemaSource};
use chrono::Utc;
use shared::{ApiKind, ContentType, DynamicProviderConfig, ItemSelector, OperationSpec};
use tracing::debug;

const KNOWN_ARCHITECTURE: f64 = 35.0;
const GENERIC_ARCHITECTURE: f64 = 25.0;
const SEARCH_ENDPOINT: f64 = 15.0;
const REQUIRED_COVERAGE: f64 = 20.0;
const IMAGE_BONUS: f64 = 5.0;
const TERMINOLOGY_BONUS: f64 = 15.0;

fn terminology(content_type: ContentType) -> &'static [&'static str] {
    match content_type {
        ContentType::Anime => &["anime", "episode", "show"],
        ContentType::Manga => &["manga", "chapter", "comic", "manhwa", "manhua"],
    }
}

/// Whether endpoint URLs or the schema's child list speak the content type's language
fn speaks(evidence: &Evidence<'_>, content_type: ContentType) -> bool {
    let child_role = evidence.schema.child_list().map(|(role, _)| role);
    let child_match = match content_type {
        ContentType::Anime => child_role == Some(FieldRole::EpisodeList),
        ContentType::Manga => matches!(child_role, Some(FieldRole::ChapterList) | Some(FieldRole::PageList)),
    };
    child_match
        || evidence.endpoints.iter().any(|e| {
            let url = e.template.to_lowercase();
            terminology(content_type).iter().any(|t| url.contains(t))
        })
}

pub fn score(evidence: &Evidence<'_>, content_type: ContentType) -> f64 {
    if !matches!(evidence.schema.source, Some(SchemaSource::Rest { .. })) {
        return 0.0;
    }

    let mut score = match evidence.fingerprint.architecture {
        Architecture::RestKnown => KNOWN_ARCHITECTURE,
        Architecture::RestGeneric => GENERIC_ARCHITECTURE,
        _ => 0.0,
    };
    if evidence.search_endpoint().is_some() {
        score += SEARCH_ENDPOINT;
    }
    score += REQUIRED_COVERAGE * evidence.schema.coverage(&FieldRole::REQUIRED);
    if evidence.schema.has(FieldRole::Image) {
        score += IMAGE_BONUS;
    }
    if speaks(evidence, content_type) {
        score += TERMINOLOGY_BONUS;
    }
    score
}

pub fn apply(
    evidence: &Evidence<'_>,
    name: &str,
    content_type: ContentType,
) -> Result<DynamicProviderConfig, GenerationError> {
    let schema = evidence.schema;
    if !matches!(schema.source, Some(SchemaSource::Rest { .. })) {
        return Err(GenerationError::MissingEndpoint("REST search"));
    }
    let base = &evidence.profile.base_url;

    let fields = field_rules(&schema.fields, &FieldRole::REQUIRED)?;
    let (_, request) = search_request(schema, base)?;
    let search = OperationSpec {
        request,
        items: ItemSelector::List(schema.items_path.clone()),
        fields: fields.clone(),
    };
    let (detail, children) = rest_operations(evidence, content_type, &fields);
    debug!(items = %schema.items_path, content_type = %content_type, "Applied REST template");

    finalize(DynamicProviderConfig {
        name: name.to_string(),
        content_type,
        api: ApiKind::Rest,
        base_url: base.clone(),
        template_id: format!("rest-{}", content_type),
        headers: evidence.profile.required_headers.clone(),
        search,
        detail,
        children,
        leaf: None,
        confidence: evidence.fingerprint.confidence,
        generated_at: Utc::now(),
    })
}
