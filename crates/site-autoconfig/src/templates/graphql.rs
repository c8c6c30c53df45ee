//! GraphQL strategies: search through the best candidate query, look up
//! series by identifier and list children through a keyed child query.

use super::Evidence;
use crate::error::GenerationError;
use crate::generator::{self, child_list_role, child_rules, field_rules, finalize, relative_to_base};
use crate::graphql::{
    lookup_query, schema_from_candidate, CandidateQuery, GraphQLSchemaInfo, LookupQuery, TargetEntity,
};
use crate::jsonpath;
use crate::models::{Architecture, FieldRole};
use chrono::Utc;
use shared::{ApiKind, ContentType, DynamicProviderConfig, ItemSelector, OperationSpec, RequestTemplate};
use std::collections::BTreeMap;
use tracing::debug;

const KNOWN_ARCHITECTURE: f64 = 40.0;
const GENERIC_ARCHITECTURE: f64 = 25.0;
const CANDIDATE_WEIGHT: f64 = 30.0;
const COVERAGE_WEIGHT: f64 = 20.0;
const TERM_BONUS: f64 = 10.0;

/// Terms that tell the two series kinds apart
fn distinctive_terms(content_type: ContentType) -> &'static [&'static str] {
    match content_type {
        ContentType::Anime => &["anime", "show", "episode", "video"],
        ContentType::Manga => &["manga", "comic", "chapter", "manhwa", "manhua"],
    }
}

fn child_target(content_type: ContentType) -> TargetEntity {
    match content_type {
        ContentType::Anime => TargetEntity::Episode,
        ContentType::Manga => TargetEntity::Chapter,
    }
}

pub fn score(evidence: &Evidence<'_>, content_type: ContentType) -> f64 {
    let Some(info) = evidence.graphql else {
        return 0.0;
    };
    let target = TargetEntity::series_for(content_type);

    let mut score = match evidence.fingerprint.architecture {
        Architecture::GraphqlKnown => KNOWN_ARCHITECTURE,
        Architecture::GraphqlGeneric => GENERIC_ARCHITECTURE,
        _ => 0.0,
    };
    score += COVERAGE_WEIGHT * evidence.schema.coverage(target.roles());

    if let Some(candidate) = info.best(target) {
        score += CANDIDATE_WEIGHT * candidate.confidence;
        let names = format!("{} {}", candidate.entity_type, candidate.name).to_lowercase();
        if distinctive_terms(content_type).iter().any(|t| names.contains(t)) {
            score += TERM_BONUS;
        }
    }
    score
}

fn request(info: &GraphQLSchemaInfo, base: &str, document: &str, variables: &BTreeMap<String, String>) -> RequestTemplate {
    RequestTemplate::Graphql {
        endpoint: relative_to_base(base, &info.endpoint),
        query: document.to_string(),
        variables: variables.clone(),
    }
}

pub fn apply(
    evidence: &Evidence<'_>,
    name: &str,
    content_type: ContentType,
) -> Result<DynamicProviderConfig, GenerationError> {
    let info = evidence
        .graphql
        .ok_or(GenerationError::MissingEndpoint("graphql"))?;
    let target = TargetEntity::series_for(content_type);
    let candidate = info
        .best(target)
        .ok_or_else(|| GenerationError::NoCandidateQuery(content_type.to_string()))?;
    let base = &evidence.profile.base_url;

    let fields = field_rules(&candidate.fields, &FieldRole::REQUIRED)?;
    let search_request = request(info, base, &candidate.document, &candidate.variables);
    let search = OperationSpec {
        request: search_request.clone(),
        items: ItemSelector::List(candidate.result_path.clone()),
        fields: fields.clone(),
    };

    let lookup = lookup_query(info, &candidate.entity_type);
    let detail = match &lookup {
        Some(lookup) => OperationSpec {
            request: request(info, base, &lookup.document, &lookup.variables),
            items: ItemSelector::Single(lookup.result_path.clone()),
            fields: field_rules(&lookup.fields, &FieldRole::REQUIRED)?,
        },
        None => OperationSpec {
            request: generator::rebind_query_variables(&search_request, "{id}"),
            items: ItemSelector::Single(jsonpath::join(&candidate.result_path, "[0]")),
            fields: fields.clone(),
        },
    };

    let children = children_operation(info, base, candidate, lookup.as_ref(), content_type)?;
    debug!(
        query = %candidate.name,
        lookup = lookup.as_ref().map(|l| l.name.as_str()).unwrap_or("-"),
        "Applied GraphQL template"
    );

    finalize(DynamicProviderConfig {
        name: name.to_string(),
        content_type,
        api: ApiKind::Graphql,
        base_url: base.clone(),
        template_id: format!("graphql-{}", content_type),
        headers: evidence.profile.required_headers.clone(),
        search,
        detail,
        children,
        leaf: None,
        confidence: evidence.fingerprint.confidence,
        generated_at: Utc::now(),
    })
}

/// Children come from, in order: a child query keyed by the series id, the
/// lookup query's child list, or the child list of the first search hit.
fn children_operation(
    info: &GraphQLSchemaInfo,
    base: &str,
    candidate: &CandidateQuery,
    lookup: Option<&LookupQuery>,
    content_type: ContentType,
) -> Result<OperationSpec, GenerationError> {
    let keyed = info
        .candidates
        .get(&child_target(content_type))
        .into_iter()
        .flatten()
        .find(|c| c.variables.values().any(|v| v == "{id}"));
    if let Some(child) = keyed {
        return Ok(OperationSpec {
            request: request(info, base, &child.document, &child.variables),
            items: ItemSelector::List(child.result_path.clone()),
            fields: child_rules(&child.fields),
        });
    }

    let lookup_list = lookup.and_then(|lookup| {
        let (_, list) = lookup.fields.iter().find(|(role, _)| role.is_list())?;
        Some((lookup, list))
    });
    if let Some((lookup, list)) = lookup_list {
        return Ok(OperationSpec {
            request: request(info, base, &lookup.document, &lookup.variables),
            items: ItemSelector::List(jsonpath::join(&lookup.result_path, &list.path)),
            fields: child_rules(&lookup.child_fields),
        });
    }

    let series = schema_from_candidate(&info.endpoint, candidate);
    let Some((_, list)) = series.child_list() else {
        return Err(GenerationError::MissingRole(child_list_role(content_type)));
    };
    let search = request(info, base, &candidate.document, &candidate.variables);
    let first = jsonpath::join(&candidate.result_path, "[0]");
    Ok(OperationSpec {
        request: generator::rebind_query_variables(&search, "{id}"),
        items: ItemSelector::List(jsonpath::join(&first, &list.path)),
        fields: child_rules(&series.child_fields),
    })
}
