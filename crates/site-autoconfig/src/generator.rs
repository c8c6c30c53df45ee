//! Schema generator.
//!
//! Maps an inferred [`ContentSchema`] straight onto a
//! [`DynamicProviderConfig`] without architecture-specific knowledge. The
//! building blocks here (field rules, request templates, path conventions)
//! are shared with the specialised templates.

use crate::error::GenerationError;
use crate::jsonpath;
use crate::models::{ContentSchema, FieldMapping, FieldRole, SchemaSource, SiteProfile};
use crate::templates::Evidence;
use chrono::Utc;
use shared::{
    ApiKind, ContentType, DynamicProviderConfig, FieldRule, ItemSelector, OperationSpec, RequestTemplate,
    TransformStep,
};
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

pub const GENERATOR_ID: &str = "schema-generator";
pub const SKELETON_ID: &str = "skeleton";

/// Transformation steps attached to a role's extracted value
pub fn transforms_for(role: FieldRole) -> Vec<TransformStep> {
    match role {
        FieldRole::Title | FieldRole::Description => vec![TransformStep::HtmlUnescape, TransformStep::Trim],
        FieldRole::Image | FieldRole::Url | FieldRole::StreamUrl => vec![TransformStep::UrlJoin { base: None }],
        FieldRole::Id | FieldRole::Number => vec![TransformStep::Trim],
        FieldRole::EpisodeList | FieldRole::ChapterList | FieldRole::PageList => Vec::new(),
    }
}

/// Field rules for the scalar roles of `fields`; `required` roles are
/// marked required and must be present.
pub fn field_rules(
    fields: &BTreeMap<FieldRole, FieldMapping>,
    required: &[FieldRole],
) -> Result<Vec<FieldRule>, GenerationError> {
    if let Some(missing) = required
        .iter()
        .find(|r| fields.get(r).map(|m| m.path.trim().is_empty()).unwrap_or(true))
    {
        return Err(GenerationError::MissingRole(*missing));
    }

    Ok(fields
        .iter()
        .filter(|(role, mapping)| !role.is_list() && !mapping.path.trim().is_empty())
        .map(|(role, mapping)| {
            let rule = if required.contains(role) {
                FieldRule::required(role.as_str(), mapping.path.clone())
            } else {
                FieldRule::optional(role.as_str(), mapping.path.clone())
            };
            rule.with_transforms(transforms_for(*role))
        })
        .collect())
}

/// Child entity rules. The identifier (or URL when there is none) is required.
pub fn child_rules(fields: &BTreeMap<FieldRole, FieldMapping>) -> Vec<FieldRule> {
    let key = if fields.contains_key(&FieldRole::Id) || !fields.contains_key(&FieldRole::Url) {
        FieldRole::Id
    } else {
        FieldRole::Url
    };
    let mut fields = fields.clone();
    fields.entry(key).or_insert_with(|| FieldMapping {
        path: key.as_str().to_string(),
        confidence: 0.0,
        source: None,
    });
    // The key is present now, so the rules cannot fail.
    field_rules(&fields, &[key]).unwrap_or_default()
}

/// Make `url` relative to `base` when it lives under it
pub fn relative_to_base(base: &str, url: &str) -> String {
    let base = base.trim_end_matches('/');
    match url.strip_prefix(base) {
        Some(rest) if rest.starts_with('/') || rest.is_empty() => rest.to_string(),
        _ => url.to_string(),
    }
}

/// Search request described by the schema source
pub fn search_request(schema: &ContentSchema, base: &str) -> Result<(ApiKind, RequestTemplate), GenerationError> {
    match &schema.source {
        Some(SchemaSource::Rest { template, .. }) => Ok((
            ApiKind::Rest,
            RequestTemplate::Get {
                url: relative_to_base(base, template),
            },
        )),
        Some(SchemaSource::Graphql {
            endpoint,
            document,
            variables,
            ..
        }) => Ok((
            ApiKind::Graphql,
            RequestTemplate::Graphql {
                endpoint: relative_to_base(base, endpoint),
                query: document.clone(),
                variables: variables.clone(),
            },
        )),
        None => Err(GenerationError::MissingEndpoint("search")),
    }
}

/// Conventional REST detail and children paths for a content type
pub fn convention_paths(content_type: ContentType) -> (String, String) {
    let kind = content_type.as_str();
    (
        format!("/api/{}/{{id}}", kind),
        format!("/api/{}/{{id}}/{}", kind, content_type.child_noun()),
    )
}

/// Default child rules when nothing about children is known
pub fn default_child_rules() -> Vec<FieldRule> {
    vec![
        FieldRule::required("id", "id").with_transforms(transforms_for(FieldRole::Id)),
        FieldRule::optional("number", "number"),
        FieldRule::optional("title", "title").with_transforms(transforms_for(FieldRole::Title)),
        FieldRule::optional("url", "url").with_transforms(transforms_for(FieldRole::Url)),
    ]
}

/// Content type from an explicit choice, the schema's child list, then tags
pub fn infer_content_type(schema: &ContentSchema, profile: &SiteProfile, forced: Option<ContentType>) -> ContentType {
    if let Some(content_type) = forced {
        return content_type;
    }
    match schema.child_list().map(|(role, _)| role) {
        Some(FieldRole::ChapterList) | Some(FieldRole::PageList) => return ContentType::Manga,
        Some(FieldRole::EpisodeList) => return ContentType::Anime,
        _ => {}
    }
    if profile.has_tag("madara") {
        return ContentType::Manga;
    }
    ContentType::Anime
}

/// Provider name from the site host: `www.anime-site.org` -> `anime-site`
pub fn provider_name_for(base_url: &str) -> String {
    let host = Url::parse(base_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| base_url.to_string());
    let host = host.trim_start_matches("www.");
    if host.parse::<std::net::IpAddr>().is_ok() {
        return host.replace(['.', ':'], "-");
    }
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    let name = match labels.len() {
        0 => "provider",
        1 => labels[0],
        n => labels[n - 2],
    };
    shared::paths::sanitize_name(name)
}

/// Reject configs missing a required element
pub fn finalize(config: DynamicProviderConfig) -> Result<DynamicProviderConfig, GenerationError> {
    let missing = config.missing_required();
    if missing.is_empty() {
        Ok(config)
    } else {
        Err(GenerationError::Incomplete(missing))
    }
}

/// Template-agnostic generation straight from the content schema
pub fn generate(
    evidence: &Evidence<'_>,
    name: &str,
    content_type: Option<ContentType>,
) -> Result<DynamicProviderConfig, GenerationError> {
    let schema = evidence.schema;
    let base = &evidence.profile.base_url;
    let content_type = infer_content_type(schema, evidence.profile, content_type);

    let fields = field_rules(&schema.fields, &FieldRole::REQUIRED)?;
    let (api, request) = search_request(schema, base)?;
    let search = OperationSpec {
        request: request.clone(),
        items: ItemSelector::List(schema.items_path.clone()),
        fields: fields.clone(),
    };

    let (detail, children) = match api {
        ApiKind::Rest => rest_operations(evidence, content_type, &fields),
        ApiKind::Graphql => {
            let (_, list) = schema
                .child_list()
                .ok_or(GenerationError::MissingRole(child_list_role(content_type)))?;
            // Search by identifier and read the children of the first hit.
            let by_id = rebind_query_variables(&request, "{id}");
            let first = jsonpath::join(&schema.items_path, "[0]");
            let detail = OperationSpec {
                request: by_id.clone(),
                items: ItemSelector::Single(first.clone()),
                fields: fields.clone(),
            };
            let children = OperationSpec {
                request: by_id,
                items: ItemSelector::List(jsonpath::join(&first, &list.path)),
                fields: child_rules(&schema.child_fields),
            };
            (detail, children)
        }
    };

    debug!(api = ?api, content_type = %content_type, "Generated config from schema");
    finalize(DynamicProviderConfig {
        name: name.to_string(),
        content_type,
        api,
        base_url: base.clone(),
        template_id: GENERATOR_ID.to_string(),
        headers: evidence.profile.required_headers.clone(),
        search,
        detail,
        children,
        leaf: None,
        confidence: evidence.fingerprint.confidence,
        generated_at: Utc::now(),
    })
}

/// Detail and children operations of a REST provider.
///
/// A discovered detail endpoint wins over the path convention; children are
/// read from the detail response when the schema located a child list.
pub fn rest_operations(
    evidence: &Evidence<'_>,
    content_type: ContentType,
    fields: &[FieldRule],
) -> (OperationSpec, OperationSpec) {
    let base = &evidence.profile.base_url;
    let (detail_path, children_path) = convention_paths(content_type);
    let detail_path = evidence
        .detail_endpoint(content_type)
        .map(|e| relative_to_base(base, &e.template))
        .unwrap_or(detail_path);
    let detail = OperationSpec {
        request: RequestTemplate::Get { url: detail_path },
        items: ItemSelector::Single(String::new()),
        fields: fields.to_vec(),
    };

    let children = match evidence.schema.child_list() {
        Some((_, list)) => OperationSpec {
            request: detail.request.clone(),
            items: ItemSelector::List(list.path.clone()),
            fields: child_rules(&evidence.schema.child_fields),
        },
        None => OperationSpec {
            request: RequestTemplate::Get { url: children_path },
            items: ItemSelector::Auto,
            fields: default_child_rules(),
        },
    };
    (detail, children)
}

pub fn child_list_role(content_type: ContentType) -> FieldRole {
    match content_type {
        ContentType::Anime => FieldRole::EpisodeList,
        ContentType::Manga => FieldRole::ChapterList,
    }
}

/// Replace `{query}` in GraphQL variable templates
pub fn rebind_query_variables(request: &RequestTemplate, replacement: &str) -> RequestTemplate {
    match request {
        RequestTemplate::Graphql {
            endpoint,
            query,
            variables,
        } => RequestTemplate::Graphql {
            endpoint: endpoint.clone(),
            query: query.clone(),
            variables: variables
                .iter()
                .map(|(k, v)| (k.clone(), v.replace("{query}", replacement)))
                .collect(),
        },
        other => other.clone(),
    }
}

/// Provisional config built from path conventions only.
///
/// Used when every template failed; it is reported but never persisted.
pub fn skeleton(profile: &SiteProfile, name: &str, content_type: Option<ContentType>, confidence: f64) -> DynamicProviderConfig {
    let content_type = content_type.unwrap_or(ContentType::Anime);
    let (detail_path, children_path) = convention_paths(content_type);
    let series_fields = vec![
        FieldRule::required("title", "title").with_transforms(transforms_for(FieldRole::Title)),
        FieldRule::required("id", "id").with_transforms(transforms_for(FieldRole::Id)),
        FieldRule::optional("image", "image").with_transforms(transforms_for(FieldRole::Image)),
    ];

    DynamicProviderConfig {
        name: name.to_string(),
        content_type,
        api: ApiKind::Rest,
        base_url: profile.base_url.clone(),
        template_id: SKELETON_ID.to_string(),
        headers: profile.required_headers.clone(),
        search: OperationSpec {
            request: RequestTemplate::Get {
                url: "/api/search?q={query}".to_string(),
            },
            items: ItemSelector::Auto,
            fields: series_fields.clone(),
        },
        detail: OperationSpec {
            request: RequestTemplate::Get { url: detail_path },
            items: ItemSelector::Single(String::new()),
            fields: series_fields,
        },
        children: OperationSpec {
            request: RequestTemplate::Get { url: children_path },
            items: ItemSelector::Auto,
            fields: default_child_rules(),
        },
        leaf: None,
        confidence,
        generated_at: Utc::now(),
    }
}
