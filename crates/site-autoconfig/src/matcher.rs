//! Content pattern matching.
//!
//! Walks JSON responses looking for repeating arrays of structurally similar
//! objects and infers field roles from key names. The same key heuristics are
//! reused by the GraphQL introspector on schema field names.

use crate::jsonpath;
use crate::models::{
    CandidateEndpoint, ContentSchema, EndpointKind, FieldMapping, FieldRole, SchemaSource,
    SiteProfile,
};
use serde_json::{Map, Value};
use shared::config::DiscoveryConfig;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// Coarse shape of a value or schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    Object,
    List,
}

impl Shape {
    pub fn of(value: &Value) -> Shape {
        match value {
            Value::Array(_) => Shape::List,
            Value::Object(_) => Shape::Object,
            _ => Shape::Scalar,
        }
    }
}

const IMAGE_TERMS: &[&str] = &["cover", "image", "poster", "thumb", "banner", "img", "avatar", "picture"];
const STREAM_TERMS: &[&str] = &["stream", "m3u8", "hls", "mp4", "embed", "videourl", "video_url"];
const DESCRIPTION_TERMS: &[&str] = &["description", "synopsis", "summary", "overview"];
const URL_TERMS: &[&str] = &["url", "link", "href", "permalink"];
const NOT_TITLE_TERMS: &[&str] = &["user", "author", "studio", "genre", "type", "file", "site"];

/// Infer the role of a key from its name and shape
pub fn classify_key(key: &str, shape: Shape) -> Option<FieldRole> {
    let lower = key.to_ascii_lowercase();
    let has = |terms: &[&str]| terms.iter().any(|t| lower.contains(t));

    if shape == Shape::List {
        if lower.contains("episode") {
            return Some(FieldRole::EpisodeList);
        }
        if lower.contains("chapter") {
            return Some(FieldRole::ChapterList);
        }
        if lower.contains("page") && !lower.contains("pagination") {
            return Some(FieldRole::PageList);
        }
        if has(IMAGE_TERMS) {
            return Some(FieldRole::Image);
        }
        if has(STREAM_TERMS) || lower == "sources" {
            return Some(FieldRole::StreamUrl);
        }
        return None;
    }

    if has(IMAGE_TERMS) {
        return Some(FieldRole::Image);
    }
    if has(STREAM_TERMS) {
        return Some(FieldRole::StreamUrl);
    }
    if lower == "id"
        || lower == "_id"
        || lower == "uuid"
        || lower.ends_with("_id")
        || key.ends_with("Id")
        || lower.contains("slug")
    {
        return Some(FieldRole::Id);
    }
    if (lower.contains("title") || lower == "name" || lower.ends_with("_name") || key.ends_with("Name"))
        && !has(NOT_TITLE_TERMS)
    {
        return Some(FieldRole::Title);
    }
    if has(DESCRIPTION_TERMS) {
        return Some(FieldRole::Description);
    }
    if shape == Shape::Scalar
        && (lower == "number"
            || lower == "num"
            || lower == "no"
            || lower.ends_with("number")
            || lower.ends_with("_num")
            || lower == "episode"
            || lower == "chapter"
            || lower == "ep")
    {
        return Some(FieldRole::Number);
    }
    if has(URL_TERMS) {
        return Some(FieldRole::Url);
    }
    None
}

/// Canonical key names that win ties for a role
pub fn is_canonical(role: FieldRole, key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    let names: &[&str] = match role {
        FieldRole::Title => &["title", "name"],
        FieldRole::Id => &["id", "slug"],
        FieldRole::Image => &["image", "cover", "coverimage", "thumbnail", "thumb", "poster"],
        FieldRole::Description => &["description", "synopsis"],
        FieldRole::Url => &["url", "link"],
        FieldRole::Number => &["number", "episode", "chapter"],
        FieldRole::EpisodeList => &["episodes"],
        FieldRole::ChapterList => &["chapters"],
        FieldRole::PageList => &["pages"],
        FieldRole::StreamUrl => &["stream", "streamurl", "sources"],
    };
    names.contains(&lower.as_str())
}

/// Preferred sub-keys when a role value is an object
pub fn preferred_subkeys(role: FieldRole) -> &'static [&'static str] {
    match role {
        FieldRole::Title => &["romaji", "english", "en", "userPreferred", "rendered", "default", "native"],
        FieldRole::Image => &["large", "extraLarge", "medium", "original", "url", "src", "image_url", "jpg"],
        FieldRole::Description => &["rendered", "en", "english"],
        _ => &["url", "src", "href", "value", "id"],
    }
}

/// Path from a role value to its best scalar leaf ("" when already scalar)
pub fn leaf_path(role: FieldRole, value: &Value) -> Option<String> {
    leaf_path_at(role, value, 0)
}

fn leaf_path_at(role: FieldRole, value: &Value, depth: usize) -> Option<String> {
    if depth > 3 {
        return None;
    }
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Some(String::new()),
        Value::Array(items) => {
            let first = items.first()?;
            let rest = leaf_path_at(role, first, depth + 1)?;
            Some(jsonpath::join("[0]", &rest))
        }
        Value::Object(map) => {
            let preferred = preferred_subkeys(role)
                .iter()
                .find(|k| map.get(**k).map(|v| !v.is_null()).unwrap_or(false))
                .map(|k| k.to_string());
            let key = preferred.or_else(|| {
                let mut addressable = map.iter().filter(|(k, _)| jsonpath::is_addressable(k));
                addressable
                    .clone()
                    .find(|(_, v)| v.is_string())
                    .or_else(|| addressable.find(|(_, v)| v.is_object()))
                    .map(|(k, _)| k.clone())
            })?;
            let rest = leaf_path_at(role, &map[&key], depth + 1)?;
            Some(jsonpath::join(&key, &rest))
        }
        Value::Null => None,
    }
}

/// An array of objects found in a document
#[derive(Debug, Clone)]
pub struct ListCandidate<'a> {
    pub path: String,
    pub depth: usize,
    pub objects: Vec<&'a Map<String, Value>>,
    pub shared_keys: usize,
    pub coverage: f64,
}

/// Collect entity-list candidates in depth-first order
pub fn find_entity_lists(value: &Value, max_depth: usize, sample_size: usize) -> Vec<ListCandidate<'_>> {
    let mut found = Vec::new();
    walk(value, String::new(), 0, max_depth, sample_size.max(1), &mut found);
    found
}

fn walk<'a>(
    value: &'a Value,
    path: String,
    depth: usize,
    max_depth: usize,
    sample_size: usize,
    found: &mut Vec<ListCandidate<'a>>,
) {
    if depth > max_depth {
        return;
    }
    match value {
        Value::Array(items) => {
            if let Some(candidate) = list_candidate(items, &path, depth, sample_size) {
                found.push(candidate);
            }
            // Nested lists are looked at through the first element only.
            if let Some(first) = items.first() {
                walk(first, jsonpath::join(&path, "[0]"), depth + 1, max_depth, sample_size, found);
            }
        }
        Value::Object(map) => {
            for (key, child) in map {
                if matches!(child, Value::Array(_) | Value::Object(_)) && jsonpath::is_addressable(key) {
                    walk(child, jsonpath::join(&path, key), depth + 1, max_depth, sample_size, found);
                }
            }
        }
        _ => {}
    }
}

fn list_candidate<'a>(
    items: &'a [Value],
    path: &str,
    depth: usize,
    sample_size: usize,
) -> Option<ListCandidate<'a>> {
    let objects: Vec<&Map<String, Value>> = items
        .iter()
        .take(sample_size)
        .filter_map(|v| v.as_object())
        .collect();
    if objects.is_empty() {
        return None;
    }
    let sampled = items.len().min(sample_size);
    if (objects.len() as f64) < 0.8 * sampled as f64 {
        return None;
    }

    let first = objects[0];
    let shared_keys = first
        .keys()
        .filter(|k| objects.iter().all(|o| o.contains_key(k.as_str())))
        .count();
    if shared_keys < 2 {
        return None;
    }

    let mut roles = HashSet::new();
    for object in &objects {
        for (key, value) in object.iter() {
            if let Some(role) = classify_key(key, Shape::of(value)) {
                roles.insert(role);
            }
        }
    }
    let coverage = FieldRole::CORE.iter().filter(|r| roles.contains(r)).count() as f64
        / FieldRole::CORE.len() as f64;

    Some(ListCandidate {
        path: path.to_string(),
        depth,
        objects,
        shared_keys,
        coverage,
    })
}

/// Pick the shallowest candidate, then the one with the best role coverage.
/// Earlier candidates win remaining ties.
pub fn best_entity_list<'a>(candidates: &'a [ListCandidate<'a>]) -> Option<&'a ListCandidate<'a>> {
    let mut best: Option<&ListCandidate> = None;
    for candidate in candidates {
        best = match best {
            None => Some(candidate),
            Some(current) => {
                let better = candidate.depth < current.depth
                    || (candidate.depth == current.depth && candidate.coverage > current.coverage);
                if better {
                    Some(candidate)
                } else {
                    Some(current)
                }
            }
        };
    }
    best
}

/// 0..1 score of how much a document looks like a list of entities
pub fn entity_list_score(value: &Value, max_depth: usize) -> f64 {
    let candidates = find_entity_lists(value, max_depth, 10);
    match best_entity_list(&candidates) {
        Some(best) => 0.5 + 0.5 * best.coverage,
        None => 0.0,
    }
}

/// Infer field roles over the sampled objects of a list
pub fn infer_fields(objects: &[&Map<String, Value>]) -> BTreeMap<FieldRole, FieldMapping> {
    // Keys in first-seen order, so equal candidates resolve deterministically.
    let mut keys: Vec<&String> = Vec::new();
    let mut seen = HashSet::new();
    for object in objects {
        for key in object.keys().filter(|k| jsonpath::is_addressable(k)) {
            if seen.insert(key.as_str()) {
                keys.push(key);
            }
        }
    }

    struct Pick {
        key: String,
        leaf: String,
        confidence: f64,
        canonical: bool,
    }

    let mut picks: BTreeMap<FieldRole, Pick> = BTreeMap::new();
    for key in keys {
        let present: Vec<&Value> = objects
            .iter()
            .filter_map(|o| o.get(key.as_str()))
            .filter(|v| !v.is_null())
            .collect();
        let Some(first) = present.first() else {
            continue;
        };
        let Some(role) = classify_key(key, Shape::of(first)) else {
            continue;
        };
        let leaf = if role.is_list() {
            String::new()
        } else {
            match leaf_path(role, first) {
                Some(leaf) => leaf,
                None => continue,
            }
        };

        let pick = Pick {
            key: key.clone(),
            leaf,
            confidence: present.len() as f64 / objects.len() as f64,
            canonical: is_canonical(role, key),
        };
        let replace = match picks.get(&role) {
            None => true,
            Some(current) => {
                (pick.confidence, pick.canonical, std::cmp::Reverse(pick.key.len()))
                    > (current.confidence, current.canonical, std::cmp::Reverse(current.key.len()))
            }
        };
        if replace {
            picks.insert(role, pick);
        }
    }

    picks
        .into_iter()
        .map(|(role, pick)| {
            (
                role,
                FieldMapping {
                    path: jsonpath::join(&pick.key, &pick.leaf),
                    confidence: pick.confidence,
                    source: None,
                },
            )
        })
        .collect()
}

/// Structural schema inference over JSON documents
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    max_depth: usize,
    sample_size: usize,
}

impl PatternMatcher {
    pub fn new(settings: &DiscoveryConfig) -> Self {
        Self {
            max_depth: settings.max_json_depth,
            sample_size: settings.sample_size,
        }
    }

    /// Infer a schema from a single document
    pub fn infer(&self, body: &Value) -> Option<ContentSchema> {
        let candidates = find_entity_lists(body, self.max_depth, self.sample_size);
        let best = best_entity_list(&candidates)?;
        let fields = infer_fields(&best.objects);

        let child_fields = fields
            .iter()
            .find(|(role, _)| role.is_list())
            .map(|(_, mapping)| self.infer_children(&best.objects, &mapping.path))
            .unwrap_or_default();

        Some(ContentSchema {
            source: None,
            items_path: best.path.clone(),
            depth: best.depth,
            sample_size: best.objects.len(),
            fields,
            child_fields,
        })
    }

    fn infer_children(&self, parents: &[&Map<String, Value>], list_key: &str) -> BTreeMap<FieldRole, FieldMapping> {
        let children: Vec<&Map<String, Value>> = parents
            .iter()
            .filter_map(|p| p.get(list_key))
            .filter_map(|v| v.as_array())
            .flat_map(|items| items.iter().filter_map(|i| i.as_object()))
            .take(self.sample_size)
            .collect();
        if children.is_empty() {
            return BTreeMap::new();
        }
        infer_fields(&children)
    }

    /// Build the content schema for a site from its accepted endpoints.
    ///
    /// REST list endpoints are preferred over detail endpoints; among them
    /// the schema resolving the required roles with the best coverage wins.
    pub fn match_endpoints(&self, profile: &SiteProfile, endpoints: &[CandidateEndpoint]) -> ContentSchema {
        let mut scored: Vec<(ContentSchema, bool)> = Vec::new();

        for endpoint in endpoints.iter().filter(|e| e.kind == EndpointKind::Rest) {
            if let Some(mut schema) = self.infer(&endpoint.body) {
                schema.source = Some(SchemaSource::Rest {
                    url: endpoint.url.clone(),
                    template: endpoint.template.clone(),
                });
                debug!(
                    url = %endpoint.url,
                    items_path = %schema.items_path,
                    roles = schema.fields.len(),
                    "Inferred schema from endpoint"
                );
                scored.push((schema, endpoint.detail));
            }
        }

        // Root-level JSON seen by the prober is weaker evidence but better than nothing.
        if scored.is_empty() {
            for observed in &profile.endpoints {
                let Ok(body) = serde_json::from_str::<Value>(&observed.sample_body) else {
                    continue;
                };
                if let Some(mut schema) = self.infer(&body) {
                    schema.source = Some(SchemaSource::Rest {
                        url: observed.url.clone(),
                        template: observed.url.clone(),
                    });
                    scored.push((schema, true));
                }
            }
        }

        let best = scored
            .into_iter()
            .enumerate()
            .max_by(|(ia, (a, a_detail)), (ib, (b, b_detail))| {
                let key = |s: &ContentSchema, detail: bool| {
                    (
                        FieldRole::REQUIRED.iter().filter(|r| s.has(**r)).count(),
                        !detail,
                        (s.coverage(&FieldRole::CORE) * 1000.0) as u64,
                        std::cmp::Reverse(s.depth),
                    )
                };
                key(a, *a_detail)
                    .cmp(&key(b, *b_detail))
                    // Earlier endpoints win ties.
                    .then(ib.cmp(ia))
            })
            .map(|(_, (schema, _))| schema);

        match best {
            Some(schema) => {
                info!(
                    items_path = %schema.items_path,
                    roles = ?schema.fields.keys().collect::<Vec<_>>(),
                    "Content schema inferred"
                );
                schema
            }
            None => {
                info!("No entity list found in any endpoint");
                ContentSchema::default()
            }
        }
    }
}
