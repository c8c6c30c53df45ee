//! Candidate query generation over an introspected schema.
//!
//! Entity lists are found on query root fields returning a list of objects,
//! or one level down through a connection object (`Page { media: [Media] }`,
//! `edges { node }`, `nodes`, `items`). Candidates are ranked by target
//! type-name match, role coverage and nesting.

use super::types::{FieldDef, TypeKind};
use super::{CandidateQuery, GraphQLSchemaInfo, QueryArg, QueryField, TargetEntity, TypeInfo};
use crate::jsonpath;
use crate::matcher::{classify_key, is_canonical, preferred_subkeys, Shape};
use crate::models::{FieldMapping, FieldRole};
use std::collections::{BTreeMap, HashSet};

const NAME_MATCH_WEIGHT: f64 = 0.5;
const QUERY_NAME_WEIGHT: f64 = 0.3;
const COVERAGE_WEIGHT: f64 = 0.35;
const NESTING_WEIGHT: f64 = 0.15;

const SEARCH_ARGS: &[&str] = &["search", "query", "q", "keyword", "term", "title", "name", "text"];
const PAGE_ARGS: &[&str] = &["page", "offset"];

/// Ranked candidate queries for `target`: descending confidence, unique names
pub fn generate_queries(info: &GraphQLSchemaInfo, target: TargetEntity) -> Vec<CandidateQuery> {
    let mut candidates: Vec<CandidateQuery> = info
        .queries
        .iter()
        .flat_map(|query| entry_points(info, query).into_iter().map(move |entry| (query, entry)))
        .filter_map(|(query, entry)| build_candidate(info, query, &entry, target))
        .collect();

    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.name.cmp(&b.name))
    });
    let mut seen = HashSet::new();
    candidates.retain(|c| seen.insert(c.name.clone()));
    candidates
}

/// Where the entity list of a query root field lives
#[derive(Debug)]
struct EntryPoint<'a> {
    /// List field inside a connection object
    inner: Option<&'a FieldDef>,
    /// Entities sit under `node` of each list element
    via_node: bool,
    entity: &'a TypeInfo,
}

impl EntryPoint<'_> {
    fn nesting(&self) -> usize {
        usize::from(self.inner.is_some())
    }
}

fn entry_points<'a>(info: &'a GraphQLSchemaInfo, query: &'a QueryField) -> Vec<EntryPoint<'a>> {
    let Some(returned) = query.return_type.base_name().and_then(|n| info.object_type(n)) else {
        return Vec::new();
    };
    if query.return_type.is_list() {
        return vec![EntryPoint {
            inner: None,
            via_node: false,
            entity: returned,
        }];
    }

    let mut points = Vec::new();
    for field in returned.fields.iter().filter(|f| f.ty.is_list()) {
        let Some(element) = field.ty.base_name().and_then(|n| info.object_type(n)) else {
            continue;
        };
        let node = element
            .field("node")
            .filter(|_| field.name == "edges")
            .and_then(|node| node.ty.base_name())
            .and_then(|n| info.object_type(n));
        points.push(match node {
            Some(entity) => EntryPoint {
                inner: Some(field),
                via_node: true,
                entity,
            },
            None => EntryPoint {
                inner: Some(field),
                via_node: false,
                entity: element,
            },
        });
    }
    points
}

/// Roles of a type; child-list roles carry the roles of their element type
type Roles = BTreeMap<FieldRole, (RoleField, BTreeMap<FieldRole, RoleField>)>;

/// A role resolved on a type
#[derive(Debug, Clone)]
struct RoleField {
    field: String,
    /// Path relative to the entity
    path: String,
    /// Selection set fragment
    selection: String,
    canonical: bool,
}

/// Resolve roles on the fields of `ty`. Child lists get a nested selection
/// when `with_children` is set.
fn resolve_roles(info: &GraphQLSchemaInfo, ty: &TypeInfo, with_children: bool) -> Roles {
    let mut roles = Roles::new();

    for field in &ty.fields {
        let element = field.ty.base_name().and_then(|n| info.object_type(n));
        let shape = if field.ty.is_list() {
            Shape::List
        } else if element.is_some() {
            Shape::Object
        } else {
            Shape::Scalar
        };
        let Some(role) = classify_key(&field.name, shape) else {
            continue;
        };

        let resolved = if role.is_list() {
            if !with_children {
                continue;
            }
            match element {
                Some(child) => {
                    let children: BTreeMap<FieldRole, RoleField> = resolve_roles(info, child, false)
                        .into_iter()
                        .map(|(r, (rf, _))| (r, rf))
                        .collect();
                    if children.is_empty() {
                        continue;
                    }
                    let inner: Vec<&str> = children.values().map(|c| c.selection.as_str()).collect();
                    (
                        RoleField {
                            field: field.name.clone(),
                            path: field.name.clone(),
                            selection: format!("{} {{ {} }}", field.name, inner.join(" ")),
                            canonical: is_canonical(role, &field.name),
                        },
                        children,
                    )
                }
                None => (
                    RoleField {
                        field: field.name.clone(),
                        path: field.name.clone(),
                        selection: field.name.clone(),
                        canonical: is_canonical(role, &field.name),
                    },
                    BTreeMap::new(),
                ),
            }
        } else {
            let leaf = match element {
                Some(object) => match leaf_chain(info, object, role, 0) {
                    Some(chain) => Some(chain),
                    None => continue,
                },
                None => None,
            };
            let index = if field.ty.is_list() { "[0]" } else { "" };
            let (path, selection) = match leaf {
                Some(chain) => (
                    jsonpath::join(&format!("{}{}", field.name, index), &chain.join(".")),
                    nest_selection(&field.name, &chain),
                ),
                None => (format!("{}{}", field.name, index), field.name.clone()),
            };
            (
                RoleField {
                    field: field.name.clone(),
                    path,
                    selection,
                    canonical: is_canonical(role, &field.name),
                },
                BTreeMap::new(),
            )
        };

        let replace = match roles.get(&role) {
            None => true,
            Some((current, _)) => resolved.0.canonical && !current.canonical,
        };
        if replace {
            roles.insert(role, resolved);
        }
    }
    roles
}

/// Field names leading from an object to its best scalar leaf
fn leaf_chain(info: &GraphQLSchemaInfo, ty: &TypeInfo, role: FieldRole, depth: usize) -> Option<Vec<String>> {
    if depth > 2 {
        return None;
    }
    let preferred = preferred_subkeys(role)
        .iter()
        .find_map(|key| ty.field(key))
        .or_else(|| ty.fields.iter().find(|f| f.ty.base_name() == Some("String")))
        .or_else(|| ty.fields.iter().find(|f| f.ty.base_kind() == TypeKind::Scalar))?;

    match preferred.ty.base_name().and_then(|n| info.object_type(n)) {
        Some(object) => {
            let mut chain = vec![preferred.name.clone()];
            chain.extend(leaf_chain(info, object, role, depth + 1)?);
            Some(chain)
        }
        None => Some(vec![preferred.name.clone()]),
    }
}

/// `title`, `[romaji]` -> `title { romaji }`
fn nest_selection(field: &str, chain: &[String]) -> String {
    let mut selection = String::new();
    for name in chain.iter().rev() {
        selection = if selection.is_empty() {
            name.clone()
        } else {
            format!("{} {{ {} }}", name, selection)
        };
    }
    format!("{} {{ {} }}", field, selection)
}

/// Argument that receives the search term, or the identifier when `by_id`
fn key_argument(args: &[QueryArg], by_id: bool) -> Option<&QueryArg> {
    if !by_id {
        SEARCH_ARGS
            .iter()
            .find_map(|name| args.iter().find(|a| a.name.eq_ignore_ascii_case(name)))
    } else {
        args.iter().find(|a| {
            let lower = a.name.to_ascii_lowercase();
            lower == "id" || lower.ends_with("id") || lower.contains("slug")
        })
    }
}

fn field_args(field: &FieldDef) -> Vec<QueryArg> {
    field
        .args
        .iter()
        .map(|a| QueryArg {
            name: a.name.clone(),
            type_name: a.ty.render(),
            required: a.ty.is_non_null() && a.default_value.is_none(),
        })
        .collect()
}

/// Arguments bound on one field, with the variable template each receives
struct Binding {
    args: Vec<(String, String, String)>,
}

impl Binding {
    /// Bind the key argument and any required page argument; `None` when a
    /// required argument cannot be filled.
    fn new(args: &[QueryArg], key: Option<&QueryArg>, key_template: &str) -> Option<Self> {
        let mut bound = Vec::new();
        for arg in args {
            let is_key = key.map(|k| k.name == arg.name).unwrap_or(false);
            if is_key {
                bound.push((arg.name.clone(), arg.type_name.clone(), key_template.to_string()));
            } else if arg.required {
                if PAGE_ARGS.contains(&arg.name.to_ascii_lowercase().as_str()) {
                    bound.push((arg.name.clone(), arg.type_name.clone(), "{page}".to_string()));
                } else {
                    return None;
                }
            }
        }
        Some(Self { args: bound })
    }

    fn call(&self, field: &str) -> String {
        if self.args.is_empty() {
            return field.to_string();
        }
        let args: Vec<String> = self.args.iter().map(|(name, _, _)| format!("{}: ${}", name, name)).collect();
        format!("{}({})", field, args.join(", "))
    }
}

fn build_candidate(
    info: &GraphQLSchemaInfo,
    query: &QueryField,
    entry: &EntryPoint<'_>,
    target: TargetEntity,
) -> Option<CandidateQuery> {
    let roles = resolve_roles(info, entry.entity, target.is_series());
    let has = |role: FieldRole| roles.contains_key(&role);

    let entity_like = if target.is_series() {
        (has(FieldRole::Title) || has(FieldRole::Id)) && roles.len() >= 2
    } else {
        (has(FieldRole::Id) || has(FieldRole::Url) || has(FieldRole::StreamUrl))
            && (has(FieldRole::Number) || has(FieldRole::Title))
    };
    if !entity_like {
        return None;
    }

    // The key argument may sit on the root field or on the connection's list field.
    let inner_args = entry.inner.map(field_args).unwrap_or_default();
    let key_template = if target.is_series() { "{query}" } else { "{id}" };
    let (outer_key, inner_key) = match key_argument(&query.args, !target.is_series()) {
        Some(arg) => (Some(arg), None),
        None => (None, key_argument(&inner_args, !target.is_series())),
    };
    if outer_key.is_none() && inner_key.is_none() {
        return None;
    }
    let outer = Binding::new(&query.args, outer_key, key_template)?;
    let inner = Binding::new(&inner_args, inner_key, key_template)?;

    let selections: Vec<&str> = roles.values().map(|(rf, _)| rf.selection.as_str()).collect();
    let mut body = selections.join(" ");
    if entry.via_node {
        body = format!("node {{ {} }}", body);
    }
    let mut result_path = jsonpath::join("data", &query.name);
    let mut name = query.name.clone();
    let mut selection = match entry.inner {
        Some(list) => {
            result_path = jsonpath::join(&result_path, &list.name);
            name = format!("{}.{}", query.name, list.name);
            format!("{} {{ {} }}", inner.call(&list.name), body)
        }
        None => body,
    };
    selection = format!("{} {{ {} }}", outer.call(&query.name), selection);

    let declarations: Vec<String> = outer
        .args
        .iter()
        .chain(inner.args.iter())
        .map(|(arg, ty, _)| format!("${}: {}", arg, ty))
        .collect();
    let document = if declarations.is_empty() {
        format!("query {{ {} }}", selection)
    } else {
        format!("query ({}) {{ {} }}", declarations.join(", "), selection)
    };
    let variables: BTreeMap<String, String> = outer
        .args
        .iter()
        .chain(inner.args.iter())
        .map(|(arg, _, template)| (arg.clone(), template.clone()))
        .collect();

    let confidence = score(query, entry, target, &roles);
    let prefix = if entry.via_node { "node" } else { "" };
    let (fields, child_fields) = role_mappings(entry.entity, &roles, prefix);

    Some(CandidateQuery {
        name,
        purpose: target,
        confidence,
        entity_type: entry.entity.name.clone(),
        document,
        variables,
        result_path,
        fields,
        child_fields,
    })
}

/// Role mappings of an entity, paths under `prefix`, plus the mappings of
/// its child list relative to each child
fn role_mappings(
    entity: &TypeInfo,
    roles: &Roles,
    prefix: &str,
) -> (BTreeMap<FieldRole, FieldMapping>, BTreeMap<FieldRole, FieldMapping>) {
    let mapping = |rf: &RoleField, type_name: &str, base: &str| FieldMapping {
        path: jsonpath::join(base, &rf.path),
        confidence: 1.0,
        source: Some(format!("{}.{}", type_name, rf.field)),
    };

    let child_list = roles.iter().find(|(role, _)| role.is_list());
    let child_type = child_list
        .and_then(|(_, (rf, _))| entity.field(&rf.field))
        .and_then(|f| f.ty.base_name())
        .unwrap_or_default();

    let fields = roles
        .iter()
        .map(|(role, (rf, _))| (*role, mapping(rf, &entity.name, prefix)))
        .collect();
    let child_fields = child_list
        .map(|(_, (_, children))| {
            children
                .iter()
                .map(|(role, rf)| (*role, mapping(rf, child_type, "")))
                .collect()
        })
        .unwrap_or_default();
    (fields, child_fields)
}

fn score(query: &QueryField, entry: &EntryPoint<'_>, target: TargetEntity, roles: &Roles) -> f64 {
    let type_name = entry.entity.name.to_ascii_lowercase();
    let query_name = format!(
        "{} {}",
        query.name.to_ascii_lowercase(),
        entry.inner.map(|f| f.name.to_ascii_lowercase()).unwrap_or_default()
    );
    let terms = target.terms();

    let name_score = if terms.iter().any(|t| type_name.contains(t)) {
        NAME_MATCH_WEIGHT
    } else if terms.iter().any(|t| query_name.contains(t)) {
        QUERY_NAME_WEIGHT
    } else {
        0.0
    };

    let wanted = target.roles();
    let covered = wanted.iter().filter(|r| roles.contains_key(r)).count() as f64 / wanted.len() as f64;
    let nesting = NESTING_WEIGHT / (1 + entry.nesting()) as f64;

    name_score + COVERAGE_WEIGHT * covered + nesting
}

/// Single-entity query addressed by identifier
#[derive(Debug, Clone, PartialEq)]
pub struct LookupQuery {
    pub name: String,
    pub document: String,
    pub variables: BTreeMap<String, String>,
    /// Path of the entity object inside the response
    pub result_path: String,
    /// Roles relative to the entity object
    pub fields: BTreeMap<FieldRole, FieldMapping>,
    /// Roles of the child list, relative to each child
    pub child_fields: BTreeMap<FieldRole, FieldMapping>,
}

/// Find a query root field returning one `entity_type` by identifier
/// (`show(id: ID!): Show`) and select every resolved role on it.
pub fn lookup_query(info: &GraphQLSchemaInfo, entity_type: &str) -> Option<LookupQuery> {
    let entity = info.object_type(entity_type)?;
    let roles = resolve_roles(info, entity, true);
    if roles.is_empty() {
        return None;
    }
    let body: Vec<&str> = roles.values().map(|(rf, _)| rf.selection.as_str()).collect();
    let (fields, child_fields) = role_mappings(entity, &roles, "");

    info.queries
        .iter()
        .filter(|q| !q.return_type.is_list() && q.return_type.base_name() == Some(entity_type))
        .find_map(|query| {
            let key = key_argument(&query.args, true)?;
            let binding = Binding::new(&query.args, Some(key), "{id}")?;
            let declarations: Vec<String> = binding
                .args
                .iter()
                .map(|(arg, ty, _)| format!("${}: {}", arg, ty))
                .collect();
            Some(LookupQuery {
                name: query.name.clone(),
                document: format!(
                    "query ({}) {{ {} {{ {} }} }}",
                    declarations.join(", "),
                    binding.call(&query.name),
                    body.join(" ")
                ),
                variables: binding
                    .args
                    .iter()
                    .map(|(arg, _, template)| (arg.clone(), template.clone()))
                    .collect(),
                result_path: jsonpath::join("data", &query.name),
                fields: fields.clone(),
                child_fields: child_fields.clone(),
            })
        })
}

#[cfg(test)]
mod tests {
    use super::super::fixtures;
    use super::super::types::IntrospectionResponse;
    use super::*;

    fn info(doc: serde_json::Value) -> GraphQLSchemaInfo {
        let response: IntrospectionResponse = serde_json::from_value(doc).unwrap();
        GraphQLSchemaInfo::from_schema("https://site.test/graphql", response.data.unwrap().schema).unwrap()
    }

    #[test]
    fn test_show_schema_anime_candidate() {
        let info = info(fixtures::show_schema());
        let ranked = generate_queries(&info, TargetEntity::Anime);
        let best = &ranked[0];

        assert_eq!(best.name, "Page");
        assert_eq!(best.entity_type, "Show");
        assert!((best.confidence - 1.0).abs() < 1e-9);
        assert_eq!(best.result_path, "data.Page");
        assert_eq!(best.variables["search"], "{query}");
        // Selections follow role order: title, id, image, then the episode list.
        assert_eq!(
            best.document,
            "query ($search: String) { Page(search: $search) { name id coverImage episodes { title id number streamUrl } } }"
        );

        let title = &best.fields[&FieldRole::Title];
        assert_eq!(title.path, "name");
        assert_eq!(title.source.as_deref(), Some("Show.name"));
        assert_eq!(best.fields[&FieldRole::Image].path, "coverImage");
        assert_eq!(best.fields[&FieldRole::EpisodeList].path, "episodes");
        assert_eq!(best.child_fields[&FieldRole::Number].source.as_deref(), Some("Episode.number"));
    }

    #[test]
    fn test_child_candidate_uses_id_argument() {
        let info = info(fixtures::show_schema());
        let ranked = generate_queries(&info, TargetEntity::Episode);

        let episodes = ranked.iter().find(|c| c.name == "episodes").unwrap();
        assert_eq!(episodes.variables["showId"], "{id}");
        assert!(episodes.document.starts_with("query ($showId: ID!) { episodes(showId: $showId) {"));
        assert_eq!(episodes.fields[&FieldRole::Number].path, "number");
        // `Page` has no id-like argument, so it cannot list episodes.
        assert!(ranked.iter().all(|c| c.name != "Page"));
    }

    #[test]
    fn test_lookup_query() {
        let info = info(fixtures::show_schema());
        let lookup = lookup_query(&info, "Show").unwrap();

        assert_eq!(lookup.name, "show");
        assert_eq!(lookup.result_path, "data.show");
        assert_eq!(lookup.variables["id"], "{id}");
        assert_eq!(
            lookup.document,
            "query ($id: ID!) { show(id: $id) { name id coverImage episodes { title id number streamUrl } } }"
        );
        assert_eq!(lookup.fields[&FieldRole::Title].path, "name");
        assert_eq!(lookup.fields[&FieldRole::EpisodeList].path, "episodes");
        assert_eq!(lookup.child_fields[&FieldRole::Number].path, "number");
        assert_eq!(lookup.child_fields[&FieldRole::Number].source.as_deref(), Some("Episode.number"));
        assert!(lookup_query(&info, "Episode").is_none());
    }

    #[test]
    fn test_connection_is_unwrapped() {
        let info = info(fixtures::connection_schema());
        let ranked = generate_queries(&info, TargetEntity::Anime);
        let best = &ranked[0];

        assert_eq!(best.name, "Page.media");
        assert_eq!(best.result_path, "data.Page.media");
        assert_eq!(
            best.document,
            "query ($search: String) { Page { media(search: $search) { title { romaji } id coverImage { large } } } }"
        );
        assert_eq!(best.fields[&FieldRole::Title].path, "title.romaji");
        assert_eq!(best.fields[&FieldRole::Image].path, "coverImage.large");
        // name match + 3 of 4 roles + one level of nesting
        assert!((best.confidence - (0.5 + 0.35 * 0.75 + 0.075)).abs() < 1e-9);
    }

    #[test]
    fn test_edges_node_connection() {
        let doc = fixtures::response(vec![
            fixtures::object_type(
                "Query",
                vec![fixtures::field(
                    "searchManga",
                    fixtures::object("MangaConnection"),
                    vec![fixtures::arg("keyword", fixtures::non_null(fixtures::scalar("String")))],
                )],
            ),
            fixtures::object_type(
                "MangaConnection",
                vec![fixtures::field("edges", fixtures::list(fixtures::object("MangaEdge")), vec![])],
            ),
            fixtures::object_type(
                "MangaEdge",
                vec![fixtures::field("node", fixtures::object("Manga"), vec![])],
            ),
            fixtures::object_type(
                "Manga",
                vec![
                    fixtures::field("slug", fixtures::scalar("String"), vec![]),
                    fixtures::field("title", fixtures::scalar("String"), vec![]),
                ],
            ),
        ]);
        let info = info(doc);
        let best = &generate_queries(&info, TargetEntity::Manga)[0];

        assert_eq!(best.name, "searchManga.edges");
        assert_eq!(best.result_path, "data.searchManga.edges");
        assert_eq!(best.fields[&FieldRole::Title].path, "node.title");
        assert_eq!(best.fields[&FieldRole::Id].path, "node.slug");
        assert_eq!(
            best.document,
            "query ($keyword: String!) { searchManga(keyword: $keyword) { edges { node { title slug } } } }"
        );
    }

    #[test]
    fn test_unfillable_required_argument_drops_candidate() {
        let doc = fixtures::response(vec![
            fixtures::object_type(
                "Query",
                vec![fixtures::field(
                    "search",
                    fixtures::list(fixtures::object("Anime")),
                    vec![
                        fixtures::arg("q", fixtures::scalar("String")),
                        fixtures::arg("apiKey", fixtures::non_null(fixtures::scalar("String"))),
                    ],
                )],
            ),
            fixtures::object_type(
                "Anime",
                vec![
                    fixtures::field("id", fixtures::scalar("ID"), vec![]),
                    fixtures::field("title", fixtures::scalar("String"), vec![]),
                ],
            ),
        ]);
        assert!(generate_queries(&info(doc), TargetEntity::Anime).is_empty());
    }

    #[test]
    fn test_ranking_is_sorted_and_unique() {
        for doc in [fixtures::show_schema(), fixtures::connection_schema()] {
            let info = info(doc);
            for target in TargetEntity::ALL {
                let ranked = generate_queries(&info, target);
                assert!(ranked.windows(2).all(|w| w[0].confidence >= w[1].confidence));
                let names: HashSet<&str> = ranked.iter().map(|c| c.name.as_str()).collect();
                assert_eq!(names.len(), ranked.len());
            }
        }
    }
}
