//! Transform engine.
//!
//! Interprets a [`DynamicProviderConfig`] at run time: builds the request of
//! one operation from its template and parameters, sends it, selects the
//! entities of the response and extracts every field rule, applying the
//! rule's transformation steps in declaration order.
//!
//! Runs go through `Idle -> BuildingRequest -> AwaitingResponse ->
//! Extracting -> Done`, or end in `Failed`.

use crate::cancel::CancelToken;
use crate::error::{EngineError, FetchError};
use crate::http::{HttpFetcher, HttpRequest};
use crate::jsonpath;
use crate::matcher;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared::{DynamicProviderConfig, FieldRule, ItemSelector, OperationKind, RequestTemplate, TransformStep};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};
use url::Url;

const AUTO_MAX_DEPTH: usize = 8;
const AUTO_SAMPLE_SIZE: usize = 20;

/// How extraction failures are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// A failed required field aborts the operation
    Strict,
    /// Failures are recorded per field and the value becomes null
    Lenient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionState {
    Idle,
    BuildingRequest,
    AwaitingResponse,
    Extracting,
    Done,
    Failed(String),
}

impl ExecutionState {
    /// Whether `next` may follow this state
    pub fn can_advance(&self, next: &ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (Idle, BuildingRequest)
                | (BuildingRequest, AwaitingResponse)
                | (AwaitingResponse, Extracting)
                | (Extracting, Done)
                | (Idle | BuildingRequest | AwaitingResponse | Extracting, Failed(_))
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionState::Done | ExecutionState::Failed(_))
    }
}

/// State of one operation run
struct Execution {
    operation: OperationKind,
    state: ExecutionState,
}

impl Execution {
    fn new(operation: OperationKind) -> Self {
        Self {
            operation,
            state: ExecutionState::Idle,
        }
    }

    fn advance(&mut self, next: ExecutionState) {
        debug_assert!(self.state.can_advance(&next), "{:?} -> {:?}", self.state, next);
        trace!(operation = %self.operation, from = ?self.state, to = ?next, "Execution state");
        self.state = next;
    }

    fn fail(&mut self, error: EngineError) -> EngineError {
        warn!(operation = %self.operation, error = %error, "Operation failed");
        self.advance(ExecutionState::Failed(error.to_string()));
        error
    }
}

/// Values for the `{query}`, `{id}`, `{url}` and `{page}` placeholders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationParams {
    pub query: Option<String>,
    pub id: Option<String>,
    pub url: Option<String>,
    pub page: Option<u32>,
}

impl OperationParams {
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    fn value(&self, name: &str) -> Option<String> {
        match name {
            "query" => self.query.clone(),
            "id" => self.id.clone(),
            "url" => self.url.clone(),
            "page" => Some(self.page.unwrap_or(1).to_string()),
            _ => None,
        }
    }
}

/// A field that could not be extracted from one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFailure {
    pub field: String,
    pub required: bool,
    pub reason: String,
}

/// One entity extracted from a response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedItem {
    pub fields: BTreeMap<String, Option<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FieldFailure>,
}

impl ExtractedItem {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_deref())
    }
}

/// Result of one operation
#[derive(Debug, Clone)]
pub struct OperationOutput {
    pub operation: OperationKind,
    /// URL the request was sent to
    pub url: String,
    pub items: Vec<ExtractedItem>,
    pub state: ExecutionState,
}

pub struct TransformEngine {
    fetcher: Arc<dyn HttpFetcher>,
}

impl TransformEngine {
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self { fetcher }
    }

    /// Run `operation` of `config` with `params`
    pub async fn execute(
        &self,
        config: &DynamicProviderConfig,
        operation: OperationKind,
        params: &OperationParams,
        mode: ExecutionMode,
        cancel: &CancelToken,
    ) -> Result<OperationOutput, EngineError> {
        let mut execution = Execution::new(operation);
        let Some(spec) = config.operation(operation) else {
            return Err(execution.fail(EngineError::UnsupportedOperation(operation)));
        };

        execution.advance(ExecutionState::BuildingRequest);
        let request = match build_request(config, &spec.request, params) {
            Ok(request) => request,
            Err(e) => return Err(execution.fail(e)),
        };
        let url = request.url.clone();
        debug!(provider = %config.name, operation = %operation, url = %url, "Executing operation");

        execution.advance(ExecutionState::AwaitingResponse);
        let body = match self.fetch(request, cancel).await {
            Ok(body) => body,
            Err(e) => return Err(execution.fail(e)),
        };

        execution.advance(ExecutionState::Extracting);
        let items = match select_items(&body, &spec.items) {
            Ok(items) => items,
            Err(e) => return Err(execution.fail(e)),
        };
        let mut extracted = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            match extract_item(config, &spec.fields, item, index, mode) {
                Ok(item) => extracted.push(item),
                Err(e) => return Err(execution.fail(e)),
            }
        }

        execution.advance(ExecutionState::Done);
        debug!(provider = %config.name, operation = %operation, items = extracted.len(), "Operation done");
        Ok(OperationOutput {
            operation,
            url,
            items: extracted,
            state: execution.state,
        })
    }

    async fn fetch(&self, request: HttpRequest, cancel: &CancelToken) -> Result<Value, EngineError> {
        let is_graphql = request.body.is_some();
        let response = cancel.run(self.fetcher.send(request)).await??;
        if !response.is_success() {
            return Err(FetchError::Status {
                url: response.url,
                status: response.status,
            }
            .into());
        }
        let body = response
            .json()
            .ok_or_else(|| EngineError::InvalidJson(snippet(&response.body)))?;

        if is_graphql && body.get("data").map(Value::is_null).unwrap_or(true) {
            let messages: Vec<String> = body
                .get("errors")
                .and_then(Value::as_array)
                .map(|errors| {
                    errors
                        .iter()
                        .filter_map(|e| e.get("message").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            return Err(EngineError::Graphql(if messages.is_empty() {
                "response has no data".to_string()
            } else {
                messages.join("; ")
            }));
        }
        Ok(body)
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(80).collect()
}

/// Substitute placeholders. Values are percent-encoded when `encode` is set,
/// except a leading `{url}` which stands for a whole URL.
fn fill_placeholders(template: &str, params: &OperationParams, encode: bool) -> Result<String, EngineError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find('}') else {
            out.push_str(tail);
            return Ok(out);
        };
        let name = &tail[1..end];
        if !matches!(name, "query" | "id" | "url" | "page") {
            out.push('{');
            rest = &tail[1..];
            continue;
        }
        let value = params
            .value(name)
            .ok_or_else(|| EngineError::BuildRequest(format!("missing parameter '{}'", name)))?;
        let raw = !encode || (name == "url" && out.is_empty());
        if raw {
            out.push_str(&value);
        } else {
            out.extend(url::form_urlencoded::byte_serialize(value.as_bytes()));
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Absolute URL of `target` against the provider base
fn absolute_url(base: &str, target: &str) -> Result<String, EngineError> {
    if target.starts_with("http://") || target.starts_with("https://") {
        return Ok(target.to_string());
    }
    let base = Url::parse(base).map_err(|e| EngineError::BuildRequest(format!("invalid base url {}: {}", base, e)))?;
    base.join(target)
        .map(|u| u.to_string())
        .map_err(|e| EngineError::BuildRequest(format!("invalid url {}: {}", target, e)))
}

fn build_request(
    config: &DynamicProviderConfig,
    template: &RequestTemplate,
    params: &OperationParams,
) -> Result<HttpRequest, EngineError> {
    let request = match template {
        RequestTemplate::Get { url } => {
            let filled = fill_placeholders(url, params, true)?;
            HttpRequest::get(absolute_url(&config.base_url, &filled)?)
        }
        RequestTemplate::Graphql {
            endpoint,
            query,
            variables,
        } => {
            let mut values = Map::new();
            for (name, template) in variables {
                let filled = fill_placeholders(template, params, false)?;
                // Identifiers and pages go out as numbers when they look like one.
                let value = match filled.parse::<i64>() {
                    Ok(n) if !template.contains("{query}") => Value::from(n),
                    _ => Value::String(filled),
                };
                values.insert(name.clone(), value);
            }
            HttpRequest::post_json(
                absolute_url(&config.base_url, endpoint)?,
                serde_json::json!({ "query": query, "variables": values }),
            )
        }
    };

    Ok(config
        .headers
        .iter()
        .fold(request, |req, (name, value)| req.header(name.clone(), value.clone())))
}

/// Entities of a response according to the selector
fn select_items<'a>(body: &'a Value, selector: &ItemSelector) -> Result<Vec<&'a Value>, EngineError> {
    match selector {
        ItemSelector::Single(path) => match jsonpath::resolve(body, path) {
            Some(value) if !value.is_null() => Ok(vec![value]),
            _ => Err(EngineError::ItemsNotFound { path: path.clone() }),
        },
        ItemSelector::List(path) => match jsonpath::resolve(body, path) {
            Some(Value::Array(items)) => Ok(items.iter().collect()),
            _ => Err(EngineError::ItemsNotFound { path: path.clone() }),
        },
        ItemSelector::Auto => {
            let candidates = matcher::find_entity_lists(body, AUTO_MAX_DEPTH, AUTO_SAMPLE_SIZE);
            let path = matcher::best_entity_list(&candidates)
                .map(|c| c.path.clone())
                .ok_or_else(|| EngineError::ItemsNotFound {
                    path: "<auto>".to_string(),
                })?;
            match jsonpath::resolve(body, &path) {
                Some(Value::Array(items)) => Ok(items.iter().collect()),
                _ => Err(EngineError::ItemsNotFound { path }),
            }
        }
    }
}

fn extract_item(
    config: &DynamicProviderConfig,
    rules: &[FieldRule],
    item: &Value,
    index: usize,
    mode: ExecutionMode,
) -> Result<ExtractedItem, EngineError> {
    let mut extracted = ExtractedItem::default();

    for rule in rules {
        match extract_field(config, rule, item) {
            Ok(value) => {
                extracted.fields.insert(rule.name.clone(), Some(value));
            }
            Err(reason) => {
                if rule.required && mode == ExecutionMode::Strict {
                    return Err(EngineError::Extraction {
                        field: rule.name.clone(),
                        index,
                        reason,
                    });
                }
                extracted.fields.insert(rule.name.clone(), None);
                extracted.failures.push(FieldFailure {
                    field: rule.name.clone(),
                    required: rule.required,
                    reason,
                });
            }
        }
    }
    Ok(extracted)
}

fn extract_field(config: &DynamicProviderConfig, rule: &FieldRule, item: &Value) -> Result<String, String> {
    let value = jsonpath::resolve(item, &rule.path).ok_or_else(|| format!("path '{}' not found", rule.path))?;
    let mut text = jsonpath::scalar_text(value).ok_or_else(|| format!("'{}' is not a non-empty scalar", rule.path))?;
    for step in &rule.transforms {
        text = apply_step(step, &text, &config.base_url)?;
    }
    if text.trim().is_empty() {
        return Err("empty after transforms".to_string());
    }
    Ok(text)
}

/// Apply one transformation step
pub fn apply_step(step: &TransformStep, input: &str, provider_base: &str) -> Result<String, String> {
    match step {
        TransformStep::PercentDecode => {
            let bytes = urlencoding::decode_binary(input.as_bytes());
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        TransformStep::HtmlUnescape => Ok(html_escape::decode_html_entities(input).into_owned()),
        TransformStep::Trim => Ok(input.trim().to_string()),
        TransformStep::Replace { from, to } => Ok(input.replace(from.as_str(), to)),
        TransformStep::RegexReplace { pattern, replacement } => {
            let re = cached_regex(pattern).map_err(|e| format!("invalid pattern {}: {}", pattern, e))?;
            Ok(re.replace_all(input, replacement.as_str()).into_owned())
        }
        TransformStep::UrlJoin { base } => {
            let base = base.as_deref().unwrap_or(provider_base);
            let base = Url::parse(base).map_err(|e| format!("invalid base {}: {}", base, e))?;
            base.join(input.trim())
                .map(|u| u.to_string())
                .map_err(|e| format!("cannot join {}: {}", input, e))
        }
    }
}

/// Compiled `regex_replace` patterns, shared by every run
static REGEX_CACHE: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));
const REGEX_CACHE_LIMIT: usize = 256;

fn cached_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut cache = REGEX_CACHE.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(re) = cache.get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern)?;
    if cache.len() >= REGEX_CACHE_LIMIT {
        cache.clear();
    }
    cache.insert(pattern.to_string(), re.clone());
    Ok(re)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::stub::StubFetcher;
    use crate::http::HttpMethod;
    use chrono::Utc;
    use serde_json::json;
    use shared::{ApiKind, ContentType, OperationSpec};
    use std::time::Duration;

    fn config() -> DynamicProviderConfig {
        DynamicProviderConfig {
            name: "site".to_string(),
            content_type: ContentType::Anime,
            api: ApiKind::Rest,
            base_url: "https://site.test".to_string(),
            template_id: "rest-anime".to_string(),
            headers: BTreeMap::from([("Referer".to_string(), "https://site.test/".to_string())]),
            search: OperationSpec {
                request: RequestTemplate::Get {
                    url: "/api/search?q={query}&page={page}".to_string(),
                },
                items: ItemSelector::List("results".to_string()),
                fields: vec![
                    FieldRule::required("title", "title")
                        .with_transforms(vec![TransformStep::HtmlUnescape, TransformStep::Trim]),
                    FieldRule::required("id", "id"),
                    FieldRule::optional("image", "thumb").with_transforms(vec![TransformStep::UrlJoin { base: None }]),
                ],
            },
            detail: OperationSpec {
                request: RequestTemplate::Get {
                    url: "/api/anime/{id}".to_string(),
                },
                items: ItemSelector::Single(String::new()),
                fields: vec![FieldRule::required("title", "title")],
            },
            children: OperationSpec {
                request: RequestTemplate::Get {
                    url: "/api/anime/{id}/episodes".to_string(),
                },
                items: ItemSelector::Auto,
                fields: vec![FieldRule::required("id", "id"), FieldRule::optional("number", "number")],
            },
            leaf: None,
            confidence: 1.0,
            generated_at: Utc::now(),
        }
    }

    fn engine_with(stub: StubFetcher) -> (TransformEngine, Arc<StubFetcher>) {
        let stub = Arc::new(stub);
        (TransformEngine::new(stub.clone()), stub)
    }

    #[tokio::test]
    async fn test_search_extracts_and_transforms() {
        let (engine, stub) = engine_with(StubFetcher::new().get_json(
            "https://site.test/api/search",
            json!({"results": [
                {"title": " Cowboy &amp; Bebop ", "id": 1, "thumb": "/img/1.jpg"},
                {"title": "Trigun", "id": "2"}
            ]}),
        ));
        let output = engine
            .execute(
                &config(),
                OperationKind::Search,
                &OperationParams::query("space cowboy"),
                ExecutionMode::Strict,
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(output.state, ExecutionState::Done);
        assert_eq!(output.url, "https://site.test/api/search?q=space+cowboy&page=1");
        assert_eq!(output.items.len(), 2);
        assert_eq!(output.items[0].get("title"), Some("Cowboy & Bebop"));
        assert_eq!(output.items[0].get("id"), Some("1"));
        assert_eq!(output.items[0].get("image"), Some("https://site.test/img/1.jpg"));
        assert_eq!(output.items[1].get("image"), None);

        let sent = stub.requests();
        assert!(sent[0].headers.iter().any(|(k, _)| k == "Referer"));
    }

    #[tokio::test]
    async fn test_strict_mode_aborts_on_required_field() {
        let body = json!({"results": [{"title": "A", "id": "1"}, {"id": "2"}]});
        let (engine, _) = engine_with(StubFetcher::new().get_json("https://site.test/api/search", body.clone()));
        let err = engine
            .execute(
                &config(),
                OperationKind::Search,
                &OperationParams::query("a"),
                ExecutionMode::Strict,
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Extraction { ref field, index: 1, .. } if field == "title"));

        let (engine, _) = engine_with(StubFetcher::new().get_json("https://site.test/api/search", body));
        let output = engine
            .execute(
                &config(),
                OperationKind::Search,
                &OperationParams::query("a"),
                ExecutionMode::Lenient,
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(output.items[1].get("title"), None);
        assert!(output.items[1].failures.iter().any(|f| f.field == "title" && f.required));
    }

    #[tokio::test]
    async fn test_auto_selector_finds_children() {
        let (engine, _) = engine_with(StubFetcher::new().get_json(
            "https://site.test/api/anime/cowboy-bebop/episodes",
            json!({"data": {"episodes": [{"id": "e1", "number": 1}, {"id": "e2", "number": 2}]}}),
        ));
        let output = engine
            .execute(
                &config(),
                OperationKind::Children,
                &OperationParams::id("cowboy-bebop"),
                ExecutionMode::Strict,
                &CancelToken::new(),
            )
            .await
            .unwrap();
        let ids: Vec<_> = output.items.iter().filter_map(|i| i.get("id")).collect();
        assert_eq!(ids, vec!["e1", "e2"]);
        assert_eq!(output.items[1].get("number"), Some("2"));
    }

    #[tokio::test]
    async fn test_graphql_request_variables() {
        let mut config = config();
        config.api = ApiKind::Graphql;
        config.detail = OperationSpec {
            request: RequestTemplate::Graphql {
                endpoint: "/graphql".to_string(),
                query: "query ($id: Int) { Media(id: $id) { title } }".to_string(),
                variables: BTreeMap::from([("id".to_string(), "{id}".to_string())]),
            },
            items: ItemSelector::Single("data.Media".to_string()),
            fields: vec![FieldRule::required("title", "title")],
        };
        let (engine, stub) = engine_with(
            StubFetcher::new().post_json("https://site.test/graphql", json!({"data": {"Media": {"title": "Akira"}}})),
        );
        let output = engine
            .execute(
                &config,
                OperationKind::Detail,
                &OperationParams::id("42"),
                ExecutionMode::Strict,
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(output.items[0].get("title"), Some("Akira"));
        let sent = &stub.requests()[0];
        assert_eq!(sent.method, HttpMethod::Post);
        assert_eq!(sent.body.as_ref().unwrap()["variables"]["id"], json!(42));
    }

    #[tokio::test]
    async fn test_graphql_errors_are_reported() {
        let mut config = config();
        config.search.request = RequestTemplate::Graphql {
            endpoint: "/graphql".to_string(),
            query: "query ($q: String) { search(q: $q) { title } }".to_string(),
            variables: BTreeMap::from([("q".to_string(), "{query}".to_string())]),
        };
        let (engine, stub) = engine_with(StubFetcher::new().post_json(
            "https://site.test/graphql",
            json!({"data": null, "errors": [{"message": "rate limited"}]}),
        ));
        let err = engine
            .execute(
                &config,
                OperationKind::Search,
                &OperationParams::query("123"),
                ExecutionMode::Lenient,
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Graphql(ref m) if m == "rate limited"));
        // A numeric search term stays a string.
        assert_eq!(stub.requests()[0].body.as_ref().unwrap()["variables"]["q"], json!("123"));
    }

    #[tokio::test]
    async fn test_failures_before_extraction() {
        let (engine, _) = engine_with(StubFetcher::new());
        let err = engine
            .execute(
                &config(),
                OperationKind::Leaf,
                &OperationParams::default(),
                ExecutionMode::Strict,
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedOperation(OperationKind::Leaf)));

        let err = engine
            .execute(
                &config(),
                OperationKind::Detail,
                &OperationParams::default(),
                ExecutionMode::Strict,
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BuildRequest(_)));

        let err = engine
            .execute(
                &config(),
                OperationKind::Detail,
                &OperationParams::id("x"),
                ExecutionMode::Strict,
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Fetch(FetchError::Status { status: 404, .. })));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let (engine, _) = engine_with(StubFetcher::new().hang(HttpMethod::Get, "https://site.test/api/search"));
        let err = engine
            .execute(
                &config(),
                OperationKind::Search,
                &OperationParams::query("a"),
                ExecutionMode::Strict,
                &CancelToken::with_timeout(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled(_)));
    }

    #[test]
    fn test_fill_placeholders() {
        let params = OperationParams::query("a b/c").with_page(3);
        assert_eq!(
            fill_placeholders("/s?q={query}&p={page}&x={other}", &params, true).unwrap(),
            "/s?q=a+b%2Fc&p=3&x={other}"
        );
        assert_eq!(
            fill_placeholders("{url}", &OperationParams::url("https://site.test/a?b=1"), true).unwrap(),
            "https://site.test/a?b=1"
        );
        assert!(fill_placeholders("/a/{id}", &OperationParams::default(), true).is_err());
    }

    #[test]
    fn test_transform_steps() {
        let base = "https://site.test";
        assert_eq!(apply_step(&TransformStep::PercentDecode, "a%20b%2", base).unwrap(), "a b%2");
        assert_eq!(apply_step(&TransformStep::PercentDecode, "%E3%83%AF%21", base).unwrap(), "ワ!");
        assert_eq!(
            apply_step(&TransformStep::HtmlUnescape, "&lt;b&gt; &#39;x&#x27; &unknown; & done", base).unwrap(),
            "<b> 'x' &unknown; & done"
        );
        assert_eq!(
            apply_step(
                &TransformStep::Replace {
                    from: "\\/".to_string(),
                    to: "/".to_string()
                },
                "a\\/b",
                base
            )
            .unwrap(),
            "a/b"
        );
        assert_eq!(
            apply_step(
                &TransformStep::RegexReplace {
                    pattern: r"^//".to_string(),
                    replacement: "https://".to_string()
                },
                "//cdn.test/x.jpg",
                base
            )
            .unwrap(),
            "https://cdn.test/x.jpg"
        );
        assert_eq!(
            apply_step(
                &TransformStep::UrlJoin {
                    base: Some("https://cdn.test/img/".to_string())
                },
                "a.jpg",
                base
            )
            .unwrap(),
            "https://cdn.test/img/a.jpg"
        );
        assert!(apply_step(
            &TransformStep::RegexReplace {
                pattern: "(".to_string(),
                replacement: String::new()
            },
            "x",
            base
        )
        .is_err());
    }

    #[test]
    fn test_state_transitions() {
        assert!(ExecutionState::Idle.can_advance(&ExecutionState::BuildingRequest));
        assert!(ExecutionState::Extracting.can_advance(&ExecutionState::Failed("x".into())));
        assert!(!ExecutionState::Idle.can_advance(&ExecutionState::Done));
        assert!(!ExecutionState::Done.can_advance(&ExecutionState::Failed("x".into())));
        assert!(ExecutionState::Failed(String::new()).is_terminal());
    }

    #[test]
    fn test_regex_replace_compiles_once() {
        let step = TransformStep::RegexReplace {
            pattern: r"-(\d+)-cached$".to_string(),
            replacement: " #$1".to_string(),
        };
        for n in 1..=3 {
            let out = apply_step(&step, &format!("ep-{}-cached", n), "https://site.test").unwrap();
            assert_eq!(out, format!("ep #{}", n));
        }
        let first = cached_regex(r"-(\d+)-cached$").unwrap();
        let second = cached_regex(r"-(\d+)-cached$").unwrap();
        assert_eq!(first.as_str(), second.as_str());
        assert!(REGEX_CACHE
            .lock()
            .unwrap()
            .contains_key(r"-(\d+)-cached$"));

        assert!(cached_regex("[unclosed").is_err());
        assert!(!REGEX_CACHE.lock().unwrap().contains_key("[unclosed"));
    }
}
