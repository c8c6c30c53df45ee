//! Run-time access to a site through a generated config.
//!
//! [`DynamicCatalog`] is how a persisted [`DynamicProviderConfig`] is used
//! after analysis: every call goes through the [`TransformEngine`] in strict
//! mode, so a missing required field is an error instead of a null. Optional
//! operations are discovered through [`Capability`] queries.

use crate::cancel::CancelToken;
use crate::error::EngineError;
use crate::transform::{ExecutionMode, ExtractedItem, OperationParams, TransformEngine};
use async_trait::async_trait;
use shared::{ContentType, DynamicProviderConfig, OperationKind};
use std::sync::Arc;

/// An optional operation: either implemented or explicitly not
pub enum Capability<T> {
    Supported(T),
    Unsupported,
}

impl<T> Capability<T> {
    pub fn is_supported(&self) -> bool {
        matches!(self, Capability::Supported(_))
    }
}

/// Resolves a leaf (episode or chapter) into playable or readable URLs
#[async_trait]
pub trait LeafResolver: Send + Sync {
    async fn resolve(&self, target: &str, cancel: &CancelToken) -> Result<Vec<ExtractedItem>, EngineError>;
}

#[async_trait]
pub trait Catalog: Send + Sync {
    fn name(&self) -> &str;

    fn content_type(&self) -> ContentType;

    async fn search(&self, query: &str, page: u32, cancel: &CancelToken) -> Result<Vec<ExtractedItem>, EngineError>;

    async fn detail(&self, id: &str, cancel: &CancelToken) -> Result<Option<ExtractedItem>, EngineError>;

    /// Episodes or chapters of the series `id`
    async fn list_children(&self, id: &str, cancel: &CancelToken) -> Result<Vec<ExtractedItem>, EngineError>;

    fn leaf_resolver(&self) -> Capability<&dyn LeafResolver>;
}

pub struct DynamicCatalog {
    config: DynamicProviderConfig,
    engine: Arc<TransformEngine>,
}

impl DynamicCatalog {
    pub fn new(config: DynamicProviderConfig, engine: Arc<TransformEngine>) -> Self {
        Self { config, engine }
    }

    pub fn config(&self) -> &DynamicProviderConfig {
        &self.config
    }

    async fn run(
        &self,
        operation: OperationKind,
        params: OperationParams,
        cancel: &CancelToken,
    ) -> Result<Vec<ExtractedItem>, EngineError> {
        let output = self
            .engine
            .execute(&self.config, operation, &params, ExecutionMode::Strict, cancel)
            .await?;
        Ok(output.items)
    }
}

#[async_trait]
impl Catalog for DynamicCatalog {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn content_type(&self) -> ContentType {
        self.config.content_type
    }

    async fn search(&self, query: &str, page: u32, cancel: &CancelToken) -> Result<Vec<ExtractedItem>, EngineError> {
        self.run(OperationKind::Search, OperationParams::query(query).with_page(page), cancel)
            .await
    }

    async fn detail(&self, id: &str, cancel: &CancelToken) -> Result<Option<ExtractedItem>, EngineError> {
        let items = self.run(OperationKind::Detail, OperationParams::id(id), cancel).await?;
        Ok(items.into_iter().next())
    }

    async fn list_children(&self, id: &str, cancel: &CancelToken) -> Result<Vec<ExtractedItem>, EngineError> {
        self.run(OperationKind::Children, OperationParams::id(id), cancel).await
    }

    fn leaf_resolver(&self) -> Capability<&dyn LeafResolver> {
        if self.config.leaf.is_some() {
            Capability::Supported(self)
        } else {
            Capability::Unsupported
        }
    }
}

#[async_trait]
impl LeafResolver for DynamicCatalog {
    /// `target` fills both `{id}` and `{url}`; leaf templates use one of them
    async fn resolve(&self, target: &str, cancel: &CancelToken) -> Result<Vec<ExtractedItem>, EngineError> {
        let params = OperationParams {
            id: Some(target.to_string()),
            url: Some(target.to_string()),
            ..OperationParams::default()
        };
        self.run(OperationKind::Leaf, params, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::stub::StubFetcher;
    use chrono::Utc;
    use serde_json::json;
    use shared::{ApiKind, FieldRule, ItemSelector, OperationSpec, RequestTemplate, TransformStep};
    use std::collections::BTreeMap;

    fn get(url: &str, items: ItemSelector, fields: Vec<FieldRule>) -> OperationSpec {
        OperationSpec {
            request: RequestTemplate::Get { url: url.to_string() },
            items,
            fields,
        }
    }

    fn config(leaf: Option<OperationSpec>) -> DynamicProviderConfig {
        DynamicProviderConfig {
            name: "site".to_string(),
            content_type: ContentType::Manga,
            api: ApiKind::Rest,
            base_url: "https://site.test".to_string(),
            template_id: "rest-manga".to_string(),
            headers: BTreeMap::new(),
            search: get(
                "/api/search?q={query}&page={page}",
                ItemSelector::List("data".to_string()),
                vec![FieldRule::required("title", "title"), FieldRule::required("id", "id")],
            ),
            detail: get(
                "/api/manga/{id}",
                ItemSelector::Single(String::new()),
                vec![FieldRule::required("title", "title"), FieldRule::optional("description", "synopsis")],
            ),
            children: get(
                "/api/manga/{id}/chapters",
                ItemSelector::Auto,
                vec![FieldRule::required("id", "id"), FieldRule::optional("number", "number")],
            ),
            leaf,
            confidence: 0.9,
            generated_at: Utc::now(),
        }
    }

    fn catalog(stub: StubFetcher, leaf: Option<OperationSpec>) -> DynamicCatalog {
        DynamicCatalog::new(config(leaf), Arc::new(TransformEngine::new(Arc::new(stub))))
    }

    #[tokio::test]
    async fn test_search_and_children() {
        let stub = StubFetcher::new()
            .get_json(
                "https://site.test/api/search?q=one+piece&page=2",
                json!({"data": [{"title": "One Piece", "id": "op"}]}),
            )
            .get_json(
                "https://site.test/api/manga/op/chapters",
                json!({"chapters": [{"id": "c1", "number": 1}, {"id": "c2", "number": 2}]}),
            );
        let catalog = catalog(stub, None);
        let cancel = CancelToken::new();

        let results = catalog.search("one piece", 2, &cancel).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get("title"), Some("One Piece"));

        let chapters = catalog.list_children("op", &cancel).await.unwrap();
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[1].get("number"), Some("2"));
        assert_eq!(catalog.name(), "site");
        assert_eq!(catalog.content_type(), ContentType::Manga);
    }

    #[tokio::test]
    async fn test_detail_optional_field_is_null() {
        let stub = StubFetcher::new().get_json("https://site.test/api/manga/op", json!({"title": "One Piece"}));
        let item = catalog(stub, None)
            .detail("op", &CancelToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.get("title"), Some("One Piece"));
        assert_eq!(item.get("description"), None);
    }

    #[tokio::test]
    async fn test_strict_mode_aborts_on_required_field() {
        let stub = StubFetcher::new().get_json("https://site.test/api/search", json!({"data": [{"name": "X", "id": "1"}]}));
        let err = catalog(stub, None)
            .search("x", 1, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Extraction { ref field, .. } if field == "title"));
    }

    #[tokio::test]
    async fn test_leaf_capability() {
        assert!(!catalog(StubFetcher::new(), None).leaf_resolver().is_supported());

        let leaf = get(
            "{url}",
            ItemSelector::List("pages".to_string()),
            vec![FieldRule::required("url", "src").with_transforms(vec![TransformStep::UrlJoin { base: None }])],
        );
        let stub = StubFetcher::new().get_json(
            "https://site.test/read/c1",
            json!({"pages": [{"src": "/img/1.png"}, {"src": "/img/2.png"}]}),
        );
        let catalog = catalog(stub, Some(leaf));
        let Capability::Supported(resolver) = catalog.leaf_resolver() else {
            panic!("leaf resolution should be supported");
        };
        let pages = resolver
            .resolve("https://site.test/read/c1", &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].get("url"), Some("https://site.test/img/1.png"));
    }
}
