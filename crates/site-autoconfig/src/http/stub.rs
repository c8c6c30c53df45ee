//! Canned-response fetcher for tests.

use super::{HttpFetcher, HttpMethod, HttpRequest, HttpResponse};
use crate::error::FetchError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;

enum Reply {
    Response {
        status: u16,
        content_type: String,
        body: String,
        extra_headers: Vec<(String, String)>,
    },
    Fail(FetchError),
    Hang,
}

struct Route {
    method: HttpMethod,
    /// Matches when the request URL starts with this prefix
    prefix: String,
    /// Optional substring the JSON body must contain
    body_contains: Option<String>,
    reply: Reply,
}

/// In-memory [`HttpFetcher`]. A route matches its URL exactly, or as a prefix
/// when the route does not end in `/`; the longest match wins and unmatched
/// requests get a 404.
#[derive(Default)]
pub struct StubFetcher {
    routes: Vec<Route>,
    log: Mutex<Vec<HttpRequest>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_json(self, prefix: &str, body: Value) -> Self {
        self.route(HttpMethod::Get, prefix, None, json_reply(200, &body))
    }

    pub fn get_html(self, prefix: &str, html: &str) -> Self {
        self.route(
            HttpMethod::Get,
            prefix,
            None,
            Reply::Response {
                status: 200,
                content_type: "text/html; charset=utf-8".to_string(),
                body: html.to_string(),
                extra_headers: Vec::new(),
            },
        )
    }

    pub fn get_with_headers(self, prefix: &str, status: u16, html: &str, headers: &[(&str, &str)]) -> Self {
        self.route(
            HttpMethod::Get,
            prefix,
            None,
            Reply::Response {
                status,
                content_type: "text/html".to_string(),
                body: html.to_string(),
                extra_headers: headers
                    .iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                    .collect(),
            },
        )
    }

    pub fn post_json(self, prefix: &str, body: Value) -> Self {
        self.route(HttpMethod::Post, prefix, None, json_reply(200, &body))
    }

    /// POST route that only answers when the request body contains `needle`
    pub fn post_json_when(self, prefix: &str, needle: &str, body: Value) -> Self {
        self.route(HttpMethod::Post, prefix, Some(needle.to_string()), json_reply(200, &body))
    }

    pub fn fail(self, method: HttpMethod, prefix: &str, error: FetchError) -> Self {
        self.route(method, prefix, None, Reply::Fail(error))
    }

    pub fn hang(self, method: HttpMethod, prefix: &str) -> Self {
        self.route(method, prefix, None, Reply::Hang)
    }

    fn route(mut self, method: HttpMethod, prefix: &str, body_contains: Option<String>, reply: Reply) -> Self {
        self.routes.push(Route {
            method,
            prefix: prefix.to_string(),
            body_contains,
            reply,
        });
        self
    }

    /// Requests seen so far
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().unwrap().clone()
    }
}

fn matches_url(prefix: &str, url: &str) -> bool {
    url == prefix || (!prefix.ends_with('/') && url.starts_with(prefix))
}

fn json_reply(status: u16, body: &Value) -> Reply {
    Reply::Response {
        status,
        content_type: "application/json".to_string(),
        body: body.to_string(),
        extra_headers: Vec::new(),
    }
}

#[async_trait]
impl HttpFetcher for StubFetcher {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        self.log.lock().unwrap().push(request.clone());

        let body_text = request.body.as_ref().map(|b| b.to_string()).unwrap_or_default();
        let route = self
            .routes
            .iter()
            .filter(|r| r.method == request.method && matches_url(&r.prefix, &request.url))
            .filter(|r| {
                r.body_contains
                    .as_ref()
                    .map(|needle| body_text.contains(needle.as_str()))
                    .unwrap_or(true)
            })
            .max_by_key(|r| (r.prefix.len(), r.body_contains.is_some()));

        match route.map(|r| &r.reply) {
            Some(Reply::Response {
                status,
                content_type,
                body,
                extra_headers,
            }) => {
                let mut headers = vec![("content-type".to_string(), content_type.clone())];
                headers.extend(extra_headers.iter().cloned());
                Ok(HttpResponse {
                    url: request.url.clone(),
                    status: *status,
                    headers,
                    body: body.clone(),
                })
            }
            Some(Reply::Fail(error)) => Err(error.clone()),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(FetchError::Timeout { url: request.url })
            }
            None => Ok(HttpResponse {
                url: request.url.clone(),
                status: 404,
                headers: vec![("content-type".to_string(), "text/html".to_string())],
                body: "<html>Not Found</html>".to_string(),
            }),
        }
    }
}
