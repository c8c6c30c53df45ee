//! reqwest-backed fetcher with politeness limiting and retry logic.

use super::{HostLimiter, HttpFetcher, HttpMethod, HttpRequest, HttpResponse};
use crate::error::FetchError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use shared::config::HttpConfig;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// HTTP client used against analysed sites
pub struct SiteClient {
    /// HTTP client
    client: Client,
    /// Per-host politeness limiter
    limiter: HostLimiter,
    /// Maximum retries for transient failures
    max_retries: u32,
    /// Base delay for retry (exponential backoff)
    retry_delay_ms: u64,
    /// Bodies longer than this are truncated
    max_body_bytes: usize,
}

impl SiteClient {
    /// Create a new client from the `[http]` settings
    pub fn new(settings: &HttpConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/html;q=0.9, */*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .timeout(settings.request_timeout())
            .user_agent(settings.user_agent.as_str())
            .default_headers(headers)
            .gzip(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            limiter: HostLimiter::new(settings.requests_per_second),
            max_retries: settings.max_retries,
            retry_delay_ms: settings.retry_delay_ms,
            max_body_bytes: settings.max_body_bytes,
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms * 2u64.pow(attempt))
    }

    async fn send_once(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", request.url, e)))?;
        let host = url.host_str().unwrap_or_default().to_string();

        self.limiter.acquire(&host).await;

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| classify(&request.url, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_ascii_lowercase(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify(&request.url, e))?;
        let body = if bytes.len() > self.max_body_bytes {
            debug!(url = %request.url, size = bytes.len(), "Truncating response body");
            String::from_utf8_lossy(&bytes[..self.max_body_bytes]).into_owned()
        } else {
            String::from_utf8_lossy(&bytes).into_owned()
        };

        Ok(HttpResponse {
            url: final_url,
            status,
            headers,
            body,
        })
    }
}

fn classify(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if error.is_builder() {
        FetchError::InvalidRequest(error.to_string())
    } else {
        FetchError::Network {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl HttpFetcher for SiteClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        let mut attempt = 0;

        loop {
            debug!(method = %request.method, url = %request.url, attempt = attempt + 1, "Sending request");

            let (error, response) = match self.send_once(&request).await {
                Ok(response) if response.status == 429 || response.status >= 500 => {
                    let error = FetchError::Status {
                        url: request.url.clone(),
                        status: response.status,
                    };
                    (error, Some(response))
                }
                Ok(response) => return Ok(response),
                Err(e) => (e, None),
            };

            if !error.is_transient() || attempt >= self.max_retries {
                warn!(url = %request.url, error = %error, "Request failed");
                // The caller still gets to see a final 5xx/429 body.
                return match response {
                    Some(response) => Ok(response),
                    None => Err(error),
                };
            }

            let delay = self.backoff(attempt);
            debug!(
                url = %request.url,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "Retrying after delay"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}
