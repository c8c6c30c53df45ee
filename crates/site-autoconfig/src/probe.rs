//! Site probing.
//!
//! Fetches the root page and a few well-known sub-paths, then tags the
//! technology surface from headers and body markers.

use crate::cancel::CancelToken;
use crate::error::ProbeError;
use crate::http::{HttpFetcher, HttpMethod, HttpRequest, HttpResponse};
use crate::models::{ObservedEndpoint, SiteProfile};
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Sub-paths fetched next to the root page
const WELL_KNOWN_PATHS: &[&str] = &["/api", "/graphql", "/wp-json"];

/// Bodies kept in the profile are cut to this many bytes
const SAMPLE_LIMIT: usize = 64 * 1024;

/// Upper bound on API hints taken from one page
const MAX_HINTS: usize = 10;

/// Body markers and the technology tag they imply
static BODY_MARKERS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("nextjs", r"__NEXT_DATA__|/_next/static"),
        ("nuxt", r"__NUXT__|/_nuxt/"),
        ("react", r"data-reactroot|react-dom|__REACT_DEVTOOLS"),
        ("vue", r#"data-v-[0-9a-f]{6,}|vue(\.min)?\.js"#),
        ("angular", r"ng-version=|ng-app"),
        ("svelte", r"__sveltekit|svelte-[a-z0-9]{5,}"),
        ("gatsby", r"___gatsby"),
        ("wordpress", r"wp-content|wp-includes|wp-json"),
        ("madara", r"(?i)madara|wp-manga"),
        ("graphql", r"(?i)graphql|graphiql"),
        ("apollo", r"(?i)__APOLLO_STATE__|apollo-client|apollographql"),
        ("php", r"\.php\b"),
        ("laravel", r"(?i)laravel|csrf-token"),
    ]
    .into_iter()
    .filter_map(|(tag, pattern)| Regex::new(pattern).ok().map(|re| (tag, re)))
    .collect()
});

static CHALLENGE_MARKERS: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)just a moment\.\.\.|cf-browser-verification|challenge-platform|attention required").ok()
});

/// Quoted API references in page bodies
static API_HINT: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r#"["'](?P<url>(?:https?://[^"'\s<>]+)?(?:/[^"'\s<>]*)?/(?:graphql|api/[^"'\s<>]*))["']"#).ok()
});

const FRAMEWORK_TAGS: &[&str] = &["nextjs", "nuxt", "react", "vue", "angular", "svelte", "gatsby"];

/// Fetches a site's surface and builds its [`SiteProfile`]
pub struct Prober {
    fetcher: Arc<dyn HttpFetcher>,
}

impl Prober {
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self { fetcher }
    }

    /// Probe `base_url`. Only a failure to fetch the root page is an error.
    pub async fn probe(&self, base_url: &str, cancel: &CancelToken) -> Result<SiteProfile, ProbeError> {
        let base = normalize_base_url(base_url)?;
        info!(url = %base, "Probing site");

        let root_url = format!("{}/", base);
        let root = cancel
            .run(self.fetcher.send(HttpRequest::get(&root_url)))
            .await
            .map_err(|e| ProbeError {
                url: root_url.clone(),
                reason: e.to_string(),
            })?
            .map_err(|e| ProbeError {
                url: root_url.clone(),
                reason: e.to_string(),
            })?;

        let mut profile = SiteProfile::empty(&base);
        profile
            .required_headers
            .insert("Referer".to_string(), root_url.clone());

        let requests = WELL_KNOWN_PATHS
            .iter()
            .map(|path| self.fetcher.send(HttpRequest::get(format!("{}{}", base, path))));
        let well_known = match cancel.run(join_all(requests)).await {
            Ok(responses) => responses,
            Err(_) => {
                warn!(url = %base, "Probe cancelled before well-known paths answered");
                Vec::new()
            }
        };

        classify_root(&mut profile, &root);
        profile.api_hints = extract_api_hints(&base, &root.body);
        profile.endpoints.push(observe(&root));

        for (path, result) in WELL_KNOWN_PATHS.iter().zip(well_known) {
            match result {
                Ok(response) => {
                    classify_well_known(&mut profile, path, &response);
                    profile.endpoints.push(observe(&response));
                }
                Err(e) => debug!(path = %path, error = %e, "Well-known path failed"),
            }
        }

        if !FRAMEWORK_TAGS.iter().any(|t| profile.has_tag(t)) && !profile.has_tag("json-api") {
            profile.technologies.insert("static-html".to_string());
        }

        info!(
            url = %base,
            technologies = ?profile.technologies,
            hints = profile.api_hints.len(),
            "Probe complete"
        );
        Ok(profile)
    }
}

/// Accept bare hosts and strip trailing slashes, query and fragment
pub fn normalize_base_url(input: &str) -> Result<String, ProbeError> {
    let trimmed = input.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let mut url = Url::parse(&candidate).map_err(|e| ProbeError {
        url: input.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ProbeError {
            url: input.to_string(),
            reason: "expected an http(s) URL with a host".to_string(),
        });
    }
    url.set_query(None);
    url.set_fragment(None);

    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn observe(response: &HttpResponse) -> ObservedEndpoint {
    ObservedEndpoint {
        url: response.url.clone(),
        method: HttpMethod::Get,
        status: response.status,
        content_type: response.content_type().map(str::to_string),
        sample_body: truncate(&response.body, SAMPLE_LIMIT),
    }
}

fn truncate(body: &str, limit: usize) -> String {
    if body.len() <= limit {
        return body.to_string();
    }
    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

fn classify_root(profile: &mut SiteProfile, root: &HttpResponse) {
    let tags = &mut profile.technologies;
    let mut tag = |name: &str| {
        tags.insert(name.to_string());
    };

    if let Some(powered_by) = root.header("x-powered-by").map(str::to_ascii_lowercase) {
        if powered_by.contains("next.js") {
            tag("nextjs");
        }
        if powered_by.contains("express") {
            tag("express");
        }
        if powered_by.contains("php") {
            tag("php");
        }
    }
    if root.header("cf-ray").is_some()
        || root
            .header("server")
            .map(|s| s.to_ascii_lowercase().contains("cloudflare"))
            .unwrap_or(false)
    {
        tag("cloudflare");
    }
    if let Some(cookie) = root.header("set-cookie").map(str::to_ascii_lowercase) {
        if cookie.contains("laravel_session") {
            tag("laravel");
            tag("php");
        }
        if cookie.contains("phpsessid") {
            tag("php");
        }
    }

    let challenged = CHALLENGE_MARKERS
        .as_ref()
        .map(|re| re.is_match(&root.body))
        .unwrap_or(false);
    if (matches!(root.status, 403 | 503) && root.header("cf-ray").is_some()) || challenged {
        tag("bot-protection");
    }

    if root.is_json_content() || root.json().is_some() {
        tag("json-api");
        tag("rest");
        return;
    }

    for (name, marker) in BODY_MARKERS.iter() {
        if marker.is_match(&root.body) {
            tag(name);
        }
    }
    if FRAMEWORK_TAGS.iter().any(|t| tags.contains(*t)) {
        tags.insert("spa".to_string());
    }
}

fn classify_well_known(profile: &mut SiteProfile, path: &str, response: &HttpResponse) {
    let json = response.json();
    let tags = &mut profile.technologies;

    match path {
        "/graphql" => {
            // GraphQL servers answer a bare GET with a JSON error about the missing query.
            let graphql_error = json
                .as_ref()
                .map(|v| v.get("errors").is_some() || v.get("data").is_some())
                .unwrap_or(false);
            let playground = response.body.to_ascii_lowercase().contains("graphiql")
                || response.body.to_ascii_lowercase().contains("playground");
            if graphql_error || playground {
                tags.insert("graphql".to_string());
            }
            if response
                .header("x-powered-by")
                .map(|v| v.to_ascii_lowercase().contains("apollo"))
                .unwrap_or(false)
                || response.body.contains("apollo")
            {
                tags.insert("apollo".to_string());
            }
        }
        "/wp-json" if response.is_success() && json.is_some() => {
            tags.insert("wordpress".to_string());
            tags.insert("rest".to_string());
        }
        _ if response.is_success() && json.is_some() => {
            tags.insert("rest".to_string());
        }
        _ => {}
    }
}

/// Absolute API URLs referenced by a page, in order of appearance
pub fn extract_api_hints(base: &str, body: &str) -> Vec<String> {
    let (Some(re), Ok(base_url)) = (API_HINT.as_ref(), Url::parse(&format!("{}/", base))) else {
        return Vec::new();
    };

    let mut hints: Vec<String> = Vec::new();
    for captures in re.captures_iter(body) {
        let Some(raw) = captures.name("url") else {
            continue;
        };
        let Ok(url) = base_url.join(raw.as_str()) else {
            continue;
        };
        let hint = url.to_string();
        if !hints.contains(&hint) {
            hints.push(hint);
        }
        if hints.len() >= MAX_HINTS {
            break;
        }
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::http::stub::StubFetcher;
    use serde_json::json;

    const BASE: &str = "https://site.test";

    fn prober(stub: StubFetcher) -> Prober {
        Prober::new(Arc::new(stub))
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("site.test").unwrap(), "https://site.test");
        assert_eq!(
            normalize_base_url("http://site.test/anime/?q=1#top").unwrap(),
            "http://site.test/anime"
        );
        assert!(normalize_base_url("ftp://site.test").is_err());
        assert!(normalize_base_url("https://").is_err());
    }

    #[test]
    fn test_extract_api_hints() {
        let body = r#"<script>fetch("/api/v2/search?q=" + q); const gql = 'https://cdn.site.test/graphql';
            fetch("/api/v2/search?q=" + q)</script>"#;
        let hints = extract_api_hints(BASE, body);
        assert_eq!(
            hints,
            vec![
                "https://site.test/api/v2/search?q=".to_string(),
                "https://cdn.site.test/graphql".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_nextjs_site() {
        let stub = StubFetcher::new().get_html(
            "https://site.test/",
            r#"<html><div id="__next"></div><script id="__NEXT_DATA__">{"props":{}}</script>
               <script>fetch("/api/search?q=x")</script></html>"#,
        );
        let profile = prober(stub).probe(BASE, &CancelToken::new()).await.unwrap();

        assert!(profile.has_tag("nextjs"));
        assert!(profile.has_tag("spa"));
        assert!(!profile.has_tag("static-html"));
        assert_eq!(profile.api_hints, vec!["https://site.test/api/search?q=x".to_string()]);
        assert_eq!(profile.required_headers["Referer"], "https://site.test/");
        assert_eq!(profile.endpoints.len(), 4);
    }

    #[tokio::test]
    async fn test_graphql_and_wordpress_paths() {
        let stub = StubFetcher::new()
            .get_html("https://site.test/", "<html><body>plain</body></html>")
            .get_json(
                "https://site.test/graphql",
                json!({"errors": [{"message": "Must provide query string."}]}),
            )
            .get_json("https://site.test/wp-json", json!({"name": "Blog", "routes": {}}));
        let profile = prober(stub).probe(BASE, &CancelToken::new()).await.unwrap();

        assert!(profile.has_tag("graphql"));
        assert!(profile.has_tag("wordpress"));
        assert!(profile.has_tag("rest"));
        assert!(profile.has_tag("static-html"));
    }

    #[tokio::test]
    async fn test_json_root() {
        let stub = StubFetcher::new().get_json("https://site.test/", json!({"version": "1"}));
        let profile = prober(stub).probe(BASE, &CancelToken::new()).await.unwrap();
        assert!(profile.has_tag("json-api"));
        assert!(profile.has_tag("rest"));
        assert!(!profile.has_tag("static-html"));
    }

    #[tokio::test]
    async fn test_cloudflare_challenge() {
        let stub = StubFetcher::new().get_with_headers(
            "https://site.test/",
            403,
            "<title>Just a moment...</title>",
            &[("cf-ray", "8a1b2c3d4e5f-AMS"), ("server", "cloudflare")],
        );
        let profile = prober(stub).probe(BASE, &CancelToken::new()).await.unwrap();
        assert!(profile.has_tag("cloudflare"));
        assert!(profile.has_tag("bot-protection"));
    }

    #[tokio::test]
    async fn test_unreachable_root_is_probe_error() {
        let stub = StubFetcher::new().fail(
            HttpMethod::Get,
            "https://site.test/",
            FetchError::Network {
                url: "https://site.test/".to_string(),
                reason: "dns error: failed to lookup address".to_string(),
            },
        );
        let err = prober(stub).probe(BASE, &CancelToken::new()).await.unwrap_err();
        assert_eq!(err.url, "https://site.test/");
        assert!(err.reason.contains("dns error"));
    }

    #[tokio::test]
    async fn test_probe_respects_cancellation() {
        let stub = StubFetcher::new().hang(HttpMethod::Get, "https://site.test/");
        let token = CancelToken::with_timeout(std::time::Duration::from_millis(20));
        let err = prober(stub).probe(BASE, &token).await.unwrap_err();
        assert!(err.reason.contains("cancelled"));
    }
}
