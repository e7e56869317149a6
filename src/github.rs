//! Thin GitHub REST client shared by the fetch and judge adapters.

use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};

use crate::config::GithubConfig;
use crate::credentials::{QuotaMeta, retry_after};
use crate::error::{Result, WallError};
use crate::remote::{RemoteError, truncate_body};

const ACCEPT: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: Client,
    api_url: String,
}

impl GitHubClient {
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .build()
            .map_err(|e| WallError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Start a request against an API path (`/users/x`) or an absolute URL.
    pub fn request(&self, method: Method, path: &str, token: &str) -> RequestBuilder {
        let url = if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.api_url, path)
        };
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// Send and classify the response; non-success statuses become [`RemoteError`]s.
    pub async fn send(&self, request: RequestBuilder) -> std::result::Result<Response, RemoteError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        Err(classify(status, &headers, &body))
    }
}

/// Map a failed response to a [`RemoteError`], recognizing GitHub's rate-limit shapes.
pub fn classify(status: StatusCode, headers: &HeaderMap, body: &str) -> RemoteError {
    let quota = QuotaMeta::from_headers(headers);
    let wait = retry_after(headers);

    let rate_limited = match status.as_u16() {
        429 => quota.is_exhausted() || wait.is_some(),
        403 => quota.is_exhausted() || wait.is_some() || body.to_lowercase().contains("rate limit"),
        _ => false,
    };
    if rate_limited {
        return RemoteError::RateLimited {
            quota,
            retry_after: wait,
        };
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return RemoteError::Transient(format!("HTTP 429: {}", truncate_body(body, 200)));
    }
    RemoteError::from_status(status.as_u16(), truncate_body(body, 200))
}

/// Extract the URL with the given `rel` from a `Link` header.
pub fn link_rel(headers: &HeaderMap, rel: &str) -> Option<String> {
    let link = headers.get("link")?.to_str().ok()?;
    let wanted = format!("rel=\"{}\"", rel);
    link.split(',').find_map(|part| {
        let (url, params) = part.split_once(';')?;
        if !params.contains(&wanted) {
            return None;
        }
        Some(url.trim().trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

pub fn next_link(headers: &HeaderMap) -> Option<String> {
    link_rel(headers, "next")
}

/// The `page` query parameter of a URL.
pub fn page_param(url: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("page="))
        .map(|p| p.to_string())
}
