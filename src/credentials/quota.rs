//! Rate-limit metadata carried by remote responses.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::HeaderMap;
use tokio::time::Instant;

const HEADER_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_LIMIT: &str = "x-ratelimit-limit";
const HEADER_RESET: &str = "x-ratelimit-reset";

/// Quota state as reported by the remote for one credential.
///
/// Every field is optional because not every endpoint returns every header.
/// Values present here are authoritative and overwrite local bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaMeta {
    /// Requests left before `reset_at`.
    pub remaining: Option<u32>,
    /// Requests allowed per window.
    pub limit: Option<u32>,
    /// When the window resets.
    pub reset_at: Option<Instant>,
}

impl QuotaMeta {
    pub fn new(remaining: u32, reset_at: Instant) -> Self {
        Self {
            remaining: Some(remaining),
            limit: None,
            reset_at: Some(reset_at),
        }
    }

    /// Meta for a response that says the credential is used up.
    pub fn exhausted(reset_at: Option<Instant>) -> Self {
        Self {
            remaining: Some(0),
            limit: None,
            reset_at,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Parse GitHub-style `X-RateLimit-*` headers.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let number = |name: &str| {
            headers
                .get(name)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
        };

        Self {
            remaining: number(HEADER_REMAINING).map(|n| n.min(u32::MAX as u64) as u32),
            limit: number(HEADER_LIMIT).map(|n| n.min(u32::MAX as u64) as u32),
            reset_at: number(HEADER_RESET).map(epoch_to_instant),
        }
    }
}

/// Convert a unix timestamp (seconds) into a monotonic deadline.
///
/// Timestamps already in the past map to "now".
pub fn epoch_to_instant(epoch_secs: u64) -> Instant {
    let now_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Instant::now() + Duration::from_secs(epoch_secs.saturating_sub(now_epoch))
}

/// Parse a `Retry-After` header given in seconds.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_from_headers_full() {
        let mut headers = HeaderMap::new();
        headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("42"));
        headers.insert("X-RateLimit-Limit", HeaderValue::from_static("5000"));
        headers.insert("X-RateLimit-Reset", HeaderValue::from_static("0"));

        let meta = QuotaMeta::from_headers(&headers);
        assert_eq!(meta.remaining, Some(42));
        assert_eq!(meta.limit, Some(5000));
        assert!(meta.reset_at.is_some());
        assert!(!meta.is_exhausted());
    }

    #[test]
    fn test_from_headers_missing() {
        let meta = QuotaMeta::from_headers(&HeaderMap::new());
        assert_eq!(meta, QuotaMeta::default());
    }

    #[test]
    fn test_from_headers_garbage_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("lots"));
        let meta = QuotaMeta::from_headers(&headers);
        assert_eq!(meta.remaining, None);
    }

    #[test]
    fn test_exhausted() {
        let meta = QuotaMeta::exhausted(None);
        assert!(meta.is_exhausted());
    }

    #[test]
    fn test_epoch_in_past_is_now() {
        let before = Instant::now();
        let at = epoch_to_instant(1);
        assert!(at >= before);
        assert!(at <= Instant::now());
    }

    #[test]
    fn test_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert("Retry-After", HeaderValue::from_static("30"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(30)));
    }
}
