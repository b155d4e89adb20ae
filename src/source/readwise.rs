//! Readwise v2 REST source: `GET /highlights/?updated__gt=...`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroize;

use super::HighlightSource;
use crate::error::FetchError;
use crate::highlight::Highlight;

pub const DEFAULT_BASE_URL: &str = "https://readwise.io/api/v2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);
const MAX_PAGE_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<Highlight>,
}

pub struct ReadwiseSource {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl ReadwiseSource {
    pub fn new(token: String, base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("highlight-poller/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Build from `READWISE_API_KEY` (and optional `READWISE_BASE_URL`).
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("READWISE_API_KEY")
            .context("READWISE_API_KEY is not set")?;
        if token.trim().is_empty() {
            anyhow::bail!("READWISE_API_KEY is empty");
        }
        let base_url =
            std::env::var("READWISE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(token.trim().to_string(), &base_url)
    }
}

impl Drop for ReadwiseSource {
    fn drop(&mut self) {
        self.token.zeroize();
    }
}

#[async_trait]
impl HighlightSource for ReadwiseSource {
    fn name(&self) -> &str {
        "readwise"
    }

    async fn fetch(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Highlight>, FetchError> {
        let mut url = format!("{}/highlights/", self.base_url);
        let mut query = Some(vec![
            ("page_size", limit.clamp(1, MAX_PAGE_SIZE).to_string()),
            ("updated__gt", since.to_rfc3339_opts(SecondsFormat::Micros, true)),
        ]);
        let mut highlights: Vec<Highlight> = Vec::new();

        loop {
            let mut req = self
                .client
                .get(&url)
                .header(AUTHORIZATION, format!("Token {}", self.token));
            // `next` links already carry the query string.
            if let Some(q) = query.take() {
                req = req.query(&q);
            }

            let resp = req.send().await.map_err(classify_transport)?;
            let status = resp.status().as_u16();
            if !resp.status().is_success() {
                let retry_after = parse_retry_after(
                    resp.headers().get(RETRY_AFTER).and_then(|v| v.to_str().ok()),
                    Utc::now(),
                );
                let body = resp.text().await.unwrap_or_default();
                return Err(classify_status(status, retry_after, &body));
            }

            let page: Page = resp.json().await.map_err(|e| {
                if e.is_decode() {
                    FetchError::Fatal(format!("malformed highlights page: {e}"))
                } else {
                    classify_transport(e)
                }
            })?;

            debug!(url = %url, count = page.results.len(), "Fetched highlights page");
            highlights.extend(page.results);

            match page.next {
                Some(next) if highlights.len() < limit => url = next,
                _ => break,
            }
        }

        highlights.sort_by_key(|h| h.progress_at());
        highlights.truncate(limit);
        Ok(highlights)
    }
}

fn classify_transport(err: reqwest::Error) -> FetchError {
    if err.is_builder() {
        FetchError::Fatal(format!("invalid request: {err}"))
    } else {
        FetchError::Transient(format!("request failed: {err}"))
    }
}

/// Map a non-2xx response onto the retry taxonomy.
fn classify_status(status: u16, retry_after: Option<Duration>, body: &str) -> FetchError {
    let snippet = clip(body, 200);
    match status {
        429 => FetchError::RateLimited {
            retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
            message: format!("HTTP 429: {snippet}"),
        },
        401 | 403 => FetchError::Fatal(format!(
            "authentication failed (HTTP {status}) — check READWISE_API_KEY"
        )),
        408 | 500..=599 => FetchError::Transient(format!("HTTP {status}: {snippet}")),
        _ => FetchError::Fatal(format!("HTTP {status}: {snippet}")),
    }
}

fn clip(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// `Retry-After` is either delta-seconds or an HTTP-date.
fn parse_retry_after(value: Option<&str>, now: DateTime<Utc>) -> Option<Duration> {
    let value = value?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_429_uses_retry_after() {
        let err = classify_status(429, Some(Duration::from_secs(5)), "");
        match err {
            FetchError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Duration::from_secs(5))
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn test_429_without_header_defaults() {
        let err = classify_status(429, None, "");
        assert!(matches!(
            err,
            FetchError::RateLimited { retry_after, .. } if retry_after == DEFAULT_RETRY_AFTER
        ));
    }

    #[test]
    fn test_status_classes() {
        assert!(matches!(classify_status(401, None, ""), FetchError::Fatal(_)));
        assert!(matches!(classify_status(403, None, ""), FetchError::Fatal(_)));
        assert!(matches!(classify_status(404, None, ""), FetchError::Fatal(_)));
        assert!(matches!(classify_status(400, None, "bad"), FetchError::Fatal(_)));
        assert!(matches!(classify_status(500, None, ""), FetchError::Transient(_)));
        assert!(matches!(classify_status(503, None, ""), FetchError::Transient(_)));
        assert!(matches!(classify_status(408, None, ""), FetchError::Transient(_)));
    }

    #[test]
    fn test_long_bodies_are_clipped() {
        let body = "x".repeat(5000);
        let err = classify_status(502, None, &body);
        assert!(err.to_string().len() < 300);
    }

    #[test]
    fn test_parse_retry_after() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(parse_retry_after(Some("120"), now), Some(Duration::from_secs(120)));
        assert_eq!(
            parse_retry_after(Some("Wed, 21 Oct 2015 07:28:30 GMT"), now),
            Some(Duration::from_secs(30))
        );
        // Dates in the past mean "now".
        assert_eq!(
            parse_retry_after(Some("Wed, 21 Oct 2015 07:00:00 GMT"), now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after(Some("soon"), now), None);
        assert_eq!(parse_retry_after(None, now), None);
    }

    #[test]
    fn test_base_url_is_normalized() {
        let source = ReadwiseSource::new("token".into(), "https://example.test/api/v2/").unwrap();
        assert_eq!(source.base_url, "https://example.test/api/v2");
        assert_eq!(source.name(), "readwise");
    }
}
