//! Tavily search API client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use dailybrief_shared::{DailyBriefError, ProviderError, ProviderResult, Result, SearchConfig};

use crate::{SearchHit, SearchProvider, USER_AGENT};

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: usize,
    include_answer: bool,
    include_raw_content: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    published_date: Option<String>,
}

/// Client for `POST {base_url}/search`.
pub struct TavilyClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl TavilyClient {
    pub fn new(config: &SearchConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DailyBriefError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl SearchProvider for TavilyClient {
    #[instrument(skip(self), fields(provider = "tavily"))]
    async fn search(&self, query: &str, max_results: usize) -> ProviderResult<Vec<SearchHit>> {
        let url = format!("{}/search", self.base_url);
        let body = SearchRequest {
            query,
            max_results,
            include_answer: false,
            include_raw_content: false,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &text));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("{url}: invalid response body: {e}")))?;

        let hits: Vec<SearchHit> = parsed
            .results
            .into_iter()
            .map(|r| SearchHit {
                published_at: r.published_date.as_deref().and_then(parse_published),
                url: r.url,
                title: r.title,
                content: r.content,
            })
            .collect();

        debug!(hits = hits.len(), "search returned");
        Ok(hits)
    }

    fn name(&self) -> &str {
        "tavily"
    }
}

/// Tavily signals plan/quota exhaustion with 432/433 alongside 429.
fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ProviderError {
    match status.as_u16() {
        432 | 433 => ProviderError::RateLimited { retry_after },
        code => ProviderError::from_status(code, retry_after, body),
    }
}

/// `Retry-After` in delta-seconds form.
pub fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
