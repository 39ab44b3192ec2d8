//! Source collection for dailybrief.
//!
//! A [`SourceCollector`] turns a topic's search query into a bounded,
//! deduplicated list of [`SourceDocument`]s. It talks to a [`SearchProvider`]
//! (Tavily in production, a fake in tests), normalizes and filters the hits,
//! and degrades `max_results` once when the provider keeps rate-limiting.
//!
//! [`SourceDocument`]: dailybrief_shared::SourceDocument

mod collector;
mod extract;
mod normalize;
mod tavily;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dailybrief_shared::ProviderResult;

pub use collector::{CollectOptions, SourceCollector, degraded_max_results, shape_hits};
pub use extract::{PageExtractor, extract_main_text};
pub use normalize::{bound_excerpt, host_of, is_blocked, normalize_url};
pub use tavily::{TavilyClient, retry_after_header};

/// User-Agent string for outbound requests.
pub(crate) const USER_AGENT: &str = concat!("dailybrief/", env!("CARGO_PKG_VERSION"));

/// One raw search result, in provider order.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    /// Provider snippet (may be long; bounded later).
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// A web-search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run one search request, returning at most `max_results` hits in rank order.
    async fn search(&self, query: &str, max_results: usize) -> ProviderResult<Vec<SearchHit>>;

    /// Provider name for tracing.
    fn name(&self) -> &str;
}
