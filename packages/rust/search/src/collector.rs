//! The source collector: search, shape, and degrade.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use dailybrief_shared::{
    Clock, DailyBriefError, GiveUp, Result, RetryError, RetryPolicy, SearchConfig, SourceDocument,
    retry,
};

use crate::extract::PageExtractor;
use crate::normalize::{bound_excerpt, host_of, is_blocked, normalize_url};
use crate::{SearchHit, SearchProvider};

/// Filtering and bounding knobs for one collection.
#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub max_excerpt_chars: usize,
    pub per_domain_cap: usize,
    pub blocked_domains: Vec<String>,
}

impl From<&SearchConfig> for CollectOptions {
    fn from(config: &SearchConfig) -> Self {
        Self {
            max_excerpt_chars: config.max_excerpt_chars,
            per_domain_cap: config.per_domain_cap,
            blocked_domains: config.blocked_domains.clone(),
        }
    }
}

/// The single `max_results` reduction step: halve, never below 1.
pub fn degraded_max_results(max_results: usize) -> usize {
    (max_results / 2).max(1)
}

/// Turn raw hits into source documents.
///
/// Rank is the 1-based provider position. Hits with unusable URLs or on
/// blocked domains are dropped, duplicates by normalized URL keep the
/// best-ranked occurrence, and each host contributes at most
/// `per_domain_cap` documents. Output is rank-ordered and capped at `max_results`.
pub fn shape_hits(
    hits: Vec<SearchHit>,
    max_results: usize,
    opts: &CollectOptions,
) -> Vec<SourceDocument> {
    let mut seen = HashSet::new();
    let mut per_host: HashMap<String, usize> = HashMap::new();
    let mut docs = Vec::new();

    for (idx, hit) in hits.into_iter().enumerate() {
        let Some(url) = normalize_url(&hit.url) else {
            debug!(url = %hit.url, "dropping unusable url");
            continue;
        };
        let Some(host) = host_of(&url) else {
            continue;
        };
        if is_blocked(&host, &opts.blocked_domains) {
            debug!(%url, "blocked domain");
            continue;
        }
        if seen.contains(&url) {
            continue;
        }
        let count = per_host.entry(host.clone()).or_insert(0);
        if *count >= opts.per_domain_cap {
            debug!(%url, "per-domain cap reached");
            continue;
        }
        *count += 1;
        seen.insert(url.clone());

        let title = match hit.title.trim() {
            "" => host,
            t => t.to_string(),
        };
        docs.push(SourceDocument {
            url,
            title,
            excerpt: bound_excerpt(&hit.content, opts.max_excerpt_chars),
            published_at: hit.published_at,
            rank: (idx + 1) as u32,
        });
    }

    docs.sort_by_key(|d| d.rank);
    docs.truncate(max_results);
    docs
}

/// Collects bounded, deduplicated sources for a query.
pub struct SourceCollector {
    provider: Arc<dyn SearchProvider>,
    extractor: Option<PageExtractor>,
    options: CollectOptions,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl SourceCollector {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        options: CollectOptions,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            extractor: None,
            options,
            policy,
            clock,
        }
    }

    /// Replace snippets with extracted page text where it is longer.
    pub fn with_extractor(mut self, extractor: PageExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Collect sources for `query`.
    ///
    /// Retryable failures are retried per the policy. If that is exhausted,
    /// `max_results` is halved once and the collection rerun with a fresh
    /// retry budget; a second failure is `SourceUnavailable`. Non-retryable
    /// failures skip the reduction. Zero hits is success.
    #[instrument(skip(self), fields(provider = self.provider.name()))]
    pub async fn collect(&self, query: &str, max_results: usize) -> Result<Vec<SourceDocument>> {
        let max_results = max_results.max(1);

        let err = match self.search_with_retry(query, max_results).await {
            Ok(hits) => return Ok(self.finish(hits, max_results).await),
            Err(err) => err,
        };

        if err.reason == GiveUp::NotRetryable {
            warn!(error = %err, "search failed with a non-retryable error");
            return Err(DailyBriefError::source_unavailable(query, err.to_string()));
        }

        let reduced = degraded_max_results(max_results);
        warn!(
            from = max_results,
            to = reduced,
            error = %err,
            "search still failing, reducing max_results"
        );

        match self.search_with_retry(query, reduced).await {
            Ok(hits) => Ok(self.finish(hits, reduced).await),
            Err(err) => Err(DailyBriefError::source_unavailable(
                query,
                format!("{err} (after reducing max_results to {reduced})"),
            )),
        }
    }

    async fn search_with_retry(
        &self,
        query: &str,
        max_results: usize,
    ) -> std::result::Result<Vec<SearchHit>, RetryError> {
        let provider = self.provider.as_ref();
        retry(&self.policy, self.clock.as_ref(), "search", |_| {
            provider.search(query, max_results)
        })
        .await
    }

    async fn finish(&self, hits: Vec<SearchHit>, max_results: usize) -> Vec<SourceDocument> {
        let raw = hits.len();
        let mut docs = shape_hits(hits, max_results, &self.options);

        if let Some(extractor) = &self.extractor {
            for doc in &mut docs {
                match extractor.fetch_text(&doc.url).await {
                    Ok(text) if text.chars().count() > doc.excerpt.chars().count() => {
                        doc.excerpt = bound_excerpt(&text, self.options.max_excerpt_chars);
                    }
                    Ok(_) => {}
                    Err(e) => debug!(url = %doc.url, error = %e, "full-text fetch failed, keeping snippet"),
                }
            }
        }

        info!(raw, kept = docs.len(), max_results, "sources collected");
        docs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dailybrief_shared::{ManualClock, ProviderError, ProviderResult};
    use std::sync::Mutex;

    fn hit(url: &str, title: &str, content: &str) -> SearchHit {
        SearchHit {
            url: url.into(),
            title: title.into(),
            content: content.into(),
            published_at: None,
        }
    }

    fn opts() -> CollectOptions {
        CollectOptions {
            max_excerpt_chars: 50,
            per_domain_cap: 2,
            blocked_domains: vec!["reddit.com".into()],
        }
    }

    /// Scripted provider: pops one response per call, repeating the last.
    struct ScriptedSearch {
        script: Mutex<Vec<ProviderResult<Vec<SearchHit>>>>,
        calls: Mutex<Vec<usize>>,
    }

    impl ScriptedSearch {
        fn new(script: Vec<ProviderResult<Vec<SearchHit>>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<usize> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchProvider for ScriptedSearch {
        async fn search(&self, _query: &str, max_results: usize) -> ProviderResult<Vec<SearchHit>> {
            self.calls.lock().unwrap().push(max_results);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn collector(provider: Arc<ScriptedSearch>, retries: u32) -> SourceCollector {
        SourceCollector::new(
            provider,
            opts(),
            RetryPolicy::immediate(retries),
            Arc::new(ManualClock::new()),
        )
    }

    #[test]
    fn shape_dedups_filters_and_bounds() {
        let long = "word ".repeat(100);
        let hits = vec![
            hit("https://a.example/x?utm_source=feed", "A1", &long),
            hit("https://a.example/x#frag", "A1 dup", "dup"),
            hit("https://www.reddit.com/r/ai", "R", "blocked"),
            hit("https://a.example/y", "A2", "two"),
            hit("https://a.example/z", "A3", "over cap"),
            hit("ftp://files.example/f", "F", "bad scheme"),
            hit("https://b.example/1/", "", "untitled"),
        ];

        let docs = shape_hits(hits, 10, &opts());
        let urls: Vec<_> = docs.iter().map(|d| d.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://a.example/x", "https://a.example/y", "https://b.example/1"]
        );
        assert_eq!(docs[0].rank, 1);
        assert_eq!(docs[0].title, "A1");
        assert_eq!(docs[2].title, "b.example");
        assert!(docs.iter().all(|d| d.excerpt.chars().count() <= 50));

        let unique: HashSet<_> = docs.iter().map(|d| &d.url).collect();
        assert_eq!(unique.len(), docs.len());
    }

    #[test]
    fn shape_caps_result_count() {
        let hits = (0..10)
            .map(|i| hit(&format!("https://s{i}.example/"), "t", "c"))
            .collect();
        let docs = shape_hits(hits, 4, &opts());
        assert_eq!(docs.len(), 4);
        assert_eq!(docs.last().unwrap().rank, 4);
    }

    #[test]
    fn degradation_halves_with_floor() {
        assert_eq!(degraded_max_results(12), 6);
        assert_eq!(degraded_max_results(5), 2);
        assert_eq!(degraded_max_results(1), 1);
    }

    #[tokio::test]
    async fn zero_results_is_success() {
        let provider = ScriptedSearch::new(vec![Ok(vec![])]);
        let docs = collector(provider.clone(), 2).collect("q", 8).await.unwrap();
        assert!(docs.is_empty());
        assert_eq!(provider.calls(), vec![8]);
    }

    #[tokio::test]
    async fn persistent_rate_limit_reduces_once_then_fails() {
        let provider = ScriptedSearch::new(vec![Err(ProviderError::RateLimited {
            retry_after: None,
        })]);

        let err = collector(provider.clone(), 2)
            .collect("AI industry news", 12)
            .await
            .unwrap_err();

        assert!(matches!(err, DailyBriefError::SourceUnavailable { .. }));
        // 3 attempts at 12, then one reduction to 6 with a fresh budget.
        assert_eq!(provider.calls(), vec![12, 12, 12, 6, 6, 6]);
    }

    #[tokio::test]
    async fn recovers_at_reduced_size() {
        let rl = || Err(ProviderError::RateLimited { retry_after: None });
        let provider = ScriptedSearch::new(vec![
            rl(),
            rl(),
            Ok(vec![hit("https://a.example/1", "A", "x")]),
        ]);

        let docs = collector(provider.clone(), 1).collect("q", 10).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(provider.calls(), vec![10, 10, 5]);
    }

    #[tokio::test]
    async fn non_retryable_error_skips_reduction() {
        let provider = ScriptedSearch::new(vec![Err(ProviderError::Fatal("HTTP 401".into()))]);
        let err = collector(provider.clone(), 3).collect("q", 10).await.unwrap_err();
        assert!(matches!(err, DailyBriefError::SourceUnavailable { .. }));
        assert_eq!(provider.calls(), vec![10]);
    }

    #[tokio::test]
    async fn backoff_sleeps_through_the_clock() {
        let provider = ScriptedSearch::new(vec![
            Err(ProviderError::Transient("reset".into())),
            Ok(vec![hit("https://a.example/1", "A", "x")]),
        ]);
        let clock = Arc::new(ManualClock::new());
        let policy = RetryPolicy {
            max_retries: 2,
            initial_backoff: std::time::Duration::from_millis(250),
            max_backoff: std::time::Duration::from_secs(2),
            multiplier: 2.0,
            max_elapsed: std::time::Duration::from_secs(30),
        };
        let collector = SourceCollector::new(provider, opts(), policy, clock.clone());

        collector.collect("q", 3).await.unwrap();
        assert_eq!(clock.sleeps(), vec![std::time::Duration::from_millis(250)]);
    }
}
