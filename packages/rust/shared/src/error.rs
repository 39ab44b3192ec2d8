//! Error types for dailybrief.
//!
//! Library crates use [`DailyBriefError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Provider calls (search, completion) return the narrower [`ProviderError`],
//! which the retry layer classifies before it is folded into a
//! topic-scoped [`DailyBriefError`].

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all dailybrief operations.
#[derive(Debug, thiserror::Error)]
pub enum DailyBriefError {
    /// Configuration or rotation table loading/validation error. Aborts the run.
    #[error("config error: {message}")]
    Config { message: String },

    /// The search provider exhausted its retries and degradation ladder.
    #[error("sources unavailable for query {query:?}: {reason}")]
    SourceUnavailable { query: String, reason: String },

    /// The synthesis input could not be shrunk under the context budget.
    #[error("context budget exceeded: prompt needs ~{required} tokens, budget is {budget}")]
    ContextBudgetExceeded { required: usize, budget: usize },

    /// The completion provider exhausted its retries.
    #[error("synthesis unavailable: {reason}")]
    SynthesisUnavailable { reason: String },

    /// Filesystem write, move, or lock failure while publishing.
    #[error("render error at {path:?}: {message}")]
    Render { path: PathBuf, message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DailyBriefError>;

impl DailyBriefError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a source error for `query`.
    pub fn source_unavailable(query: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            query: query.into(),
            reason: reason.into(),
        }
    }

    /// Create a synthesis error from any displayable message.
    pub fn synthesis(reason: impl Into<String>) -> Self {
        Self::SynthesisUnavailable {
            reason: reason.into(),
        }
    }

    /// Wrap a filesystem error with the path it happened at.
    pub fn render(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Render {
            path: path.into(),
            message: source.to_string(),
        }
    }

    /// Create a render error from a message (lock contention, serialization).
    pub fn render_msg(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Render {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Whether the error is confined to one topic. Config errors abort the whole run.
    pub fn is_topic_scoped(&self) -> bool {
        !matches!(self, Self::Config { .. })
    }

    /// Short stable name for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::ContextBudgetExceeded { .. } => "context_budget_exceeded",
            Self::SynthesisUnavailable { .. } => "synthesis_unavailable",
            Self::Render { .. } => "render",
        }
    }
}

// ---------------------------------------------------------------------------
// ProviderError
// ---------------------------------------------------------------------------

/// Error reported by an external provider call (search or completion).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Provider-reported throttling or exhausted quota (HTTP 429 and friends).
    #[error("rate limited{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    /// Network failure, timeout, or 5xx/overloaded response.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The provider rejected the request as exceeding its context window.
    #[error("prompt too large: {0}")]
    PromptTooLarge(String),

    /// The requested model does not exist or is not available to this key.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// Authentication, bad request, or any other non-retryable failure.
    #[error("provider error: {0}")]
    Fatal(String),
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|d| format!(" (retry after {}s)", d.as_secs()))
        .unwrap_or_default()
}

/// Result alias for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    /// Whether backing off and calling again can help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }

    /// Provider-suggested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Map an HTTP status + response body to a provider error.
    ///
    /// Shared by the search and completion clients so both classify
    /// throttling and server errors the same way.
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: &str) -> Self {
        let snippet: String = body.chars().take(300).collect();
        match status {
            429 => Self::RateLimited { retry_after },
            500..=599 => Self::Transient(format!("HTTP {status}: {snippet}")),
            _ => Self::Fatal(format!("HTTP {status}: {snippet}")),
        }
    }
}
