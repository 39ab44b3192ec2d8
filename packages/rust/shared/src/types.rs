//! Core domain types for dailybrief: topics, sources, articles, and the feed index.

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version for the feed index format.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one pipeline execution (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Topic
// ---------------------------------------------------------------------------

/// Which weekdays a topic is scheduled on.
///
/// Serialized as a list of weekday names (`["mon", "thu"]`) or `["any"]`.
/// `Any` topics form the fallback ("general") category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub enum DayAffinity {
    Any,
    Days(Vec<Weekday>),
}

impl DayAffinity {
    /// Whether the affinity names `day` explicitly. `Any` never matches here.
    pub fn names(&self, day: Weekday) -> bool {
        match self {
            Self::Any => false,
            Self::Days(days) => days.contains(&day),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl TryFrom<Vec<String>> for DayAffinity {
    type Error = String;

    fn try_from(raw: Vec<String>) -> std::result::Result<Self, Self::Error> {
        if raw.is_empty() {
            return Err("days must name at least one weekday or \"any\"".into());
        }
        if raw.iter().any(|d| d.trim().eq_ignore_ascii_case("any")) {
            if raw.len() > 1 {
                return Err("\"any\" cannot be combined with specific weekdays".into());
            }
            return Ok(Self::Any);
        }

        let mut days = Vec::with_capacity(raw.len());
        for name in &raw {
            let day: Weekday = name
                .trim()
                .parse()
                .map_err(|_| format!("unknown weekday {name:?}"))?;
            if !days.contains(&day) {
                days.push(day);
            }
        }
        Ok(Self::Days(days))
    }
}

impl From<DayAffinity> for Vec<String> {
    fn from(affinity: DayAffinity) -> Self {
        match affinity {
            DayAffinity::Any => vec!["any".into()],
            DayAffinity::Days(days) => days
                .iter()
                .map(|d| d.to_string().to_lowercase())
                .collect(),
        }
    }
}

/// A research subject in the weekly rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    /// Stable identifier (used in front matter and logs).
    pub id: String,
    /// Human-readable title; the article slug is derived from it.
    pub title: String,
    /// Query sent to the search provider.
    pub search_query: String,
    /// Weekdays this topic runs on.
    #[serde(rename = "days")]
    pub day_affinity: DayAffinity,
    /// Higher runs first when several topics share a weekday.
    #[serde(default)]
    pub priority: i32,
}

/// The weekly rotation, loaded from `topics.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RotationTable {
    /// Optional cap on how many topics run on one day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_topics_per_day: Option<usize>,
    #[serde(default)]
    pub topics: Vec<Topic>,
}

// ---------------------------------------------------------------------------
// SourceDocument
// ---------------------------------------------------------------------------

/// A normalized, excerpted search result used as evidence for an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Normalized URL (unique key within one collection).
    pub url: String,
    pub title: String,
    /// Bounded excerpt (`chars().count() <= max_excerpt_chars`).
    pub excerpt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// 1-based provider rank; lower is better.
    pub rank: u32,
}

// ---------------------------------------------------------------------------
// Article
// ---------------------------------------------------------------------------

/// Whether an article was written from collected sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sourcing {
    Cited,
    Unavailable,
}

impl Sourcing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cited => "cited",
            Self::Unavailable => "unavailable",
        }
    }
}

/// One rendered research article, keyed by `(date, slug)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    /// Run date.
    pub date: NaiveDate,
    pub topic_id: String,
    pub title: String,
    pub slug: String,
    /// Markdown body (without front matter).
    pub body: String,
    /// Sources in rank order.
    pub sources: Vec<SourceDocument>,
    pub sourcing: Sourcing,
    pub created_at: DateTime<Utc>,
}

impl Article {
    /// File stem: `{date}-{slug}`.
    pub fn file_stem(&self) -> String {
        format!("{}-{}", self.date.format("%Y-%m-%d"), self.slug)
    }

    pub fn source_urls(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.url.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// FeedIndex
// ---------------------------------------------------------------------------

/// Metadata for one published article in `feed.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub date: NaiveDate,
    pub slug: String,
    pub topic_id: String,
    pub title: String,
    /// Path relative to the output directory (e.g. `articles/2025-01-06-ai-news.md`).
    pub path: String,
    /// Absolute URL on the site, if a base URL is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub source_count: usize,
    /// SHA-256 of the published Markdown file.
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

/// The `feed.json` catalog consumed by the static site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedIndex {
    pub schema_version: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub author: String,
    pub updated_at: DateTime<Utc>,
    /// Date-descending; unique by `(date, slug)`.
    #[serde(default)]
    pub entries: Vec<FeedEntry>,
}
