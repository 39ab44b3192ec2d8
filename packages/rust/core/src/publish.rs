//! Article rendering and publishing.
//!
//! Publishing happens under a lock file in the output directory. The
//! article is written to a hidden temp file and renamed into place, then
//! the feed index is re-read, updated, and rewritten the same way.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};

use dailybrief_markdown::{article_slug, render_document};
use dailybrief_shared::{
    AppConfig, Article, DailyBriefError, FeedEntry, Result, SiteConfig, Topic,
};

use crate::feed::{self, FEED_JSON, FEED_XML};
use crate::synthesis::SynthesizedBody;

pub const LOCK_FILE: &str = ".publish.lock";

/// Build the article for `topic` on `run_date`.
///
/// The slug comes from the topic title (falling back to its id), so a
/// topic maps to the same file on a given day whatever the model titles it.
pub fn render(
    topic: &Topic,
    body: SynthesizedBody,
    run_date: NaiveDate,
    created_at: DateTime<Utc>,
) -> Article {
    Article {
        date: run_date,
        topic_id: topic.id.clone(),
        title: body.title,
        slug: article_slug(&topic.title, &topic.id),
        body: body.body,
        sources: body.sources,
        sourcing: body.sourcing,
        created_at,
    }
}

/// Where a published article ended up.
#[derive(Debug, Clone)]
pub struct PublishedArticle {
    pub path: PathBuf,
    pub entry: FeedEntry,
}

/// Writes articles and the feed into an output directory.
#[derive(Debug, Clone)]
pub struct Publisher {
    output_dir: PathBuf,
    articles_subdir: String,
    site: SiteConfig,
    lock_stale: Duration,
}

impl Publisher {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        articles_subdir: impl Into<String>,
        site: SiteConfig,
        lock_stale: Duration,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            articles_subdir: articles_subdir.into(),
            site,
            lock_stale,
        }
    }

    pub fn from_config(output_dir: impl Into<PathBuf>, config: &AppConfig) -> Self {
        Self::new(
            output_dir,
            config.defaults.articles_subdir.clone(),
            config.site.clone(),
            Duration::from_secs(config.publish.lock_stale_secs),
        )
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn articles_dir(&self) -> PathBuf {
        self.output_dir.join(&self.articles_subdir)
    }

    pub fn feed_path(&self) -> PathBuf {
        self.output_dir.join(FEED_JSON)
    }

    /// `{articles_dir}/{date}-{slug}.md`
    pub fn article_path(&self, article: &Article) -> PathBuf {
        self.articles_dir()
            .join(format!("{}.md", article.file_stem()))
    }

    fn relative_path(&self, article: &Article) -> String {
        let subdir = self.articles_subdir.trim_matches('/');
        if subdir.is_empty() {
            format!("{}.md", article.file_stem())
        } else {
            format!("{subdir}/{}.md", article.file_stem())
        }
    }

    /// Write `article` and record it in the feed.
    ///
    /// Publishing the same `(date, slug)` again overwrites the file and
    /// replaces its feed entry. If a feed write fails, the article and
    /// `feed.json` are put back as they were.
    #[instrument(skip_all, fields(topic = %article.topic_id, slug = %article.slug, date = %article.date))]
    pub fn publish(&self, article: &Article) -> Result<PublishedArticle> {
        let articles_dir = self.articles_dir();
        std::fs::create_dir_all(&articles_dir)
            .map_err(|e| DailyBriefError::render(&articles_dir, e))?;

        let _lock = PublishLock::acquire(&self.output_dir, self.lock_stale)?;

        let document = render_document(article, &self.site.author);
        let path = self.article_path(article);
        let rel_path = self.relative_path(article);
        let entry = FeedEntry {
            date: article.date,
            slug: article.slug.clone(),
            topic_id: article.topic_id.clone(),
            title: article.title.clone(),
            url: feed::article_url(&self.site.base_url, &rel_path),
            path: rel_path,
            source_count: article.sources.len(),
            sha256: feed::sha256_hex(document.as_bytes()),
            created_at: article.created_at,
        };

        // The feed update is computed before anything is written.
        let feed_path = self.feed_path();
        let mut index = feed::load_feed(&feed_path, &self.site)?;
        feed::upsert(&mut index, entry.clone());
        index.updated_at = Utc::now();
        let rss = feed::render_rss(&index)?;

        let previous_article = std::fs::read(&path).ok();
        let previous_feed = std::fs::read(&feed_path).ok();

        write_atomic(&path, document.as_bytes())?;
        debug!(path = %path.display(), bytes = document.len(), "wrote article");

        let feeds = write_json(&feed_path, &index)
            .and_then(|()| write_atomic(&self.output_dir.join(FEED_XML), rss.as_bytes()));
        if let Err(err) = feeds {
            warn!(path = %path.display(), error = %err, "feed write failed, rolling back article");
            restore(&path, previous_article.as_deref());
            restore(&feed_path, previous_feed.as_deref());
            return Err(err);
        }

        info!(
            path = %path.display(),
            feed_entries = index.entries.len(),
            "article published"
        );
        Ok(PublishedArticle { path, entry })
    }
}

// ---------------------------------------------------------------------------
// Publish lock
// ---------------------------------------------------------------------------

/// Exclusive lock on an output directory, released on drop.
#[derive(Debug)]
pub struct PublishLock {
    path: PathBuf,
}

impl PublishLock {
    /// Create `.publish.lock` with `create_new`. A lock older than `stale`
    /// is assumed abandoned and replaced once.
    pub fn acquire(dir: &Path, stale: Duration) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| DailyBriefError::render(dir, e))?;
        let path = dir.join(LOCK_FILE);

        match Self::create(&path) {
            Ok(lock) => return Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(DailyBriefError::render(&path, e)),
        }

        let age = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .map(|modified| {
                SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or_default()
            })
            .map_err(|e| DailyBriefError::render(&path, e))?;
        if age < stale {
            return Err(DailyBriefError::render_msg(
                &path,
                format!(
                    "another publish holds the lock (age {}s); remove it if no run is active",
                    age.as_secs()
                ),
            ));
        }

        warn!(path = %path.display(), age_secs = age.as_secs(), "replacing stale publish lock");
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(DailyBriefError::render(&path, e)),
        }
        Self::create(&path).map_err(|e| DailyBriefError::render(&path, e))
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let _ = writeln!(file, "pid={} at={}", std::process::id(), Utc::now().to_rfc3339());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PublishLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release publish lock");
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Write to `.{name}.tmp` beside `path`, then rename over it.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DailyBriefError::render_msg(path, "path has no file name"))?;
    let temp = dir.join(format!(".{name}.tmp"));

    std::fs::write(&temp, contents).map_err(|e| DailyBriefError::render(&temp, e))?;
    if let Err(e) = std::fs::rename(&temp, path) {
        let _ = std::fs::remove_file(&temp);
        return Err(DailyBriefError::render(path, e));
    }
    Ok(())
}

/// Write a pretty-printed JSON file atomically.
/// Put back what was at `path` before a failed publish.
fn restore(path: &Path, previous: Option<&[u8]>) {
    let outcome = match previous {
        Some(bytes) => write_atomic(path, bytes),
        None => std::fs::remove_file(path).map_err(|e| DailyBriefError::render(path, e)),
    };
    if let Err(e) = outcome {
        warn!(path = %path.display(), error = %e, "rollback failed");
    }
}

fn write_json<T: serde::Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(|e| {
        DailyBriefError::render_msg(path, format!("JSON serialization failed: {e}"))
    })?;
    write_atomic(path, json.as_bytes())?;
    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dailybrief_shared::{DayAffinity, SourceDocument, Sourcing};

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("db-publish-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn topic() -> Topic {
        Topic {
            id: "ai-news".into(),
            title: "AI News".into(),
            search_query: "AI industry news".into(),
            day_affinity: DayAffinity::Any,
            priority: 0,
        }
    }

    fn body(text: &str) -> SynthesizedBody {
        SynthesizedBody {
            title: "Chips Rally".into(),
            body: text.into(),
            sourcing: Sourcing::Cited,
            sources: vec![SourceDocument {
                url: "https://a.example/1".into(),
                title: "One".into(),
                excerpt: "x".into(),
                published_at: None,
                rank: 1,
            }],
            model: "fake".into(),
        }
    }

    fn article(text: &str) -> Article {
        render(
            &topic(),
            body(text),
            NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 6, 6, 0, 0).unwrap(),
        )
    }

    fn publisher(dir: &Path) -> Publisher {
        let site = SiteConfig {
            author: "Desk".into(),
            base_url: "https://brief.example".into(),
            ..SiteConfig::default()
        };
        Publisher::new(dir, "articles", site, Duration::from_secs(600))
    }

    #[test]
    fn render_uses_topic_slug() {
        let a = article("# Chips Rally\n");
        assert_eq!(a.slug, "ai-news");
        assert_eq!(a.title, "Chips Rally");
        assert_eq!(a.topic_id, "ai-news");
        assert_eq!(a.file_stem(), "2025-01-06-ai-news");
    }

    #[test]
    fn publish_writes_article_and_feeds() {
        let tmp = temp_dir();
        let published = publisher(&tmp).publish(&article("# Chips Rally\n\nBody.\n")).unwrap();

        assert_eq!(published.path, tmp.join("articles/2025-01-06-ai-news.md"));
        let doc = std::fs::read_to_string(&published.path).unwrap();
        assert!(doc.starts_with("---\ntitle: \"Chips Rally\""));
        assert!(doc.contains("topic: ai-news\n"));
        assert!(doc.contains("author: \"Desk\""));
        assert!(doc.ends_with("Body.\n"));

        assert_eq!(published.entry.path, "articles/2025-01-06-ai-news.md");
        assert_eq!(published.entry.sha256, feed::sha256_hex(doc.as_bytes()));
        assert!(tmp.join(FEED_XML).exists());
        assert!(!tmp.join(LOCK_FILE).exists());
        assert!(!tmp.join("articles/.2025-01-06-ai-news.md.tmp").exists());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn republishing_same_key_overwrites() {
        let tmp = temp_dir();
        let p = publisher(&tmp);
        p.publish(&article("# First\n")).unwrap();
        p.publish(&article("# Second\n")).unwrap();

        let files: Vec<_> = std::fs::read_dir(tmp.join("articles"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(files.len(), 1);
        let doc = std::fs::read_to_string(tmp.join("articles/2025-01-06-ai-news.md")).unwrap();
        assert!(doc.contains("# Second"));

        let index = feed::load_feed(&p.feed_path(), &SiteConfig::default()).unwrap();
        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.entries[0].sha256, feed::sha256_hex(doc.as_bytes()));
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn held_lock_rejects_publish() {
        let tmp = temp_dir();
        let _held = PublishLock::acquire(&tmp, Duration::from_secs(600)).unwrap();

        let err = publisher(&tmp).publish(&article("# A\n")).unwrap_err();
        assert!(matches!(err, DailyBriefError::Render { .. }));
        assert!(err.to_string().contains("holds the lock"));
        assert!(!tmp.join("articles/2025-01-06-ai-news.md").exists());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn corrupt_feed_leaves_no_article() {
        let tmp = temp_dir();
        std::fs::write(tmp.join(feed::FEED_JSON), "{not json").unwrap();

        let err = publisher(&tmp).publish(&article("# A\n")).unwrap_err();
        assert!(matches!(err, DailyBriefError::Render { .. }));
        assert!(!tmp.join("articles/2025-01-06-ai-news.md").exists());
        assert_eq!(
            std::fs::read_to_string(tmp.join(feed::FEED_JSON)).unwrap(),
            "{not json"
        );
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn failed_rss_write_restores_previous_state() {
        let tmp = temp_dir();
        let p = publisher(&tmp);
        p.publish(&article("# First\n\nOriginal body.\n")).unwrap();
        let path = tmp.join("articles/2025-01-06-ai-news.md");
        let article_before = std::fs::read_to_string(&path).unwrap();
        let feed_before = std::fs::read_to_string(tmp.join(feed::FEED_JSON)).unwrap();

        // A directory where feed.xml should go makes the final rename fail.
        std::fs::remove_file(tmp.join(FEED_XML)).unwrap();
        std::fs::create_dir(tmp.join(FEED_XML)).unwrap();

        let err = p.publish(&article("# Second\n\nReplacement body.\n")).unwrap_err();
        assert!(matches!(err, DailyBriefError::Render { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), article_before);
        assert_eq!(
            std::fs::read_to_string(tmp.join(feed::FEED_JSON)).unwrap(),
            feed_before
        );

        // A first-time publish that fails removes the new file.
        let mut other = article("# Other\n");
        other.slug = "chips".into();
        assert!(p.publish(&other).is_err());
        assert!(!tmp.join("articles/2025-01-06-chips.md").exists());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn stale_lock_is_replaced() {
        let tmp = temp_dir();
        std::fs::write(tmp.join(LOCK_FILE), "pid=1").unwrap();

        let lock = PublishLock::acquire(&tmp, Duration::ZERO).unwrap();
        assert!(tmp.join(LOCK_FILE).exists());
        drop(lock);
        assert!(!tmp.join(LOCK_FILE).exists());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn write_atomic_replaces_contents() {
        let tmp = temp_dir();
        let path = tmp.join("x.txt");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        assert!(!tmp.join(".x.txt.tmp").exists());
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
