//! The feed index (`feed.json`) and its RSS rendering (`feed.xml`).
//!
//! The index is re-read from disk on every publish, updated, and written
//! back. Nothing here is cached across runs.

use std::path::Path;

use chrono::{DateTime, Utc};
use rss::{Category, Channel, Guid, Item};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use dailybrief_shared::{
    CURRENT_SCHEMA_VERSION, DailyBriefError, FeedEntry, FeedIndex, Result, SiteConfig,
};

pub const FEED_JSON: &str = "feed.json";
pub const FEED_XML: &str = "feed.xml";

/// Empty index carrying the site metadata.
pub fn empty_index(site: &SiteConfig, now: DateTime<Utc>) -> FeedIndex {
    FeedIndex {
        schema_version: CURRENT_SCHEMA_VERSION,
        title: site.title.clone(),
        description: site.description.clone(),
        base_url: site.base_url.clone(),
        author: site.author.clone(),
        updated_at: now,
        entries: Vec::new(),
    }
}

/// Read `feed.json`. A missing file is an empty index; a corrupt one is an error.
///
/// Site metadata is refreshed from `site` so config edits show up on the next publish.
pub fn load_feed(path: &Path, site: &SiteConfig) -> Result<FeedIndex> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no feed index yet");
            return Ok(empty_index(site, Utc::now()));
        }
        Err(e) => return Err(DailyBriefError::render(path, e)),
    };

    let mut index: FeedIndex = serde_json::from_str(&content)
        .map_err(|e| DailyBriefError::render_msg(path, format!("invalid feed index: {e}")))?;
    if index.schema_version > CURRENT_SCHEMA_VERSION {
        return Err(DailyBriefError::render_msg(
            path,
            format!(
                "feed index schema {} is newer than supported {}",
                index.schema_version, CURRENT_SCHEMA_VERSION
            ),
        ));
    }
    index.schema_version = CURRENT_SCHEMA_VERSION;
    index.title = site.title.clone();
    index.description = site.description.clone();
    index.base_url = site.base_url.clone();
    index.author = site.author.clone();
    sort_entries(&mut index.entries);
    Ok(index)
}

/// Replace the entry with the same `(date, slug)`, or insert it.
pub fn upsert(index: &mut FeedIndex, entry: FeedEntry) {
    index
        .entries
        .retain(|e| !(e.date == entry.date && e.slug == entry.slug));
    index.entries.push(entry);
    sort_entries(&mut index.entries);
}

/// Date descending, then slug ascending.
pub fn sort_entries(entries: &mut [FeedEntry]) {
    entries.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.slug.cmp(&b.slug)));
}

/// Public URL for an article path, if the site has a base URL.
///
/// `articles/2025-01-06-ai-news.md` becomes `{base}/articles/2025-01-06-ai-news.html`.
pub fn article_url(base_url: &str, rel_path: &str) -> Option<String> {
    let base = base_url.trim().trim_end_matches('/');
    if base.is_empty() {
        return None;
    }
    let page = rel_path.strip_suffix(".md").unwrap_or(rel_path);
    Some(format!("{base}/{page}.html"))
}

/// Lowercase hex SHA-256.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Render the index as an RSS 2.0 channel.
#[instrument(skip_all, fields(entries = index.entries.len()))]
pub fn render_rss(index: &FeedIndex) -> Result<String> {
    let items: Vec<Item> = index.entries.iter().map(rss_item).collect();

    let mut channel = Channel::default();
    channel.set_title(index.title.clone());
    channel.set_link(index.base_url.clone());
    channel.set_description(if index.description.is_empty() {
        index.title.clone()
    } else {
        index.description.clone()
    });
    channel.set_last_build_date(Some(index.updated_at.to_rfc2822()));
    channel.set_generator(Some(format!("dailybrief {}", env!("CARGO_PKG_VERSION"))));
    channel.set_items(items);

    let bytes = channel
        .write_to(Vec::new())
        .map_err(|e| DailyBriefError::render_msg(FEED_XML, format!("RSS write failed: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| DailyBriefError::render_msg(FEED_XML, format!("RSS is not UTF-8: {e}")))
}

fn rss_item(entry: &FeedEntry) -> Item {
    let mut guid = Guid::default();
    match &entry.url {
        Some(url) => {
            guid.set_value(url.clone());
            guid.set_permalink(true);
        }
        None => {
            guid.set_value(format!("{}-{}", entry.date.format("%Y-%m-%d"), entry.slug));
            guid.set_permalink(false);
        }
    }

    let mut category = Category::default();
    category.set_name(entry.topic_id.clone());

    let mut item = Item::default();
    item.set_title(Some(entry.title.clone()));
    item.set_link(entry.url.clone());
    item.set_guid(Some(guid));
    item.set_pub_date(Some(entry.created_at.to_rfc2822()));
    item.set_categories(vec![category]);
    item.set_description(Some(format!(
        "{} ({} sources)",
        entry.title, entry.source_count
    )));
    item
}
