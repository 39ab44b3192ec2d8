//! Article Markdown: slugs, YAML front matter, and body cleanup.
//!
//! The completion provider returns raw Markdown. [`clean_body`] runs a
//! series of cleanup passes over it, [`slugify`] derives the file slug,
//! and [`render_document`] prepends front matter for the static site.

mod cleanup;

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};

use dailybrief_shared::Article;

/// Longest slug we produce, in characters.
pub const MAX_SLUG_CHARS: usize = 80;

/// Front matter `layout` value expected by the site theme.
pub const ARTICLE_LAYOUT: &str = "article";

// ---------------------------------------------------------------------------
// Slugs
// ---------------------------------------------------------------------------

/// Generate a URL-safe slug: lowercase, runs of non-alphanumerics become a
/// single hyphen, trimmed, at most [`MAX_SLUG_CHARS`] characters.
pub fn slugify(text: &str) -> String {
    let joined = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    let cut: String = joined.chars().take(MAX_SLUG_CHARS).collect();
    cut.trim_end_matches('-').to_string()
}

/// Slug for an article: from the title, else from the topic id.
pub fn article_slug(title: &str, topic_id: &str) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        slugify(topic_id)
    } else {
        slug
    }
}

// ---------------------------------------------------------------------------
// Body
// ---------------------------------------------------------------------------

/// Clean a completion body: unwrap a ```` ```markdown ```` fence, drop any
/// lead-in before the title, demote duplicate H1s, strip layout tags,
/// trim trailing whitespace, collapse blank lines, end with one newline.
#[instrument(skip(raw), fields(raw_len = raw.len()))]
pub fn clean_body(raw: &str) -> String {
    let cleaned = cleanup::run_pipeline(raw);
    debug!(
        cleaned_len = cleaned.len(),
        words = count_words(&cleaned),
        "body cleaned"
    );
    cleaned
}

/// Extract the title from the first H1 in the Markdown text.
pub fn extract_title(md: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid regex"));

    H1_RE
        .captures(md)
        .map(|c| c[1].trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Count words in Markdown body (excluding code blocks).
pub fn count_words(md: &str) -> usize {
    static CODE_BLOCK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid regex"));

    let without_code = CODE_BLOCK_RE.replace_all(md, "");
    without_code
        .split_whitespace()
        .filter(|w| !w.starts_with('#') || w.len() > 2)
        .count()
}

// ---------------------------------------------------------------------------
// Front matter
// ---------------------------------------------------------------------------

/// Build the YAML front matter block for an article.
pub fn build_front_matter(article: &Article, author: &str) -> String {
    let mut fm = String::from("---\n");
    fm.push_str(&format!("title: \"{}\"\n", escape_yaml_string(&article.title)));
    fm.push_str(&format!("date: {}\n", article.date.format("%Y-%m-%d")));
    fm.push_str(&format!("topic: {}\n", yaml_scalar(&article.topic_id)));
    fm.push_str(&format!("slug: {}\n", yaml_scalar(&article.slug)));
    fm.push_str(&format!("layout: {ARTICLE_LAYOUT}\n"));
    fm.push_str(&format!("author: \"{}\"\n", escape_yaml_string(author)));
    fm.push_str(&format!(
        "created_at: \"{}\"\n",
        article.created_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    ));
    fm.push_str(&format!("sourcing: {}\n", article.sourcing.as_str()));
    if article.sources.is_empty() {
        fm.push_str("sources: []\n");
    } else {
        fm.push_str("sources:\n");
        for url in article.source_urls() {
            fm.push_str(&format!("  - \"{}\"\n", escape_yaml_string(url)));
        }
    }
    fm.push_str("---\n");
    fm
}

/// Full article file: front matter, a blank line, then the body.
pub fn render_document(article: &Article, author: &str) -> String {
    let frontmatter = build_front_matter(article, author);
    format!("{frontmatter}\n{}", article.body)
}

/// Escape special characters in a double-quoted YAML string value.
fn escape_yaml_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', " ")
}

/// Plain scalar when safe, quoted otherwise.
fn yaml_scalar(s: &str) -> String {
    static PLAIN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid regex"));

    if PLAIN_RE.is_match(s) {
        s.to_string()
    } else {
        format!("\"{}\"", escape_yaml_string(s))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use dailybrief_shared::{SourceDocument, Sourcing};

    fn article(sources: Vec<SourceDocument>) -> Article {
        Article {
            date: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            topic_id: "ai-news".into(),
            title: "AI News: \"Agents\" everywhere".into(),
            slug: "ai-news".into(),
            body: "# AI News\n\nBody [1]\n".into(),
            sourcing: if sources.is_empty() {
                Sourcing::Unavailable
            } else {
                Sourcing::Cited
            },
            sources,
            created_at: Utc.with_ymd_and_hms(2025, 1, 6, 6, 0, 0).unwrap(),
        }
    }

    fn source(url: &str) -> SourceDocument {
        SourceDocument {
            url: url.into(),
            title: "t".into(),
            excerpt: "e".into(),
            published_at: None,
            rank: 1,
        }
    }

    #[test]
    fn slugify_basic() {
        assert_eq!(slugify("AI News"), "ai-news");
        assert_eq!(slugify("  Rust & WebAssembly: 2025!  "), "rust-webassembly-2025");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn slugify_caps_length_without_trailing_hyphen() {
        let long = "word ".repeat(40);
        let slug = slugify(&long);
        assert!(slug.chars().count() <= MAX_SLUG_CHARS);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn article_slug_falls_back_to_id() {
        assert_eq!(article_slug("!!!", "weekly-roundup"), "weekly-roundup");
        assert_eq!(article_slug("Quantum Computing", "qc"), "quantum-computing");
    }

    #[test]
    fn extract_title_finds_first_h1() {
        assert_eq!(
            extract_title("intro\n# First\n## Sub\n# Second").as_deref(),
            Some("First")
        );
        assert_eq!(extract_title("## Only H2"), None);
    }

    #[test]
    fn front_matter_fields() {
        let fm = build_front_matter(
            &article(vec![source("https://a.example/1"), source("https://b.example/2")]),
            "Editorial",
        );
        assert!(fm.starts_with("---\n"));
        assert!(fm.ends_with("---\n"));
        assert!(fm.contains("title: \"AI News: \\\"Agents\\\" everywhere\"\n"));
        assert!(fm.contains("date: 2025-01-06\n"));
        assert!(fm.contains("topic: ai-news\n"));
        assert!(fm.contains("slug: ai-news\n"));
        assert!(fm.contains("layout: article\n"));
        assert!(fm.contains("author: \"Editorial\"\n"));
        assert!(fm.contains("created_at: \"2025-01-06T06:00:00Z\"\n"));
        assert!(fm.contains("sourcing: cited\n"));
        assert!(fm.contains("  - \"https://a.example/1\"\n"));
    }

    #[test]
    fn front_matter_without_sources() {
        let fm = build_front_matter(&article(vec![]), "");
        assert!(fm.contains("sourcing: unavailable\n"));
        assert!(fm.contains("sources: []\n"));
    }

    #[test]
    fn yaml_scalar_quotes_when_needed() {
        assert_eq!(yaml_scalar("ai-news"), "ai-news");
        assert_eq!(yaml_scalar("a: b"), "\"a: b\"");
    }

    #[test]
    fn render_document_joins_front_matter_and_body() {
        let doc = render_document(&article(vec![]), "x");
        assert!(doc.contains("---\n\n# AI News\n"));
        assert!(doc.ends_with("Body [1]\n"));
    }

    #[test]
    fn clean_body_and_count_words() {
        let body = clean_body("# Title\n\nOne two three.\n\n```\nnot counted\n```\n");
        assert_eq!(extract_title(&body).as_deref(), Some("Title"));
        assert_eq!(count_words(&body), 4);
    }
}
