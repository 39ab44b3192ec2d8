//! Cleanup pipeline for model-written Markdown.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! The pipeline removes wrapper noise the model adds around the article and
//! normalizes headings and whitespace.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on a completion body.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = md.replace("\r\n", "\n");

    result = strip_wrapping_fence(&result);
    result = strip_preamble(&result);
    result = normalize_headings(&result);
    result = strip_leftover_html(&result);
    result = normalize_whitespace(&result);
    result = clean_blank_lines(&result);
    result = ensure_trailing_newline(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Strip a wrapping code fence
// ---------------------------------------------------------------------------

/// Unwrap a body the model returned inside a single ```` ```markdown ```` fence.
fn strip_wrapping_fence(md: &str) -> String {
    static OPEN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^```(?:markdown|md)?\s*$").expect("valid regex"));

    let trimmed = md.trim();
    let mut lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() < 2 {
        return md.to_string();
    }
    let first = lines[0].trim();
    let last = lines[lines.len() - 1].trim();
    if !OPEN_RE.is_match(first) || last != "```" {
        return md.to_string();
    }

    // An inner fence means the outer pair is not a wrapper.
    let inner_fences = lines[1..lines.len() - 1]
        .iter()
        .filter(|l| l.trim_start().starts_with("```"))
        .count();
    if inner_fences % 2 != 0 {
        return md.to_string();
    }

    lines.pop();
    lines.remove(0);
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Drop chatter before the title
// ---------------------------------------------------------------------------

/// Drop a short conversational lead-in ("Here is the article:") before the first H1.
fn strip_preamble(md: &str) -> String {
    let lines: Vec<&str> = md.lines().collect();
    let Some(h1) = lines.iter().position(|l| l.starts_with("# ")) else {
        return md.to_string();
    };
    let lead: Vec<&&str> = lines[..h1].iter().filter(|l| !l.trim().is_empty()).collect();
    if lead.is_empty() || lead.len() > 2 || lead.iter().any(|l| l.starts_with('#')) {
        return md.to_string();
    }
    lines[h1..].join("\n")
}

// ---------------------------------------------------------------------------
// Pass 3: Normalize heading levels
// ---------------------------------------------------------------------------

/// Ensure there's at most one H1; later H1s are demoted to H2.
fn normalize_headings(md: &str) -> String {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^#\s+(.+)$").expect("valid regex"));

    let mut seen_h1 = false;
    let mut in_code_block = false;
    let mut lines: Vec<String> = Vec::new();

    for line in md.lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
        }
        if !in_code_block {
            if let Some(caps) = H1_RE.captures(line) {
                if seen_h1 {
                    lines.push(format!("## {}", &caps[1]));
                    continue;
                }
                seen_h1 = true;
            }
        }
        lines.push(line.to_string());
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 4: Strip leftover HTML wrappers
// ---------------------------------------------------------------------------

/// Remove stray layout tags outside code blocks, keeping their text.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?(?:div|span|section|article|aside|header|footer)(?:\s[^>]*)?>")
            .expect("valid regex")
    });

    let mut in_code_block = false;
    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
                return line.to_string();
            }
            if in_code_block {
                line.to_string()
            } else {
                HTML_TAG_RE.replace_all(line, "").to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 5: Normalize whitespace
// ---------------------------------------------------------------------------

/// Trim trailing whitespace on every line.
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 6: Collapse blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of blank lines into a single blank line.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE
        .replace_all(md.trim_start_matches('\n'), "\n\n")
        .to_string()
}

// ---------------------------------------------------------------------------
// Pass 7: Ensure trailing newline
// ---------------------------------------------------------------------------

/// Ensure the file ends with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_end_matches('\n');
    format!("{trimmed}\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
