//! Prompt construction for article synthesis.
//!
//! Everything here is pure and deterministic given the topic, the sources,
//! and the options, so prompts can be asserted on directly in tests.

use std::fmt::Write as _;

use dailybrief_shared::{CompletionConfig, SourceDocument, Topic};

/// Characters per token used by the prompt size estimate.
const CHARS_PER_TOKEN: usize = 4;

const SYSTEM_PROMPT: &str = "You are a senior research analyst who writes concise, decision-grade \
research briefs for executives. Use only the supplied sources. Name concrete companies, products, \
figures, regulations and dates. Attach a bracketed source number such as [2] to every factual \
claim, number and date. Move weakly supported points to the uncertainty section instead of \
asserting them. Output only the finished article in Markdown, without preamble or reasoning.";

/// Knobs that shape the prompt text.
#[derive(Debug, Clone)]
pub struct PromptOptions {
    pub target_words: usize,
    /// Output language tag (e.g. `en`, `ja`).
    pub language: String,
}

impl From<&CompletionConfig> for PromptOptions {
    fn from(config: &CompletionConfig) -> Self {
        Self {
            target_words: config.target_words,
            language: config.language.clone(),
        }
    }
}

/// A rendered prompt: one system message and one user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    /// Estimated size of the whole prompt in tokens.
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.system) + estimate_tokens(&self.user)
    }
}

/// `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Build the synthesis prompt from the first `sources.len()` sources,
/// with every excerpt cut to `excerpt_chars` characters.
pub fn build_prompt(
    topic: &Topic,
    sources: &[SourceDocument],
    excerpt_chars: usize,
    opts: &PromptOptions,
) -> Prompt {
    let mut user = String::new();

    let _ = writeln!(user, "# Topic\n{}\n", topic.title);
    let _ = writeln!(user, "Search focus: {}\n", topic.search_query);

    if sources.is_empty() {
        user.push_str(
            "# Sources\nNo sources could be collected for this topic today.\n\
             State plainly at the start of the article that sourcing was unavailable, \
             keep claims general, and do not invent citations or URLs.\n\n",
        );
    } else {
        let _ = writeln!(user, "# Sources ({})", sources.len());
        for (i, doc) in sources.iter().enumerate() {
            let excerpt: String = doc.excerpt.chars().take(excerpt_chars).collect();
            let _ = writeln!(user, "[{}] {} — {}", i + 1, doc.title, doc.url);
            if let Some(published) = doc.published_at {
                let _ = writeln!(user, "Published: {}", published.format("%Y-%m-%d"));
            }
            let _ = writeln!(user, "Excerpt:\n{excerpt}\n");
        }
    }

    let _ = writeln!(
        user,
        "# Output requirements\n\
         - Format: Markdown, written in language `{lang}`, about {words} words.\n\
         - Structure, in this order:\n\
         1. `# ` title (one H1 only)\n\
         2. `## Executive Summary`: the conclusion and why it matters now\n\
         3. `## Background`\n\
         4. three to five `## ` thematic sections with specifics and comparisons\n\
         5. `## Counterpoints & Uncertainty`: data gaps and plausible alternative outcomes\n\
         6. `## Outlook`\n\
         7. `## Key Takeaways`: a short bullet list\n\
         8. `## Sources`: a numbered list mapping each [n] to its URL\n\
         - Every factual claim, number, date, company or regulation carries an [n] citation \
         matching the numbered sources above.",
        lang = opts.language,
        words = opts.target_words,
    );

    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dailybrief_shared::DayAffinity;

    fn topic() -> Topic {
        Topic {
            id: "ai-news".into(),
            title: "AI News".into(),
            search_query: "AI industry news".into(),
            day_affinity: DayAffinity::Any,
            priority: 0,
        }
    }

    fn doc(n: u32, excerpt: &str) -> SourceDocument {
        SourceDocument {
            url: format!("https://s{n}.example/a"),
            title: format!("Source {n}"),
            excerpt: excerpt.into(),
            published_at: None,
            rank: n,
        }
    }

    fn opts() -> PromptOptions {
        PromptOptions {
            target_words: 1200,
            language: "en".into(),
        }
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("日本語"), 1);
    }

    #[test]
    fn numbers_sources_and_requires_citations() {
        let p = build_prompt(&topic(), &[doc(1, "alpha"), doc(2, "beta")], 100, &opts());
        assert!(p.user.contains("[1] Source 1 — https://s1.example/a"));
        assert!(p.user.contains("[2] Source 2 — https://s2.example/a"));
        assert!(p.user.contains("## Sources"));
        assert!(p.user.contains("[n] citation"));
        assert!(p.system.contains("senior research analyst"));
    }

    #[test]
    fn excerpts_are_cut_to_limit() {
        let p = build_prompt(&topic(), &[doc(1, &"x".repeat(500))], 10, &opts());
        assert!(p.user.contains(&format!("Excerpt:\n{}\n", "x".repeat(10))));
        assert!(!p.user.contains(&"x".repeat(11)));
    }

    #[test]
    fn empty_sources_note_unavailable_sourcing() {
        let p = build_prompt(&topic(), &[], 100, &opts());
        assert!(p.user.contains("sourcing was unavailable"));
    }

    #[test]
    fn deterministic() {
        let sources = [doc(1, "alpha")];
        assert_eq!(
            build_prompt(&topic(), &sources, 50, &opts()),
            build_prompt(&topic(), &sources, 50, &opts())
        );
    }
}
