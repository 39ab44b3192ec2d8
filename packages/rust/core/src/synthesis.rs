//! Content synthesis: fit the sources into the context budget, call the
//! completion provider, and clean up what comes back.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use dailybrief_markdown::{clean_body, count_words, extract_title};
use dailybrief_shared::{
    Clock, CompletionConfig, DailyBriefError, ProviderError, Result, RetryError, RetryPolicy,
    SourceDocument, Sourcing, Topic, retry,
};

use crate::completion::CompletionProvider;
use crate::prompt::{Prompt, PromptOptions, build_prompt};

/// Notice placed at the top of an article written without sources.
pub const NO_SOURCES_NOTICE: &str = "> **Note:** No sources could be collected for this topic today. \
This brief was written without citations and should be read as background only.";

/// Size parameters of one synthesis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    /// How many of the rank-ordered sources go into the prompt.
    pub source_count: usize,
    /// Per-source excerpt cap in characters.
    pub excerpt_chars: usize,
}

/// Budget knobs, taken from `[completion]`.
#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    pub context_budget_tokens: usize,
    pub min_excerpt_chars: usize,
    pub max_sources: usize,
    pub prompt: PromptOptions,
}

impl From<&CompletionConfig> for SynthesisOptions {
    fn from(config: &CompletionConfig) -> Self {
        Self {
            context_budget_tokens: config.context_budget_tokens,
            min_excerpt_chars: config.min_excerpt_chars,
            max_sources: config.max_sources,
            prompt: PromptOptions::from(config),
        }
    }
}

/// One step down the budget ladder.
///
/// Halve the excerpt cap until it reaches `min_excerpt_chars`, then drop
/// the lowest-ranked source until one is left. `None` when nothing is left
/// to shrink.
pub fn shrink_step(shape: Shape, min_excerpt_chars: usize) -> Option<Shape> {
    if shape.source_count == 0 {
        return None;
    }
    if shape.excerpt_chars > min_excerpt_chars {
        return Some(Shape {
            excerpt_chars: (shape.excerpt_chars / 2).max(min_excerpt_chars),
            ..shape
        });
    }
    if shape.source_count > 1 {
        return Some(Shape {
            source_count: shape.source_count - 1,
            ..shape
        });
    }
    None
}

/// Starting shape: at most `max_sources` sources, excerpts uncut.
pub fn initial_shape(sources: &[SourceDocument], max_sources: usize) -> Shape {
    let source_count = sources.len().min(max_sources);
    let excerpt_chars = sources[..source_count]
        .iter()
        .map(|s| s.excerpt.chars().count())
        .max()
        .unwrap_or(0);
    Shape {
        source_count,
        excerpt_chars,
    }
}

/// Walk the ladder from `start` until the prompt fits the budget.
pub fn fit_from(
    start: Shape,
    topic: &Topic,
    sources: &[SourceDocument],
    opts: &SynthesisOptions,
) -> Result<(Shape, Prompt)> {
    let mut shape = start;
    loop {
        let prompt = build_prompt(
            topic,
            &sources[..shape.source_count],
            shape.excerpt_chars,
            &opts.prompt,
        );
        let required = prompt.estimated_tokens();
        if required <= opts.context_budget_tokens {
            return Ok((shape, prompt));
        }
        match shrink_step(shape, opts.min_excerpt_chars) {
            Some(next) => {
                debug!(?shape, ?next, required, "prompt over budget, shrinking");
                shape = next;
            }
            None => {
                return Err(DailyBriefError::ContextBudgetExceeded {
                    required,
                    budget: opts.context_budget_tokens,
                });
            }
        }
    }
}

/// Build the largest prompt that fits the context budget.
pub fn fit_to_budget(
    topic: &Topic,
    sources: &[SourceDocument],
    opts: &SynthesisOptions,
) -> Result<(Shape, Prompt)> {
    fit_from(initial_shape(sources, opts.max_sources), topic, sources, opts)
}

/// A cleaned article body ready to render.
#[derive(Debug, Clone)]
pub struct SynthesizedBody {
    pub title: String,
    pub body: String,
    pub sourcing: Sourcing,
    /// The sources that actually went into the prompt, in rank order.
    pub sources: Vec<SourceDocument>,
    pub model: String,
}

/// Turns a topic and its sources into an article body.
pub struct ContentSynthesizer {
    provider: Arc<dyn CompletionProvider>,
    options: SynthesisOptions,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl ContentSynthesizer {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        options: SynthesisOptions,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            options,
            policy,
            clock,
        }
    }

    /// Synthesize an article body for `topic`.
    ///
    /// Never fails because `sources` is empty; the body then carries
    /// [`NO_SOURCES_NOTICE`] and `Sourcing::Unavailable`.
    #[instrument(skip_all, fields(topic = %topic.id, sources = sources.len(), provider = self.provider.name()))]
    pub async fn synthesize(
        &self,
        topic: &Topic,
        sources: &[SourceDocument],
    ) -> Result<SynthesizedBody> {
        let (mut shape, mut prompt) = fit_to_budget(topic, sources, &self.options)?;

        let completion = loop {
            match self.complete_with_retry(&prompt).await {
                Ok(completion) => break completion,
                Err(RetryError {
                    last: ProviderError::PromptTooLarge(msg),
                    ..
                }) => {
                    let Some(next) = shrink_step(shape, self.options.min_excerpt_chars) else {
                        return Err(DailyBriefError::ContextBudgetExceeded {
                            required: prompt.estimated_tokens(),
                            budget: self.options.context_budget_tokens,
                        });
                    };
                    warn!(?shape, ?next, error = %msg, "provider rejected prompt as too large");
                    (shape, prompt) = fit_from(next, topic, sources, &self.options)?;
                }
                Err(err) => return Err(DailyBriefError::synthesis(err.to_string())),
            }
        };

        let used = sources[..shape.source_count].to_vec();
        let body = finish_body(&completion.text, &used)?;
        let title = extract_title(&body).unwrap_or_else(|| topic.title.clone());
        let sourcing = if used.is_empty() {
            Sourcing::Unavailable
        } else {
            Sourcing::Cited
        };

        info!(
            model = %completion.model,
            words = count_words(&body),
            source_count = used.len(),
            excerpt_chars = shape.excerpt_chars,
            sourcing = sourcing.as_str(),
            "article synthesized"
        );

        Ok(SynthesizedBody {
            title,
            body,
            sourcing,
            sources: used,
            model: completion.model,
        })
    }

    async fn complete_with_retry(
        &self,
        prompt: &Prompt,
    ) -> std::result::Result<crate::completion::Completion, RetryError> {
        let provider = self.provider.as_ref();
        retry(&self.policy, self.clock.as_ref(), "synthesis", |_| {
            provider.complete(prompt)
        })
        .await
    }
}

/// Clean the raw completion and make sure the sources are listed.
fn finish_body(raw: &str, sources: &[SourceDocument]) -> Result<String> {
    let cleaned = clean_body(raw);

    if sources.is_empty() {
        return Ok(format!("{NO_SOURCES_NOTICE}\n\n{cleaned}").trim_end().to_string() + "\n");
    }
    if cleaned.trim().is_empty() {
        return Err(DailyBriefError::synthesis("provider returned an empty body"));
    }
    if has_sources_section(&cleaned) {
        return Ok(cleaned);
    }

    let mut body = cleaned.trim_end().to_string();
    body.push_str("\n\n## Sources\n\n");
    for (i, doc) in sources.iter().enumerate() {
        let _ = writeln!(body, "{}. [{}]({})", i + 1, doc.title, doc.url);
    }
    Ok(body)
}

fn has_sources_section(md: &str) -> bool {
    md.lines().any(|line| {
        line.trim()
            .strip_prefix("## ")
            .is_some_and(|h| h.trim().eq_ignore_ascii_case("sources"))
    })
}
