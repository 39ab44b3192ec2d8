//! Core pipeline orchestration and domain logic for dailybrief.
//!
//! This crate ties together topic scheduling, source collection, article
//! synthesis, and publishing into the daily run ([`pipeline::PipelineRunner`]).

pub mod completion;
pub mod feed;
pub mod pipeline;
pub mod prompt;
pub mod publish;
pub mod scheduler;
pub mod synthesis;

pub use completion::{AnthropicClient, Completion, CompletionProvider};
pub use pipeline::{PipelineRunner, ProgressReporter, RunResult, SilentProgress, TopicFailure};
pub use publish::{Publisher, render};
pub use synthesis::{ContentSynthesizer, SynthesisOptions, SynthesizedBody};
