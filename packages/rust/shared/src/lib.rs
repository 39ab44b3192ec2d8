//! Shared types, error model, configuration, and retry policy for dailybrief.
//!
//! This crate is the foundation depended on by all other dailybrief crates.
//! It provides:
//! - [`DailyBriefError`] and [`ProviderError`]: the error taxonomy
//! - Domain types ([`Topic`], [`RotationTable`], [`SourceDocument`], [`Article`], [`FeedIndex`])
//! - Configuration ([`AppConfig`], config and rotation loading)
//! - Bounded retry with an injectable [`Clock`]

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    ApiKeys, AppConfig, CompletionConfig, DefaultsConfig, LoadedConfig, PublishConfig,
    RetryConfig, SearchConfig, SiteConfig, check_rotation, config_dir, init_config, load_config,
    load_config_from, load_rotation, parse_rotation, resolve_api_keys, resolve_config_path,
};
pub use error::{DailyBriefError, ProviderError, ProviderResult, Result};
pub use retry::{Clock, GiveUp, ManualClock, RetryError, RetryPolicy, TokioClock, retry};
pub use types::{
    Article, CURRENT_SCHEMA_VERSION, DayAffinity, FeedEntry, FeedIndex, RotationTable, RunId,
    SourceDocument, Sourcing, Topic,
};
