//! Application configuration for dailybrief.
//!
//! Resolution order for the config file: `--config` / `DAILYBRIEF_CONFIG`,
//! then `./dailybrief.toml`, then `~/.dailybrief/dailybrief.toml`, then
//! built-in defaults. CLI flags override config file values.
//!
//! The rotation table lives in its own file (`topics.toml` by default) and
//! is loaded with [`load_rotation`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::error::{DailyBriefError, Result};
use crate::types::RotationTable;

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "dailybrief.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".dailybrief";

/// Env var that points at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "DAILYBRIEF_CONFIG";

// ---------------------------------------------------------------------------
// Config structs (matching dailybrief.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Search provider (Tavily) settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Completion provider (Anthropic) settings.
    #[serde(default)]
    pub completion: CompletionConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Site variables used in front matter and feed metadata.
    #[serde(default)]
    pub site: SiteConfig,

    #[serde(default)]
    pub publish: PublishConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Site root; articles and the feed are written below it.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Articles directory, relative to `output_dir`.
    #[serde(default = "default_articles_subdir")]
    pub articles_subdir: String,

    /// Rotation file, relative to the config file's directory unless absolute.
    #[serde(default = "default_topics_file")]
    pub topics_file: String,

    /// Offset used to compute "today" (e.g. `"+00:00"`, `"-05:00"`).
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            articles_subdir: default_articles_subdir(),
            topics_file: default_topics_file(),
            utc_offset: default_utc_offset(),
        }
    }
}

fn default_output_dir() -> String {
    "site".into()
}
fn default_articles_subdir() -> String {
    "articles".into()
}
fn default_topics_file() -> String {
    "topics.toml".into()
}
fn default_utc_offset() -> String {
    "+00:00".into()
}

impl DefaultsConfig {
    /// Parse `utc_offset` into a chrono offset.
    pub fn offset(&self) -> Result<FixedOffset> {
        self.utc_offset.parse::<FixedOffset>().map_err(|e| {
            DailyBriefError::config(format!("invalid utc_offset {:?}: {e}", self.utc_offset))
        })
    }
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_search_base_url")]
    pub base_url: String,

    #[serde(default = "default_max_results")]
    pub max_results: usize,

    #[serde(default = "default_max_excerpt_chars")]
    pub max_excerpt_chars: usize,

    /// At most this many documents per host.
    #[serde(default = "default_per_domain_cap")]
    pub per_domain_cap: usize,

    /// Hosts (and their subdomains) whose results are discarded.
    #[serde(default = "default_blocked_domains")]
    pub blocked_domains: Vec<String>,

    /// Fetch each result page and replace the snippet with its main text.
    #[serde(default)]
    pub fetch_full_text: bool,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_search_key_env(),
            base_url: default_search_base_url(),
            max_results: default_max_results(),
            max_excerpt_chars: default_max_excerpt_chars(),
            per_domain_cap: default_per_domain_cap(),
            blocked_domains: default_blocked_domains(),
            fetch_full_text: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_search_key_env() -> String {
    "TAVILY_API_KEY".into()
}
fn default_search_base_url() -> String {
    "https://api.tavily.com".into()
}
fn default_max_results() -> usize {
    12
}
fn default_max_excerpt_chars() -> usize {
    1500
}
fn default_per_domain_cap() -> usize {
    3
}
fn default_blocked_domains() -> Vec<String> {
    [
        "githubusercontent.com",
        "youtube.com",
        "x.com",
        "twitter.com",
        "reddit.com",
        "quora.com",
        "facebook.com",
        "tiktok.com",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[completion]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_completion_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Tried in order when the provider reports `model` as not found.
    #[serde(default)]
    pub fallback_models: Vec<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound on the estimated prompt size (`ceil(chars / 4)`).
    #[serde(default = "default_context_budget")]
    pub context_budget_tokens: usize,

    /// Excerpt halving stops at this length.
    #[serde(default = "default_min_excerpt_chars")]
    pub min_excerpt_chars: usize,

    #[serde(default = "default_max_sources")]
    pub max_sources: usize,

    #[serde(default = "default_target_words")]
    pub target_words: usize,

    /// Output language passed to the model.
    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_completion_key_env(),
            base_url: default_completion_base_url(),
            model: default_model(),
            fallback_models: Vec::new(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            context_budget_tokens: default_context_budget(),
            min_excerpt_chars: default_min_excerpt_chars(),
            max_sources: default_max_sources(),
            target_words: default_target_words(),
            language: default_language(),
            timeout_secs: default_completion_timeout_secs(),
        }
    }
}

fn default_completion_key_env() -> String {
    "ANTHROPIC_API_KEY".into()
}
fn default_completion_base_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_model() -> String {
    "claude-sonnet-4-5".into()
}
fn default_max_tokens() -> u32 {
    8000
}
fn default_temperature() -> f32 {
    0.3
}
fn default_context_budget() -> usize {
    24_000
}
fn default_min_excerpt_chars() -> usize {
    200
}
fn default_max_sources() -> usize {
    10
}
fn default_target_words() -> usize {
    1800
}
fn default_language() -> String {
    "en".into()
}
fn default_completion_timeout_secs() -> u64 {
    300
}

/// `[retry]` section, shared by the search and completion stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_elapsed_ms")]
    pub max_elapsed_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            max_elapsed_ms: default_max_elapsed_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    1_000
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_elapsed_ms() -> u64 {
    180_000
}

/// `[site]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_site_title")]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    /// Public root URL; article links in the feed are built from it.
    #[serde(default)]
    pub base_url: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: default_site_title(),
            description: String::new(),
            author: String::new(),
            base_url: String::new(),
        }
    }
}

fn default_site_title() -> String {
    "Daily Brief".into()
}

/// `[publish]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// A lock file older than this is considered abandoned and replaced.
    #[serde(default = "default_lock_stale_secs")]
    pub lock_stale_secs: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            lock_stale_secs: default_lock_stale_secs(),
        }
    }
}

fn default_lock_stale_secs() -> u64 {
    600
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// API keys read from the environment at startup.
#[derive(Clone)]
pub struct ApiKeys {
    pub search: String,
    pub completion: String,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeys")
            .field("search", &"<redacted>")
            .field("completion", &"<redacted>")
            .finish()
    }
}

fn read_key(var_name: &str, what: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().to_string()),
        _ => Err(DailyBriefError::config(format!(
            "{what} API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Read both provider keys. Missing keys are a fatal startup error.
pub fn resolve_api_keys(config: &AppConfig) -> Result<ApiKeys> {
    Ok(ApiKeys {
        search: read_key(&config.search.api_key_env, "Search")?,
        completion: read_key(&config.completion.api_key_env, "Completion")?,
    })
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.dailybrief/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DailyBriefError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Pick the config file to load, or `None` to use defaults.
///
/// An explicit path must exist; the implicit candidates are skipped when absent.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(DailyBriefError::config(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        return Ok(Some(path.to_path_buf()));
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Ok(Some(local));
    }

    if let Ok(dir) = config_dir() {
        let home = dir.join(CONFIG_FILE_NAME);
        if home.exists() {
            return Ok(Some(home));
        }
    }

    Ok(None)
}

/// A loaded config plus the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: Option<PathBuf>,
}

impl LoadedConfig {
    /// Resolve a path from the config relative to the config file's directory.
    pub fn resolve_relative(&self, value: &str) -> PathBuf {
        let p = PathBuf::from(value);
        if p.is_absolute() {
            return p;
        }
        match self.path.as_deref().and_then(Path::parent) {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(p),
            _ => p,
        }
    }

    /// Location of the rotation file.
    pub fn topics_path(&self) -> PathBuf {
        self.resolve_relative(&self.config.defaults.topics_file)
    }
}

/// Resolve and load the application config. Falls back to defaults when no file is found.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    match resolve_config_path(explicit)? {
        Some(path) => {
            let config = load_config_from(&path)?;
            tracing::debug!(?path, "loaded config");
            Ok(LoadedConfig {
                config,
                path: Some(path),
            })
        }
        None => {
            tracing::debug!("config file not found, using defaults");
            Ok(LoadedConfig {
                config: AppConfig::default(),
                path: None,
            })
        }
    }
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DailyBriefError::config(format!("failed to read {}: {e}", path.display()))
    })?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        DailyBriefError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.defaults.offset()?;
    Ok(config)
}

/// Write a default config file to `path` (or the home config dir).
/// Refuses to overwrite an existing file. Returns the path written.
pub fn init_config(path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_dir()?.join(CONFIG_FILE_NAME),
    };
    if path.exists() {
        return Err(DailyBriefError::config(format!(
            "{} already exists",
            path.display()
        )));
    }
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| {
            DailyBriefError::config(format!("failed to create {}: {e}", dir.display()))
        })?;
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| DailyBriefError::config(e.to_string()))?;
    std::fs::write(&path, content).map_err(|e| {
        DailyBriefError::config(format!("failed to write {}: {e}", path.display()))
    })?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

// ---------------------------------------------------------------------------
// Rotation table
// ---------------------------------------------------------------------------

/// Parse a rotation table from TOML and check its structure.
pub fn parse_rotation(content: &str) -> Result<RotationTable> {
    let table: RotationTable = toml::from_str(content)
        .map_err(|e| DailyBriefError::config(format!("malformed rotation table: {e}")))?;
    check_rotation(&table)?;
    Ok(table)
}

/// Load the rotation table from `path`.
pub fn load_rotation(path: &Path) -> Result<RotationTable> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DailyBriefError::config(format!(
            "failed to read rotation table {}: {e}",
            path.display()
        ))
    })?;
    let table = parse_rotation(&content).map_err(|e| match e {
        DailyBriefError::Config { message } => {
            DailyBriefError::config(format!("{}: {message}", path.display()))
        }
        other => other,
    })?;
    tracing::debug!(?path, topics = table.topics.len(), "loaded rotation table");
    Ok(table)
}

/// Field-level checks: non-empty table, non-empty fields, unique ids.
pub fn check_rotation(table: &RotationTable) -> Result<()> {
    if table.topics.is_empty() {
        return Err(DailyBriefError::config("rotation table has no topics"));
    }
    if table.max_topics_per_day == Some(0) {
        return Err(DailyBriefError::config("max_topics_per_day must be at least 1"));
    }

    let mut seen = HashSet::new();
    for topic in &table.topics {
        if topic.id.trim().is_empty() {
            return Err(DailyBriefError::config("topic with empty id"));
        }
        if topic.title.trim().is_empty() {
            return Err(DailyBriefError::config(format!(
                "topic {:?} has an empty title",
                topic.id
            )));
        }
        if topic.search_query.trim().is_empty() {
            return Err(DailyBriefError::config(format!(
                "topic {:?} has an empty search_query",
                topic.id
            )));
        }
        if !seen.insert(topic.id.as_str()) {
            return Err(DailyBriefError::config(format!(
                "duplicate topic id {:?}",
                topic.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DayAffinity;
    use chrono::Weekday;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("output_dir"));
        assert!(toml_str.contains("TAVILY_API_KEY"));
        assert!(toml_str.contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.search.max_results, 12);
        assert_eq!(parsed.completion.min_excerpt_chars, 200);
        assert_eq!(parsed.retry, RetryConfig::default());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
output_dir = "/srv/brief"
utc_offset = "-05:00"

[site]
title = "Research Notes"
author = "Editorial"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.output_dir, "/srv/brief");
        assert_eq!(config.defaults.articles_subdir, "articles");
        assert_eq!(config.site.title, "Research Notes");
        assert_eq!(config.search.per_domain_cap, 3);
        assert_eq!(
            config.defaults.offset().expect("offset").local_minus_utc(),
            -5 * 3600
        );
    }

    #[test]
    fn bad_offset_is_config_error() {
        let defaults = DefaultsConfig {
            utc_offset: "noon".into(),
            ..DefaultsConfig::default()
        };
        assert!(matches!(
            defaults.offset(),
            Err(DailyBriefError::Config { .. })
        ));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Unique env var names so parallel tests don't interfere
        config.search.api_key_env = "DB_TEST_NONEXISTENT_SEARCH_KEY_12345".into();
        config.completion.api_key_env = "DB_TEST_NONEXISTENT_COMPLETION_KEY_12345".into();
        let err = resolve_api_keys(&config).unwrap_err();
        assert!(err.to_string().contains("API key not found"));
        assert!(err.to_string().contains("DB_TEST_NONEXISTENT_SEARCH_KEY_12345"));
    }

    #[test]
    fn api_keys_debug_is_redacted() {
        let keys = ApiKeys {
            search: "tvly-secret".into(),
            completion: "sk-secret".into(),
        };
        let dbg = format!("{keys:?}");
        assert!(!dbg.contains("secret"));
    }

    #[test]
    fn init_config_writes_once() {
        let dir = std::env::temp_dir().join(format!("db-cfg-{}", uuid::Uuid::now_v7()));
        let path = dir.join(CONFIG_FILE_NAME);

        let written = init_config(Some(&path)).expect("init");
        assert_eq!(written, path);
        let loaded = load_config(Some(&path)).expect("load");
        assert_eq!(loaded.config.defaults.topics_file, "topics.toml");
        assert_eq!(loaded.topics_path(), dir.join("topics.toml"));

        assert!(init_config(Some(&path)).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn explicit_missing_config_is_error() {
        let missing = std::env::temp_dir().join("db-definitely-missing.toml");
        assert!(load_config(Some(&missing)).is_err());
    }

    #[test]
    fn parse_rotation_table() {
        let table = parse_rotation(
            r#"
max_topics_per_day = 2

[[topics]]
id = "ai-news"
title = "AI News"
search_query = "AI industry news"
days = ["mon"]
priority = 10

[[topics]]
id = "general"
title = "General Science"
search_query = "science news this week"
days = ["any"]
"#,
        )
        .expect("parse");
        assert_eq!(table.topics.len(), 2);
        assert_eq!(table.max_topics_per_day, Some(2));
        assert_eq!(
            table.topics[0].day_affinity,
            DayAffinity::Days(vec![Weekday::Mon])
        );
        assert_eq!(table.topics[1].priority, 0);
    }

    #[test]
    fn rotation_rejects_malformed_tables() {
        assert!(parse_rotation("").is_err());
        assert!(parse_rotation("topics = []").is_err());

        let dup = r#"
[[topics]]
id = "a"
title = "A"
search_query = "a"
days = ["mon"]

[[topics]]
id = "a"
title = "A again"
search_query = "a"
days = ["tue"]
"#;
        let err = parse_rotation(dup).unwrap_err();
        assert!(err.to_string().contains("duplicate topic id"));

        let missing_days = r#"
[[topics]]
id = "a"
title = "A"
search_query = "a"
"#;
        assert!(parse_rotation(missing_days).is_err());

        let bad_day = r#"
[[topics]]
id = "a"
title = "A"
search_query = "a"
days = ["someday"]
"#;
        assert!(matches!(
            parse_rotation(bad_day),
            Err(DailyBriefError::Config { .. })
        ));
    }
}
