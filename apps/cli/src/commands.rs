//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use dailybrief_core::pipeline::{
    PipelineRunner, ProgressReporter, RunResult,
};
use dailybrief_core::{
    AnthropicClient, ContentSynthesizer, Publisher, SynthesisOptions, feed, scheduler,
};
use dailybrief_search::{CollectOptions, PageExtractor, SourceCollector, TavilyClient};
use dailybrief_shared::{
    Clock, DailyBriefError, LoadedConfig, RetryPolicy, RotationTable, TokioClock, Topic,
    init_config, load_config, load_rotation, resolve_api_keys,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// dailybrief: one researched article per day from a topic rotation.
#[derive(Parser)]
#[command(
    name = "dailybrief",
    version,
    about = "Research the day's topic and publish a cited Markdown brief with JSON and RSS feeds.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ./dailybrief.toml, then ~/.dailybrief/dailybrief.toml).
    #[arg(long, env = "DAILYBRIEF_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Research and publish today's scheduled topics.
    Run {
        /// Run date (YYYY-MM-DD). Defaults to today in the configured offset.
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Output directory (overrides `defaults.output_dir`).
        #[arg(long, env = "DAILYBRIEF_OUTPUT_DIR")]
        out: Option<PathBuf>,

        /// Run only this topic id, whatever the schedule says.
        #[arg(long)]
        topic: Option<String>,
    },

    /// Show which topics would run on a date. Makes no provider calls.
    Schedule {
        /// Date to resolve (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// List published articles from the feed index.
    Feed {
        /// Output directory (overrides `defaults.output_dir`).
        #[arg(long, env = "DAILYBRIEF_OUTPUT_DIR")]
        out: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "dailybrief=info",
        1 => "dailybrief=debug",
        _ => "dailybrief=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run { date, out, topic } => {
            cmd_run(config_path, date, out, topic.as_deref()).await
        }
        Command::Schedule { date } => cmd_schedule(config_path, date),
        Command::Feed { out } => cmd_feed(config_path, out),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn run_date(loaded: &LoadedConfig, date: Option<NaiveDate>) -> Result<NaiveDate> {
    match date {
        Some(d) => Ok(d),
        None => Ok(scheduler::today_in(loaded.config.defaults.offset()?)),
    }
}

fn output_dir(loaded: &LoadedConfig, out: Option<PathBuf>) -> PathBuf {
    out.unwrap_or_else(|| loaded.resolve_relative(&loaded.config.defaults.output_dir))
}

/// A rotation may leave weekdays empty; only a run on such a day fails.
fn warn_uncovered(rotation: &RotationTable) {
    let days = scheduler::uncovered_weekdays(rotation);
    if !days.is_empty() {
        warn!(
            days = ?days,
            "rotation has no topic for some weekdays and no \"any\" fallback"
        );
    }
}

async fn cmd_run(
    config_path: Option<&Path>,
    date: Option<NaiveDate>,
    out: Option<PathBuf>,
    only: Option<&str>,
) -> Result<()> {
    let loaded = load_config(config_path)?;
    let config = &loaded.config;
    let today = run_date(&loaded, date)?;

    let rotation = load_rotation(&loaded.topics_path())?;
    warn_uncovered(&rotation);
    let keys = resolve_api_keys(config)?;
    let out_dir = output_dir(&loaded, out);

    let policy = RetryPolicy::from(&config.retry);
    let clock: Arc<dyn Clock> = Arc::new(TokioClock);

    let tavily = TavilyClient::new(&config.search, keys.search)?;
    let mut collector = SourceCollector::new(
        Arc::new(tavily),
        CollectOptions::from(&config.search),
        policy.clone(),
        clock.clone(),
    );
    if config.search.fetch_full_text {
        collector = collector.with_extractor(PageExtractor::new(config.search.timeout_secs)?);
    }

    let anthropic = AnthropicClient::new(&config.completion, keys.completion)?;
    let synthesizer = ContentSynthesizer::new(
        Arc::new(anthropic),
        SynthesisOptions::from(&config.completion),
        policy,
        clock,
    );

    let publisher = Publisher::from_config(&out_dir, config);
    let runner = PipelineRunner::new(
        rotation,
        collector,
        synthesizer,
        publisher,
        config.search.max_results,
    );

    info!(date = %today, out = %out_dir.display(), topic = only, "starting daily run");

    let reporter = CliProgress::new();
    let result = runner.run(today, only, &reporter).await?;

    println!();
    println!("  Run {} for {}", result.run_id, result.run_date);
    for published in &result.succeeded {
        println!(
            "  ok      {:<20} {} ({} sources, {})",
            published.topic_id,
            published.path.display(),
            published.source_count,
            published.sourcing.as_str()
        );
    }
    for failure in &result.failed {
        println!(
            "  failed  {:<20} {}: {}",
            failure.topic_id,
            failure.error.kind(),
            failure.error
        );
    }
    println!("  Time:   {:.1}s", result.elapsed.as_secs_f64());
    println!();

    if result.all_succeeded() {
        Ok(())
    } else {
        Err(eyre!(
            "{} of {} topic(s) failed",
            result.failed.len(),
            result.failed.len() + result.succeeded.len()
        ))
    }
}

fn cmd_schedule(config_path: Option<&Path>, date: Option<NaiveDate>) -> Result<()> {
    let loaded = load_config(config_path)?;
    let today = run_date(&loaded, date)?;
    let rotation = load_rotation(&loaded.topics_path())?;
    warn_uncovered(&rotation);

    let topics = scheduler::schedule(today, &rotation)?;
    println!("{} ({})", today, today.format("%A"));
    for topic in &topics {
        println!(
            "  {:<20} priority {:<3} {:?}",
            topic.id, topic.priority, topic.search_query
        );
    }
    Ok(())
}

fn cmd_feed(config_path: Option<&Path>, out: Option<PathBuf>) -> Result<()> {
    let loaded = load_config(config_path)?;
    let out_dir = output_dir(&loaded, out);
    let index = feed::load_feed(&out_dir.join(feed::FEED_JSON), &loaded.config.site)?;

    if index.entries.is_empty() {
        println!("No articles published in {}", out_dir.display());
        return Ok(());
    }
    for entry in &index.entries {
        println!(
            "{}  {:<16} {:<3} {}  {}",
            entry.date, entry.topic_id, entry.source_count, entry.title, entry.path
        );
    }
    Ok(())
}

fn cmd_config_init(config_path: Option<&Path>) -> Result<()> {
    let path = init_config(config_path)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let loaded = load_config(config_path)?;
    match &loaded.path {
        Some(path) => println!("# {}", path.display()),
        None => println!("# defaults (no config file found)"),
    }
    let toml_str = toml::to_string_pretty(&loaded.config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold} {msg}") {
            spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn topic_started(&self, topic: &Topic, index: usize, total: usize) {
        self.spinner
            .set_prefix(format!("[{index}/{total}] {}", topic.id));
    }

    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn topic_published(&self, topic: &Topic, path: &Path) {
        self.spinner
            .println(format!("  published {} -> {}", topic.id, path.display()));
    }

    fn topic_failed(&self, topic: &Topic, error: &DailyBriefError) {
        self.spinner
            .println(format!("  failed {}: {error}", topic.id));
    }

    fn done(&self, _result: &RunResult) {
        self.spinner.finish_and_clear();
    }
}
