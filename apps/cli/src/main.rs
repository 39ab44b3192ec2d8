//! dailybrief CLI: publish a daily research brief from a topic rotation.
//!
//! Picks the day's topics, collects sources from a search API, synthesizes
//! an article with a language model, and publishes Markdown plus feeds.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
