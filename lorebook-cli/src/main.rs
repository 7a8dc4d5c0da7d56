//! Lorebook command-line client.
//!
//! Usage:
//!   lorebook --config lorebook.json push
//!   lorebook pull
//!   lorebook get character c1
//!
//! The remote token can be supplied through `LOREBOOK_TOKEN` instead of the
//! config file.

use anyhow::{Context, Result};
use clap::Parser;
use lorebook_cli::{Cli, Workspace};
use lorebook_sync::{LorebookConfig, TOKEN_ENV};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let config = LorebookConfig::load(&cli.config)
        .await
        .with_context(|| format!("Failed to load config {:?}", cli.config))?
        .with_token_override(std::env::var(TOKEN_ENV).ok());
    info!(
        "Using {} remote, data in {:?}",
        config.remote.kind(),
        config.data_dir
    );

    let workspace = Workspace::open(&config).await?;
    let output = workspace.run(&cli.command).await?;
    println!("{output}");
    Ok(())
}
