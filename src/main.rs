//! ripple - incremental module compiler.

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ColorChoice, Parser};
use cli::{Cli, Commands};
use ripple::config::EngineConfig;
use tokio::sync::Notify;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {}
    }
    ripple::logger::set_verbose(cli.verbose);

    let config = EngineConfig::load(&cli.config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    match cli.command {
        Commands::Dev { reload } => {
            let shutdown = setup_shutdown_handler()?;
            runtime.block_on(cli::dev(config, reload, shutdown))
        }
        Commands::Build { reload } => runtime.block_on(cli::build(config, reload)),
        Commands::Clean => cli::clean(&config),
    }
}

/// Ctrl+C stops the watch loop instead of killing the process.
fn setup_shutdown_handler() -> Result<Arc<Notify>> {
    let shutdown = Arc::new(Notify::new());
    let notify = Arc::clone(&shutdown);
    ctrlc::set_handler(move || notify.notify_one())
        .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {}", e))?;
    Ok(shutdown)
}
