//! Command implementations.

mod args;

pub use args::{Cli, Commands};

use std::sync::Arc;

use anyhow::{Result, bail};
use regex::Regex;
use ripple::config::{BuildMode, EngineConfig};
use ripple::reload::WatchEvent;
use ripple::{Engine, debug, log};
use tokio::sync::{Notify, broadcast};

/// Engine with remote URLs served externally: the dev CLI has no network
/// loader.
fn engine_for(config: EngineConfig) -> Result<Engine> {
    let remote = Regex::new(r"^https?://")?;
    Engine::builder(config)
        .resolver(remote, |_: &str| ripple::compiler::Resolution {
            external: true,
            ..Default::default()
        })
        .build()
}

/// Prepare, then watch until `shutdown` fires.
pub async fn dev(mut config: EngineConfig, reload: bool, shutdown: Arc<Notify>) -> Result<()> {
    config.build.mode = BuildMode::Development;
    config.build.reload |= reload;
    let engine = engine_for(config)?;

    let stats = engine.prepare().await?;
    log!(
        "dev";
        "{} modules ready, {} routes{}",
        stats.compiled,
        stats.routes,
        if stats.failed > 0 { format!(", {} failed", stats.failed) } else { String::new() }
    );

    if !engine.config().watch.enable {
        return Ok(());
    }

    let printer = tokio::spawn(print_events(engine.subscribe()));
    let watch = engine.watch()?;

    shutdown.notified().await;
    log!("dev"; "shutting down...");
    watch.stop().await;
    printer.abort();
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<WatchEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => log!("hmr"; "{}", event.to_json()),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!("hmr"; "skipped {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Compile every route once. Fails if any module failed.
pub async fn build(mut config: EngineConfig, reload: bool) -> Result<()> {
    config.build.mode = BuildMode::Production;
    config.build.reload |= reload;
    let engine = engine_for(config)?;

    let stats = engine.prepare().await?;
    if stats.failed > 0 {
        bail!("{} of {} modules failed to compile", stats.failed, stats.compiled + stats.failed);
    }
    log!(
        "build";
        "{} modules, {} routes -> {}",
        stats.compiled,
        stats.routes,
        engine.config().output_dir().display()
    );
    Ok(())
}

pub fn clean(config: &EngineConfig) -> Result<()> {
    let dir = &config.build.build_dir;
    if !dir.exists() {
        log!("clean"; "nothing to clean");
        return Ok(());
    }
    std::fs::remove_dir_all(dir)?;
    log!("clean"; "removed {}", dir.display());
    Ok(())
}
