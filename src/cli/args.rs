//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// Incremental module compiler with hot reload events
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Config file path (default: ripple.toml)
    #[arg(short = 'C', long, global = true, default_value = "ripple.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Show debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Compile all routes, then watch and report live-reload events
    #[command(visible_alias = "d")]
    Dev {
        /// Discard the warm cache and re-fetch remote modules
        #[arg(short, long)]
        reload: bool,
    },

    /// Compile all routes once in production mode
    #[command(visible_alias = "b")]
    Build {
        /// Discard the warm cache and re-fetch remote modules
        #[arg(short, long)]
        reload: bool,
    },

    /// Remove the build directory
    Clean,
}
