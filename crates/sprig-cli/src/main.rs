//! Sprig CLI - check, plan and run declarative plugin configs.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod modules;

use commands::{check, plan, run};

/// Sprig - plugin runtime
#[derive(Parser)]
#[command(name = "sprig")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a configuration file
    Check {
        /// Path to configuration file
        config: Option<PathBuf>,

        /// Print the resolved configuration as TOML
        #[arg(long)]
        show: bool,
    },

    /// Show how the entries of one config would be reconciled onto another
    Plan {
        /// Currently applied configuration
        from: PathBuf,

        /// Configuration to apply
        to: PathBuf,
    },

    /// Run the entries of a configuration with the built-in modules
    Run {
        /// Path to configuration file
        config: Option<PathBuf>,

        /// Apply the entries, report, and exit instead of waiting for Ctrl-C
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config, show } => check::run_check(config.as_deref(), show),
        Commands::Plan { from, to } => plan::run_plan(&from, &to),
        Commands::Run { config, once } => run::run(config.as_deref(), cli.verbose, once).await,
    }
}
