//! Binary entry point for hyphanet.
//!
//! Operator commands for a network's on-disk stores: background sweeps,
//! per-tenant statistics, audit file verification and configuration display.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use commands::{AuditAction, ConfigAction};
use hyphanet::HyphanetConfig;
use hyphanet::observability;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Hyphanet - adaptive knowledge propagation for autonomous agents.
#[derive(Parser)]
#[command(name = "hyphanet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "HYPHANET_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run maintenance sweeps (expiry, decay, similarity refresh, purges).
    Sweep {
        /// Keep sweeping every SECS seconds until interrupted.
        #[arg(short, long, value_name = "SECS")]
        interval: Option<u64>,
    },

    /// Show per-tenant statistics.
    Stats {
        /// Tenant to report on.
        #[arg(short, long)]
        tenant: String,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Audit trail tools.
    Audit {
        /// Audit subcommand.
        #[command(subcommand)]
        action: AuditAction,
    },

    /// Configuration tools.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = observability::init_from_settings(&config.logging, cli.verbose) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(command: Commands, config: HyphanetConfig) -> anyhow::Result<()> {
    match command {
        Commands::Sweep { interval } => commands::cmd_sweep(config, interval).await,
        Commands::Stats { tenant, json } => commands::cmd_stats(config, &tenant, json),
        Commands::Audit { action } => commands::cmd_audit(&config, action),
        Commands::Config { action } => commands::cmd_config(&config, action),
    }
}

/// Loads configuration from `path`, or from the default locations.
fn load_config(path: Option<&Path>) -> anyhow::Result<HyphanetConfig> {
    match path {
        Some(path) => HyphanetConfig::load_from_file(path)
            .map(HyphanetConfig::with_env_overrides)
            .with_context(|| format!("reading {}", path.display())),
        None => HyphanetConfig::load_default().context("loading default configuration"),
    }
}
