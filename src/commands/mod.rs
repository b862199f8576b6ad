//! Command handlers module.
//!
//! This module organizes the CLI command implementations into separate files:
//! - `sweep.rs`: One-shot and periodic maintenance sweeps
//! - `stats.rs`: Per-tenant statistics
//! - `audit.rs`: Audit file verification
//! - `config.rs`: Configuration display

mod audit;
mod config;
mod stats;
mod sweep;

use std::path::PathBuf;

use clap::Subcommand;

pub use audit::cmd_audit;
pub use config::cmd_config;
pub use stats::cmd_stats;
pub use sweep::cmd_sweep;

/// Audit subcommands.
#[derive(Subcommand)]
pub enum AuditAction {
    /// Verify the HMAC chain of an audit log file.
    Verify {
        /// The JSONL audit file.
        file: PathBuf,

        /// HMAC key (hex or raw); defaults to the configured key.
        #[arg(long, env = "HYPHANET_AUDIT_KEY", hide_env_values = true)]
        key: Option<String>,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML, with secrets redacted.
    Show,
}
