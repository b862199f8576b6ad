//! Audit command handler.

use anyhow::{Context, bail};
use hyphanet::HyphanetConfig;
use hyphanet::security::{decode_key, verify_file};

use super::AuditAction;

/// Runs an audit subcommand.
pub fn cmd_audit(config: &HyphanetConfig, action: AuditAction) -> anyhow::Result<()> {
    match action {
        AuditAction::Verify { file, key } => {
            let Some(key) = key.or_else(|| config.audit.hmac_key.clone()) else {
                bail!("no audit key: pass --key or set HYPHANET_AUDIT_KEY");
            };
            let count = verify_file(&file, &decode_key(&key))
                .with_context(|| format!("verifying {}", file.display()))?;
            println!("{}: chain intact ({count} entries)", file.display());
            Ok(())
        },
    }
}
