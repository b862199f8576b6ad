//! Config command handler.

use hyphanet::HyphanetConfig;

use super::ConfigAction;

/// Placeholder printed instead of secrets.
const REDACTED: &str = "[REDACTED]";

/// Runs a config subcommand.
pub fn cmd_config(config: &HyphanetConfig, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", render(config)?);
            Ok(())
        },
    }
}

/// Renders the configuration as TOML with the audit key redacted.
fn render(config: &HyphanetConfig) -> anyhow::Result<String> {
    let mut shown = config.clone();
    if shown.audit.hmac_key.is_some() {
        shown.audit.hmac_key = Some(REDACTED.to_string());
    }
    Ok(toml::to_string_pretty(&shown)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_redacts_key() {
        let config = HyphanetConfig::default().with_audit_key("deadbeef");
        let text = render(&config).unwrap();
        assert!(!text.contains("deadbeef"));
        assert!(text.contains(REDACTED));
    }
}
