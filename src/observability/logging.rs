//! Structured logging configuration.

use crate::config::LoggingSettings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Default filter directive when neither `HYPHANET_LOG` nor `RUST_LOG` is set.
const DEFAULT_DIRECTIVE: &str = "hyphanet=info";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable multi-line output.
    #[default]
    Pretty,
}

impl LogFormat {
    /// Parses a format name, falling back to `Pretty`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Level filter.
    pub filter: EnvFilter,
    /// Optional file to write to instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::from_settings(None, false)
    }
}

impl LoggingConfig {
    /// Builds the config from `[logging]` settings and the environment.
    ///
    /// The filter is taken from `HYPHANET_LOG`, then `RUST_LOG`, then the
    /// configured level. `verbose` raises the default to `debug`.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        let format = std::env::var("HYPHANET_LOG_FORMAT")
            .ok()
            .or_else(|| settings.and_then(|s| s.format.clone()))
            .map(|f| LogFormat::parse(&f))
            .unwrap_or_default();

        let fallback = if verbose {
            "hyphanet=debug".to_string()
        } else {
            settings
                .and_then(|s| s.level.as_deref())
                .map_or_else(|| DEFAULT_DIRECTIVE.to_string(), |level| format!("hyphanet={level}"))
        };
        let directive = std::env::var("HYPHANET_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(fallback);
        let filter = EnvFilter::try_new(&directive)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

        Self {
            format,
            filter,
            file: settings.and_then(|s| s.file.clone()),
        }
    }

    /// Sets the output format.
    #[must_use]
    pub const fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Writes logs to `path`.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("anything"), LogFormat::Pretty);
    }

    #[test]
    fn test_settings_file_is_carried() {
        let settings = LoggingSettings {
            format: None,
            level: Some("warn".to_string()),
            file: Some(PathBuf::from("/tmp/hyphanet.log")),
        };
        let config = LoggingConfig::from_settings(Some(&settings), false);
        assert_eq!(config.file, Some(PathBuf::from("/tmp/hyphanet.log")));
    }
}
