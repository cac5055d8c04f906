//! Structured logging configuration.

use crate::config::LoggingSettings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Env var with the highest-precedence filter directive.
pub const LOG_FILTER_ENV: &str = "TAWERET_LOG";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parses a format name. Unknown names fall back to [`LogFormat::Pretty`].
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Event filter.
    pub filter: EnvFilter,
    /// Optional file to append to instead of stderr.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds logging configuration from settings and the environment.
    #[must_use]
    pub fn from_settings(settings: &LoggingSettings, verbose: bool) -> Self {
        let directive = filter_directive(
            std::env::var(LOG_FILTER_ENV).ok(),
            std::env::var(EnvFilter::DEFAULT_ENV).ok(),
            settings.filter.as_deref(),
            verbose,
        );
        let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

        Self {
            format: settings
                .format
                .as_deref()
                .map(LogFormat::parse)
                .unwrap_or_default(),
            filter,
            file: settings.file.clone(),
        }
    }
}

/// Picks the filter directive.
///
/// Precedence: `TAWERET_LOG`, then `RUST_LOG`, then the configured filter,
/// then `debug` when verbose or `info` otherwise.
#[must_use]
pub fn filter_directive(
    taweret_log: Option<String>,
    rust_log: Option<String>,
    configured: Option<&str>,
    verbose: bool,
) -> String {
    let non_empty = |value: String| Some(value.trim().to_string()).filter(|v| !v.is_empty());

    taweret_log
        .and_then(non_empty)
        .or_else(|| rust_log.and_then(non_empty))
        .or_else(|| configured.map(str::to_string).and_then(non_empty))
        .unwrap_or_else(|| if verbose { "debug" } else { "info" }.to_string())
}
