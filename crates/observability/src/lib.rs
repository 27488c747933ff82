//! # Observability
//!
//! Tracing setup shared by every U-Report counts service.
//!
//! Services are **log producers**. They call [`init`] or [`init_with_config`]
//! once at startup and use the standard `tracing` macros everywhere else.
//! Where the lines end up (stderr, a JSONL file, both) is decided here.
//!
//! ## Output modes
//!
//! - [`LogFormat::Compact`]: human-readable lines on stderr.
//! - [`LogFormat::Json`]: one JSON object per line appended to
//!   `~/.ureport/logs/counts.jsonl` (or [`LogConfig::log_path`]).
//!
//! `RUST_LOG` always wins over [`LogConfig::default_level`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "squash-worker".into(),
//!     default_level: "debug".into(),
//!     format: observability::LogFormat::Json,
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! tracing::info!("worker started");
//! ```

mod file_writer;

use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use file_writer::{default_log_path, JsonlAppender};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Compact human-readable lines on stderr.
    #[default]
    Compact,
    /// JSON lines appended to a log file.
    Json,
}

impl LogFormat {
    /// Parse a format name; anything unrecognised falls back to compact.
    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "json" | "jsonl" => Self::Json,
            _ => Self::Compact,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Json => "json",
        }
    }
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g., "counts", "squash-worker").
    /// Attached to every JSON line as the root span.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Output format.
    pub format: LogFormat,

    /// Optional custom log file path for JSON output.
    /// Defaults to `~/.ureport/logs/counts.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr when writing JSON to a file.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            format: LogFormat::Compact,
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize compact stderr logging for a service with default settings.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize the tracing subscriber with custom configuration.
///
/// Calling this more than once is harmless: later calls leave the first
/// subscriber in place.
pub fn init_with_config(config: LogConfig) {
    match config.format {
        LogFormat::Compact => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter(&config.default_level))
                .with_target(true)
                .with_writer(std::io::stderr)
                .compact()
                .try_init();
        }
        LogFormat::Json => init_json(&config),
    }
}

fn init_json(config: &LogConfig) {
    let log_path = config.log_path.clone().unwrap_or_else(default_log_path);

    let writer = match JsonlAppender::open(&log_path) {
        Ok(writer) => writer,
        Err(e) => {
            // Fall back to compact stderr output.
            eprintln!(
                "failed to open log file {}: {}; logging to stderr",
                log_path.display(),
                e
            );
            init_with_config(LogConfig {
                format: LogFormat::Compact,
                ..config.clone()
            });
            return;
        }
    };

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .with_writer(writer)
        .with_filter(env_filter(&config.default_level));

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    let installed = tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            service = %config.service_name,
            log_path = %log_path.display(),
            "observability initialized"
        );
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert_eq!(config.format, LogFormat::Compact);
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::from_str("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_str("JSONL"), LogFormat::Json);
        assert_eq!(LogFormat::from_str("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::from_str("pretty"), LogFormat::Compact);
        assert_eq!(LogFormat::Json.as_str(), "json");
    }
}
