//! Logging initialization for the counts services.
//!
//! Thin wrapper over the observability crate so binaries pick the output
//! format from [`Config`] instead of assembling a `LogConfig` themselves.

use crate::{Config, Paths};
use observability::{LogConfig, LogFormat};

/// Initialize logging for a service from the loaded configuration.
///
/// JSON output goes to the log file under `paths`, mirrored to stderr so a
/// foreground process still shows what it is doing.
///
/// ```ignore
/// init_logging("squash-worker", &config, &paths);
/// tracing::info!("worker started");
/// ```
pub fn init_logging(service_name: &str, config: &Config, paths: &Paths) {
    let format = LogFormat::from_str(&config.log_format);

    observability::init_with_config(LogConfig {
        service_name: service_name.into(),
        default_level: config.log_level.clone(),
        format,
        log_path: Some(paths.log_file()),
        also_stderr: format == LogFormat::Json,
    });
}
