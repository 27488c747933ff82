//! Configuration management for the counts services.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Default log format.
pub const DEFAULT_LOG_FORMAT: &str = "compact";
/// Default number of seconds between squash runs.
pub const DEFAULT_SQUASH_INTERVAL_SECS: u64 = 60;
/// Default cap on distinct squash keys handled per squash run.
pub const DEFAULT_SQUASH_MAX_DISTINCT: usize = 5000;
/// Default handling of negative net totals.
pub const DEFAULT_NEGATIVE_NET_POLICY: &str = "clamp";

const NEGATIVE_NET_POLICIES: [&str; 2] = ["clamp", "preserve"];

/// Main counts configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log format ("compact" on stderr or "json" lines in the log file).
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Seconds between background squash runs.
    #[serde(default = "default_squash_interval_secs")]
    pub squash_interval_secs: u64,
    /// Maximum distinct squash keys collapsed per run, per table.
    #[serde(default = "default_squash_max_distinct")]
    pub squash_max_distinct: usize,
    /// What squashing does with a negative net: "clamp" to zero or "preserve".
    #[serde(default = "default_negative_net_policy")]
    pub negative_net_policy: String,
    /// Probability (0.0..=1.0) that a recorded delta squashes its key inline.
    #[serde(default)]
    pub inline_squash_probability: f64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_log_format() -> String {
    DEFAULT_LOG_FORMAT.to_string()
}

fn default_squash_interval_secs() -> u64 {
    DEFAULT_SQUASH_INTERVAL_SECS
}

fn default_squash_max_distinct() -> usize {
    DEFAULT_SQUASH_MAX_DISTINCT
}

fn default_negative_net_policy() -> String {
    DEFAULT_NEGATIVE_NET_POLICY.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            squash_interval_secs: DEFAULT_SQUASH_INTERVAL_SECS,
            squash_max_distinct: DEFAULT_SQUASH_MAX_DISTINCT,
            negative_net_policy: default_negative_net_policy(),
            inline_squash_probability: 0.0,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> CoreResult<Self> {
        let mut config = Self::default();
        config.load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            debug!(path = %config_path.display(), "Loading config file");
            Self::load_from_file(&config_path)?
        } else {
            debug!(path = %config_path.display(), "No config file, using defaults");
            Self::default()
        };

        config.load_from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> CoreResult<()> {
        if self.squash_max_distinct == 0 {
            return Err(CoreError::Config(
                "squash_max_distinct must be at least 1".to_string(),
            ));
        }
        if self.squash_interval_secs == 0 {
            return Err(CoreError::Config(
                "squash_interval_secs must be at least 1".to_string(),
            ));
        }
        if !NEGATIVE_NET_POLICIES.contains(&self.negative_net_policy.as_str()) {
            return Err(CoreError::Config(format!(
                "negative_net_policy must be one of {:?}, got {:?}",
                NEGATIVE_NET_POLICIES, self.negative_net_policy
            )));
        }
        if !(0.0..=1.0).contains(&self.inline_squash_probability) {
            return Err(CoreError::Config(format!(
                "inline_squash_probability must be within 0.0..=1.0, got {}",
                self.inline_squash_probability
            )));
        }
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) -> CoreResult<()> {
        if let Ok(log_level) = std::env::var("UREPORT_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(secs) = std::env::var("UREPORT_SQUASH_INTERVAL_SECS") {
            self.squash_interval_secs = parse_env("UREPORT_SQUASH_INTERVAL_SECS", &secs)?;
        }
        if let Ok(max) = std::env::var("UREPORT_SQUASH_MAX_DISTINCT") {
            self.squash_max_distinct = parse_env("UREPORT_SQUASH_MAX_DISTINCT", &max)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> CoreResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::Config(format!("{name} has invalid value {value:?}")))
}
