//! Configuration, paths and logging setup for the U-Report counts services.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_LOG_FORMAT, DEFAULT_LOG_LEVEL, DEFAULT_NEGATIVE_NET_POLICY,
    DEFAULT_SQUASH_INTERVAL_SECS, DEFAULT_SQUASH_MAX_DISTINCT,
};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use paths::Paths;
