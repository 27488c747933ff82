//! SQLite-backed squashable counters.
//!
//! Counts are kept as append-only delta rows and periodically collapsed so
//! hot counters never serialize writers on a single row:
//! - [`delta`]: the delta writer (`record`, `record_many`)
//! - [`squash`]: the squasher, one transaction per squash key
//! - [`aggregate`]: sums and per-scope, per-day and per-month totals
//!
//! A table is described by a [`CountSpec`] and created with
//! [`migrations::install_count_table`], which also registers the spec so
//! other processes (the squash worker, the CLI) can load it back.
//!
//! # Architecture
//!
//! [`CountsDatabase`] wraps one synchronous connection. [`AsyncCountsDatabase`]
//! runs the same operations on a dedicated SQLite thread for async callers.
//!
//! ```ignore
//! let db = CountsDatabase::open(path)?;
//! let spec = CountSpec::scoped("reporters_counts");
//! db.install(&spec)?;
//! db.record_scope(&spec, "gender:f", 1)?;
//! db.squash(&spec)?;
//! ```

pub mod aggregate;
mod db;
pub mod delta;
mod error;
mod executor;
pub mod migrations;
mod models;
mod spec;
pub mod squash;
mod write_tx;

pub use db::CountsDatabase;
pub use error::{CountsError, CountsResult};
pub use executor::AsyncCountsDatabase;
pub use migrations::{install_count_table, run_migrations};
pub use models::{CountFilter, CountKey, CounterRow, DimValue};
pub use spec::{
    Column, ColumnType, CountSpec, NegativeNetPolicy, DAY_COLUMN, DEFAULT_SQUASH_MAX_DISTINCT,
    SCOPE_COLUMN,
};
