//! Error types for counter maintenance.

use counts_database::CountsError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MaintenanceError {
    #[error("Counts error: {0}")]
    Counts(#[from] CountsError),

    /// A registered table does not have the shape this maintainer writes.
    #[error("Count table {table} has an unexpected layout: {reason}")]
    SpecMismatch { table: String, reason: String },
}

pub type MaintenanceResult<T> = Result<T, MaintenanceError>;
