//! Patrol error types

use thiserror::Error;

/// Patrol construction errors
#[derive(Debug, Error, PartialEq)]
pub enum PatrolError {
    #[error("Patrol {0} has no reconciler")]
    MissingReconciler(String),

    #[error("Patrol period must be greater than zero")]
    InvalidPeriod,

    #[error("Jitter factor must be between 0 and 1, got {0}")]
    InvalidJitterFactor(f64),
}

/// Result type for patrol operations
pub type Result<T> = std::result::Result<T, PatrolError>;
