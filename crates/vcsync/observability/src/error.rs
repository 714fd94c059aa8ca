//! Observability error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("Metric registration failed: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Metric encoding failed: {0}")]
    Encoding(String),
}

pub type Result<T> = std::result::Result<T, ObservabilityError>;
