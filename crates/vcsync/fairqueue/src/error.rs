//! FairQueue error types

use thiserror::Error;
use vcsync_types::ClusterName;

/// FairQueue errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FairQueueError {
    #[error("Invalid weight {0}: weights must be at least 1")]
    InvalidWeight(u32),

    #[error("Cluster not registered with queue: {0}")]
    UnknownCluster(ClusterName),
}

/// Result type for queue operations
pub type Result<T> = std::result::Result<T, FairQueueError>;
