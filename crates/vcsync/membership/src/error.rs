//! Membership error types

use thiserror::Error;
use vcsync_types::ClusterName;

/// Membership registry errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MembershipError {
    #[error("Cluster already joined: {0}")]
    DuplicateCluster(ClusterName),

    #[error("Cluster not joined: {0}")]
    UnknownCluster(ClusterName),

    #[error("Invalid weight {0}: weights must be at least 1")]
    InvalidWeight(u32),
}

/// Result type for membership operations
pub type Result<T> = std::result::Result<T, MembershipError>;
