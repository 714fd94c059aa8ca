//! Scheduler error types

use thiserror::Error;
use vcsync_fairqueue::FairQueueError;
use vcsync_membership::{ListenerError, MembershipError};
use vcsync_patrol::PatrolError;
use vcsync_types::{ReconcileError, ResourceKind};

/// Errors surfaced by the scheduler and the syncer
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Queue error: {0}")]
    Queue(#[from] FairQueueError),

    #[error("Membership error: {0}")]
    Membership(#[from] MembershipError),

    #[error("Patrol error: {0}")]
    Patrol(#[from] PatrolError),

    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("Resource kind already registered: {0}")]
    DuplicateKind(ResourceKind),

    #[error("Resource kind not registered: {0}")]
    UnknownKind(ResourceKind),

    #[error("Syncer already started")]
    AlreadyStarted,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

impl From<::config::ConfigError> for SchedulerError {
    fn from(e: ::config::ConfigError) -> Self {
        SchedulerError::Config(e.to_string())
    }
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;
