//! Cluster lifecycle listener capability

use crate::handle::ClusterHandle;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use vcsync_types::{ClusterName, ResourceKind};

/// Errors a listener may report back to the registry.
///
/// A failing listener never prevents other listeners from being notified.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ListenerError {
    #[error("Watch setup failed for {kind} in {cluster}: {reason}")]
    WatchSetupFailed {
        cluster: ClusterName,
        kind: ResourceKind,
        reason: String,
    },

    #[error("Listener {listener} panicked")]
    Panicked { listener: String },

    #[error("Listener failed: {0}")]
    Failed(String),
}

/// Reacts to clusters joining and leaving.
///
/// The registry holds listeners weakly; a listener that is dropped elsewhere
/// is silently unregistered.
#[async_trait]
pub trait ClusterChangeListener: Send + Sync {
    /// Name used in logs and failure events
    fn name(&self) -> String;

    /// A cluster joined (or was already joined when the listener registered)
    async fn add_cluster(&self, cluster: Arc<ClusterHandle>) -> Result<(), ListenerError>;

    /// A cluster is leaving. On return the listener must not produce further
    /// work for it.
    async fn remove_cluster(&self, cluster: Arc<ClusterHandle>) -> Result<(), ListenerError>;
}
