//! Tenant cluster API capability
//!
//! The transport behind a connection (HTTP, gRPC, in-process) is not this
//! crate's concern; it only needs filtered watches and point-in-time reads.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use vcsync_types::{NamespacedName, ObjectRef, ResourceKind, WatchEvent, WatchOptions};

/// Stream of raw watch events; ends when the server closes the watch
pub type WatchStream = BoxStream<'static, WatchEvent>;

/// Errors reported by a cluster connection
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Cluster API unavailable: {0}")]
    Unavailable(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// Connection to one tenant cluster's API
#[async_trait]
pub trait ClusterConnection: Send + Sync {
    /// Open a filtered watch over `kind`.
    ///
    /// Implementations deliver an `Added` event for every existing matching
    /// object before live changes, so a new watcher starts from a full view.
    async fn watch(&self, kind: &ResourceKind, options: &WatchOptions) -> Result<WatchStream, ConnectionError>;

    /// Current state of one object, `None` if it does not exist
    async fn get(&self, kind: &ResourceKind, key: &NamespacedName) -> Result<Option<ObjectRef>, ConnectionError>;

    /// All objects of `kind` passing `options`
    async fn list(&self, kind: &ResourceKind, options: &WatchOptions) -> Result<Vec<ObjectRef>, ConnectionError>;
}
