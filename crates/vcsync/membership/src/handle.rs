//! Joined clusters and their watch subscriptions

use crate::connection::ClusterConnection;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;
use vcsync_types::{ClusterName, ResourceKind};

/// A cancellable watch over one kind in one cluster.
///
/// The handle owns the task pumping watch events. [`WatchHandle::stop`]
/// cancels the task and waits for it to exit, so once `stop` returns the
/// pump will not produce anything else.
pub struct WatchHandle {
    id: Uuid,
    cluster: ClusterName,
    kind: ResourceKind,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WatchHandle {
    /// Spawn `pump` on the runtime and wrap it in a handle.
    ///
    /// The pump receives the handle's cancellation token and must return
    /// promptly once it is cancelled.
    pub fn spawn<F, Fut>(cluster: ClusterName, kind: ResourceKind, pump: F) -> Arc<Self>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pump(cancel.clone()));

        Arc::new(Self {
            id: Uuid::new_v4(),
            cluster,
            kind,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cluster(&self) -> &ClusterName {
        &self.cluster
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel the pump and wait for it to exit. Idempotent; concurrent
    /// callers all return after the pump has exited.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            match handle.await {
                Ok(()) => {
                    debug!(cluster = %self.cluster, kind = %self.kind, watch_id = %self.id, "Watch stopped");
                }
                Err(e) if e.is_panic() => {
                    warn!(cluster = %self.cluster, kind = %self.kind, watch_id = %self.id, "Watch pump panicked");
                }
                Err(_) => {}
            }
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("id", &self.id)
            .field("cluster", &self.cluster)
            .field("kind", &self.kind)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// A joined tenant cluster.
///
/// Shared by the registry and every listener. Watches opened on behalf of
/// the cluster are tracked here so that leaving the cluster can cancel them
/// even if a listener forgets to.
pub struct ClusterHandle {
    name: ClusterName,
    connection: Arc<dyn ClusterConnection>,
    weight: u32,
    joined_at: DateTime<Utc>,
    watches: Mutex<Vec<Arc<WatchHandle>>>,
}

impl ClusterHandle {
    pub fn new(name: ClusterName, connection: Arc<dyn ClusterConnection>, weight: u32) -> Self {
        Self {
            name,
            connection,
            weight,
            joined_at: Utc::now(),
            watches: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &ClusterName {
        &self.name
    }

    pub fn connection(&self) -> &Arc<dyn ClusterConnection> {
        &self.connection
    }

    /// Fair-share weight requested at join time
    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn joined_at(&self) -> DateTime<Utc> {
        self.joined_at
    }

    pub async fn track_watch(&self, watch: Arc<WatchHandle>) {
        self.watches.lock().await.push(watch);
    }

    /// Forget a watch the owner has already stopped
    pub async fn untrack_watch(&self, id: Uuid) {
        self.watches.lock().await.retain(|w| w.id() != id);
    }

    pub async fn active_watches(&self) -> usize {
        self.watches.lock().await.iter().filter(|w| !w.is_stopped()).count()
    }

    /// Stop every tracked watch; returns how many were tracked
    pub async fn cancel_watches(&self) -> usize {
        let watches = std::mem::take(&mut *self.watches.lock().await);
        for watch in &watches {
            watch.stop().await;
        }
        watches.len()
    }
}

impl std::fmt::Debug for ClusterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterHandle")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .field("joined_at", &self.joined_at)
            .finish_non_exhaustive()
    }
}
