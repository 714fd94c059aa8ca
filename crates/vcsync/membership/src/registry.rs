//! Cluster membership registry

use crate::connection::ClusterConnection;
use crate::error::{MembershipError, Result};
use crate::handle::ClusterHandle;
use crate::listener::{ClusterChangeListener, ListenerError};
use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{info, instrument, warn};
use vcsync_types::{ClusterName, EventSource, SyncEvent, SyncEventEnvelope};

/// Weight given to clusters joined without an explicit weight
pub const DEFAULT_CLUSTER_WEIGHT: u32 = 1;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy)]
enum Change {
    Added,
    Removed,
}

/// Registry of joined tenant clusters.
///
/// Join, leave and listener registration are serialized: a listener never
/// sees a cluster's removal before its addition, and one registering while
/// clusters are joined is replayed the current membership exactly once.
pub struct MembershipRegistry {
    clusters: DashMap<ClusterName, Arc<ClusterHandle>>,
    listeners: RwLock<Vec<Weak<dyn ClusterChangeListener>>>,
    lifecycle: Mutex<()>,
    event_tx: broadcast::Sender<SyncEventEnvelope>,
}

impl MembershipRegistry {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            clusters: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            lifecycle: Mutex::new(()),
            event_tx,
        }
    }

    // ========== Listeners ==========

    /// Register a listener and replay current membership to it.
    ///
    /// The registry keeps only a weak reference; dropping the last strong
    /// reference unregisters the listener.
    #[instrument(skip(self, listener), fields(listener = %listener.name()))]
    pub async fn register_listener(&self, listener: Arc<dyn ClusterChangeListener>) {
        let _lifecycle = self.lifecycle.lock().await;

        self.listeners.write().await.push(Arc::downgrade(&listener));

        let current: Vec<Arc<ClusterHandle>> = self.clusters.iter().map(|c| c.value().clone()).collect();
        info!(replayed = current.len(), "Listener registered");

        for cluster in current {
            let _ = self.notify(&listener, Change::Added, &cluster).await;
        }
    }

    /// Number of listeners still alive
    pub async fn listener_count(&self) -> usize {
        let mut listeners = self.listeners.write().await;
        listeners.retain(|l| l.strong_count() > 0);
        listeners.len()
    }

    // ========== Membership ==========

    /// Join a cluster with the default weight
    pub async fn join(&self, name: ClusterName, connection: Arc<dyn ClusterConnection>) -> Result<Arc<ClusterHandle>> {
        self.join_with_weight(name, connection, DEFAULT_CLUSTER_WEIGHT).await
    }

    /// Join a cluster and notify every listener.
    ///
    /// Listener failures are logged and published as events; they do not
    /// fail the join.
    #[instrument(skip(self, connection))]
    pub async fn join_with_weight(
        &self,
        name: ClusterName,
        connection: Arc<dyn ClusterConnection>,
        weight: u32,
    ) -> Result<Arc<ClusterHandle>> {
        if weight == 0 {
            return Err(MembershipError::InvalidWeight(weight));
        }

        let _lifecycle = self.lifecycle.lock().await;

        if self.clusters.contains_key(&name) {
            return Err(MembershipError::DuplicateCluster(name));
        }

        let handle = Arc::new(ClusterHandle::new(name.clone(), connection, weight));
        self.clusters.insert(name.clone(), handle.clone());

        let failed = self.notify_all(Change::Added, &handle).await;
        info!(cluster = %name, weight, failed_listeners = failed, "Cluster joined");

        self.emit(SyncEventEnvelope::info(
            SyncEvent::ClusterJoined { cluster: name, weight },
            EventSource::Membership,
        ));

        Ok(handle)
    }

    /// Leave a cluster.
    ///
    /// Every listener is told to remove the cluster, then any watch still
    /// tracked on the handle is stopped. When this returns no watch of the
    /// cluster is running.
    #[instrument(skip(self))]
    pub async fn leave(&self, name: &ClusterName) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let handle = self
            .clusters
            .get(name)
            .map(|h| h.value().clone())
            .ok_or_else(|| MembershipError::UnknownCluster(name.clone()))?;

        let failed = self.notify_all(Change::Removed, &handle).await;
        let leftover = handle.cancel_watches().await;
        self.clusters.remove(name);

        info!(cluster = %name, failed_listeners = failed, leftover_watches = leftover, "Cluster left");

        self.emit(SyncEventEnvelope::info(
            SyncEvent::ClusterLeft { cluster: name.clone() },
            EventSource::Membership,
        ));

        Ok(())
    }

    pub fn get(&self, name: &ClusterName) -> Option<Arc<ClusterHandle>> {
        self.clusters.get(name).map(|h| h.value().clone())
    }

    pub fn contains(&self, name: &ClusterName) -> bool {
        self.clusters.contains_key(name)
    }

    /// Names of joined clusters, sorted
    pub fn cluster_names(&self) -> Vec<ClusterName> {
        let mut names: Vec<ClusterName> = self.clusters.iter().map(|c| c.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    // ========== Events ==========

    /// Subscribe to membership events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEventEnvelope> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: SyncEventEnvelope) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    // ========== Notification ==========

    /// Notify every live listener concurrently; returns how many failed.
    async fn notify_all(&self, change: Change, cluster: &Arc<ClusterHandle>) -> usize {
        let live: Vec<Arc<dyn ClusterChangeListener>> = {
            let mut listeners = self.listeners.write().await;
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };

        let results = join_all(live.iter().map(|listener| self.notify(listener, change, cluster))).await;
        results.iter().filter(|r| r.is_err()).count()
    }

    /// Notify one listener, converting a panic into an error
    async fn notify(
        &self,
        listener: &Arc<dyn ClusterChangeListener>,
        change: Change,
        cluster: &Arc<ClusterHandle>,
    ) -> std::result::Result<(), ListenerError> {
        let call = match change {
            Change::Added => listener.add_cluster(cluster.clone()),
            Change::Removed => listener.remove_cluster(cluster.clone()),
        };

        let result = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(ListenerError::Panicked {
                listener: listener.name(),
            }),
        };

        if let Err(e) = &result {
            warn!(
                listener = %listener.name(),
                cluster = %cluster.name(),
                change = ?change,
                error = %e,
                "Listener failed"
            );
            self.emit(SyncEventEnvelope::warning(
                SyncEvent::ListenerFailed {
                    cluster: cluster.name().clone(),
                    listener: listener.name(),
                    reason: e.to_string(),
                },
                EventSource::Membership,
            ));
        }

        result
    }
}

impl Default for MembershipRegistry {
    fn default() -> Self {
        Self::new()
    }
}
