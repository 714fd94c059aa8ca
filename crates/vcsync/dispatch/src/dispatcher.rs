//! Multi-cluster event dispatcher

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use vcsync_fairqueue::{FairQueue, RateLimiterConfig};
use vcsync_membership::{
    ClusterChangeListener, ClusterHandle, ConnectionError, ListenerError, WatchHandle, WatchStream,
};
use vcsync_types::{ClusterName, ObjectRef, ResourceKind, WatchOptions, WorkItem};

/// Backoff between watch re-open attempts
pub const DEFAULT_WATCH_RETRY: RateLimiterConfig = RateLimiterConfig {
    base_delay: Duration::from_secs(1),
    max_delay: Duration::from_secs(60),
};

/// Clusters whose watch is down, with the last failure reason
#[derive(Debug, Default)]
struct DegradedSet {
    entries: DashMap<ClusterName, String>,
    changed: Notify,
}

impl DegradedSet {
    fn mark(&self, cluster: ClusterName, reason: String) {
        self.entries.insert(cluster, reason);
        self.changed.notify_one();
    }

    fn clear(&self, cluster: &ClusterName) {
        self.entries.remove(cluster);
    }

    fn contains(&self, cluster: &ClusterName) -> bool {
        self.entries.contains_key(cluster)
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Watches one resource kind across every joined cluster.
///
/// Each cluster gets exactly one pump task, so events from a cluster reach
/// its sub-queue in stream order. Removing a cluster stops its pump before
/// purging its sub-queue; nothing tagged with the cluster is queued once
/// `remove_cluster` returns.
///
/// A watch that cannot be opened or that the server closes leaves the
/// cluster degraded. [`run_watch_recovery`](Self::run_watch_recovery)
/// re-opens degraded watches with exponential backoff.
pub struct MultiClusterDispatcher {
    kind: ResourceKind,
    options: WatchOptions,
    queue: FairQueue,
    clusters: DashMap<ClusterName, Arc<ClusterHandle>>,
    watches: DashMap<ClusterName, Arc<WatchHandle>>,
    degraded: Arc<DegradedSet>,
    retry_backoff: RateLimiterConfig,
    lifecycle: Mutex<()>,
}

impl MultiClusterDispatcher {
    pub fn new(queue: FairQueue, options: WatchOptions) -> Self {
        Self {
            kind: queue.kind().clone(),
            options,
            queue,
            clusters: DashMap::new(),
            watches: DashMap::new(),
            degraded: Arc::new(DegradedSet::default()),
            retry_backoff: DEFAULT_WATCH_RETRY,
            lifecycle: Mutex::new(()),
        }
    }

    /// Bounds of the delay between watch re-open attempts
    pub fn with_retry_backoff(mut self, backoff: RateLimiterConfig) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn options(&self) -> &WatchOptions {
        &self.options
    }

    pub fn queue(&self) -> &FairQueue {
        &self.queue
    }

    /// Clusters with a running watch, sorted
    pub fn watched_clusters(&self) -> Vec<ClusterName> {
        let mut names: Vec<ClusterName> = self
            .watches
            .iter()
            .filter(|w| !self.degraded.contains(w.key()))
            .map(|w| w.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Clusters whose watch could not be opened or was closed by the server,
    /// with the last failure reason
    pub fn degraded_clusters(&self) -> Vec<(ClusterName, String)> {
        let mut degraded: Vec<(ClusterName, String)> =
            self.degraded.entries.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        degraded.sort_by(|a, b| a.0.cmp(&b.0));
        degraded
    }

    // ========== Re-fetch ==========

    /// Current state of the object behind `item`.
    ///
    /// A cluster that has left yields `Ok(None)`, the same as a deleted
    /// object, so reconcilers can treat both as "nothing to do".
    pub async fn get_object(&self, item: &WorkItem) -> Result<Option<ObjectRef>, ConnectionError> {
        let Some(cluster) = self.clusters.get(&item.cluster_name).map(|c| c.value().clone()) else {
            return Ok(None);
        };
        cluster.connection().get(&self.kind, &item.namespaced_name).await
    }

    /// Every watched object of this kind in `cluster`; empty once it left
    pub async fn list_objects(&self, cluster: &ClusterName) -> Result<Vec<ObjectRef>, ConnectionError> {
        let Some(handle) = self.clusters.get(cluster).map(|c| c.value().clone()) else {
            return Ok(Vec::new());
        };
        handle.connection().list(&self.kind, &self.options).await
    }

    // ========== Watch Lifecycle ==========

    /// Re-attempt watch setup for degraded clusters; returns how many recovered
    #[instrument(skip(self), fields(kind = %self.kind))]
    pub async fn retry_degraded(&self) -> usize {
        let _lifecycle = self.lifecycle.lock().await;

        let pending: Vec<ClusterName> = self.degraded.entries.iter().map(|e| e.key().clone()).collect();
        let mut recovered = 0;

        for name in pending {
            let Some(handle) = self.clusters.get(&name).map(|c| c.value().clone()) else {
                self.degraded.clear(&name);
                continue;
            };

            self.stop_watch(&handle).await;
            if let Err(e) = self.queue.add_cluster(name.clone(), handle.weight()).await {
                warn!(cluster = %name, error = %e, "Cannot restore sub-queue");
                continue;
            }

            match self.open_watch(&handle).await {
                Ok(()) => {
                    self.degraded.clear(&name);
                    recovered += 1;
                    info!(cluster = %name, "Watch recovered");
                }
                Err(e) => {
                    debug!(cluster = %name, error = %e, "Watch still unavailable");
                    self.queue.remove_cluster(&name).await;
                    self.degraded.entries.insert(name, e.to_string());
                }
            }
        }

        recovered
    }

    /// Re-open degraded watches until `cancel` fires.
    ///
    /// Idles while every watch is healthy. While some cluster stays
    /// degraded, attempts are spaced `base * 2^attempt` apart up to the
    /// configured cap; the spacing resets once all have recovered.
    #[instrument(skip(self, cancel), fields(kind = %self.kind))]
    pub async fn run_watch_recovery(self: Arc<Self>, cancel: CancellationToken) {
        let mut attempt: u32 = 0;

        loop {
            if self.degraded.is_empty() {
                attempt = 0;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = self.degraded.changed.notified() => continue,
                }
            }

            let delay = self.retry_backoff.delay_for(attempt);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let recovered = self.retry_degraded().await;
            if self.degraded.is_empty() {
                attempt = 0;
            } else {
                attempt = attempt.saturating_add(1);
                debug!(recovered, attempt, "Watches still degraded");
            }
        }

        debug!("Watch recovery stopped");
    }

    async fn open_watch(&self, cluster: &Arc<ClusterHandle>) -> Result<(), ConnectionError> {
        let stream = cluster.connection().watch(&self.kind, &self.options).await?;

        let name = cluster.name().clone();
        let kind = self.kind.clone();
        let queue = self.queue.clone();
        let degraded = self.degraded.clone();

        let watch = WatchHandle::spawn(name.clone(), kind.clone(), move |cancel| {
            pump(stream, queue, name, kind, degraded, cancel)
        });

        self.watches.insert(cluster.name().clone(), watch.clone());
        cluster.track_watch(watch).await;
        Ok(())
    }

    async fn stop_watch(&self, cluster: &Arc<ClusterHandle>) {
        if let Some((_, watch)) = self.watches.remove(cluster.name()) {
            watch.stop().await;
            cluster.untrack_watch(watch.id()).await;
        }
    }
}

/// Forward watch events into the queue until cancelled or the stream ends.
async fn pump(
    mut stream: WatchStream,
    queue: FairQueue,
    cluster: ClusterName,
    kind: ResourceKind,
    degraded: Arc<DegradedSet>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            next = stream.next() => match next {
                Some(event) => {
                    let item = WorkItem::from_event(&cluster, &kind, &event);
                    trace!(item = %item, event_type = ?event.event_type, "Watch event");
                    queue.add(item).await;
                }
                None => {
                    warn!(cluster = %cluster, kind = %kind, "Watch stream closed by server");
                    degraded.mark(cluster.clone(), "watch stream closed".to_string());
                    break;
                }
            },
        }
    }
}

#[async_trait]
impl ClusterChangeListener for MultiClusterDispatcher {
    fn name(&self) -> String {
        format!("{}-dispatcher", self.kind)
    }

    #[instrument(skip(self, cluster), fields(kind = %self.kind, cluster = %cluster.name()))]
    async fn add_cluster(&self, cluster: Arc<ClusterHandle>) -> Result<(), ListenerError> {
        let _lifecycle = self.lifecycle.lock().await;
        let name = cluster.name().clone();

        self.queue
            .add_cluster(name.clone(), cluster.weight())
            .await
            .map_err(|e| ListenerError::Failed(e.to_string()))?;
        self.clusters.insert(name.clone(), cluster.clone());

        match self.open_watch(&cluster).await {
            Ok(()) => {
                self.degraded.clear(&name);
                info!(weight = cluster.weight(), "Watching cluster");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Watch setup failed; cluster degraded");
                self.queue.remove_cluster(&name).await;
                self.degraded.mark(name.clone(), e.to_string());
                Err(ListenerError::WatchSetupFailed {
                    cluster: name,
                    kind: self.kind.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    #[instrument(skip(self, cluster), fields(kind = %self.kind, cluster = %cluster.name()))]
    async fn remove_cluster(&self, cluster: Arc<ClusterHandle>) -> Result<(), ListenerError> {
        let _lifecycle = self.lifecycle.lock().await;
        let name = cluster.name();

        self.stop_watch(&cluster).await;
        self.degraded.clear(name);
        self.clusters.remove(name);
        let purged = self.queue.remove_cluster(name).await;

        info!(purged, "Stopped watching cluster");
        Ok(())
    }
}

impl std::fmt::Debug for MultiClusterDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiClusterDispatcher")
            .field("kind", &self.kind)
            .field("options", &self.options)
            .field("clusters", &self.clusters.len())
            .field("degraded", &self.degraded.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vcsync_fairqueue::RateLimiterConfig;
    use vcsync_membership::{InMemoryCluster, MembershipRegistry};
    use vcsync_types::{NamespacedName, ResourceUid};

    fn pods() -> ResourceKind {
        ResourceKind::new("pods")
    }

    fn pod(ns: &str, name: &str) -> ObjectRef {
        ObjectRef::new(NamespacedName::new(ns, name), ResourceUid::new(format!("uid-{name}")))
    }

    async fn setup(options: WatchOptions) -> (MembershipRegistry, Arc<MultiClusterDispatcher>) {
        let registry = MembershipRegistry::new();
        let queue = FairQueue::new(pods(), RateLimiterConfig::default());
        let dispatcher = Arc::new(MultiClusterDispatcher::new(queue, options));
        registry.register_listener(dispatcher.clone()).await;
        (registry, dispatcher)
    }

    async fn wait_for_len(queue: &FairQueue, len: usize) {
        for _ in 0..100 {
            if queue.len().await == len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue never reached {len} items, has {}", queue.len().await);
    }

    #[tokio::test]
    async fn test_events_become_work_items() {
        let (registry, dispatcher) = setup(WatchOptions::default()).await;
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.apply(&pods(), pod("default", "existing"));

        registry.join("a".into(), cluster.clone()).await.unwrap();
        assert_eq!(dispatcher.watched_clusters(), vec![ClusterName::new("a")]);

        cluster.apply(&pods(), pod("default", "web"));
        wait_for_len(dispatcher.queue(), 2).await;

        let first = dispatcher.queue().get().await.unwrap();
        assert_eq!(first.cluster_name, ClusterName::new("a"));
        assert_eq!(first.namespaced_name.name, "existing");
        let second = dispatcher.queue().get().await.unwrap();
        assert_eq!(second.namespaced_name.name, "web");
    }

    #[tokio::test]
    async fn test_burst_coalesces() {
        let (registry, dispatcher) = setup(WatchOptions::default()).await;
        let cluster = Arc::new(InMemoryCluster::new());
        registry.join("a".into(), cluster.clone()).await.unwrap();

        for _ in 0..10 {
            cluster.apply(&pods(), pod("default", "web"));
        }
        cluster.apply(&pods(), pod("default", "db"));
        wait_for_len(dispatcher.queue(), 2).await;
    }

    #[tokio::test]
    async fn test_namespace_filter() {
        let (registry, dispatcher) = setup(WatchOptions::in_namespace("prod")).await;
        let cluster = Arc::new(InMemoryCluster::new());
        registry.join("a".into(), cluster.clone()).await.unwrap();

        cluster.apply(&pods(), pod("dev", "skip"));
        cluster.apply(&pods(), pod("prod", "api"));
        wait_for_len(dispatcher.queue(), 1).await;

        let item = dispatcher.queue().get().await.unwrap();
        assert_eq!(item.namespaced_name, NamespacedName::new("prod", "api"));
    }

    #[tokio::test]
    async fn test_leave_stops_watch_and_purges() {
        let (registry, dispatcher) = setup(WatchOptions::default()).await;
        let a = Arc::new(InMemoryCluster::new());
        let b = Arc::new(InMemoryCluster::new());
        registry.join("a".into(), a.clone()).await.unwrap();
        registry.join("b".into(), b.clone()).await.unwrap();

        a.apply(&pods(), pod("default", "web"));
        b.apply(&pods(), pod("default", "db"));
        wait_for_len(dispatcher.queue(), 2).await;

        registry.leave(&"a".into()).await.unwrap();
        assert_eq!(a.active_watches(), 0);
        assert_eq!(dispatcher.queue().cluster_len(&"a".into()).await, 0);
        assert_eq!(dispatcher.watched_clusters(), vec![ClusterName::new("b")]);

        // Changes after leave never reach the queue
        a.apply(&pods(), pod("default", "late"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(dispatcher.queue().len().await, 1);

        let item = dispatcher.queue().get().await.unwrap();
        assert_eq!(item.cluster_name, ClusterName::new("b"));
    }

    #[tokio::test]
    async fn test_watch_failure_degrades_then_recovers() {
        let (registry, dispatcher) = setup(WatchOptions::default()).await;
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.set_watch_failure(true);

        // Listener failure does not fail the join
        registry.join("a".into(), cluster.clone()).await.unwrap();
        assert!(dispatcher.watched_clusters().is_empty());
        assert_eq!(dispatcher.degraded_clusters().len(), 1);
        assert!(dispatcher.queue().clusters().await.is_empty());

        assert_eq!(dispatcher.retry_degraded().await, 0);

        cluster.set_watch_failure(false);
        cluster.apply(&pods(), pod("default", "web"));
        assert_eq!(dispatcher.retry_degraded().await, 1);
        assert!(dispatcher.degraded_clusters().is_empty());
        wait_for_len(dispatcher.queue(), 1).await;
    }

    fn fast_retry() -> RateLimiterConfig {
        RateLimiterConfig {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        }
    }

    async fn setup_with_recovery() -> (MembershipRegistry, Arc<MultiClusterDispatcher>) {
        let registry = MembershipRegistry::new();
        let queue = FairQueue::new(pods(), RateLimiterConfig::default());
        let dispatcher =
            Arc::new(MultiClusterDispatcher::new(queue, WatchOptions::default()).with_retry_backoff(fast_retry()));
        registry.register_listener(dispatcher.clone()).await;
        (registry, dispatcher)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never held");
    }

    #[tokio::test]
    async fn test_closed_stream_is_reopened() {
        let (registry, dispatcher) = setup_with_recovery().await;
        let cluster = Arc::new(InMemoryCluster::new());
        registry.join("a".into(), cluster.clone()).await.unwrap();

        let cancel = CancellationToken::new();
        let recovery = tokio::spawn(dispatcher.clone().run_watch_recovery(cancel.clone()));

        cluster.apply(&pods(), pod("default", "web"));
        wait_for_len(dispatcher.queue(), 1).await;

        assert_eq!(cluster.close_watches(), 1);
        wait_until(|| cluster.active_watches() == 1 && dispatcher.degraded_clusters().is_empty()).await;

        // Events flow again through the re-opened watch
        cluster.apply(&pods(), pod("default", "db"));
        wait_for_len(dispatcher.queue(), 2).await;
        assert_eq!(dispatcher.watched_clusters(), vec![ClusterName::new("a")]);

        cancel.cancel();
        recovery.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_setup_recovers_in_background() {
        let (registry, dispatcher) = setup_with_recovery().await;
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.set_watch_failure(true);

        let cancel = CancellationToken::new();
        let recovery = tokio::spawn(dispatcher.clone().run_watch_recovery(cancel.clone()));

        registry.join("a".into(), cluster.clone()).await.unwrap();
        assert_eq!(dispatcher.degraded_clusters().len(), 1);

        // Several attempts fail while the API stays unreachable
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(dispatcher.degraded_clusters().len(), 1);

        cluster.set_watch_failure(false);
        cluster.apply(&pods(), pod("default", "web"));
        wait_until(|| dispatcher.watched_clusters() == vec![ClusterName::new("a")]).await;
        wait_for_len(dispatcher.queue(), 1).await;

        cancel.cancel();
        recovery.await.unwrap();
    }

    #[tokio::test]
    async fn test_recovery_skips_departed_cluster() {
        let (registry, dispatcher) = setup_with_recovery().await;
        let cluster = Arc::new(InMemoryCluster::new());
        registry.join("a".into(), cluster.clone()).await.unwrap();
        cluster.close_watches();
        wait_until(|| !dispatcher.degraded_clusters().is_empty()).await;

        registry.leave(&"a".into()).await.unwrap();
        assert_eq!(dispatcher.retry_degraded().await, 0);
        assert!(dispatcher.degraded_clusters().is_empty());
        assert_eq!(cluster.active_watches(), 0);
    }

    #[tokio::test]
    async fn test_get_object_after_leave_is_none() {
        let (registry, dispatcher) = setup(WatchOptions::default()).await;
        let cluster = Arc::new(InMemoryCluster::new());
        registry.join("a".into(), cluster.clone()).await.unwrap();
        cluster.apply(&pods(), pod("default", "web"));
        wait_for_len(dispatcher.queue(), 1).await;

        let item = dispatcher.queue().get().await.unwrap();
        assert!(dispatcher.get_object(&item).await.unwrap().is_some());
        assert_eq!(dispatcher.list_objects(&"a".into()).await.unwrap().len(), 1);

        registry.leave(&"a".into()).await.unwrap();
        assert!(dispatcher.get_object(&item).await.unwrap().is_none());
        assert!(dispatcher.list_objects(&"a".into()).await.unwrap().is_empty());
    }
}
