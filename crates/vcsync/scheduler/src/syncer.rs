//! Syncer composition root

use crate::config::SyncerConfig;
use crate::error::{Result, SchedulerError};
use crate::events::{EventAggregator, SourceStats};
use crate::reconciler::Reconciler;
use crate::scheduler::ReconcileScheduler;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use vcsync_dispatch::MultiClusterDispatcher;
use vcsync_fairqueue::FairQueue;
use vcsync_membership::{ClusterConnection, ClusterHandle, MembershipRegistry};
use vcsync_patrol::{Patrol, PatrolReconciler};
use vcsync_types::{
    ClusterName, EventSource, MetricsSink, NoopMetricsSink, ResourceKind, SyncEventEnvelope, WatchOptions,
};

/// Everything the syncer needs to know about one resource kind
pub struct KindRegistration {
    kind: ResourceKind,
    reconciler: Arc<dyn Reconciler>,
    watch_options: WatchOptions,
    patrol: Option<Arc<dyn PatrolReconciler>>,
    patrol_period: Option<Duration>,
    max_concurrent_reconciles: Option<usize>,
}

impl KindRegistration {
    pub fn new(kind: impl Into<ResourceKind>, reconciler: Arc<dyn Reconciler>) -> Self {
        Self {
            kind: kind.into(),
            reconciler,
            watch_options: WatchOptions::default(),
            patrol: None,
            patrol_period: None,
            max_concurrent_reconciles: None,
        }
    }

    /// Namespace and label filter for the tenant watches
    pub fn with_watch_options(mut self, options: WatchOptions) -> Self {
        self.watch_options = options;
        self
    }

    pub fn with_patrol(mut self, reconciler: Arc<dyn PatrolReconciler>) -> Self {
        self.patrol = Some(reconciler);
        self
    }

    /// Override the configured patrol period for this kind
    pub fn with_patrol_period(mut self, period: Duration) -> Self {
        self.patrol_period = Some(period);
        self
    }

    /// Override the configured worker count for this kind
    pub fn with_max_concurrent_reconciles(mut self, workers: usize) -> Self {
        self.max_concurrent_reconciles = Some(workers);
        self
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }
}

struct KindRuntime {
    dispatcher: Arc<MultiClusterDispatcher>,
    scheduler: Arc<ReconcileScheduler>,
    patrol: Option<Arc<Patrol>>,
}

/// Builder for [`Syncer`]
pub struct SyncerBuilder {
    config: SyncerConfig,
    metrics: Arc<dyn MetricsSink>,
    registrations: Vec<KindRegistration>,
}

impl SyncerBuilder {
    pub fn new(config: SyncerConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(NoopMetricsSink),
            registrations: Vec::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn register_kind(mut self, registration: KindRegistration) -> Self {
        self.registrations.push(registration);
        self
    }

    /// Wire up every registered kind. Must be called inside a tokio runtime.
    pub async fn build(self) -> Result<Syncer> {
        self.config.validate()?;

        let mut kinds = BTreeMap::new();
        for registration in self.registrations {
            let kind = registration.kind.clone();
            if kinds.contains_key(&kind) {
                return Err(SchedulerError::DuplicateKind(kind));
            }
            let runtime = Self::build_kind(&self.config, &self.metrics, registration)?;
            kinds.insert(kind, runtime);
        }

        // Nothing below can fail
        let registry = Arc::new(MembershipRegistry::new());
        let events = EventAggregator::new();
        let mut forwarders = vec![events.spawn_forwarder(registry.subscribe(), EventSource::Membership)];

        for (kind, runtime) in &kinds {
            registry.register_listener(runtime.dispatcher.clone()).await;

            forwarders.push(events.spawn_forwarder(runtime.scheduler.subscribe(), EventSource::Scheduler));
            if let Some(patrol) = &runtime.patrol {
                forwarders.push(events.spawn_forwarder(patrol.subscribe(), EventSource::Patrol));
            }

            info!(
                kind = %kind,
                workers = runtime.scheduler.max_concurrent_reconciles(),
                patrol = runtime.patrol.is_some(),
                "Kind registered"
            );
        }

        Ok(Syncer {
            config: self.config,
            metrics: self.metrics,
            registry,
            kinds,
            events,
            forwarders: std::sync::Mutex::new(forwarders),
            running: Mutex::new(None),
        })
    }

    fn build_kind(
        config: &SyncerConfig,
        metrics: &Arc<dyn MetricsSink>,
        registration: KindRegistration,
    ) -> Result<KindRuntime> {
        let queue = FairQueue::new(registration.kind.clone(), config.queue.rate_limiter());
        let dispatcher = Arc::new(
            MultiClusterDispatcher::new(queue.clone(), registration.watch_options)
                .with_retry_backoff(config.watch.retry_backoff()),
        );

        let workers = registration
            .max_concurrent_reconciles
            .unwrap_or(config.scheduler.max_concurrent_reconciles);
        let scheduler = Arc::new(
            ReconcileScheduler::new(queue, registration.reconciler)
                .with_metrics(metrics.clone())
                .with_max_concurrent_reconciles(workers),
        );

        let patrol = match registration.patrol {
            Some(reconciler) if config.patrol.enabled => Some(Arc::new(
                Patrol::builder(registration.kind.clone())
                    .with_period(registration.patrol_period.unwrap_or_else(|| config.patrol.period()))
                    .with_jitter_factor(config.patrol.jitter_factor)
                    .with_reconciler(reconciler)
                    .with_metrics(metrics.clone())
                    .build()?,
            )),
            _ => None,
        };

        Ok(KindRuntime {
            dispatcher,
            scheduler,
            patrol,
        })
    }
}

struct Running {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Fair multi-cluster syncer: membership, dispatch, scheduling and patrol
/// for every registered kind.
pub struct Syncer {
    config: SyncerConfig,
    metrics: Arc<dyn MetricsSink>,
    registry: Arc<MembershipRegistry>,
    kinds: BTreeMap<ResourceKind, KindRuntime>,
    events: EventAggregator,
    forwarders: std::sync::Mutex<Vec<JoinHandle<()>>>,
    running: Mutex<Option<Running>>,
}

impl Syncer {
    pub fn builder(config: SyncerConfig) -> SyncerBuilder {
        SyncerBuilder::new(config)
    }

    pub fn config(&self) -> &SyncerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MembershipRegistry> {
        &self.registry
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.kinds.keys().cloned().collect()
    }

    pub fn dispatcher(&self, kind: &ResourceKind) -> Result<Arc<MultiClusterDispatcher>> {
        self.runtime(kind).map(|r| r.dispatcher.clone())
    }

    pub fn scheduler(&self, kind: &ResourceKind) -> Result<Arc<ReconcileScheduler>> {
        self.runtime(kind).map(|r| r.scheduler.clone())
    }

    pub fn patrol(&self, kind: &ResourceKind) -> Result<Option<Arc<Patrol>>> {
        self.runtime(kind).map(|r| r.patrol.clone())
    }

    fn runtime(&self, kind: &ResourceKind) -> Result<&KindRuntime> {
        self.kinds
            .get(kind)
            .ok_or_else(|| SchedulerError::UnknownKind(kind.clone()))
    }

    // ========== Lifecycle ==========

    /// Start reconcile workers, watch recovery and patrols for every kind.
    ///
    /// Everything stops when `cancel` fires or [`shutdown`](Self::shutdown)
    /// is called.
    #[instrument(skip(self, cancel))]
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }

        let cancel = cancel.child_token();
        let mut tasks = Vec::new();
        for runtime in self.kinds.values() {
            tasks.push(tokio::spawn(runtime.scheduler.clone().run(cancel.clone())));
            tasks.push(tokio::spawn(runtime.dispatcher.clone().run_watch_recovery(cancel.clone())));
            if let Some(patrol) = &runtime.patrol {
                tasks.push(patrol.clone().spawn(cancel.clone()));
            }
        }

        info!(kinds = self.kinds.len(), tasks = tasks.len(), "Syncer started");
        *running = Some(Running { cancel, tasks });
        Ok(())
    }

    /// Stop workers and patrols, wait for them, then shut the queues down.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        if let Some(running) = self.running.lock().await.take() {
            running.cancel.cancel();
            for task in running.tasks {
                if let Err(e) = task.await {
                    warn!(error = %e, "Syncer task exited abnormally");
                }
            }
        }

        for runtime in self.kinds.values() {
            runtime.scheduler.queue().shut_down().await;
        }

        if let Ok(mut forwarders) = self.forwarders.lock() {
            for forwarder in forwarders.drain(..) {
                forwarder.abort();
            }
        }

        info!("Syncer stopped");
    }

    // ========== Membership ==========

    /// Join a tenant cluster with its configured weight
    pub async fn join_cluster(
        &self,
        name: ClusterName,
        connection: Arc<dyn ClusterConnection>,
    ) -> Result<Arc<ClusterHandle>> {
        let weight = self.config.weight_for(&name);
        self.join_cluster_with_weight(name, connection, weight).await
    }

    pub async fn join_cluster_with_weight(
        &self,
        name: ClusterName,
        connection: Arc<dyn ClusterConnection>,
        weight: u32,
    ) -> Result<Arc<ClusterHandle>> {
        Ok(self.registry.join_with_weight(name, connection, weight).await?)
    }

    /// Leave a tenant cluster. Once this returns no work for it is queued
    /// and its per-cluster metric series are dropped.
    pub async fn leave_cluster(&self, name: &ClusterName) -> Result<()> {
        self.registry.leave(name).await?;
        for kind in self.kinds.keys() {
            self.metrics.forget_cluster(kind, name);
        }
        Ok(())
    }

    /// Re-attempt degraded watches now, without waiting for the background
    /// recovery; returns how many recovered
    pub async fn retry_degraded(&self) -> usize {
        let mut recovered = 0;
        for runtime in self.kinds.values() {
            recovered += runtime.dispatcher.retry_degraded().await;
        }
        recovered
    }

    /// Unified stream of membership, scheduling and patrol events
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEventEnvelope> {
        self.events.subscribe()
    }

    /// Per-source delivery counts of the unified event stream
    pub fn event_stats(&self) -> Vec<SourceStats> {
        self.events.stats()
    }
}

impl std::fmt::Debug for Syncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Syncer")
            .field("kinds", &self.kinds.keys().collect::<Vec<_>>())
            .field("clusters", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use vcsync_membership::InMemoryCluster;
    use vcsync_types::{ReconcileError, ReconcileResult, SyncEvent, WorkItem};

    struct NoopReconciler;

    #[async_trait]
    impl Reconciler for NoopReconciler {
        async fn reconcile(&self, _item: &WorkItem) -> std::result::Result<ReconcileResult, ReconcileError> {
            Ok(ReconcileResult::done())
        }
    }

    struct NoopPatrol;

    #[async_trait]
    impl PatrolReconciler for NoopPatrol {
        async fn patrol(&self) -> std::result::Result<(), ReconcileError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_duplicate_kind_rejected() {
        let result = Syncer::builder(SyncerConfig::default())
            .register_kind(KindRegistration::new("pods", Arc::new(NoopReconciler)))
            .register_kind(KindRegistration::new("pods", Arc::new(NoopReconciler)))
            .build()
            .await;

        assert!(matches!(result, Err(SchedulerError::DuplicateKind(kind)) if kind.as_str() == "pods"));
    }

    #[tokio::test]
    async fn test_unknown_kind_and_patrol_wiring() {
        let syncer = Syncer::builder(SyncerConfig::default())
            .register_kind(KindRegistration::new("pods", Arc::new(NoopReconciler)).with_patrol(Arc::new(NoopPatrol)))
            .register_kind(KindRegistration::new("services", Arc::new(NoopReconciler)))
            .build()
            .await
            .unwrap();

        assert_eq!(syncer.kinds(), vec![ResourceKind::new("pods"), ResourceKind::new("services")]);
        assert!(syncer.patrol(&"pods".into()).unwrap().is_some());
        assert!(syncer.patrol(&"services".into()).unwrap().is_none());
        assert!(matches!(
            syncer.scheduler(&"nodes".into()),
            Err(SchedulerError::UnknownKind(_))
        ));
        assert_eq!(syncer.registry().listener_count().await, 2);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_at_build() {
        let mut config = SyncerConfig::default();
        config.cluster_weights.insert("empty".to_string(), 0);

        let result = Syncer::builder(config)
            .register_kind(KindRegistration::new("pods", Arc::new(NoopReconciler)))
            .build()
            .await;

        assert!(matches!(result, Err(SchedulerError::Config(reason)) if reason.contains("empty")));
    }

    #[tokio::test]
    async fn test_patrol_disabled_by_config() {
        let mut config = SyncerConfig::default();
        config.patrol.enabled = false;

        let syncer = Syncer::builder(config)
            .register_kind(KindRegistration::new("pods", Arc::new(NoopReconciler)).with_patrol(Arc::new(NoopPatrol)))
            .build()
            .await
            .unwrap();

        assert!(syncer.patrol(&"pods".into()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_join_uses_configured_weight_and_events_flow() {
        let mut config = SyncerConfig::default();
        config.cluster_weights.insert("big".to_string(), 3);

        let syncer = Syncer::builder(config)
            .register_kind(KindRegistration::new("pods", Arc::new(NoopReconciler)))
            .build()
            .await
            .unwrap();
        let mut events = syncer.subscribe_events();

        let handle = syncer
            .join_cluster("big".into(), Arc::new(InMemoryCluster::new()))
            .await
            .unwrap();
        assert_eq!(handle.weight(), 3);

        let queue = syncer.scheduler(&"pods".into()).unwrap().queue().clone();
        assert_eq!(queue.clusters().await, vec![ClusterName::new("big")]);

        match events.recv().await.unwrap().event {
            SyncEvent::ClusterJoined { cluster, weight } => {
                assert_eq!(cluster, ClusterName::new("big"));
                assert_eq!(weight, 3);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(syncer
            .event_stats()
            .iter()
            .any(|s| s.source == EventSource::Membership && s.forwarded >= 1));

        syncer.leave_cluster(&"big".into()).await.unwrap();
        assert!(queue.clusters().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_and_shutdown() {
        let syncer = Syncer::builder(SyncerConfig::default())
            .register_kind(KindRegistration::new("pods", Arc::new(NoopReconciler)))
            .build()
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        syncer.start(cancel.clone()).await.unwrap();
        assert!(matches!(
            syncer.start(cancel.clone()).await,
            Err(SchedulerError::AlreadyStarted)
        ));

        syncer.shutdown().await;
        assert!(syncer.scheduler(&"pods".into()).unwrap().queue().is_shutting_down().await);
        assert!(!cancel.is_cancelled());
    }
}
