//! Reconciliation scheduler

use crate::reconciler::Reconciler;
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use vcsync_fairqueue::{FairQueue, TickOutcome};
use vcsync_types::{
    EventSource, MetricsSink, NoopMetricsSink, ReconcileError, ResourceKind, SyncEvent, SyncEventEnvelope, WorkItem,
};

/// Workers per kind when none is configured
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: usize = 4;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Drains one kind's fair queue into its reconciler.
///
/// Every dequeued item is handed to the reconciler exactly once per dispatch
/// and always marked done afterwards, whatever the outcome.
pub struct ReconcileScheduler {
    kind: ResourceKind,
    queue: FairQueue,
    reconciler: Arc<dyn Reconciler>,
    metrics: Arc<dyn MetricsSink>,
    max_concurrent_reconciles: usize,
    event_tx: broadcast::Sender<SyncEventEnvelope>,
}

impl ReconcileScheduler {
    pub fn new(queue: FairQueue, reconciler: Arc<dyn Reconciler>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            kind: queue.kind().clone(),
            queue,
            reconciler,
            metrics: Arc::new(NoopMetricsSink),
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
            event_tx,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Number of workers started by [`run`](Self::run); at least one
    pub fn with_max_concurrent_reconciles(mut self, workers: usize) -> Self {
        self.max_concurrent_reconciles = workers.max(1);
        self
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn queue(&self) -> &FairQueue {
        &self.queue
    }

    pub fn max_concurrent_reconciles(&self) -> usize {
        self.max_concurrent_reconciles
    }

    /// Subscribe to `ReconcileFailed` events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEventEnvelope> {
        self.event_tx.subscribe()
    }

    /// Give one cluster its turn.
    ///
    /// If the selected cluster has pending work exactly one item is
    /// reconciled; otherwise its turn is forfeited and nothing runs.
    pub async fn tick(&self) -> TickOutcome {
        let outcome = self.queue.try_tick().await;
        if let TickOutcome::Dispatched(item) = &outcome {
            self.process(item.clone()).await;
        }
        outcome
    }

    /// Run the worker pool until `cancel` fires or the queue shuts down.
    ///
    /// Workers stop taking new items on cancellation; reconciles already
    /// in flight finish first.
    #[instrument(skip(self, cancel), fields(kind = %self.kind, workers = self.max_concurrent_reconciles))]
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("Reconcile workers starting");

        let workers: Vec<_> = (0..self.max_concurrent_reconciles)
            .map(|worker| {
                let scheduler = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { scheduler.worker(worker, cancel).await })
            })
            .collect();

        for result in join_all(workers).await {
            if let Err(e) = result {
                warn!(error = %e, "Reconcile worker exited abnormally");
            }
        }

        info!("Reconcile workers stopped");
    }

    async fn worker(&self, worker: usize, cancel: CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.queue.get() => next,
            };

            match next {
                Some(item) => self.process(item).await,
                None => break,
            }
        }
        debug!(kind = %self.kind, worker, "Worker exiting");
    }

    /// Reconcile one dequeued item and requeue it according to the result.
    async fn process(&self, item: WorkItem) {
        let depth = self.queue.cluster_len(&item.cluster_name).await;
        self.metrics.observe_queue_depth(&self.kind, &item.cluster_name, depth);

        let started = Instant::now();
        let result = match AssertUnwindSafe(self.reconciler.reconcile(&item)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(ReconcileError::new("reconciler panicked")),
        };
        self.metrics
            .observe_reconcile(&self.kind, &item.cluster_name, started.elapsed(), result.is_ok());

        match result {
            Ok(outcome) => {
                if let Some(delay) = outcome.requeue_after {
                    self.queue.forget(&item);
                    self.queue.add_after(item.clone(), delay).await;
                } else if outcome.requeue {
                    self.queue.add_rate_limited(item.clone()).await;
                } else {
                    self.queue.forget(&item);
                }
                debug!(item = %item, requeue = outcome.requeue, "Reconciled");
            }
            Err(e) => {
                self.queue.add_rate_limited(item.clone()).await;
                let requeues = self.queue.num_requeues(&item);
                warn!(item = %item, requeues, error = %e, "Reconcile failed; backing off");

                let _ = self.event_tx.send(SyncEventEnvelope::warning(
                    SyncEvent::ReconcileFailed {
                        item: item.clone(),
                        reason: e.reason,
                        requeues,
                    },
                    EventSource::Scheduler,
                ));
            }
        }

        self.queue.done(&item).await;
    }
}

impl std::fmt::Debug for ReconcileScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileScheduler")
            .field("kind", &self.kind)
            .field("max_concurrent_reconciles", &self.max_concurrent_reconciles)
            .finish_non_exhaustive()
    }
}
