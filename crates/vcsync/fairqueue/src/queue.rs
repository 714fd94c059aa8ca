//! Per-cluster work queue drained by weighted fair selection.
//!
//! A [`FairQueue`] serves one resource kind. Every joined cluster owns a FIFO
//! sub-queue; consumers never pick a sub-queue themselves, they ask the
//! [`WeightedRoundRobin`] selector which cluster gets the next turn. A turn
//! that lands on an empty sub-queue is forfeited.
//!
//! The queue follows the usual controller work-queue contract:
//!
//! - an item already waiting is not queued twice (updates coalesce)
//! - an item being processed is not handed out again until [`FairQueue::done`];
//!   re-adds during processing are parked and queued on `done`
//! - delayed re-adds remember the cluster registration they were made under
//!   and are dropped if the cluster left in the meantime, even if a cluster
//!   with the same name has since joined again
//! - requeues of an in-flight item are bound to the registration the item
//!   was dispatched under, not the one current at requeue time

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, trace};
use vcsync_types::{ClusterName, ResourceKind, WorkItem};

use crate::balancer::WeightedRoundRobin;
use crate::error::{FairQueueError, Result};
use crate::rate_limiter::{ItemExponentialBackoff, RateLimiterConfig};

/// Outcome of a single scheduling turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The selected cluster had backlog; this item is now processing.
    Dispatched(WorkItem),

    /// The selected cluster had nothing queued; its turn is forfeited.
    Idle(ClusterName),

    /// No clusters are registered.
    Empty,
}

/// FIFO backlog of one cluster
#[derive(Debug)]
struct SubQueue {
    generation: u64,
    items: VecDeque<WorkItem>,
}

/// Everything guarded by the queue lock, selector included
#[derive(Debug, Default)]
struct QueueState {
    selector: WeightedRoundRobin<ClusterName>,
    clusters: HashMap<ClusterName, SubQueue>,
    dirty: HashSet<WorkItem>,
    /// In-flight items and the registration they were dispatched under
    processing: HashMap<WorkItem, u64>,
    shutting_down: bool,
    next_generation: u64,
}

impl QueueState {
    fn has_backlog(&self) -> bool {
        self.clusters.values().any(|sub| !sub.items.is_empty())
    }

    fn pending(&self) -> usize {
        self.clusters.values().map(|sub| sub.items.len()).sum()
    }

    /// Queue `item`, honouring coalescing and in-flight parking.
    ///
    /// Returns true when the item ended up in a sub-queue.
    fn enqueue(&mut self, item: WorkItem, generation: Option<u64>) -> bool {
        if self.shutting_down {
            return false;
        }

        let Some(sub) = self.clusters.get_mut(&item.cluster_name) else {
            debug!(item = %item, "Dropping work item for unregistered cluster");
            return false;
        };

        if generation.is_some_and(|g| g != sub.generation) {
            debug!(item = %item, "Dropping delayed work item from an earlier cluster registration");
            return false;
        }

        if self.dirty.contains(&item) {
            trace!(item = %item, "Work item already queued, coalescing");
            return false;
        }

        self.dirty.insert(item.clone());
        if self.processing.contains_key(&item) {
            trace!(item = %item, "Work item in flight, parking until done");
            return false;
        }

        sub.items.push_back(item);
        true
    }

    fn tick(&mut self) -> TickOutcome {
        let Some(cluster) = self.selector.next() else {
            return TickOutcome::Empty;
        };

        let popped = self
            .clusters
            .get_mut(&cluster)
            .and_then(|sub| sub.items.pop_front().map(|item| (item, sub.generation)));

        match popped {
            Some((item, generation)) => {
                self.dirty.remove(&item);
                self.processing.insert(item.clone(), generation);
                TickOutcome::Dispatched(item)
            }
            None => TickOutcome::Idle(cluster),
        }
    }

    /// Registration a requeue of `item` is bound to.
    ///
    /// In-flight items keep the generation they were dispatched under.
    fn requeue_generation(&self, item: &WorkItem) -> Option<u64> {
        if let Some(generation) = self.processing.get(item) {
            return Some(*generation);
        }
        self.clusters.get(&item.cluster_name).map(|sub| sub.generation)
    }

    /// Run turns until one dispatches.
    ///
    /// Idle turns only spend credit, so with any backlog present a dispatch
    /// happens within two full selector cycles.
    fn pop(&mut self) -> Option<WorkItem> {
        if !self.has_backlog() {
            return None;
        }

        let attempts = self.selector.total_weight().saturating_mul(2).saturating_add(1);
        for _ in 0..attempts {
            match self.tick() {
                TickOutcome::Dispatched(item) => return Some(item),
                TickOutcome::Idle(_) => continue,
                TickOutcome::Empty => return None,
            }
        }
        None
    }
}

struct Inner {
    kind: ResourceKind,
    state: Mutex<QueueState>,
    notify: Notify,
    limiter: ItemExponentialBackoff,
}

/// Fair multi-cluster work queue for one resource kind
///
/// Cloning is cheap; all clones share the same queue.
#[derive(Clone)]
pub struct FairQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for FairQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FairQueue")
            .field("kind", &self.inner.kind)
            .finish_non_exhaustive()
    }
}

impl FairQueue {
    /// Create an empty queue
    pub fn new(kind: ResourceKind, limiter: RateLimiterConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                kind,
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                limiter: ItemExponentialBackoff::new(limiter),
            }),
        }
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.inner.kind
    }

    // ========== Cluster Registration ==========

    /// Give `cluster` a sub-queue and a selector entry.
    ///
    /// Registering an already known cluster only updates its weight.
    ///
    /// # Errors
    ///
    /// [`FairQueueError::InvalidWeight`] when `weight` is zero.
    pub async fn add_cluster(&self, cluster: ClusterName, weight: u32) -> Result<()> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        state.selector.add(cluster.clone(), weight)?;
        if !state.clusters.contains_key(&cluster) {
            let generation = state.next_generation;
            state.next_generation += 1;
            state.clusters.insert(
                cluster.clone(),
                SubQueue {
                    generation,
                    items: VecDeque::new(),
                },
            );
            info!(kind = %self.inner.kind, cluster = %cluster, weight, "Cluster sub-queue registered");
        }

        Ok(())
    }

    /// Drop `cluster` from the selector and purge its pending work.
    ///
    /// Items already handed out keep processing; their parked re-adds are
    /// discarded. Returns the number of purged items.
    pub async fn remove_cluster(&self, cluster: &ClusterName) -> usize {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        state.selector.remove(cluster);
        let purged = state
            .clusters
            .remove(cluster)
            .map(|sub| sub.items.len())
            .unwrap_or(0);
        state.dirty.retain(|item| &item.cluster_name != cluster);
        drop(guard);

        self.inner.limiter.forget_cluster(cluster);
        info!(kind = %self.inner.kind, cluster = %cluster, purged, "Cluster sub-queue removed");

        purged
    }

    /// Change the weight of a registered cluster
    ///
    /// # Errors
    ///
    /// [`FairQueueError::UnknownCluster`] if the cluster has no sub-queue,
    /// [`FairQueueError::InvalidWeight`] when `weight` is zero.
    pub async fn set_weight(&self, cluster: &ClusterName, weight: u32) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if !state.clusters.contains_key(cluster) {
            return Err(FairQueueError::UnknownCluster(cluster.clone()));
        }
        state.selector.add(cluster.clone(), weight)
    }

    /// Registered clusters in selector order
    pub async fn clusters(&self) -> Vec<ClusterName> {
        let state = self.inner.state.lock().await;
        state.selector.keys().cloned().collect()
    }

    // ========== Producers ==========

    /// Queue `item` on its cluster's sub-queue.
    ///
    /// Returns false if the item was coalesced, parked behind an in-flight
    /// copy, or dropped because the cluster is unknown or the queue is
    /// shutting down.
    pub async fn add(&self, item: WorkItem) -> bool {
        self.add_under(item, None).await
    }

    async fn add_under(&self, item: WorkItem, generation: Option<u64>) -> bool {
        let queued = {
            let mut state = self.inner.state.lock().await;
            state.enqueue(item, generation)
        };
        if queued {
            self.inner.notify.notify_one();
        }
        queued
    }

    /// Queue `item` once `delay` has elapsed.
    ///
    /// The add is dropped if the cluster registration it is bound to has
    /// gone by then. For an item still in flight that is the registration
    /// it was dispatched under.
    pub async fn add_after(&self, item: WorkItem, delay: Duration) {
        let generation = {
            let state = self.inner.state.lock().await;
            if state.shutting_down {
                return;
            }
            state.requeue_generation(&item)
        };
        let Some(generation) = generation else {
            debug!(item = %item, "Not scheduling delayed add for unregistered cluster");
            return;
        };

        if delay.is_zero() {
            self.add_under(item, Some(generation)).await;
            return;
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add_under(item, Some(generation)).await;
        });
    }

    /// Queue `item` after its per-item backoff delay.
    pub async fn add_rate_limited(&self, item: WorkItem) {
        let delay = self.inner.limiter.when(&item);
        debug!(item = %item, delay_ms = delay.as_millis() as u64, "Requeueing with backoff");
        self.add_after(item, delay).await;
    }

    /// Reset the backoff of `item`
    pub fn forget(&self, item: &WorkItem) {
        self.inner.limiter.forget(item);
    }

    /// Failures recorded for `item` since it was last forgotten
    pub fn num_requeues(&self, item: &WorkItem) -> u32 {
        self.inner.limiter.num_requeues(item)
    }

    // ========== Consumers ==========

    /// Wait for the next item picked by the fair selector.
    ///
    /// Returns `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<WorkItem> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock().await;
                if let Some(item) = state.pop() {
                    if state.has_backlog() {
                        self.inner.notify.notify_one();
                    }
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Run exactly one selector turn without waiting.
    pub async fn try_tick(&self) -> TickOutcome {
        let mut state = self.inner.state.lock().await;
        state.tick()
    }

    /// Mark `item` as finished; a copy added meanwhile is queued now.
    pub async fn done(&self, item: &WorkItem) {
        let requeued = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;

            state.processing.remove(item);
            if !state.dirty.contains(item) {
                false
            } else if let Some(sub) = state.clusters.get_mut(&item.cluster_name) {
                sub.items.push_back(item.clone());
                true
            } else {
                state.dirty.remove(item);
                false
            }
        };

        if requeued {
            self.inner.notify.notify_one();
        }
    }

    // ========== Introspection & Lifecycle ==========

    /// Items waiting across all sub-queues
    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.pending()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Items waiting in one cluster's sub-queue
    pub async fn cluster_len(&self, cluster: &ClusterName) -> usize {
        let state = self.inner.state.lock().await;
        state
            .clusters
            .get(cluster)
            .map(|sub| sub.items.len())
            .unwrap_or(0)
    }

    /// Items currently handed out and not yet `done`
    pub async fn in_flight(&self) -> usize {
        self.inner.state.lock().await.processing.len()
    }

    /// Stop accepting work and wake every waiting consumer.
    pub async fn shut_down(&self) {
        self.inner.state.lock().await.shutting_down = true;
        self.inner.notify.notify_waiters();
        info!(kind = %self.inner.kind, "Work queue shutting down");
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().await.shutting_down
    }
}
