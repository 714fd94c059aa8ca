//! Metrics sink capability
//!
//! The core only reports observations. Exposition format and transport belong
//! to whoever implements [`MetricsSink`].

use crate::ids::{ClusterName, ResourceKind};
use dashmap::DashMap;
use std::time::Duration;

/// Receiver of scheduling and patrol observations
pub trait MetricsSink: Send + Sync {
    /// One patrol pass finished
    fn observe_patrol_duration(&self, name: &str, duration: Duration, success: bool);

    /// Pending items left in a cluster's sub-queue after a dequeue
    fn observe_queue_depth(&self, kind: &ResourceKind, cluster: &ClusterName, depth: usize);

    /// One event-driven reconciliation finished
    fn observe_reconcile(&self, kind: &ResourceKind, cluster: &ClusterName, duration: Duration, success: bool);

    /// `cluster` left; per-cluster series for `kind` may be dropped
    fn forget_cluster(&self, _kind: &ResourceKind, _cluster: &ClusterName) {}
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn observe_patrol_duration(&self, _name: &str, _duration: Duration, _success: bool) {}

    fn observe_queue_depth(&self, _kind: &ResourceKind, _cluster: &ClusterName, _depth: usize) {}

    fn observe_reconcile(
        &self,
        _kind: &ResourceKind,
        _cluster: &ClusterName,
        _duration: Duration,
        _success: bool,
    ) {
    }
}

/// Recorded patrol pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatrolObservation {
    pub duration: Duration,
    pub success: bool,
}

/// In-memory sink, suitable for development and testing
#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    patrols: DashMap<String, Vec<PatrolObservation>>,
    queue_depths: DashMap<(ResourceKind, ClusterName), usize>,
    reconciles: DashMap<(ResourceKind, ClusterName), (u64, u64)>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded passes of the named patrol
    pub fn patrol_observations(&self, name: &str) -> Vec<PatrolObservation> {
        self.patrols
            .get(name)
            .map(|o| o.clone())
            .unwrap_or_default()
    }

    /// Last observed depth of a cluster's sub-queue
    pub fn queue_depth(&self, kind: &ResourceKind, cluster: &ClusterName) -> Option<usize> {
        self.queue_depths
            .get(&(kind.clone(), cluster.clone()))
            .map(|d| *d)
    }

    /// `(succeeded, failed)` reconcile counts for a cluster
    pub fn reconcile_counts(&self, kind: &ResourceKind, cluster: &ClusterName) -> (u64, u64) {
        self.reconciles
            .get(&(kind.clone(), cluster.clone()))
            .map(|c| *c)
            .unwrap_or((0, 0))
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn forget_cluster(&self, kind: &ResourceKind, cluster: &ClusterName) {
        let key = (kind.clone(), cluster.clone());
        self.queue_depths.remove(&key);
        self.reconciles.remove(&key);
    }

    fn observe_patrol_duration(&self, name: &str, duration: Duration, success: bool) {
        self.patrols
            .entry(name.to_string())
            .or_default()
            .push(PatrolObservation { duration, success });
    }

    fn observe_queue_depth(&self, kind: &ResourceKind, cluster: &ClusterName, depth: usize) {
        self.queue_depths
            .insert((kind.clone(), cluster.clone()), depth);
    }

    fn observe_reconcile(
        &self,
        kind: &ResourceKind,
        cluster: &ClusterName,
        _duration: Duration,
        success: bool,
    ) {
        let mut counts = self
            .reconciles
            .entry((kind.clone(), cluster.clone()))
            .or_insert((0, 0));
        if success {
            counts.0 += 1;
        } else {
            counts.1 += 1;
        }
    }
}
