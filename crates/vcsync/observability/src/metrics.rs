//! Prometheus-backed metrics sink

use crate::error::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::time::Duration;
use vcsync_types::{ClusterName, MetricsSink, ResourceKind};

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Syncer metrics registered on one [`Registry`]
#[derive(Clone)]
pub struct SyncMetrics {
    /// Patrol pass duration by patrol name and outcome
    pub patrol_duration_seconds: HistogramVec,

    /// Items left in a cluster's sub-queue after the last dequeue
    pub queue_depth: IntGaugeVec,

    /// Finished reconciles by kind, cluster and outcome
    pub reconciles_total: IntCounterVec,

    /// Reconcile duration by kind and cluster
    pub reconcile_duration_seconds: HistogramVec,
}

impl SyncMetrics {
    /// Create the syncer metrics and register them on `registry`.
    ///
    /// Fails if metrics with the same names are already registered there.
    pub fn new(registry: &Registry) -> Result<Self> {
        let patrol_duration_seconds = HistogramVec::new(
            HistogramOpts::new("vcsync_patrol_duration_seconds", "Patrol pass duration")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
            &["patrol", "outcome"],
        )?;
        registry.register(Box::new(patrol_duration_seconds.clone()))?;

        let queue_depth = IntGaugeVec::new(
            Opts::new("vcsync_queue_depth", "Pending work items per cluster sub-queue"),
            &["kind", "cluster"],
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        let reconciles_total = IntCounterVec::new(
            Opts::new("vcsync_reconciles_total", "Finished reconciliations"),
            &["kind", "cluster", "outcome"],
        )?;
        registry.register(Box::new(reconciles_total.clone()))?;

        let reconcile_duration_seconds = HistogramVec::new(
            HistogramOpts::new("vcsync_reconcile_duration_seconds", "Reconciliation duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["kind", "cluster"],
        )?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;

        Ok(Self {
            patrol_duration_seconds,
            queue_depth,
            reconciles_total,
            reconcile_duration_seconds,
        })
    }
}

impl MetricsSink for SyncMetrics {
    /// Drops every series labelled with the departed cluster
    fn forget_cluster(&self, kind: &ResourceKind, cluster: &ClusterName) {
        let labels = [kind.as_str(), cluster.as_str()];
        let _ = self.queue_depth.remove_label_values(&labels);
        let _ = self.reconcile_duration_seconds.remove_label_values(&labels);
        for outcome in ["success", "failure"] {
            let _ = self
                .reconciles_total
                .remove_label_values(&[kind.as_str(), cluster.as_str(), outcome]);
        }
    }

    fn observe_patrol_duration(&self, name: &str, duration: Duration, success: bool) {
        self.patrol_duration_seconds
            .with_label_values(&[name, outcome(success)])
            .observe(duration.as_secs_f64());
    }

    fn observe_queue_depth(&self, kind: &ResourceKind, cluster: &ClusterName, depth: usize) {
        self.queue_depth
            .with_label_values(&[kind.as_str(), cluster.as_str()])
            .set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    fn observe_reconcile(&self, kind: &ResourceKind, cluster: &ClusterName, duration: Duration, success: bool) {
        self.reconciles_total
            .with_label_values(&[kind.as_str(), cluster.as_str(), outcome(success)])
            .inc();
        self.reconcile_duration_seconds
            .with_label_values(&[kind.as_str(), cluster.as_str()])
            .observe(duration.as_secs_f64());
    }
}

impl std::fmt::Debug for SyncMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncMetrics").finish_non_exhaustive()
    }
}
