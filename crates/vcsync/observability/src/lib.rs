//! vcsync Observability - Prometheus metrics for the syncer
//!
//! [`SyncMetrics`] implements [`MetricsSink`] on top of a
//! [`prometheus::Registry`]. Hand it to the syncer builder and every patrol
//! pass, dequeue and reconcile is recorded:
//!
//! - `vcsync_patrol_duration_seconds` histogram per patrol and outcome
//! - `vcsync_queue_depth` gauge per kind and cluster
//! - `vcsync_reconciles_total` counter per kind, cluster and outcome
//! - `vcsync_reconcile_duration_seconds` histogram per kind and cluster
//!
//! Serving the registry is left to the embedding process;
//! [`export_metrics`] renders it in the text exposition format.
//!
//! [`MetricsSink`]: vcsync_types::MetricsSink

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod exporter;
pub mod metrics;

pub use error::{ObservabilityError, Result};
pub use exporter::export_metrics;
pub use metrics::SyncMetrics;
