//! vcsync Types - Core types for multi-cluster reconciliation
//!
//! vcsync keeps a shared "super cluster" consistent with many tenant
//! ("virtual") clusters. This crate holds the vocabulary every other vcsync
//! crate speaks.
//!
//! ## Key Concepts
//!
//! - **ClusterName**: Identity of one joined tenant cluster
//! - **WorkItem**: A queued signal naming one object that needs reconciling
//! - **WatchEvent**: Identity-only add/update/delete notification from a watch
//! - **ReconcileResult / ReconcileError**: Outcome of one reconciliation
//! - **Events**: Unified observability stream of lifecycle activity
//! - **MetricsSink**: Capability receiving scan-duration and queue-depth data

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod events;
pub mod ids;
pub mod metrics;
pub mod watch;
pub mod work;

// Re-export main types
pub use events::{EventSeverity, EventSource, SyncEvent, SyncEventEnvelope};
pub use ids::{ClusterName, NamespacedName, ResourceKind, ResourceUid};
pub use metrics::{InMemoryMetricsSink, MetricsSink, NoopMetricsSink, PatrolObservation};
pub use watch::{ObjectRef, WatchEvent, WatchEventType, WatchOptions};
pub use work::{ReconcileError, ReconcileResult, WorkItem};
