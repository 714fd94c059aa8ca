//! vcsync Scheduler - Fair reconciliation across tenant clusters
//!
//! Ties the pieces together for each registered resource kind:
//!
//! ```text
//! MembershipRegistry ──join/leave──▶ MultiClusterDispatcher ──WorkItem──▶ FairQueue
//!                                                                            │
//!                                          ReconcileScheduler workers ◀──────┘
//!                                          Patrol (periodic sweep)
//! ```
//!
//! [`Syncer`] is the composition root. Build it once with every kind
//! registered, start it, then join and leave clusters as they come and go.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use vcsync_scheduler::{KindRegistration, Reconciler, Syncer, SyncerConfig};
//! # use vcsync_membership::InMemoryCluster;
//! # async fn demo(reconciler: Arc<dyn Reconciler>) -> vcsync_scheduler::Result<()> {
//! let syncer = Syncer::builder(SyncerConfig::default())
//!     .register_kind(KindRegistration::new("pods", reconciler))
//!     .build()
//!     .await?;
//!
//! let cancel = tokio_util::sync::CancellationToken::new();
//! syncer.start(cancel.clone()).await?;
//! syncer.join_cluster("tenant-a".into(), Arc::new(InMemoryCluster::new())).await?;
//! syncer.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod error;
pub mod events;
pub mod reconciler;
pub mod scheduler;
pub mod syncer;
pub mod telemetry;

// Re-exports
pub use config::{LoggingConfig, PatrolConfig, QueueConfig, SchedulerConfig, SyncerConfig, WatchConfig};
pub use error::{Result, SchedulerError};
pub use events::{EventAggregator, SourceStats};
pub use reconciler::Reconciler;
pub use scheduler::{ReconcileScheduler, DEFAULT_MAX_CONCURRENT_RECONCILES};
pub use syncer::{KindRegistration, Syncer, SyncerBuilder};
pub use telemetry::init_tracing;
pub use vcsync_fairqueue::TickOutcome;
