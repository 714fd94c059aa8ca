//! # vcsync FairQueue - Fair Work Distribution Across Tenant Clusters
//!
//! One busy tenant must not starve the others. This crate provides:
//!
//! - [`WeightedRoundRobin`]: credit-based selector that hands out turns in
//!   proportion to configured weights
//! - [`ItemExponentialBackoff`]: per-item retry delays for failed work
//! - [`FairQueue`]: per-cluster sub-queues drained in the order the selector
//!   decides, with work-queue semantics (coalescing, in-flight tracking,
//!   delayed and rate-limited re-adds)
//!
//! ## Example
//!
//! ```rust,no_run
//! use vcsync_fairqueue::{FairQueue, RateLimiterConfig};
//! use vcsync_types::{ClusterName, NamespacedName, ResourceKind, ResourceUid, WorkItem};
//!
//! # async fn example() {
//! let queue = FairQueue::new(ResourceKind::new("pods"), RateLimiterConfig::default());
//! let tenant = ClusterName::new("tenant-a");
//! queue.add_cluster(tenant.clone(), 2).await.unwrap();
//!
//! queue
//!     .add(WorkItem::new(
//!         tenant,
//!         ResourceKind::new("pods"),
//!         NamespacedName::new("default", "web"),
//!         ResourceUid::new("uid-1"),
//!     ))
//!     .await;
//!
//! if let Some(item) = queue.get().await {
//!     // reconcile...
//!     queue.done(&item).await;
//! }
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod balancer;
pub mod error;
pub mod queue;
pub mod rate_limiter;

// Re-exports
pub use balancer::WeightedRoundRobin;
pub use error::{FairQueueError, Result};
pub use queue::{FairQueue, TickOutcome};
pub use rate_limiter::{ItemExponentialBackoff, RateLimiterConfig};
