//! vcsync Membership - Which tenant clusters are live, and who needs to know
//!
//! This crate provides the membership infrastructure for vcsync:
//!
//! - **MembershipRegistry**: Single source of truth for joined clusters; fans
//!   join/leave out to listeners and tears down watches on leave
//! - **ClusterChangeListener**: Capability implemented by anything that reacts
//!   to cluster lifecycle (dispatchers, metrics, logging)
//! - **ClusterHandle / WatchHandle**: A joined cluster and its cancellable
//!   watch subscriptions
//! - **ClusterConnection**: Capability for watching, getting and listing
//!   objects in one tenant cluster
//!
//! ## In-Memory Clusters
//!
//! [`InMemoryCluster`] implements [`ClusterConnection`] without a network and
//! is suitable for development and testing. Production deployments plug in a
//! real API client implementing the same trait.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod connection;
pub mod error;
pub mod handle;
pub mod listener;
pub mod memory;
pub mod registry;

// Re-exports
pub use connection::{ClusterConnection, ConnectionError, WatchStream};
pub use error::{MembershipError, Result};
pub use handle::{ClusterHandle, WatchHandle};
pub use listener::{ClusterChangeListener, ListenerError};
pub use memory::InMemoryCluster;
pub use registry::{MembershipRegistry, DEFAULT_CLUSTER_WEIGHT};
