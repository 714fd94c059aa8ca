//! vcsync Dispatch - Fan tenant cluster watches into one fair queue
//!
//! A [`MultiClusterDispatcher`] exists per resource kind. It registers on the
//! membership registry as a [`ClusterChangeListener`] and, for every joined
//! cluster, opens a filtered watch whose events become [`WorkItem`]s in that
//! cluster's sub-queue.
//!
//! Items carry identity only. A reconciler re-reads current state through
//! [`MultiClusterDispatcher::get_object`], so a burst of events for one object
//! collapses into a single pending item.
//!
//! Watches end: the API server closes them, or a cluster is unreachable when
//! it joins. Such clusters are marked degraded and
//! [`MultiClusterDispatcher::run_watch_recovery`] re-opens them with
//! exponential backoff until they recover or leave.
//!
//! [`ClusterChangeListener`]: vcsync_membership::ClusterChangeListener
//! [`WorkItem`]: vcsync_types::WorkItem

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod dispatcher;

pub use dispatcher::{MultiClusterDispatcher, DEFAULT_WATCH_RETRY};
