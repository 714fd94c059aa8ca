//! Work items and reconciliation outcomes

use crate::ids::{ClusterName, NamespacedName, ResourceKind, ResourceUid};
use crate::watch::WatchEvent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// One unit of reconciliation, tagged with the cluster it came from
///
/// Items are signals, not data: two items with the same identity are
/// interchangeable and the queue coalesces them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    pub cluster_name: ClusterName,
    pub namespaced_name: NamespacedName,
    pub uid: ResourceUid,
    pub kind: ResourceKind,
}

impl WorkItem {
    pub fn new(
        cluster_name: ClusterName,
        kind: ResourceKind,
        namespaced_name: NamespacedName,
        uid: ResourceUid,
    ) -> Self {
        Self {
            cluster_name,
            namespaced_name,
            uid,
            kind,
        }
    }

    /// Normalize a raw watch event from `cluster` into a work item.
    pub fn from_event(cluster: &ClusterName, kind: &ResourceKind, event: &WatchEvent) -> Self {
        Self {
            cluster_name: cluster.clone(),
            namespaced_name: event.object.key.clone(),
            uid: event.object.uid.clone(),
            kind: kind.clone(),
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}",
            self.cluster_name, self.kind, self.namespaced_name
        )
    }
}

/// Successful reconciliation outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Put the item back through the rate limiter
    pub requeue: bool,

    /// Put the item back after a fixed delay; wins over `requeue`
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    /// Reconciliation converged, nothing more to do
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: None,
        }
    }

    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue: false,
            requeue_after: Some(delay),
        }
    }
}

/// Failure reported by an external reconciler
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Reconcile failed: {reason}")]
pub struct ReconcileError {
    pub reason: String,
}

impl ReconcileError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::{ObjectRef, WatchEventType};

    #[test]
    fn test_from_event_tags_cluster() {
        let cluster = ClusterName::new("tenant-a");
        let kind = ResourceKind::new("pods");
        let event = WatchEvent::new(
            WatchEventType::Modified,
            ObjectRef::new(NamespacedName::new("default", "web"), ResourceUid::new("u1")),
        );

        let item = WorkItem::from_event(&cluster, &kind, &event);
        assert_eq!(item.cluster_name, cluster);
        assert_eq!(item.uid.as_str(), "u1");
        assert_eq!(item.to_string(), "tenant-a:pods/default/web");
    }

    #[test]
    fn test_event_type_does_not_change_identity() {
        let cluster = ClusterName::new("tenant-a");
        let kind = ResourceKind::new("pods");
        let object = ObjectRef::new(NamespacedName::new("default", "web"), ResourceUid::new("u1"));

        let added = WorkItem::from_event(
            &cluster,
            &kind,
            &WatchEvent::new(WatchEventType::Added, object.clone()),
        );
        let deleted = WorkItem::from_event(
            &cluster,
            &kind,
            &WatchEvent::new(WatchEventType::Deleted, object),
        );
        assert_eq!(added, deleted);
    }

    #[test]
    fn test_result_constructors() {
        assert!(!ReconcileResult::done().requeue);
        assert!(ReconcileResult::requeue().requeue);
        assert_eq!(
            ReconcileResult::requeue_after(Duration::from_secs(5)).requeue_after,
            Some(Duration::from_secs(5))
        );
    }
}
