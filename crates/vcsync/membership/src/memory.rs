//! In-memory tenant cluster

use crate::connection::{ClusterConnection, ConnectionError, WatchStream};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use uuid::Uuid;
use vcsync_types::{NamespacedName, ObjectRef, ResourceKind, WatchEvent, WatchEventType, WatchOptions};

struct Watcher {
    kind: ResourceKind,
    options: WatchOptions,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

/// In-memory cluster API, useful for testing and development.
///
/// Objects are stored per kind; every mutation bumps a cluster-wide resource
/// version and is fanned out to matching watchers.
pub struct InMemoryCluster {
    objects: DashMap<(ResourceKind, NamespacedName), ObjectRef>,
    watchers: DashMap<Uuid, Watcher>,
    resource_version: AtomicU64,
    fail_watches: AtomicBool,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            watchers: DashMap::new(),
            resource_version: AtomicU64::new(0),
            fail_watches: AtomicBool::new(false),
        }
    }

    /// Create or update an object; returns the stored version
    pub fn apply(&self, kind: &ResourceKind, mut object: ObjectRef) -> ObjectRef {
        object.resource_version = self.resource_version.fetch_add(1, Ordering::SeqCst) + 1;

        let key = (kind.clone(), object.key.clone());
        let event_type = match self.objects.insert(key, object.clone()) {
            Some(_) => WatchEventType::Modified,
            None => WatchEventType::Added,
        };

        self.broadcast(kind, WatchEvent::new(event_type, object.clone()));
        object
    }

    /// Delete an object; returns whether it existed
    pub fn delete(&self, kind: &ResourceKind, key: &NamespacedName) -> bool {
        match self.objects.remove(&(kind.clone(), key.clone())) {
            Some((_, object)) => {
                self.broadcast(kind, WatchEvent::new(WatchEventType::Deleted, object));
                true
            }
            None => false,
        }
    }

    /// Make subsequent `watch` calls fail, simulating an unreachable API
    pub fn set_watch_failure(&self, fail: bool) {
        self.fail_watches.store(fail, Ordering::SeqCst);
    }

    /// End every open watch stream, as an API server does on timeout.
    ///
    /// Events already sent are still delivered before the stream ends.
    /// Returns how many watches were closed.
    pub fn close_watches(&self) -> usize {
        let closed = self.watchers.len();
        self.watchers.clear();
        closed
    }

    /// Watches whose consumer is still attached
    pub fn active_watches(&self) -> usize {
        self.watchers.retain(|_, w| !w.tx.is_closed());
        self.watchers.len()
    }

    fn broadcast(&self, kind: &ResourceKind, event: WatchEvent) {
        self.watchers.retain(|_, watcher| {
            if &watcher.kind != kind || !watcher.options.matches(&event.object) {
                return !watcher.tx.is_closed();
            }
            watcher.tx.send(event.clone()).is_ok()
        });
    }

    fn matching(&self, kind: &ResourceKind, options: &WatchOptions) -> Vec<ObjectRef> {
        let mut objects: Vec<ObjectRef> = self
            .objects
            .iter()
            .filter(|entry| &entry.key().0 == kind && options.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        objects.sort_by_key(|o| o.resource_version);
        objects
    }
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterConnection for InMemoryCluster {
    async fn watch(&self, kind: &ResourceKind, options: &WatchOptions) -> Result<WatchStream, ConnectionError> {
        if self.fail_watches.load(Ordering::SeqCst) {
            return Err(ConnectionError::Unavailable("watch refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();

        // Register before snapshotting so no change falls between the two;
        // a change seen twice is harmless to an identity-only consumer.
        self.watchers.insert(
            Uuid::new_v4(),
            Watcher {
                kind: kind.clone(),
                options: options.clone(),
                tx: tx.clone(),
            },
        );
        for object in self.matching(kind, options) {
            let _ = tx.send(WatchEvent::new(WatchEventType::Added, object));
        }

        let stream = futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) });
        Ok(stream.boxed())
    }

    async fn get(&self, kind: &ResourceKind, key: &NamespacedName) -> Result<Option<ObjectRef>, ConnectionError> {
        Ok(self.objects.get(&(kind.clone(), key.clone())).map(|o| o.value().clone()))
    }

    async fn list(&self, kind: &ResourceKind, options: &WatchOptions) -> Result<Vec<ObjectRef>, ConnectionError> {
        Ok(self.matching(kind, options))
    }
}
