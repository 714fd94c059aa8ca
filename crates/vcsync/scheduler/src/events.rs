//! Event aggregation from every syncer subsystem
//!
//! Membership, scheduling and patrol each publish on their own broadcast
//! channel. The aggregator merges them into one stream for monitoring and
//! keeps per-source delivery counts. When it falls behind a source, the
//! skipped events are replaced by a single `EventsDropped` warning so that
//! consumers know the stream has a gap.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use vcsync_types::{EventSource, SyncEvent, SyncEventEnvelope};

/// Channel capacity for the unified event stream
const EVENT_CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug, Default)]
struct SourceCounters {
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

/// Delivery counts of one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStats {
    pub source: EventSource,
    pub forwarded: u64,
    pub dropped: u64,
}

/// Merges subsystem event channels into a single stream
#[derive(Clone)]
pub struct EventAggregator {
    unified_tx: broadcast::Sender<SyncEventEnvelope>,
    counters: Arc<DashMap<EventSource, Arc<SourceCounters>>>,
}

impl EventAggregator {
    pub fn new() -> Self {
        let (unified_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            unified_tx,
            counters: Arc::new(DashMap::new()),
        }
    }

    /// Subscribe to the unified event stream
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEventEnvelope> {
        self.unified_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.unified_tx.receiver_count()
    }

    /// Forwarded and dropped counts per source, ordered by source
    pub fn stats(&self) -> Vec<SourceStats> {
        let mut stats: Vec<SourceStats> = self
            .counters
            .iter()
            .map(|entry| SourceStats {
                source: *entry.key(),
                forwarded: entry.forwarded.load(Ordering::Relaxed),
                dropped: entry.dropped.load(Ordering::Relaxed),
            })
            .collect();
        stats.sort_by_key(|s| s.source);
        stats
    }

    /// Forward events from `source` until its channel closes.
    pub async fn forward_from(&self, mut source_rx: broadcast::Receiver<SyncEventEnvelope>, source: EventSource) {
        let counters = self.counters.entry(source).or_default().clone();

        loop {
            match source_rx.recv().await {
                Ok(event) => {
                    debug!(source = ?source, event_id = %event.id, "Forwarding event");
                    counters.forwarded.fetch_add(1, Ordering::Relaxed);
                    let _ = self.unified_tx.send(event);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(source = ?source, missed, "Event aggregator lagged behind source");
                    counters.dropped.fetch_add(missed, Ordering::Relaxed);
                    let _ = self.unified_tx.send(SyncEventEnvelope::warning(
                        SyncEvent::EventsDropped { source, missed },
                        source,
                    ));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(source = ?source, "Source channel closed");
                    break;
                }
            }
        }
    }

    /// Spawn [`forward_from`](Self::forward_from) on its own task
    pub fn spawn_forwarder(
        &self,
        source_rx: broadcast::Receiver<SyncEventEnvelope>,
        source: EventSource,
    ) -> tokio::task::JoinHandle<()> {
        let aggregator = self.clone();
        tokio::spawn(async move { aggregator.forward_from(source_rx, source).await })
    }
}

impl Default for EventAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcsync_types::ClusterName;

    fn left(cluster: &str) -> SyncEventEnvelope {
        SyncEventEnvelope::info(
            SyncEvent::ClusterLeft {
                cluster: ClusterName::new(cluster),
            },
            EventSource::Membership,
        )
    }

    #[tokio::test]
    async fn test_forwards_until_source_closes() {
        let aggregator = EventAggregator::new();
        let mut unified = aggregator.subscribe();
        let (source_tx, source_rx) = broadcast::channel(16);

        let forwarder = aggregator.spawn_forwarder(source_rx, EventSource::Membership);
        source_tx.send(left("a")).unwrap();

        let envelope = unified.recv().await.unwrap();
        assert!(matches!(envelope.event, SyncEvent::ClusterLeft { .. }));

        drop(source_tx);
        forwarder.await.unwrap();
        assert_eq!(aggregator.subscriber_count(), 1);
        assert_eq!(
            aggregator.stats(),
            vec![SourceStats {
                source: EventSource::Membership,
                forwarded: 1,
                dropped: 0,
            }]
        );
    }

    #[tokio::test]
    async fn test_lag_is_counted_and_announced() {
        let aggregator = EventAggregator::new();
        let mut unified = aggregator.subscribe();
        let (source_tx, source_rx) = broadcast::channel(2);

        for cluster in ["a", "b", "c", "d", "e"] {
            source_tx.send(left(cluster)).unwrap();
        }
        drop(source_tx);
        aggregator.forward_from(source_rx, EventSource::Membership).await;

        let gap = unified.recv().await.unwrap();
        assert!(matches!(
            gap.event,
            SyncEvent::EventsDropped {
                source: EventSource::Membership,
                missed: 3
            }
        ));
        for expected in ["d", "e"] {
            match unified.recv().await.unwrap().event {
                SyncEvent::ClusterLeft { cluster } => assert_eq!(cluster.as_str(), expected),
                other => panic!("unexpected event: {other:?}"),
            }
        }

        let stats = aggregator.stats();
        assert_eq!(stats[0].forwarded, 2);
        assert_eq!(stats[0].dropped, 3);
    }
}
