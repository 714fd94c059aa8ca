//! Event types for vcsync observability
//!
//! Events provide a unified stream of membership and scheduling activity.

use crate::ids::{ClusterName, ResourceKind};
use crate::work::WorkItem;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all vcsync events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Event source
    pub source: EventSource,

    /// Event severity
    pub severity: EventSeverity,

    /// The actual event
    pub event: SyncEvent,
}

impl SyncEventEnvelope {
    pub fn new(event: SyncEvent, source: EventSource, severity: EventSeverity) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            source,
            severity,
            event,
        }
    }

    pub fn info(event: SyncEvent, source: EventSource) -> Self {
        Self::new(event, source, EventSeverity::Info)
    }

    pub fn warning(event: SyncEvent, source: EventSource) -> Self {
        Self::new(event, source, EventSeverity::Warning)
    }
}

/// Event sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSource {
    /// Cluster membership registry
    Membership,
    /// Multi-cluster event dispatcher
    Dispatcher,
    /// Reconciliation scheduler
    Scheduler,
    /// Patrol loop
    Patrol,
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// vcsync events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncEvent {
    // ═══════════════════════════════════════════════════════════════════
    // MEMBERSHIP EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Tenant cluster joined
    ClusterJoined { cluster: ClusterName, weight: u32 },

    /// Tenant cluster left
    ClusterLeft { cluster: ClusterName },

    /// A listener failed while handling a membership change
    ListenerFailed {
        cluster: ClusterName,
        listener: String,
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // SCHEDULING EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Reconciliation failed and the item went back through backoff
    ReconcileFailed {
        item: WorkItem,
        reason: String,
        requeues: u32,
    },

    /// Patrol pass finished
    PatrolCompleted {
        name: String,
        kind: ResourceKind,
        duration_ms: u64,
        success: bool,
    },

    // ═══════════════════════════════════════════════════════════════════
    // AGGREGATION EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// The unified stream fell behind a source and skipped its events
    EventsDropped { source: EventSource, missed: u64 },
}
