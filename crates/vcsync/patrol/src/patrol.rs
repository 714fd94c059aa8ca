//! Patrol loop

use crate::error::{PatrolError, Result};
use async_trait::async_trait;
use futures::FutureExt;
use rand::Rng;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use vcsync_types::{
    EventSource, MetricsSink, NoopMetricsSink, ReconcileError, ResourceKind, SyncEvent, SyncEventEnvelope,
};

/// Period used when none is configured
pub const DEFAULT_PATROL_PERIOD: Duration = Duration::from_secs(60);

/// Jitter used when none is configured; each wait is `period * (1 + U[0, factor))`
pub const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Largest accepted jitter factor; a wait never exceeds twice the period
pub const MAX_JITTER_FACTOR: f64 = 1.0;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One full consistency pass over a resource kind
#[async_trait]
pub trait PatrolReconciler: Send + Sync {
    async fn patrol(&self) -> std::result::Result<(), ReconcileError>;
}

/// Builder for [`Patrol`]
pub struct PatrolBuilder {
    kind: ResourceKind,
    name: Option<String>,
    period: Duration,
    jitter_factor: f64,
    reconciler: Option<Arc<dyn PatrolReconciler>>,
    metrics: Arc<dyn MetricsSink>,
}

impl PatrolBuilder {
    fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            name: None,
            period: DEFAULT_PATROL_PERIOD,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            reconciler: None,
            metrics: Arc::new(NoopMetricsSink),
        }
    }

    /// Name used in logs and metrics; defaults to `<kind>-patrol`
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Additive jitter in `[0, 1]`; zero disables it
    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }

    pub fn with_reconciler(mut self, reconciler: Arc<dyn PatrolReconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> Result<Patrol> {
        let name = self.name.unwrap_or_else(|| format!("{}-patrol", self.kind));

        if self.period.is_zero() {
            return Err(PatrolError::InvalidPeriod);
        }
        if !(0.0..=MAX_JITTER_FACTOR).contains(&self.jitter_factor) {
            return Err(PatrolError::InvalidJitterFactor(self.jitter_factor));
        }
        let reconciler = self.reconciler.ok_or_else(|| PatrolError::MissingReconciler(name.clone()))?;

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Patrol {
            name,
            kind: self.kind,
            period: self.period,
            jitter_factor: self.jitter_factor,
            reconciler,
            metrics: self.metrics,
            runs: AtomicU64::new(0),
            event_tx,
        })
    }
}

/// Periodic patrol over one resource kind.
///
/// The first pass happens one period after start. Cancellation is observed
/// only while waiting; a pass in flight always runs to completion.
pub struct Patrol {
    name: String,
    kind: ResourceKind,
    period: Duration,
    jitter_factor: f64,
    reconciler: Arc<dyn PatrolReconciler>,
    metrics: Arc<dyn MetricsSink>,
    runs: AtomicU64,
    event_tx: broadcast::Sender<SyncEventEnvelope>,
}

impl Patrol {
    pub fn builder(kind: impl Into<ResourceKind>) -> PatrolBuilder {
        PatrolBuilder::new(kind.into())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn jitter_factor(&self) -> f64 {
        self.jitter_factor
    }

    /// Completed passes, successful or not
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Subscribe to `PatrolCompleted` events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEventEnvelope> {
        self.event_tx.subscribe()
    }

    /// Run until `cancel` fires.
    #[instrument(skip(self, cancel), fields(patrol = %self.name, kind = %self.kind))]
    pub async fn start(&self, cancel: CancellationToken) {
        info!(period_ms = self.period.as_millis() as u64, jitter = self.jitter_factor, "Patrol started");

        loop {
            let wait = self.next_delay();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            let _ = self.run_once().await;
        }

        info!(runs = self.runs(), "Patrol stopped");
    }

    /// Run `start` on its own task
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.start(cancel).await })
    }

    /// One pass: invoke the reconciler, record its duration and outcome.
    ///
    /// A panicking reconciler is reported as a failed pass.
    pub async fn run_once(&self) -> std::result::Result<(), ReconcileError> {
        let started = Instant::now();
        let result = match AssertUnwindSafe(self.reconciler.patrol()).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(ReconcileError::new("patrol panicked")),
        };
        let elapsed = started.elapsed();

        self.runs.fetch_add(1, Ordering::SeqCst);
        self.metrics.observe_patrol_duration(&self.name, elapsed, result.is_ok());

        match &result {
            Ok(()) => debug!(patrol = %self.name, duration_ms = elapsed.as_millis() as u64, "Patrol pass complete"),
            Err(e) => warn!(patrol = %self.name, duration_ms = elapsed.as_millis() as u64, error = %e, "Patrol pass failed"),
        }

        let event = SyncEvent::PatrolCompleted {
            name: self.name.clone(),
            kind: self.kind.clone(),
            duration_ms: elapsed.as_millis() as u64,
            success: result.is_ok(),
        };
        let envelope = if result.is_ok() {
            SyncEventEnvelope::info(event, EventSource::Patrol)
        } else {
            SyncEventEnvelope::warning(event, EventSource::Patrol)
        };
        let _ = self.event_tx.send(envelope);

        result
    }

    /// Jittered wait before the next pass; saturates at `Duration::MAX`
    fn next_delay(&self) -> Duration {
        if self.jitter_factor == 0.0 {
            return self.period;
        }
        let factor = rand::thread_rng().gen_range(0.0..self.jitter_factor);
        let extra = Duration::try_from_secs_f64(self.period.as_secs_f64() * factor).unwrap_or(Duration::MAX);
        self.period.saturating_add(extra)
    }
}

impl std::fmt::Debug for Patrol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Patrol")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("period", &self.period)
            .field("jitter_factor", &self.jitter_factor)
            .field("runs", &self.runs())
            .finish_non_exhaustive()
    }
}
