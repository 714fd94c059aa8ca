//! vcsync Patrol - Periodic full-state sweeps
//!
//! Watch-driven reconciliation can miss changes (dropped events, bugs,
//! out-of-band edits). A [`Patrol`] runs a full consistency pass on a fixed,
//! jittered period as a backstop.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use std::time::Duration;
//! # use vcsync_patrol::{Patrol, PatrolReconciler};
//! # async fn demo(reconciler: Arc<dyn PatrolReconciler>) -> vcsync_patrol::Result<()> {
//! let patrol = Arc::new(
//!     Patrol::builder("pods")
//!         .with_period(Duration::from_secs(60))
//!         .with_reconciler(reconciler)
//!         .build()?,
//! );
//! let cancel = tokio_util::sync::CancellationToken::new();
//! let handle = patrol.spawn(cancel.clone());
//! cancel.cancel();
//! let _ = handle.await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod patrol;

pub use error::{PatrolError, Result};
pub use patrol::{Patrol, PatrolBuilder, PatrolReconciler, DEFAULT_JITTER_FACTOR, DEFAULT_PATROL_PERIOD, MAX_JITTER_FACTOR};
