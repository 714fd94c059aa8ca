//! Per-item exponential backoff for failed work

use dashmap::DashMap;
use std::time::Duration;
use vcsync_types::{ClusterName, WorkItem};

/// Backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Delay of the first retry
    pub base_delay: Duration,

    /// Upper bound for any retry delay
    pub max_delay: Duration,
}

impl RateLimiterConfig {
    /// Delay after `failures` earlier failures: `base * 2^failures`, capped
    pub fn delay_for(&self, failures: u32) -> Duration {
        2u32.checked_pow(failures)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map(|delay| delay.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
        }
    }
}

/// Exponential backoff keyed by work item: `base * 2^failures`, capped
#[derive(Debug)]
pub struct ItemExponentialBackoff {
    config: RateLimiterConfig,
    failures: DashMap<WorkItem, u32>,
}

impl ItemExponentialBackoff {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            failures: DashMap::new(),
        }
    }

    /// Delay before `item` may be retried; records one more failure.
    pub fn when(&self, item: &WorkItem) -> Duration {
        let mut failures = self.failures.entry(item.clone()).or_insert(0);
        let exp = *failures;
        *failures = failures.saturating_add(1);

        self.config.delay_for(exp)
    }

    /// Number of failures recorded for `item`
    pub fn num_requeues(&self, item: &WorkItem) -> u32 {
        self.failures.get(item).map(|f| *f).unwrap_or(0)
    }

    /// Stop tracking `item`, resetting its backoff
    pub fn forget(&self, item: &WorkItem) {
        self.failures.remove(item);
    }

    /// Drop every tracked item of a departed cluster
    pub fn forget_cluster(&self, cluster: &ClusterName) {
        self.failures.retain(|item, _| &item.cluster_name != cluster);
    }

    pub fn config(&self) -> RateLimiterConfig {
        self.config
    }
}
