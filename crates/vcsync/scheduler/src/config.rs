//! Configuration for the syncer

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use vcsync_fairqueue::RateLimiterConfig;
use vcsync_membership::DEFAULT_CLUSTER_WEIGHT;
use vcsync_types::ClusterName;

/// Main syncer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncerConfig {
    /// Worker configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Patrol configuration
    #[serde(default)]
    pub patrol: PatrolConfig,

    /// Retry backoff configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Watch re-open configuration
    #[serde(default)]
    pub watch: WatchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Fair-share weight per tenant cluster; unlisted clusters get weight 1
    #[serde(default)]
    pub cluster_weights: HashMap<String, u32>,
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Workers draining each kind's queue
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_reconciles: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: default_max_concurrent(),
        }
    }
}

/// Patrol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatrolConfig {
    /// Run patrols for kinds that register one
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between patrol passes
    #[serde(default = "default_patrol_period")]
    pub period_secs: u64,

    /// Additive jitter applied to each period
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl PatrolConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

impl Default for PatrolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_secs: default_patrol_period(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

/// Retry backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// First retry delay in milliseconds
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Retry delay cap in seconds
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
}

impl QueueConfig {
    pub fn rate_limiter(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_secs: default_max_delay(),
        }
    }
}

/// Watch re-open configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Delay before the first re-open attempt, in milliseconds
    #[serde(default = "default_watch_retry_base")]
    pub retry_base_delay_ms: u64,

    /// Cap on the delay between attempts, in seconds
    #[serde(default = "default_watch_retry_max")]
    pub retry_max_delay_secs: u64,
}

impl WatchConfig {
    pub fn retry_backoff(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_secs(self.retry_max_delay_secs),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            retry_base_delay_ms: default_watch_retry_base(),
            retry_max_delay_secs: default_watch_retry_max(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,

    /// Include timestamps
    #[serde(default = "default_true")]
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            timestamps: true,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    crate::scheduler::DEFAULT_MAX_CONCURRENT_RECONCILES
}

fn default_patrol_period() -> u64 {
    vcsync_patrol::DEFAULT_PATROL_PERIOD.as_secs()
}

fn default_jitter_factor() -> f64 {
    vcsync_patrol::DEFAULT_JITTER_FACTOR
}

fn default_base_delay() -> u64 {
    5
}

fn default_max_delay() -> u64 {
    1000
}

fn default_watch_retry_base() -> u64 {
    vcsync_dispatch::DEFAULT_WATCH_RETRY.base_delay.as_millis() as u64
}

fn default_watch_retry_max() -> u64 {
    vcsync_dispatch::DEFAULT_WATCH_RETRY.max_delay.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl SyncerConfig {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// Environment variables use the `VCSYNC_` prefix with `__` between
    /// nesting levels, e.g. `VCSYNC_PATROL__PERIOD_SECS=30`.
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        let mut builder = ::config::Config::builder();

        // Add default configuration
        builder = builder.add_source(::config::Config::try_from(&SyncerConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix("VCSYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot honour
    pub fn validate(&self) -> Result<(), ::config::ConfigError> {
        if let Some((cluster, _)) = self.cluster_weights.iter().find(|(_, weight)| **weight == 0) {
            return Err(::config::ConfigError::Message(format!(
                "cluster_weights.{cluster} must be greater than zero"
            )));
        }

        if self.patrol.enabled && self.patrol.period_secs == 0 {
            return Err(::config::ConfigError::Message(
                "patrol.period_secs must be greater than zero".into(),
            ));
        }

        if !(0.0..=vcsync_patrol::MAX_JITTER_FACTOR).contains(&self.patrol.jitter_factor) {
            return Err(::config::ConfigError::Message(format!(
                "patrol.jitter_factor must be between 0 and {}, got {}",
                vcsync_patrol::MAX_JITTER_FACTOR,
                self.patrol.jitter_factor
            )));
        }

        Ok(())
    }

    /// Configured weight for `cluster`
    pub fn weight_for(&self, cluster: &ClusterName) -> u32 {
        self.cluster_weights
            .get(cluster.as_str())
            .copied()
            .unwrap_or(DEFAULT_CLUSTER_WEIGHT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncerConfig::default();
        assert_eq!(config.scheduler.max_concurrent_reconciles, 4);
        assert_eq!(config.patrol.period(), Duration::from_secs(60));
        assert_eq!(config.patrol.jitter_factor, 0.1);
        assert_eq!(config.queue.rate_limiter(), RateLimiterConfig::default());
        assert_eq!(config.watch.retry_backoff(), vcsync_dispatch::DEFAULT_WATCH_RETRY);
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_weight_for() {
        let mut config = SyncerConfig::default();
        config.cluster_weights.insert("big".to_string(), 5);

        assert_eq!(config.weight_for(&ClusterName::new("big")), 5);
        assert_eq!(config.weight_for(&ClusterName::new("small")), 1);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = SyncerConfig::load(Some("/nonexistent/vcsync")).unwrap();
        assert_eq!(config.patrol.period_secs, 60);
        assert!(config.cluster_weights.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("vcsync-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"
[scheduler]
max_concurrent_reconciles = 8

[patrol]
period_secs = 30

[cluster_weights]
tenant-a = 3
"#,
        )
        .unwrap();

        let config = SyncerConfig::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.scheduler.max_concurrent_reconciles, 8);
        assert_eq!(config.patrol.period_secs, 30);
        assert_eq!(config.patrol.jitter_factor, 0.1);
        assert_eq!(config.weight_for(&ClusterName::new("tenant-a")), 3);
    }

    fn load_toml(contents: &str) -> Result<SyncerConfig, ::config::ConfigError> {
        let path = std::env::temp_dir().join(format!("vcsync-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        let config = SyncerConfig::load(path.to_str());
        std::fs::remove_file(&path).unwrap();
        config
    }

    #[test]
    fn test_load_rejects_zero_weight() {
        let err = load_toml(
            r#"
[cluster_weights]
tenant-a = 2
tenant-b = 0
"#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("tenant-b"));
    }

    #[test]
    fn test_load_rejects_out_of_range_patrol_timing() {
        assert!(load_toml("[patrol]\njitter_factor = 1e300\n").is_err());
        assert!(load_toml("[patrol]\nperiod_secs = 0\n").is_err());
        assert!(load_toml("[patrol]\nenabled = false\nperiod_secs = 0\n").is_ok());
    }
}
