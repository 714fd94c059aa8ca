//! Tracing subscriber setup

use crate::config::LoggingConfig;
use crate::error::{Result, SchedulerError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set. Fails if a global
/// subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else if config.timestamps {
        registry.with(fmt::layer()).try_init()
    } else {
        registry.with(fmt::layer().without_time()).try_init()
    };

    result.map_err(|e| SchedulerError::Telemetry(e.to_string()))
}
