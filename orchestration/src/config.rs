//! Worker configuration
//!
//! Loaded from an optional TOML file layered with `ORCH__`-prefixed
//! environment variables. Every section has conservative defaults so an
//! empty config is runnable.

use anyhow::{Context, Result};
use monitoring::ShadowExecutorConfig;
use resilience::{CircuitBreakerConfig, FlagCacheConfig, RateLimiterConfig};
use serde::{Deserialize, Serialize};

use crate::processor::ProcessorConfig;
use crate::router::RoutingConfig;

/// Top-level worker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub processor: ProcessorConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub engines: EnginesConfig,

    #[serde(default)]
    pub shadow: ShadowExecutorConfig,

    #[serde(default)]
    pub rate_limit: RateLimiterConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub flags: FlagsConfig,
}

/// Worker loop intervals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Seconds between signal-processing ticks
    #[serde(default = "default_process_interval_secs")]
    pub process_interval_secs: u64,

    /// Seconds between shadow-position refresh ticks
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Seconds between stale-lock watchdog ticks
    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            process_interval_secs: default_process_interval_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            watchdog_interval_secs: default_watchdog_interval_secs(),
        }
    }
}

fn default_process_interval_secs() -> u64 {
    5
}

fn default_refresh_interval_secs() -> u64 {
    15
}

fn default_watchdog_interval_secs() -> u64 {
    300
}

/// Engine invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnginesConfig {
    /// Per-call evaluation timeout; a hung engine becomes a decline
    #[serde(default = "default_engine_timeout_secs")]
    pub timeout_secs: u64,

    /// Availability defaults used when no availability provider overrides
    #[serde(default = "default_engine_available")]
    pub engine_a_available: bool,

    #[serde(default = "default_engine_available")]
    pub engine_b_available: bool,
}

impl Default for EnginesConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_engine_timeout_secs(),
            engine_a_available: default_engine_available(),
            engine_b_available: default_engine_available(),
        }
    }
}

fn default_engine_timeout_secs() -> u64 {
    30
}

fn default_engine_available() -> bool {
    true
}

/// Feature-flag provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagsConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default)]
    pub cache: FlagCacheConfig,
}

impl Default for FlagsConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            cache: FlagCacheConfig::default(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

impl AppConfig {
    /// Load configuration from `worker.toml` (when present) layered with
    /// `ORCH__`-prefixed environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    pub fn load_from(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = match path {
            Some(path) => builder.add_source(config::File::with_name(path)),
            None => builder.add_source(config::File::with_name("worker").required(false)),
        };

        let config = builder
            .add_source(config::Environment::with_prefix("ORCH").separator("__"))
            .build()
            .context("Failed to assemble configuration sources")?
            .try_deserialize::<AppConfig>()
            .context("Failed to deserialize configuration")?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ExecutionMode;

    #[test]
    fn test_empty_config_is_runnable() {
        let config = AppConfig::default();
        assert!(config.worker.process_interval_secs > 0);
        assert!(config.engines.timeout_secs > 0);
        assert_eq!(config.shadow.contract_multiplier, 100.0);
    }

    #[test]
    fn test_conservative_mode_default() {
        // With no override the worker must not promote anything to live
        assert_eq!(
            RoutingConfig::default().execution_mode,
            ExecutionMode::ShadowOnly
        );
    }
}
