//! Runtime settings snapshot
//!
//! Mutable experiment governance (variant-B kill switch, split percentage,
//! execution mode) is read through the flag cache and assembled into an
//! immutable snapshot passed by value into each routing/policy call, so one
//! signal sees one consistent view even while flags change underneath.

use common::ExecutionMode;
use resilience::FlagCache;
use std::sync::Arc;
use tracing::warn;

use crate::router::RoutingConfig;

pub const FLAG_VARIANT_B_ENABLED: &str = "variant_b_enabled";
pub const FLAG_SPLIT_PERCENTAGE: &str = "split_percentage";
pub const FLAG_EXECUTION_MODE: &str = "execution_mode";

/// One consistent view of the mutable governance settings
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub variant_b_enabled: bool,
    pub split_percentage: i16,
    pub execution_mode: ExecutionMode,
    pub policy_version: String,
}

/// Assembles runtime snapshots from the flag cache with configured defaults
pub struct SettingsSource {
    flags: Arc<FlagCache>,
    defaults: RoutingConfig,
}

impl SettingsSource {
    pub fn new(flags: Arc<FlagCache>, defaults: RoutingConfig) -> Self {
        Self { flags, defaults }
    }

    pub async fn snapshot(&self) -> RuntimeSettings {
        let variant_b_enabled = self.flags.is_enabled(FLAG_VARIANT_B_ENABLED).await;

        let split_percentage = match self.flags.get_value(FLAG_SPLIT_PERCENTAGE).await {
            Some(raw) => match raw.parse::<i16>() {
                Ok(pct) if (0..=100).contains(&pct) => pct,
                _ => {
                    warn!(value = %raw, "invalid split percentage flag, using configured default");
                    self.defaults.split_percentage
                }
            },
            None => self.defaults.split_percentage,
        };

        let execution_mode = match self.flags.get_value(FLAG_EXECUTION_MODE).await {
            Some(raw) => match raw.parse::<ExecutionMode>() {
                Ok(mode) => mode,
                Err(_) => {
                    warn!(value = %raw, "invalid execution mode flag, using configured default");
                    self.defaults.execution_mode
                }
            },
            None => self.defaults.execution_mode,
        };

        RuntimeSettings {
            variant_b_enabled,
            split_percentage,
            execution_mode,
            policy_version: self.defaults.policy_version.clone(),
        }
    }

    /// Force the next snapshot to re-read the governance flags.
    pub async fn invalidate(&self) {
        self.flags.invalidate(FLAG_VARIANT_B_ENABLED).await;
        self.flags.invalidate(FLAG_SPLIT_PERCENTAGE).await;
        self.flags.invalidate(FLAG_EXECUTION_MODE).await;
    }
}
