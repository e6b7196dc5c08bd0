// Strategy Router
// Deterministically assigns each signal to experiment variant A or B.
// Determinism is load-bearing: replaying a signal must reproduce the same
// variant for audit and debugging.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::{ExecutionMode, Experiment, Signal, Variant};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPool;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::settings::RuntimeSettings;

pub const REASON_VARIANT_B_DISABLED: &str = "variant_b_disabled";
pub const REASON_HASH_BUCKET: &str = "hash_bucket";

/// Routing defaults in effect when the flag provider has no override
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Percentage of hash buckets routed to variant B when enabled
    #[serde(default = "default_split_percentage")]
    pub split_percentage: i16,

    /// Version tag stamped onto experiments and policies
    #[serde(default = "default_policy_version")]
    pub policy_version: String,

    /// Execution mode used when the flag provider has no override
    #[serde(default = "default_execution_mode")]
    pub execution_mode: ExecutionMode,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            split_percentage: default_split_percentage(),
            policy_version: default_policy_version(),
            execution_mode: default_execution_mode(),
        }
    }
}

fn default_split_percentage() -> i16 {
    50
}

fn default_policy_version() -> String {
    "v1".to_string()
}

fn default_execution_mode() -> ExecutionMode {
    // Conservative: nothing executes live until explicitly enabled
    ExecutionMode::ShadowOnly
}

/// Result of routing one signal
#[derive(Debug, Clone)]
pub struct RouteResult {
    pub experiment_id: Uuid,
    pub variant: Variant,
    pub assignment_hash: String,
    pub split_percentage: i16,
    pub assignment_reason: String,
}

/// Session identifier used in the assignment hash: the UTC trading day of
/// the signal's event time, so replays within a session are stable.
pub fn session_id(event_time: DateTime<Utc>) -> String {
    event_time.format("%Y-%m-%d").to_string()
}

/// Deterministic assignment hash over (symbol, timeframe, session)
pub fn assignment_hash(symbol: &str, timeframe: &str, session: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(symbol.as_bytes());
    hasher.update(b"|");
    hasher.update(timeframe.as_bytes());
    hasher.update(b"|");
    hasher.update(session.as_bytes());
    hex::encode(hasher.finalize())
}

/// Map an assignment hash into [0, 100) using its leading 8 bytes
pub fn hash_bucket(hash_hex: &str) -> i16 {
    let prefix = &hash_hex[..16.min(hash_hex.len())];
    let value = u64::from_str_radix(prefix, 16).unwrap_or(0);
    (value % 100) as i16
}

/// Pure variant choice: the kill switch short-circuits to A, otherwise the
/// hash bucket is compared against the split percentage.
pub fn choose_variant(
    variant_b_enabled: bool,
    split_percentage: i16,
    hash_hex: &str,
) -> (Variant, &'static str) {
    if !variant_b_enabled {
        return (Variant::A, REASON_VARIANT_B_DISABLED);
    }
    if hash_bucket(hash_hex) < split_percentage {
        (Variant::B, REASON_HASH_BUCKET)
    } else {
        (Variant::A, REASON_HASH_BUCKET)
    }
}

/// Strategy Router - owns the experiments table
pub struct StrategyRouter {
    db_pool: Arc<PgPool>,
}

impl StrategyRouter {
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }

    /// Initialize experiment tables
    pub async fn initialize(&self) -> Result<()> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS experiments (
                id UUID PRIMARY KEY,
                signal_id UUID NOT NULL UNIQUE,
                variant TEXT NOT NULL,
                assignment_hash TEXT NOT NULL,
                assignment_reason TEXT NOT NULL,
                split_percentage SMALLINT NOT NULL,
                policy_version TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE INDEX IF NOT EXISTS idx_experiments_variant ON experiments(variant);
            "#,
        )
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to create experiments table")?;

        info!("Experiment tables initialized");
        Ok(())
    }

    /// Assign a signal to a variant and persist the experiment record.
    /// At most one experiment exists per signal; re-routing an already
    /// assigned signal returns the stored assignment unchanged.
    pub async fn route(&self, signal: &Signal, settings: &RuntimeSettings) -> Result<RouteResult> {
        let session = session_id(signal.event_time);
        let hash = assignment_hash(&signal.symbol, &signal.timeframe, &session);
        let (variant, reason) =
            choose_variant(settings.variant_b_enabled, settings.split_percentage, &hash);

        sqlx::query(
            r#"
            INSERT INTO experiments (
                id, signal_id, variant, assignment_hash, assignment_reason,
                split_percentage, policy_version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (signal_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(signal.id)
        .bind(variant)
        .bind(&hash)
        .bind(reason)
        .bind(settings.split_percentage)
        .bind(&settings.policy_version)
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to insert experiment")?;

        // Read back the stored row: under a concurrent route of the same
        // signal, whichever insert won is the assignment of record.
        let experiment = sqlx::query_as::<_, Experiment>(
            "SELECT * FROM experiments WHERE signal_id = $1",
        )
        .bind(signal.id)
        .fetch_one(self.db_pool.as_ref())
        .await
        .context("Failed to read experiment after insert")?;

        debug!(
            signal_id = %signal.id,
            experiment_id = %experiment.id,
            variant = %experiment.variant,
            reason = %experiment.assignment_reason,
            "routed signal"
        );

        Ok(RouteResult {
            experiment_id: experiment.id,
            variant: experiment.variant,
            assignment_hash: experiment.assignment_hash,
            split_percentage: experiment.split_percentage,
            assignment_reason: experiment.assignment_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_hash_is_deterministic() {
        let a = assignment_hash("SPY", "5m", "2026-03-02");
        let b = assignment_hash("SPY", "5m", "2026-03-02");
        assert_eq!(a, b);
        assert_ne!(a, assignment_hash("SPY", "5m", "2026-03-03"));
        assert_ne!(a, assignment_hash("QQQ", "5m", "2026-03-02"));
    }

    #[test]
    fn test_bucket_in_range() {
        for symbol in ["SPY", "QQQ", "IWM", "TSLA", "NVDA", "AAPL"] {
            for session in ["2026-01-05", "2026-01-06", "2026-01-07"] {
                let bucket = hash_bucket(&assignment_hash(symbol, "5m", session));
                assert!((0..100).contains(&bucket), "bucket {} out of range", bucket);
            }
        }
    }

    #[test]
    fn test_kill_switch_forces_variant_a() {
        let hash = assignment_hash("SPY", "5m", "2026-03-02");
        let (variant, reason) = choose_variant(false, 100, &hash);
        assert_eq!(variant, Variant::A);
        assert_eq!(reason, REASON_VARIANT_B_DISABLED);
    }

    #[test]
    fn test_full_split_routes_everything_to_b() {
        for symbol in ["SPY", "QQQ", "TSLA"] {
            let hash = assignment_hash(symbol, "5m", "2026-03-02");
            let (variant, reason) = choose_variant(true, 100, &hash);
            assert_eq!(variant, Variant::B);
            assert_eq!(reason, REASON_HASH_BUCKET);
        }
    }

    #[test]
    fn test_zero_split_routes_everything_to_a() {
        for symbol in ["SPY", "QQQ", "TSLA"] {
            let hash = assignment_hash(symbol, "5m", "2026-03-02");
            let (variant, _) = choose_variant(true, 0, &hash);
            assert_eq!(variant, Variant::A);
        }
    }

    #[test]
    fn test_choice_is_reproducible() {
        let hash = assignment_hash("SPY", "5m", "2026-03-02");
        let first = choose_variant(true, 50, &hash);
        let second = choose_variant(true, 50, &hash);
        assert_eq!(first, second);
    }
}
