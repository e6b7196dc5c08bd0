// Deduplication gate.
// Computes a stable fingerprint per inbound signal and admits at most one
// Signal row per fingerprint within the dedup window.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use common::SignalDirection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPool;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::payload::ValidatedSignal;

/// Dedup gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Window within which an identical fingerprint is a duplicate
    #[serde(default = "default_window_secs")]
    pub window_secs: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
        }
    }
}

fn default_window_secs() -> i64 {
    60
}

/// Outcome of admitting one webhook payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupOutcome {
    /// A new pending signal was inserted
    Created { signal_id: Uuid },
    /// A non-duplicate signal with this fingerprint already exists inside
    /// the window
    Duplicate { signal_id: Uuid },
}

/// Gate between the webhook boundary and the signals table
pub struct DedupGate {
    db_pool: Arc<PgPool>,
    config: DedupConfig,
}

impl DedupGate {
    pub fn new(db_pool: Arc<PgPool>, config: DedupConfig) -> Self {
        Self { db_pool, config }
    }

    /// Create the signals table and its indexes
    pub async fn initialize(&self) -> Result<()> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id UUID PRIMARY KEY,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                event_time TIMESTAMPTZ NOT NULL,
                signal_hash TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                rejection_reason TEXT,
                processed BOOLEAN NOT NULL DEFAULT FALSE,
                processing_lock BOOLEAN NOT NULL DEFAULT FALSE,
                locked_at TIMESTAMPTZ,
                queued_until TIMESTAMPTZ,
                next_retry_at TIMESTAMPTZ,
                retry_count INT NOT NULL DEFAULT 0,
                received_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE INDEX IF NOT EXISTS idx_signals_hash_received
                ON signals(signal_hash, received_at);
            CREATE INDEX IF NOT EXISTS idx_signals_due
                ON signals(status, processing_lock, event_time);
            "#,
        )
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to create signals table")?;

        info!("Signals table initialized");
        Ok(())
    }

    /// Stable content fingerprint: SHA-256 over the normalized signal fields.
    pub fn fingerprint(
        symbol: &str,
        direction: SignalDirection,
        timeframe: &str,
        event_time: DateTime<Utc>,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(symbol.as_bytes());
        hasher.update(b"|");
        hasher.update(direction.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(timeframe.as_bytes());
        hasher.update(b"|");
        hasher.update(event_time.to_rfc3339().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Admit one validated payload: insert a pending signal unless a row
    /// with the same fingerprint already exists inside the dedup window.
    /// The insert-unless-exists runs as a single statement so two identical
    /// concurrent webhooks cannot both insert.
    pub async fn admit(&self, signal: &ValidatedSignal) -> Result<DedupOutcome> {
        let signal_hash = Self::fingerprint(
            &signal.symbol,
            signal.direction,
            &signal.timeframe,
            signal.event_time,
        );
        let window_start = Utc::now() - Duration::seconds(self.config.window_secs);
        let id = Uuid::new_v4();

        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO signals (id, symbol, direction, timeframe, event_time, signal_hash)
            SELECT $1, $2, $3, $4, $5, $6
            WHERE NOT EXISTS (
                SELECT 1 FROM signals
                WHERE signal_hash = $6 AND received_at > $7
            )
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&signal.symbol)
        .bind(signal.direction)
        .bind(&signal.timeframe)
        .bind(signal.event_time)
        .bind(&signal_hash)
        .bind(window_start)
        .fetch_optional(self.db_pool.as_ref())
        .await
        .context("Failed to admit signal")?;

        match inserted {
            Some(signal_id) => {
                info!(%signal_id, symbol = %signal.symbol, "admitted new signal");
                Ok(DedupOutcome::Created { signal_id })
            }
            None => {
                let existing: Uuid = sqlx::query_scalar(
                    r#"
                    SELECT id FROM signals
                    WHERE signal_hash = $1 AND received_at > $2
                    ORDER BY received_at DESC
                    LIMIT 1
                    "#,
                )
                .bind(&signal_hash)
                .bind(window_start)
                .fetch_one(self.db_pool.as_ref())
                .await
                .context("Failed to locate duplicate signal")?;

                debug!(signal_id = %existing, symbol = %signal.symbol, "duplicate signal inside dedup window");
                Ok(DedupOutcome::Duplicate {
                    signal_id: existing,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let ts = Utc::now();
        let a = DedupGate::fingerprint("SPY", SignalDirection::Long, "5m", ts);
        let b = DedupGate::fingerprint("SPY", SignalDirection::Long, "5m", ts);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_varies_by_field() {
        let ts = Utc::now();
        let base = DedupGate::fingerprint("SPY", SignalDirection::Long, "5m", ts);
        assert_ne!(
            base,
            DedupGate::fingerprint("QQQ", SignalDirection::Long, "5m", ts)
        );
        assert_ne!(
            base,
            DedupGate::fingerprint("SPY", SignalDirection::Short, "5m", ts)
        );
        assert_ne!(
            base,
            DedupGate::fingerprint("SPY", SignalDirection::Long, "15m", ts)
        );
        assert_ne!(
            base,
            DedupGate::fingerprint("SPY", SignalDirection::Long, "5m", ts + Duration::seconds(1))
        );
    }

    #[test]
    fn test_normalized_direction_collapses() {
        // "buy" and "long" normalize to the same direction, so identical
        // payloads differing only in vocabulary share a fingerprint.
        let ts = Utc::now();
        let direction = SignalDirection::from_action("buy").unwrap();
        assert_eq!(
            DedupGate::fingerprint("SPY", direction, "5m", ts),
            DedupGate::fingerprint("SPY", SignalDirection::Long, "5m", ts)
        );
    }
}
