// Market-context snapshots.
// One immutable snapshot per enriched signal, with a deterministic content
// hash used for audit verification.

use anyhow::{Context, Result};
use common::{MarketContext, MarketSnapshot};
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Deterministic integrity hash over snapshot contents: SHA-256 hex of the
/// canonical JSON serialization. serde_json orders map keys, so the same
/// contents always produce the same hash.
pub fn context_hash(contents: &serde_json::Value) -> String {
    let canonical = contents.to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Audit check: recompute the hash from stored contents and compare.
pub fn verify_context_hash(context: &MarketContext) -> bool {
    context_hash(&context.contents) == context.context_hash
}

/// Owns the market_contexts table. Written only by the signal processor.
pub struct ContextStore {
    db_pool: Arc<PgPool>,
}

impl ContextStore {
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }

    /// Initialize market-context tables
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS market_contexts (
                id UUID PRIMARY KEY,
                signal_id UUID NOT NULL UNIQUE,
                captured_at TIMESTAMPTZ NOT NULL,
                contents JSONB NOT NULL,
                context_hash TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
        )
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to create market_contexts table")?;

        info!("Market context tables initialized");
        Ok(())
    }

    /// Persist a snapshot for a signal. The first snapshot wins: a retried
    /// enrichment that already stored one gets the original back, keeping
    /// the one-context-per-signal invariant.
    pub async fn insert_snapshot(
        &self,
        signal_id: Uuid,
        snapshot: &MarketSnapshot,
    ) -> Result<MarketContext> {
        let contents =
            serde_json::to_value(snapshot).context("Failed to serialize market snapshot")?;
        let hash = context_hash(&contents);

        sqlx::query(
            r#"
            INSERT INTO market_contexts (id, signal_id, captured_at, contents, context_hash)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (signal_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(signal_id)
        .bind(snapshot.captured_at)
        .bind(&contents)
        .bind(&hash)
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to insert market context")?;

        self.for_signal(signal_id)
            .await?
            .context("Market context missing after insert")
    }

    /// The stored context for a signal, if one exists.
    pub async fn for_signal(&self, signal_id: Uuid) -> Result<Option<MarketContext>> {
        sqlx::query_as::<_, MarketContext>(
            "SELECT * FROM market_contexts WHERE signal_id = $1",
        )
        .bind(signal_id)
        .fetch_optional(self.db_pool.as_ref())
        .await
        .context("Failed to fetch market context")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::IndicatorSet;
    use rust_decimal::Decimal;

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            symbol: "SPY".to_string(),
            timeframe: "5m".to_string(),
            captured_at: "2026-03-02T14:30:00Z".parse().unwrap(),
            current_price: Decimal::new(58725, 2),
            market_open: true,
            candles: Vec::new(),
            indicators: IndicatorSet {
                rsi: Some(41.2),
                ..IndicatorSet::default()
            },
        }
    }

    #[test]
    fn test_hash_is_reproducible() {
        let contents = serde_json::to_value(snapshot()).unwrap();
        assert_eq!(context_hash(&contents), context_hash(&contents));
        assert_eq!(context_hash(&contents).len(), 64);
    }

    #[test]
    fn test_hash_changes_with_contents() {
        let contents = serde_json::to_value(snapshot()).unwrap();
        let mut other = snapshot();
        other.current_price = Decimal::new(58726, 2);
        let other_contents = serde_json::to_value(other).unwrap();
        assert_ne!(context_hash(&contents), context_hash(&other_contents));
    }

    #[test]
    fn test_verify_detects_tampering() {
        let contents = serde_json::to_value(snapshot()).unwrap();
        let mut context = MarketContext {
            id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            captured_at: Utc::now(),
            context_hash: context_hash(&contents),
            contents,
        };
        assert!(verify_context_hash(&context));

        context.contents["current_price"] = serde_json::json!("999.99");
        assert!(!verify_context_hash(&context));
    }
}
