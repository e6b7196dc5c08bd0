use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use common::{EngineId, ExitReason, PerformanceMetrics, TradeOutcome};
use sqlx::postgres::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Outcome Tracker - Records realized trade outcomes and derives per-engine
/// performance metrics for comparison.
pub struct OutcomeTracker {
    db_pool: Arc<PgPool>,
}

/// One terminal trade result to record, live or shadow
#[derive(Debug, Clone)]
pub struct NewOutcome {
    pub experiment_id: Uuid,
    pub engine: EngineId,
    pub symbol: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub pnl: f64,
    pub exit_reason: ExitReason,
    pub is_shadow: bool,
}

impl OutcomeTracker {
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }

    /// Initialize outcome tables
    pub async fn initialize(&self) -> Result<()> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS trade_outcomes (
                id UUID PRIMARY KEY,
                experiment_id UUID NOT NULL,
                engine TEXT NOT NULL,
                symbol TEXT NOT NULL,
                entry_price DOUBLE PRECISION NOT NULL,
                exit_price DOUBLE PRECISION NOT NULL,
                entry_time TIMESTAMPTZ NOT NULL,
                exit_time TIMESTAMPTZ NOT NULL,
                pnl DOUBLE PRECISION NOT NULL,
                exit_reason TEXT NOT NULL,
                is_shadow BOOLEAN NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE INDEX IF NOT EXISTS idx_outcomes_engine ON trade_outcomes(engine);
            CREATE INDEX IF NOT EXISTS idx_outcomes_experiment ON trade_outcomes(experiment_id);
            "#,
        )
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to create trade_outcomes table")?;

        info!("Trade outcome tables initialized");
        Ok(())
    }

    /// Validate and insert one immutable outcome row, returning the stored
    /// record including its generated id.
    pub async fn record_outcome(&self, outcome: &NewOutcome) -> Result<TradeOutcome> {
        if !outcome.pnl.is_finite() {
            bail!("outcome pnl must be finite, got {}", outcome.pnl);
        }
        if outcome.exit_time < outcome.entry_time {
            bail!(
                "outcome exit time {} precedes entry time {}",
                outcome.exit_time,
                outcome.entry_time
            );
        }
        if outcome.symbol.is_empty() {
            bail!("outcome symbol must be non-empty");
        }

        let stored = sqlx::query_as::<_, TradeOutcome>(
            r#"
            INSERT INTO trade_outcomes (
                id, experiment_id, engine, symbol, entry_price, exit_price,
                entry_time, exit_time, pnl, exit_reason, is_shadow
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(outcome.experiment_id)
        .bind(outcome.engine)
        .bind(&outcome.symbol)
        .bind(outcome.entry_price)
        .bind(outcome.exit_price)
        .bind(outcome.entry_time)
        .bind(outcome.exit_time)
        .bind(outcome.pnl)
        .bind(outcome.exit_reason)
        .bind(outcome.is_shadow)
        .fetch_one(self.db_pool.as_ref())
        .await
        .context("Failed to record trade outcome")?;

        info!(
            outcome_id = %stored.id,
            engine = %stored.engine,
            pnl = stored.pnl,
            is_shadow = stored.is_shadow,
            "recorded trade outcome"
        );
        Ok(stored)
    }

    /// Per-engine metrics, always derived fresh from the underlying rows.
    pub async fn performance_metrics(&self, engine: EngineId) -> Result<PerformanceMetrics> {
        let pnls: Vec<f64> =
            sqlx::query_scalar("SELECT pnl FROM trade_outcomes WHERE engine = $1")
                .bind(engine)
                .fetch_all(self.db_pool.as_ref())
                .await
                .context("Failed to fetch outcome rows")?;

        Ok(metrics_from_pnls(engine, &pnls))
    }

    /// Side-by-side comparison of both engines
    pub async fn compare_engines(&self) -> Result<EngineComparison> {
        let metrics_a = self.performance_metrics(EngineId::EngineA).await?;
        let metrics_b = self.performance_metrics(EngineId::EngineB).await?;

        let pnl_diff = metrics_a.total_pnl - metrics_b.total_pnl;
        let win_rate_diff = metrics_a.win_rate - metrics_b.win_rate;

        Ok(EngineComparison {
            metrics_a,
            metrics_b,
            pnl_diff,
            win_rate_diff,
        })
    }
}

/// Aggregate a set of realized P&L values into performance metrics
pub fn metrics_from_pnls(engine: EngineId, pnls: &[f64]) -> PerformanceMetrics {
    let total_trades = pnls.len() as i64;
    let winning_trades = pnls.iter().filter(|p| **p > 0.0).count() as i64;
    let losing_trades = pnls.iter().filter(|p| **p < 0.0).count() as i64;

    let win_rate = if total_trades > 0 {
        winning_trades as f64 / total_trades as f64
    } else {
        0.0
    };

    let total_pnl: f64 = pnls.iter().sum();
    let average_pnl = if total_trades > 0 {
        total_pnl / total_trades as f64
    } else {
        0.0
    };

    let max_win = pnls.iter().copied().fold(0.0_f64, f64::max);
    let max_loss = pnls.iter().copied().fold(0.0_f64, f64::min);

    PerformanceMetrics {
        engine,
        total_trades,
        winning_trades,
        losing_trades,
        win_rate,
        total_pnl,
        average_pnl,
        max_win,
        max_loss,
    }
}

/// Result of comparing both engines over their recorded outcomes
#[derive(Debug, Clone)]
pub struct EngineComparison {
    pub metrics_a: PerformanceMetrics,
    pub metrics_b: PerformanceMetrics,
    pub pnl_diff: f64,
    pub win_rate_diff: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_math() {
        let pnls = [120.0, -40.0, 65.0, -15.0, 0.0];
        let metrics = metrics_from_pnls(EngineId::EngineA, &pnls);

        assert_eq!(metrics.total_trades, 5);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.losing_trades, 2);
        assert!((metrics.win_rate - 0.4).abs() < 1e-9);
        assert!((metrics.total_pnl - 130.0).abs() < 1e-9);
        assert!((metrics.average_pnl - 26.0).abs() < 1e-9);
        assert!((metrics.max_win - 120.0).abs() < 1e-9);
        assert!((metrics.max_loss - (-40.0)).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_empty_is_zero() {
        let metrics = metrics_from_pnls(EngineId::EngineB, &[]);
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.win_rate, 0.0);
        assert_eq!(metrics.average_pnl, 0.0);
        assert_eq!(metrics.total_pnl, 0.0);
    }
}
