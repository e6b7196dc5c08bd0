// Shadow Executor - Simulates trades for the shadow engine of an experiment
// using the same real-time price feed as the live path. Never places a live
// order.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use common::{
    EngineDecision, ExecutionPolicy, ExitReason, MarketDataProvider, ShadowPosition, ShadowTrade,
    Signal, SignalDirection,
};
use resilience::RateLimiter;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::outcomes::{NewOutcome, OutcomeTracker};

/// Shadow executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowExecutorConfig {
    /// Option contract multiplier applied to per-unit P&L
    #[serde(default = "default_contract_multiplier")]
    pub contract_multiplier: f64,
}

impl Default for ShadowExecutorConfig {
    fn default() -> Self {
        Self {
            contract_multiplier: default_contract_multiplier(),
        }
    }
}

fn default_contract_multiplier() -> f64 {
    100.0
}

/// Result of one refresh pass over open shadow positions
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub closed: usize,
    pub skipped: usize,
}

pub struct ShadowExecutor {
    db_pool: Arc<PgPool>,
    provider: Arc<dyn MarketDataProvider>,
    limiter: Arc<RateLimiter>,
    tracker: OutcomeTracker,
    config: ShadowExecutorConfig,
}

#[derive(sqlx::FromRow)]
struct OpenPositionRow {
    #[sqlx(flatten)]
    position: ShadowPosition,
    strike: f64,
    expiration: NaiveDate,
}

impl ShadowExecutor {
    pub fn new(
        db_pool: Arc<PgPool>,
        provider: Arc<dyn MarketDataProvider>,
        limiter: Arc<RateLimiter>,
        config: ShadowExecutorConfig,
    ) -> Self {
        let tracker = OutcomeTracker::new(db_pool.clone());
        Self {
            db_pool,
            provider,
            limiter,
            tracker,
            config,
        }
    }

    /// Initialize shadow tables
    pub async fn initialize(&self) -> Result<()> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS shadow_trades (
                id UUID PRIMARY KEY,
                experiment_id UUID NOT NULL,
                engine TEXT NOT NULL,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                strike DOUBLE PRECISION NOT NULL,
                expiration DATE NOT NULL,
                quantity INT NOT NULL,
                entry_price DOUBLE PRECISION NOT NULL,
                entry_time TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE TABLE IF NOT EXISTS shadow_positions (
                id UUID PRIMARY KEY,
                shadow_trade_id UUID NOT NULL REFERENCES shadow_trades(id),
                experiment_id UUID NOT NULL,
                engine TEXT NOT NULL,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                quantity INT NOT NULL,
                entry_price DOUBLE PRECISION NOT NULL,
                current_price DOUBLE PRECISION NOT NULL,
                unrealized_pnl DOUBLE PRECISION NOT NULL DEFAULT 0,
                stop_loss DOUBLE PRECISION,
                target_price DOUBLE PRECISION,
                status TEXT NOT NULL DEFAULT 'open',
                opened_at TIMESTAMPTZ NOT NULL,
                closed_at TIMESTAMPTZ,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE INDEX IF NOT EXISTS idx_shadow_positions_status ON shadow_positions(status);
            CREATE INDEX IF NOT EXISTS idx_shadow_positions_experiment ON shadow_positions(experiment_id);
            CREATE INDEX IF NOT EXISTS idx_shadow_trades_experiment ON shadow_trades(experiment_id);
            "#,
        )
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to create shadow tables")?;

        info!("Shadow execution tables initialized");
        Ok(())
    }

    /// Simulate execution of an approved decision for the experiment's
    /// shadow engine. Entry price is fetched from the same real-time feed
    /// the live path uses. Returns None when the decision is a decline or
    /// the engine is not shadowed under this policy.
    pub async fn simulate_execution(
        &self,
        decision: &EngineDecision,
        signal: &Signal,
        policy: &ExecutionPolicy,
    ) -> Result<Option<ShadowTrade>> {
        let rec = match decision.recommendation() {
            Some(rec) => rec,
            None => return Ok(None),
        };

        if !policy.is_shadow(rec.engine) {
            debug!(
                engine = %rec.engine,
                experiment_id = %policy.experiment_id,
                "engine is not shadowed for this experiment, skipping simulation"
            );
            return Ok(None);
        }

        let entry_price = self
            .provider
            .option_price(&rec.symbol, rec.strike, rec.expiration)
            .await
            .context("Failed to fetch entry price for shadow trade")?
            .to_f64()
            .context("Entry price out of f64 range")?;

        let now = Utc::now();
        let trade = ShadowTrade {
            id: Uuid::new_v4(),
            experiment_id: policy.experiment_id,
            engine: rec.engine,
            symbol: rec.symbol.clone(),
            direction: rec.direction,
            strike: rec.strike.to_f64().context("Strike out of f64 range")?,
            expiration: rec.expiration,
            quantity: rec.quantity,
            entry_price,
            entry_time: now,
        };

        sqlx::query(
            r#"
            INSERT INTO shadow_trades (
                id, experiment_id, engine, symbol, direction, strike,
                expiration, quantity, entry_price, entry_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(trade.id)
        .bind(trade.experiment_id)
        .bind(trade.engine)
        .bind(&trade.symbol)
        .bind(trade.direction)
        .bind(trade.strike)
        .bind(trade.expiration)
        .bind(trade.quantity)
        .bind(trade.entry_price)
        .bind(trade.entry_time)
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to insert shadow trade")?;

        sqlx::query(
            r#"
            INSERT INTO shadow_positions (
                id, shadow_trade_id, experiment_id, engine, symbol, direction,
                quantity, entry_price, current_price, unrealized_pnl,
                stop_loss, target_price, status, opened_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, $10, $11, 'open', $12)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(trade.id)
        .bind(trade.experiment_id)
        .bind(trade.engine)
        .bind(&trade.symbol)
        .bind(trade.direction)
        .bind(trade.quantity)
        .bind(trade.entry_price)
        .bind(trade.entry_price)
        .bind(rec.stop_loss.and_then(|d| d.to_f64()))
        .bind(rec.target_price.and_then(|d| d.to_f64()))
        .bind(now)
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to insert shadow position")?;

        info!(
            shadow_trade_id = %trade.id,
            signal_id = %signal.id,
            experiment_id = %trade.experiment_id,
            engine = %trade.engine,
            symbol = %trade.symbol,
            entry_price = trade.entry_price,
            "opened shadow position"
        );
        Ok(Some(trade))
    }

    /// Refresh all open shadow positions: recompute unrealized P&L from the
    /// live price feed and close positions whose exit conditions fire.
    /// Rate-limit denials skip the position until the next cycle.
    pub async fn refresh_positions(&self) -> Result<RefreshReport> {
        let open = sqlx::query_as::<_, OpenPositionRow>(
            r#"
            SELECT p.*, t.strike, t.expiration
            FROM shadow_positions p
            JOIN shadow_trades t ON p.shadow_trade_id = t.id
            WHERE p.status = 'open'
            ORDER BY p.opened_at ASC
            "#,
        )
        .fetch_all(self.db_pool.as_ref())
        .await
        .context("Failed to fetch open shadow positions")?;

        let mut report = RefreshReport::default();

        for row in open {
            let position = row.position;

            if !self.limiter.try_acquire() {
                debug!(position_id = %position.id, "price feed rate limited, skipping this cycle");
                report.skipped += 1;
                continue;
            }

            let price = match self
                .provider
                .option_price(
                    &position.symbol,
                    rust_decimal::Decimal::try_from(row.strike)
                        .context("Invalid strike value")?,
                    row.expiration,
                )
                .await
            {
                Ok(price) => match price.to_f64() {
                    Some(price) => price,
                    None => {
                        warn!(position_id = %position.id, "price out of f64 range, skipping");
                        report.skipped += 1;
                        continue;
                    }
                },
                Err(e) => {
                    warn!(position_id = %position.id, error = %e, "price refresh failed, retrying next cycle");
                    report.skipped += 1;
                    continue;
                }
            };

            let pnl = unrealized_pnl(
                position.direction,
                position.entry_price,
                price,
                position.quantity,
                self.config.contract_multiplier,
            );

            match exit_condition(
                position.direction,
                price,
                position.stop_loss,
                position.target_price,
            ) {
                Some(reason) => {
                    self.close_position(&position, Utc::now(), price, pnl, reason)
                        .await?;
                    report.closed += 1;
                }
                None => {
                    sqlx::query(
                        r#"
                        UPDATE shadow_positions
                        SET current_price = $1, unrealized_pnl = $2, updated_at = NOW()
                        WHERE id = $3
                        "#,
                    )
                    .bind(price)
                    .bind(pnl)
                    .bind(position.id)
                    .execute(self.db_pool.as_ref())
                    .await
                    .context("Failed to update shadow position")?;
                    report.refreshed += 1;
                }
            }
        }

        if report.closed > 0 || report.refreshed > 0 {
            debug!(
                refreshed = report.refreshed,
                closed = report.closed,
                skipped = report.skipped,
                "shadow position refresh complete"
            );
        }
        Ok(report)
    }

    /// Exit any open shadow counterpart of an experiment at the live path's
    /// exit time/price/reason, keeping the comparison valid.
    pub async fn close_for_experiment(
        &self,
        experiment_id: Uuid,
        exit_time: DateTime<Utc>,
        exit_price: f64,
        reason: ExitReason,
    ) -> Result<usize> {
        let open = sqlx::query_as::<_, ShadowPosition>(
            "SELECT * FROM shadow_positions WHERE experiment_id = $1 AND status = 'open'",
        )
        .bind(experiment_id)
        .fetch_all(self.db_pool.as_ref())
        .await
        .context("Failed to fetch shadow positions for experiment")?;

        let count = open.len();
        for position in open {
            let pnl = unrealized_pnl(
                position.direction,
                position.entry_price,
                exit_price,
                position.quantity,
                self.config.contract_multiplier,
            );
            self.close_position(&position, exit_time, exit_price, pnl, reason)
                .await?;
        }

        if count > 0 {
            info!(
                %experiment_id,
                closed = count,
                exit_price,
                reason = %reason,
                "synchronized shadow exits with live path"
            );
        }
        Ok(count)
    }

    /// Transition one position open -> closing -> closed and record its
    /// terminal outcome.
    async fn close_position(
        &self,
        position: &ShadowPosition,
        exit_time: DateTime<Utc>,
        exit_price: f64,
        pnl: f64,
        reason: ExitReason,
    ) -> Result<()> {
        sqlx::query("UPDATE shadow_positions SET status = 'closing', updated_at = NOW() WHERE id = $1")
            .bind(position.id)
            .execute(self.db_pool.as_ref())
            .await
            .context("Failed to mark shadow position closing")?;

        self.tracker
            .record_outcome(&NewOutcome {
                experiment_id: position.experiment_id,
                engine: position.engine,
                symbol: position.symbol.clone(),
                entry_price: position.entry_price,
                exit_price,
                entry_time: position.opened_at,
                exit_time,
                pnl,
                exit_reason: reason,
                is_shadow: true,
            })
            .await?;

        sqlx::query(
            r#"
            UPDATE shadow_positions
            SET status = 'closed', current_price = $1, unrealized_pnl = $2,
                closed_at = $3, updated_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(exit_price)
        .bind(pnl)
        .bind(exit_time)
        .bind(position.id)
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to close shadow position")?;

        info!(
            position_id = %position.id,
            experiment_id = %position.experiment_id,
            engine = %position.engine,
            pnl,
            reason = %reason,
            "closed shadow position"
        );
        Ok(())
    }
}

/// P&L of a position at the given price: (current - entry) for longs,
/// inverted for shorts, scaled by quantity and the contract multiplier.
pub fn unrealized_pnl(
    direction: SignalDirection,
    entry_price: f64,
    current_price: f64,
    quantity: i32,
    contract_multiplier: f64,
) -> f64 {
    let per_unit = match direction {
        SignalDirection::Long => current_price - entry_price,
        SignalDirection::Short => entry_price - current_price,
    };
    per_unit * quantity as f64 * contract_multiplier
}

/// Whether a position's stop or target fires at the given price. The stop
/// wins when both would fire on the same tick.
pub fn exit_condition(
    direction: SignalDirection,
    price: f64,
    stop_loss: Option<f64>,
    target_price: Option<f64>,
) -> Option<ExitReason> {
    match direction {
        SignalDirection::Long => {
            if stop_loss.is_some_and(|stop| price <= stop) {
                return Some(ExitReason::StopLoss);
            }
            if target_price.is_some_and(|target| price >= target) {
                return Some(ExitReason::TargetHit);
            }
        }
        SignalDirection::Short => {
            if stop_loss.is_some_and(|stop| price >= stop) {
                return Some(ExitReason::StopLoss);
            }
            if target_price.is_some_and(|target| price <= target) {
                return Some(ExitReason::TargetHit);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_pnl() {
        // 2 contracts, $1.50 -> $2.10, multiplier 100
        let pnl = unrealized_pnl(SignalDirection::Long, 1.50, 2.10, 2, 100.0);
        assert!((pnl - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_pnl() {
        let pnl = unrealized_pnl(SignalDirection::Short, 1.50, 2.10, 2, 100.0);
        assert!((pnl + 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_long_exit_conditions() {
        assert_eq!(
            exit_condition(SignalDirection::Long, 0.90, Some(1.0), Some(2.0)),
            Some(ExitReason::StopLoss)
        );
        assert_eq!(
            exit_condition(SignalDirection::Long, 2.10, Some(1.0), Some(2.0)),
            Some(ExitReason::TargetHit)
        );
        assert_eq!(
            exit_condition(SignalDirection::Long, 1.50, Some(1.0), Some(2.0)),
            None
        );
    }

    #[test]
    fn test_short_exit_conditions() {
        assert_eq!(
            exit_condition(SignalDirection::Short, 2.10, Some(2.0), Some(1.0)),
            Some(ExitReason::StopLoss)
        );
        assert_eq!(
            exit_condition(SignalDirection::Short, 0.90, Some(2.0), Some(1.0)),
            Some(ExitReason::TargetHit)
        );
    }

    #[test]
    fn test_stop_wins_over_target() {
        // Degenerate config where both would fire: stop takes precedence
        assert_eq!(
            exit_condition(SignalDirection::Long, 1.0, Some(1.5), Some(0.5)),
            Some(ExitReason::StopLoss)
        );
    }

    #[test]
    fn test_no_exit_without_levels() {
        assert_eq!(exit_condition(SignalDirection::Long, 5.0, None, None), None);
    }
}
