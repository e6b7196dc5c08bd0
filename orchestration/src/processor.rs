// Signal Processor
// Claims pending signals under an exclusive lock, enriches them with a
// market-context snapshot, applies static risk gates, and hands approved
// signals downstream. Correct under concurrent execution on multiple
// instances: the claim is one atomic conditional update, and the lock is
// released on every exit path.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use common::{MarketContext, MarketDataProvider, MarketSnapshot, RejectionReason, Signal};
use resilience::{CircuitBreaker, RateLimiter};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::ContextStore;

/// Signal processor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Maximum signals claimed per tick
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    /// Base delay for transient-failure backoff
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: i64,

    /// Backoff ceiling
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: i64,

    /// Deferral used when the market is closed and no next-open is reported
    #[serde(default = "default_queue_fallback_secs")]
    pub queue_fallback_secs: i64,

    /// Age beyond which the watchdog force-clears a processing lock
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: i64,

    /// Risk gate: maximum open positions per symbol
    #[serde(default = "default_max_positions_per_symbol")]
    pub max_positions_per_symbol: i64,

    /// Candles fetched into each snapshot
    #[serde(default = "default_candle_limit")]
    pub candle_limit: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            queue_fallback_secs: default_queue_fallback_secs(),
            stale_lock_secs: default_stale_lock_secs(),
            max_positions_per_symbol: default_max_positions_per_symbol(),
            candle_limit: default_candle_limit(),
        }
    }
}

fn default_batch_size() -> i64 {
    10
}

fn default_backoff_base_secs() -> i64 {
    60
}

fn default_backoff_cap_secs() -> i64 {
    3600
}

fn default_queue_fallback_secs() -> i64 {
    3600
}

fn default_stale_lock_secs() -> i64 {
    900
}

fn default_max_positions_per_symbol() -> i64 {
    3
}

fn default_candle_limit() -> usize {
    50
}

/// A signal that passed enrichment and risk gates, with its snapshot
#[derive(Debug, Clone)]
pub struct EnrichedSignal {
    pub signal: Signal,
    pub context: MarketContext,
}

enum StepOutcome {
    Approved(MarketContext),
    Deferred,
    Rejected,
    Retried,
    Skipped,
}

/// Signal Processor - claims and enriches pending signals
pub struct SignalProcessor {
    db_pool: Arc<PgPool>,
    provider: Arc<dyn MarketDataProvider>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    contexts: ContextStore,
    config: ProcessorConfig,
}

impl SignalProcessor {
    pub fn new(
        db_pool: Arc<PgPool>,
        provider: Arc<dyn MarketDataProvider>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        config: ProcessorConfig,
    ) -> Self {
        let contexts = ContextStore::new(db_pool.clone());
        Self {
            db_pool,
            provider,
            limiter,
            breaker,
            contexts,
            config,
        }
    }

    pub fn contexts(&self) -> &ContextStore {
        &self.contexts
    }

    /// One processing tick: claim due signals oldest-first, enrich each, and
    /// return the approved ones. Per-signal failures are isolated; a failed
    /// signal is scheduled for retry with its lock released, never left
    /// stuck.
    pub async fn run(&self) -> Result<Vec<EnrichedSignal>> {
        let claimed = self.claim_due_batch().await?;
        if claimed.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = claimed.len(), "claimed pending signals");

        let mut enriched = Vec::new();
        for signal in claimed {
            match self.process_one(&signal).await {
                Ok(StepOutcome::Approved(context)) => {
                    enriched.push(EnrichedSignal { signal, context });
                }
                Ok(_) => {}
                Err(e) => {
                    error!(
                        signal_id = %signal.id,
                        symbol = %signal.symbol,
                        error = %e,
                        "signal processing failed, scheduling retry"
                    );
                    if let Err(retry_err) = self.schedule_retry(&signal).await {
                        error!(
                            signal_id = %signal.id,
                            error = %retry_err,
                            "retry scheduling failed, force-releasing lock"
                        );
                        if let Err(release_err) = self.release_lock(signal.id).await {
                            // Watchdog will clear it as a last resort
                            error!(
                                signal_id = %signal.id,
                                error = %release_err,
                                "lock release failed"
                            );
                        }
                    }
                }
            }
        }
        Ok(enriched)
    }

    /// Atomic batch claim: flips `processing_lock` on due, unlocked, pending
    /// signals and returns only the rows actually claimed. SKIP LOCKED keeps
    /// two instances from ever claiming the same signal.
    async fn claim_due_batch(&self) -> Result<Vec<Signal>> {
        sqlx::query_as::<_, Signal>(
            r#"
            UPDATE signals
            SET processing_lock = TRUE, locked_at = NOW()
            WHERE id IN (
                SELECT id FROM signals
                WHERE status = 'pending'
                  AND processed = FALSE
                  AND processing_lock = FALSE
                  AND (queued_until IS NULL OR queued_until <= NOW())
                  AND (next_retry_at IS NULL OR next_retry_at <= NOW())
                ORDER BY event_time ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(self.config.batch_size)
        .fetch_all(self.db_pool.as_ref())
        .await
        .context("Failed to claim signal batch")
    }

    async fn process_one(&self, signal: &Signal) -> Result<StepOutcome> {
        // Rate-limit denial and an open breaker are normal outcomes: release
        // and let the next tick pick the signal up again.
        if !self.limiter.try_acquire() {
            debug!(signal_id = %signal.id, "market data rate limited, skipping this cycle");
            self.release_lock(signal.id).await?;
            return Ok(StepOutcome::Skipped);
        }
        if !self.breaker.allow_request() {
            debug!(signal_id = %signal.id, "market data circuit open, skipping this cycle");
            self.release_lock(signal.id).await?;
            return Ok(StepOutcome::Skipped);
        }

        let hours = match self.provider.market_hours().await {
            Ok(hours) => {
                self.breaker.record_success();
                hours
            }
            Err(e) => {
                self.breaker.record_failure();
                warn!(signal_id = %signal.id, error = %e, "market hours lookup failed");
                self.schedule_retry(signal).await?;
                return Ok(StepOutcome::Retried);
            }
        };

        if !hours.is_open {
            let queued_until = hours.next_open.unwrap_or_else(|| {
                Utc::now() + Duration::seconds(self.config.queue_fallback_secs)
            });
            self.defer_until(signal.id, queued_until).await?;
            info!(
                signal_id = %signal.id,
                symbol = %signal.symbol,
                %queued_until,
                "market closed, signal queued"
            );
            return Ok(StepOutcome::Deferred);
        }

        let current_price = match self.provider.stock_price(&signal.symbol).await {
            Ok(price) => {
                self.breaker.record_success();
                price
            }
            Err(e) => {
                self.breaker.record_failure();
                warn!(signal_id = %signal.id, error = %e, "price fetch failed");
                self.schedule_retry(signal).await?;
                return Ok(StepOutcome::Retried);
            }
        };

        let candles = match self
            .provider
            .candles(&signal.symbol, &signal.timeframe, self.config.candle_limit)
            .await
        {
            Ok(candles) => {
                self.breaker.record_success();
                candles
            }
            Err(e) => {
                self.breaker.record_failure();
                warn!(signal_id = %signal.id, error = %e, "candle fetch failed");
                self.schedule_retry(signal).await?;
                return Ok(StepOutcome::Retried);
            }
        };

        let indicators = match self
            .provider
            .indicators(&signal.symbol, &signal.timeframe)
            .await
        {
            Ok(indicators) => {
                self.breaker.record_success();
                indicators
            }
            Err(e) => {
                self.breaker.record_failure();
                warn!(signal_id = %signal.id, error = %e, "indicator fetch failed");
                self.schedule_retry(signal).await?;
                return Ok(StepOutcome::Retried);
            }
        };

        let snapshot = MarketSnapshot {
            symbol: signal.symbol.clone(),
            timeframe: signal.timeframe.clone(),
            captured_at: Utc::now(),
            current_price,
            market_open: true,
            candles,
            indicators,
        };
        let context = self.contexts.insert_snapshot(signal.id, &snapshot).await?;

        if let Some(reason) = self.risk_gate(signal).await? {
            self.reject(signal.id, reason).await?;
            info!(
                signal_id = %signal.id,
                symbol = %signal.symbol,
                reason = %reason,
                "signal rejected by risk gate"
            );
            return Ok(StepOutcome::Rejected);
        }

        self.approve(signal.id).await?;
        info!(
            signal_id = %signal.id,
            symbol = %signal.symbol,
            context_hash = %context.context_hash,
            "signal approved and enriched"
        );
        Ok(StepOutcome::Approved(context))
    }

    /// Static risk gates evaluated at enrichment time
    async fn risk_gate(&self, signal: &Signal) -> Result<Option<RejectionReason>> {
        let open_for_symbol: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM shadow_positions WHERE symbol = $1 AND status = 'open'",
        )
        .bind(&signal.symbol)
        .fetch_one(self.db_pool.as_ref())
        .await
        .context("Failed to count open positions for risk gate")?;

        if open_for_symbol >= self.config.max_positions_per_symbol {
            return Ok(Some(RejectionReason::RiskLimitExceeded));
        }
        Ok(None)
    }

    async fn approve(&self, signal_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE signals
            SET status = 'approved', processed = TRUE,
                processing_lock = FALSE, locked_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(signal_id)
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to approve signal")?;
        Ok(())
    }

    async fn reject(&self, signal_id: Uuid, reason: RejectionReason) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE signals
            SET status = 'rejected', rejection_reason = $2, processed = TRUE,
                processing_lock = FALSE, locked_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(signal_id)
        .bind(reason)
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to reject signal")?;
        Ok(())
    }

    async fn defer_until(&self, signal_id: Uuid, queued_until: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE signals
            SET queued_until = $2, processing_lock = FALSE, locked_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(signal_id)
        .bind(queued_until)
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to defer signal")?;
        Ok(())
    }

    /// Schedule a transient-failure retry with exponential backoff and
    /// release the lock. Transient failures are never rejected outright.
    async fn schedule_retry(&self, signal: &Signal) -> Result<()> {
        let delay = retry_backoff(
            signal.retry_count,
            self.config.backoff_base_secs,
            self.config.backoff_cap_secs,
        );
        let next_retry_at = Utc::now() + delay;

        sqlx::query(
            r#"
            UPDATE signals
            SET next_retry_at = $2, retry_count = retry_count + 1,
                processing_lock = FALSE, locked_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(signal.id)
        .bind(next_retry_at)
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to schedule signal retry")?;

        debug!(
            signal_id = %signal.id,
            retry_count = signal.retry_count + 1,
            %next_retry_at,
            "scheduled signal retry"
        );
        Ok(())
    }

    async fn release_lock(&self, signal_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE signals SET processing_lock = FALSE, locked_at = NULL WHERE id = $1",
        )
        .bind(signal_id)
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to release processing lock")?;
        Ok(())
    }

    /// Ops watchdog: force-clear locks held past the configured age, e.g.
    /// after a crash mid-processing on another instance.
    pub async fn release_stale_locks(&self) -> Result<usize> {
        let cutoff = Utc::now() - Duration::seconds(self.config.stale_lock_secs);

        let released: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE signals
            SET processing_lock = FALSE, locked_at = NULL
            WHERE processing_lock = TRUE AND locked_at < $1
            RETURNING id
            "#,
        )
        .bind(cutoff)
        .fetch_all(self.db_pool.as_ref())
        .await
        .context("Failed to release stale locks")?;

        for signal_id in &released {
            warn!(%signal_id, "force-released stale processing lock");
        }
        Ok(released.len())
    }
}

/// Exponential backoff with jitter: base * 2^retry, capped, +/-10%.
pub fn retry_backoff(retry_count: i32, base_secs: i64, cap_secs: i64) -> Duration {
    let exponent = retry_count.clamp(0, 16) as u32;
    let raw = base_secs
        .saturating_mul(1_i64 << exponent)
        .min(cap_secs)
        .max(1);
    let jittered = (raw as f64 * (0.9 + fastrand::f64() * 0.2)).min(cap_secs as f64);
    Duration::seconds(jittered.round().max(1.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_first_retry_near_base() {
        for _ in 0..50 {
            let delay = retry_backoff(0, 60, 3600).num_seconds();
            assert!((54..=66).contains(&delay), "delay {} outside jitter band", delay);
        }
    }

    #[test]
    fn test_backoff_doubles() {
        for _ in 0..50 {
            let delay = retry_backoff(2, 60, 3600).num_seconds();
            // 60 * 2^2 = 240, +/-10%
            assert!((216..=264).contains(&delay), "delay {} outside jitter band", delay);
        }
    }

    #[test]
    fn test_backoff_respects_cap() {
        for retry in [6, 10, 16, 100] {
            let delay = retry_backoff(retry, 60, 3600).num_seconds();
            assert!(delay <= 3600, "retry {} exceeded cap: {}", retry, delay);
            assert!(delay >= 3240, "retry {} fell below capped band: {}", retry, delay);
        }
    }

    #[test]
    fn test_backoff_never_zero() {
        assert!(retry_backoff(0, 1, 1).num_seconds() >= 1);
    }
}
