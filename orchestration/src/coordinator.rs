// Engine Coordinator
// Invokes both decision engines concurrently with identical signal and
// context inputs. An engine error or timeout degrades to a decline for that
// call; it never aborts the signal. Also mirrors live exits onto shadow
// counterparts so the A/B comparison stays valid.

use anyhow::Result;
use chrono::{DateTime, Utc};
use common::{EngineDecision, EngineId, ExitReason, MarketContext, Signal};
use monitoring::ShadowExecutor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Decision engine invocation contract. Engine internals are external
/// collaborators; the orchestrator only depends on this seam.
#[async_trait::async_trait]
pub trait DecisionEngine: Send + Sync {
    fn id(&self) -> EngineId;

    /// Evaluate one signal with its market context. A decline means the
    /// engine chose not to trade, not a failure.
    async fn evaluate(&self, signal: &Signal, context: &MarketContext) -> Result<EngineDecision>;
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineCoordinatorConfig {
    /// Per-call evaluation timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EngineCoordinatorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

/// Result of one dual invocation, with per-engine wall time for telemetry
#[derive(Debug, Clone)]
pub struct DualEvaluation {
    pub engine_a: EngineDecision,
    pub engine_b: EngineDecision,
    pub engine_a_elapsed_ms: u64,
    pub engine_b_elapsed_ms: u64,
}

impl DualEvaluation {
    pub fn decision_for(&self, engine: EngineId) -> &EngineDecision {
        match engine {
            EngineId::EngineA => &self.engine_a,
            EngineId::EngineB => &self.engine_b,
        }
    }
}

/// Engine Coordinator - concurrent dual invocation plus exit sync
pub struct EngineCoordinator {
    engine_a: Arc<dyn DecisionEngine>,
    engine_b: Arc<dyn DecisionEngine>,
    shadow: Arc<ShadowExecutor>,
    config: EngineCoordinatorConfig,
}

impl EngineCoordinator {
    pub fn new(
        engine_a: Arc<dyn DecisionEngine>,
        engine_b: Arc<dyn DecisionEngine>,
        shadow: Arc<ShadowExecutor>,
        config: EngineCoordinatorConfig,
    ) -> Self {
        Self {
            engine_a,
            engine_b,
            shadow,
            config,
        }
    }

    /// Evaluate both engines concurrently against the same signal and
    /// context. Neither invocation blocks the other beyond the elapsed wall
    /// time recorded for telemetry.
    pub async fn invoke_both(&self, signal: &Signal, context: &MarketContext) -> DualEvaluation {
        let (a, b) = tokio::join!(
            self.invoke(self.engine_a.as_ref(), signal, context),
            self.invoke(self.engine_b.as_ref(), signal, context),
        );

        debug!(
            signal_id = %signal.id,
            engine_a_ms = a.1,
            engine_b_ms = b.1,
            engine_a_recommends = a.0.recommendation().is_some(),
            engine_b_recommends = b.0.recommendation().is_some(),
            "dual engine evaluation complete"
        );

        DualEvaluation {
            engine_a: a.0,
            engine_b: b.0,
            engine_a_elapsed_ms: a.1,
            engine_b_elapsed_ms: b.1,
        }
    }

    async fn invoke(
        &self,
        engine: &dyn DecisionEngine,
        signal: &Signal,
        context: &MarketContext,
    ) -> (EngineDecision, u64) {
        let timeout = std::time::Duration::from_secs(self.config.timeout_secs);
        let started = Instant::now();

        let decision = match tokio::time::timeout(timeout, engine.evaluate(signal, context)).await
        {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                warn!(
                    engine = %engine.id(),
                    signal_id = %signal.id,
                    error = %e,
                    "engine evaluation failed, treating as decline"
                );
                EngineDecision::Decline
            }
            Err(_) => {
                warn!(
                    engine = %engine.id(),
                    signal_id = %signal.id,
                    timeout_secs = self.config.timeout_secs,
                    "engine evaluation timed out, treating as decline"
                );
                EngineDecision::Decline
            }
        };

        (decision, started.elapsed().as_millis() as u64)
    }

    /// When the live path exits a position, exit any shadow counterpart of
    /// the same experiment at the same simulated time, price, and reason.
    pub async fn synchronize_exits(
        &self,
        experiment_id: Uuid,
        exit_time: DateTime<Utc>,
        exit_price: f64,
        reason: ExitReason,
    ) -> Result<usize> {
        self.shadow
            .close_for_experiment(experiment_id, exit_time, exit_price, reason)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use common::{SignalDirection, SignalStatus, TradeRecommendation};
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    fn test_signal() -> Signal {
        Signal {
            id: Uuid::new_v4(),
            symbol: "SPY".to_string(),
            direction: SignalDirection::Long,
            timeframe: "5m".to_string(),
            event_time: Utc::now(),
            signal_hash: "abc".to_string(),
            status: SignalStatus::Approved,
            rejection_reason: None,
            processed: true,
            processing_lock: false,
            locked_at: None,
            queued_until: None,
            next_retry_at: None,
            retry_count: 0,
            received_at: Utc::now(),
        }
    }

    fn test_context(signal_id: Uuid) -> MarketContext {
        MarketContext {
            id: Uuid::new_v4(),
            signal_id,
            captured_at: Utc::now(),
            contents: serde_json::json!({"current_price": "587.25"}),
            context_hash: "deadbeef".to_string(),
        }
    }

    fn test_recommendation(engine: EngineId) -> TradeRecommendation {
        TradeRecommendation {
            engine,
            experiment_id: Uuid::nil(),
            symbol: "SPY".to_string(),
            direction: SignalDirection::Long,
            strike: Decimal::new(590, 0),
            expiration: NaiveDate::from_ymd_opt(2026, 3, 6).unwrap(),
            quantity: 1,
            entry_price: Decimal::new(215, 2),
            stop_loss: Some(Decimal::new(150, 2)),
            target_price: Some(Decimal::new(320, 2)),
            is_shadow: false,
        }
    }

    struct RecommendingEngine {
        id: EngineId,
        seen_hashes: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl DecisionEngine for RecommendingEngine {
        fn id(&self) -> EngineId {
            self.id
        }

        async fn evaluate(
            &self,
            _signal: &Signal,
            context: &MarketContext,
        ) -> Result<EngineDecision> {
            self.seen_hashes
                .lock()
                .unwrap()
                .push(context.context_hash.clone());
            Ok(EngineDecision::Recommend(test_recommendation(self.id)))
        }
    }

    struct FailingEngine(EngineId);

    #[async_trait::async_trait]
    impl DecisionEngine for FailingEngine {
        fn id(&self) -> EngineId {
            self.0
        }

        async fn evaluate(
            &self,
            _signal: &Signal,
            _context: &MarketContext,
        ) -> Result<EngineDecision> {
            Err(anyhow::anyhow!("model backend unavailable"))
        }
    }

    struct SlowEngine(EngineId);

    #[async_trait::async_trait]
    impl DecisionEngine for SlowEngine {
        fn id(&self) -> EngineId {
            self.0
        }

        async fn evaluate(
            &self,
            _signal: &Signal,
            _context: &MarketContext,
        ) -> Result<EngineDecision> {
            tokio::time::sleep(std::time::Duration::from_secs(120)).await;
            Ok(EngineDecision::Decline)
        }
    }

    async fn coordinator_with(
        engine_a: Arc<dyn DecisionEngine>,
        engine_b: Arc<dyn DecisionEngine>,
    ) -> EngineCoordinator {
        // The shadow executor is unused by invoke_both; a lazy pool keeps
        // these tests free of a live database.
        let pool = Arc::new(
            sqlx::postgres::PgPoolOptions::new()
                .connect_lazy("postgresql://localhost/unused")
                .unwrap(),
        );
        let provider = Arc::new(common::SimulatedMarketData::new());
        let limiter = Arc::new(resilience::RateLimiter::new(Default::default()));
        let shadow = Arc::new(ShadowExecutor::new(
            pool,
            provider,
            limiter,
            Default::default(),
        ));
        EngineCoordinator::new(
            engine_a,
            engine_b,
            shadow,
            EngineCoordinatorConfig { timeout_secs: 5 },
        )
    }

    #[tokio::test]
    async fn test_both_engines_see_identical_context() {
        let engine_a = Arc::new(RecommendingEngine {
            id: EngineId::EngineA,
            seen_hashes: Mutex::new(Vec::new()),
        });
        let engine_b = Arc::new(RecommendingEngine {
            id: EngineId::EngineB,
            seen_hashes: Mutex::new(Vec::new()),
        });
        let coordinator = coordinator_with(engine_a.clone(), engine_b.clone()).await;

        let signal = test_signal();
        let context = test_context(signal.id);
        let eval = coordinator.invoke_both(&signal, &context).await;

        assert!(eval.engine_a.recommendation().is_some());
        assert!(eval.engine_b.recommendation().is_some());
        assert_eq!(
            *engine_a.seen_hashes.lock().unwrap(),
            *engine_b.seen_hashes.lock().unwrap()
        );
    }

    #[tokio::test]
    async fn test_engine_failure_becomes_decline() {
        let engine_a = Arc::new(FailingEngine(EngineId::EngineA));
        let engine_b = Arc::new(RecommendingEngine {
            id: EngineId::EngineB,
            seen_hashes: Mutex::new(Vec::new()),
        });
        let coordinator = coordinator_with(engine_a, engine_b).await;

        let signal = test_signal();
        let context = test_context(signal.id);
        let eval = coordinator.invoke_both(&signal, &context).await;

        assert!(matches!(eval.engine_a, EngineDecision::Decline));
        assert!(eval.engine_b.recommendation().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_engine_times_out_to_decline() {
        let engine_a = Arc::new(SlowEngine(EngineId::EngineA));
        let engine_b = Arc::new(RecommendingEngine {
            id: EngineId::EngineB,
            seen_hashes: Mutex::new(Vec::new()),
        });
        let coordinator = coordinator_with(engine_a, engine_b).await;

        let signal = test_signal();
        let context = test_context(signal.id);
        let eval = coordinator.invoke_both(&signal, &context).await;

        assert!(matches!(eval.engine_a, EngineDecision::Decline));
        assert!(eval.engine_b.recommendation().is_some());
    }

    #[tokio::test]
    async fn test_decision_for_maps_engines() {
        let eval = DualEvaluation {
            engine_a: EngineDecision::Decline,
            engine_b: EngineDecision::Recommend(test_recommendation(EngineId::EngineB)),
            engine_a_elapsed_ms: 1,
            engine_b_elapsed_ms: 2,
        };
        assert!(eval.decision_for(EngineId::EngineA).recommendation().is_none());
        assert!(eval.decision_for(EngineId::EngineB).recommendation().is_some());
    }
}
