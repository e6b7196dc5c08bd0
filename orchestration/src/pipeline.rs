// Signal orchestration pipeline.
// Drives one enriched signal through routing, policy, dual evaluation, and
// the live/shadow dispatch split. Each signal is isolated: a failure is
// logged with its ids and the batch continues.

use anyhow::Result;
use common::{EngineDecision, EngineId, ExecutionPolicy};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::coordinator::EngineCoordinator;
use crate::policy::{EngineAvailability, PolicyEngine};
use crate::processor::{EnrichedSignal, SignalProcessor};
use crate::router::StrategyRouter;
use crate::settings::{RuntimeSettings, SettingsSource};
use monitoring::ShadowExecutor;

/// End-to-end orchestration of one processing tick
pub struct SignalPipeline {
    processor: SignalProcessor,
    router: StrategyRouter,
    policy: PolicyEngine,
    coordinator: EngineCoordinator,
    shadow: Arc<ShadowExecutor>,
    settings: SettingsSource,
    availability: Arc<dyn EngineAvailability>,
}

impl SignalPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        processor: SignalProcessor,
        router: StrategyRouter,
        policy: PolicyEngine,
        coordinator: EngineCoordinator,
        shadow: Arc<ShadowExecutor>,
        settings: SettingsSource,
        availability: Arc<dyn EngineAvailability>,
    ) -> Self {
        Self {
            processor,
            router,
            policy,
            coordinator,
            shadow,
            settings,
            availability,
        }
    }

    pub fn processor(&self) -> &SignalProcessor {
        &self.processor
    }

    /// One tick: claim and enrich due signals, then orchestrate each
    /// approved one under a single settings snapshot.
    pub async fn tick(&self) -> Result<()> {
        let enriched = self.processor.run().await?;
        if enriched.is_empty() {
            return Ok(());
        }

        let settings = self.settings.snapshot().await;
        for item in enriched {
            if let Err(e) = self.dispatch(&item, &settings).await {
                error!(
                    signal_id = %item.signal.id,
                    symbol = %item.signal.symbol,
                    error = %e,
                    "signal orchestration failed"
                );
            }
        }
        Ok(())
    }

    async fn dispatch(&self, item: &EnrichedSignal, settings: &RuntimeSettings) -> Result<()> {
        let route = self.router.route(&item.signal, settings).await?;
        let policy = self
            .policy
            .execution_policy(route.experiment_id, settings, self.availability.as_ref())
            .await?;

        let eval = self.coordinator.invoke_both(&item.signal, &item.context).await;

        // Live handoff: the executed engine's recommendation goes to the
        // order-placement collaborator. Shadow simulation never does.
        if let Some(engine) = policy.executed_engine {
            match eval.decision_for(engine) {
                EngineDecision::Recommend(rec) => {
                    info!(
                        experiment_id = %policy.experiment_id,
                        engine = %engine,
                        symbol = %rec.symbol,
                        strike = %rec.strike,
                        quantity = rec.quantity,
                        "forwarding recommendation to live execution path"
                    );
                }
                EngineDecision::Decline => {
                    debug!(
                        experiment_id = %policy.experiment_id,
                        engine = %engine,
                        "live engine declined to trade"
                    );
                }
            }
        }

        self.run_shadow_paths(item, &policy, &eval).await
    }

    async fn run_shadow_paths(
        &self,
        item: &EnrichedSignal,
        policy: &ExecutionPolicy,
        eval: &crate::coordinator::DualEvaluation,
    ) -> Result<()> {
        for engine in [EngineId::EngineA, EngineId::EngineB] {
            if !policy.is_shadow(engine) {
                continue;
            }
            let decision = tag_decision(eval.decision_for(engine), policy.experiment_id, true);
            self.shadow
                .simulate_execution(&decision, &item.signal, policy)
                .await?;
        }
        Ok(())
    }
}

/// Stamp a decision with its owning experiment and shadow designation.
/// Engines evaluate before the experiment is known, so the orchestrator
/// owns these two fields.
fn tag_decision(decision: &EngineDecision, experiment_id: Uuid, is_shadow: bool) -> EngineDecision {
    match decision {
        EngineDecision::Decline => EngineDecision::Decline,
        EngineDecision::Recommend(rec) => {
            let mut rec = rec.clone();
            rec.experiment_id = experiment_id;
            rec.is_shadow = is_shadow;
            EngineDecision::Recommend(rec)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use common::{SignalDirection, TradeRecommendation};
    use rust_decimal::Decimal;

    #[test]
    fn test_tag_decision_stamps_experiment() {
        let experiment_id = Uuid::new_v4();
        let decision = EngineDecision::Recommend(TradeRecommendation {
            engine: EngineId::EngineB,
            experiment_id: Uuid::nil(),
            symbol: "SPY".to_string(),
            direction: SignalDirection::Long,
            strike: Decimal::new(590, 0),
            expiration: NaiveDate::from_ymd_opt(2026, 3, 6).unwrap(),
            quantity: 1,
            entry_price: Decimal::new(215, 2),
            stop_loss: None,
            target_price: None,
            is_shadow: false,
        });

        let tagged = tag_decision(&decision, experiment_id, true);
        let rec = tagged.recommendation().unwrap();
        assert_eq!(rec.experiment_id, experiment_id);
        assert!(rec.is_shadow);
    }

    #[test]
    fn test_tag_decision_passes_decline_through() {
        let tagged = tag_decision(&EngineDecision::Decline, Uuid::new_v4(), true);
        assert!(tagged.recommendation().is_none());
    }
}
