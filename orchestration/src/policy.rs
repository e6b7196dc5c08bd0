// Policy Engine
// Governs which engine, if any, may execute live for an experiment. An
// unavailable primary degrades to SHADOW_ONLY; the system never promotes
// an unavailable engine to live execution.

use anyhow::{Context, Result};
use common::{EngineId, ExecutionMode, ExecutionPolicy};
use sqlx::postgres::PgPool;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::settings::RuntimeSettings;

/// Engine-availability collaborator: reports whether each engine is
/// currently healthy enough to execute live.
#[async_trait::async_trait]
pub trait EngineAvailability: Send + Sync {
    async fn is_available(&self, engine: EngineId) -> bool;
}

/// Resolved governance decision, before persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
    pub execution_mode: ExecutionMode,
    pub executed_engine: Option<EngineId>,
    pub shadow_engine: Option<EngineId>,
}

/// Pure policy resolution from the configured mode and engine availability.
pub fn resolve_policy(
    mode: ExecutionMode,
    engine_a_available: bool,
    engine_b_available: bool,
) -> PolicyDecision {
    let shadow_only = PolicyDecision {
        execution_mode: ExecutionMode::ShadowOnly,
        executed_engine: None,
        shadow_engine: None,
    };

    match mode {
        ExecutionMode::ShadowOnly => shadow_only,
        ExecutionMode::EngineAPrimary => {
            if engine_a_available {
                PolicyDecision {
                    execution_mode: ExecutionMode::EngineAPrimary,
                    executed_engine: Some(EngineId::EngineA),
                    shadow_engine: engine_b_available.then_some(EngineId::EngineB),
                }
            } else {
                shadow_only
            }
        }
        ExecutionMode::EngineBPrimary => {
            if engine_b_available {
                PolicyDecision {
                    execution_mode: ExecutionMode::EngineBPrimary,
                    executed_engine: Some(EngineId::EngineB),
                    shadow_engine: engine_a_available.then_some(EngineId::EngineA),
                }
            } else {
                shadow_only
            }
        }
        // Split capital records a single executed-engine preference (A) with
        // the other engine shadowed; true dual-live allocation is future work.
        ExecutionMode::SplitCapital => {
            if engine_a_available {
                PolicyDecision {
                    execution_mode: ExecutionMode::SplitCapital,
                    executed_engine: Some(EngineId::EngineA),
                    shadow_engine: engine_b_available.then_some(EngineId::EngineB),
                }
            } else {
                shadow_only
            }
        }
    }
}

/// Policy Engine - owns the execution_policies table
pub struct PolicyEngine {
    db_pool: Arc<PgPool>,
}

impl PolicyEngine {
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }

    /// Initialize policy tables
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_policies (
                id UUID PRIMARY KEY,
                experiment_id UUID NOT NULL UNIQUE,
                execution_mode TEXT NOT NULL,
                executed_engine TEXT,
                shadow_engine TEXT,
                policy_version TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
        )
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to create execution_policies table")?;

        info!("Execution policy tables initialized");
        Ok(())
    }

    /// The execution policy for an experiment. Computed and persisted once;
    /// every later call returns the stored row, never a recomputation.
    pub async fn execution_policy(
        &self,
        experiment_id: Uuid,
        settings: &RuntimeSettings,
        availability: &dyn EngineAvailability,
    ) -> Result<ExecutionPolicy> {
        if let Some(existing) = self.fetch(experiment_id).await? {
            return Ok(existing);
        }

        let engine_a_available = availability.is_available(EngineId::EngineA).await;
        let engine_b_available = availability.is_available(EngineId::EngineB).await;

        let decision = resolve_policy(
            settings.execution_mode,
            engine_a_available,
            engine_b_available,
        );

        if decision.execution_mode == ExecutionMode::ShadowOnly
            && settings.execution_mode != ExecutionMode::ShadowOnly
        {
            warn!(
                %experiment_id,
                configured_mode = %settings.execution_mode,
                engine_a_available,
                engine_b_available,
                "primary engine unavailable, degrading to SHADOW_ONLY"
            );
        }

        // Mutual exclusion of live execution is an invariant, not a
        // recoverable condition; a violation here is a bug.
        if let (Some(executed), Some(shadow)) =
            (decision.executed_engine, decision.shadow_engine)
        {
            if executed == shadow {
                error!(
                    %experiment_id,
                    engine = %executed,
                    mode = %decision.execution_mode,
                    "policy resolution produced executed_engine == shadow_engine"
                );
                anyhow::bail!(
                    "mutual exclusion violated for experiment {}: engine {} cannot be both executed and shadow",
                    experiment_id,
                    executed
                );
            }
        }

        sqlx::query(
            r#"
            INSERT INTO execution_policies (
                id, experiment_id, execution_mode, executed_engine,
                shadow_engine, policy_version
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (experiment_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(experiment_id)
        .bind(decision.execution_mode)
        .bind(decision.executed_engine)
        .bind(decision.shadow_engine)
        .bind(&settings.policy_version)
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to insert execution policy")?;

        // A concurrent writer may have won the insert; the stored row is
        // authoritative either way.
        let stored = self
            .fetch(experiment_id)
            .await?
            .context("Execution policy missing after insert")?;

        info!(
            %experiment_id,
            mode = %stored.execution_mode,
            executed = ?stored.executed_engine,
            shadow = ?stored.shadow_engine,
            "execution policy recorded"
        );
        Ok(stored)
    }

    async fn fetch(&self, experiment_id: Uuid) -> Result<Option<ExecutionPolicy>> {
        sqlx::query_as::<_, ExecutionPolicy>(
            "SELECT * FROM execution_policies WHERE experiment_id = $1",
        )
        .bind(experiment_id)
        .fetch_optional(self.db_pool.as_ref())
        .await
        .context("Failed to fetch execution policy")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_with_both_available() {
        let decision = resolve_policy(ExecutionMode::EngineAPrimary, true, true);
        assert_eq!(decision.execution_mode, ExecutionMode::EngineAPrimary);
        assert_eq!(decision.executed_engine, Some(EngineId::EngineA));
        assert_eq!(decision.shadow_engine, Some(EngineId::EngineB));
    }

    #[test]
    fn test_primary_without_shadow_counterpart() {
        let decision = resolve_policy(ExecutionMode::EngineAPrimary, true, false);
        assert_eq!(decision.executed_engine, Some(EngineId::EngineA));
        assert_eq!(decision.shadow_engine, None);
    }

    #[test]
    fn test_unavailable_primary_degrades_to_shadow_only() {
        // Engine A down, B up, A primary: safety fallback, not an error
        let decision = resolve_policy(ExecutionMode::EngineAPrimary, false, true);
        assert_eq!(decision.execution_mode, ExecutionMode::ShadowOnly);
        assert_eq!(decision.executed_engine, None);

        let decision = resolve_policy(ExecutionMode::EngineBPrimary, true, false);
        assert_eq!(decision.execution_mode, ExecutionMode::ShadowOnly);
        assert_eq!(decision.executed_engine, None);
    }

    #[test]
    fn test_engine_b_primary_symmetric() {
        let decision = resolve_policy(ExecutionMode::EngineBPrimary, true, true);
        assert_eq!(decision.executed_engine, Some(EngineId::EngineB));
        assert_eq!(decision.shadow_engine, Some(EngineId::EngineA));
    }

    #[test]
    fn test_split_capital_records_single_preference() {
        let decision = resolve_policy(ExecutionMode::SplitCapital, true, true);
        assert_eq!(decision.execution_mode, ExecutionMode::SplitCapital);
        assert_eq!(decision.executed_engine, Some(EngineId::EngineA));
        assert_eq!(decision.shadow_engine, Some(EngineId::EngineB));
    }

    #[test]
    fn test_shadow_only_never_executes() {
        for (a, b) in [(true, true), (true, false), (false, true), (false, false)] {
            let decision = resolve_policy(ExecutionMode::ShadowOnly, a, b);
            assert_eq!(decision.executed_engine, None);
        }
    }

    #[test]
    fn test_mutual_exclusion_across_all_inputs() {
        let modes = [
            ExecutionMode::ShadowOnly,
            ExecutionMode::EngineAPrimary,
            ExecutionMode::EngineBPrimary,
            ExecutionMode::SplitCapital,
        ];
        for mode in modes {
            for a in [true, false] {
                for b in [true, false] {
                    let decision = resolve_policy(mode, a, b);
                    if let (Some(executed), Some(shadow)) =
                        (decision.executed_engine, decision.shadow_engine)
                    {
                        assert_ne!(executed, shadow, "mode {:?} a={} b={}", mode, a, b);
                    }
                }
            }
        }
    }
}
