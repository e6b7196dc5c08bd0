use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which decision engine a signal is routed to for an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum Variant {
    A,
    B,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::A => "A",
            Variant::B => "B",
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a decision engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum EngineId {
    EngineA,
    EngineB,
}

impl EngineId {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineId::EngineA => "engine_a",
            EngineId::EngineB => "engine_b",
        }
    }

    /// The other engine
    pub fn counterpart(&self) -> EngineId {
        match self {
            EngineId::EngineA => EngineId::EngineB,
            EngineId::EngineB => EngineId::EngineA,
        }
    }
}

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Governance mode controlling which engine may execute live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ExecutionMode {
    ShadowOnly,
    EngineAPrimary,
    EngineBPrimary,
    SplitCapital,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::ShadowOnly => "SHADOW_ONLY",
            ExecutionMode::EngineAPrimary => "ENGINE_A_PRIMARY",
            ExecutionMode::EngineBPrimary => "ENGINE_B_PRIMARY",
            ExecutionMode::SplitCapital => "SPLIT_CAPITAL",
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SHADOW_ONLY" => Ok(ExecutionMode::ShadowOnly),
            "ENGINE_A_PRIMARY" => Ok(ExecutionMode::EngineAPrimary),
            "ENGINE_B_PRIMARY" => Ok(ExecutionMode::EngineBPrimary),
            "SPLIT_CAPITAL" => Ok(ExecutionMode::SplitCapital),
            other => Err(anyhow::anyhow!("unknown execution mode: {}", other)),
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One routing decision binding a signal to a variant. Immutable after
/// creation; at most one per signal.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Experiment {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub variant: Variant,
    /// Deterministic function of (symbol, timeframe, session); recomputing
    /// it must reproduce the stored value
    pub assignment_hash: String,
    pub assignment_reason: String,
    /// Split percentage in effect at assignment time
    pub split_percentage: i16,
    pub policy_version: String,
    pub created_at: DateTime<Utc>,
}

/// One governance decision per experiment. Immutable once written; when both
/// engines are set they must differ.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExecutionPolicy {
    pub id: Uuid,
    pub experiment_id: Uuid,
    pub execution_mode: ExecutionMode,
    /// Engine permitted to place a live order, if any
    pub executed_engine: Option<EngineId>,
    pub shadow_engine: Option<EngineId>,
    pub policy_version: String,
    pub created_at: DateTime<Utc>,
}

impl ExecutionPolicy {
    /// Whether the given engine runs in shadow under this policy. In
    /// SHADOW_ONLY mode every engine is shadow.
    pub fn is_shadow(&self, engine: EngineId) -> bool {
        self.execution_mode == ExecutionMode::ShadowOnly || self.shadow_engine == Some(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trip() {
        for mode in [
            ExecutionMode::ShadowOnly,
            ExecutionMode::EngineAPrimary,
            ExecutionMode::EngineBPrimary,
            ExecutionMode::SplitCapital,
        ] {
            let parsed: ExecutionMode = mode.as_str().parse().unwrap();
            assert_eq!(parsed, mode);
        }
    }

    #[test]
    fn test_shadow_only_shadows_everything() {
        let policy = ExecutionPolicy {
            id: Uuid::new_v4(),
            experiment_id: Uuid::new_v4(),
            execution_mode: ExecutionMode::ShadowOnly,
            executed_engine: None,
            shadow_engine: None,
            policy_version: "v1".to_string(),
            created_at: Utc::now(),
        };
        assert!(policy.is_shadow(EngineId::EngineA));
        assert!(policy.is_shadow(EngineId::EngineB));
    }
}
