use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::experiment::EngineId;
use super::signal::SignalDirection;

/// Per-engine output of one evaluation. Not persisted by the core; the
/// live-order path and the shadow executor each persist their own shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecommendation {
    pub engine: EngineId,
    pub experiment_id: Uuid,
    pub symbol: String,
    pub direction: SignalDirection,
    pub strike: Decimal,
    pub expiration: NaiveDate,
    pub quantity: i32,
    pub entry_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub target_price: Option<Decimal>,
    pub is_shadow: bool,
}

/// Tagged result of one engine evaluation. A decline is a normal outcome,
/// not a failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineDecision {
    Decline,
    Recommend(TradeRecommendation),
}

impl EngineDecision {
    pub fn recommendation(&self) -> Option<&TradeRecommendation> {
        match self {
            EngineDecision::Decline => None,
            EngineDecision::Recommend(rec) => Some(rec),
        }
    }
}

/// Lifecycle state of a shadow position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
}

/// Why a trade (live or shadow) was exited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ExitReason {
    TargetHit,
    StopLoss,
    Expired,
    Manual,
    /// Shadow exit mirrored from the live path for the same experiment
    LiveSync,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TargetHit => "target_hit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Expired => "expired",
            ExitReason::Manual => "manual",
            ExitReason::LiveSync => "live_sync",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Simulated counterpart of a live order, created only for the shadow
/// engine of an experiment. Never results in a live order.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ShadowTrade {
    pub id: Uuid,
    pub experiment_id: Uuid,
    pub engine: EngineId,
    pub symbol: String,
    pub direction: SignalDirection,
    pub strike: f64,
    pub expiration: NaiveDate,
    pub quantity: i32,
    /// Entry price from the same real-time feed as live orders
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
}

/// Open simulated position tracked by the shadow executor
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ShadowPosition {
    pub id: Uuid,
    pub shadow_trade_id: Uuid,
    pub experiment_id: Uuid,
    pub engine: EngineId,
    pub symbol: String,
    pub direction: SignalDirection,
    pub quantity: i32,
    pub entry_price: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub stop_loss: Option<f64>,
    pub target_price: Option<f64>,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Terminal record of one closed trade, live or shadow. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TradeOutcome {
    pub id: Uuid,
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
    pub created_at: DateTime<Utc>,
}

/// Per-engine aggregates, always derived fresh from trade outcomes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub engine: EngineId,
    pub total_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub average_pnl: f64,
    pub max_win: f64,
    pub max_loss: f64,
}
