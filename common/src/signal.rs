use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of an inbound trading signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum SignalDirection {
    Long,
    Short,
}

impl SignalDirection {
    /// Normalize common webhook vocabulary ("buy"/"sell" as well as
    /// "long"/"short") into a direction.
    pub fn from_action(action: &str) -> Option<Self> {
        match action.to_ascii_lowercase().as_str() {
            "long" | "buy" => Some(SignalDirection::Long),
            "short" | "sell" => Some(SignalDirection::Short),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalDirection::Long => "long",
            SignalDirection::Short => "short",
        }
    }
}

impl std::fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum SignalStatus {
    Pending,
    Approved,
    Rejected,
}

/// Machine-readable reason a signal was terminally rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum RejectionReason {
    MarketClosed,
    RiskLimitExceeded,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::MarketClosed => "market_closed",
            RejectionReason::RiskLimitExceeded => "risk_limit_exceeded",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound trading instruction, as stored in the `signals` table.
///
/// Created by the webhook intake after dedup; mutated only by the signal
/// processor (lock acquisition, enrichment, status transitions).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Signal {
    pub id: Uuid,
    pub symbol: String,
    pub direction: SignalDirection,
    pub timeframe: String,
    pub event_time: DateTime<Utc>,
    /// Content fingerprint used by the dedup gate
    pub signal_hash: String,
    pub status: SignalStatus,
    pub rejection_reason: Option<RejectionReason>,
    pub processed: bool,
    /// Exclusive claim flag; the sole cross-instance mutex for processing
    pub processing_lock: bool,
    pub locked_at: Option<DateTime<Utc>>,
    /// Market-closed deferral: not due before this time
    pub queued_until: Option<DateTime<Utc>>,
    /// Transient-failure backoff: not due before this time
    pub next_retry_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_normalization() {
        assert_eq!(
            SignalDirection::from_action("BUY"),
            Some(SignalDirection::Long)
        );
        assert_eq!(
            SignalDirection::from_action("long"),
            Some(SignalDirection::Long)
        );
        assert_eq!(
            SignalDirection::from_action("Sell"),
            Some(SignalDirection::Short)
        );
        assert_eq!(SignalDirection::from_action("hold"), None);
    }
}
