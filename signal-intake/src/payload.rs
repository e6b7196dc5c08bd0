// Webhook payload validation.
// Malformed payloads are input errors: rejected synchronously, never
// entering the pipeline.

use chrono::{DateTime, Utc};
use common::SignalDirection;
use serde::Deserialize;

/// Raw webhook body. `action` and `direction` are accepted interchangeably.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalPayload {
    pub symbol: String,
    #[serde(alias = "direction")]
    pub action: String,
    pub timeframe: String,
    pub timestamp: DateTime<Utc>,
}

/// Why a payload was rejected before dedup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    EmptySymbol,
    UnknownAction(String),
    EmptyTimeframe,
}

impl std::fmt::Display for PayloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadError::EmptySymbol => write!(f, "symbol must be non-empty"),
            PayloadError::UnknownAction(action) => {
                write!(f, "unknown action '{}'", action)
            }
            PayloadError::EmptyTimeframe => write!(f, "timeframe must be non-empty"),
        }
    }
}

impl std::error::Error for PayloadError {}

impl SignalPayload {
    /// Validate and normalize into the fields a Signal row is built from.
    pub fn validate(&self) -> Result<ValidatedSignal, PayloadError> {
        let symbol = self.symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(PayloadError::EmptySymbol);
        }

        let direction = SignalDirection::from_action(&self.action)
            .ok_or_else(|| PayloadError::UnknownAction(self.action.clone()))?;

        let timeframe = self.timeframe.trim().to_string();
        if timeframe.is_empty() {
            return Err(PayloadError::EmptyTimeframe);
        }

        Ok(ValidatedSignal {
            symbol,
            direction,
            timeframe,
            event_time: self.timestamp,
        })
    }
}

/// Normalized signal fields, ready for fingerprinting and insertion
#[derive(Debug, Clone)]
pub struct ValidatedSignal {
    pub symbol: String,
    pub direction: SignalDirection,
    pub timeframe: String,
    pub event_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_alias_accepted() {
        let body = r#"{"symbol":"spy","direction":"sell","timeframe":"5m","timestamp":"2026-03-02T14:30:00Z"}"#;
        let payload: SignalPayload = serde_json::from_str(body).unwrap();
        let validated = payload.validate().unwrap();
        assert_eq!(validated.symbol, "SPY");
        assert_eq!(validated.direction, SignalDirection::Short);
    }

    #[test]
    fn test_unknown_action_rejected() {
        let payload = SignalPayload {
            symbol: "SPY".to_string(),
            action: "hold".to_string(),
            timeframe: "5m".to_string(),
            timestamp: Utc::now(),
        };
        assert!(matches!(
            payload.validate(),
            Err(PayloadError::UnknownAction(_))
        ));
    }

    #[test]
    fn test_empty_symbol_rejected() {
        let payload = SignalPayload {
            symbol: "  ".to_string(),
            action: "buy".to_string(),
            timeframe: "5m".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(payload.validate().unwrap_err(), PayloadError::EmptySymbol);
    }
}
