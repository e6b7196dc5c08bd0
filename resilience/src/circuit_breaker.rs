// Circuit breaker for failing external providers.
// Opens after a run of consecutive failures, half-opens after a cooldown,
// and closes again on a successful probe.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{info, warn};

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds to stay open before allowing a probe
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: i64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> i64 {
    60
}

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
}

/// Three-state circuit breaker shared across worker tasks
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a request may proceed. While open, the first call after the
    /// cooldown transitions to half-open and is allowed as a probe.
    pub fn allow_request(&self) -> bool {
        self.allow_request_at(Utc::now())
    }

    fn allow_request_at(&self, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let cooldown = Duration::seconds(self.config.cooldown_secs);
                let elapsed = inner
                    .opened_at
                    .map(|t| now - t >= cooldown)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    info!(breaker = %self.name, "circuit breaker half-open, allowing probe");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state == BreakerState::HalfOpen {
            info!(breaker = %self.name, "circuit breaker closed after successful probe");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Utc::now())
    }

    fn record_failure_at(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                warn!(breaker = %self.name, "probe failed, circuit breaker re-opened");
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "failure threshold reached, circuit breaker opened"
                    );
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_secs: i64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown_secs,
            },
        )
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = breaker(3, 60);
        assert_eq!(cb.state(), BreakerState::Closed);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_success_resets_failure_run() {
        let cb = breaker(3, 60);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_after_cooldown_then_close() {
        let cb = breaker(1, 60);
        let t0 = Utc::now();
        cb.record_failure_at(t0);
        assert!(!cb.allow_request_at(t0 + Duration::seconds(30)));

        // Cooldown elapsed: one probe allowed
        assert!(cb.allow_request_at(t0 + Duration::seconds(61)));
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_probe_failure_reopens() {
        let cb = breaker(1, 60);
        let t0 = Utc::now();
        cb.record_failure_at(t0);
        assert!(cb.allow_request_at(t0 + Duration::seconds(61)));

        cb.record_failure_at(t0 + Duration::seconds(62));
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.allow_request_at(t0 + Duration::seconds(63)));
    }
}
