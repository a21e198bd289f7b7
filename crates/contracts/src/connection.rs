//! Broker connection lifecycle and backoff policy

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use validator::Validate;

/// Broker session state
///
/// ```text
/// Disconnected -> Connecting -> Subscribed -> Receiving
///        any state --(transport failure)--> ErrorBackoff -> Connecting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Subscribed,
    Receiving,
    ErrorBackoff,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Receiving => "receiving",
            Self::ErrorBackoff => "error_backoff",
        }
    }

    /// Numeric encoding for the state gauge
    pub fn as_gauge(&self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Subscribed => 2.0,
            Self::Receiving => 3.0,
            Self::ErrorBackoff => 4.0,
        }
    }

    /// Whether the subscription is live
    pub fn is_subscribed(&self) -> bool {
        matches!(self, Self::Subscribed | Self::Receiving)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exponential backoff policy
///
/// Attempt `n` (1-based) waits `initial_delay_ms * multiplier^(n-1)`,
/// capped at `max_delay_ms`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BackoffConfig {
    /// First retry delay
    #[validate(range(min = 1))]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay
    #[validate(range(min = 1))]
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays
    #[validate(range(min = 1.0, max = 10.0))]
    pub multiplier: f64,

    /// Total attempts including the first one (None = unlimited)
    #[serde(default)]
    #[validate(range(min = 1))]
    pub max_attempts: Option<u32>,
}

impl BackoffConfig {
    pub fn new(initial_delay_ms: u64, max_delay_ms: u64, max_attempts: Option<u32>) -> Self {
        Self {
            initial_delay_ms,
            max_delay_ms,
            multiplier: 2.0,
            max_attempts,
        }
    }

    /// Delay to wait after the given failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let raw = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Whether another attempt is allowed after `attempts_made` failures
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts_made < max)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new(200, 5_000, Some(5))
    }
}
