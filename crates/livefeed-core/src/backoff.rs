//! # Backoff Controller
//!
//! Pure delay computation for push reconnects plus the heartbeat cadence.
//!
//! ## Policy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Reconnect Delay Policy                            │
//! │                                                                         │
//! │  CONSTANT (default)                 EXPONENTIAL (opt-in)                │
//! │  ──────────────────                 ────────────────────                │
//! │  Attempt 1: 3s                      Attempt 1: base                     │
//! │  Attempt 2: 3s                      Attempt 2: base * 2                 │
//! │  Attempt 3: 3s                      Attempt 3: base * 4                 │
//! │  ...                                ... capped at `cap`                 │
//! │                                                                         │
//! │  No jitter: the same attempt number always yields the same delay.      │
//! │  Heartbeat interval is fixed and independent of the attempt count.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default delay between reconnect attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3_000);

/// Default upper bound for exponential delays.
pub const DEFAULT_RETRY_CAP: Duration = Duration::from_secs(60);

/// Default heartbeat interval on an open session.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Shortest period any recurring timer may use. Tokio intervals reject zero.
pub const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay for every attempt.
    #[default]
    Constant,
    /// Doubling delay, bounded by the cap.
    Exponential,
}

impl std::fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackoffStrategy::Constant => write!(f, "constant"),
            BackoffStrategy::Exponential => write!(f, "exponential"),
        }
    }
}

/// Reconnect delay and heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    strategy: BackoffStrategy,
    heartbeat_interval: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::constant(DEFAULT_RETRY_DELAY)
    }
}

impl Backoff {
    /// Constant delay of `base` for every attempt.
    pub fn constant(base: Duration) -> Self {
        Backoff {
            base,
            cap: base.max(DEFAULT_RETRY_CAP),
            strategy: BackoffStrategy::Constant,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    /// Doubling delay starting at `base`, never above `cap`.
    pub fn exponential(base: Duration, cap: Duration) -> Self {
        Backoff {
            base,
            cap,
            strategy: BackoffStrategy::Exponential,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    /// Builds from a strategy value (used by config loading).
    pub fn from_strategy(strategy: BackoffStrategy, base: Duration, cap: Duration) -> Self {
        match strategy {
            BackoffStrategy::Constant => Backoff::constant(base),
            BackoffStrategy::Exponential => Backoff::exponential(base, cap),
        }
    }

    /// Overrides the heartbeat interval, floored at [`MIN_TIMER_PERIOD`].
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(MIN_TIMER_PERIOD);
        self
    }

    /// Delay to wait before reconnect attempt number `attempt` (1-based).
    ///
    /// Attempt 0 is treated as attempt 1.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::Constant => self.base,
            BackoffStrategy::Exponential => {
                let shift = attempt.saturating_sub(1).min(31);
                self.base.saturating_mul(1u32 << shift).min(self.cap)
            }
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    pub fn strategy(&self) -> BackoffStrategy {
        self.strategy
    }
}
