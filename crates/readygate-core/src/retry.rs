//! Retry policy for the readiness loop: fixed interval, optional bounds.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{GateError, Result};

/// Default pause between probe attempts.
pub const DEFAULT_INTERVAL_MS: u64 = 1_000;

/// Default bound on a single probe attempt.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;

/// How the gate retries a failing readiness probe.
///
/// The default policy retries forever at a fixed interval. Set
/// `max_attempts` or `timeout_ms` to bound it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between attempts (milliseconds). Never zero.
    pub interval_ms: u64,
    /// Maximum number of probe attempts (`None` = unbounded).
    pub max_attempts: Option<u32>,
    /// Overall deadline for readiness (milliseconds, `None` = no deadline).
    pub timeout_ms: Option<u64>,
    /// Bound on a single probe attempt (milliseconds).
    pub probe_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            max_attempts: None,
            timeout_ms: None,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
        }
    }
}

/// What the loop does after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the interval, then probe again.
    Retry(Duration),
    /// `max_attempts` reached.
    Exhausted,
    /// Sleeping again would overrun the deadline.
    DeadlineExceeded,
}

impl RetryPolicy {
    /// Unbounded policy with the given interval.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            ..Self::default()
        }
    }

    /// Bound the number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Bound the total wait.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Bound each probe attempt.
    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout_ms = probe_timeout.as_millis() as u64;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Whether the policy can give up at all.
    pub fn is_bounded(&self) -> bool {
        self.max_attempts.is_some() || self.timeout_ms.is_some()
    }

    /// Reject policies that would busy-loop or can never succeed.
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(GateError::InvalidConfig(
                "poll interval must be greater than zero".into(),
            ));
        }
        if self.probe_timeout_ms == 0 {
            return Err(GateError::InvalidConfig(
                "probe timeout must be greater than zero".into(),
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(GateError::InvalidConfig(
                "max attempts must be at least 1".into(),
            ));
        }
        if self.timeout_ms == Some(0) {
            return Err(GateError::InvalidConfig(
                "readiness timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Decide what follows failed attempt number `attempts` (1-based),
    /// `elapsed` after the loop started.
    pub fn after_failure(&self, attempts: u32, elapsed: Duration) -> RetryDecision {
        if let Some(max) = self.max_attempts {
            if attempts >= max {
                return RetryDecision::Exhausted;
            }
        }
        let interval = self.interval();
        if let Some(deadline) = self.timeout() {
            if elapsed + interval > deadline {
                return RetryDecision::DeadlineExceeded;
            }
        }
        RetryDecision::Retry(interval)
    }
}
