use std::fmt;
use tokio::time::Instant;

/// The three states of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum CircuitState {
    /// Calls run normally.
    Closed = 0,
    /// Calls are deflected until the recovery timeout elapses.
    Open = 1,
    /// A single probe call tests whether the dependency has recovered.
    HalfOpen = 2,
}

impl CircuitState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Stable lowercase label, used for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one breaker's counters and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BreakerState {
    pub name: String,
    pub state: CircuitState,
    /// Failures since the last recorded success.
    pub consecutive_failures: u32,
    pub total_successes: u64,
    /// Every call presented to the breaker, admitted or deflected.
    pub total_requests: u64,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub last_failure_time: Option<Instant>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub last_state_change_time: Instant,
}
