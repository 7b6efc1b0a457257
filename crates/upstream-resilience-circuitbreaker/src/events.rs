use crate::state::CircuitState;
use std::time::Duration;
use tokio::time::Instant;
use upstream_resilience_core::Event;

/// Events emitted by a [`CircuitBreaker`](crate::CircuitBreaker).
#[derive(Debug, Clone)]
pub enum CircuitBreakerEvent {
    /// The breaker moved along one of its transition edges.
    StateTransition {
        breaker: String,
        at: Instant,
        from_state: CircuitState,
        to_state: CircuitState,
    },
    /// A call was admitted. `state` is the state it was admitted in.
    CallPermitted {
        breaker: String,
        at: Instant,
        state: CircuitState,
    },
    /// A call was deflected without running.
    CallRejected {
        breaker: String,
        at: Instant,
        state: CircuitState,
    },
    SuccessRecorded {
        breaker: String,
        at: Instant,
        state: CircuitState,
    },
    FailureRecorded {
        breaker: String,
        at: Instant,
        state: CircuitState,
    },
    /// A call completed but took longer than the expected latency; it is
    /// recorded as a failure.
    SlowCallDetected {
        breaker: String,
        at: Instant,
        duration: Duration,
    },
    /// The Half-Open probe was dropped before completing; the probe slot is
    /// free again and no outcome was recorded.
    ProbeAbandoned { breaker: String, at: Instant },
}

impl Event for CircuitBreakerEvent {
    fn kind(&self) -> &'static str {
        match self {
            CircuitBreakerEvent::StateTransition { .. } => "state_transition",
            CircuitBreakerEvent::CallPermitted { .. } => "call_permitted",
            CircuitBreakerEvent::CallRejected { .. } => "call_rejected",
            CircuitBreakerEvent::SuccessRecorded { .. } => "success_recorded",
            CircuitBreakerEvent::FailureRecorded { .. } => "failure_recorded",
            CircuitBreakerEvent::SlowCallDetected { .. } => "slow_call_detected",
            CircuitBreakerEvent::ProbeAbandoned { .. } => "probe_abandoned",
        }
    }

    fn at(&self) -> Instant {
        match self {
            CircuitBreakerEvent::StateTransition { at, .. }
            | CircuitBreakerEvent::CallPermitted { at, .. }
            | CircuitBreakerEvent::CallRejected { at, .. }
            | CircuitBreakerEvent::SuccessRecorded { at, .. }
            | CircuitBreakerEvent::FailureRecorded { at, .. }
            | CircuitBreakerEvent::SlowCallDetected { at, .. }
            | CircuitBreakerEvent::ProbeAbandoned { at, .. } => *at,
        }
    }

    fn source(&self) -> &str {
        match self {
            CircuitBreakerEvent::StateTransition { breaker, .. }
            | CircuitBreakerEvent::CallPermitted { breaker, .. }
            | CircuitBreakerEvent::CallRejected { breaker, .. }
            | CircuitBreakerEvent::SuccessRecorded { breaker, .. }
            | CircuitBreakerEvent::FailureRecorded { breaker, .. }
            | CircuitBreakerEvent::SlowCallDetected { breaker, .. }
            | CircuitBreakerEvent::ProbeAbandoned { breaker, .. } => breaker,
        }
    }
}
