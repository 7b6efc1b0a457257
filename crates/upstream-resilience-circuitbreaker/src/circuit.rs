//! The breaker state machine.
//!
//! Transitions follow exactly four edges:
//!
//! ```text
//! Closed --threshold reached--> Open --recovery elapsed, next call--> HalfOpen
//! HalfOpen --probe succeeded--> Closed
//! HalfOpen --probe failed-----> Open
//! ```
//!
//! Every admitted call carries the generation it was admitted under. The
//! generation advances on each transition, so an outcome arriving after a
//! transition is stale: it still counts towards the totals but cannot move
//! the breaker.

use crate::config::CircuitBreakerConfig;
use crate::events::CircuitBreakerEvent;
use crate::state::{BreakerState, CircuitState};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// What [`Circuit::try_acquire`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Permitted { generation: u64, probe: bool },
    Rejected,
}

pub(crate) struct Circuit {
    state: CircuitState,
    state_mirror: Arc<AtomicU8>,
    generation: u64,
    probe_in_flight: bool,
    consecutive_failures: u32,
    total_successes: u64,
    total_requests: u64,
    last_failure_at: Option<Instant>,
    last_state_change_at: Instant,
}

impl Circuit {
    pub(crate) fn new(state_mirror: Arc<AtomicU8>) -> Self {
        state_mirror.store(CircuitState::Closed as u8, Ordering::Release);
        Self {
            state: CircuitState::Closed,
            state_mirror,
            generation: 0,
            probe_in_flight: false,
            consecutive_failures: 0,
            total_successes: 0,
            total_requests: 0,
            last_failure_at: None,
            last_state_change_at: Instant::now(),
        }
    }

    pub(crate) fn state(&self) -> CircuitState {
        self.state
    }

    /// Decides whether a call may run. An Open breaker whose recovery
    /// timeout has elapsed moves to Half-Open first.
    pub(crate) fn try_acquire(
        &mut self,
        config: &CircuitBreakerConfig,
        now: Instant,
        events: &mut Vec<CircuitBreakerEvent>,
    ) -> Admission {
        self.total_requests += 1;

        if self.state == CircuitState::Open
            && now.saturating_duration_since(self.last_state_change_at) >= config.recovery_timeout
        {
            self.transition_to(CircuitState::HalfOpen, config, now, events);
        }

        let admission = match self.state {
            CircuitState::Closed => Admission::Permitted {
                generation: self.generation,
                probe: false,
            },
            CircuitState::HalfOpen if !self.probe_in_flight => {
                self.probe_in_flight = true;
                Admission::Permitted {
                    generation: self.generation,
                    probe: true,
                }
            }
            CircuitState::HalfOpen | CircuitState::Open => Admission::Rejected,
        };

        match admission {
            Admission::Permitted { .. } => events.push(CircuitBreakerEvent::CallPermitted {
                breaker: config.name.clone(),
                at: now,
                state: self.state,
            }),
            Admission::Rejected => {
                #[cfg(feature = "metrics")]
                counter!("circuitbreaker_rejected_total", "circuitbreaker" => config.name.clone()).increment(1);

                events.push(CircuitBreakerEvent::CallRejected {
                    breaker: config.name.clone(),
                    at: now,
                    state: self.state,
                });
            }
        }
        admission
    }

    /// Records the outcome of a call admitted under `generation`.
    pub(crate) fn record(
        &mut self,
        config: &CircuitBreakerConfig,
        generation: u64,
        failed: bool,
        duration: Duration,
        now: Instant,
        events: &mut Vec<CircuitBreakerEvent>,
    ) {
        let slow = config
            .expected_latency
            .is_some_and(|expected| duration > expected);
        if slow {
            events.push(CircuitBreakerEvent::SlowCallDetected {
                breaker: config.name.clone(),
                at: now,
                duration,
            });

            #[cfg(feature = "metrics")]
            counter!("circuitbreaker_slow_calls_total", "circuitbreaker" => config.name.clone()).increment(1);
        }

        let current = generation == self.generation;
        if current && self.state == CircuitState::HalfOpen {
            self.probe_in_flight = false;
        }

        if failed || slow {
            self.record_failure(config, current, now, events);
        } else {
            self.record_success(config, current, now, events);
        }
    }

    fn record_success(
        &mut self,
        config: &CircuitBreakerConfig,
        current: bool,
        now: Instant,
        events: &mut Vec<CircuitBreakerEvent>,
    ) {
        self.total_successes += 1;

        #[cfg(feature = "metrics")]
        counter!("circuitbreaker_calls_total", "circuitbreaker" => config.name.clone(), "outcome" => "success")
            .increment(1);

        events.push(CircuitBreakerEvent::SuccessRecorded {
            breaker: config.name.clone(),
            at: now,
            state: self.state,
        });

        if !current {
            return;
        }
        self.consecutive_failures = 0;
        if self.state == CircuitState::HalfOpen {
            self.transition_to(CircuitState::Closed, config, now, events);
        }
    }

    fn record_failure(
        &mut self,
        config: &CircuitBreakerConfig,
        current: bool,
        now: Instant,
        events: &mut Vec<CircuitBreakerEvent>,
    ) {
        #[cfg(feature = "metrics")]
        counter!("circuitbreaker_calls_total", "circuitbreaker" => config.name.clone(), "outcome" => "failure")
            .increment(1);

        events.push(CircuitBreakerEvent::FailureRecorded {
            breaker: config.name.clone(),
            at: now,
            state: self.state,
        });

        if !current {
            return;
        }
        let previous_failure = self.last_failure_at.replace(now);

        let outside_window = match (config.monitor_window, previous_failure) {
            (Some(window), Some(previous)) => now.saturating_duration_since(previous) > window,
            _ => false,
        };
        if outside_window && self.state == CircuitState::Closed {
            self.consecutive_failures = 1;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }

        match self.state {
            CircuitState::Closed if self.consecutive_failures >= config.failure_threshold => {
                self.transition_to(CircuitState::Open, config, now, events);
            }
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Open, config, now, events);
            }
            _ => {}
        }
    }

    /// Frees the probe slot of a Half-Open probe that ended without an
    /// outcome. Returns true if the slot was freed.
    pub(crate) fn abandon_probe(&mut self, generation: u64) -> bool {
        if generation == self.generation && self.state == CircuitState::HalfOpen && self.probe_in_flight {
            self.probe_in_flight = false;
            true
        } else {
            false
        }
    }

    pub(crate) fn snapshot(&self, name: &str) -> BreakerState {
        BreakerState {
            name: name.to_string(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            total_successes: self.total_successes,
            total_requests: self.total_requests,
            last_failure_time: self.last_failure_at,
            last_state_change_time: self.last_state_change_at,
        }
    }

    fn transition_to(
        &mut self,
        to_state: CircuitState,
        config: &CircuitBreakerConfig,
        now: Instant,
        events: &mut Vec<CircuitBreakerEvent>,
    ) {
        let from_state = self.state;
        debug_assert!(
            matches!(
                (from_state, to_state),
                (CircuitState::Closed, CircuitState::Open)
                    | (CircuitState::Open, CircuitState::HalfOpen)
                    | (CircuitState::HalfOpen, CircuitState::Closed)
                    | (CircuitState::HalfOpen, CircuitState::Open)
            ),
            "illegal transition {from_state} -> {to_state}"
        );

        self.state = to_state;
        self.state_mirror.store(to_state as u8, Ordering::Release);
        self.generation += 1;
        self.probe_in_flight = false;
        self.last_state_change_at = now;

        #[cfg(feature = "tracing")]
        tracing::info!(
            breaker = %config.name,
            from = %from_state,
            to = %to_state,
            consecutive_failures = self.consecutive_failures,
            "circuit state transition"
        );

        #[cfg(feature = "metrics")]
        {
            counter!(
                "circuitbreaker_transitions_total",
                "circuitbreaker" => config.name.clone(),
                "from" => from_state.as_str(),
                "to" => to_state.as_str()
            )
            .increment(1);
            gauge!("circuitbreaker_state", "circuitbreaker" => config.name.clone()).set(to_state as u8 as f64);
        }

        events.push(CircuitBreakerEvent::StateTransition {
            breaker: config.name.clone(),
            at: now,
            from_state,
            to_state,
        });
    }
}
