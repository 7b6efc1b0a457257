//! The explicit "no data right now" signal.
//!
//! Every per-call fault at the upstream client boundary is recovered into an
//! [`Unavailable`] value instead of escaping as a panic or an opaque error.
//! Callers that only care about presence use `.ok()`; callers that need to
//! tell a known-unhealthy dependency apart from an ordinary empty result
//! match on the variant or call [`Unavailable::is_circuit_open`].

use std::fmt;
use thiserror::Error;

/// Why a call produced no payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Unavailable {
    /// The request could not be sent or the response could not be read.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The upstream answered with a status other than 200.
    #[error("upstream returned status {0}")]
    Status(u16),

    /// The upstream answered 304 and no stored snapshot exists.
    #[error("upstream reported not modified and no snapshot is stored")]
    NotModified,

    /// The body could not be decoded into the requested payload type.
    #[error("payload could not be decoded: {0}")]
    Decode(String),

    /// The call did not complete within its deadline.
    #[error("call exceeded its deadline")]
    DeadlineExceeded,

    /// The endpoint could not be joined onto the upstream base URL.
    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),

    /// The guarding circuit breaker is open; the call was never issued.
    #[error("circuit breaker {name:?} is open")]
    CircuitOpen {
        /// Name of the breaker that rejected the call.
        name: String,
    },

    /// The admission limiter has been shut down.
    #[error("admission limiter is shut down")]
    ShuttingDown,
}

/// Field-less discriminant of [`Unavailable`], suitable for metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnavailableKind {
    /// See [`Unavailable::Transport`].
    Transport,
    /// See [`Unavailable::Status`].
    Status,
    /// See [`Unavailable::NotModified`].
    NotModified,
    /// See [`Unavailable::Decode`].
    Decode,
    /// See [`Unavailable::DeadlineExceeded`].
    DeadlineExceeded,
    /// See [`Unavailable::InvalidEndpoint`].
    InvalidEndpoint,
    /// See [`Unavailable::CircuitOpen`].
    CircuitOpen,
    /// See [`Unavailable::ShuttingDown`].
    ShuttingDown,
}

impl UnavailableKind {
    /// Stable lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            UnavailableKind::Transport => "transport",
            UnavailableKind::Status => "status",
            UnavailableKind::NotModified => "not_modified",
            UnavailableKind::Decode => "decode",
            UnavailableKind::DeadlineExceeded => "deadline_exceeded",
            UnavailableKind::InvalidEndpoint => "invalid_endpoint",
            UnavailableKind::CircuitOpen => "circuit_open",
            UnavailableKind::ShuttingDown => "shutting_down",
        }
    }
}

impl fmt::Display for UnavailableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Unavailable {
    /// Returns the field-less kind.
    pub fn kind(&self) -> UnavailableKind {
        match self {
            Unavailable::Transport(_) => UnavailableKind::Transport,
            Unavailable::Status(_) => UnavailableKind::Status,
            Unavailable::NotModified => UnavailableKind::NotModified,
            Unavailable::Decode(_) => UnavailableKind::Decode,
            Unavailable::DeadlineExceeded => UnavailableKind::DeadlineExceeded,
            Unavailable::InvalidEndpoint(_) => UnavailableKind::InvalidEndpoint,
            Unavailable::CircuitOpen { .. } => UnavailableKind::CircuitOpen,
            Unavailable::ShuttingDown => UnavailableKind::ShuttingDown,
        }
    }

    /// True when a circuit breaker deflected the call.
    ///
    /// The presentation tier shows a degraded/retry state for these and an
    /// ordinary empty state for everything else.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Unavailable::CircuitOpen { .. })
    }

    /// True when the fault says something about the dependency's health.
    ///
    /// Transport faults, deadlines and 5xx/429 statuses count; client-side
    /// statuses (404, 403, ...), decode failures and breaker rejections do
    /// not. Breakers guarding the upstream use this as their failure
    /// predicate.
    pub fn indicates_unhealthy_dependency(&self) -> bool {
        match self {
            Unavailable::Transport(_) | Unavailable::DeadlineExceeded => true,
            Unavailable::Status(code) => *code >= 500 || *code == 429,
            _ => false,
        }
    }
}
