use thiserror::Error;

/// Errors returned by a guarded call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CircuitBreakerError<E> {
    /// The breaker is open (or Half-Open with its probe already in flight);
    /// the call did not run.
    #[error("circuit breaker '{name}' is open; call not permitted")]
    Open { name: String },

    /// The guarded operation ran and failed.
    #[error("inner operation error: {0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    /// Returns true if the call was deflected by an open breaker.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }

    /// Returns the inner error if the operation ran and failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::Inner(e) => Some(e),
            CircuitBreakerError::Open { .. } => None,
        }
    }
}

impl<E> From<E> for CircuitBreakerError<E> {
    fn from(err: E) -> Self {
        CircuitBreakerError::Inner(err)
    }
}
