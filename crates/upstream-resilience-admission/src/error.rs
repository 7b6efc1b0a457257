use thiserror::Error;

/// Errors returned by [`AdmissionLimiter::acquire`](crate::AdmissionLimiter::acquire).
///
/// Throttling is never an error; callers simply wait. The only failure is a
/// limiter that has been shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// [`shutdown`](crate::AdmissionLimiter::shutdown) was called.
    #[error("admission limiter is shut down")]
    Closed,
}
