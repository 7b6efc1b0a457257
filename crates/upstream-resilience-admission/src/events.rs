use std::time::Duration;
use tokio::time::Instant;
use upstream_resilience_core::Event;

/// Events emitted by the admission limiter.
#[derive(Debug, Clone)]
pub enum AdmissionEvent {
    /// A caller holds a grant from every tier.
    PermitGranted {
        limiter: String,
        at: Instant,
        wait: Duration,
    },
    /// A permit was released and returned this many grants.
    ///
    /// Fewer grants than tiers are returned when some were reclaimed first.
    PermitReleased {
        limiter: String,
        at: Instant,
        returned: usize,
    },
    /// Aged grants were returned to a tier by the reclaim scan.
    GrantsReclaimed {
        limiter: String,
        at: Instant,
        tier: String,
        count: usize,
    },
    /// Upstream telemetry reported a depleted quota; admission waits.
    AdmissionPaused {
        limiter: String,
        at: Instant,
        until: Instant,
    },
}

impl Event for AdmissionEvent {
    fn kind(&self) -> &'static str {
        match self {
            AdmissionEvent::PermitGranted { .. } => "permit_granted",
            AdmissionEvent::PermitReleased { .. } => "permit_released",
            AdmissionEvent::GrantsReclaimed { .. } => "grants_reclaimed",
            AdmissionEvent::AdmissionPaused { .. } => "admission_paused",
        }
    }

    fn at(&self) -> Instant {
        match self {
            AdmissionEvent::PermitGranted { at, .. }
            | AdmissionEvent::PermitReleased { at, .. }
            | AdmissionEvent::GrantsReclaimed { at, .. }
            | AdmissionEvent::AdmissionPaused { at, .. } => *at,
        }
    }

    fn source(&self) -> &str {
        match self {
            AdmissionEvent::PermitGranted { limiter, .. }
            | AdmissionEvent::PermitReleased { limiter, .. }
            | AdmissionEvent::GrantsReclaimed { limiter, .. }
            | AdmissionEvent::AdmissionPaused { limiter, .. } => limiter,
        }
    }
}
