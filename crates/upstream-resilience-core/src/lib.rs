//! Core infrastructure for upstream-resilience.
//!
//! Shared by every crate in the workspace:
//! - the event system used for observability hooks
//! - [`Unavailable`], the explicit "no data right now" signal returned at the
//!   upstream client boundary

pub mod events;
pub mod unavailable;

pub use events::{BoxedEventListener, Event, EventListener, EventListeners, FnListener};
#[cfg(feature = "tracing")]
pub use events::TracingListener;
pub use unavailable::{Unavailable, UnavailableKind};
