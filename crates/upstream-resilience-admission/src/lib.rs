//! Tiered admission limiter for outbound calls to a rate-limited upstream.
//!
//! An [`AdmissionLimiter`] holds several quota tiers (for example 20 per
//! second, 100 per minute, 1000 per hour). A call may proceed only while it
//! holds one grant from *every* tier. Grants are always taken in the same
//! order, shortest window first, so two concurrent callers can never wait on
//! each other's partially acquired tiers.
//!
//! Throttling is pure backpressure: [`AdmissionLimiter::acquire`] waits until
//! capacity frees and never fails because of load.
//!
//! ## Returning grants
//!
//! A grant goes back to its tier exactly once, by whichever happens first:
//!
//! - **release**: the [`AdmissionPermit`] is dropped (or
//!   [`AdmissionPermit::release`] is called) when the protected call
//!   finishes, fails, panics or is cancelled;
//! - **reclaim**: a periodic task started with
//!   [`AdmissionLimiter::start_reclaimer`] returns grants older than their
//!   tier's window, restoring capacity held by calls that never finish.
//!
//! ## Quota feedback
//!
//! Upstreams usually report the remaining quota in response headers. Feeding
//! those numbers into [`AdmissionLimiter::observe_quota`] pauses admission
//! until the reported reset once the remaining quota reaches the configured
//! low-water mark.
//!
//! ## Example
//!
//! ```rust
//! use upstream_resilience_admission::AdmissionLimiter;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let limiter = AdmissionLimiter::builder()
//!     .name("upstream")
//!     .tier("short", 20, Duration::from_secs(1))
//!     .tier("medium", 100, Duration::from_secs(60))
//!     .tier("long", 1000, Duration::from_secs(3600))
//!     .build();
//! limiter.start_reclaimer();
//!
//! let permit = limiter.acquire().await.expect("limiter is running");
//! // ... issue the outbound call ...
//! permit.release();
//! # }
//! ```

mod config;
mod error;
mod events;
mod ledger;

pub use config::{AdmissionConfig, AdmissionLimiterBuilder, Tier};
pub use error::AdmissionError;
pub use events::AdmissionEvent;

use ledger::{GrantKey, Ledger};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

#[cfg(feature = "tracing")]
use tracing::{debug, info, warn};

/// Process-local, tiered admission gate.
///
/// Cloning is cheap and every clone shares the same tiers and ledger.
#[derive(Clone)]
pub struct AdmissionLimiter {
    shared: Arc<Shared>,
}

struct Shared {
    config: AdmissionConfig,
    /// Index-aligned with `config.tiers`.
    semaphores: Vec<Semaphore>,
    ledger: Mutex<Ledger>,
    next_permit: AtomicU64,
    paused_until: Mutex<Option<Instant>>,
    reclaimer: Mutex<Option<JoinHandle<()>>>,
}

/// Point-in-time view of one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSnapshot {
    /// Tier name.
    pub name: String,
    /// Configured capacity.
    pub capacity: usize,
    /// Configured window.
    pub window: Duration,
    /// Grants that can be handed out right now.
    pub available: usize,
    /// Grants recorded in the ledger and not yet released or reclaimed.
    pub outstanding: usize,
}

impl AdmissionLimiter {
    /// Returns a new builder.
    pub fn builder() -> AdmissionLimiterBuilder {
        AdmissionLimiterBuilder::new()
    }

    pub(crate) fn new(config: AdmissionConfig) -> Self {
        #[cfg(feature = "metrics")]
        {
            describe_counter!("admission_permits_total", "Permits granted across all tiers");
            describe_counter!("admission_reclaimed_total", "Aged grants returned by the reclaim scan");
            describe_gauge!("admission_outstanding_grants", "Grants currently outstanding per tier");
            describe_histogram!("admission_wait_seconds", "Time spent waiting for a permit");
        }

        let semaphores = config
            .tiers
            .iter()
            .map(|tier| Semaphore::new(tier.capacity))
            .collect();
        let ledger = Mutex::new(Ledger::new(config.tiers.len()));

        Self {
            shared: Arc::new(Shared {
                config,
                semaphores,
                ledger,
                next_permit: AtomicU64::new(0),
                paused_until: Mutex::new(None),
                reclaimer: Mutex::new(None),
            }),
        }
    }

    /// Returns the configuration this limiter was built with.
    pub fn config(&self) -> &AdmissionConfig {
        &self.shared.config
    }

    /// Waits until a grant is held from every tier.
    ///
    /// Tiers are acquired in window order. If the returned future is dropped
    /// part-way, the grants already taken are returned immediately.
    ///
    /// The permit must be dropped or released when the call finishes; a
    /// permit kept alive forever holds capacity until the reclaim scan
    /// (when enabled for that tier) takes it back.
    pub async fn acquire(&self) -> Result<AdmissionPermit, AdmissionError> {
        let start = Instant::now();
        self.wait_out_pause().await;

        let shared = &self.shared;
        let mut permit = AdmissionPermit {
            shared: Arc::clone(shared),
            id: shared.next_permit.fetch_add(1, Ordering::Relaxed),
            held: Vec::with_capacity(shared.semaphores.len()),
        };

        for (tier, semaphore) in shared.semaphores.iter().enumerate() {
            semaphore
                .acquire()
                .await
                .map_err(|_| AdmissionError::Closed)?
                .forget();
            shared.ledger.lock().record(
                GrantKey {
                    permit: permit.id,
                    tier,
                },
                Instant::now(),
            );
            permit.held.push(tier);
        }

        let wait = start.elapsed();

        #[cfg(feature = "tracing")]
        if !wait.is_zero() {
            debug!(limiter = %shared.config.name, ?wait, "admission granted after waiting");
        }

        #[cfg(feature = "metrics")]
        {
            counter!("admission_permits_total", "limiter" => shared.config.name.clone()).increment(1);
            histogram!("admission_wait_seconds", "limiter" => shared.config.name.clone())
                .record(wait.as_secs_f64());
        }
        shared.publish_outstanding();

        shared.config.event_listeners.emit(&AdmissionEvent::PermitGranted {
            limiter: shared.config.name.clone(),
            at: Instant::now(),
            wait,
        });

        Ok(permit)
    }

    /// Reports upstream quota telemetry.
    ///
    /// When `remaining` is at or below the low-water mark, admission pauses
    /// until `reset_after` from now. A later pause extends an earlier one;
    /// a shorter one never shortens it.
    pub fn observe_quota(&self, remaining: u64, reset_after: Duration) {
        let Some(low_water_mark) = self.shared.config.quota_low_water_mark else {
            return;
        };
        if remaining > low_water_mark {
            return;
        }

        let until = Instant::now() + reset_after;
        {
            let mut paused = self.shared.paused_until.lock();
            if paused.is_some_and(|current| current >= until) {
                return;
            }
            *paused = Some(until);
        }

        #[cfg(feature = "tracing")]
        warn!(
            limiter = %self.shared.config.name,
            remaining,
            ?reset_after,
            "upstream quota nearly exhausted, pausing admission"
        );

        self.shared.config.event_listeners.emit(&AdmissionEvent::AdmissionPaused {
            limiter: self.shared.config.name.clone(),
            at: Instant::now(),
            until,
        });
    }

    /// Instant until which admission is paused, if a pause is in effect.
    pub fn paused_until(&self) -> Option<Instant> {
        let paused = *self.shared.paused_until.lock();
        paused.filter(|until| *until > Instant::now())
    }

    async fn wait_out_pause(&self) {
        loop {
            let until = *self.shared.paused_until.lock();
            match until {
                Some(until) if until > Instant::now() => tokio::time::sleep_until(until).await,
                _ => return,
            }
        }
    }

    /// Runs one reclaim scan now and returns the number of grants returned.
    pub fn reclaim_now(&self) -> usize {
        self.shared.reclaim_expired()
    }

    /// Spawns the periodic reclaim task on the current Tokio runtime.
    ///
    /// Calling it again replaces the previous task. The task holds only a
    /// weak reference and ends by itself once every clone of the limiter is
    /// dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start_reclaimer(&self) {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let interval = self.shared.config.reclaim_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.reclaim_expired();
            }
        });

        if let Some(previous) = self.shared.reclaimer.lock().replace(task) {
            previous.abort();
        }
    }

    /// Stops the reclaim task and closes every tier.
    ///
    /// Pending and future `acquire` calls fail with [`AdmissionError::Closed`].
    /// Permits already held stay valid and may still be released.
    pub fn shutdown(&self) {
        if let Some(task) = self.shared.reclaimer.lock().take() {
            task.abort();
        }
        for semaphore in &self.shared.semaphores {
            semaphore.close();
        }

        #[cfg(feature = "tracing")]
        info!(limiter = %self.shared.config.name, "admission limiter shut down");
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shared.semaphores.iter().any(Semaphore::is_closed)
    }

    /// Per-tier capacity, availability and outstanding grants.
    pub fn snapshot(&self) -> Vec<TierSnapshot> {
        let ledger = self.shared.ledger.lock();
        self.shared
            .config
            .tiers
            .iter()
            .zip(&self.shared.semaphores)
            .enumerate()
            .map(|(index, (tier, semaphore))| TierSnapshot {
                name: tier.name.clone(),
                capacity: tier.capacity,
                window: tier.window,
                available: semaphore.available_permits(),
                outstanding: ledger.outstanding(index),
            })
            .collect()
    }
}

impl fmt::Debug for AdmissionLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionLimiter")
            .field("name", &self.shared.config.name)
            .field("tiers", &self.shared.config.tiers)
            .finish()
    }
}

impl Shared {
    fn reclaim_expired(&self) -> usize {
        let reclaimed = {
            let mut ledger = self.ledger.lock();
            let reclaimed = ledger.take_expired(&self.config.tiers, Instant::now());
            for (semaphore, count) in self.semaphores.iter().zip(&reclaimed) {
                if *count > 0 {
                    semaphore.add_permits(*count);
                }
            }
            reclaimed
        };

        let mut total = 0;
        for (tier, count) in self.config.tiers.iter().zip(reclaimed) {
            if count == 0 {
                continue;
            }
            total += count;

            #[cfg(feature = "tracing")]
            info!(limiter = %self.config.name, tier = %tier.name, count, "reclaimed aged grants");

            #[cfg(feature = "metrics")]
            counter!(
                "admission_reclaimed_total",
                "limiter" => self.config.name.clone(),
                "tier" => tier.name.clone()
            )
            .increment(count as u64);

            self.config.event_listeners.emit(&AdmissionEvent::GrantsReclaimed {
                limiter: self.config.name.clone(),
                at: Instant::now(),
                tier: tier.name.clone(),
                count,
            });
        }

        if total > 0 {
            self.publish_outstanding();
        }
        total
    }

    /// Returns the grants of one permit that are still in the ledger.
    fn settle(&self, permit: u64, held: &[usize]) -> usize {
        let mut returned = 0;
        {
            let mut ledger = self.ledger.lock();
            for &tier in held {
                if ledger.settle(GrantKey { permit, tier }) {
                    self.semaphores[tier].add_permits(1);
                    returned += 1;
                }
            }
        }
        self.publish_outstanding();
        returned
    }

    #[cfg(feature = "metrics")]
    fn publish_outstanding(&self) {
        let ledger = self.ledger.lock();
        for (index, tier) in self.config.tiers.iter().enumerate() {
            gauge!(
                "admission_outstanding_grants",
                "limiter" => self.config.name.clone(),
                "tier" => tier.name.clone()
            )
            .set(ledger.outstanding(index) as f64);
        }
    }

    #[cfg(not(feature = "metrics"))]
    fn publish_outstanding(&self) {}
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(task) = self.reclaimer.get_mut().take() {
            task.abort();
        }
    }
}

/// Scoped right to make one outbound call.
///
/// Dropping the permit releases it; there is no way to leak a grant short of
/// leaking the permit itself.
#[must_use = "dropping the permit releases the grants immediately"]
pub struct AdmissionPermit {
    shared: Arc<Shared>,
    id: u64,
    held: Vec<usize>,
}

impl AdmissionPermit {
    /// Returns the grants to every tier that has not reclaimed them yet.
    pub fn release(self) {
        drop(self);
    }

    /// Number of tiers this permit holds a grant from.
    pub fn tiers_held(&self) -> usize {
        self.held.len()
    }
}

impl fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("id", &self.id)
            .field("held", &self.held)
            .finish()
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let returned = self.shared.settle(self.id, &self.held);
        self.shared.config.event_listeners.emit(&AdmissionEvent::PermitReleased {
            limiter: self.shared.config.name.clone(),
            at: Instant::now(),
            returned,
        });
    }
}
