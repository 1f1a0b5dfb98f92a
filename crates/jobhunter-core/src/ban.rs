//! Streak-based soft-ban detection with a global cooldown pause.
//!
//! # Slot States
//!
//! ```text
//! ACTIVE --[streak >= threshold, no pause in flight]--> PAUSED --[cooldown timer]--> ACTIVE
//! ```
//!
//! Only 403 and 429 extend a slot's streak; any other status resets it.
//! Entering `PAUSED` suspends the whole dispatch engine through its
//! [`DispatchController`]. At most one pause is in flight for the entire
//! crawl, and the resume timer fires exactly once per pause.
//!
//! Without a controller (or when `suspend()` fails) the detector runs
//! degraded: the ban is still counted and the paused gauge is set then
//! cleared, but only the offending slot is put in cooldown, visible through
//! [`BanDetector::cooldown_remaining`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::BanConfig;
use crate::metrics::{self, MetricsSink};
use crate::slots::SlotRegistry;
use crate::traits::DispatchController;

/// Statuses that count toward a slot's failure streak.
pub const BAD_STATUSES: [u16; 2] = [403, 429];

/// What a single status observation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanObservation {
    /// Streak after the observation (0 when it was reset).
    Streak(u32),
    /// This observation put the crawl (or the slot, when degraded) on cooldown.
    PauseStarted,
}

struct ActivePause {
    epoch: u64,
    slot: String,
    cancel: CancellationToken,
}

#[derive(Default)]
struct BanInner {
    active: Option<ActivePause>,
    epoch: u64,
    /// Set while `resume()` runs; the pause stays active until it returns.
    resuming: bool,
}

#[derive(Clone)]
pub struct BanDetector {
    config: BanConfig,
    slots: SlotRegistry,
    controller: Option<Arc<dyn DispatchController>>,
    metrics: Arc<dyn MetricsSink>,
    inner: Arc<Mutex<BanInner>>,
}

impl BanDetector {
    pub fn new(
        config: BanConfig,
        slots: SlotRegistry,
        controller: Option<Arc<dyn DispatchController>>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        if controller.is_none() {
            tracing::warn!(
                "No dispatch controller: bans will only cool down the offending slot"
            );
        }
        Self {
            config,
            slots,
            controller,
            metrics,
            inner: Arc::new(Mutex::new(BanInner::default())),
        }
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> MutexGuard<'_, BanInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned ban detector mutex");
            poisoned.into_inner()
        })
    }

    pub fn is_bad_status(status: u16) -> bool {
        BAD_STATUSES.contains(&status)
    }

    /// True while a global pause is in flight.
    pub fn is_paused(&self) -> bool {
        self.lock_inner().active.is_some()
    }

    /// Slot whose streak triggered the pause currently in flight.
    pub fn paused_slot(&self) -> Option<String> {
        self.lock_inner().active.as_ref().map(|a| a.slot.clone())
    }

    /// Remaining cooldown for `slot`, if it is cooling down.
    pub fn cooldown_remaining(&self, slot: &str) -> Option<Duration> {
        self.slots.get(slot)?.cooldown_remaining()
    }

    /// Record one response status for `slot`.
    pub fn observe(&self, slot: &str, status: u16) -> BanObservation {
        let bad = Self::is_bad_status(status);
        // Held across the check and the pause entry: pausing is serialized.
        let mut inner = self.lock_inner();

        let (streak, cooling) = self.slots.update(slot, |s| {
            if bad {
                s.failure_streak = s.failure_streak.saturating_add(1);
            } else {
                s.failure_streak = 0;
            }
            (s.failure_streak, s.cooldown_remaining().is_some())
        });

        if inner.active.is_some() || cooling || streak < self.config.threshold {
            return BanObservation::Streak(streak);
        }

        self.enter_pause(&mut inner, slot, streak);
        BanObservation::PauseStarted
    }

    fn enter_pause(&self, inner: &mut BanInner, slot: &str, streak: u32) {
        tracing::warn!(
            %slot,
            streak,
            cooldown_secs = self.config.cooldown.as_secs_f64(),
            "Ban detected, pausing dispatch"
        );
        self.metrics.incr_counter(metrics::BANS, &[("slot", slot)]);
        self.metrics
            .set_gauge(metrics::BAN_PAUSED, &[("slot", slot)], 1.0);

        let resume_at = Instant::now() + self.config.cooldown;
        self.slots.update(slot, |s| {
            s.failure_streak = 0;
            s.resume_at = Some(resume_at);
        });

        // The resume timer needs a runtime; without one, never suspend.
        let runtime = tokio::runtime::Handle::try_current().ok();
        let suspended = match (&self.controller, &runtime) {
            (Some(controller), Some(_)) => match controller.suspend() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(%slot, error = %e, "Dispatch suspension failed");
                    false
                }
            },
            _ => false,
        };

        let Some(runtime) = runtime.filter(|_| suspended) else {
            tracing::warn!(
                %slot,
                "Dispatch not suspended; cooling down this slot only"
            );
            self.metrics
                .set_gauge(metrics::BAN_PAUSED, &[("slot", slot)], 0.0);
            return;
        };

        self.slots.update(slot, |s| s.paused = true);
        inner.epoch += 1;
        let epoch = inner.epoch;
        let cancel = CancellationToken::new();
        inner.active = Some(ActivePause {
            epoch,
            slot: slot.to_string(),
            cancel: cancel.clone(),
        });

        let detector = self.clone();
        let cooldown = self.config.cooldown;
        runtime.spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(cooldown) => detector.finish_pause(Some(epoch)),
                () = cancel.cancelled() => {}
            }
        });
    }

    /// Resume now instead of waiting for the cooldown. No-op when not paused.
    pub fn resume_now(&self) {
        self.finish_pause(None);
    }

    /// Clear the pause identified by `epoch` (any pause when `None`).
    ///
    /// The pause stays in flight until `resume()` has returned, so a bad
    /// status observed meanwhile cannot start a pause that this resume
    /// would then undo.
    fn finish_pause(&self, epoch: Option<u64>) {
        let epoch = {
            let mut inner = self.lock_inner();
            if inner.resuming {
                return;
            }
            let Some(active) = inner
                .active
                .as_ref()
                .filter(|a| epoch.is_none_or(|e| e == a.epoch))
            else {
                return;
            };
            active.cancel.cancel();
            let epoch = active.epoch;
            inner.resuming = true;
            epoch
        };

        if let Some(controller) = &self.controller {
            controller.resume();
        }

        let mut inner = self.lock_inner();
        inner.resuming = false;
        let Some(active) = inner.active.take_if(|a| a.epoch == epoch) else {
            return;
        };
        self.slots.update(&active.slot, |s| {
            s.paused = false;
            s.resume_at = None;
            s.failure_streak = 0;
        });
        self.metrics
            .set_gauge(metrics::BAN_PAUSED, &[("slot", &active.slot)], 0.0);
        tracing::info!(slot = %active.slot, "Ban cooldown over, dispatch resumed");
    }

    /// Abandon a pending resume timer without resuming or touching metrics.
    pub fn shutdown(&self) {
        let active = self.lock_inner().active.take();
        if let Some(active) = active {
            active.cancel.cancel();
            self.slots.update(&active.slot, |s| {
                s.paused = false;
                s.resume_at = None;
            });
            tracing::debug!(slot = %active.slot, "Pending ban resume cancelled");
        }
    }
}
