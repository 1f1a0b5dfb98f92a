//! Adaptive per-slot delay (auto-throttle).
//!
//! The governor only *computes* and *reports* the delay for each slot; the
//! host engine is responsible for actually spacing requests with it.
//!
//! For every response with a measured latency:
//!
//! ```text
//! target = latency / target_concurrency
//! next   = max(target, (current + target) / 2)        clamped to [download_delay, max_delay]
//! ```
//!
//! A non-2xx response may raise the delay but never lower it, so error
//! pages that come back fast don't speed the crawl up.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use jobhunter_core::config::ThrottleConfig;
//! use jobhunter_core::metrics::TracingMetrics;
//! use jobhunter_core::slots::SlotRegistry;
//! use jobhunter_core::throttle::RateGovernor;
//!
//! let config = ThrottleConfig::default();
//! let slots = SlotRegistry::new(RateGovernor::initial_delay(&config));
//! let governor = RateGovernor::new(config, slots, Arc::new(TracingMetrics));
//! let delay = governor.observe("remoteok.com", Duration::from_millis(800), 200);
//! assert!(delay >= Duration::from_secs(1));
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::config::ThrottleConfig;
use crate::metrics::{self, MetricsSink};
use crate::slots::SlotRegistry;

#[derive(Clone)]
pub struct RateGovernor {
    config: ThrottleConfig,
    slots: SlotRegistry,
    metrics: Arc<dyn MetricsSink>,
}

impl RateGovernor {
    pub fn new(config: ThrottleConfig, slots: SlotRegistry, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            config,
            slots,
            metrics,
        }
    }

    /// Delay a slot starts with before any observation.
    pub fn initial_delay(config: &ThrottleConfig) -> Duration {
        std::cmp::max(config.start_delay, config.download_delay)
    }

    /// Feed one response latency into the control loop for `slot`.
    ///
    /// Returns the slot's delay after the update and reports it as a gauge.
    pub fn observe(&self, slot: &str, latency: Duration, status: u16) -> Duration {
        let next = self.slots.update(slot, |state| {
            let proposed = self.next_delay(state.current_delay, latency);
            let success = (200..300).contains(&status);
            if success || proposed > state.current_delay {
                state.current_delay = proposed;
            }
            state.current_delay
        });

        tracing::trace!(
            %slot,
            latency_ms = latency.as_millis() as u64,
            status,
            delay_ms = next.as_millis() as u64,
            "Slot delay updated"
        );
        self.metrics
            .set_gauge(metrics::SLOT_DELAY, &[("slot", slot)], next.as_secs_f64());
        next
    }

    /// Current delay for `slot`, or the initial delay if it was never observed.
    pub fn current_delay(&self, slot: &str) -> Duration {
        self.slots
            .get(slot)
            .map(|s| s.current_delay)
            .unwrap_or_else(|| Self::initial_delay(&self.config))
    }

    /// `(slot, delay)` for every known slot, sorted by slot.
    pub fn slot_delays(&self) -> Vec<(String, Duration)> {
        self.slots
            .keys()
            .into_iter()
            .map(|slot| {
                let delay = self.current_delay(&slot);
                (slot, delay)
            })
            .collect()
    }

    fn next_delay(&self, current: Duration, latency: Duration) -> Duration {
        let target = latency.as_secs_f64() / self.config.target_concurrency;
        let averaged = (current.as_secs_f64() + target) / 2.0;
        let next = target.max(averaged);

        let min = self.config.download_delay.as_secs_f64();
        let max = self.config.max_delay.as_secs_f64().max(min);
        // A non-finite ratio keeps the current delay.
        Duration::try_from_secs_f64(next.clamp(min, max)).unwrap_or(current)
    }
}
