use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Per-destination crawl state.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationSlot {
    /// Consecutive 403/429 responses since the last reset.
    pub failure_streak: u32,
    /// True while a ban pause triggered by this slot is in effect.
    pub paused: bool,
    /// End of the current cooldown, if any.
    pub resume_at: Option<Instant>,
    /// Adaptive delay reported by the rate governor.
    pub current_delay: Duration,
}

impl DestinationSlot {
    fn new(initial_delay: Duration) -> Self {
        Self {
            failure_streak: 0,
            paused: false,
            resume_at: None,
            current_delay: initial_delay,
        }
    }

    /// Time left in the cooldown, `None` once it has elapsed.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let remaining = self.resume_at?.checked_duration_since(Instant::now())?;
        (!remaining.is_zero()).then_some(remaining)
    }
}

/// Shared store of [`DestinationSlot`]s, one per slot key, created lazily.
///
/// The rate governor and the ban detector both mutate slots through
/// [`SlotRegistry::update`], which holds the lock for the whole closure.
#[derive(Clone)]
pub struct SlotRegistry {
    initial_delay: Duration,
    slots: Arc<Mutex<HashMap<String, DestinationSlot>>>,
}

impl SlotRegistry {
    pub fn new(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, DestinationSlot>> {
        self.slots.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned slot registry mutex");
            poisoned.into_inner()
        })
    }

    /// Run `f` on the slot for `key`, creating it first if needed.
    pub fn update<T>(&self, key: &str, f: impl FnOnce(&mut DestinationSlot) -> T) -> T {
        let mut slots = self.lock_slots();
        let slot = slots
            .entry(key.to_string())
            .or_insert_with(|| DestinationSlot::new(self.initial_delay));
        f(slot)
    }

    pub fn get(&self, key: &str) -> Option<DestinationSlot> {
        self.lock_slots().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock_slots().keys().cloned().collect();
        keys.sort();
        keys
    }
}
