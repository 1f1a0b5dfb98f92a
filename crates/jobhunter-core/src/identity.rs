use std::sync::{Arc, Mutex};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;

use crate::request::{CrawlRequest, USER_AGENT};

/// Desktop and mobile browser identities used when none are configured.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.0; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_0) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Linux; Android 14; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36",
];

/// Assigns a random `User-Agent` to requests that don't carry one.
#[derive(Clone)]
pub struct IdentityRotator {
    identities: Arc<Vec<String>>,
    rng: Arc<Mutex<StdRng>>,
}

impl IdentityRotator {
    pub fn new(identities: Vec<String>) -> Self {
        Self::with_rng(identities, StdRng::from_os_rng())
    }

    /// Blank entries are dropped; an empty result falls back to
    /// [`DEFAULT_USER_AGENTS`].
    pub fn with_rng(identities: Vec<String>, rng: StdRng) -> Self {
        let mut identities: Vec<String> = identities
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if identities.is_empty() {
            identities = DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect();
        }
        Self {
            identities: Arc::new(identities),
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    pub fn identities(&self) -> &[String] {
        &self.identities
    }

    /// No-op when the request already has a non-empty identity header.
    pub fn assign(&self, request: &mut CrawlRequest) {
        if request.header(USER_AGENT).is_some_and(|ua| !ua.is_empty()) {
            return;
        }
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // `identities` is never empty, see `with_rng`.
        if let Some(identity) = self.identities.choose(&mut *rng) {
            request.set_header(USER_AGENT, identity.clone());
        }
    }
}
