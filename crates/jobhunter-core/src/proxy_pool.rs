//! Penalty-weighted proxy rotation.
//!
//! Proxies are never removed: a failing proxy only accumulates penalty and
//! becomes least preferred, so it can come back once the others degrade.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;

use crate::metrics::{self, MetricsSink};

/// A proxy and its cumulative penalty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyIdentity {
    pub address: String,
    pub penalty: u32,
}

struct PoolInner {
    penalties: HashMap<String, u32>,
    rng: StdRng,
}

/// Thread-safe proxy pool shared by every in-flight request.
#[derive(Clone)]
pub struct ProxyPool {
    /// Insertion order, deduplicated.
    addresses: Arc<Vec<String>>,
    inner: Arc<Mutex<PoolInner>>,
    metrics: Arc<dyn MetricsSink>,
}

impl ProxyPool {
    pub fn new(proxies: Vec<String>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self::with_rng(proxies, metrics, StdRng::from_os_rng())
    }

    /// Build a pool with an injected random source (seed it for deterministic tests).
    pub fn with_rng(proxies: Vec<String>, metrics: Arc<dyn MetricsSink>, rng: StdRng) -> Self {
        let mut addresses: Vec<String> = Vec::with_capacity(proxies.len());
        for proxy in proxies {
            let proxy = proxy.trim().to_string();
            if !proxy.is_empty() && !addresses.contains(&proxy) {
                addresses.push(proxy);
            }
        }
        let penalties = addresses.iter().map(|a| (a.clone(), 0)).collect();

        Self {
            addresses: Arc::new(addresses),
            inner: Arc::new(Mutex::new(PoolInner { penalties, rng })),
            metrics,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    fn lock_inner(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned proxy pool mutex");
            poisoned.into_inner()
        })
    }

    /// Pick a proxy with the lowest penalty, ties broken uniformly at random.
    ///
    /// `exclude` is skipped unless it is the only member. Returns `None` for
    /// an empty pool, in which case the request goes out proxyless.
    pub fn select(&self, exclude: Option<&str>) -> Option<ProxyIdentity> {
        if self.addresses.is_empty() {
            return None;
        }

        let mut inner = self.lock_inner();
        let mut candidates: Vec<&String> = self
            .addresses
            .iter()
            .filter(|a| Some(a.as_str()) != exclude)
            .collect();
        if candidates.is_empty() {
            candidates = self.addresses.iter().collect();
        }

        let penalty_of = |a: &str| inner.penalties.get(a).copied().unwrap_or(0);
        let min = candidates.iter().map(|a| penalty_of(a)).min()?;
        let tied: Vec<&String> = candidates
            .into_iter()
            .filter(|a| penalty_of(a) == min)
            .collect();

        let chosen = (*tied.choose(&mut inner.rng)?).clone();
        Some(ProxyIdentity {
            address: chosen,
            penalty: min,
        })
    }

    /// Add one penalty point to `address`. Unknown addresses are ignored.
    pub fn penalize(&self, address: &str, cause: &str) {
        let penalty = {
            let mut inner = self.lock_inner();
            match inner.penalties.get_mut(address) {
                Some(p) => {
                    *p = p.saturating_add(1);
                    *p
                }
                None => return,
            }
        };
        tracing::debug!(proxy = %address, %cause, penalty, "Proxy penalized");
        self.metrics
            .incr_counter(metrics::PROXY_PENALTIES, &[("cause", cause)]);
    }

    pub fn penalty(&self, address: &str) -> Option<u32> {
        self.lock_inner().penalties.get(address).copied()
    }

    /// Every proxy with its current penalty, in configuration order.
    pub fn snapshot(&self) -> Vec<ProxyIdentity> {
        let inner = self.lock_inner();
        self.addresses
            .iter()
            .map(|a| ProxyIdentity {
                address: a.clone(),
                penalty: inner.penalties.get(a).copied().unwrap_or(0),
            })
            .collect()
    }
}
