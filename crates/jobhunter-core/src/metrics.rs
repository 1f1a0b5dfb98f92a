//! Metrics sink used by the dispatch and ingestion pipelines.
//!
//! Export (Prometheus, OTLP, ...) is the host's concern; the core only
//! reports counters and gauges through [`MetricsSink`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const REQUESTS: &str = "crawl_requests_total";
pub const RESPONSES: &str = "crawl_responses_total";
pub const RETRIES: &str = "crawl_retries_total";
pub const PROXY_SWITCHES: &str = "crawl_proxy_switches_total";
pub const PROXY_PENALTIES: &str = "crawl_proxy_penalties_total";
pub const SLOT_DELAY: &str = "crawl_slot_delay_seconds";
pub const BANS: &str = "crawl_bans_total";
pub const BAN_PAUSED: &str = "crawl_ban_paused";
pub const INGESTED: &str = "ingest_items_total";
pub const DOWNLOAD_LATENCY: &str = "crawl_download_latency_ms";

/// Label set attached to a metric sample.
pub type Labels<'a> = &'a [(&'static str, &'a str)];

/// Receives counter increments, gauge updates and histogram samples.
pub trait MetricsSink: Send + Sync {
    fn incr_counter(&self, name: &'static str, labels: Labels<'_>);

    fn set_gauge(&self, name: &'static str, labels: Labels<'_>, value: f64);

    /// Record one sample of a distribution (latencies, sizes).
    fn observe(&self, name: &'static str, labels: Labels<'_>, value: f64);
}

/// Sink that forwards every sample as a `tracing` debug event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn incr_counter(&self, name: &'static str, labels: Labels<'_>) {
        tracing::debug!(metric = name, labels = ?labels, "counter +1");
    }

    fn set_gauge(&self, name: &'static str, labels: Labels<'_>, value: f64) {
        tracing::debug!(metric = name, labels = ?labels, value, "gauge set");
    }

    fn observe(&self, name: &'static str, labels: Labels<'_>, value: f64) {
        tracing::debug!(metric = name, labels = ?labels, value, "sample observed");
    }
}

/// In-process sink keeping the latest value of every series.
///
/// Series keys render as `name{k="v",...}`, labels in the order given.
/// Histogram samples are kept as `name_count` and `name_sum` series.
#[derive(Debug, Default, Clone)]
pub struct MemoryMetrics {
    series: Arc<Mutex<BTreeMap<String, f64>>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a series, 0 when never reported.
    pub fn value(&self, name: &str, labels: Labels<'_>) -> f64 {
        let key = series_key(name, labels);
        self.lock().get(&key).copied().unwrap_or(0.0)
    }

    /// Sum of every series of `name`, regardless of labels.
    pub fn total(&self, name: &str) -> f64 {
        self.lock()
            .iter()
            .filter(|(k, _)| k.as_str() == name || k.starts_with(&format!("{name}{{")))
            .map(|(_, v)| *v)
            .sum()
    }

    /// Copy of all series, sorted by key.
    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, f64>> {
        self.series
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MetricsSink for MemoryMetrics {
    fn incr_counter(&self, name: &'static str, labels: Labels<'_>) {
        *self.lock().entry(series_key(name, labels)).or_insert(0.0) += 1.0;
    }

    fn set_gauge(&self, name: &'static str, labels: Labels<'_>, value: f64) {
        self.lock().insert(series_key(name, labels), value);
    }

    fn observe(&self, name: &'static str, labels: Labels<'_>, value: f64) {
        let mut series = self.lock();
        *series
            .entry(series_key(&format!("{name}_count"), labels))
            .or_insert(0.0) += 1.0;
        *series
            .entry(series_key(&format!("{name}_sum"), labels))
            .or_insert(0.0) += value;
    }
}

fn series_key(name: &str, labels: Labels<'_>) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let rendered: Vec<String> = labels.iter().map(|(k, v)| format!("{k}=\"{v}\"")).collect();
    format!("{name}{{{}}}", rendered.join(","))
}
