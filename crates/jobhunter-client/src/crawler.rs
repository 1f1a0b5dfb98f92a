//! Host dispatch engine driving the core hooks around a [`Transport`].
//!
//! For each logical request the crawler:
//! 1. waits for the [`DispatchGate`] (closed while a ban pause is in flight),
//! 2. takes a per-slot concurrency permit,
//! 3. spaces requests to the slot by the governor's current delay,
//! 4. runs `on_request`, sends, then `on_response` / `on_exception`,
//! 5. on `Retry`, sleeps the backoff and goes around again.
//!
//! Attempts for one logical request are strictly sequential.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use jobhunter_core::config::CrawlConfig;
use jobhunter_core::dispatch::{
    DispatchPipeline, ExceptionAction, RequestDisposition, ResponseAction,
};
use jobhunter_core::error::AppError;
use jobhunter_core::gate::DispatchGate;
use jobhunter_core::metrics::MetricsSink;
use jobhunter_core::request::{CrawlRequest, CrawlResponse};
use jobhunter_core::traits::{DispatchController, Transport};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

/// Final outcome of one logical request.
#[derive(Debug)]
pub struct CrawlResult {
    pub url: String,
    /// Attempts actually sent.
    pub attempts: u32,
    pub outcome: Result<CrawlResponse, AppError>,
}

#[derive(Clone)]
pub struct Crawler<T> {
    transport: T,
    pipeline: DispatchPipeline,
    gate: DispatchGate,
    per_slot: usize,
    honor_backoff: bool,
    /// Next free send time per slot.
    next_send: Arc<Mutex<HashMap<String, Instant>>>,
    limits: Arc<std::sync::Mutex<HashMap<String, Arc<Semaphore>>>>,
}

impl<T: Transport> Crawler<T> {
    pub fn new(transport: T, config: &CrawlConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        let gate = DispatchGate::new();
        let controller: Arc<dyn DispatchController> = Arc::new(gate.clone());
        Self {
            transport,
            pipeline: DispatchPipeline::new(config, Some(controller), metrics),
            gate,
            per_slot: config.throttle.concurrent_per_slot.max(1),
            honor_backoff: true,
            next_send: Arc::new(Mutex::new(HashMap::new())),
            limits: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    /// Skip retry backoff sleeps (retries are still sequential).
    pub fn without_backoff(mut self) -> Self {
        self.honor_backoff = false;
        self
    }

    pub fn pipeline(&self) -> &DispatchPipeline {
        &self.pipeline
    }

    pub fn gate(&self) -> &DispatchGate {
        &self.gate
    }

    /// Fetch one logical request through the pipeline, retries included.
    pub async fn fetch(&self, mut request: CrawlRequest) -> CrawlResult {
        let url = request.url.clone();
        loop {
            self.gate.wait_open().await;
            let slot = request.slot_key();
            let permit = self.slot_permit(&slot).await;
            self.wait_for_slot(&slot).await;
            if !self.gate.is_open() {
                continue;
            }

            if let RequestDisposition::Defer(wait) = self.pipeline.on_request(&mut request) {
                drop(permit);
                tokio::time::sleep(wait).await;
                continue;
            }

            let result = self.transport.send(&request).await;
            drop(permit);
            let attempts = request.meta.retry_times + 1;

            let (next, backoff) = match result {
                Ok(response) => match self.pipeline.on_response(&request, response) {
                    ResponseAction::Deliver(response) => {
                        return CrawlResult {
                            url,
                            attempts,
                            outcome: Ok(response),
                        };
                    }
                    ResponseAction::Retry { request, backoff } => (request, backoff),
                },
                Err(error) => match self.pipeline.on_exception(&request, error) {
                    ExceptionAction::Fail(error) => {
                        return CrawlResult {
                            url,
                            attempts,
                            outcome: Err(error),
                        };
                    }
                    ExceptionAction::Retry { request, backoff } => (request, backoff),
                },
            };

            if self.honor_backoff && !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }
            request = next;
        }
    }

    /// Fetch many requests with at most `concurrency` logical requests in flight.
    pub async fn crawl_all(&self, requests: Vec<CrawlRequest>, concurrency: usize) -> Vec<CrawlResult> {
        futures::stream::iter(requests)
            .map(|request| self.fetch(request))
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    /// Current spacing delay of every slot seen so far.
    pub fn slot_delays(&self) -> Vec<(String, Duration)> {
        self.pipeline.governor().slot_delays()
    }

    /// Stop: abandon any pending ban resume.
    pub fn shutdown(&self) {
        self.pipeline.shutdown();
    }

    async fn slot_permit(&self, slot: &str) -> Option<OwnedSemaphorePermit> {
        let semaphore = {
            let mut limits = self.limits.lock().unwrap_or_else(|p| p.into_inner());
            limits
                .entry(slot.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_slot)))
                .clone()
        };
        // Semaphores are never closed.
        semaphore.acquire_owned().await.ok()
    }

    /// Reserve the next send time for `slot` and sleep until it.
    async fn wait_for_slot(&self, slot: &str) {
        let delay = self.pipeline.governor().current_delay(slot);
        let wait = {
            let mut next_send = self.next_send.lock().await;
            let now = Instant::now();
            let at = match next_send.get(slot) {
                Some(&last) => std::cmp::max(last + delay, now),
                None => now,
            };
            next_send.insert(slot.to_string(), at);
            at - now
        };
        if !wait.is_zero() {
            tracing::debug!(%slot, sleep_ms = wait.as_millis() as u64, "Throttling request");
            tokio::time::sleep(wait).await;
        }
    }
}
