//! The three hook points a host engine calls around every request.
//!
//! Outbound: identity rotation, then proxy assignment.
//! Inbound: rate governor observation, ban detection, retry decision, then
//! penalization of the proxy that served the failed attempt.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::ban::BanDetector;
use crate::config::CrawlConfig;
use crate::error::AppError;
use crate::identity::IdentityRotator;
use crate::metrics::{self, MetricsSink};
use crate::proxy_pool::ProxyPool;
use crate::request::{CrawlRequest, CrawlResponse};
use crate::retry::{RetryController, RetryDecision};
use crate::slots::SlotRegistry;
use crate::throttle::RateGovernor;
use crate::traits::DispatchController;

/// What the host should do with a prepared request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDisposition {
    Send,
    /// The slot is cooling down after a ban; hold the request back.
    Defer(Duration),
}

/// What the host should do after a response.
#[derive(Debug)]
pub enum ResponseAction {
    /// Final outcome, successful or not.
    Deliver(CrawlResponse),
    /// Dispatch `request` again after `backoff`.
    Retry {
        request: CrawlRequest,
        backoff: Duration,
    },
}

/// What the host should do after a transport failure.
#[derive(Debug)]
pub enum ExceptionAction {
    Fail(AppError),
    Retry {
        request: CrawlRequest,
        backoff: Duration,
    },
}

#[derive(Clone)]
pub struct DispatchPipeline {
    identities: IdentityRotator,
    proxies: ProxyPool,
    governor: RateGovernor,
    bans: BanDetector,
    retries: RetryController,
    metrics: Arc<dyn MetricsSink>,
}

impl DispatchPipeline {
    /// Wire every component from configuration. All components share one
    /// slot registry so delays, streaks and cooldowns line up per slot.
    pub fn new(
        config: &CrawlConfig,
        controller: Option<Arc<dyn DispatchController>>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let slots = SlotRegistry::new(RateGovernor::initial_delay(&config.throttle));
        let proxies = ProxyPool::new(config.proxies.clone(), metrics.clone());
        Self {
            identities: IdentityRotator::new(config.user_agents.clone()),
            governor: RateGovernor::new(config.throttle.clone(), slots.clone(), metrics.clone()),
            bans: BanDetector::new(config.ban.clone(), slots, controller, metrics.clone()),
            retries: RetryController::new(config.retry.clone(), proxies.clone(), metrics.clone()),
            proxies,
            metrics,
        }
    }

    pub fn proxies(&self) -> &ProxyPool {
        &self.proxies
    }

    pub fn governor(&self) -> &RateGovernor {
        &self.governor
    }

    pub fn bans(&self) -> &BanDetector {
        &self.bans
    }

    /// Outbound hook. Assigns identity and proxy and stamps the send time.
    pub fn on_request(&self, request: &mut CrawlRequest) -> RequestDisposition {
        let slot = request.slot_key();
        if let Some(remaining) = self.bans.cooldown_remaining(&slot) {
            tracing::debug!(
                %slot,
                remaining_ms = remaining.as_millis() as u64,
                "Slot cooling down, deferring request"
            );
            return RequestDisposition::Defer(remaining);
        }

        self.identities.assign(request);
        if request.meta.proxy.is_none()
            && let Some(proxy) = self.proxies.select(None)
        {
            request.meta.proxy = Some(proxy.address);
        }

        self.metrics.incr_counter(metrics::REQUESTS, &[]);
        request.meta.sent_at = Some(Instant::now());
        RequestDisposition::Send
    }

    /// Inbound hook for any response carrying a status code.
    pub fn on_response(&self, request: &CrawlRequest, response: CrawlResponse) -> ResponseAction {
        let slot = request.slot_key();
        let status = response.status;
        let latency = request.meta.sent_at.map(|t| t.elapsed());

        tracing::info!(
            url = %response.url,
            status,
            latency_ms = latency.map(|l| l.as_millis() as u64),
            "http_response"
        );
        self.metrics
            .incr_counter(metrics::RESPONSES, &[("status", &status.to_string())]);

        if let Some(latency) = latency {
            self.metrics.observe(
                metrics::DOWNLOAD_LATENCY,
                &[("slot", &slot)],
                latency.as_secs_f64() * 1000.0,
            );
            self.governor.observe(&slot, latency, status);
        }
        self.bans.observe(&slot, status);
        let decision = self.retries.on_response(request, status);

        if self.retries.penalizes_status(status)
            && let Some(proxy) = request.meta.proxy.as_deref()
        {
            self.proxies.penalize(proxy, &format!("status_{status}"));
        }

        match decision {
            RetryDecision::Retry {
                request, backoff, ..
            } => ResponseAction::Retry { request, backoff },
            RetryDecision::Exhausted { .. } | RetryDecision::Final => {
                ResponseAction::Deliver(response)
            }
        }
    }

    /// Inbound hook for a request that produced no response.
    pub fn on_exception(&self, request: &CrawlRequest, error: AppError) -> ExceptionAction {
        tracing::error!(url = %request.url, kind = error.kind(), error = %error, "http_exception");

        let decision = self.retries.on_exception(request, &error);
        if error.is_transport()
            && let Some(proxy) = request.meta.proxy.as_deref()
        {
            self.proxies.penalize(proxy, error.kind());
        }

        match decision {
            RetryDecision::Retry {
                request, backoff, ..
            } => ExceptionAction::Retry { request, backoff },
            RetryDecision::Exhausted { .. } | RetryDecision::Final => ExceptionAction::Fail(error),
        }
    }

    /// Abandon any pending ban resume. Call once the host stops dispatching.
    pub fn shutdown(&self) {
        self.bans.shutdown();
    }
}
