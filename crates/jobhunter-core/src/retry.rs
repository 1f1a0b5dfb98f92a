use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::AppError;
use crate::metrics::{self, MetricsSink};
use crate::proxy_pool::ProxyPool;
use crate::request::CrawlRequest;

/// Statuses that penalize the handling proxy without being retried.
pub const PENALTY_ONLY_STATUSES: [u16; 2] = [403, 407];

/// Outcome of a retry evaluation.
#[derive(Debug, Clone)]
pub enum RetryDecision {
    /// Dispatch `request` again, after `backoff` if the host supports delays.
    Retry {
        request: CrawlRequest,
        backoff: Duration,
        reason: String,
    },
    /// Retryable, but the attempt budget is spent. The outcome is final.
    Exhausted { reason: String, attempts: u32 },
    /// Not a transient failure. The outcome is final.
    Final,
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }
}

/// Decides whether failed requests are dispatched again, always through a
/// different proxy when one is available.
#[derive(Clone)]
pub struct RetryController {
    config: RetryConfig,
    proxies: ProxyPool,
    metrics: Arc<dyn MetricsSink>,
}

impl RetryController {
    pub fn new(config: RetryConfig, proxies: ProxyPool, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            config,
            proxies,
            metrics,
        }
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.config.retry_statuses.contains(&status)
    }

    /// True when a response with `status` should penalize the proxy that served it.
    pub fn penalizes_status(&self, status: u16) -> bool {
        self.is_retryable_status(status) || PENALTY_ONLY_STATUSES.contains(&status)
    }

    /// Backoff before retry number `attempt` (1-indexed): `min(base^attempt, max)` seconds.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.config.backoff_base.powi(exp);
        let max = self.config.backoff_max;
        if !secs.is_finite() || secs >= max.as_secs_f64() {
            return max;
        }
        Duration::from_secs_f64(secs)
    }

    pub fn on_response(&self, request: &CrawlRequest, status: u16) -> RetryDecision {
        if !self.is_retryable_status(status) {
            return RetryDecision::Final;
        }
        self.retry(request, format!("status_{status}"))
    }

    pub fn on_exception(&self, request: &CrawlRequest, error: &AppError) -> RetryDecision {
        if !error.is_transport() {
            return RetryDecision::Final;
        }
        self.retry(request, error.kind().to_string())
    }

    fn retry(&self, request: &CrawlRequest, reason: String) -> RetryDecision {
        let attempts = request.meta.retry_times.saturating_add(1);
        if attempts >= self.config.max_attempts {
            tracing::warn!(
                url = %request.url,
                attempts,
                %reason,
                "Gave up retrying"
            );
            return RetryDecision::Exhausted { reason, attempts };
        }

        let mut next = request.clone();
        next.meta.retry_times = attempts;
        next.meta.sent_at = None;

        if let Some(current) = request.meta.proxy.as_deref()
            && let Some(picked) = self.proxies.select(Some(current))
            && picked.address != current
        {
            tracing::debug!(from = %current, to = %picked.address, "Switching proxy for retry");
            next.meta.proxy = Some(picked.address);
            self.metrics.incr_counter(metrics::PROXY_SWITCHES, &[]);
        }

        self.metrics
            .incr_counter(metrics::RETRIES, &[("reason", &reason)]);
        let backoff = self.backoff_for(attempts);
        tracing::debug!(
            url = %request.url,
            retry = attempts,
            %reason,
            backoff_ms = backoff.as_millis() as u64,
            "Retrying request"
        );

        RetryDecision::Retry {
            request: next,
            backoff,
            reason,
        }
    }
}
