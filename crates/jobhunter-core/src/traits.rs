use std::future::Future;

use crate::error::AppError;
use crate::models::{JobPayload, PersistedJob};
use crate::request::{CrawlRequest, CrawlResponse};

/// Sends a fully prepared request (identity and proxy already assigned).
///
/// Errors are transport failures: no status code was received.
pub trait Transport: Send + Sync + Clone {
    fn send(
        &self,
        request: &CrawlRequest,
    ) -> impl Future<Output = Result<CrawlResponse, AppError>> + Send;
}

/// Global suspend/resume switch of the host dispatch engine.
///
/// While suspended, no new request may leave the engine; in-flight requests
/// are allowed to finish.
pub trait DispatchController: Send + Sync {
    /// Stop dispatching. Returns an error if the engine cannot be suspended.
    fn suspend(&self) -> Result<(), AppError>;

    fn resume(&self);
}

/// Persistence for job records keyed by `(source, external_id)`.
pub trait JobStore: Send + Sync + Clone {
    /// Look up the stored job for a source/external id pair.
    fn find_by_key(
        &self,
        source: &str,
        external_id: &str,
    ) -> impl Future<Output = Result<Option<PersistedJob>, AppError>> + Send;

    /// Insert, or on conflict with [`CONFLICT_KEYS`](crate::models::CONFLICT_KEYS)
    /// overwrite every other field. Keeps the original `created_at`.
    fn upsert(&self, payload: &JobPayload) -> impl Future<Output = Result<(), AppError>> + Send;
}
