use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use url::Url;

use crate::error::AppError;
use crate::metrics::{self, MetricsSink};
use crate::models::{CandidateRecord, JobPayload};
use crate::traits::JobStore;

/// Result of ingesting one candidate record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted,
    Updated,
    /// Stored content is identical; nothing was written.
    DroppedDuplicate,
    /// Failed validation; nothing was written.
    DroppedInvalid { reason: String },
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Inserted => "inserted",
            IngestOutcome::Updated => "updated",
            IngestOutcome::DroppedDuplicate => "dropped_duplicate",
            IngestOutcome::DroppedInvalid { .. } => "dropped_invalid",
        }
    }
}

impl fmt::Display for IngestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Check field constraints of a candidate before anything is persisted.
pub fn validate(candidate: &CandidateRecord) -> Result<(), AppError> {
    if candidate.source.trim().is_empty() {
        return Err(AppError::ValidationError("source is empty".into()));
    }

    // Character limits of the stored text columns.
    let limited = [
        ("source", Some(candidate.source.as_str()), 64),
        ("external_id", candidate.external_id.as_deref(), 128),
        ("source_url", Some(candidate.source_url.as_str()), 1024),
        ("title", Some(candidate.title.as_str()), 512),
        ("company_name", candidate.company_name.as_deref(), 255),
        ("location", candidate.location.as_deref(), 256),
        ("employment_type", candidate.employment_type.as_deref(), 64),
        ("seniority", candidate.seniority.as_deref(), 32),
    ];
    for (field, value, limit) in limited {
        if let Some(value) = value
            && value.chars().count() > limit
        {
            return Err(AppError::ValidationError(format!(
                "{field} exceeds {limit} characters"
            )));
        }
    }

    let url = Url::parse(&candidate.source_url).map_err(|e| {
        AppError::ValidationError(format!("source_url '{}' is invalid: {e}", candidate.source_url))
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(AppError::ValidationError(format!(
            "source_url '{}' is not an absolute http(s) URL",
            candidate.source_url
        )));
    }

    if let (Some(min), Some(max)) = (candidate.salary_min, candidate.salary_max)
        && max < min
    {
        return Err(AppError::ValidationError(format!(
            "salary_max {max} < salary_min {min}"
        )));
    }

    if let Some(language) = &candidate.language {
        let len = language.chars().count();
        if !(2..=5).contains(&len) {
            return Err(AppError::ValidationError(format!(
                "language '{language}' must be 2 to 5 characters"
            )));
        }
    }

    if let Some(currency) = &candidate.currency
        && currency.chars().count() != 3
    {
        return Err(AppError::ValidationError(format!(
            "currency '{currency}' must be exactly 3 characters"
        )));
    }

    Ok(())
}

/// Decides insert / update / drop for each extracted record and writes
/// through a [`JobStore`].
///
/// Calls for the same `(source, external_id)` are serialized; different
/// keys proceed concurrently.
#[derive(Clone)]
pub struct IngestService<S: JobStore> {
    store: S,
    metrics: Arc<dyn MetricsSink>,
    locks: KeyedLocks,
}

impl<S: JobStore> IngestService<S> {
    pub fn new(store: S, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            store,
            metrics,
            locks: KeyedLocks::default(),
        }
    }

    /// Run one candidate through validation, change detection and upsert.
    ///
    /// Only store failures are returned as errors.
    pub async fn ingest(&self, mut candidate: CandidateRecord) -> Result<IngestOutcome, AppError> {
        if candidate.external_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            candidate.external_id = None;
        }

        let outcome = self.decide_and_write(candidate).await?;
        self.metrics
            .incr_counter(metrics::INGESTED, &[("outcome", outcome.as_str())]);
        Ok(outcome)
    }

    async fn decide_and_write(&self, candidate: CandidateRecord) -> Result<IngestOutcome, AppError> {
        if let Err(e) = validate(&candidate) {
            let reason = e.to_string();
            tracing::warn!(
                source = %candidate.source,
                external_id = ?candidate.external_id,
                %reason,
                "drop_invalid"
            );
            return Ok(IngestOutcome::DroppedInvalid { reason });
        }

        // Without an external id there is nothing to compare against.
        let Some(external_id) = candidate.external_id.clone() else {
            self.write(candidate).await?;
            return Ok(IngestOutcome::Inserted);
        };

        let _guard = self
            .locks
            .lock((candidate.source.clone(), external_id.clone()))
            .await;

        let existing = self.store.find_by_key(&candidate.source, &external_id).await?;
        let Some(existing) = existing else {
            self.write(candidate).await?;
            return Ok(IngestOutcome::Inserted);
        };

        if existing.content().fingerprint() == candidate.content().fingerprint() {
            tracing::info!(
                source = %candidate.source,
                %external_id,
                "drop_duplicate_unchanged"
            );
            return Ok(IngestOutcome::DroppedDuplicate);
        }

        self.write(candidate).await?;
        Ok(IngestOutcome::Updated)
    }

    async fn write(&self, candidate: CandidateRecord) -> Result<(), AppError> {
        let payload = JobPayload::new(candidate, Utc::now());
        self.store.upsert(&payload).await?;
        tracing::info!(
            source = %payload.record.source,
            external_id = ?payload.record.external_id,
            "upsert_job"
        );
        Ok(())
    }
}

type LockKey = (String, String);
type LockMap = HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>;

/// Async mutexes keyed by record identity, removed once nobody holds or
/// waits on them.
#[derive(Clone, Default)]
struct KeyedLocks {
    map: Arc<Mutex<LockMap>>,
}

impl KeyedLocks {
    async fn lock(&self, key: LockKey) -> KeyedGuard {
        let slot = {
            let mut map = self.map.lock().unwrap_or_else(|p| p.into_inner());
            map.entry(key.clone()).or_default().clone()
        };
        let guard = slot.clone().lock_owned().await;
        KeyedGuard {
            map: self.map.clone(),
            key,
            slot,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

struct KeyedGuard {
    map: Arc<Mutex<LockMap>>,
    key: LockKey,
    slot: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.map.lock().unwrap_or_else(|p| p.into_inner());
        // One reference in the map, one here: no other holder or waiter.
        if Arc::strong_count(&self.slot) == 2 {
            map.remove(&self.key);
        }
    }
}
