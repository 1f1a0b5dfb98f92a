//! Test utilities: hand-written mocks of the core traits.
//!
//! All mocks use `Arc<Mutex<_>>` for interior mutability so tests can
//! assert on recorded calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{CandidateRecord, JobPayload, PersistedJob};
use crate::traits::{DispatchController, JobStore};

// ---------------------------------------------------------------------------
// MockDispatchController
// ---------------------------------------------------------------------------

/// Counts suspend/resume calls. `failing()` refuses to suspend.
#[derive(Clone, Default)]
pub struct MockDispatchController {
    suspends: Arc<AtomicUsize>,
    resumes: Arc<AtomicUsize>,
    fail_suspend: bool,
}

impl MockDispatchController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_suspend: true,
            ..Self::default()
        }
    }

    pub fn suspend_count(&self) -> usize {
        self.suspends.load(Ordering::SeqCst)
    }

    pub fn resume_count(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }
}

impl DispatchController for MockDispatchController {
    fn suspend(&self) -> Result<(), AppError> {
        if self.fail_suspend {
            return Err(AppError::Generic("engine cannot be suspended".into()));
        }
        self.suspends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// MockJobStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    rows: HashMap<(String, String), PersistedJob>,
    anonymous: Vec<PersistedJob>,
    upserts: usize,
    finds: usize,
}

/// In-memory job store with upsert-on-`(source, external_id)` semantics.
#[derive(Clone, Default)]
pub struct MockJobStore {
    state: Arc<Mutex<StoreState>>,
    upsert_error: Option<String>,
    find_delay: Option<Duration>,
}

impl MockJobStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every upsert fails with `AppError::DatabaseError(message)`.
    pub fn failing_upserts(message: &str) -> Self {
        Self {
            upsert_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Sleep before answering lookups, to widen race windows.
    pub fn with_find_delay(mut self, delay: Duration) -> Self {
        self.find_delay = Some(delay);
        self
    }

    pub fn get(&self, source: &str, external_id: &str) -> Option<PersistedJob> {
        let state = self.state.lock().unwrap();
        state
            .rows
            .get(&(source.to_string(), external_id.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.rows.len() + state.anonymous.len()
    }

    pub fn upsert_count(&self) -> usize {
        self.state.lock().unwrap().upserts
    }

    pub fn find_calls(&self) -> usize {
        self.state.lock().unwrap().finds
    }
}

impl JobStore for MockJobStore {
    async fn find_by_key(
        &self,
        source: &str,
        external_id: &str,
    ) -> Result<Option<PersistedJob>, AppError> {
        if let Some(delay) = self.find_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.finds += 1;
        Ok(state
            .rows
            .get(&(source.to_string(), external_id.to_string()))
            .cloned())
    }

    async fn upsert(&self, payload: &JobPayload) -> Result<(), AppError> {
        if let Some(message) = &self.upsert_error {
            return Err(AppError::DatabaseError(message.clone()));
        }

        let mut state = self.state.lock().unwrap();
        state.upserts += 1;
        let record = &payload.record;
        let Some(external_id) = record.external_id.clone() else {
            state.anonymous.push(persisted(payload, Uuid::new_v4(), Utc::now()));
            return Ok(());
        };

        let key = (record.source.clone(), external_id);
        let row = match state.rows.get(&key) {
            Some(existing) => persisted(payload, existing.id, existing.created_at),
            None => persisted(payload, Uuid::new_v4(), Utc::now()),
        };
        state.rows.insert(key, row);
        Ok(())
    }
}

fn persisted(payload: &JobPayload, id: Uuid, created_at: chrono::DateTime<Utc>) -> PersistedJob {
    let r = payload.record.clone();
    PersistedJob {
        id,
        source: r.source,
        external_id: r.external_id,
        source_url: r.source_url,
        title: r.title,
        company_id: None,
        location: r.location,
        remote: r.remote,
        employment_type: r.employment_type,
        seniority: r.seniority,
        currency: r.currency,
        salary_min: r.salary_min,
        salary_max: r.salary_max,
        tags: r.tags,
        language: r.language,
        posted_at: r.posted_at,
        description_html: r.description_html,
        description_text: r.description_text,
        scraped_at: payload.scraped_at,
        created_at,
        updated_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A valid candidate record for `source`.
pub fn make_candidate(source: &str, external_id: Option<&str>) -> CandidateRecord {
    CandidateRecord {
        source: source.to_string(),
        external_id: external_id.map(String::from),
        source_url: format!(
            "https://{}.example.com/jobs/{}",
            if source.is_empty() { "jobs" } else { source },
            external_id.unwrap_or("0")
        ),
        title: "Rust Engineer".to_string(),
        company_name: Some("Acme".to_string()),
        location: Some("Remote".to_string()),
        remote: true,
        employment_type: Some("full-time".to_string()),
        seniority: Some("mid".to_string()),
        currency: Some("EUR".to_string()),
        salary_min: Some(60_000.0),
        salary_max: Some(80_000.0),
        tags: Some(serde_json::json!(["rust", "backend"])),
        language: Some("en".to_string()),
        posted_at: None,
        description_html: Some("<p>Build crawlers</p>".to_string()),
        description_text: Some("Build crawlers".to_string()),
    }
}
