use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Columns forming the upsert conflict target. Never overwritten on conflict.
pub const CONFLICT_KEYS: [&str; 2] = ["source", "external_id"];

/// A job listing as produced by a site extractor, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub source: String,
    #[serde(default)]
    pub external_id: Option<String>,
    pub source_url: String,
    pub title: String,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub remote: bool,
    #[serde(default)]
    pub employment_type: Option<String>,
    #[serde(default)]
    pub seniority: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub salary_min: Option<f64>,
    #[serde(default)]
    pub salary_max: Option<f64>,
    /// Free-form labels; persisted but not part of the fingerprint.
    #[serde(default)]
    pub tags: Option<Value>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description_html: Option<String>,
    #[serde(default)]
    pub description_text: Option<String>,
}

impl CandidateRecord {
    pub fn content(&self) -> JobContent {
        JobContent {
            title: Some(self.title.clone()),
            description_html: self.description_html.clone(),
            description_text: self.description_text.clone(),
            location: self.location.clone(),
            remote: self.remote,
            employment_type: self.employment_type.clone(),
            seniority: self.seniority.clone(),
            currency: self.currency.clone(),
            salary_min: self.salary_min,
            salary_max: self.salary_max,
            language: self.language.clone(),
            posted_at: self.posted_at,
        }
    }
}

/// A stored job row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedJob {
    pub id: Uuid,
    pub source: String,
    pub external_id: Option<String>,
    pub source_url: String,
    pub title: String,
    pub company_id: Option<Uuid>,
    pub location: Option<String>,
    pub remote: bool,
    pub employment_type: Option<String>,
    pub seniority: Option<String>,
    pub currency: Option<String>,
    pub salary_min: Option<f64>,
    pub salary_max: Option<f64>,
    pub tags: Option<Value>,
    pub language: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub description_html: Option<String>,
    pub description_text: Option<String>,
    pub scraped_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PersistedJob {
    pub fn content(&self) -> JobContent {
        JobContent {
            title: Some(self.title.clone()),
            description_html: self.description_html.clone(),
            description_text: self.description_text.clone(),
            location: self.location.clone(),
            remote: self.remote,
            employment_type: self.employment_type.clone(),
            seniority: self.seniority.clone(),
            currency: self.currency.clone(),
            salary_min: self.salary_min,
            salary_max: self.salary_max,
            language: self.language.clone(),
            posted_at: self.posted_at,
        }
    }
}

/// Upsert payload: a validated candidate plus the time it was scraped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPayload {
    #[serde(flatten)]
    pub record: CandidateRecord,
    pub scraped_at: DateTime<Utc>,
}

impl JobPayload {
    pub fn new(record: CandidateRecord, scraped_at: DateTime<Utc>) -> Self {
        Self { record, scraped_at }
    }
}

/// The mutable content of a job: everything compared for change detection.
#[derive(Debug, Clone, PartialEq)]
pub struct JobContent {
    pub title: Option<String>,
    pub description_html: Option<String>,
    pub description_text: Option<String>,
    pub location: Option<String>,
    pub remote: bool,
    pub employment_type: Option<String>,
    pub seniority: Option<String>,
    pub currency: Option<String>,
    pub salary_min: Option<f64>,
    pub salary_max: Option<f64>,
    pub language: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
}

impl JobContent {
    /// Canonical field map: always the same keys, whatever the values.
    ///
    /// Timestamps render as RFC 3339 UTC with microseconds, salaries stay
    /// numeric rounded to cents (the stored precision).
    pub fn canonical_fields(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("title", text(&self.title)),
            ("description_html", text(&self.description_html)),
            ("description_text", text(&self.description_text)),
            ("location", text(&self.location)),
            ("remote", Value::Bool(self.remote)),
            ("employment_type", text(&self.employment_type)),
            ("seniority", text(&self.seniority)),
            ("currency", text(&self.currency)),
            ("salary_min", amount(self.salary_min)),
            ("salary_max", amount(self.salary_max)),
            ("language", text(&self.language)),
            (
                "posted_at",
                self.posted_at
                    .map(|t| Value::String(t.to_rfc3339_opts(SecondsFormat::Micros, true)))
                    .unwrap_or(Value::Null),
            ),
        ]
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(self.canonical_fields())
    }
}

fn text(value: &Option<String>) -> Value {
    value.clone().map(Value::String).unwrap_or(Value::Null)
}

fn amount(value: Option<f64>) -> Value {
    value
        .and_then(|v| serde_json::Number::from_f64((v * 100.0).round() / 100.0))
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// SHA-256 over the compact JSON of `fields` with keys sorted, so the
/// digest is independent of insertion order.
pub fn fingerprint<K, I>(fields: I) -> String
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Value)>,
{
    let sorted: BTreeMap<String, Value> = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
    // Serializing a map of JSON values cannot fail.
    let canonical = serde_json::to_string(&sorted).unwrap_or_default();
    compute_hash(&canonical)
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_compute_hash_consistency() {
        let h1 = compute_hash("hello world");
        let h2 = compute_hash("hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(compute_hash("hello"), compute_hash("world"));
    }

    #[test]
    fn fingerprint_ignores_key_order() {
        let a = fingerprint(vec![("title", json!("Rust dev")), ("salary_min", json!(100.0))]);
        let b = fingerprint(vec![("salary_min", json!(100.0)), ("title", json!("Rust dev"))]);
        assert_eq!(a, b);
    }

    #[test]
    fn candidates_parsed_in_any_key_order_share_fingerprint() {
        let a: CandidateRecord = serde_json::from_value(json!({
            "source": "remoteok",
            "external_id": "42",
            "source_url": "https://remoteok.com/42",
            "title": "Backend Engineer",
            "salary_min": 90000.0,
            "remote": true,
            "posted_at": "2025-10-28T12:00:00Z"
        }))
        .unwrap();
        let b: CandidateRecord = serde_json::from_value(json!({
            "posted_at": "2025-10-28T12:00:00Z",
            "remote": true,
            "salary_min": 90000.0,
            "title": "Backend Engineer",
            "source_url": "https://remoteok.com/42",
            "external_id": "42",
            "source": "remoteok"
        }))
        .unwrap();
        assert_eq!(a.content().fingerprint(), b.content().fingerprint());
    }

    #[test]
    fn canonical_keys_do_not_depend_on_values() {
        let empty = JobContent {
            title: None,
            description_html: None,
            description_text: None,
            location: None,
            remote: false,
            employment_type: None,
            seniority: None,
            currency: None,
            salary_min: None,
            salary_max: None,
            language: None,
            posted_at: None,
        };
        let full = JobContent {
            title: Some("x".into()),
            salary_min: Some(1.0),
            posted_at: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
            ..empty.clone()
        };
        let keys = |c: &JobContent| c.canonical_fields().into_iter().map(|(k, _)| k).collect::<Vec<_>>();
        assert_eq!(keys(&empty), keys(&full));
        assert_ne!(empty.fingerprint(), full.fingerprint());
    }

    #[test]
    fn salaries_compare_at_stored_precision() {
        let base = JobContent {
            title: Some("x".into()),
            description_html: None,
            description_text: None,
            location: None,
            remote: false,
            employment_type: None,
            seniority: None,
            currency: Some("EUR".into()),
            salary_min: Some(50000.0),
            salary_max: None,
            language: None,
            posted_at: None,
        };
        let same = JobContent {
            salary_min: Some(50000.004),
            ..base.clone()
        };
        let different = JobContent {
            salary_min: Some(50001.0),
            ..base.clone()
        };
        assert_eq!(base.fingerprint(), same.fingerprint());
        assert_ne!(base.fingerprint(), different.fingerprint());
    }

    #[test]
    fn timestamps_render_in_fixed_format() {
        let content = JobContent {
            title: None,
            description_html: None,
            description_text: None,
            location: None,
            remote: false,
            employment_type: None,
            seniority: None,
            currency: None,
            salary_min: None,
            salary_max: None,
            language: None,
            posted_at: Some(Utc.with_ymd_and_hms(2025, 10, 28, 9, 30, 0).unwrap()),
        };
        let posted = content
            .canonical_fields()
            .into_iter()
            .find(|(k, _)| *k == "posted_at")
            .unwrap()
            .1;
        assert_eq!(posted, json!("2025-10-28T09:30:00.000000Z"));
    }
}
