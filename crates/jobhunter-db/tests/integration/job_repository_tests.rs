use std::sync::Arc;

use chrono::{TimeZone, Utc};
use jobhunter_core::ingest::{IngestOutcome, IngestService};
use jobhunter_core::metrics::TracingMetrics;
use jobhunter_core::models::{CandidateRecord, JobPayload};
use jobhunter_db::JobRepository;

use crate::integration::common::setup_test_db;

fn candidate(external_id: Option<&str>) -> CandidateRecord {
    CandidateRecord {
        source: "x".into(),
        external_id: external_id.map(String::from),
        source_url: "https://x.example.com/jobs/1".into(),
        title: "Platform Engineer".into(),
        company_name: Some("Acme".into()),
        location: Some("Berlin".into()),
        remote: false,
        employment_type: Some("full-time".into()),
        seniority: Some("senior".into()),
        currency: Some("EUR".into()),
        salary_min: Some(70_000.0),
        salary_max: Some(90_000.0),
        tags: Some(serde_json::json!(["go", "rust"])),
        language: Some("de".into()),
        posted_at: Some(Utc.with_ymd_and_hms(2025, 10, 28, 9, 30, 0).unwrap()),
        description_html: Some("<p>Kubernetes</p>".into()),
        description_text: Some("Kubernetes".into()),
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn upsert_then_find_round_trips_fields() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobRepository::new(pool);

    let id = repo
        .upsert(&JobPayload::new(candidate(Some("1")), Utc::now()))
        .await
        .unwrap();
    let stored = repo
        .find_by_key("x", "1")
        .await
        .unwrap()
        .expect("Should find the job");

    assert_eq!(stored.id, id);
    assert_eq!(stored.title, "Platform Engineer");
    assert_eq!(stored.salary_min, Some(70_000.0));
    assert_eq!(stored.tags, Some(serde_json::json!(["go", "rust"])));
    assert_eq!(stored.content(), candidate(Some("1")).content());

    let company = repo.company_name(stored.company_id.unwrap()).await.unwrap();
    assert_eq!(company.as_deref(), Some("Acme"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn conflicting_upsert_overwrites_and_keeps_identity() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobRepository::new(pool);

    let first_id = repo
        .upsert(&JobPayload::new(candidate(Some("1")), Utc::now()))
        .await
        .unwrap();
    let before = repo.find_by_key("x", "1").await.unwrap().unwrap();

    let mut changed = candidate(Some("1"));
    changed.salary_min = Some(75_000.0);
    changed.company_name = Some("Acme".into());
    let second_id = repo
        .upsert(&JobPayload::new(changed, Utc::now()))
        .await
        .unwrap();
    let after = repo.find_by_key("x", "1").await.unwrap().unwrap();

    assert_eq!(first_id, second_id);
    assert_eq!(repo.count_by_source("x").await.unwrap(), 1);
    assert_eq!(after.salary_min, Some(75_000.0));
    assert_eq!(after.created_at, before.created_at);
    assert_eq!(after.company_id, before.company_id);
    assert!(after.updated_at >= before.updated_at);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn missing_external_id_never_conflicts() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobRepository::new(pool);

    for _ in 0..2 {
        repo.upsert(&JobPayload::new(candidate(None), Utc::now()))
            .await
            .unwrap();
    }
    assert_eq!(repo.count_by_source("x").await.unwrap(), 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn ingestion_detects_changes_against_postgres() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobRepository::new(pool);
    let service = IngestService::new(repo.clone(), Arc::new(TracingMetrics));

    assert_eq!(
        service.ingest(candidate(Some("1"))).await.unwrap(),
        IngestOutcome::Inserted
    );
    assert_eq!(
        service.ingest(candidate(Some("1"))).await.unwrap(),
        IngestOutcome::DroppedDuplicate
    );

    let mut raise = candidate(Some("1"));
    raise.salary_min = Some(80_000.0);
    assert_eq!(service.ingest(raise).await.unwrap(), IngestOutcome::Updated);

    assert_eq!(repo.count_by_source("x").await.unwrap(), 1);
    let stored = repo.find_by_key("x", "1").await.unwrap().unwrap();
    assert_eq!(stored.salary_min, Some(80_000.0));
}
