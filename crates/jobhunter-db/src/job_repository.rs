use chrono::{DateTime, Utc};
use jobhunter_core::error::AppError;
use jobhunter_core::models::{JobPayload, PersistedJob};
use jobhunter_core::traits::JobStore;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

const JOB_COLUMNS: &str = r#"
    id, source, external_id, source_url, title, company_id, location, remote,
    employment_type, seniority, currency,
    salary_min::float8 AS salary_min, salary_max::float8 AS salary_max,
    tags, language, posted_at, description_html, description_text,
    scraped_at, created_at, updated_at
"#;

/// PostgreSQL job store keyed by `(source, external_id)`.
#[derive(Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_key(
        &self,
        source: &str,
        external_id: &str,
    ) -> Result<Option<PersistedJob>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE source = $1 AND external_id = $2"
        ))
        .bind(source)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    /// Insert a job, or overwrite every non-key column of the row with the
    /// same `(source, external_id)`. `created_at` is never touched.
    ///
    /// The company named by the record is created on first sight.
    pub async fn upsert(&self, payload: &JobPayload) -> Result<Uuid, AppError> {
        let record = &payload.record;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let company_id = match record
            .company_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
        {
            Some(name) => Some(get_or_create_company(&mut tx, name).await?),
            None => None,
        };

        let row: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO jobs (
                source, external_id, source_url, title, company_id, location, remote,
                employment_type, seniority, currency, salary_min, salary_max,
                tags, language, posted_at, description_html, description_text, scraped_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11::numeric, $12::numeric,
                    $13, $14, $15, $16, $17, $18)
            ON CONFLICT (source, external_id) DO UPDATE SET
                source_url = EXCLUDED.source_url,
                title = EXCLUDED.title,
                company_id = EXCLUDED.company_id,
                location = EXCLUDED.location,
                remote = EXCLUDED.remote,
                employment_type = EXCLUDED.employment_type,
                seniority = EXCLUDED.seniority,
                currency = EXCLUDED.currency,
                salary_min = EXCLUDED.salary_min,
                salary_max = EXCLUDED.salary_max,
                tags = EXCLUDED.tags,
                language = EXCLUDED.language,
                posted_at = EXCLUDED.posted_at,
                description_html = EXCLUDED.description_html,
                description_text = EXCLUDED.description_text,
                scraped_at = EXCLUDED.scraped_at,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(&record.source)
        .bind(&record.external_id)
        .bind(&record.source_url)
        .bind(&record.title)
        .bind(company_id)
        .bind(&record.location)
        .bind(record.remote)
        .bind(&record.employment_type)
        .bind(&record.seniority)
        .bind(&record.currency)
        .bind(record.salary_min)
        .bind(record.salary_max)
        .bind(&record.tags)
        .bind(&record.language)
        .bind(record.posted_at)
        .bind(&record.description_html)
        .bind(&record.description_text)
        .bind(payload.scraped_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(row.0)
    }

    /// Number of stored jobs for `source`.
    pub async fn count_by_source(&self, source: &str) -> Result<i64, AppError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE source = $1")
            .bind(source)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(row.0)
    }

    /// Name of a company by id.
    pub async fn company_name(&self, id: Uuid) -> Result<Option<String>, AppError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT name FROM companies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(row.map(|r| r.0))
    }
}

async fn get_or_create_company(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
) -> Result<Uuid, AppError> {
    // The no-op update makes RETURNING yield the existing row on conflict;
    // xmax is 0 only for a freshly inserted row.
    let (id, inserted): (Uuid, bool) = sqlx::query_as(
        r#"
        INSERT INTO companies (name) VALUES ($1)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id, (xmax = 0) AS inserted
        "#,
    )
    .bind(name)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(e.to_string()))?;
    if inserted {
        tracing::debug!(company = %name, %id, "Company created");
    }
    Ok(id)
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    source: String,
    external_id: Option<String>,
    source_url: String,
    title: String,
    company_id: Option<Uuid>,
    location: Option<String>,
    remote: bool,
    employment_type: Option<String>,
    seniority: Option<String>,
    currency: Option<String>,
    salary_min: Option<f64>,
    salary_max: Option<f64>,
    tags: Option<serde_json::Value>,
    language: Option<String>,
    posted_at: Option<DateTime<Utc>>,
    description_html: Option<String>,
    description_text: Option<String>,
    scraped_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<JobRow> for PersistedJob {
    fn from(row: JobRow) -> Self {
        PersistedJob {
            id: row.id,
            source: row.source,
            external_id: row.external_id,
            source_url: row.source_url,
            title: row.title,
            company_id: row.company_id,
            location: row.location,
            remote: row.remote,
            employment_type: row.employment_type,
            seniority: row.seniority,
            currency: row.currency,
            salary_min: row.salary_min,
            salary_max: row.salary_max,
            tags: row.tags,
            language: row.language,
            posted_at: row.posted_at,
            description_html: row.description_html,
            description_text: row.description_text,
            scraped_at: row.scraped_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

// -- Trait implementation --

impl JobStore for JobRepository {
    async fn find_by_key(
        &self,
        source: &str,
        external_id: &str,
    ) -> Result<Option<PersistedJob>, AppError> {
        JobRepository::find_by_key(self, source, external_id).await
    }

    async fn upsert(&self, payload: &JobPayload) -> Result<(), AppError> {
        JobRepository::upsert(self, payload).await.map(|_| ())
    }
}
