use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// SQL migration statements, executed one at a time.
const MIGRATIONS: &[&str] = &[
    // 20251028000001_initial.sql
    r#"CREATE EXTENSION IF NOT EXISTS pgcrypto"#,
    r#"CREATE TABLE IF NOT EXISTS companies (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        name VARCHAR(255) NOT NULL UNIQUE,
        website VARCHAR(512),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS jobs (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        external_id VARCHAR(128),
        source VARCHAR(64) NOT NULL,
        source_url VARCHAR(1024) NOT NULL,
        title VARCHAR(512) NOT NULL,
        description_html TEXT,
        description_text TEXT,
        company_id UUID REFERENCES companies(id) ON DELETE SET NULL,
        location VARCHAR(256),
        remote BOOLEAN NOT NULL DEFAULT FALSE,
        employment_type VARCHAR(64),
        seniority VARCHAR(32),
        currency VARCHAR(3),
        salary_min NUMERIC(12, 2),
        salary_max NUMERIC(12, 2),
        tags JSONB,
        language VARCHAR(5),
        posted_at TIMESTAMPTZ,
        scraped_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT uq_jobs_source_external UNIQUE (source, external_id)
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_source ON jobs(source)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_external_id ON jobs(external_id)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_posted_at ON jobs(posted_at)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_scraped_at ON jobs(scraped_at)"#,
];

/// Spins up a PostgreSQL container and returns a connected pool.
///
/// The `ContainerAsync` must be kept in scope for the test duration;
/// dropping it stops the container.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "jobhunter_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/jobhunter_test");

    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to database after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    for migration in MIGRATIONS {
        sqlx::query(migration)
            .execute(&pool)
            .await
            .expect("Failed to run migration");
    }

    (pool, container)
}
