use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use jobhunter_client::{CrawlResult, Crawler, ReqwestTransport};
use jobhunter_core::config::CrawlConfig;
use jobhunter_core::ingest::IngestService;
use jobhunter_core::metrics::{MemoryMetrics, TracingMetrics};
use jobhunter_core::models::CandidateRecord;
use jobhunter_core::request::CrawlRequest;
use jobhunter_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "jobhunter", version, about = "Resilient job-listing crawler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch URLs through the dispatch pipeline (proxies, throttling, bans, retries)
    Crawl {
        /// URLs to fetch
        urls: Vec<String>,

        /// File with one URL per line
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Explicit slot for every request (defaults to the URL host)
        #[arg(long)]
        slot: Option<String>,

        /// Maximum logical requests in flight
        #[arg(short, long, default_value_t = 8)]
        concurrency: usize,

        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },

    /// Ingest a JSON-lines file of candidate job records into PostgreSQL
    Ingest {
        /// Path to the .jsonl file
        file: PathBuf,

        /// Records ingested concurrently
        #[arg(short, long, default_value_t = 4)]
        concurrency: usize,
    },

    /// Run pending database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("jobhunter=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Crawl {
            urls,
            file,
            slot,
            concurrency,
            timeout,
        } => {
            let mut urls = urls;
            if let Some(path) = file {
                urls.extend(read_urls(&path)?);
            }
            cmd_crawl(urls, slot, concurrency, Duration::from_secs(timeout)).await?;
        }
        Commands::Ingest { file, concurrency } => {
            let db = connect_db().await?;
            cmd_ingest(&file, concurrency, &db).await?;
        }
        Commands::Migrate => {
            connect_db().await?;
            println!("Migrations applied");
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

/// Non-empty, non-comment lines of a URL list file.
fn read_urls(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL file: {}", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect())
}

async fn cmd_crawl(
    urls: Vec<String>,
    slot: Option<String>,
    concurrency: usize,
    timeout: Duration,
) -> Result<()> {
    anyhow::ensure!(!urls.is_empty(), "No URLs given");

    let config = CrawlConfig::from_env()?;
    let metrics = MemoryMetrics::new();
    let transport = ReqwestTransport::with_timeout(timeout).context("Failed to create HTTP client")?;
    let crawler = Crawler::new(transport, &config, Arc::new(metrics.clone()));

    tracing::info!(
        urls = urls.len(),
        proxies = config.proxies.len(),
        concurrency,
        "Starting crawl"
    );

    let requests = urls
        .into_iter()
        .map(|url| {
            let request = CrawlRequest::get(url);
            match &slot {
                Some(slot) => request.with_slot(slot.clone()),
                None => request,
            }
        })
        .collect();

    let results = tokio::select! {
        results = crawler.crawl_all(requests, concurrency) => results,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping crawl");
            crawler.shutdown();
            return Ok(());
        }
    };
    crawler.shutdown();

    for result in &results {
        println!("{}", format_result(result));
    }

    println!("\nSlot delays:");
    for (slot, delay) in crawler.slot_delays() {
        println!("  {slot}: {:.2}s", delay.as_secs_f64());
    }
    println!("\nMetrics:");
    for (series, value) in metrics.snapshot() {
        println!("  {series} = {value}");
    }

    Ok(())
}

fn format_result(result: &CrawlResult) -> String {
    match &result.outcome {
        Ok(response) => format!(
            "{} {} (attempts: {})",
            response.status, result.url, result.attempts
        ),
        Err(e) => format!("ERR {} (attempts: {}): {e}", result.url, result.attempts),
    }
}

/// Parse a JSON-lines file. Blank lines are skipped; each entry keeps its
/// 1-based line number.
fn read_candidates(path: &Path) -> Result<Vec<(usize, Result<CandidateRecord, serde_json::Error>)>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read candidates file: {}", path.display()))?;
    Ok(contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| (i + 1, serde_json::from_str::<CandidateRecord>(line)))
        .collect())
}

async fn cmd_ingest(path: &Path, concurrency: usize, db: &Database) -> Result<()> {
    let entries = read_candidates(path)?;
    let service = IngestService::new(db.job_repo(), Arc::new(TracingMetrics));

    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut parsed = Vec::new();
    for (line, entry) in entries {
        match entry {
            Ok(candidate) => parsed.push(candidate),
            Err(e) => {
                tracing::warn!(line, error = %e, "Skipping unparseable record");
                *counts.entry("unparseable").or_default() += 1;
            }
        }
    }

    let outcomes: Vec<_> = futures::stream::iter(parsed)
        .map(|candidate| service.ingest(candidate))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    for outcome in outcomes {
        let label = match outcome {
            Ok(outcome) => outcome.as_str(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist record");
                "failed"
            }
        };
        *counts.entry(label).or_default() += 1;
    }

    println!("Ingested {}:", path.display());
    for (label, count) in &counts {
        println!("  {label}: {count}");
    }
    Ok(())
}
