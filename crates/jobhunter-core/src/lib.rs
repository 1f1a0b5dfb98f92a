pub mod ban;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod identity;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod proxy_pool;
pub mod request;
pub mod retry;
pub mod slots;
pub mod throttle;
pub mod traits;

#[cfg(test)]
pub mod testutil;

pub use config::CrawlConfig;
pub use dispatch::{DispatchPipeline, ExceptionAction, RequestDisposition, ResponseAction};
pub use error::AppError;
pub use gate::DispatchGate;
pub use ingest::{IngestOutcome, IngestService};
pub use metrics::{MemoryMetrics, MetricsSink, TracingMetrics};
pub use models::{CandidateRecord, JobPayload, PersistedJob, compute_hash};
pub use request::{CrawlRequest, CrawlResponse};
pub use traits::{DispatchController, JobStore, Transport};
