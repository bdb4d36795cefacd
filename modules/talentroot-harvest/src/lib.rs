//! The talentroot harvest engine: per-source rate limiting and proxy
//! rotation, job lifecycle and workers, deduplication, quality scoring, and
//! report generation. Persistence lives in `talentroot-store`; fetch and
//! field extraction are black-box adapters behind the traits in `fetch`.

pub mod dedup;
pub mod enrich;
pub mod fetch;
pub mod jobs;
pub mod logsink;
pub mod proxy;
pub mod quality;
pub mod ratelimit;
pub mod registry;
pub mod report;
pub mod stats;

#[cfg(any(test, feature = "test-support"))]
pub mod fixtures;

pub use dedup::{ConflictPolicy, DedupEngine, DedupOutcome};
pub use fetch::{Extractor, Fetcher, HttpFetcher, JsonExtractor};
pub use jobs::{JobController, JobProgressView, NewJob, Worker, WorkerConfig};
pub use logsink::{LogSink, PipelineEvent, RetentionPolicy};
pub use ratelimit::{RateLimiter, Reservation};
pub use registry::{HealthPolicy, ProxyLease, SourceRegistry};
pub use report::{compare_reports, ReportConfig, ReportGenerator};
pub use stats::HarvestStats;
