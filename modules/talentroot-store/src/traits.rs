use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use talentroot_common::{
    CVRecord, ExperienceLevel, Job, JobStatus, LogEntry, Operation, QualityReport, RecordStatus,
    ReportScope, Result, Source,
};

// --- Query types ---

#[derive(Debug, Clone, Default)]
pub struct RecordFilters {
    pub status: Option<RecordStatus>,
    pub source_id: Option<Uuid>,
    pub experience_level: Option<ExperienceLevel>,
    /// All listed skills must be present.
    pub skills: Vec<String>,
    pub min_quality: Option<f32>,
    pub scraped_from: Option<DateTime<Utc>>,
    pub scraped_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordPage {
    pub records: Vec<CVRecord>,
    pub total: u64,
    pub offset: u64,
}

/// Result of the guarded insert: either the record went in as a new
/// canonical, or a canonical with the same fingerprint already exists and
/// the caller must reconcile against it.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted,
    FingerprintConflict(Box<CVRecord>),
}

// --- Store traits ---

#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn upsert(&self, source: &Source) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Source>>;
    async fn list(&self) -> Result<Vec<Source>>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Job>>;
    /// Full-row update: status, progress, per-source states, errors, timing.
    async fn update(&self, job: &Job) -> Result<()>;
    /// Cheap status read for cooperative pause/cancel polling.
    async fn status(&self, id: Uuid) -> Result<Option<JobStatus>>;
    /// Atomically claim the highest-priority queued job for this worker.
    /// No two workers may claim the same job.
    async fn claim_next_queued(&self, worker_id: &str) -> Result<Option<Job>>;
    /// Re-claim a running job nobody has touched for `stale_secs`: a
    /// crashed or resumed job. The claimer continues from its checkpoint.
    async fn reclaim_stale_running(&self, worker_id: &str, stale_secs: u64)
        -> Result<Option<Job>>;
    /// Scheduled jobs whose next_run has passed.
    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Job>>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert-then-reconcile entry point: enforces one canonical record per
    /// fingerprint via the store's unique constraint.
    async fn insert(&self, record: &CVRecord) -> Result<InsertOutcome>;
    async fn get(&self, id: Uuid) -> Result<Option<CVRecord>>;
    async fn update(&self, record: &CVRecord) -> Result<()>;
    async fn find_canonical_by_fingerprint(&self, fingerprint: &str) -> Result<Option<CVRecord>>;
    async fn find_canonical_by_email(&self, normalized_email: &str) -> Result<Option<CVRecord>>;
    async fn find_canonical_by_phone(&self, normalized_phone: &str) -> Result<Option<CVRecord>>;
    /// Canonical records sharing a coarse name key, for fuzzy matching.
    async fn candidates_by_name_key(&self, name_key: &str) -> Result<Vec<CVRecord>>;
    async fn query(&self, filters: &RecordFilters, page: Pagination) -> Result<RecordPage>;
    /// Records whose quality was last scored before the cutoff (batch re-score).
    async fn scored_before(&self, cutoff: DateTime<Utc>, limit: u32) -> Result<Vec<CVRecord>>;
    /// Every record in a report scope, duplicates included.
    async fn all_in_scope(&self, scope: &ReportScope) -> Result<Vec<CVRecord>>;
}

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append(&self, entry: &LogEntry) -> Result<()>;
    /// Delete entries past retention. Debug/info use the short window,
    /// warn/error/fatal the long one. Returns rows deleted.
    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        short_retention_days: i64,
        long_retention_days: i64,
    ) -> Result<u64>;
    async fn for_job(&self, job_id: Uuid, limit: u32) -> Result<Vec<LogEntry>>;
    /// Error-level entries for one operation within a report scope.
    async fn count_errors_in_scope(&self, scope: &ReportScope, operation: Operation)
        -> Result<u64>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn insert(&self, report: &QualityReport) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<QualityReport>>;
    /// Most recent reports generated before `before`, newest first.
    async fn prior_reports(&self, before: DateTime<Utc>, limit: u32)
        -> Result<Vec<QualityReport>>;
}
