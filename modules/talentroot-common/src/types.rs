use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Source configuration ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    JobBoard,
    Aggregator,
    SocialNetwork,
    CompanySite,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::JobBoard => write!(f, "job_board"),
            SourceType::Aggregator => write!(f, "aggregator"),
            SourceType::SocialNetwork => write!(f, "social_network"),
            SourceType::CompanySite => write!(f, "company_site"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Active,
    Disabled,
    Maintenance,
    Error,
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceStatus::Active => "active",
            SourceStatus::Disabled => "disabled",
            SourceStatus::Maintenance => "maintenance",
            SourceStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// 3-state source health driven by consecutive success/failure streaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Proxy selection strategy. Exactly one governs a source at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    RoundRobin,
    Random,
    LeastUsed,
    Performance,
}

/// What to do with a request that would exceed the rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Delay the caller until the window resets.
    Wait,
    /// Reject with a retry-after hint.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub max_per_minute: u32,
    pub max_per_hour: u32,
    pub max_per_day: u32,
    /// Minimum delay between consecutive requests.
    pub min_delay_ms: u64,
    /// Random jitter added on top of min_delay (0..jitter_ms).
    pub jitter_ms: u64,
    /// Requests allowed to skip the min-delay back to back.
    pub burst_size: u32,
    /// Cooldown once the burst allowance is spent.
    pub burst_cooldown_secs: u64,
    pub overflow: OverflowPolicy,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_per_minute: 10,
            max_per_hour: 300,
            max_per_day: 2000,
            min_delay_ms: 1000,
            jitter_ms: 250,
            burst_size: 3,
            burst_cooldown_secs: 60,
            overflow: OverflowPolicy::Wait,
        }
    }
}

/// Proxy cooldown configuration, owned by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyPolicy {
    /// Consecutive failures before a proxy enters cooldown.
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for ProxyPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proxy {
    pub url: String,
    pub active: bool,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub avg_response_ms: f64,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl Proxy {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            active: true,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            avg_response_ms: 0.0,
            cooldown_until: None,
        }
    }

    pub fn total_attempts(&self) -> u64 {
        self.success_count + self.failure_count
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.total_attempts();
        if total == 0 {
            // No history yet: treat as promising rather than dead.
            return 1.0;
        }
        self.success_count as f64 / total as f64
    }

    pub fn is_cooling(&self, now: DateTime<Utc>) -> bool {
        matches!(self.cooldown_until, Some(until) if until > now)
    }

    /// Update counters and the rolling response-time average after a request.
    pub fn record(&mut self, success: bool, response_ms: u64) {
        let attempts = self.total_attempts() as f64;
        self.avg_response_ms =
            (self.avg_response_ms * attempts + response_ms as f64) / (attempts + 1.0);
        if success {
            self.success_count += 1;
            self.consecutive_failures = 0;
        } else {
            self.failure_count += 1;
            self.consecutive_failures += 1;
        }
    }
}

/// Aggregate request statistics for a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_response_ms: f64,
}

impl SourceStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_requests as f64
    }

    pub fn record(&mut self, success: bool, response_ms: u64) {
        self.avg_response_ms = (self.avg_response_ms * self.total_requests as f64
            + response_ms as f64)
            / (self.total_requests + 1) as f64;
        self.total_requests += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
    }
}

/// Per-field extraction selectors handed to the external Extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSelectors {
    /// Selector for the profile list / result container.
    pub list: String,
    /// Field name → selector within one profile element.
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub source_type: SourceType,
    pub base_url: String,
    pub rate_limit: RateLimitPolicy,
    pub proxies: Vec<Proxy>,
    pub rotation: RotationStrategy,
    pub proxy_policy: ProxyPolicy,
    /// Whether a direct connection is permitted when no proxy qualifies.
    pub allow_direct: bool,
    pub status: SourceStatus,
    pub health: HealthState,
    pub maintenance_until: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub stats: SourceStats,
    pub selectors: SourceSelectors,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    pub fn new(name: impl Into<String>, source_type: SourceType, base_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            source_type,
            base_url: base_url.into(),
            rate_limit: RateLimitPolicy::default(),
            proxies: Vec::new(),
            rotation: RotationStrategy::RoundRobin,
            proxy_policy: ProxyPolicy::default(),
            allow_direct: true,
            status: SourceStatus::Active,
            health: HealthState::Healthy,
            maintenance_until: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
            stats: SourceStats::default(),
            selectors: SourceSelectors::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A source is available unless disabled, in error, or inside an
    /// unexpired maintenance window.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SourceStatus::Disabled | SourceStatus::Error => false,
            SourceStatus::Maintenance => {
                // An expired window means the operator forgot to flip it back.
                matches!(self.maintenance_until, Some(until) if until <= now)
            }
            SourceStatus::Active => true,
        }
    }
}

// --- Jobs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Full harvest of one or more sources.
    Harvest,
    /// Re-fetch known records for freshness.
    Refresh,
    /// Batch quality re-scoring (no fetching).
    Rescore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// The job lifecycle graph. Anything not listed here is an invalid
    /// transition and must be rejected without side effects.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Cancelled)
                | (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Status of one (job, source) pair, independent of the job's overall status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl SourceRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SourceRunStatus::Completed | SourceRunStatus::Failed | SourceRunStatus::Skipped
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRunStats {
    pub pages_done: u32,
    pub records_fetched: u64,
    pub records_saved: u64,
    pub duplicates: u64,
    pub flagged_for_review: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSourceState {
    pub source_id: Uuid,
    pub status: SourceRunStatus,
    pub stats: SourceRunStats,
    /// Last fully-processed page; a restarted worker resumes after it.
    pub checkpoint_page: u32,
    pub error: Option<String>,
}

impl JobSourceState {
    pub fn new(source_id: Uuid) -> Self {
        Self {
            source_id,
            status: SourceRunStatus::Pending,
            stats: SourceRunStats::default(),
            checkpoint_page: 0,
            error: None,
        }
    }
}

/// Page-level progress with a rolling per-page timing average for the ETA.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub current_page: u32,
    pub total_pages: u32,
    pub avg_page_ms: f64,
    pub pages_timed: u32,
}

impl JobProgress {
    pub fn percent(&self) -> f32 {
        if self.total_pages == 0 {
            return 0.0;
        }
        (self.current_page as f32 / self.total_pages as f32 * 100.0).min(100.0)
    }

    pub fn record_page(&mut self, elapsed_ms: u64) {
        self.avg_page_ms = (self.avg_page_ms * self.pages_timed as f64 + elapsed_ms as f64)
            / (self.pages_timed + 1) as f64;
        self.pages_timed += 1;
        self.current_page += 1;
    }

    /// Estimated seconds remaining, None until at least one page is timed.
    pub fn eta_seconds(&self) -> Option<u64> {
        if self.pages_timed == 0 || self.total_pages <= self.current_page {
            return None;
        }
        let remaining = (self.total_pages - self.current_page) as f64;
        Some((remaining * self.avg_page_ms / 1000.0).round() as u64)
    }
}

// --- Error classification and aggregation ---

/// Coarse error taxonomy used for retry decisions and bounded aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Connection,
    ServerError,
    RateLimited,
    ProxyFailure,
    AuthError,
    NotFound,
    ParseError,
    ValidationError,
    Other,
}

impl ErrorKind {
    /// Transient errors are retried with backoff; permanent ones count
    /// toward the job's failure tolerance immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::Connection
                | ErrorKind::ServerError
                | ErrorKind::RateLimited
                | ErrorKind::ProxyFailure
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Connection => "connection",
            ErrorKind::ServerError => "server_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ProxyFailure => "proxy_failure",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// One aggregated error group: count + last occurrence + one sample message.
/// Individual occurrences are not stored, which bounds storage under failure
/// storms; the full detail lives in the log stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorGroup {
    pub kind: ErrorKind,
    pub count: u64,
    pub last_seen: DateTime<Utc>,
    pub sample: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub groups: Vec<ErrorGroup>,
}

impl ErrorSummary {
    pub fn record(&mut self, kind: ErrorKind, message: &str, now: DateTime<Utc>) {
        match self.groups.iter_mut().find(|g| g.kind == kind) {
            Some(group) => {
                group.count += 1;
                group.last_seen = now;
            }
            None => self.groups.push(ErrorGroup {
                kind,
                count: 1,
                last_seen: now,
                sample: message.to_string(),
            }),
        }
    }

    pub fn total(&self) -> u64 {
        self.groups.iter().map(|g| g.count).sum()
    }

    pub fn count_for(&self, kind: ErrorKind) -> u64 {
        self.groups
            .iter()
            .find(|g| g.kind == kind)
            .map(|g| g.count)
            .unwrap_or(0)
    }
}

// --- Job aggregate ---

/// Optional recurrence: re-queue the job every `interval_hours`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSchedule {
    pub interval_hours: u32,
    pub next_run: DateTime<Utc>,
}

/// Record filters applied at fetch time (query construction is up to the
/// external fetcher; these are passed through).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilters {
    pub keywords: Vec<String>,
    pub locations: Vec<String>,
    pub updated_since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Fraction of sources allowed to fail before the job itself fails.
    pub failure_tolerance: f32,
    /// Max fetch attempts per page for transient errors.
    pub max_attempts: u32,
    pub request_timeout_secs: u64,
    /// Overall wall-clock budget; the job auto-fails past it.
    pub wall_clock_budget_secs: u64,
    pub filters: JobFilters,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            failure_tolerance: 0.5,
            max_attempts: 3,
            request_timeout_secs: 30,
            wall_clock_budget_secs: 4 * 3600,
            filters: JobFilters::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub sources: Vec<JobSourceState>,
    pub progress: JobProgress,
    pub errors: ErrorSummary,
    pub config: JobConfig,
    pub schedule: Option<JobSchedule>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(job_type: JobType, source_ids: &[Uuid], config: JobConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type,
            priority: JobPriority::Normal,
            status: JobStatus::Pending,
            sources: source_ids.iter().map(|id| JobSourceState::new(*id)).collect(),
            progress: JobProgress::default(),
            errors: ErrorSummary::default(),
            config,
            schedule: None,
            created_at: Utc::now(),
            started_at: None,
            paused_at: None,
            resumed_at: None,
            cancelled_at: None,
            completed_at: None,
        }
    }

    pub fn source_state(&self, source_id: Uuid) -> Option<&JobSourceState> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }

    pub fn source_state_mut(&mut self, source_id: Uuid) -> Option<&mut JobSourceState> {
        self.sources.iter_mut().find(|s| s.source_id == source_id)
    }

    pub fn failed_fraction(&self) -> f32 {
        if self.sources.is_empty() {
            return 0.0;
        }
        let failed = self
            .sources
            .iter()
            .filter(|s| s.status == SourceRunStatus::Failed)
            .count();
        failed as f32 / self.sources.len() as f32
    }

    /// The job's terminal status is a pure function of its per-source
    /// sub-statuses and the failure tolerance, never decided ad hoc.
    pub fn resolve_terminal(&self) -> JobStatus {
        if self.failed_fraction() <= self.config.failure_tolerance {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        }
    }

    pub fn wall_clock_exceeded(&self, now: DateTime<Utc>) -> bool {
        match self.started_at {
            Some(started) => {
                (now - started).num_seconds() as u64 >= self.config.wall_clock_budget_secs
            }
            None => false,
        }
    }
}

// --- Log entries ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Fetch,
    Parse,
    Extract,
    Validate,
    Save,
    Retry,
    RateLimit,
    ProxySwitch,
    Dedup,
    HealthCheck,
    Report,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operation::Fetch => "fetch",
            Operation::Parse => "parse",
            Operation::Extract => "extract",
            Operation::Validate => "validate",
            Operation::Save => "save",
            Operation::Retry => "retry",
            Operation::RateLimit => "rate_limit",
            Operation::ProxySwitch => "proxy_switch",
            Operation::Dedup => "dedup",
            Operation::HealthCheck => "health_check",
            Operation::Report => "report",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Debug/info expire on the short retention schedule; warn and above
    /// keep the long one.
    pub fn short_retention(&self) -> bool {
        matches!(self, LogLevel::Debug | LogLevel::Info)
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        };
        write!(f, "{s}")
    }
}

/// One append-only pipeline event. Auto-expires per retention policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub job_id: Option<Uuid>,
    pub source_id: Option<Uuid>,
    pub operation: Operation,
    pub level: LogLevel,
    /// URL or external record id the operation targeted.
    pub target: Option<String>,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
    /// Retry attempt number, 0 for first tries.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

// --- CV records ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    New,
    Processed,
    Validated,
    Enriched,
    Duplicate,
    Archived,
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordStatus::New => "new",
            RecordStatus::Processed => "processed",
            RecordStatus::Validated => "validated",
            RecordStatus::Enriched => "enriched",
            RecordStatus::Duplicate => "duplicate",
            RecordStatus::Archived => "archived",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceEntry {
    pub title: String,
    pub company: String,
    pub start: Option<NaiveDate>,
    /// None = current position.
    pub end: Option<NaiveDate>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EducationEntry {
    pub institution: String,
    pub degree: Option<String>,
    pub field: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    Entry,
    Mid,
    Senior,
    Lead,
    Executive,
}

impl std::fmt::Display for ExperienceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExperienceLevel::Entry => "entry",
            ExperienceLevel::Mid => "mid",
            ExperienceLevel::Senior => "senior",
            ExperienceLevel::Lead => "lead",
            ExperienceLevel::Executive => "executive",
        };
        write!(f, "{s}")
    }
}

/// Annual compensation estimate in whole currency units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationBand {
    pub low: u32,
    pub high: u32,
    pub currency: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub experience_level: Option<ExperienceLevel>,
    pub compensation_band: Option<CompensationBand>,
    pub insights: Vec<String>,
    pub enriched_at: Option<DateTime<Utc>>,
}

/// Dedup bookkeeping embedded in the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupState {
    /// Normalized identity hash used for O(1) candidate lookup.
    pub fingerprint: String,
    /// Set iff this record lost a merge. At most one pointer, never a chain.
    pub duplicate_of: Option<Uuid>,
    pub confidence: Option<f32>,
    pub matched_fields: Vec<String>,
    /// Below-threshold match held for manual review; the record stays
    /// canonical until a reviewer decides.
    pub flagged_candidate: Option<Uuid>,
    pub last_checked: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityState {
    /// 0-100 weighted field presence.
    pub completeness: f32,
    /// 0-100, decays with days since scrape.
    pub freshness: f32,
    /// Mean of completeness and freshness. Validation accuracy is tracked
    /// in validation_errors but intentionally not folded in.
    pub overall: f32,
    pub validation_errors: Vec<String>,
    pub scored_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CVRecord {
    pub id: Uuid,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub normalized_email: Option<String>,
    pub normalized_phone: Option<String>,
    pub normalized_name: String,
    pub headline: Option<String>,
    pub summary: Option<String>,
    pub experience: Vec<ExperienceEntry>,
    pub education: Vec<EducationEntry>,
    pub skills: Vec<String>,
    pub keywords: Vec<String>,
    // Provenance
    pub source_id: Uuid,
    pub external_id: String,
    pub url: Option<String>,
    pub scraped_at: DateTime<Utc>,
    pub raw: serde_json::Value,
    /// Set-union of every source ever merged into this record.
    pub additional_sources: Vec<Uuid>,
    pub dedup: DedupState,
    pub quality: QualityState,
    pub enrichment: Enrichment,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CVRecord {
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.scraped_at).num_days()
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.age_days(now) <= FRESHNESS_MAX_DAYS
    }

    /// Identity plus at least one structured section present.
    pub fn has_complete_data(&self) -> bool {
        !self.full_name.is_empty()
            && (self.email.is_some() || self.phone.is_some())
            && !self.experience.is_empty()
            && !self.skills.is_empty()
    }

    pub fn current_position(&self) -> Option<&ExperienceEntry> {
        self.experience
            .iter()
            .find(|e| e.end.is_none())
            .or_else(|| self.experience.first())
    }
}

/// Records older than this many days are no longer considered fresh.
pub const FRESHNESS_MAX_DAYS: i64 = 30;

/// Coarse blocking key for fuzzy-name candidate lookup: last name token
/// plus first initial. Narrow enough to keep candidate sets small, wide
/// enough to survive middle names and initials.
pub fn name_key(normalized_name: &str) -> String {
    let mut tokens = normalized_name.split_whitespace();
    let first = tokens.next().unwrap_or("");
    let last = tokens.last().unwrap_or(first);
    let initial = first.chars().next().map(String::from).unwrap_or_default();
    format!("{last}:{initial}")
}

/// SHA-256 over a normalized identity string, hex-encoded.
pub fn identity_fingerprint(
    normalized_email: Option<&str>,
    normalized_phone: Option<&str>,
    normalized_name: &str,
) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(normalized_email.unwrap_or(""));
    hasher.update("|");
    hasher.update(normalized_phone.unwrap_or(""));
    hasher.update("|");
    hasher.update(normalized_name);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- job status transitions ---

    #[test]
    fn legal_lifecycle_paths() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Running));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Paused.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use JobStatus::*;
        for terminal in [Completed, Failed, Cancelled] {
            for next in [Pending, Queued, Running, Paused, Completed, Failed, Cancelled] {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal} -> {next} should be rejected"
                );
            }
        }
    }

    #[test]
    fn cannot_resume_a_non_paused_job() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
    }

    // --- terminal roll-up ---

    #[test]
    fn one_failed_source_of_three_within_tolerance_completes() {
        let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let mut job = Job::new(JobType::Harvest, &ids, JobConfig::default());
        job.sources[0].status = SourceRunStatus::Failed;
        job.sources[1].status = SourceRunStatus::Completed;
        job.sources[2].status = SourceRunStatus::Completed;
        assert_eq!(job.resolve_terminal(), JobStatus::Completed);
    }

    #[test]
    fn majority_failure_over_tolerance_fails() {
        let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let mut job = Job::new(JobType::Harvest, &ids, JobConfig::default());
        job.sources[0].status = SourceRunStatus::Failed;
        job.sources[1].status = SourceRunStatus::Failed;
        job.sources[2].status = SourceRunStatus::Completed;
        assert_eq!(job.resolve_terminal(), JobStatus::Failed);
    }

    // --- progress / ETA ---

    #[test]
    fn eta_uses_rolling_page_average() {
        let mut p = JobProgress {
            total_pages: 10,
            ..Default::default()
        };
        p.record_page(2000);
        p.record_page(4000);
        assert_eq!(p.current_page, 2);
        assert!((p.avg_page_ms - 3000.0).abs() < 1e-9);
        // 8 pages left at 3s each
        assert_eq!(p.eta_seconds(), Some(24));
    }

    #[test]
    fn eta_unknown_before_first_page() {
        let p = JobProgress {
            total_pages: 5,
            ..Default::default()
        };
        assert_eq!(p.eta_seconds(), None);
    }

    // --- error aggregation ---

    #[test]
    fn error_storm_stays_bounded_per_kind() {
        let mut summary = ErrorSummary::default();
        let now = Utc::now();
        for i in 0..1000 {
            summary.record(ErrorKind::Timeout, &format!("timeout #{i}"), now);
        }
        summary.record(ErrorKind::AuthError, "401 unauthorized", now);
        assert_eq!(summary.groups.len(), 2);
        assert_eq!(summary.count_for(ErrorKind::Timeout), 1000);
        // Sample keeps the first representative message
        assert_eq!(summary.groups[0].sample, "timeout #0");
    }

    #[test]
    fn transient_classification() {
        assert!(ErrorKind::Timeout.is_transient());
        assert!(ErrorKind::ServerError.is_transient());
        assert!(!ErrorKind::AuthError.is_transient());
        assert!(!ErrorKind::NotFound.is_transient());
        assert!(!ErrorKind::ParseError.is_transient());
    }

    // --- proxies ---

    #[test]
    fn proxy_rolling_average_and_streaks() {
        let mut proxy = Proxy::new("http://10.0.0.1:8080");
        proxy.record(true, 100);
        proxy.record(false, 300);
        assert!((proxy.avg_response_ms - 200.0).abs() < 1e-9);
        assert_eq!(proxy.consecutive_failures, 1);
        proxy.record(true, 200);
        assert_eq!(proxy.consecutive_failures, 0);
        assert!((proxy.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    // --- source availability ---

    #[test]
    fn maintenance_window_blocks_until_expiry() {
        let now = Utc::now();
        let mut source = Source::new("board", SourceType::JobBoard, "https://example.com");
        source.status = SourceStatus::Maintenance;
        source.maintenance_until = Some(now + chrono::Duration::hours(1));
        assert!(!source.is_available(now));
        source.maintenance_until = Some(now - chrono::Duration::minutes(1));
        assert!(source.is_available(now));
    }

    #[test]
    fn error_status_removes_source_from_selection() {
        let mut source = Source::new("board", SourceType::JobBoard, "https://example.com");
        source.status = SourceStatus::Error;
        assert!(!source.is_available(Utc::now()));
    }

    // --- fingerprint ---

    #[test]
    fn fingerprint_deterministic() {
        let a = identity_fingerprint(Some("a@x.com"), None, "jane doe");
        let b = identity_fingerprint(Some("a@x.com"), None, "jane doe");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_distinguishes_field_positions() {
        // Email "ab" + empty phone must differ from empty email + phone "ab".
        let a = identity_fingerprint(Some("ab"), None, "x");
        let b = identity_fingerprint(None, Some("ab"), "x");
        assert_ne!(a, b);
    }

    #[test]
    fn name_key_survives_middle_names() {
        assert_eq!(name_key("jane doe"), "doe:j");
        assert_eq!(name_key("jane m doe"), "doe:j");
        assert_eq!(name_key("cher"), "cher:c");
    }
}
