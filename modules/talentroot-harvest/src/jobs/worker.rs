//! The harvest worker: claims queued jobs and runs them page by page.
//!
//! Pause and cancel are cooperative: the worker re-reads job status from
//! the store between units of work and exits cleanly, leaving a checkpoint.
//! Cancellation never rolls back records that were already ingested.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use talentroot_common::{
    CVRecord, DedupState, Enrichment, ErrorKind, Job, JobStatus, JobType, LogLevel, Operation,
    QualityState, RecordStatus, Result, Source, SourceRunStatus, TalentrootError,
};
use talentroot_store::{JobStore, RecordStore};

use crate::dedup::{normalize, DedupEngine, DedupOutcome};
use crate::enrich;
use crate::fetch::{
    classify_fetch_error, classify_status, ExtractedPage, FetchRequest, Fetcher, Extractor,
    RawProfile,
};
use crate::logsink::{LogSink, PipelineEvent};
use crate::quality;
use crate::registry::{SourceHandle, SourceRegistry};
use crate::stats::HarvestStats;

/// Fields below this extraction confidence are dropped.
const MIN_FIELD_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval_secs: u64,
    /// Running jobs untouched this long are reclaimed (crashed worker, or a
    /// resume after pause).
    pub reclaim_after_secs: u64,
    /// Base for exponential retry backoff (base * 3^attempt).
    pub retry_base_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            reclaim_after_secs: 600,
            retry_base_ms: 2000,
        }
    }
}

/// Why a source run stopped before reaching a terminal sub-status.
enum RunInterrupt {
    Paused,
    Cancelled,
    TimedOut,
}

pub struct Worker {
    id: String,
    jobs: Arc<dyn JobStore>,
    records: Arc<dyn RecordStore>,
    registry: Arc<SourceRegistry>,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    dedup: Arc<DedupEngine>,
    logs: Arc<LogSink>,
    config: WorkerConfig,
}

/// Batch size for the periodic re-score job.
const RESCORE_BATCH: u32 = 500;

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        jobs: Arc<dyn JobStore>,
        records: Arc<dyn RecordStore>,
        registry: Arc<SourceRegistry>,
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn Extractor>,
        dedup: Arc<DedupEngine>,
        logs: Arc<LogSink>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            jobs,
            records,
            registry,
            fetcher,
            extractor,
            dedup,
            logs,
            config,
        }
    }

    /// Claim-and-run loop. Stale running jobs (crashed workers, resumed
    /// jobs) are reclaimed and continued from their checkpoint.
    pub async fn run_forever(&self) -> Result<()> {
        loop {
            let claimed = match self.jobs.claim_next_queued(&self.id).await? {
                Some(job) => Some(job),
                None => {
                    self.jobs
                        .reclaim_stale_running(&self.id, self.config.reclaim_after_secs)
                        .await?
                }
            };

            match claimed {
                Some(job) => {
                    let job_id = job.id;
                    if let Err(e) = self.run_job(job).await {
                        warn!(job = %job_id, error = %e, "Job run aborted");
                    }
                }
                None => {
                    tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)).await
                }
            }
        }
    }

    /// Run one claimed job until terminal, paused, or cancelled.
    pub async fn run_job(&self, job: Job) -> Result<JobStatus> {
        // Refresh from the store so a claim made mid-flight doesn't clobber
        // controller-written fields; the doc catches up here.
        let mut job = self
            .jobs
            .get(job.id)
            .await?
            .ok_or(TalentrootError::JobNotFound(job.id))?;
        job.status = JobStatus::Running;
        if job.started_at.is_none() {
            job.started_at = Some(Utc::now());
        }
        self.jobs.update(&job).await?;
        info!(job = %job.id, worker = %self.id, sources = job.sources.len(), "Job started");

        if job.job_type == JobType::Rescore {
            return self.run_rescore(job).await;
        }

        let mut stats = HarvestStats::default();

        for idx in 0..job.sources.len() {
            // Resumed jobs skip sources that already finished.
            if job.sources[idx].status.is_terminal() {
                continue;
            }

            let source_id = job.sources[idx].source_id;
            if !self.registry.is_available(source_id) {
                job.sources[idx].status = SourceRunStatus::Skipped;
                stats.sources_skipped += 1;
                self.logs
                    .record(
                        PipelineEvent::new(Operation::Fetch, LogLevel::Warn)
                            .job(job.id)
                            .source(source_id)
                            .error("source unavailable, skipped"),
                    )
                    .await;
                self.persist_checkpoint(&job).await?;
                continue;
            }

            match self.run_source(&mut job, idx, &mut stats).await? {
                None => {
                    match job.sources[idx].status {
                        SourceRunStatus::Completed => stats.sources_completed += 1,
                        SourceRunStatus::Failed => stats.sources_failed += 1,
                        _ => {}
                    }
                    self.persist_checkpoint(&job).await?;
                }
                Some(RunInterrupt::Paused) => {
                    self.persist_checkpoint(&job).await?;
                    info!(job = %job.id, "Pause observed, worker exiting cleanly");
                    return Ok(JobStatus::Paused);
                }
                Some(RunInterrupt::Cancelled) => {
                    self.persist_checkpoint(&job).await?;
                    info!(job = %job.id, "Cancel observed, ingested records kept");
                    return Ok(JobStatus::Cancelled);
                }
                Some(RunInterrupt::TimedOut) => {
                    job.errors.record(
                        ErrorKind::Timeout,
                        "wall-clock budget exceeded",
                        Utc::now(),
                    );
                    return self.finalize(&job, JobStatus::Failed, &stats).await;
                }
            }
        }

        let terminal = job.resolve_terminal();
        self.finalize(&job, terminal, &stats).await
    }

    /// Page loop for one (job, source) pair, resuming after the checkpoint.
    async fn run_source(
        &self,
        job: &mut Job,
        idx: usize,
        stats: &mut HarvestStats,
    ) -> Result<Option<RunInterrupt>> {
        let source_id = job.sources[idx].source_id;
        let handle = self.registry.handle(source_id)?;
        let source = handle.snapshot();

        job.sources[idx].status = SourceRunStatus::Running;
        self.persist_checkpoint(job).await?;

        let fresh_start = job.sources[idx].checkpoint_page == 0;
        let mut total_for_source: Option<u32> = None;
        let mut page = job.sources[idx].checkpoint_page + 1;

        loop {
            match self.control_check(job.id).await? {
                Some(interrupt) => return Ok(Some(interrupt)),
                None => {}
            }
            if job.wall_clock_exceeded(Utc::now()) {
                return Ok(Some(RunInterrupt::TimedOut));
            }

            let page_started = Instant::now();
            let url = page_url(&source.base_url, page);

            match self.fetch_page(job, &source, &handle, &url).await {
                Ok(extracted) => {
                    stats.pages_fetched += 1;

                    if let Some(total) = extracted.total_pages {
                        if total_for_source.is_none() {
                            total_for_source = Some(total);
                            if fresh_start {
                                job.progress.total_pages += total;
                            }
                        }
                    } else {
                        // Unknown total: count pages as they appear. Resumed
                        // runs only reach pages past the checkpoint, so
                        // nothing double-counts.
                        job.progress.total_pages += 1;
                    }

                    let empty = extracted.profiles.is_empty();
                    self.process_profiles(job, idx, &source, extracted, stats)
                        .await?;

                    job.sources[idx].stats.pages_done += 1;
                    job.sources[idx].checkpoint_page = page;
                    job.progress
                        .record_page(page_started.elapsed().as_millis() as u64);
                    self.persist_checkpoint(job).await?;

                    let done = match total_for_source {
                        Some(total) => page >= total,
                        None => empty,
                    };
                    if done {
                        job.sources[idx].status = SourceRunStatus::Completed;
                        return Ok(None);
                    }
                    page += 1;
                }
                Err((kind, message)) => {
                    job.errors.record(kind, &message, Utc::now());
                    job.sources[idx].stats.errors += 1;
                    job.sources[idx].status = SourceRunStatus::Failed;
                    job.sources[idx].error = Some(message);
                    stats.fetch_errors += 1;
                    return Ok(None);
                }
            }
        }
    }

    /// Fetch and extract one page with rate limiting, proxy rotation, and
    /// retry-with-backoff for transient failures.
    async fn fetch_page(
        &self,
        job: &Job,
        source: &Source,
        handle: &SourceHandle,
        url: &str,
    ) -> std::result::Result<ExtractedPage, (ErrorKind, String)> {
        let max_attempts = job.config.max_attempts.max(1);
        let timeout = Duration::from_secs(job.config.request_timeout_secs);
        let mut previous_proxy: Option<String> = None;
        let mut last_err = (ErrorKind::Other, "no attempts made".to_string());

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let backoff =
                    Duration::from_millis(self.config.retry_base_ms) * 3u32.pow(attempt - 1);
                let jitter = Duration::from_millis(rand::rng().random_range(0..250));
                self.logs
                    .record(
                        PipelineEvent::new(Operation::Retry, LogLevel::Warn)
                            .job(job.id)
                            .source(source.id)
                            .target(url)
                            .error(last_err.1.clone())
                            .attempt(attempt),
                    )
                    .await;
                tokio::time::sleep(backoff + jitter).await;
            }

            match handle.limiter.acquire().await {
                Ok(()) => {}
                Err(TalentrootError::RateLimited { retry_after_ms }) => {
                    self.logs
                        .record(
                            PipelineEvent::new(Operation::RateLimit, LogLevel::Warn)
                                .job(job.id)
                                .source(source.id)
                                .target(url)
                                .error(format!("retry after {retry_after_ms}ms"))
                                .attempt(attempt),
                        )
                        .await;
                    last_err = (
                        ErrorKind::RateLimited,
                        format!("rate limited, retry after {retry_after_ms}ms"),
                    );
                    tokio::time::sleep(Duration::from_millis(retry_after_ms.min(60_000))).await;
                    continue;
                }
                Err(e) => return Err((ErrorKind::Other, e.to_string())),
            }

            let lease = match self.registry.next_proxy(source.id) {
                Ok(lease) => lease,
                Err(e @ TalentrootError::NoProxyAvailable(_)) => {
                    self.logs
                        .record(
                            PipelineEvent::new(Operation::ProxySwitch, LogLevel::Error)
                                .job(job.id)
                                .source(source.id)
                                .error(e.to_string()),
                        )
                        .await;
                    return Err((ErrorKind::ProxyFailure, e.to_string()));
                }
                Err(e) => return Err((ErrorKind::Other, e.to_string())),
            };
            if previous_proxy != lease.proxy_url && attempt > 0 {
                self.logs
                    .record(
                        PipelineEvent::new(Operation::ProxySwitch, LogLevel::Debug)
                            .job(job.id)
                            .source(source.id)
                            .target(lease.proxy_url.clone().unwrap_or_else(|| "direct".into()))
                            .attempt(attempt),
                    )
                    .await;
            }
            previous_proxy = lease.proxy_url.clone();

            let req = FetchRequest {
                url: url.to_string(),
                headers: Vec::new(),
                proxy: lease.proxy_url.clone(),
                timeout,
            };
            let result = match tokio::time::timeout(timeout, self.fetcher.fetch(&req)).await {
                Ok(result) => result,
                Err(_) => Err(TalentrootError::Fetch(format!(
                    "timed out after {}s",
                    timeout.as_secs()
                ))),
            };

            match result {
                Ok(resp) => {
                    let status_error = classify_status(resp.status);
                    if let Err(e) = self
                        .registry
                        .record_outcome(source.id, &lease, status_error.is_none(), resp.elapsed_ms)
                        .await
                    {
                        warn!(source = %source.id, error = %e, "Outcome write failed");
                    }
                    self.logs
                        .record(
                            PipelineEvent::new(
                                Operation::Fetch,
                                if status_error.is_none() {
                                    LogLevel::Debug
                                } else {
                                    LogLevel::Warn
                                },
                            )
                            .job(job.id)
                            .source(source.id)
                            .target(url)
                            .duration_ms(resp.elapsed_ms)
                            .attempt(attempt),
                        )
                        .await;

                    match status_error {
                        None => {
                            return match self.extractor.extract(&resp.body, &source.selectors).await
                            {
                                Ok(page) => Ok(page),
                                Err(e) => {
                                    self.logs
                                        .record(
                                            PipelineEvent::new(Operation::Extract, LogLevel::Error)
                                                .job(job.id)
                                                .source(source.id)
                                                .target(url)
                                                .error(e.to_string()),
                                        )
                                        .await;
                                    Err((ErrorKind::ParseError, e.to_string()))
                                }
                            };
                        }
                        Some(kind) if kind.is_transient() => {
                            last_err = (kind, format!("HTTP {}", resp.status));
                        }
                        Some(kind) => return Err((kind, format!("HTTP {}", resp.status))),
                    }
                }
                Err(e) => {
                    let kind = classify_fetch_error(&e);
                    if let Err(err) = self
                        .registry
                        .record_outcome(source.id, &lease, false, 0)
                        .await
                    {
                        warn!(source = %source.id, error = %err, "Outcome write failed");
                    }
                    self.logs
                        .record(
                            PipelineEvent::new(Operation::Fetch, LogLevel::Error)
                                .job(job.id)
                                .source(source.id)
                                .target(url)
                                .error(e.to_string())
                                .attempt(attempt),
                        )
                        .await;
                    if kind.is_transient() {
                        last_err = (kind, e.to_string());
                    } else {
                        return Err((kind, e.to_string()));
                    }
                }
            }
        }

        Err(last_err)
    }

    /// Normalize, score, enrich, and dedup-resolve every profile on a page.
    async fn process_profiles(
        &self,
        job: &mut Job,
        idx: usize,
        source: &Source,
        extracted: ExtractedPage,
        stats: &mut HarvestStats,
    ) -> Result<()> {
        let now = Utc::now();
        for profile in extracted.profiles {
            stats.profiles_seen += 1;
            job.sources[idx].stats.records_fetched += 1;

            let mut record = match build_record(&profile, source.id, now) {
                Ok(record) => record,
                Err(message) => {
                    job.errors.record(ErrorKind::ParseError, &message, now);
                    job.sources[idx].stats.errors += 1;
                    stats.parse_failures += 1;
                    self.logs
                        .record(
                            PipelineEvent::new(Operation::Validate, LogLevel::Warn)
                                .job(job.id)
                                .source(source.id)
                                .target(profile.external_id.clone())
                                .error(message),
                        )
                        .await;
                    continue;
                }
            };

            quality::apply(&mut record, now);
            enrich::apply(&mut record, now);
            record.status = if record.quality.validation_errors.is_empty() {
                RecordStatus::Enriched
            } else {
                RecordStatus::Processed
            };

            let record_id = record.id;
            match self.dedup.resolve(record).await? {
                DedupOutcome::Created { .. } => {
                    stats.records_created += 1;
                    job.sources[idx].stats.records_saved += 1;
                    self.logs
                        .record(
                            PipelineEvent::new(Operation::Save, LogLevel::Debug)
                                .job(job.id)
                                .source(source.id)
                                .target(record_id.to_string()),
                        )
                        .await;
                }
                DedupOutcome::Merged {
                    canonical,
                    confidence,
                    ..
                } => {
                    stats.duplicates_merged += 1;
                    job.sources[idx].stats.duplicates += 1;
                    self.logs
                        .record(
                            PipelineEvent::new(Operation::Dedup, LogLevel::Info)
                                .job(job.id)
                                .source(source.id)
                                .target(canonical.to_string())
                                .error(format!("merged at confidence {confidence:.2}")),
                        )
                        .await;
                }
                DedupOutcome::Flagged {
                    candidate,
                    confidence,
                    ..
                } => {
                    stats.flagged_for_review += 1;
                    job.sources[idx].stats.records_saved += 1;
                    job.sources[idx].stats.flagged_for_review += 1;
                    self.logs
                        .record(
                            PipelineEvent::new(Operation::Dedup, LogLevel::Warn)
                                .job(job.id)
                                .source(source.id)
                                .target(candidate.to_string())
                                .error(format!(
                                    "possible duplicate at confidence {confidence:.2}, flagged"
                                )),
                        )
                        .await;
                }
            }
        }
        Ok(())
    }

    /// Batch re-score: refresh quality (freshness decay) for every record
    /// scored before this job was created. No fetching involved.
    async fn run_rescore(&self, mut job: Job) -> Result<JobStatus> {
        let cutoff = job.created_at;
        let mut rescored = 0u64;

        loop {
            match self.control_check(job.id).await? {
                Some(RunInterrupt::Paused) => {
                    self.persist_checkpoint(&job).await?;
                    return Ok(JobStatus::Paused);
                }
                Some(RunInterrupt::Cancelled) => {
                    self.persist_checkpoint(&job).await?;
                    return Ok(JobStatus::Cancelled);
                }
                _ => {}
            }

            let batch_started = Instant::now();
            let batch = self.records.scored_before(cutoff, RESCORE_BATCH).await?;
            if batch.is_empty() {
                break;
            }
            let now = Utc::now();
            for mut record in batch {
                quality::apply(&mut record, now);
                self.records.update(&record).await?;
                rescored += 1;
            }
            job.progress.total_pages += 1;
            job.progress
                .record_page(batch_started.elapsed().as_millis() as u64);
            self.persist_checkpoint(&job).await?;
        }

        for state in &mut job.sources {
            state.status = SourceRunStatus::Completed;
        }
        self.logs
            .record(
                PipelineEvent::new(Operation::Validate, LogLevel::Info)
                    .job(job.id)
                    .target(format!("rescored {rescored} records")),
            )
            .await;
        self.finalize(&job, JobStatus::Completed, &HarvestStats::default())
            .await
    }

    /// Poll the store for a cooperative pause/cancel signal.
    async fn control_check(&self, job_id: Uuid) -> Result<Option<RunInterrupt>> {
        Ok(match self.jobs.status(job_id).await? {
            Some(JobStatus::Paused) => Some(RunInterrupt::Paused),
            Some(JobStatus::Cancelled) => Some(RunInterrupt::Cancelled),
            _ => None,
        })
    }

    /// Write progress/sub-states/errors without clobbering a status the
    /// controller may have changed underneath us.
    async fn persist_checkpoint(&self, job: &Job) -> Result<()> {
        let mut fresh = self
            .jobs
            .get(job.id)
            .await?
            .ok_or(TalentrootError::JobNotFound(job.id))?;
        fresh.sources = job.sources.clone();
        fresh.progress = job.progress.clone();
        fresh.errors = job.errors.clone();
        if fresh.started_at.is_none() {
            fresh.started_at = job.started_at;
        }
        self.jobs.update(&fresh).await
    }

    async fn finalize(
        &self,
        job: &Job,
        status: JobStatus,
        stats: &HarvestStats,
    ) -> Result<JobStatus> {
        let mut fresh = self
            .jobs
            .get(job.id)
            .await?
            .ok_or(TalentrootError::JobNotFound(job.id))?;
        fresh.sources = job.sources.clone();
        fresh.progress = job.progress.clone();
        fresh.errors = job.errors.clone();
        if fresh.status.can_transition_to(status) {
            fresh.status = status;
            fresh.completed_at = Some(Utc::now());
        }
        self.jobs.update(&fresh).await?;

        info!(job = %job.id, status = %fresh.status, "Job finished");
        info!("{stats}");
        Ok(fresh.status)
    }
}

/// Page URL for a source; keeps existing query strings intact.
pub fn page_url(base_url: &str, page: u32) -> String {
    if base_url.contains('?') {
        format!("{base_url}&page={page}")
    } else {
        format!("{base_url}?page={page}")
    }
}

/// Assemble a CVRecord from extracted field candidates. The full name is
/// the one hard requirement; its absence is a permanent parse failure.
pub fn build_record(
    profile: &RawProfile,
    source_id: Uuid,
    now: chrono::DateTime<Utc>,
) -> std::result::Result<CVRecord, String> {
    let full_name = field_str(profile, "full_name")
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| format!("profile {}: missing required field full_name", profile.external_id))?;

    let email = field_str(profile, "email");
    let phone = field_str(profile, "phone");
    let normalized_email = email.as_deref().and_then(normalize::normalize_email);
    let normalized_phone = phone.as_deref().and_then(normalize::normalize_phone);
    let normalized_name = normalize::normalize_name(&full_name);
    let fingerprint = normalize::fingerprint(
        normalized_email.as_deref(),
        normalized_phone.as_deref(),
        &normalized_name,
    );

    let experience = field_list(profile, "experience");
    let education = field_list(profile, "education");

    let raw = json!(profile
        .fields
        .iter()
        .map(|(k, v)| (k.clone(), v.value.clone()))
        .collect::<std::collections::BTreeMap<_, _>>());

    Ok(CVRecord {
        id: Uuid::new_v4(),
        full_name,
        email,
        phone,
        normalized_email,
        normalized_phone,
        normalized_name,
        headline: field_str(profile, "headline"),
        summary: field_str(profile, "summary"),
        experience,
        education,
        skills: field_strings(profile, "skills"),
        keywords: field_strings(profile, "keywords"),
        source_id,
        external_id: profile.external_id.clone(),
        url: profile.url.clone(),
        scraped_at: now,
        raw,
        additional_sources: Vec::new(),
        dedup: DedupState {
            fingerprint,
            ..DedupState::default()
        },
        quality: QualityState::default(),
        enrichment: Enrichment::default(),
        status: RecordStatus::New,
        created_at: now,
        updated_at: now,
    })
}

fn field_str(profile: &RawProfile, name: &str) -> Option<String> {
    profile
        .fields
        .get(name)
        .filter(|c| c.confidence >= MIN_FIELD_CONFIDENCE)
        .and_then(|c| c.value.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// String lists arrive either as JSON arrays or comma-separated strings.
fn field_strings(profile: &RawProfile, name: &str) -> Vec<String> {
    let Some(candidate) = profile
        .fields
        .get(name)
        .filter(|c| c.confidence >= MIN_FIELD_CONFIDENCE)
    else {
        return Vec::new();
    };
    match &candidate.value {
        serde_json::Value::Array(values) => values
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        serde_json::Value::String(s) => s
            .split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn field_list<T: serde::de::DeserializeOwned>(profile: &RawProfile, name: &str) -> Vec<T> {
    profile
        .fields
        .get(name)
        .filter(|c| c.confidence >= MIN_FIELD_CONFIDENCE)
        .and_then(|c| serde_json::from_value(c.value.clone()).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::dedup::ConflictPolicy;
    use crate::fetch::FieldCandidate;
    use crate::fixtures::{self, ScriptedExtractor, ScriptedFetcher};
    use crate::jobs::controller::{JobController, NewJob};
    use crate::logsink::RetentionPolicy;
    use crate::registry::HealthPolicy;
    use talentroot_common::{
        JobConfig, JobPriority, OverflowPolicy, RateLimitPolicy, SourceStatus, SourceType,
    };
    use talentroot_store::memory::{
        MemoryJobStore, MemoryLogStore, MemoryRecordStore, MemorySourceStore,
    };
    use talentroot_store::{RecordFilters, RecordStore, SourceStore};

    fn unlimited() -> RateLimitPolicy {
        RateLimitPolicy {
            max_per_minute: 0,
            max_per_hour: 0,
            max_per_day: 0,
            min_delay_ms: 0,
            jitter_ms: 0,
            burst_size: 0,
            burst_cooldown_secs: 0,
            overflow: OverflowPolicy::Wait,
        }
    }

    fn test_source(name: &str) -> Source {
        let mut source = Source::new(
            name,
            SourceType::JobBoard,
            format!("https://example.com/{name}"),
        );
        source.rate_limit = unlimited();
        source
    }

    struct Rig {
        jobs: Arc<MemoryJobStore>,
        records: Arc<MemoryRecordStore>,
        log_store: Arc<MemoryLogStore>,
        logs: Arc<LogSink>,
        registry: Arc<SourceRegistry>,
        controller: JobController,
        extractor: Arc<ScriptedExtractor>,
    }

    async fn rig(sources: &[Source]) -> Rig {
        let source_store = Arc::new(MemorySourceStore::default());
        for source in sources {
            source_store.upsert(source).await.unwrap();
        }
        let registry = Arc::new(
            SourceRegistry::load(source_store, HealthPolicy::default())
                .await
                .unwrap(),
        );
        let jobs = Arc::new(MemoryJobStore::default());
        let records = Arc::new(MemoryRecordStore::default());
        let log_store = Arc::new(MemoryLogStore::default());
        let logs = Arc::new(LogSink::new(log_store.clone(), RetentionPolicy::default()));
        let controller = JobController::new(jobs.clone(), logs.clone());
        Rig {
            jobs,
            records,
            log_store,
            logs,
            registry,
            controller,
            extractor: Arc::new(ScriptedExtractor::new()),
        }
    }

    fn worker(rig: &Rig, fetcher: Arc<dyn Fetcher>) -> Worker {
        let dedup = Arc::new(DedupEngine::new(
            rig.records.clone(),
            0.85,
            ConflictPolicy::default(),
        ));
        Worker::new(
            "worker-test",
            rig.jobs.clone(),
            rig.records.clone(),
            rig.registry.clone(),
            fetcher,
            rig.extractor.clone(),
            dedup,
            rig.logs.clone(),
            WorkerConfig {
                poll_interval_secs: 1,
                reclaim_after_secs: 600,
                retry_base_ms: 1,
            },
        )
    }

    /// Register `pages` single-profile pages for a source, with a known total.
    fn register_pages(rig: &Rig, source: &Source, pages: u32, email_prefix: &str) {
        for page in 1..=pages {
            rig.extractor.register(
                &page_url(&source.base_url, page),
                vec![fixtures::profile(
                    &format!("{email_prefix}-{page}"),
                    &format!("Person {email_prefix} {page}"),
                    Some(&format!("{email_prefix}{page}@x.com")),
                )],
                Some(pages),
            );
        }
    }

    async fn claim(rig: &Rig) -> Job {
        rig.jobs
            .claim_next_queued("worker-test")
            .await
            .unwrap()
            .expect("a queued job")
    }

    #[tokio::test]
    async fn one_auth_failure_of_three_sources_stays_within_tolerance() {
        let sources = [test_source("s1"), test_source("s2"), test_source("s3")];
        let rig = rig(&sources).await;
        register_pages(&rig, &sources[1], 1, "b");
        register_pages(&rig, &sources[2], 1, "c");

        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.push_status(401); // s1 page 1: permanent, no retry

        let job_id = rig
            .controller
            .create_job(
                NewJob::builder()
                    .source_ids(sources.iter().map(|s| s.id).collect())
                    .config(JobConfig {
                        failure_tolerance: 0.5,
                        ..JobConfig::default()
                    })
                    .build(),
            )
            .await
            .unwrap();

        let worker = worker(&rig, fetcher.clone());
        let status = worker.run_job(claim(&rig).await).await.unwrap();
        assert_eq!(status, JobStatus::Completed);

        let job = rig.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.sources[0].status, SourceRunStatus::Failed);
        assert_eq!(job.sources[1].status, SourceRunStatus::Completed);
        assert_eq!(job.sources[2].status, SourceRunStatus::Completed);
        assert_eq!(job.errors.count_for(ErrorKind::AuthError), 1);
        // The auth failure burned exactly one fetch; no retries.
        assert_eq!(fetcher.call_count(), 3);

        let page = rig
            .records
            .query(&RecordFilters::default(), Default::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn majority_failure_fails_the_job() {
        let sources = [test_source("s1"), test_source("s2")];
        let rig = rig(&sources).await;
        register_pages(&rig, &sources[1], 1, "b");

        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.push_status(403);

        rig.controller
            .create_job(
                NewJob::builder()
                    .source_ids(sources.iter().map(|s| s.id).collect())
                    .config(JobConfig {
                        failure_tolerance: 0.25,
                        ..JobConfig::default()
                    })
                    .build(),
            )
            .await
            .unwrap();

        let worker = worker(&rig, fetcher);
        let status = worker.run_job(claim(&rig).await).await.unwrap();
        assert_eq!(status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn transient_server_errors_retry_with_backoff() {
        let sources = [test_source("s1")];
        let rig = rig(&sources).await;
        register_pages(&rig, &sources[0], 1, "a");

        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.push_status(500);
        fetcher.push_status(502); // then default 200

        rig.controller
            .create_job(
                NewJob::builder()
                    .source_ids(vec![sources[0].id])
                    .build(),
            )
            .await
            .unwrap();

        let worker = worker(&rig, fetcher.clone());
        let status = worker.run_job(claim(&rig).await).await.unwrap();
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(fetcher.call_count(), 3);

        let retries: Vec<_> = rig
            .log_store
            .entries()
            .into_iter()
            .filter(|e| e.operation == Operation::Retry)
            .collect();
        assert_eq!(retries.len(), 2);
        assert_eq!(retries[0].attempt, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_source_with_the_transient_kind() {
        let sources = [test_source("s1")];
        let rig = rig(&sources).await;

        let fetcher = Arc::new(ScriptedFetcher::new());
        for _ in 0..3 {
            fetcher.push_error("connection reset by peer");
        }

        let job_id = rig
            .controller
            .create_job(
                NewJob::builder()
                    .source_ids(vec![sources[0].id])
                    .config(JobConfig {
                        max_attempts: 3,
                        ..JobConfig::default()
                    })
                    .build(),
            )
            .await
            .unwrap();

        let worker = worker(&rig, fetcher.clone());
        let status = worker.run_job(claim(&rig).await).await.unwrap();
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(fetcher.call_count(), 3);

        let job = rig.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.errors.count_for(ErrorKind::Connection), 1);
        assert_eq!(job.sources[0].status, SourceRunStatus::Failed);
    }

    #[tokio::test]
    async fn pause_checkpoints_and_resume_continues_without_refetching() {
        let sources = [test_source("s1")];
        let rig = rig(&sources).await;
        register_pages(&rig, &sources[0], 3, "a");

        let job_id = rig
            .controller
            .create_job(NewJob::builder().source_ids(vec![sources[0].id]).build())
            .await
            .unwrap();

        // Pause from "outside" while page 2 is in flight.
        let hook_jobs = rig.jobs.clone();
        let fetcher = Arc::new(ScriptedFetcher::with_hook(move |call| {
            if call == 1 {
                futures::executor::block_on(async {
                    let mut job = hook_jobs.get(job_id).await.unwrap().unwrap();
                    job.status = JobStatus::Paused;
                    hook_jobs.update(&job).await.unwrap();
                });
            }
        }));

        let worker = worker(&rig, fetcher.clone());
        let status = worker.run_job(claim(&rig).await).await.unwrap();
        assert_eq!(status, JobStatus::Paused);
        assert_eq!(fetcher.call_count(), 2);

        let job = rig.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Paused);
        // Page 2 finished cleanly before the signal was observed.
        assert_eq!(job.sources[0].checkpoint_page, 2);

        rig.controller.resume(job_id).await.unwrap();
        let job = rig.jobs.get(job_id).await.unwrap().unwrap();
        let status = worker.run_job(job).await.unwrap();
        assert_eq!(status, JobStatus::Completed);

        // Only page 3 was fetched after the resume.
        assert_eq!(fetcher.call_count(), 3);
        assert!(fetcher.urls().last().unwrap().ends_with("page=3"));

        let page = rig
            .records
            .query(&RecordFilters::default(), Default::default())
            .await
            .unwrap();
        assert_eq!(page.total, 3);
    }

    #[tokio::test]
    async fn cancel_stops_cleanly_and_keeps_ingested_records() {
        let sources = [test_source("s1")];
        let rig = rig(&sources).await;
        register_pages(&rig, &sources[0], 3, "a");

        let job_id = rig
            .controller
            .create_job(NewJob::builder().source_ids(vec![sources[0].id]).build())
            .await
            .unwrap();

        let hook_jobs = rig.jobs.clone();
        let fetcher = Arc::new(ScriptedFetcher::with_hook(move |call| {
            if call == 1 {
                futures::executor::block_on(async {
                    let mut job = hook_jobs.get(job_id).await.unwrap().unwrap();
                    job.status = JobStatus::Cancelled;
                    hook_jobs.update(&job).await.unwrap();
                });
            }
        }));

        let worker = worker(&rig, fetcher.clone());
        let status = worker.run_job(claim(&rig).await).await.unwrap();
        assert_eq!(status, JobStatus::Cancelled);

        // Pages 1-2 were ingested before the signal; nothing is rolled back.
        let page = rig
            .records
            .query(&RecordFilters::default(), Default::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2);

        let job = rig.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.sources[0].checkpoint_page, 2);
    }

    #[tokio::test]
    async fn wall_clock_budget_fails_the_job_with_a_checkpoint() {
        let sources = [test_source("s1")];
        let rig = rig(&sources).await;
        register_pages(&rig, &sources[0], 1, "a");

        let fetcher = Arc::new(ScriptedFetcher::new());
        let job_id = rig
            .controller
            .create_job(
                NewJob::builder()
                    .source_ids(vec![sources[0].id])
                    .config(JobConfig {
                        wall_clock_budget_secs: 0,
                        ..JobConfig::default()
                    })
                    .build(),
            )
            .await
            .unwrap();

        let worker = worker(&rig, fetcher.clone());
        let status = worker.run_job(claim(&rig).await).await.unwrap();
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(fetcher.call_count(), 0);

        let job = rig.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.errors.count_for(ErrorKind::Timeout), 1);
    }

    #[tokio::test]
    async fn unavailable_sources_are_skipped_not_failed() {
        let mut source = test_source("s1");
        source.status = SourceStatus::Disabled;
        let rig = rig(&[source.clone()]).await;

        let fetcher = Arc::new(ScriptedFetcher::new());
        let job_id = rig
            .controller
            .create_job(NewJob::builder().source_ids(vec![source.id]).build())
            .await
            .unwrap();

        let worker = worker(&rig, fetcher.clone());
        let status = worker.run_job(claim(&rig).await).await.unwrap();
        // Skips don't count toward the failure fraction.
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(fetcher.call_count(), 0);

        let job = rig.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.sources[0].status, SourceRunStatus::Skipped);
    }

    #[tokio::test]
    async fn duplicate_profiles_across_pages_merge_into_one_canonical() {
        let sources = [test_source("s1")];
        let rig = rig(&sources).await;
        // Two pages, same person on both.
        for page in 1..=2 {
            rig.extractor.register(
                &page_url(&sources[0].base_url, page),
                vec![fixtures::profile("ext-1", "Jane Doe", Some("jane@x.com"))],
                Some(2),
            );
        }

        let fetcher = Arc::new(ScriptedFetcher::new());
        let job_id = rig
            .controller
            .create_job(NewJob::builder().source_ids(vec![sources[0].id]).build())
            .await
            .unwrap();

        let worker = worker(&rig, fetcher);
        let status = worker.run_job(claim(&rig).await).await.unwrap();
        assert_eq!(status, JobStatus::Completed);

        let canonical = rig
            .records
            .find_canonical_by_email("jane@x.com")
            .await
            .unwrap();
        assert!(canonical.is_some());

        let job = rig.jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.sources[0].stats.duplicates, 1);
        assert_eq!(job.sources[0].stats.records_saved, 1);
    }

    #[tokio::test]
    async fn rescore_job_applies_freshness_decay() {
        let sources = [test_source("s1")];
        let rig = rig(&sources).await;

        // Scored 20 days ago, when the record was brand new.
        let then = Utc::now() - chrono::Duration::days(20);
        let mut record = fixtures::record("Jane Doe", Some("a@x.com"), None);
        record.scraped_at = then;
        quality::apply(&mut record, then);
        assert!((record.quality.freshness - 100.0).abs() < f32::EPSILON);
        rig.records.insert(&record).await.unwrap();

        rig.controller
            .create_job(
                NewJob::builder()
                    .source_ids(vec![sources[0].id])
                    .job_type(JobType::Rescore)
                    .build(),
            )
            .await
            .unwrap();

        let fetcher = Arc::new(ScriptedFetcher::new());
        let worker = worker(&rig, fetcher.clone());
        let status = worker.run_job(claim(&rig).await).await.unwrap();
        assert_eq!(status, JobStatus::Completed);
        // Re-scoring never fetches.
        assert_eq!(fetcher.call_count(), 0);

        let updated = rig.records.get(record.id).await.unwrap().unwrap();
        assert!((updated.quality.freshness - 60.0).abs() < 1.0);
        assert!(updated.quality.overall < record.quality.overall);
    }

    // --- build_record ---

    #[test]
    fn missing_full_name_is_a_parse_failure() {
        let mut profile = fixtures::profile("p1", "Jane Doe", None);
        profile.fields.remove("full_name");
        let err = build_record(&profile, Uuid::new_v4(), Utc::now()).unwrap_err();
        assert!(err.contains("full_name"));
    }

    #[test]
    fn low_confidence_fields_are_dropped() {
        let mut profile = fixtures::profile("p1", "Jane Doe", None);
        profile.fields.insert(
            "email".to_string(),
            FieldCandidate {
                value: json!("maybe@x.com"),
                confidence: 0.3,
            },
        );
        let record = build_record(&profile, Uuid::new_v4(), Utc::now()).unwrap();
        assert_eq!(record.email, None);
    }

    #[test]
    fn skills_accept_arrays_and_comma_strings() {
        let mut profile = fixtures::profile("p1", "Jane Doe", None);
        profile.fields.insert(
            "skills".to_string(),
            FieldCandidate {
                value: json!(["Rust", "SQL"]),
                confidence: 1.0,
            },
        );
        let record = build_record(&profile, Uuid::new_v4(), Utc::now()).unwrap();
        assert_eq!(record.skills, vec!["Rust", "SQL"]);

        profile.fields.insert(
            "skills".to_string(),
            FieldCandidate {
                value: json!("Rust, SQL , "),
                confidence: 1.0,
            },
        );
        let record = build_record(&profile, Uuid::new_v4(), Utc::now()).unwrap();
        assert_eq!(record.skills, vec!["Rust", "SQL"]);
    }

    #[test]
    fn experience_entries_deserialize_from_extracted_json() {
        let mut fields = BTreeMap::new();
        fields.insert(
            "full_name".to_string(),
            FieldCandidate {
                value: json!("Jane Doe"),
                confidence: 1.0,
            },
        );
        fields.insert(
            "experience".to_string(),
            FieldCandidate {
                value: json!([{
                    "title": "Engineer",
                    "company": "Acme",
                    "start": "2020-01-01",
                    "end": null,
                    "description": null
                }]),
                confidence: 1.0,
            },
        );
        let profile = RawProfile {
            external_id: "p1".to_string(),
            url: None,
            fields,
        };
        let record = build_record(&profile, Uuid::new_v4(), Utc::now()).unwrap();
        assert_eq!(record.experience.len(), 1);
        assert_eq!(record.experience[0].company, "Acme");
        assert!(record.experience[0].end.is_none());
    }

    #[test]
    fn page_url_respects_existing_query() {
        assert_eq!(
            page_url("https://example.com/api", 2),
            "https://example.com/api?page=2"
        );
        assert_eq!(
            page_url("https://example.com/api?sort=recent", 2),
            "https://example.com/api?sort=recent&page=2"
        );
    }

    #[test]
    fn job_priority_orders_claims() {
        // Priority is part of the claim ordering contract; sanity-check Ord.
        assert!(JobPriority::High > JobPriority::Normal);
        assert!(JobPriority::Normal > JobPriority::Low);
    }
}
