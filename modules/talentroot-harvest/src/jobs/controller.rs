//! Job lifecycle controller: creation, the pause/resume/cancel state
//! machine, progress and error-summary reads, and schedule re-queueing.
//!
//! Every transition goes through the lifecycle graph on `JobStatus`; an
//! illegal request fails with `InvalidTransition` and leaves no side effect.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use talentroot_common::{
    ErrorSummary, Job, JobConfig, JobFilters, JobPriority, JobSchedule, JobStatus, JobType,
    LogLevel, Operation, Result, SourceRunStatus, TalentrootError,
};
use talentroot_store::JobStore;

use crate::logsink::{LogSink, PipelineEvent};

/// Parameters for a new job.
#[derive(Debug, Clone, TypedBuilder)]
pub struct NewJob {
    pub source_ids: Vec<Uuid>,
    #[builder(default = JobType::Harvest)]
    pub job_type: JobType,
    #[builder(default = JobPriority::Normal)]
    pub priority: JobPriority,
    #[builder(default)]
    pub config: JobConfig,
    #[builder(default)]
    pub filters: JobFilters,
    /// Re-queue every N hours after completion.
    #[builder(default, setter(strip_option))]
    pub repeat_hours: Option<u32>,
}

/// Read model for `progress()`.
#[derive(Debug, Clone)]
pub struct JobProgressView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub current_page: u32,
    pub total_pages: u32,
    pub percent: f32,
    pub eta_seconds: Option<u64>,
    pub sources: Vec<(Uuid, SourceRunStatus)>,
}

pub struct JobController {
    jobs: Arc<dyn JobStore>,
    logs: Arc<LogSink>,
}

impl JobController {
    pub fn new(jobs: Arc<dyn JobStore>, logs: Arc<LogSink>) -> Self {
        Self { jobs, logs }
    }

    /// Create a job and queue it for the worker pool. Returns the job id.
    pub async fn create_job(&self, new: NewJob) -> Result<Uuid> {
        if new.source_ids.is_empty() {
            return Err(TalentrootError::Validation(
                "a job needs at least one source".to_string(),
            ));
        }

        let mut config = new.config;
        config.filters = new.filters;
        let mut job = Job::new(new.job_type, &new.source_ids, config);
        job.priority = new.priority;
        if let Some(hours) = new.repeat_hours {
            job.schedule = Some(JobSchedule {
                interval_hours: hours,
                next_run: Utc::now() + chrono::Duration::hours(hours as i64),
            });
        }
        self.jobs.insert(&job).await?;

        // Queue immediately; the claim loop takes it from here.
        job.status = JobStatus::Queued;
        self.jobs.update(&job).await?;

        info!(job = %job.id, sources = job.sources.len(), "Job created and queued");
        Ok(job.id)
    }

    pub async fn pause(&self, job_id: Uuid) -> Result<()> {
        self.transition(job_id, JobStatus::Paused).await
    }

    pub async fn resume(&self, job_id: Uuid) -> Result<()> {
        self.transition(job_id, JobStatus::Running).await
    }

    pub async fn cancel(&self, job_id: Uuid) -> Result<()> {
        self.transition(job_id, JobStatus::Cancelled).await
    }

    /// Apply one lifecycle transition, stamping the matching timestamp.
    async fn transition(&self, job_id: Uuid, next: JobStatus) -> Result<()> {
        let mut job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or(TalentrootError::JobNotFound(job_id))?;

        if !job.status.can_transition_to(next) {
            return Err(TalentrootError::InvalidTransition {
                from: job.status,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            JobStatus::Running if job.status == JobStatus::Paused => job.resumed_at = Some(now),
            JobStatus::Running | JobStatus::Queued => {}
            JobStatus::Paused => job.paused_at = Some(now),
            JobStatus::Cancelled => job.cancelled_at = Some(now),
            JobStatus::Completed | JobStatus::Failed => job.completed_at = Some(now),
            JobStatus::Pending => {}
        }
        let from = job.status;
        job.status = next;
        self.jobs.update(&job).await?;

        info!(job = %job_id, %from, to = %next, "Job transition");
        Ok(())
    }

    pub async fn progress(&self, job_id: Uuid) -> Result<JobProgressView> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or(TalentrootError::JobNotFound(job_id))?;
        Ok(JobProgressView {
            job_id,
            status: job.status,
            current_page: job.progress.current_page,
            total_pages: job.progress.total_pages,
            percent: job.progress.percent(),
            eta_seconds: job.progress.eta_seconds(),
            sources: job.sources.iter().map(|s| (s.source_id, s.status)).collect(),
        })
    }

    /// The ops-facing error view: aggregated by kind, never raw traces.
    pub async fn error_summary(&self, job_id: Uuid) -> Result<ErrorSummary> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or(TalentrootError::JobNotFound(job_id))?;
        Ok(job.errors)
    }

    /// Re-queue recurring jobs whose next_run has passed: a fresh job with
    /// reset per-source state, and the schedule advanced on the old one.
    pub async fn requeue_due(&self) -> Result<u32> {
        let now = Utc::now();
        let due = self.jobs.due_scheduled(now).await?;
        let mut requeued = 0;

        for mut old in due {
            let Some(schedule) = old.schedule.clone() else {
                continue;
            };
            let source_ids: Vec<Uuid> = old.sources.iter().map(|s| s.source_id).collect();

            let mut job = Job::new(old.job_type, &source_ids, old.config.clone());
            job.priority = old.priority;
            job.schedule = Some(JobSchedule {
                interval_hours: schedule.interval_hours,
                next_run: now + chrono::Duration::hours(schedule.interval_hours as i64),
            });
            job.status = JobStatus::Queued;
            self.jobs.insert(&job).await?;

            // Detach the schedule from the finished run so it only fires once.
            old.schedule = None;
            self.jobs.update(&old).await?;

            self.logs
                .record(
                    PipelineEvent::new(Operation::Report, LogLevel::Info)
                        .job(job.id)
                        .target(format!("recurrence of {}", old.id)),
                )
                .await;
            requeued += 1;
        }

        Ok(requeued)
    }
}
