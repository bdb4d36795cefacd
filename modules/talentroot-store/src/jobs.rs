use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use talentroot_common::{Job, JobPriority, JobStatus, Result};

use crate::traits::JobStore;
use crate::{db_err, json_err};

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn priority_rank(priority: JobPriority) -> i16 {
    match priority {
        JobPriority::Low => 0,
        JobPriority::Normal => 1,
        JobPriority::High => 2,
    }
}

fn parse_status(s: &str) -> JobStatus {
    match s {
        "pending" => JobStatus::Pending,
        "queued" => JobStatus::Queued,
        "running" => JobStatus::Running,
        "paused" => JobStatus::Paused,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        _ => JobStatus::Cancelled,
    }
}

/// Decode a job row. The status column is authoritative: a freshly-claimed
/// job has status flipped in SQL before the doc catches up on the next
/// update.
fn decode(status: &str, doc: serde_json::Value) -> Result<Job> {
    let mut job: Job = serde_json::from_value(doc).map_err(json_err)?;
    job.status = parse_status(status);
    Ok(job)
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let doc = serde_json::to_value(job).map_err(json_err)?;
        sqlx::query(
            r#"
            INSERT INTO jobs (id, status, priority_rank, next_run, doc, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            "#,
        )
        .bind(job.id)
        .bind(job.status.to_string())
        .bind(priority_rank(job.priority))
        .bind(job.schedule.as_ref().map(|s| s.next_run))
        .bind(doc)
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, (String, serde_json::Value)>(
            "SELECT status, doc FROM jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|(status, doc)| decode(&status, doc)).transpose()
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let doc = serde_json::to_value(job).map_err(json_err)?;
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, priority_rank = $3, next_run = $4, doc = $5, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(job.status.to_string())
        .bind(priority_rank(job.priority))
        .bind(job.schedule.as_ref().map(|s| s.next_run))
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn status(&self, id: Uuid) -> Result<Option<JobStatus>> {
        let row = sqlx::query_scalar::<_, String>("SELECT status FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(row.map(|s| parse_status(&s)))
    }

    async fn claim_next_queued(&self, _worker_id: &str) -> Result<Option<Job>> {
        // SKIP LOCKED makes the queue safe under concurrent workers: two
        // claimers never select the same row.
        let row = sqlx::query_as::<_, (String, serde_json::Value)>(
            r#"
            UPDATE jobs
            SET status = 'running', updated_at = now()
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'queued'
                ORDER BY priority_rank DESC, created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING status, doc
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|(status, doc)| decode(&status, doc)).transpose()
    }

    async fn reclaim_stale_running(
        &self,
        _worker_id: &str,
        stale_secs: u64,
    ) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, (String, serde_json::Value)>(
            r#"
            UPDATE jobs
            SET updated_at = now()
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'running'
                  AND updated_at < now() - make_interval(secs => $1)
                ORDER BY updated_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING status, doc
            "#,
        )
        .bind(stale_secs as f64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|(status, doc)| decode(&status, doc)).transpose()
    }

    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, (String, serde_json::Value)>(
            r#"
            SELECT status, doc FROM jobs
            WHERE next_run IS NOT NULL AND next_run <= $1
              AND status IN ('completed', 'failed')
            ORDER BY next_run
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|(status, doc)| decode(&status, doc))
            .collect()
    }
}
