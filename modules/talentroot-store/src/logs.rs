use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use talentroot_common::{LogEntry, LogLevel, Operation, ReportScope, Result};

use crate::db_err;
use crate::traits::LogStore;

pub struct PgLogStore {
    pool: PgPool,
}

impl PgLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: Uuid,
    job_id: Option<Uuid>,
    source_id: Option<Uuid>,
    operation: String,
    level: String,
    target: Option<String>,
    error: Option<String>,
    duration_ms: Option<i64>,
    attempt: i32,
    created_at: DateTime<Utc>,
}

fn parse_operation(s: &str) -> Operation {
    match s {
        "fetch" => Operation::Fetch,
        "parse" => Operation::Parse,
        "extract" => Operation::Extract,
        "validate" => Operation::Validate,
        "save" => Operation::Save,
        "retry" => Operation::Retry,
        "rate_limit" => Operation::RateLimit,
        "proxy_switch" => Operation::ProxySwitch,
        "dedup" => Operation::Dedup,
        "health_check" => Operation::HealthCheck,
        _ => Operation::Report,
    }
}

fn parse_level(s: &str) -> LogLevel {
    match s {
        "debug" => LogLevel::Debug,
        "info" => LogLevel::Info,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        _ => LogLevel::Fatal,
    }
}

impl From<LogRow> for LogEntry {
    fn from(row: LogRow) -> Self {
        LogEntry {
            id: row.id,
            job_id: row.job_id,
            source_id: row.source_id,
            operation: parse_operation(&row.operation),
            level: parse_level(&row.level),
            target: row.target,
            error: row.error,
            duration_ms: row.duration_ms.map(|d| d as u64),
            attempt: row.attempt as u32,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl LogStore for PgLogStore {
    async fn append(&self, entry: &LogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO log_entries
                (id, job_id, source_id, operation, level, target, error,
                 duration_ms, attempt, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.job_id)
        .bind(entry.source_id)
        .bind(entry.operation.to_string())
        .bind(entry.level.to_string())
        .bind(&entry.target)
        .bind(&entry.error)
        .bind(entry.duration_ms.map(|d| d as i64))
        .bind(entry.attempt as i32)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        short_retention_days: i64,
        long_retention_days: i64,
    ) -> Result<u64> {
        let short_cutoff = now - Duration::days(short_retention_days);
        let long_cutoff = now - Duration::days(long_retention_days);

        let result = sqlx::query(
            r#"
            DELETE FROM log_entries
            WHERE (level IN ('debug', 'info') AND created_at < $1)
               OR (level IN ('warn', 'error', 'fatal') AND created_at < $2)
            "#,
        )
        .bind(short_cutoff)
        .bind(long_cutoff)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let purged = result.rows_affected();
        if purged > 0 {
            info!(purged, "Purged expired log entries");
        }
        Ok(purged)
    }

    async fn for_job(&self, job_id: Uuid, limit: u32) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT * FROM log_entries
            WHERE job_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(job_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(LogEntry::from).collect())
    }

    async fn count_errors_in_scope(
        &self,
        scope: &ReportScope,
        operation: Operation,
    ) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM log_entries
            WHERE operation = $1
              AND level IN ('error', 'fatal')
              AND created_at >= $2 AND created_at <= $3
              AND (cardinality($4::uuid[]) = 0 OR source_id = ANY($4))
            "#,
        )
        .bind(operation.to_string())
        .bind(scope.from)
        .bind(scope.to)
        .bind(&scope.source_ids)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(count as u64)
    }
}
