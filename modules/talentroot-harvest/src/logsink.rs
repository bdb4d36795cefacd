//! LogSink: one structured entry per pipeline step, mirrored to tracing and
//! appended to the store. Write failures are logged, not propagated; a lost
//! log line must never abort a scrape.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use talentroot_common::{LogEntry, LogLevel, Operation, Result};
use talentroot_store::LogStore;

/// Builder for one pipeline event.
#[derive(Debug, Clone)]
pub struct PipelineEvent {
    operation: Operation,
    level: LogLevel,
    job_id: Option<Uuid>,
    source_id: Option<Uuid>,
    target: Option<String>,
    error: Option<String>,
    duration_ms: Option<u64>,
    attempt: u32,
}

impl PipelineEvent {
    pub fn new(operation: Operation, level: LogLevel) -> Self {
        Self {
            operation,
            level,
            job_id: None,
            source_id: None,
            target: None,
            error: None,
            duration_ms: None,
            attempt: 0,
        }
    }

    pub fn job(mut self, id: Uuid) -> Self {
        self.job_id = Some(id);
        self
    }

    pub fn source(mut self, id: Uuid) -> Self {
        self.source_id = Some(id);
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

/// Retention windows in days; debug/info use the short one.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub short_days: i64,
    pub long_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            short_days: 7,
            long_days: 30,
        }
    }
}

pub struct LogSink {
    store: Arc<dyn LogStore>,
    retention: RetentionPolicy,
}

impl LogSink {
    pub fn new(store: Arc<dyn LogStore>, retention: RetentionPolicy) -> Self {
        Self { store, retention }
    }

    /// Append one event. Mirrors to the process log at the same level.
    pub async fn record(&self, event: PipelineEvent) {
        let entry = LogEntry {
            id: Uuid::new_v4(),
            job_id: event.job_id,
            source_id: event.source_id,
            operation: event.operation,
            level: event.level,
            target: event.target,
            error: event.error,
            duration_ms: event.duration_ms,
            attempt: event.attempt,
            created_at: Utc::now(),
        };

        let op = entry.operation.to_string();
        let subject = entry.target.as_deref().unwrap_or("");
        match entry.level {
            LogLevel::Debug => tracing::debug!(operation = %op, subject, "pipeline event"),
            LogLevel::Info => tracing::info!(operation = %op, subject, "pipeline event"),
            LogLevel::Warn => tracing::warn!(
                operation = %op,
                subject,
                error = entry.error.as_deref().unwrap_or(""),
                "pipeline event"
            ),
            LogLevel::Error | LogLevel::Fatal => tracing::error!(
                operation = %op,
                subject,
                error = entry.error.as_deref().unwrap_or(""),
                "pipeline event"
            ),
        }

        if let Err(e) = self.store.append(&entry).await {
            warn!(operation = %op, error = %e, "Failed to persist log entry");
        }
    }

    /// Drop entries past their retention window.
    pub async fn purge_expired(&self) -> Result<u64> {
        self.store
            .purge_expired(
                Utc::now(),
                self.retention.short_days,
                self.retention.long_days,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talentroot_store::memory::MemoryLogStore;

    #[tokio::test]
    async fn records_are_appended_with_context() {
        let store = Arc::new(MemoryLogStore::default());
        let sink = LogSink::new(store.clone(), RetentionPolicy::default());
        let job = Uuid::new_v4();
        let source = Uuid::new_v4();

        sink.record(
            PipelineEvent::new(Operation::Fetch, LogLevel::Info)
                .job(job)
                .source(source)
                .target("https://example.com/page/1")
                .duration_ms(120),
        )
        .await;
        sink.record(
            PipelineEvent::new(Operation::Retry, LogLevel::Warn)
                .job(job)
                .source(source)
                .error("timeout")
                .attempt(2),
        )
        .await;

        let entries = store.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].operation, Operation::Fetch);
        assert_eq!(entries[0].job_id, Some(job));
        assert_eq!(entries[0].duration_ms, Some(120));
        assert_eq!(entries[1].attempt, 2);
        assert_eq!(entries[1].error.as_deref(), Some("timeout"));
    }
}
