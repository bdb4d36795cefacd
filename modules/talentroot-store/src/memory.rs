//! In-memory store implementations for engine-level tests.
//!
//! Same contracts as the Pg stores, including the one-canonical-per-
//! fingerprint guarantee, without needing a database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use talentroot_common::{
    name_key, CVRecord, Job, JobStatus, LogEntry, Operation, QualityReport, ReportScope, Result,
    Source,
};

use crate::traits::{
    InsertOutcome, JobStore, LogStore, Pagination, RecordFilters, RecordPage, RecordStore,
    ReportStore, SourceStore,
};

// --- Sources ---

#[derive(Default)]
pub struct MemorySourceStore {
    sources: Mutex<HashMap<Uuid, Source>>,
}

#[async_trait]
impl SourceStore for MemorySourceStore {
    async fn upsert(&self, source: &Source) -> Result<()> {
        self.sources
            .lock()
            .unwrap()
            .insert(source.id, source.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Source>> {
        Ok(self.sources.lock().unwrap().get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Source>> {
        let mut sources: Vec<Source> = self.sources.lock().unwrap().values().cloned().collect();
        sources.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sources)
    }
}

// --- Jobs ---

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn update(&self, job: &Job) -> Result<()> {
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn status(&self, id: Uuid) -> Result<Option<JobStatus>> {
        Ok(self.jobs.lock().unwrap().get(&id).map(|j| j.status))
    }

    async fn claim_next_queued(&self, _worker_id: &str) -> Result<Option<Job>> {
        let mut jobs = self.jobs.lock().unwrap();
        let next = jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .max_by_key(|j| (j.priority, std::cmp::Reverse(j.created_at)))
            .map(|j| j.id);
        match next {
            Some(id) => {
                let job = jobs.get_mut(&id).unwrap();
                job.status = JobStatus::Running;
                Ok(Some(job.clone()))
            }
            None => Ok(None),
        }
    }

    async fn reclaim_stale_running(
        &self,
        _worker_id: &str,
        _stale_secs: u64,
    ) -> Result<Option<Job>> {
        // The in-memory store has no liveness signal; staleness-based
        // reclaim is exercised against Postgres.
        Ok(None)
    }

    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| {
                j.status.is_terminal()
                    && matches!(&j.schedule, Some(s) if s.next_run <= now)
            })
            .cloned()
            .collect())
    }
}

// --- Records ---

#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<Uuid, CVRecord>>,
}

impl MemoryRecordStore {
    fn canonical_by<'a>(
        records: &'a HashMap<Uuid, CVRecord>,
        pred: impl Fn(&CVRecord) -> bool + 'a,
    ) -> Option<CVRecord> {
        records
            .values()
            .filter(|r| r.dedup.duplicate_of.is_none() && pred(r))
            .min_by_key(|r| r.created_at)
            .cloned()
    }

    fn matches(record: &CVRecord, filters: &RecordFilters) -> bool {
        if let Some(status) = filters.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(source_id) = filters.source_id {
            if record.source_id != source_id {
                return false;
            }
        }
        if let Some(level) = filters.experience_level {
            if record.enrichment.experience_level != Some(level) {
                return false;
            }
        }
        if !filters
            .skills
            .iter()
            .all(|s| record.skills.iter().any(|have| have == s))
        {
            return false;
        }
        if let Some(min) = filters.min_quality {
            if record.quality.overall < min {
                return false;
            }
        }
        if let Some(from) = filters.scraped_from {
            if record.scraped_at < from {
                return false;
            }
        }
        if let Some(to) = filters.scraped_to {
            if record.scraped_at > to {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, record: &CVRecord) -> Result<InsertOutcome> {
        let mut records = self.records.lock().unwrap();
        // Mirrors the partial unique index: only canonical rows (no
        // duplicate_of) participate in the fingerprint constraint.
        if record.dedup.duplicate_of.is_none() {
            let existing = Self::canonical_by(&records, |r| {
                r.dedup.fingerprint == record.dedup.fingerprint
            });
            if let Some(existing) = existing {
                return Ok(InsertOutcome::FingerprintConflict(Box::new(existing)));
            }
        }
        records.insert(record.id, record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CVRecord>> {
        Ok(self.records.lock().unwrap().get(&id).cloned())
    }

    async fn update(&self, record: &CVRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn find_canonical_by_fingerprint(&self, fingerprint: &str) -> Result<Option<CVRecord>> {
        let records = self.records.lock().unwrap();
        Ok(Self::canonical_by(&records, |r| {
            r.dedup.fingerprint == fingerprint
        }))
    }

    async fn find_canonical_by_email(&self, normalized_email: &str) -> Result<Option<CVRecord>> {
        let records = self.records.lock().unwrap();
        Ok(Self::canonical_by(&records, |r| {
            r.normalized_email.as_deref() == Some(normalized_email)
        }))
    }

    async fn find_canonical_by_phone(&self, normalized_phone: &str) -> Result<Option<CVRecord>> {
        let records = self.records.lock().unwrap();
        Ok(Self::canonical_by(&records, |r| {
            r.normalized_phone.as_deref() == Some(normalized_phone)
        }))
    }

    async fn candidates_by_name_key(&self, key: &str) -> Result<Vec<CVRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .values()
            .filter(|r| r.dedup.duplicate_of.is_none() && name_key(&r.normalized_name) == key)
            .cloned()
            .collect())
    }

    async fn query(&self, filters: &RecordFilters, page: Pagination) -> Result<RecordPage> {
        let records = self.records.lock().unwrap();
        let mut matched: Vec<CVRecord> = records
            .values()
            .filter(|r| Self::matches(r, filters))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.scraped_at.cmp(&a.scraped_at));
        let total = matched.len() as u64;
        let records = matched
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect();
        Ok(RecordPage {
            records,
            total,
            offset: page.offset,
        })
    }

    async fn scored_before(&self, cutoff: DateTime<Utc>, limit: u32) -> Result<Vec<CVRecord>> {
        let records = self.records.lock().unwrap();
        let mut matched: Vec<CVRecord> = records
            .values()
            .filter(|r| {
                r.dedup.duplicate_of.is_none()
                    && r.quality.scored_at.map(|t| t < cutoff).unwrap_or(true)
            })
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.quality.scored_at);
        matched.truncate(limit as usize);
        Ok(matched)
    }

    async fn all_in_scope(&self, scope: &ReportScope) -> Result<Vec<CVRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .values()
            .filter(|r| {
                r.scraped_at >= scope.from
                    && r.scraped_at <= scope.to
                    && (scope.source_ids.is_empty() || scope.source_ids.contains(&r.source_id))
            })
            .cloned()
            .collect())
    }
}

// --- Logs ---

#[derive(Default)]
pub struct MemoryLogStore {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogStore {
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(&self, entry: &LogEntry) -> Result<()> {
        self.entries.lock().unwrap().push(entry.clone());
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
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|e| {
            if e.level.short_retention() {
                e.created_at >= short_cutoff
            } else {
                e.created_at >= long_cutoff
            }
        });
        Ok((before - entries.len()) as u64)
    }

    async fn for_job(&self, job_id: Uuid, limit: u32) -> Result<Vec<LogEntry>> {
        let entries = self.entries.lock().unwrap();
        let mut matched: Vec<LogEntry> = entries
            .iter()
            .filter(|e| e.job_id == Some(job_id))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matched.truncate(limit as usize);
        Ok(matched)
    }

    async fn count_errors_in_scope(
        &self,
        scope: &ReportScope,
        operation: Operation,
    ) -> Result<u64> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|e| {
                e.operation == operation
                    && matches!(
                        e.level,
                        talentroot_common::LogLevel::Error | talentroot_common::LogLevel::Fatal
                    )
                    && e.created_at >= scope.from
                    && e.created_at <= scope.to
                    && (scope.source_ids.is_empty()
                        || e.source_id
                            .map(|id| scope.source_ids.contains(&id))
                            .unwrap_or(false))
            })
            .count() as u64)
    }
}

// --- Reports ---

#[derive(Default)]
pub struct MemoryReportStore {
    reports: Mutex<HashMap<Uuid, QualityReport>>,
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn insert(&self, report: &QualityReport) -> Result<()> {
        self.reports
            .lock()
            .unwrap()
            .insert(report.id, report.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<QualityReport>> {
        Ok(self.reports.lock().unwrap().get(&id).cloned())
    }

    async fn prior_reports(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<QualityReport>> {
        let reports = self.reports.lock().unwrap();
        let mut matched: Vec<QualityReport> = reports
            .values()
            .filter(|r| r.generated_at < before)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));
        matched.truncate(limit as usize);
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talentroot_common::{LogLevel, Operation};

    fn log_entry(level: LogLevel, age_days: i64) -> LogEntry {
        LogEntry {
            id: Uuid::new_v4(),
            job_id: None,
            source_id: None,
            operation: Operation::Fetch,
            level,
            target: None,
            error: None,
            duration_ms: None,
            attempt: 0,
            created_at: Utc::now() - Duration::days(age_days),
        }
    }

    #[tokio::test]
    async fn debug_entries_expire_before_errors() {
        let store = MemoryLogStore::default();
        store.append(&log_entry(LogLevel::Debug, 10)).await.unwrap();
        store.append(&log_entry(LogLevel::Error, 10)).await.unwrap();
        store.append(&log_entry(LogLevel::Error, 40)).await.unwrap();

        let purged = store.purge_expired(Utc::now(), 7, 30).await.unwrap();
        assert_eq!(purged, 2);

        let remaining = store.entries();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].level, LogLevel::Error);
    }
}
