//! The dedup decision loop: match, then merge or flag, with the store's
//! fingerprint constraint making lookup-then-write safe under concurrency.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use talentroot_common::{CVRecord, RecordStatus, Result};
use talentroot_store::{InsertOutcome, RecordStore};

use super::matcher::{self, Match};
use super::merge::{merge_into, ConflictPolicy};

/// What happened to an incoming record.
#[derive(Debug, Clone, PartialEq)]
pub enum DedupOutcome {
    /// No candidate: stored as a new canonical record.
    Created { id: Uuid },
    /// Confidence at or above the auto-merge threshold: merged.
    Merged {
        canonical: Uuid,
        duplicate: Uuid,
        confidence: f32,
    },
    /// Candidate found below the threshold: stored canonical, flagged for
    /// manual review, NOT merged.
    Flagged {
        record: Uuid,
        candidate: Uuid,
        confidence: f32,
    },
}

pub struct DedupEngine {
    records: Arc<dyn RecordStore>,
    auto_merge_threshold: f32,
    conflict_policy: ConflictPolicy,
}

impl DedupEngine {
    pub fn new(
        records: Arc<dyn RecordStore>,
        auto_merge_threshold: f32,
        conflict_policy: ConflictPolicy,
    ) -> Self {
        Self {
            records,
            auto_merge_threshold,
            conflict_policy,
        }
    }

    /// Resolve an incoming record against the store.
    pub async fn resolve(&self, mut record: CVRecord) -> Result<DedupOutcome> {
        record.dedup.last_checked = Some(Utc::now());

        match matcher::best_match(self.records.as_ref(), &record).await? {
            Some(m) if m.confidence >= self.auto_merge_threshold => {
                self.merge(record, m).await
            }
            Some(m) => {
                record.dedup.confidence = Some(m.confidence);
                record.dedup.matched_fields = m.matched_fields.clone();
                record.dedup.flagged_candidate = Some(m.candidate.id);
                let outcome = DedupOutcome::Flagged {
                    record: record.id,
                    candidate: m.candidate.id,
                    confidence: m.confidence,
                };
                self.insert_guarded(record).await?;
                info!(
                    confidence = m.confidence,
                    candidate = %m.candidate.id,
                    "Possible duplicate flagged for review"
                );
                Ok(outcome)
            }
            None => {
                let id = record.id;
                // The insert can still collide on fingerprint with a writer
                // that beat us between lookup and write.
                match self.records.insert(&record).await? {
                    InsertOutcome::Inserted => {
                        debug!(record = %id, "New canonical record");
                        Ok(DedupOutcome::Created { id })
                    }
                    InsertOutcome::FingerprintConflict(existing) => {
                        // Identical fingerprint means identical normalized
                        // identity: treat as an exact match.
                        let m = Match {
                            candidate: *existing,
                            confidence: matcher::EMAIL_CONFIDENCE,
                            matched_fields: vec!["fingerprint".to_string()],
                        };
                        self.merge(record, m).await
                    }
                }
            }
        }
    }

    async fn merge(&self, mut record: CVRecord, m: Match) -> Result<DedupOutcome> {
        let mut canonical = m.candidate;
        let now = Utc::now();
        merge_into(
            &mut canonical,
            &mut record,
            m.confidence,
            &m.matched_fields,
            self.conflict_policy,
            now,
        );

        self.records.update(&canonical).await?;
        // The loser carries duplicate_of, so it sits outside the canonical
        // fingerprint constraint.
        self.insert_guarded(record.clone()).await?;

        info!(
            canonical = %canonical.id,
            duplicate = %record.id,
            confidence = m.confidence,
            "Merged duplicate record"
        );
        Ok(DedupOutcome::Merged {
            canonical: canonical.id,
            duplicate: record.id,
            confidence: m.confidence,
        })
    }

    /// Insert a record that may or may not be canonical; a conflict from a
    /// racing writer demotes this one to a duplicate of the winner.
    async fn insert_guarded(&self, mut record: CVRecord) -> Result<()> {
        match self.records.insert(&record).await? {
            InsertOutcome::Inserted => Ok(()),
            InsertOutcome::FingerprintConflict(existing) => {
                record.status = RecordStatus::Duplicate;
                record.dedup.duplicate_of = Some(existing.id);
                record.dedup.confidence = Some(matcher::EMAIL_CONFIDENCE);
                record.dedup.matched_fields = vec!["fingerprint".to_string()];
                match self.records.insert(&record).await? {
                    InsertOutcome::Inserted => Ok(()),
                    InsertOutcome::FingerprintConflict(_) => unreachable!(
                        "a record with duplicate_of set cannot conflict on the canonical index"
                    ),
                }
            }
        }
    }
}
