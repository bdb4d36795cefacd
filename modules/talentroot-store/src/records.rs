use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use talentroot_common::{name_key, CVRecord, ReportScope, Result, TalentrootError};

use crate::traits::{InsertOutcome, Pagination, RecordFilters, RecordPage, RecordStore};
use crate::{db_err, json_err};

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn try_insert(&self, record: &CVRecord) -> Result<bool> {
        let doc = serde_json::to_value(record).map_err(json_err)?;
        let result = sqlx::query(
            r#"
            INSERT INTO cv_records
                (id, fingerprint, normalized_email, normalized_phone, name_key,
                 source_id, external_id, status, duplicate_of, overall_quality,
                 scored_at, scraped_at, doc, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (fingerprint) WHERE duplicate_of IS NULL DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.dedup.fingerprint)
        .bind(&record.normalized_email)
        .bind(&record.normalized_phone)
        .bind(name_key(&record.normalized_name))
        .bind(record.source_id)
        .bind(&record.external_id)
        .bind(record.status.to_string())
        .bind(record.dedup.duplicate_of)
        .bind(record.quality.overall)
        .bind(record.quality.scored_at)
        .bind(record.scraped_at)
        .bind(doc)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }
}

fn decode(doc: serde_json::Value) -> Result<CVRecord> {
    serde_json::from_value(doc).map_err(json_err)
}

fn decode_all(docs: Vec<serde_json::Value>) -> Result<Vec<CVRecord>> {
    docs.into_iter().map(decode).collect()
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn insert(&self, record: &CVRecord) -> Result<InsertOutcome> {
        // Insert-then-reconcile: the partial unique index guarantees one
        // canonical per fingerprint even under concurrent writers. If the
        // insert loses the race we hand the surviving canonical back to the
        // caller to reconcile against. The short retry covers the window
        // where the prior canonical was just demoted to duplicate.
        for _ in 0..2 {
            if self.try_insert(record).await? {
                return Ok(InsertOutcome::Inserted);
            }
            match self
                .find_canonical_by_fingerprint(&record.dedup.fingerprint)
                .await?
            {
                Some(existing) => return Ok(InsertOutcome::FingerprintConflict(Box::new(existing))),
                None => {
                    warn!(
                        fingerprint = %record.dedup.fingerprint,
                        "Fingerprint conflict with no surviving canonical, retrying insert"
                    );
                }
            }
        }
        Err(TalentrootError::Database(format!(
            "could not insert or reconcile fingerprint {}",
            record.dedup.fingerprint
        )))
    }

    async fn get(&self, id: Uuid) -> Result<Option<CVRecord>> {
        let row =
            sqlx::query_scalar::<_, serde_json::Value>("SELECT doc FROM cv_records WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        row.map(decode).transpose()
    }

    async fn update(&self, record: &CVRecord) -> Result<()> {
        let doc = serde_json::to_value(record).map_err(json_err)?;
        sqlx::query(
            r#"
            UPDATE cv_records
            SET fingerprint = $2, normalized_email = $3, normalized_phone = $4,
                name_key = $5, status = $6, duplicate_of = $7, overall_quality = $8,
                scored_at = $9, doc = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(&record.dedup.fingerprint)
        .bind(&record.normalized_email)
        .bind(&record.normalized_phone)
        .bind(name_key(&record.normalized_name))
        .bind(record.status.to_string())
        .bind(record.dedup.duplicate_of)
        .bind(record.quality.overall)
        .bind(record.quality.scored_at)
        .bind(doc)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_canonical_by_fingerprint(&self, fingerprint: &str) -> Result<Option<CVRecord>> {
        let row = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT doc FROM cv_records WHERE fingerprint = $1 AND duplicate_of IS NULL",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(decode).transpose()
    }

    async fn find_canonical_by_email(&self, normalized_email: &str) -> Result<Option<CVRecord>> {
        let row = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT doc FROM cv_records
            WHERE normalized_email = $1 AND duplicate_of IS NULL
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(normalized_email)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(decode).transpose()
    }

    async fn find_canonical_by_phone(&self, normalized_phone: &str) -> Result<Option<CVRecord>> {
        let row = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT doc FROM cv_records
            WHERE normalized_phone = $1 AND duplicate_of IS NULL
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(normalized_phone)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(decode).transpose()
    }

    async fn candidates_by_name_key(&self, key: &str) -> Result<Vec<CVRecord>> {
        let rows = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT doc FROM cv_records WHERE name_key = $1 AND duplicate_of IS NULL",
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        decode_all(rows)
    }

    async fn query(&self, filters: &RecordFilters, page: Pagination) -> Result<RecordPage> {
        let status = filters.status.map(|s| s.to_string());
        let level = filters.experience_level.map(|l| l.to_string());
        let skills = if filters.skills.is_empty() {
            None
        } else {
            Some(serde_json::to_value(&filters.skills).map_err(json_err)?)
        };

        let where_clause = r#"
            ($1::text IS NULL OR status = $1)
            AND ($2::uuid IS NULL OR source_id = $2)
            AND ($3::text IS NULL OR doc->'enrichment'->>'experience_level' = $3)
            AND ($4::jsonb IS NULL OR doc->'skills' @> $4)
            AND ($5::real IS NULL OR overall_quality >= $5)
            AND ($6::timestamptz IS NULL OR scraped_at >= $6)
            AND ($7::timestamptz IS NULL OR scraped_at <= $7)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM cv_records WHERE {where_clause}"
        ))
        .bind(&status)
        .bind(filters.source_id)
        .bind(&level)
        .bind(&skills)
        .bind(filters.min_quality)
        .bind(filters.scraped_from)
        .bind(filters.scraped_to)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let rows = sqlx::query_scalar::<_, serde_json::Value>(&format!(
            r#"
            SELECT doc FROM cv_records WHERE {where_clause}
            ORDER BY scraped_at DESC
            LIMIT $8 OFFSET $9
            "#
        ))
        .bind(&status)
        .bind(filters.source_id)
        .bind(&level)
        .bind(&skills)
        .bind(filters.min_quality)
        .bind(filters.scraped_from)
        .bind(filters.scraped_to)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(RecordPage {
            records: decode_all(rows)?,
            total: total as u64,
            offset: page.offset,
        })
    }

    async fn scored_before(&self, cutoff: DateTime<Utc>, limit: u32) -> Result<Vec<CVRecord>> {
        let rows = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT doc FROM cv_records
            WHERE duplicate_of IS NULL AND (scored_at IS NULL OR scored_at < $1)
            ORDER BY scored_at ASC NULLS FIRST
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        decode_all(rows)
    }

    async fn all_in_scope(&self, scope: &ReportScope) -> Result<Vec<CVRecord>> {
        let rows = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT doc FROM cv_records
            WHERE scraped_at >= $1 AND scraped_at <= $2
              AND (cardinality($3::uuid[]) = 0 OR source_id = ANY($3))
            "#,
        )
        .bind(scope.from)
        .bind(scope.to)
        .bind(&scope.source_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        decode_all(rows)
    }
}
