use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use talentroot_common::{QualityReport, Result};

use crate::traits::ReportStore;
use crate::{db_err, json_err};

pub struct PgReportStore {
    pool: PgPool,
}

impl PgReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode(doc: serde_json::Value) -> Result<QualityReport> {
    serde_json::from_value(doc).map_err(json_err)
}

#[async_trait]
impl ReportStore for PgReportStore {
    async fn insert(&self, report: &QualityReport) -> Result<()> {
        let doc = serde_json::to_value(report).map_err(json_err)?;
        sqlx::query(
            "INSERT INTO quality_reports (id, generated_at, doc) VALUES ($1, $2, $3)",
        )
        .bind(report.id)
        .bind(report.generated_at)
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<QualityReport>> {
        let row = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT doc FROM quality_reports WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(decode).transpose()
    }

    async fn prior_reports(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<QualityReport>> {
        let rows = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT doc FROM quality_reports
            WHERE generated_at < $1
            ORDER BY generated_at DESC
            LIMIT $2
            "#,
        )
        .bind(before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(decode).collect()
    }
}
