use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use talentroot_common::{Result, Source};

use crate::traits::SourceStore;
use crate::{db_err, json_err};

pub struct PgSourceStore {
    pool: PgPool,
}

impl PgSourceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode(doc: serde_json::Value) -> Result<Source> {
    serde_json::from_value(doc).map_err(json_err)
}

#[async_trait]
impl SourceStore for PgSourceStore {
    async fn upsert(&self, source: &Source) -> Result<()> {
        let doc = serde_json::to_value(source).map_err(json_err)?;
        sqlx::query(
            r#"
            INSERT INTO sources (id, name, status, doc, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
                SET name = EXCLUDED.name,
                    status = EXCLUDED.status,
                    doc = EXCLUDED.doc,
                    updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(source.id)
        .bind(&source.name)
        .bind(source.status.to_string())
        .bind(doc)
        .bind(source.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Source>> {
        let row = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT doc FROM sources WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(decode).transpose()
    }

    async fn list(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT doc FROM sources ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(decode).collect()
    }
}
