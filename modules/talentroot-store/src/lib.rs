//! Postgres persistence for the talentroot pipeline.
//!
//! Each store is a trait so the engine can run against the in-memory
//! implementations (feature `test-support`) in tests. The Pg implementations
//! use runtime-checked queries with a `doc` JSONB column for the aggregate
//! plus flat columns for everything that needs an index.

pub mod jobs;
pub mod logs;
pub mod records;
pub mod reports;
pub mod sources;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

pub use jobs::PgJobStore;
pub use logs::PgLogStore;
pub use records::PgRecordStore;
pub use reports::PgReportStore;
pub use sources::PgSourceStore;
pub use traits::{
    InsertOutcome, JobStore, LogStore, Pagination, RecordFilters, RecordPage, RecordStore,
    ReportStore, SourceStore,
};

use sqlx::PgPool;
use talentroot_common::{Result, TalentrootError};

/// Run the embedded SQL migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| TalentrootError::Database(e.to_string()))?;
    Ok(())
}

pub(crate) fn db_err(e: sqlx::Error) -> TalentrootError {
    TalentrootError::Database(e.to_string())
}

pub(crate) fn json_err(e: serde_json::Error) -> TalentrootError {
    TalentrootError::Database(format!("JSON column decode: {e}"))
}
