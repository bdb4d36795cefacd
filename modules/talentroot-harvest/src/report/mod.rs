//! Quality reporting: scheduled/on-demand aggregation of records and logs
//! into report snapshots, with trends and report-to-report deltas.

pub mod aggregate;
pub mod compare;
pub mod generator;

pub use compare::compare_reports;
pub use generator::{ReportConfig, ReportGenerator, Weighting};
