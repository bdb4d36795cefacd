//! Quality report types: metrics, issues, trends, and report deltas.
//!
//! Reports are derived artifacts: generated from the record store and log
//! stream, persisted as snapshots, never hand-edited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    MissingField,
    InvalidFormat,
    InconsistentData,
    DuplicateEntry,
    StaleData,
    ParseError,
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IssueType::MissingField => "missing_field",
            IssueType::InvalidFormat => "invalid_format",
            IssueType::InconsistentData => "inconsistent_data",
            IssueType::DuplicateEntry => "duplicate_entry",
            IssueType::StaleData => "stale_data",
            IssueType::ParseError => "parse_error",
        };
        write!(f, "{s}")
    }
}

/// Ordered so that sorting descending ranks the most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub issue_type: IssueType,
    pub severity: IssueSeverity,
    /// The affected field, when the issue is field-scoped.
    pub field: Option<String>,
    pub description: String,
    pub affected_records: u64,
    /// A few example record ids, not the full set.
    pub examples: Vec<Uuid>,
    pub auto_fixable: bool,
    pub status: IssueStatus,
}

impl QualityIssue {
    /// Identity for matching the same issue across two reports.
    pub fn key(&self) -> (IssueType, Option<&str>) {
        (self.issue_type, self.field.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallMetrics {
    pub record_count: u64,
    pub avg_completeness: f32,
    pub avg_freshness: f32,
    pub avg_overall: f32,
    pub duplicate_rate: f32,
    pub validation_error_rate: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetrics {
    pub source_id: Uuid,
    pub record_count: u64,
    pub avg_completeness: f32,
    pub avg_freshness: f32,
    pub avg_overall: f32,
    pub duplicate_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMetrics {
    pub field: String,
    /// Fraction of records with the field populated (0.0-1.0).
    pub fill_rate: f32,
    /// Fraction of populated values failing validation (0.0-1.0).
    pub invalid_rate: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: DateTime<Utc>,
    pub record_count: u64,
    pub avg_completeness: f32,
    pub avg_overall: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportScope {
    /// Empty = all sources.
    pub source_ids: Vec<Uuid>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub id: Uuid,
    pub scope: ReportScope,
    pub generated_at: DateTime<Utc>,
    pub overall: OverallMetrics,
    pub per_source: Vec<SourceMetrics>,
    pub per_field: Vec<FieldMetrics>,
    /// Severity-ranked, most severe first.
    pub issues: Vec<QualityIssue>,
    /// One point per prior report date within the scope, oldest first.
    pub trends: Vec<TrendPoint>,
    pub recommendations: Vec<String>,
}

/// Difference between two report snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDelta {
    pub report_a: Uuid,
    pub report_b: Uuid,
    pub record_count_delta: i64,
    pub completeness_delta: f32,
    pub freshness_delta: f32,
    pub overall_delta: f32,
    pub duplicate_rate_delta: f32,
    /// Issues open in A but absent or resolved in B.
    pub issues_resolved: usize,
    /// Issues open in B that A did not have.
    pub issues_introduced: usize,
}
