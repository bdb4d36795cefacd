//! Report generation over a (sources, date range) scope.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use talentroot_common::{
    CVRecord, FieldMetrics, IssueSeverity, IssueStatus, IssueType, Operation, OverallMetrics,
    QualityIssue, QualityReport, ReportScope, Result, SourceMetrics, TrendPoint,
};
use talentroot_store::{LogStore, RecordStore, ReportStore};

use super::aggregate::{mean, weighted_mean};

/// Fields tracked in the per-field breakdown.
const TRACKED_FIELDS: &[&str] = &[
    "full_name",
    "email",
    "phone",
    "headline",
    "summary",
    "experience",
    "education",
    "skills",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weighting {
    ByRecordCount,
    Uniform,
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
    /// Source-level aggregates roll up weighted by record count while
    /// field-level metrics use a plain mean. Inherited asymmetry, kept
    /// deliberate and configurable instead of silently unified.
    pub source_weighting: Weighting,
    pub field_weighting: Weighting,
    pub stale_after_days: i64,
    /// How many prior reports feed the trend series.
    pub trend_depth: u32,
    pub example_limit: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            source_weighting: Weighting::ByRecordCount,
            field_weighting: Weighting::Uniform,
            stale_after_days: 30,
            trend_depth: 12,
            example_limit: 5,
        }
    }
}

pub struct ReportGenerator {
    records: Arc<dyn RecordStore>,
    logs: Arc<dyn LogStore>,
    reports: Arc<dyn ReportStore>,
    config: ReportConfig,
}

impl ReportGenerator {
    pub fn new(
        records: Arc<dyn RecordStore>,
        logs: Arc<dyn LogStore>,
        reports: Arc<dyn ReportStore>,
        config: ReportConfig,
    ) -> Self {
        Self {
            records,
            logs,
            reports,
            config,
        }
    }

    /// Build, persist, and return one report snapshot.
    pub async fn generate(&self, scope: ReportScope) -> Result<QualityReport> {
        let now = Utc::now();
        let records = self.records.all_in_scope(&scope).await?;
        let canonical: Vec<&CVRecord> = records
            .iter()
            .filter(|r| r.dedup.duplicate_of.is_none())
            .collect();
        let duplicate_count = (records.len() - canonical.len()) as u64;

        let per_source = self.per_source_metrics(&records);
        let per_field = self.per_field_metrics(&canonical);
        let overall = self.overall_metrics(&records, &canonical, &per_source, duplicate_count);

        let parse_errors = self
            .logs
            .count_errors_in_scope(&scope, Operation::Extract)
            .await?;
        let mut issues = self.detect_issues(&records, &canonical, &per_field, parse_errors, now);
        // Severity-ranked, widest blast radius first within a tier.
        issues.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(b.affected_records.cmp(&a.affected_records))
        });
        let recommendations = recommendations_for(&issues);

        let mut trends: Vec<TrendPoint> = self
            .reports
            .prior_reports(now, self.config.trend_depth)
            .await?
            .into_iter()
            .map(|r| TrendPoint {
                date: r.generated_at,
                record_count: r.overall.record_count,
                avg_completeness: r.overall.avg_completeness,
                avg_overall: r.overall.avg_overall,
            })
            .collect();
        trends.reverse(); // oldest first
        trends.push(TrendPoint {
            date: now,
            record_count: overall.record_count,
            avg_completeness: overall.avg_completeness,
            avg_overall: overall.avg_overall,
        });

        let report = QualityReport {
            id: Uuid::new_v4(),
            scope,
            generated_at: now,
            overall,
            per_source,
            per_field,
            issues,
            trends,
            recommendations,
        };

        self.reports.insert(&report).await?;
        info!(
            report = %report.id,
            records = report.overall.record_count,
            issues = report.issues.len(),
            "Quality report generated"
        );
        Ok(report)
    }

    fn per_source_metrics(&self, records: &[CVRecord]) -> Vec<SourceMetrics> {
        let mut by_source: BTreeMap<Uuid, Vec<&CVRecord>> = BTreeMap::new();
        for record in records {
            by_source.entry(record.source_id).or_default().push(record);
        }

        by_source
            .into_iter()
            .map(|(source_id, group)| {
                let canonical: Vec<&&CVRecord> = group
                    .iter()
                    .filter(|r| r.dedup.duplicate_of.is_none())
                    .collect();
                SourceMetrics {
                    source_id,
                    record_count: canonical.len() as u64,
                    avg_completeness: mean(&canonical, |r| r.quality.completeness as f64) as f32,
                    avg_freshness: mean(&canonical, |r| r.quality.freshness as f64) as f32,
                    avg_overall: mean(&canonical, |r| r.quality.overall as f64) as f32,
                    duplicate_count: (group.len() - canonical.len()) as u64,
                }
            })
            .collect()
    }

    fn overall_metrics(
        &self,
        records: &[CVRecord],
        canonical: &[&CVRecord],
        per_source: &[SourceMetrics],
        duplicate_count: u64,
    ) -> OverallMetrics {
        let source_weight = |s: &SourceMetrics| match self.config.source_weighting {
            Weighting::ByRecordCount => s.record_count as f64,
            Weighting::Uniform => 1.0,
        };

        let with_validation_errors = canonical
            .iter()
            .filter(|r| !r.quality.validation_errors.is_empty())
            .count();

        OverallMetrics {
            record_count: records.len() as u64,
            avg_completeness: weighted_mean(
                per_source,
                |s| s.avg_completeness as f64,
                source_weight,
            ) as f32,
            avg_freshness: weighted_mean(per_source, |s| s.avg_freshness as f64, source_weight)
                as f32,
            avg_overall: weighted_mean(per_source, |s| s.avg_overall as f64, source_weight) as f32,
            duplicate_rate: if records.is_empty() {
                0.0
            } else {
                duplicate_count as f32 / records.len() as f32
            },
            validation_error_rate: if canonical.is_empty() {
                0.0
            } else {
                with_validation_errors as f32 / canonical.len() as f32
            },
        }
    }

    fn per_field_metrics(&self, canonical: &[&CVRecord]) -> Vec<FieldMetrics> {
        let field_weight = |_: &&CVRecord| match self.config.field_weighting {
            Weighting::ByRecordCount | Weighting::Uniform => 1.0,
        };

        TRACKED_FIELDS
            .iter()
            .map(|&field| {
                let fill_rate = weighted_mean(
                    canonical,
                    |r| if field_present(r, field) { 1.0 } else { 0.0 },
                    field_weight,
                ) as f32;
                let populated: Vec<&&CVRecord> = canonical
                    .iter()
                    .filter(|r| field_present(r, field))
                    .collect();
                let invalid_rate = mean(&populated, |r| {
                    if field_invalid(r, field) {
                        1.0
                    } else {
                        0.0
                    }
                }) as f32;
                FieldMetrics {
                    field: field.to_string(),
                    fill_rate,
                    invalid_rate,
                }
            })
            .collect()
    }

    fn detect_issues(
        &self,
        records: &[CVRecord],
        canonical: &[&CVRecord],
        per_field: &[FieldMetrics],
        parse_errors: u64,
        now: chrono::DateTime<Utc>,
    ) -> Vec<QualityIssue> {
        let mut issues = Vec::new();
        let limit = self.config.example_limit;

        for metrics in per_field {
            if metrics.fill_rate < 0.5 && !canonical.is_empty() {
                let missing: Vec<Uuid> = canonical
                    .iter()
                    .filter(|r| !field_present(r, &metrics.field))
                    .map(|r| r.id)
                    .collect();
                issues.push(QualityIssue {
                    issue_type: IssueType::MissingField,
                    severity: if metrics.fill_rate < 0.2 {
                        IssueSeverity::High
                    } else {
                        IssueSeverity::Medium
                    },
                    field: Some(metrics.field.clone()),
                    description: format!(
                        "{} is missing from {:.0}% of records",
                        metrics.field,
                        (1.0 - metrics.fill_rate) * 100.0
                    ),
                    affected_records: missing.len() as u64,
                    examples: missing.into_iter().take(limit).collect(),
                    auto_fixable: false,
                    status: IssueStatus::Open,
                });
            }

            if metrics.invalid_rate > 0.0 {
                let invalid: Vec<Uuid> = canonical
                    .iter()
                    .filter(|r| field_invalid(r, &metrics.field))
                    .map(|r| r.id)
                    .collect();
                issues.push(QualityIssue {
                    issue_type: IssueType::InvalidFormat,
                    severity: IssueSeverity::Medium,
                    field: Some(metrics.field.clone()),
                    description: format!(
                        "{:.0}% of populated {} values fail validation",
                        metrics.invalid_rate * 100.0,
                        metrics.field
                    ),
                    affected_records: invalid.len() as u64,
                    examples: invalid.into_iter().take(limit).collect(),
                    // Phone formatting is mechanical; everything else needs
                    // a re-extraction.
                    auto_fixable: metrics.field == "phone",
                    status: IssueStatus::Open,
                });
            }
        }

        let duplicates: Vec<Uuid> = records
            .iter()
            .filter(|r| r.dedup.duplicate_of.is_some())
            .map(|r| r.id)
            .collect();
        if !duplicates.is_empty() {
            let rate = duplicates.len() as f32 / records.len() as f32;
            issues.push(QualityIssue {
                issue_type: IssueType::DuplicateEntry,
                severity: if rate > 0.2 {
                    IssueSeverity::High
                } else {
                    IssueSeverity::Low
                },
                field: None,
                description: format!("{:.0}% of records in scope are duplicates", rate * 100.0),
                affected_records: duplicates.len() as u64,
                examples: duplicates.into_iter().take(limit).collect(),
                auto_fixable: true,
                status: IssueStatus::Open,
            });
        }

        let stale: Vec<Uuid> = canonical
            .iter()
            .filter(|r| r.age_days(now) > self.config.stale_after_days)
            .map(|r| r.id)
            .collect();
        if !stale.is_empty() {
            let fraction = stale.len() as f32 / canonical.len() as f32;
            issues.push(QualityIssue {
                issue_type: IssueType::StaleData,
                severity: if fraction > 0.5 {
                    IssueSeverity::High
                } else if fraction > 0.25 {
                    IssueSeverity::Medium
                } else {
                    IssueSeverity::Low
                },
                field: None,
                description: format!(
                    "{} records not rescraped in over {} days",
                    stale.len(),
                    self.config.stale_after_days
                ),
                affected_records: stale.len() as u64,
                examples: stale.into_iter().take(limit).collect(),
                auto_fixable: true,
                status: IssueStatus::Open,
            });
        }

        let inconsistent: Vec<Uuid> = canonical
            .iter()
            .filter(|r| {
                r.quality
                    .validation_errors
                    .iter()
                    .any(|e| e.contains("before it starts"))
            })
            .map(|r| r.id)
            .collect();
        if !inconsistent.is_empty() {
            issues.push(QualityIssue {
                issue_type: IssueType::InconsistentData,
                severity: IssueSeverity::Medium,
                field: None,
                description: format!(
                    "{} records have date ranges that end before they start",
                    inconsistent.len()
                ),
                affected_records: inconsistent.len() as u64,
                examples: inconsistent.into_iter().take(limit).collect(),
                auto_fixable: false,
                status: IssueStatus::Open,
            });
        }

        if parse_errors > 0 {
            issues.push(QualityIssue {
                issue_type: IssueType::ParseError,
                severity: if parse_errors > 100 {
                    IssueSeverity::Critical
                } else {
                    IssueSeverity::High
                },
                field: None,
                description: format!("{parse_errors} extraction failures in scope"),
                affected_records: parse_errors,
                examples: Vec::new(),
                auto_fixable: false,
                status: IssueStatus::Open,
            });
        }

        issues
    }
}

fn field_present(record: &CVRecord, field: &str) -> bool {
    match field {
        "full_name" => !record.full_name.trim().is_empty(),
        "email" => record.email.is_some(),
        "phone" => record.phone.is_some(),
        "headline" => record.headline.is_some(),
        "summary" => record.summary.is_some(),
        "experience" => !record.experience.is_empty(),
        "education" => !record.education.is_empty(),
        "skills" => !record.skills.is_empty(),
        _ => false,
    }
}

fn field_invalid(record: &CVRecord, field: &str) -> bool {
    let prefix = format!("{field}:");
    record
        .quality
        .validation_errors
        .iter()
        .any(|e| e.starts_with(&prefix))
}

fn recommendations_for(issues: &[QualityIssue]) -> Vec<String> {
    let mut recommendations = Vec::new();
    for issue in issues {
        let text = match issue.issue_type {
            IssueType::MissingField => issue.field.as_ref().map(|f| {
                format!("Review extraction selectors for `{f}` on the affected sources")
            }),
            IssueType::InvalidFormat => issue
                .field
                .as_ref()
                .map(|f| format!("Tighten `{f}` normalization before ingestion")),
            IssueType::DuplicateEntry => {
                Some("Consider lowering the auto-merge threshold or reviewing flagged pairs".into())
            }
            IssueType::StaleData => {
                Some("Schedule a refresh job for sources with stale records".into())
            }
            IssueType::InconsistentData => {
                Some("Audit date parsing for the affected sources".into())
            }
            IssueType::ParseError => {
                Some("Check source selectors; page structure may have changed".into())
            }
        };
        if let Some(text) = text {
            if !recommendations.contains(&text) {
                recommendations.push(text);
            }
        }
    }
    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::fixtures;
    use crate::quality;
    use talentroot_store::memory::{MemoryLogStore, MemoryRecordStore, MemoryReportStore};
    use talentroot_store::InsertOutcome;

    fn scope() -> ReportScope {
        ReportScope {
            source_ids: Vec::new(),
            from: Utc::now() - Duration::days(90),
            to: Utc::now() + Duration::minutes(1),
        }
    }

    fn generator(
        records: Arc<MemoryRecordStore>,
        reports: Arc<MemoryReportStore>,
        config: ReportConfig,
    ) -> ReportGenerator {
        ReportGenerator::new(records, Arc::new(MemoryLogStore::default()), reports, config)
    }

    async fn seed(store: &MemoryRecordStore, mut record: talentroot_common::CVRecord) {
        quality::apply(&mut record, Utc::now());
        assert!(matches!(
            store.insert(&record).await.unwrap(),
            InsertOutcome::Inserted
        ));
    }

    #[tokio::test]
    async fn metrics_cover_overall_per_source_and_per_field() {
        let records = Arc::new(MemoryRecordStore::default());
        let source = Uuid::new_v4();

        let mut complete = fixtures::record("Jane Doe", Some("jane@x.com"), Some("+1 555 123 4567"));
        complete.source_id = source;
        complete.experience = vec![fixtures::position("Engineer", "Acme")];
        complete.skills = vec!["rust".to_string()];
        seed(&records, complete).await;

        let mut sparse = fixtures::record("John Roe", None, None);
        sparse.source_id = source;
        seed(&records, sparse).await;

        let generator = generator(
            records,
            Arc::new(MemoryReportStore::default()),
            ReportConfig::default(),
        );
        let report = generator.generate(scope()).await.unwrap();

        assert_eq!(report.overall.record_count, 2);
        assert_eq!(report.per_source.len(), 1);
        assert_eq!(report.per_source[0].record_count, 2);

        let email = report
            .per_field
            .iter()
            .find(|f| f.field == "email")
            .unwrap();
        assert!((email.fill_rate - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn issues_are_severity_ranked_and_recommendations_follow() {
        let records = Arc::new(MemoryRecordStore::default());
        // Nothing has email/phone/experience: several missing-field issues.
        for i in 0..4 {
            seed(&records, fixtures::record(&format!("Person {i}"), None, None)).await;
        }
        // One duplicate.
        let mut dup = fixtures::record("Person 0", None, None);
        dup.dedup.duplicate_of = Some(Uuid::new_v4());
        dup.dedup.fingerprint = "unique-dup".to_string();
        seed(&records, dup).await;

        let generator = generator(
            records,
            Arc::new(MemoryReportStore::default()),
            ReportConfig::default(),
        );
        let report = generator.generate(scope()).await.unwrap();

        assert!(!report.issues.is_empty());
        for pair in report.issues.windows(2) {
            assert!(pair[0].severity >= pair[1].severity);
        }
        assert!(report
            .issues
            .iter()
            .any(|i| i.issue_type == IssueType::MissingField));
        assert!(report
            .issues
            .iter()
            .any(|i| i.issue_type == IssueType::DuplicateEntry));
        assert!(!report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn source_weighting_changes_the_overall_roll_up() {
        let records = Arc::new(MemoryRecordStore::default());
        let big = Uuid::new_v4();
        let small = Uuid::new_v4();

        // Big source: 4 sparse records. Small source: 1 rich record.
        for i in 0..4 {
            let mut r = fixtures::record(&format!("Sparse {i}"), None, None);
            r.source_id = big;
            seed(&records, r).await;
        }
        let mut rich = fixtures::record("Rich Candidate", Some("rich@x.com"), Some("+1 555 111 2222"));
        rich.source_id = small;
        rich.experience = vec![fixtures::position("Engineer", "Acme")];
        rich.education = vec![fixtures::education("MIT")];
        rich.skills = vec!["rust".to_string()];
        rich.headline = Some("Engineer".to_string());
        rich.summary = Some("…".to_string());
        seed(&records, rich).await;

        let weighted = generator(
            records.clone(),
            Arc::new(MemoryReportStore::default()),
            ReportConfig {
                source_weighting: Weighting::ByRecordCount,
                ..ReportConfig::default()
            },
        )
        .generate(scope())
        .await
        .unwrap();

        let uniform = generator(
            records,
            Arc::new(MemoryReportStore::default()),
            ReportConfig {
                source_weighting: Weighting::Uniform,
                ..ReportConfig::default()
            },
        )
        .generate(scope())
        .await
        .unwrap();

        // Sparse records dominate under record-count weighting, so the
        // uniform roll-up scores higher.
        assert!(uniform.overall.avg_completeness > weighted.overall.avg_completeness);
    }

    #[tokio::test]
    async fn trend_series_accumulates_across_reports() {
        let records = Arc::new(MemoryRecordStore::default());
        seed(&records, fixtures::record("Jane Doe", Some("a@x.com"), None)).await;
        let reports = Arc::new(MemoryReportStore::default());

        let generator = generator(records, reports, ReportConfig::default());
        let first = generator.generate(scope()).await.unwrap();
        assert_eq!(first.trends.len(), 1);

        let second = generator.generate(scope()).await.unwrap();
        assert_eq!(second.trends.len(), 2);
        assert!(second.trends[0].date < second.trends[1].date);
    }
}
