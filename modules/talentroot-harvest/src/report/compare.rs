//! Report-to-report deltas: metric movement plus issues resolved vs
//! introduced between two snapshots.

use std::collections::HashSet;

use talentroot_common::{IssueStatus, IssueType, QualityReport, ReportDelta};

/// Issues open in a report, keyed by (type, field).
fn open_keys(report: &QualityReport) -> HashSet<(IssueType, Option<&str>)> {
    report
        .issues
        .iter()
        .filter(|i| i.status == IssueStatus::Open)
        .map(|i| i.key())
        .collect()
}

/// Diff report `b` (newer) against report `a` (older).
pub fn compare_reports(a: &QualityReport, b: &QualityReport) -> ReportDelta {
    let a_open = open_keys(a);
    let b_open = open_keys(b);

    ReportDelta {
        report_a: a.id,
        report_b: b.id,
        record_count_delta: b.overall.record_count as i64 - a.overall.record_count as i64,
        completeness_delta: b.overall.avg_completeness - a.overall.avg_completeness,
        freshness_delta: b.overall.avg_freshness - a.overall.avg_freshness,
        overall_delta: b.overall.avg_overall - a.overall.avg_overall,
        duplicate_rate_delta: b.overall.duplicate_rate - a.overall.duplicate_rate,
        issues_resolved: a_open.difference(&b_open).count(),
        issues_introduced: b_open.difference(&a_open).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use talentroot_common::{
        IssueSeverity, IssueType, OverallMetrics, QualityIssue, ReportScope,
    };
    use uuid::Uuid;

    fn issue(issue_type: IssueType, field: Option<&str>) -> QualityIssue {
        QualityIssue {
            issue_type,
            severity: IssueSeverity::Medium,
            field: field.map(String::from),
            description: String::new(),
            affected_records: 1,
            examples: Vec::new(),
            auto_fixable: false,
            status: IssueStatus::Open,
        }
    }

    fn report(record_count: u64, completeness: f32, issues: Vec<QualityIssue>) -> QualityReport {
        QualityReport {
            id: Uuid::new_v4(),
            scope: ReportScope {
                source_ids: Vec::new(),
                from: Utc::now() - Duration::days(30),
                to: Utc::now(),
            },
            generated_at: Utc::now(),
            overall: OverallMetrics {
                record_count,
                avg_completeness: completeness,
                avg_freshness: 80.0,
                avg_overall: (completeness + 80.0) / 2.0,
                duplicate_rate: 0.1,
                validation_error_rate: 0.0,
            },
            per_source: Vec::new(),
            per_field: Vec::new(),
            issues,
            trends: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    #[test]
    fn deltas_track_metric_movement() {
        let a = report(100, 60.0, vec![]);
        let b = report(150, 72.0, vec![]);
        let delta = compare_reports(&a, &b);
        assert_eq!(delta.record_count_delta, 50);
        assert!((delta.completeness_delta - 12.0).abs() < 1e-6);
    }

    #[test]
    fn resolved_and_introduced_issues_are_counted_by_identity() {
        let a = report(
            100,
            60.0,
            vec![
                issue(IssueType::MissingField, Some("email")),
                issue(IssueType::StaleData, None),
            ],
        );
        let b = report(
            100,
            60.0,
            vec![
                issue(IssueType::StaleData, None),
                issue(IssueType::InvalidFormat, Some("phone")),
            ],
        );

        let delta = compare_reports(&a, &b);
        assert_eq!(delta.issues_resolved, 1); // missing email gone
        assert_eq!(delta.issues_introduced, 1); // invalid phone appeared
    }

    #[test]
    fn identical_reports_have_a_zero_delta() {
        let a = report(10, 50.0, vec![issue(IssueType::StaleData, None)]);
        let delta = compare_reports(&a, &a);
        assert_eq!(delta.record_count_delta, 0);
        assert_eq!(delta.issues_resolved, 0);
        assert_eq!(delta.issues_introduced, 0);
    }
}
