//! Derived enrichment: experience level, compensation band, and simple
//! insights inferred from the structured sections. Pure functions, applied
//! at ingestion and by enrichment jobs.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use talentroot_common::{CompensationBand, CVRecord, Enrichment, ExperienceLevel};

/// Titles that imply executive scope regardless of tenure.
const EXECUTIVE_TITLE_MARKERS: &[&str] = &["chief", "cto", "ceo", "cfo", "vp ", "vice president"];
const LEAD_TITLE_MARKERS: &[&str] = &["lead", "principal", "head of", "director", "staff"];

/// Total professional experience in years, counting open-ended positions up
/// to `now`. Overlapping positions double-count; precision past the month is
/// not meaningful here.
pub fn total_experience_years(record: &CVRecord, now: DateTime<Utc>) -> f32 {
    let today = now.date_naive();
    record
        .experience
        .iter()
        .filter_map(|e| {
            let start = e.start?;
            let end = e.end.unwrap_or(today);
            if end < start {
                return None;
            }
            Some(months_between(start, end) as f32 / 12.0)
        })
        .sum()
}

fn months_between(start: NaiveDate, end: NaiveDate) -> i32 {
    (end.year() - start.year()) * 12 + (end.month() as i32 - start.month() as i32)
}

pub fn infer_level(record: &CVRecord, now: DateTime<Utc>) -> ExperienceLevel {
    let current_title = record
        .current_position()
        .map(|e| e.title.to_lowercase())
        .unwrap_or_default();
    if EXECUTIVE_TITLE_MARKERS
        .iter()
        .any(|m| current_title.contains(m))
    {
        return ExperienceLevel::Executive;
    }
    if LEAD_TITLE_MARKERS.iter().any(|m| current_title.contains(m)) {
        return ExperienceLevel::Lead;
    }

    let years = total_experience_years(record, now);
    if years < 2.0 {
        ExperienceLevel::Entry
    } else if years < 5.0 {
        ExperienceLevel::Mid
    } else if years < 9.0 {
        ExperienceLevel::Senior
    } else {
        ExperienceLevel::Lead
    }
}

/// Rough annual band per level. A real pipeline would localize this; the
/// estimate exists so queries can band candidates before any human review.
pub fn estimate_band(level: ExperienceLevel) -> CompensationBand {
    let (low, high) = match level {
        ExperienceLevel::Entry => (45_000, 70_000),
        ExperienceLevel::Mid => (65_000, 95_000),
        ExperienceLevel::Senior => (90_000, 130_000),
        ExperienceLevel::Lead => (120_000, 170_000),
        ExperienceLevel::Executive => (160_000, 280_000),
    };
    CompensationBand {
        low,
        high,
        currency: "USD".to_string(),
    }
}

pub fn derive_insights(record: &CVRecord, now: DateTime<Utc>) -> Vec<String> {
    let mut insights = Vec::new();

    let positions = record.experience.len();
    let years = total_experience_years(record, now);
    if positions >= 4 && years > 0.0 && years / (positions as f32) < 1.5 {
        insights.push("frequent position changes (avg tenure under 18 months)".to_string());
    }
    if record.skills.len() >= 10 {
        insights.push(format!("broad skill set ({} skills listed)", record.skills.len()));
    }
    if record
        .experience
        .iter()
        .all(|e| e.end.is_some())
        && !record.experience.is_empty()
    {
        insights.push("no current position listed".to_string());
    }

    insights
}

/// Populate the enrichment sub-state in place.
pub fn apply(record: &mut CVRecord, now: DateTime<Utc>) {
    let level = infer_level(record, now);
    record.enrichment = Enrichment {
        experience_level: Some(level),
        compensation_band: Some(estimate_band(level)),
        insights: derive_insights(record, now),
        enriched_at: Some(now),
    };
}
