//! Quality scoring: weighted completeness, freshness decay, and field
//! validation.
//!
//! Accuracy findings from validation are tracked on the record and surfaced
//! in reports, but deliberately not folded into the overall score.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use talentroot_common::{CVRecord, QualityState};

/// Field presence weights for the completeness score.
const FULL_NAME_WEIGHT: f32 = 10.0;
const EMAIL_WEIGHT: f32 = 15.0;
const PHONE_WEIGHT: f32 = 10.0;
const HEADLINE_WEIGHT: f32 = 10.0;
const SUMMARY_WEIGHT: f32 = 10.0;
const EXPERIENCE_WEIGHT: f32 = 15.0;
const EDUCATION_WEIGHT: f32 = 10.0;
const SKILLS_WEIGHT: f32 = 10.0;
const CURRENT_TITLE_WEIGHT: f32 = 5.0;
const CURRENT_COMPANY_WEIGHT: f32 = 5.0;

/// Freshness loses this many points per day since scrape.
const FRESHNESS_DECAY_PER_DAY: f32 = 2.0;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap()
});
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9 ().-]{7,20}$").unwrap());

/// Weighted field presence, normalized to 0-100.
pub fn completeness(record: &CVRecord) -> f32 {
    let current = record.current_position();
    let checks: [(bool, f32); 10] = [
        (!record.full_name.trim().is_empty(), FULL_NAME_WEIGHT),
        (record.email.is_some(), EMAIL_WEIGHT),
        (record.phone.is_some(), PHONE_WEIGHT),
        (is_filled(&record.headline), HEADLINE_WEIGHT),
        (is_filled(&record.summary), SUMMARY_WEIGHT),
        (!record.experience.is_empty(), EXPERIENCE_WEIGHT),
        (!record.education.is_empty(), EDUCATION_WEIGHT),
        (!record.skills.is_empty(), SKILLS_WEIGHT),
        (
            current.map(|e| !e.title.is_empty()).unwrap_or(false),
            CURRENT_TITLE_WEIGHT,
        ),
        (
            current.map(|e| !e.company.is_empty()).unwrap_or(false),
            CURRENT_COMPANY_WEIGHT,
        ),
    ];

    let total: f32 = checks.iter().map(|(_, w)| w).sum();
    let earned: f32 = checks
        .iter()
        .filter(|(present, _)| *present)
        .map(|(_, w)| w)
        .sum();
    earned / total * 100.0
}

/// 100 at scrape time, minus 2 per day, floored at 0.
pub fn freshness(record: &CVRecord, now: DateTime<Utc>) -> f32 {
    let age_days = record.age_days(now).max(0) as f32;
    (100.0 - FRESHNESS_DECAY_PER_DAY * age_days).max(0.0)
}

/// Field-level validation findings. Empty = clean.
pub fn validate(record: &CVRecord) -> Vec<String> {
    let mut errors = Vec::new();

    if let Some(email) = record.email.as_deref() {
        if !EMAIL_RE.is_match(email.trim()) {
            errors.push(format!("email: invalid format {email:?}"));
        }
    }
    if let Some(phone) = record.phone.as_deref() {
        if !PHONE_RE.is_match(phone.trim()) {
            errors.push(format!("phone: invalid format {phone:?}"));
        }
    }
    for (idx, entry) in record.experience.iter().enumerate() {
        if let (Some(start), Some(end)) = (entry.start, entry.end) {
            if end < start {
                errors.push(format!(
                    "experience[{idx}]: ends {end} before it starts {start}"
                ));
            }
        }
    }
    for (idx, entry) in record.education.iter().enumerate() {
        if let (Some(start), Some(end)) = (entry.start, entry.end) {
            if end < start {
                errors.push(format!(
                    "education[{idx}]: ends {end} before it starts {start}"
                ));
            }
        }
    }

    errors
}

/// Full quality state for a record at `now`.
pub fn score(record: &CVRecord, now: DateTime<Utc>) -> QualityState {
    let completeness = completeness(record);
    let freshness = freshness(record, now);
    QualityState {
        completeness,
        freshness,
        overall: (completeness + freshness) / 2.0,
        validation_errors: validate(record),
        scored_at: Some(now),
    }
}

/// Recompute and store the quality sub-state in place.
pub fn apply(record: &mut CVRecord, now: DateTime<Utc>) {
    record.quality = score(record, now);
}

/// Manual revalidation: rescore one record on demand and persist it.
pub async fn revalidate(
    store: &dyn talentroot_store::RecordStore,
    id: uuid::Uuid,
) -> talentroot_common::Result<QualityState> {
    let mut record = store
        .get(id)
        .await?
        .ok_or(talentroot_common::TalentrootError::RecordNotFound(id))?;
    apply(&mut record, Utc::now());
    store.update(&record).await?;
    Ok(record.quality)
}

fn is_filled(value: &Option<String>) -> bool {
    value.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use chrono::Duration;

    #[test]
    fn completeness_grows_monotonically_as_fields_fill() {
        let mut record = fixtures::record("Jane Doe", None, None);
        record.experience.clear();
        record.education.clear();
        record.skills.clear();
        record.headline = None;
        record.summary = None;
        record.phone = None;

        let mut last = completeness(&record);
        record.email = Some("jane@x.com".to_string());
        let with_email = completeness(&record);
        assert!(with_email > last);
        last = with_email;

        record.phone = Some("+1 555 123 4567".to_string());
        let with_phone = completeness(&record);
        assert!(with_phone > last);
        last = with_phone;

        record.experience = vec![fixtures::position("Engineer", "Acme")];
        let with_experience = completeness(&record);
        assert!(with_experience > last);
        last = with_experience;

        record.skills = vec!["rust".to_string()];
        record.education = vec![fixtures::education("MIT")];
        record.headline = Some("Engineer".to_string());
        record.summary = Some("Ships things".to_string());
        let full = completeness(&record);
        assert!(full > last);
        assert!((full - 100.0).abs() < f32::EPSILON);
    }

    #[test]
    fn freshness_decays_two_points_per_day() {
        let now = Utc::now();
        let mut record = fixtures::record("Jane Doe", None, None);

        record.scraped_at = now;
        assert!((freshness(&record, now) - 100.0).abs() < f32::EPSILON);

        record.scraped_at = now - Duration::days(10);
        assert!((freshness(&record, now) - 80.0).abs() < f32::EPSILON);

        record.scraped_at = now - Duration::days(90);
        assert_eq!(freshness(&record, now), 0.0);
    }

    #[test]
    fn overall_is_mean_of_completeness_and_freshness() {
        let now = Utc::now();
        let mut record = fixtures::record("Jane Doe", Some("jane@x.com"), None);
        record.scraped_at = now - Duration::days(25);

        let state = score(&record, now);
        assert!(
            (state.overall - (state.completeness + state.freshness) / 2.0).abs() < f32::EPSILON
        );
    }

    #[test]
    fn validation_flags_bad_formats_and_reversed_dates() {
        let mut record = fixtures::record("Jane Doe", Some("not-an-email"), None);
        record.phone = Some("call me".to_string());
        record.experience = vec![talentroot_common::ExperienceEntry {
            title: "Engineer".to_string(),
            company: "Acme".to_string(),
            start: Some(chrono::NaiveDate::from_ymd_opt(2022, 5, 1).unwrap()),
            end: Some(chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()),
            description: None,
        }];

        let errors = validate(&record);
        assert_eq!(errors.len(), 3);
        assert!(errors[0].starts_with("email:"));
        assert!(errors[1].starts_with("phone:"));
        assert!(errors[2].starts_with("experience[0]:"));
    }

    #[tokio::test]
    async fn revalidate_persists_the_new_score() {
        use talentroot_store::memory::MemoryRecordStore;
        use talentroot_store::{InsertOutcome, RecordStore};

        let store = MemoryRecordStore::default();
        let mut record = fixtures::record("Jane Doe", Some("jane@x.com"), None);
        record.scraped_at = Utc::now() - Duration::days(30);
        assert!(matches!(
            store.insert(&record).await.unwrap(),
            InsertOutcome::Inserted
        ));

        let state = revalidate(&store, record.id).await.unwrap();
        assert!((state.freshness - 40.0).abs() < 1.0);

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.quality, state);
    }

    #[tokio::test]
    async fn revalidate_unknown_record_is_not_found() {
        use talentroot_store::memory::MemoryRecordStore;

        let store = MemoryRecordStore::default();
        let err = revalidate(&store, uuid::Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(
            err,
            talentroot_common::TalentrootError::RecordNotFound(_)
        ));
    }

    #[test]
    fn validation_errors_do_not_change_overall() {
        let now = Utc::now();
        let clean = fixtures::record("Jane Doe", Some("jane@x.com"), None);
        let mut dirty = clean.clone();
        dirty.email = Some("broken@".to_string());

        let clean_state = score(&clean, now);
        let dirty_state = score(&dirty, now);
        assert!(!dirty_state.validation_errors.is_empty());
        assert_eq!(clean_state.overall, dirty_state.overall);
    }
}
