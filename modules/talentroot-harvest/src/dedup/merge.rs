//! Non-destructive record merging.
//!
//! The canonical record keeps its earliest creation time and absorbs the
//! loser's sources and keywords as set-unions; the loser is marked duplicate
//! with a pointer, never deleted. Repeating a merge is a no-op.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use talentroot_common::{CVRecord, RecordStatus};

/// What to do when both records populate the same scalar field. There is no
/// implicit rule here; the policy is explicit and configured on the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Keep the canonical record's value.
    #[default]
    PreferCanonical,
    /// Take the incoming record's value.
    PreferIncoming,
    /// Keep whichever value carries more content.
    PreferLonger,
}

/// Merge `loser` into `canonical`. Mutates both: the canonical absorbs data,
/// the loser gets its duplicate pointer and status.
pub fn merge_into(
    canonical: &mut CVRecord,
    loser: &mut CVRecord,
    confidence: f32,
    matched_fields: &[String],
    policy: ConflictPolicy,
    now: DateTime<Utc>,
) {
    // Set-union of provenance: the loser's own source plus everything it
    // had already absorbed. Union keeps repeated merges idempotent.
    let mut sources: HashSet<Uuid> = canonical.additional_sources.iter().copied().collect();
    sources.insert(canonical.source_id);
    sources.insert(loser.source_id);
    sources.extend(loser.additional_sources.iter().copied());
    sources.remove(&canonical.source_id);
    let mut additional: Vec<Uuid> = sources.into_iter().collect();
    additional.sort();
    canonical.additional_sources = additional;

    union_in_place(&mut canonical.keywords, &loser.keywords);
    union_in_place(&mut canonical.skills, &loser.skills);

    resolve_scalar(&mut canonical.email, &loser.email, policy);
    resolve_scalar(&mut canonical.phone, &loser.phone, policy);
    resolve_scalar(&mut canonical.headline, &loser.headline, policy);
    resolve_scalar(&mut canonical.summary, &loser.summary, policy);
    if canonical.email.is_some() {
        canonical.normalized_email = canonical
            .email
            .as_deref()
            .and_then(super::normalize::normalize_email);
    }
    if canonical.phone.is_some() {
        canonical.normalized_phone = canonical
            .phone
            .as_deref()
            .and_then(super::normalize::normalize_phone);
    }

    // Structured sections follow the same policy, treating "more entries"
    // as the longer value.
    if canonical.experience.is_empty()
        || (policy == ConflictPolicy::PreferIncoming && !loser.experience.is_empty())
        || (policy == ConflictPolicy::PreferLonger
            && loser.experience.len() > canonical.experience.len())
    {
        canonical.experience = loser.experience.clone();
    }
    if canonical.education.is_empty()
        || (policy == ConflictPolicy::PreferIncoming && !loser.education.is_empty())
        || (policy == ConflictPolicy::PreferLonger
            && loser.education.len() > canonical.education.len())
    {
        canonical.education = loser.education.clone();
    }

    canonical.created_at = canonical.created_at.min(loser.created_at);
    canonical.updated_at = now;

    loser.status = RecordStatus::Duplicate;
    loser.dedup.duplicate_of = Some(canonical.id);
    loser.dedup.confidence = Some(confidence);
    loser.dedup.matched_fields = matched_fields.to_vec();
    loser.dedup.last_checked = Some(now);
    loser.updated_at = now;
}

/// Append-preserving set union: keeps the canonical's order, adds unseen
/// values from the other list.
fn union_in_place(target: &mut Vec<String>, other: &[String]) {
    let mut seen: HashSet<String> = target.iter().map(|s| s.to_lowercase()).collect();
    for value in other {
        if seen.insert(value.to_lowercase()) {
            target.push(value.clone());
        }
    }
}

fn resolve_scalar(canonical: &mut Option<String>, incoming: &Option<String>, policy: ConflictPolicy) {
    match (canonical.as_ref(), incoming.as_ref()) {
        (None, Some(v)) => *canonical = Some(v.clone()),
        (Some(current), Some(candidate)) => match policy {
            ConflictPolicy::PreferCanonical => {}
            ConflictPolicy::PreferIncoming => *canonical = Some(candidate.clone()),
            ConflictPolicy::PreferLonger => {
                if candidate.len() > current.len() {
                    *canonical = Some(candidate.clone());
                }
            }
        },
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn merge_twice_is_idempotent() {
        let mut canonical = fixtures::record("Jane Doe", Some("a@x.com"), None);
        canonical.keywords = vec!["rust".to_string()];
        let mut loser = fixtures::record("Jane Doe", Some("a@x.com"), None);
        loser.keywords = vec!["rust".to_string(), "sql".to_string()];
        let now = Utc::now();

        merge_into(
            &mut canonical,
            &mut loser,
            1.0,
            &["email".to_string()],
            ConflictPolicy::PreferCanonical,
            now,
        );
        let sources_after_once = canonical.additional_sources.clone();
        let keywords_after_once = canonical.keywords.clone();

        merge_into(
            &mut canonical,
            &mut loser,
            1.0,
            &["email".to_string()],
            ConflictPolicy::PreferCanonical,
            now,
        );
        assert_eq!(canonical.additional_sources, sources_after_once);
        assert_eq!(canonical.keywords, keywords_after_once);
        assert_eq!(canonical.keywords, vec!["rust", "sql"]);
    }

    #[test]
    fn canonical_keeps_earliest_creation_time() {
        let mut canonical = fixtures::record("Jane Doe", Some("a@x.com"), None);
        let mut loser = fixtures::record("Jane Doe", Some("a@x.com"), None);
        loser.created_at = canonical.created_at - chrono::Duration::days(3);
        let earliest = loser.created_at;

        merge_into(
            &mut canonical,
            &mut loser,
            1.0,
            &["email".to_string()],
            ConflictPolicy::PreferCanonical,
            Utc::now(),
        );
        assert_eq!(canonical.created_at, earliest);
    }

    #[test]
    fn loser_is_marked_not_deleted() {
        let mut canonical = fixtures::record("Jane Doe", Some("a@x.com"), None);
        let mut loser = fixtures::record("Jane Doe", Some("a@x.com"), None);
        let loser_id = loser.id;

        merge_into(
            &mut canonical,
            &mut loser,
            1.0,
            &["email".to_string()],
            ConflictPolicy::PreferCanonical,
            Utc::now(),
        );
        assert_eq!(loser.id, loser_id);
        assert_eq!(loser.status, RecordStatus::Duplicate);
        assert_eq!(loser.dedup.duplicate_of, Some(canonical.id));
        assert_eq!(loser.dedup.confidence, Some(1.0));
    }

    #[test]
    fn additional_sources_accumulate_across_merges() {
        let mut canonical = fixtures::record("Jane Doe", Some("a@x.com"), None);
        let mut loser_one = fixtures::record("Jane Doe", Some("a@x.com"), None);
        let mut loser_two = fixtures::record("Jane Doe", Some("a@x.com"), None);
        let now = Utc::now();

        merge_into(
            &mut canonical,
            &mut loser_one,
            1.0,
            &["email".to_string()],
            ConflictPolicy::PreferCanonical,
            now,
        );
        merge_into(
            &mut canonical,
            &mut loser_two,
            1.0,
            &["email".to_string()],
            ConflictPolicy::PreferCanonical,
            now,
        );

        assert!(canonical.additional_sources.contains(&loser_one.source_id));
        assert!(canonical.additional_sources.contains(&loser_two.source_id));
        assert!(!canonical.additional_sources.contains(&canonical.source_id));
    }

    #[test]
    fn conflict_policy_governs_scalars() {
        let mut canonical = fixtures::record("Jane Doe", Some("a@x.com"), None);
        canonical.headline = Some("Engineer".to_string());
        let mut loser = fixtures::record("Jane Doe", Some("a@x.com"), None);
        loser.headline = Some("Principal Engineer at Acme".to_string());
        let now = Utc::now();

        let mut keep = canonical.clone();
        merge_into(
            &mut keep,
            &mut loser.clone(),
            1.0,
            &[],
            ConflictPolicy::PreferCanonical,
            now,
        );
        assert_eq!(keep.headline.as_deref(), Some("Engineer"));

        let mut take = canonical.clone();
        merge_into(
            &mut take,
            &mut loser.clone(),
            1.0,
            &[],
            ConflictPolicy::PreferIncoming,
            now,
        );
        assert_eq!(take.headline.as_deref(), Some("Principal Engineer at Acme"));

        let mut longer = canonical.clone();
        merge_into(
            &mut longer,
            &mut loser,
            1.0,
            &[],
            ConflictPolicy::PreferLonger,
            now,
        );
        assert_eq!(
            longer.headline.as_deref(),
            Some("Principal Engineer at Acme")
        );
    }
}
