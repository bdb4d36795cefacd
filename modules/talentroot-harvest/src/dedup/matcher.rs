//! Candidate matching in fixed priority order with fixed confidences.

use talentroot_common::{name_key, CVRecord, Result};
use talentroot_store::RecordStore;

use super::normalize::normalize_name;

/// Exact normalized-email match.
pub const EMAIL_CONFIDENCE: f32 = 1.0;
/// Exact normalized-phone match.
pub const PHONE_CONFIDENCE: f32 = 0.9;
/// Ceiling for fuzzy name+employer matches. Deliberately below any sane
/// auto-merge threshold so fuzzy hits are only ever flagged.
pub const FUZZY_CONFIDENCE_CEILING: f32 = 0.7;
/// Minimum Jaro-Winkler similarity before a name pair counts as a match.
pub const FUZZY_NAME_MIN_SIMILARITY: f64 = 0.85;

#[derive(Debug, Clone)]
pub struct Match {
    pub candidate: CVRecord,
    pub confidence: f32,
    pub matched_fields: Vec<String>,
}

/// Find the best duplicate candidate for an incoming record, in priority
/// order: exact email, exact phone, fuzzy name + current employer.
pub async fn best_match(store: &dyn RecordStore, record: &CVRecord) -> Result<Option<Match>> {
    if let Some(email) = record.normalized_email.as_deref() {
        if let Some(candidate) = store.find_canonical_by_email(email).await? {
            if candidate.id != record.id {
                return Ok(Some(Match {
                    candidate,
                    confidence: EMAIL_CONFIDENCE,
                    matched_fields: vec!["email".to_string()],
                }));
            }
        }
    }

    if let Some(phone) = record.normalized_phone.as_deref() {
        if let Some(candidate) = store.find_canonical_by_phone(phone).await? {
            if candidate.id != record.id {
                return Ok(Some(Match {
                    candidate,
                    confidence: PHONE_CONFIDENCE,
                    matched_fields: vec!["phone".to_string()],
                }));
            }
        }
    }

    fuzzy_name_match(store, record).await
}

async fn fuzzy_name_match(store: &dyn RecordStore, record: &CVRecord) -> Result<Option<Match>> {
    let employer = match current_employer(record) {
        Some(e) => e,
        // Without an employer the name alone is too weak a signal.
        None => return Ok(None),
    };

    let candidates = store
        .candidates_by_name_key(&name_key(&record.normalized_name))
        .await?;

    let mut best: Option<(f64, CVRecord)> = None;
    for candidate in candidates {
        if candidate.id == record.id {
            continue;
        }
        let Some(candidate_employer) = current_employer(&candidate) else {
            continue;
        };
        if candidate_employer != employer {
            continue;
        }
        let similarity =
            strsim::jaro_winkler(&record.normalized_name, &candidate.normalized_name);
        if similarity < FUZZY_NAME_MIN_SIMILARITY {
            continue;
        }
        if best.as_ref().map(|(s, _)| similarity > *s).unwrap_or(true) {
            best = Some((similarity, candidate));
        }
    }

    Ok(best.map(|(similarity, candidate)| Match {
        candidate,
        confidence: FUZZY_CONFIDENCE_CEILING * similarity as f32,
        matched_fields: vec!["name".to_string(), "company".to_string()],
    }))
}

fn current_employer(record: &CVRecord) -> Option<String> {
    record
        .current_position()
        .map(|e| normalize_name(&e.company))
        .filter(|c| !c.is_empty())
}
