//! Test fixtures: sample records and scripted fetch/extract adapters.
//! Compiled for tests and the `test-support` feature only.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use talentroot_common::{
    CVRecord, DedupState, Enrichment, ExperienceEntry, QualityState, RecordStatus, Result,
    SourceSelectors, TalentrootError,
};

use crate::dedup::normalize;
use crate::fetch::{
    ExtractedPage, FetchRequest, FetchResponse, Fetcher, Extractor, FieldCandidate, RawProfile,
};

/// A CV record with normalized identity and fingerprint filled in, one
/// random source, and empty sections.
pub fn record(full_name: &str, email: Option<&str>, phone: Option<&str>) -> CVRecord {
    let now = Utc::now();
    let normalized_email = email.and_then(normalize::normalize_email);
    let normalized_phone = phone.and_then(normalize::normalize_phone);
    let normalized_name = normalize::normalize_name(full_name);
    let fingerprint = normalize::fingerprint(
        normalized_email.as_deref(),
        normalized_phone.as_deref(),
        &normalized_name,
    );

    CVRecord {
        id: Uuid::new_v4(),
        full_name: full_name.to_string(),
        email: email.map(String::from),
        phone: phone.map(String::from),
        normalized_email,
        normalized_phone,
        normalized_name,
        headline: None,
        summary: None,
        experience: Vec::new(),
        education: Vec::new(),
        skills: Vec::new(),
        keywords: Vec::new(),
        source_id: Uuid::new_v4(),
        external_id: Uuid::new_v4().to_string(),
        url: None,
        scraped_at: now,
        raw: json!({}),
        additional_sources: Vec::new(),
        dedup: DedupState {
            fingerprint,
            ..DedupState::default()
        },
        quality: QualityState::default(),
        enrichment: Enrichment::default(),
        status: RecordStatus::New,
        created_at: now,
        updated_at: now,
    }
}

/// A current (open-ended) position.
pub fn position(title: &str, company: &str) -> ExperienceEntry {
    ExperienceEntry {
        title: title.to_string(),
        company: company.to_string(),
        start: None,
        end: None,
        description: None,
    }
}

pub fn education(institution: &str) -> talentroot_common::EducationEntry {
    talentroot_common::EducationEntry {
        institution: institution.to_string(),
        degree: None,
        field: None,
        start: None,
        end: None,
    }
}

/// A raw extracted profile with name and optional email at confidence 1.0.
pub fn profile(external_id: &str, full_name: &str, email: Option<&str>) -> RawProfile {
    let mut fields = BTreeMap::new();
    fields.insert(
        "full_name".to_string(),
        FieldCandidate {
            value: json!(full_name),
            confidence: 1.0,
        },
    );
    if let Some(email) = email {
        fields.insert(
            "email".to_string(),
            FieldCandidate {
                value: json!(email),
                confidence: 1.0,
            },
        );
    }
    RawProfile {
        external_id: external_id.to_string(),
        url: None,
        fields,
    }
}

/// Fetcher that answers every request with a 200 whose body is the request
/// URL, or the next queued status. Optionally invokes a hook per call.
#[derive(Default)]
pub struct ScriptedFetcher {
    statuses: Mutex<VecDeque<u16>>,
    errors: Mutex<VecDeque<String>>,
    calls: AtomicU32,
    urls: Mutex<Vec<String>>,
    #[allow(clippy::type_complexity)]
    hook: Option<Box<dyn Fn(u32) + Send + Sync>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue HTTP statuses for upcoming calls; unqueued calls get 200.
    pub fn push_status(&self, status: u16) {
        self.statuses.lock().unwrap().push_back(status);
    }

    /// Queue a transport error for the next call.
    pub fn push_error(&self, message: &str) {
        self.errors.lock().unwrap().push_back(message.to_string());
    }

    /// Run `hook(call_number)` before answering each request.
    pub fn with_hook(hook: impl Fn(u32) + Send + Sync + 'static) -> Self {
        Self {
            hook: Some(Box::new(hook)),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.hook {
            hook(call);
        }
        self.urls.lock().unwrap().push(req.url.clone());

        if let Some(message) = self.errors.lock().unwrap().pop_front() {
            return Err(TalentrootError::Fetch(message));
        }
        let status = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(200);
        Ok(FetchResponse {
            status,
            body: req.url.clone(),
            elapsed_ms: 5,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Extractor keyed by URL (the scripted fetcher echoes the URL as body).
#[derive(Default)]
pub struct ScriptedExtractor {
    pages: Mutex<HashMap<String, ExtractedPage>>,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, url: &str, profiles: Vec<RawProfile>, total_pages: Option<u32>) {
        self.pages.lock().unwrap().insert(
            url.to_string(),
            ExtractedPage {
                profiles,
                total_pages,
            },
        );
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, raw: &str, _selectors: &SourceSelectors) -> Result<ExtractedPage> {
        self.pages
            .lock()
            .unwrap()
            .get(raw)
            .cloned()
            .ok_or_else(|| TalentrootError::Extraction(format!("no scripted page for {raw}")))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
