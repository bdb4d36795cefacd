//! The external fetch/extract boundary.
//!
//! The pipeline treats fetching and field extraction as black boxes behind
//! these traits. `HttpFetcher` is the stock reqwest transport;
//! `JsonExtractor` handles API-style sources whose payloads are JSON and
//! whose selectors are JSON pointers. HTML/DOM extraction lives in adapter
//! crates outside this repository.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use talentroot_common::{ErrorKind, Result, SourceSelectors, TalentrootError};

// --- Fetcher ---

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Proxy URL; None = direct connection.
    pub proxy: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    pub elapsed_ms: u64,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse>;
    fn name(&self) -> &str;
}

// --- Extractor ---

/// One extracted field value with the extractor's confidence in it.
#[derive(Debug, Clone)]
pub struct FieldCandidate {
    pub value: Value,
    pub confidence: f32,
}

/// One candidate profile as extracted from a page, before normalization.
#[derive(Debug, Clone)]
pub struct RawProfile {
    pub external_id: String,
    pub url: Option<String>,
    pub fields: BTreeMap<String, FieldCandidate>,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    pub profiles: Vec<RawProfile>,
    /// Total page count when the source exposes it; known after page 1.
    pub total_pages: Option<u32>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, raw: &str, selectors: &SourceSelectors) -> Result<ExtractedPage>;
    fn name(&self) -> &str;
}

// --- Error classification ---

/// Map an HTTP status to an error kind, None for success.
pub fn classify_status(status: u16) -> Option<ErrorKind> {
    match status {
        200..=299 => None,
        401 | 403 => Some(ErrorKind::AuthError),
        404 | 410 => Some(ErrorKind::NotFound),
        429 => Some(ErrorKind::RateLimited),
        500..=599 => Some(ErrorKind::ServerError),
        _ => Some(ErrorKind::Other),
    }
}

/// Classify a failed fetch into the retry taxonomy.
pub fn classify_fetch_error(err: &TalentrootError) -> ErrorKind {
    match err {
        TalentrootError::Fetch(msg) => {
            if msg.contains("timed out") || msg.contains("timeout") {
                ErrorKind::Timeout
            } else if msg.contains("connect") || msg.contains("connection") {
                ErrorKind::Connection
            } else if msg.contains("proxy") {
                ErrorKind::ProxyFailure
            } else {
                ErrorKind::Other
            }
        }
        TalentrootError::RateLimited { .. } => ErrorKind::RateLimited,
        TalentrootError::Extraction(_) => ErrorKind::ParseError,
        TalentrootError::Validation(_) => ErrorKind::ValidationError,
        _ => ErrorKind::Other,
    }
}

// --- HttpFetcher ---

/// reqwest-backed transport. Proxied requests need a client built for that
/// proxy, so clients are cached per proxy URL.
pub struct HttpFetcher {
    direct: reqwest::Client,
    proxied: Mutex<HashMap<String, reqwest::Client>>,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            direct: reqwest::Client::new(),
            proxied: Mutex::new(HashMap::new()),
            user_agent: user_agent.into(),
        }
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<reqwest::Client> {
        let Some(proxy_url) = proxy else {
            return Ok(self.direct.clone());
        };
        let mut proxied = self.proxied.lock().unwrap();
        if let Some(client) = proxied.get(proxy_url) {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .proxy(
                reqwest::Proxy::all(proxy_url)
                    .map_err(|e| TalentrootError::Fetch(format!("bad proxy {proxy_url}: {e}")))?,
            )
            .build()
            .map_err(|e| TalentrootError::Fetch(format!("proxy client build: {e}")))?;
        proxied.insert(proxy_url.to_string(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse> {
        let parsed = url::Url::parse(&req.url)
            .map_err(|e| TalentrootError::Fetch(format!("invalid URL {}: {e}", req.url)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(TalentrootError::Fetch(format!(
                "only http/https URLs are allowed, got: {}",
                parsed.scheme()
            )));
        }

        let client = self.client_for(req.proxy.as_deref())?;
        let mut builder = client
            .get(parsed)
            .timeout(req.timeout)
            .header(reqwest::header::USER_AGENT, &self.user_agent);
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let started = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| TalentrootError::Fetch(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TalentrootError::Fetch(format!("body read: {e}")))?;

        Ok(FetchResponse {
            status,
            body,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

// --- JsonExtractor ---

/// Extractor for JSON API sources. The `list` selector is a JSON pointer to
/// the profile array; field selectors are pointers within one element.
/// Directly-addressed values get confidence 1.0.
pub struct JsonExtractor;

impl JsonExtractor {
    fn pointer<'a>(value: &'a Value, selector: &str) -> Option<&'a Value> {
        if selector.is_empty() {
            return Some(value);
        }
        value.pointer(selector)
    }
}

#[async_trait]
impl Extractor for JsonExtractor {
    async fn extract(&self, raw: &str, selectors: &SourceSelectors) -> Result<ExtractedPage> {
        let parsed: Value = serde_json::from_str(raw)
            .map_err(|e| TalentrootError::Extraction(format!("payload is not JSON: {e}")))?;

        let list = Self::pointer(&parsed, &selectors.list)
            .and_then(Value::as_array)
            .ok_or_else(|| {
                TalentrootError::Extraction(format!(
                    "list selector {:?} did not resolve to an array",
                    selectors.list
                ))
            })?;

        let total_pages = parsed
            .pointer("/total_pages")
            .and_then(Value::as_u64)
            .map(|n| n as u32);

        let mut profiles = Vec::with_capacity(list.len());
        for (idx, item) in list.iter().enumerate() {
            let external_id = Self::pointer(item, selectors.fields.get("external_id").map_or("/id", String::as_str))
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| format!("item-{idx}"));

            let mut fields = BTreeMap::new();
            for (field, selector) in &selectors.fields {
                if field == "external_id" {
                    continue;
                }
                if let Some(value) = Self::pointer(item, selector) {
                    if !value.is_null() {
                        fields.insert(
                            field.clone(),
                            FieldCandidate {
                                value: value.clone(),
                                confidence: 1.0,
                            },
                        );
                    }
                }
            }

            let url = Self::pointer(item, "/url")
                .and_then(Value::as_str)
                .map(String::from);

            profiles.push(RawProfile {
                external_id,
                url,
                fields,
            });
        }

        Ok(ExtractedPage {
            profiles,
            total_pages,
        })
    }

    fn name(&self) -> &str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selectors() -> SourceSelectors {
        let mut fields = BTreeMap::new();
        fields.insert("full_name".to_string(), "/name".to_string());
        fields.insert("email".to_string(), "/contact/email".to_string());
        fields.insert("external_id".to_string(), "/id".to_string());
        SourceSelectors {
            list: "/results".to_string(),
            fields,
        }
    }

    #[tokio::test]
    async fn extracts_profiles_from_json_payload() {
        let raw = r#"{
            "results": [
                {"id": "p1", "name": "Jane Doe", "contact": {"email": "jane@x.com"}},
                {"id": "p2", "name": "John Roe", "contact": {}}
            ],
            "total_pages": 4
        }"#;

        let page = JsonExtractor.extract(raw, &selectors()).await.unwrap();
        assert_eq!(page.total_pages, Some(4));
        assert_eq!(page.profiles.len(), 2);
        assert_eq!(page.profiles[0].external_id, "p1");
        assert_eq!(
            page.profiles[0].fields.get("email").unwrap().value,
            Value::String("jane@x.com".to_string())
        );
        // Missing nested field is simply absent, not null.
        assert!(!page.profiles[1].fields.contains_key("email"));
    }

    #[tokio::test]
    async fn non_json_payload_is_a_parse_error() {
        let err = JsonExtractor
            .extract("<html></html>", &selectors())
            .await
            .unwrap_err();
        assert!(matches!(err, TalentrootError::Extraction(_)));
        assert_eq!(classify_fetch_error(&err), ErrorKind::ParseError);
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(200), None);
        assert_eq!(classify_status(401), Some(ErrorKind::AuthError));
        assert_eq!(classify_status(404), Some(ErrorKind::NotFound));
        assert_eq!(classify_status(429), Some(ErrorKind::RateLimited));
        assert_eq!(classify_status(503), Some(ErrorKind::ServerError));
    }

    #[test]
    fn transient_statuses_are_retryable() {
        assert!(classify_status(500).unwrap().is_transient());
        assert!(classify_status(429).unwrap().is_transient());
        assert!(!classify_status(403).unwrap().is_transient());
    }
}
