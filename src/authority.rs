use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::Value;

use crate::cache::{AuthorityCache, cache_key};
use crate::domain::{AuthorityRecord, LookupMode};
use crate::error::KiraError;
use crate::normalize::normalize;

pub const DEFAULT_BASE_URL: &str = "https://rest.genenames.org";

/// Raw access to the gene-name authority. `Ok(None)` means the service
/// answered and knows nothing about the query.
pub trait AuthorityClient: Send + Sync {
    fn fetch(&self, query: &str, mode: LookupMode) -> Result<Option<AuthorityRecord>, KiraError>;
}

#[derive(Clone)]
pub struct HgncHttpClient {
    client: Client,
    base_url: String,
}

impl HgncHttpClient {
    pub fn new() -> Result<Self, KiraError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-gsr/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::AuthorityHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| KiraError::AuthorityHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn fetch_url(&self, field: &str, query: &str) -> String {
        format!("{}/fetch/{field}/{}", self.base_url, encode_segment(query))
    }

    fn fetch_field(&self, field: &str, query: &str) -> Result<Option<AuthorityRecord>, KiraError> {
        let url = self.fetch_url(field, query);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        let response = Self::handle_status(response)?;
        let raw: Value = response
            .json()
            .map_err(|err| KiraError::AuthorityHttp(err.to_string()))?;
        let matches = document_count(&raw);
        if matches > 1 {
            tracing::warn!(
                field,
                query,
                matches,
                "ambiguous authority answer, using the first document"
            );
        }
        extract_record(&raw)
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, KiraError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(KiraError::AuthorityHttp(err.to_string()));
                }
            }
        }
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, KiraError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "authority request failed".to_string());
        Err(KiraError::AuthorityStatus { status, message })
    }
}

impl AuthorityClient for HgncHttpClient {
    fn fetch(&self, query: &str, mode: LookupMode) -> Result<Option<AuthorityRecord>, KiraError> {
        match mode {
            LookupMode::StableId => self.fetch_field("hgnc_id", query),
            LookupMode::XrefId => self.fetch_field("ensembl_gene_id", query),
            LookupMode::Symbol => {
                // Outdated names only resolve through the prev/alias fields.
                for field in ["symbol", "prev_symbol", "alias_symbol"] {
                    if let Some(record) = self.fetch_field(field, query)? {
                        return Ok(Some(record));
                    }
                }
                Ok(None)
            }
        }
    }
}

fn response_docs(raw: &Value) -> Option<&Vec<Value>> {
    raw.get("response")
        .and_then(|v| v.get("docs"))
        .and_then(|v| v.as_array())
}

pub fn document_count(raw: &Value) -> usize {
    response_docs(raw).map_or(0, Vec::len)
}

// Zero documents is "not found"; a payload without `response.docs` is malformed.
pub fn extract_record(raw: &Value) -> Result<Option<AuthorityRecord>, KiraError> {
    let docs = response_docs(raw).ok_or_else(|| {
        KiraError::AuthorityHttp("malformed authority payload: missing response.docs".to_string())
    })?;
    let Some(doc) = docs.first() else {
        return Ok(None);
    };
    let record = AuthorityRecord {
        canonical_symbol: string_field(doc, "symbol"),
        stable_id: string_field(doc, "hgnc_id"),
        aliases: string_list(doc, "alias_symbol"),
        previous_symbols: string_list(doc, "prev_symbol"),
        xref_id: string_field(doc, "ensembl_gene_id"),
    };
    if record.is_empty() {
        return Ok(None);
    }
    Ok(Some(record))
}

fn string_field(doc: &Value, name: &str) -> Option<String> {
    doc.get(name)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn string_list(doc: &Value, name: &str) -> BTreeSet<String> {
    match doc.get(name) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(item)) if !item.trim().is_empty() => {
            BTreeSet::from([item.trim().to_string()])
        }
        _ => BTreeSet::new(),
    }
}

fn encode_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.trim().bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~' | b':') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LookupStats {
    pub cache_hits: usize,
    pub network_calls: usize,
    pub failures: usize,
}

// Failed lookups degrade to an empty record and are never cached.
pub struct CachedAuthority<C: AuthorityClient, K: AuthorityCache> {
    client: C,
    cache: K,
    cache_hits: AtomicUsize,
    network_calls: AtomicUsize,
    failures: AtomicUsize,
}

impl<C: AuthorityClient, K: AuthorityCache> CachedAuthority<C, K> {
    pub fn new(client: C, cache: K) -> Self {
        Self {
            client,
            cache,
            cache_hits: AtomicUsize::new(0),
            network_calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn lookup(&self, query: &str, mode: LookupMode) -> AuthorityRecord {
        let query = normalize(query);
        if query.is_empty() {
            return AuthorityRecord::empty();
        }
        let key = cache_key(mode, &query);
        if let Some(record) = self.cache.get(&key) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return record;
        }

        self.network_calls.fetch_add(1, Ordering::Relaxed);
        match self.client.fetch(&query, mode) {
            Ok(found) => {
                let record = found.unwrap_or_default();
                if let Err(err) = self.cache.put(&key, &record) {
                    tracing::warn!(%key, error = %err, "failed to persist authority answer");
                }
                record
            }
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                let unavailable = KiraError::LookupUnavailable {
                    query,
                    reason: err.to_string(),
                };
                tracing::warn!(%mode, "{unavailable}");
                AuthorityRecord::empty()
            }
        }
    }

    pub fn stats(&self) -> LookupStats {
        LookupStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            network_calls: self.network_calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    pub fn cache(&self) -> &K {
        &self.cache
    }
}
