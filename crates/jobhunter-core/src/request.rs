//! Transport-agnostic request/response abstraction seen by the dispatch hooks.
//!
//! The host engine owns the real HTTP client. The core only reads and
//! mutates the header bag and the [`RequestMeta`] carried alongside each
//! request (identity, proxy assignment, slot hint, retry count).

use std::collections::BTreeMap;
use std::time::Instant;

use url::Url;

/// Header carrying the outbound identity.
pub const USER_AGENT: &str = "User-Agent";

/// Per-request metadata shared between the hooks.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Proxy URL assigned to this request, if any.
    pub proxy: Option<String>,
    /// Explicit routing slot, overriding the one derived from the URL.
    pub slot: Option<String>,
    /// Number of retries already scheduled for this logical request.
    pub retry_times: u32,
    /// Set by `on_request`, consumed by `on_response` to measure latency.
    pub sent_at: Option<Instant>,
}

/// An outgoing request as seen by the dispatch pipeline.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub method: String,
    pub url: String,
    headers: BTreeMap<String, String>,
    pub meta: RequestMeta,
}

impl CrawlRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: BTreeMap::new(),
            meta: RequestMeta::default(),
        }
    }

    /// Pin this request to an explicit slot.
    pub fn with_slot(mut self, slot: impl Into<String>) -> Self {
        self.meta.slot = Some(slot.into());
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.meta.proxy = Some(proxy.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set a header, replacing any existing value regardless of case.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
        self.headers.insert(name.to_string(), value.into());
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Routing slot for this request. See [`slot_key`].
    pub fn slot_key(&self) -> String {
        slot_key(self.meta.slot.as_deref(), &self.url)
    }
}

/// A received response. The body is irrelevant to the dispatch policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlResponse {
    pub url: String,
    pub status: u16,
}

impl CrawlResponse {
    pub fn new(url: impl Into<String>, status: u16) -> Self {
        Self {
            url: url.into(),
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Derive the routing slot shared by throttling, ban detection and retries.
///
/// Order: non-empty explicit hint, then the URL authority (`host[:port]`,
/// port only when written in the URL), then the full URL.
pub fn slot_key(hint: Option<&str>, url: &str) -> String {
    if let Some(hint) = hint.filter(|h| !h.is_empty()) {
        return hint.to_string();
    }
    authority(url).unwrap_or_else(|| url.to_string())
}

fn authority(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str().filter(|h| !h.is_empty())?;
    Some(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_key_prefers_explicit_hint() {
        assert_eq!(
            slot_key(Some("greenhouse"), "https://boards.greenhouse.io/x"),
            "greenhouse"
        );
    }

    #[test]
    fn slot_key_ignores_empty_hint() {
        assert_eq!(slot_key(Some(""), "https://remoteok.com/jobs"), "remoteok.com");
    }

    #[test]
    fn slot_key_keeps_explicit_port() {
        assert_eq!(
            slot_key(None, "http://localhost:8080/api/jobs"),
            "localhost:8080"
        );
        assert_eq!(slot_key(None, "https://example.com:443/"), "example.com");
    }

    #[test]
    fn slot_key_falls_back_to_full_url() {
        assert_eq!(slot_key(None, "not a url"), "not a url");
        assert_eq!(slot_key(None, "mailto:jobs@example.com"), "mailto:jobs@example.com");
    }

    #[test]
    fn request_slot_key_uses_meta_hint() {
        let req = CrawlRequest::get("https://weworkremotely.com/feed").with_slot("wwr");
        assert_eq!(req.slot_key(), "wwr");
        let req = CrawlRequest::get("https://weworkremotely.com/feed");
        assert_eq!(req.slot_key(), "weworkremotely.com");
    }

    #[test]
    fn headers_are_case_insensitive() {
        let mut req = CrawlRequest::get("https://example.com").with_header("user-agent", "a");
        assert_eq!(req.header(USER_AGENT), Some("a"));
        req.set_header("USER-AGENT", "b");
        assert_eq!(req.header("User-Agent"), Some("b"));
        assert_eq!(req.headers().count(), 1);
    }
}
