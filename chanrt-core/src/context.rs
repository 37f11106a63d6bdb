use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The outbound request as seen by `modifyRequest` — single-valued headers
/// and query parameters (first value wins on duplicates), matching the
/// by-value snapshot marshalled into the sandbox (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterRequest {
    pub method: String,
    pub url: String,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub query: HashMap<String, String>,

    #[serde(default)]
    pub body: Option<String>,
}

impl AdapterRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        let lower = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_ascii_lowercase() == lower)
            .map(|(_, v)| v.as_str())
    }
}

/// The read-only context passed to `isStreamRequest` and `extractModel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub request: AdapterRequest,
    pub body_bytes: Vec<u8>,
    pub original_url: String,
}

impl RequestContext {
    pub fn body_as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body_bytes).ok()
    }
}

/// The header names rejected both on inbound sandbox `httpRequest` calls and
/// on header reapplication from `modifyRequest` (§4.2, §4.3). Case-insensitive.
pub const DENYLISTED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "upgrade",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "content-length",
];

pub fn is_denylisted_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    DENYLISTED_HEADERS.contains(&lower.as_str())
}

/// Header value bytes must fall in this printable-ASCII-plus-tab range.
pub fn is_valid_header_value(value: &str) -> bool {
    value.len() <= 8192
        && value
            .bytes()
            .all(|b| b == b'\t' || (0x20..=0x7e).contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        let req = AdapterRequest {
            method: "POST".into(),
            url: "https://x".into(),
            headers,
            query: HashMap::new(),
            body: None,
        };
        assert_eq!(req.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_denylisted_headers() {
        assert!(is_denylisted_header("Host"));
        assert!(is_denylisted_header("content-length"));
        assert!(!is_denylisted_header("Authorization"));
    }

    #[test]
    fn test_header_value_validation() {
        assert!(is_valid_header_value("Bearer abc123"));
        assert!(!is_valid_header_value("bad\nvalue"));
        assert!(!is_valid_header_value(&"x".repeat(8193)));
    }

    #[test]
    fn test_body_as_str() {
        let ctx = RequestContext {
            request: AdapterRequest {
                method: "GET".into(),
                url: "https://x".into(),
                headers: HashMap::new(),
                query: HashMap::new(),
                body: None,
            },
            body_bytes: b"{\"model\":\"m\"}".to_vec(),
            original_url: "https://x".into(),
        };
        assert_eq!(ctx.body_as_str(), Some("{\"model\":\"m\"}"));
    }
}
