//! Captured request/response records.
//!
//! A [`LogEntry`] is the finalized record of one monitored exchange. It is
//! built exactly once, from the [`RequestParts`] collected while the request
//! was in flight plus either a [`ResponseRecord`] or an error message, and is
//! never modified afterwards.
//!
//! The JSON shape matches the daily `auth-YYYY-MM-DD.json` files:
//!
//! ```text
//! {"timestamp":"...","method":"POST","url":"https://...","headers":{...},
//!  "body":{...},"response":{"status":200,"headers":{...},"body":{...}},
//!  "duration":42,"tags":["oauth"]}
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Payload
// =============================================================================

/// A best-effort decoded HTTP body.
///
/// Bodies that parse as JSON are kept as structured values; everything else
/// is kept verbatim as text. Serialized untagged, so a structured body is
/// written as the JSON value itself and a raw body as a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// Body text that is not structured data.
    Raw(String),
    /// Body that decoded as JSON.
    Structured(Value),
}

impl Payload {
    /// Decodes a body, falling back to lossy UTF-8 text.
    ///
    /// Returns `None` for an empty body. A JSON string literal is stored as
    /// [`Payload::Raw`] so that reading the entry back yields the same variant.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }

        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::String(text)) => Some(Payload::Raw(text)),
            Ok(value) => Some(Payload::Structured(value)),
            Err(_) => Some(Payload::Raw(String::from_utf8_lossy(bytes).into_owned())),
        }
    }

    /// Returns true if the body decoded as JSON.
    pub fn is_structured(&self) -> bool {
        matches!(self, Payload::Structured(_))
    }

    /// Returns the raw text, if this body was not structured.
    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Payload::Raw(text) => Some(text),
            Payload::Structured(_) => None,
        }
    }

    /// Returns the structured value, if any.
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Payload::Structured(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }
}

// =============================================================================
// Headers
// =============================================================================

/// One or more values of a header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    One(String),
    Many(Vec<String>),
}

impl HeaderValue {
    /// Returns the first value.
    pub fn first(&self) -> Option<&str> {
        match self {
            HeaderValue::One(value) => Some(value),
            HeaderValue::Many(values) => values.first().map(String::as_str),
        }
    }

    /// Iterates over every value.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            HeaderValue::One(value) => std::slice::from_ref(value),
            HeaderValue::Many(values) => values,
        };
        values.iter().map(String::as_str)
    }

    fn push(&mut self, value: String) {
        match self {
            HeaderValue::One(existing) => {
                let first = std::mem::take(existing);
                *self = HeaderValue::Many(vec![first, value]);
            }
            HeaderValue::Many(values) => values.push(value),
        }
    }
}

/// Header name to value(s), ordered by lowercase name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, HeaderValue>);

impl Headers {
    /// Creates an empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value; repeated names collapse into [`HeaderValue::Many`].
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        let value = value.into();
        match self.0.get_mut(&name) {
            Some(existing) => existing.push(value),
            None => {
                self.0.insert(name, HeaderValue::One(value));
            }
        }
    }

    /// Looks a header up case-insensitively.
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.0.get(&name.to_ascii_lowercase())
    }

    /// Returns true if the header is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl From<&http::HeaderMap> for Headers {
    fn from(map: &http::HeaderMap) -> Self {
        let mut headers = Headers::new();
        for (name, value) in map {
            headers.append(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
        headers
    }
}

// =============================================================================
// Log entry
// =============================================================================

/// The upstream response of a completed exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub status: u16,
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Payload>,
}

/// Request-side fields gathered before an entry is finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestParts {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Payload>,
    pub tags: Vec<String>,
}

/// A finalized record of one monitored request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When capture of the request began.
    pub timestamp: DateTime<Utc>,
    pub method: String,
    /// Scheme, host, path and query as seen by the proxy.
    pub url: String,
    #[serde(rename = "headers", default)]
    pub request_headers: Headers,
    #[serde(rename = "body", default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseRecord>,
    /// Elapsed milliseconds from capture start to response end or failure.
    #[serde(rename = "duration", default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl LogEntry {
    /// Finalizes an exchange whose response drained completely.
    pub fn completed(parts: RequestParts, response: ResponseRecord, elapsed: Duration) -> Self {
        Self::from_parts(parts, Some(response), None, elapsed)
    }

    /// Finalizes an exchange that failed before a complete response.
    pub fn failed(parts: RequestParts, error: impl Into<String>, elapsed: Duration) -> Self {
        Self::from_parts(parts, None, Some(error.into()), elapsed)
    }

    fn from_parts(
        parts: RequestParts,
        response: Option<ResponseRecord>,
        error: Option<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            timestamp: parts.timestamp,
            method: parts.method,
            url: parts.url,
            request_headers: parts.headers,
            request_body: parts.body,
            response,
            duration_ms: Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
            error,
            tags: parts.tags,
        }
    }

    /// Upstream status code, if a response was received.
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }

    /// Returns true if the exchange ended in a proxy failure.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Serializes the entry as a single line of JSON (no trailing newline).
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parts() -> RequestParts {
        let mut headers = Headers::new();
        headers.append("Content-Type", "application/json");
        RequestParts {
            timestamp: Utc::now(),
            method: "POST".to_string(),
            url: "https://accounts.google.com/o/oauth2/token".to_string(),
            headers,
            body: Payload::parse(br#"{"grant_type":"authorization_code"}"#),
            tags: vec!["google-auth".to_string(), "oauth".to_string()],
        }
    }

    #[test]
    fn payload_parse_json() {
        let payload = Payload::parse(br#"{"a":1}"#).unwrap();
        assert_eq!(payload, Payload::Structured(json!({"a": 1})));
    }

    #[test]
    fn payload_parse_raw_text() {
        let payload = Payload::parse(b"access_token=abc&expires=3600").unwrap();
        assert_eq!(payload.as_raw(), Some("access_token=abc&expires=3600"));
    }

    #[test]
    fn payload_parse_empty_is_none() {
        assert!(Payload::parse(b"").is_none());
    }

    #[test]
    fn payload_parse_invalid_utf8_is_lossy() {
        let payload = Payload::parse(&[0x66, 0x6f, 0xff]).unwrap();
        assert_eq!(payload.as_raw(), Some("fo\u{fffd}"));
    }

    #[test]
    fn payload_json_string_reads_back_as_raw() {
        let payload = Payload::parse(br#""hello""#).unwrap();
        let encoded = serde_json::to_string(&payload).unwrap();
        let decoded: Payload = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.as_raw(), Some("hello"));
    }

    #[test]
    fn headers_collapse_repeated_names() {
        let mut map = http::HeaderMap::new();
        map.append("set-cookie", "a=1".parse().unwrap());
        map.append("set-cookie", "b=2".parse().unwrap());
        map.insert("content-type", "text/plain".parse().unwrap());

        let headers = Headers::from(&map);
        assert_eq!(headers.len(), 2);
        assert_eq!(
            headers.get("Set-Cookie"),
            Some(&HeaderValue::Many(vec!["a=1".into(), "b=2".into()]))
        );
        assert_eq!(
            headers.get("content-type").and_then(HeaderValue::first),
            Some("text/plain")
        );
    }

    #[test]
    fn headers_serialize_as_string_or_array() {
        let mut headers = Headers::new();
        headers.append("accept", "*/*");
        headers.append("cookie", "a");
        headers.append("cookie", "b");
        let value = serde_json::to_value(&headers).unwrap();
        assert_eq!(value, json!({"accept": "*/*", "cookie": ["a", "b"]}));
    }

    #[test]
    fn completed_entry_shape() {
        let entry = LogEntry::completed(
            parts(),
            ResponseRecord {
                status: 200,
                headers: Headers::new(),
                body: Payload::parse(br#"{"access_token":"x"}"#),
            },
            Duration::from_millis(42),
        );

        assert_eq!(entry.status(), Some(200));
        assert!(!entry.is_error());
        assert_eq!(entry.duration_ms, Some(42));

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["response"]["body"]["access_token"], "x");
        assert_eq!(value["body"]["grant_type"], "authorization_code");
        assert_eq!(value["duration"], 42);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn failed_entry_has_no_response() {
        let entry = LogEntry::failed(parts(), "connection refused", Duration::from_millis(3));
        assert!(entry.is_error());
        assert!(entry.response.is_none());

        let value = serde_json::to_value(&entry).unwrap();
        assert!(value.get("response").is_none());
        assert_eq!(value["error"], "connection refused");
    }

    #[test]
    fn json_line_round_trip() {
        let entry = LogEntry::failed(parts(), "timed out", Duration::from_millis(10));
        let line = entry.to_json_line().unwrap();
        assert!(!line.contains('\n'));

        let decoded: LogEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.to_json_line().unwrap(), line);
    }

    #[test]
    fn decodes_minimal_entry() {
        let line = r#"{"timestamp":"2025-01-15T10:00:00Z","method":"GET","url":"http://a/auth"}"#;
        let entry: LogEntry = serde_json::from_str(line).unwrap();
        assert!(entry.tags.is_empty());
        assert!(entry.request_headers.is_empty());
        assert!(entry.duration_ms.is_none());
    }
}
