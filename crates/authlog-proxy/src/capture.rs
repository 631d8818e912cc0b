//! Per-request capture state.
//!
//! A [`CaptureBuffer`] is opened for each monitored request and owned by
//! that request alone. It is consumed by [`CaptureBuffer::complete`] or
//! [`CaptureBuffer::fail`], so an entry can be finalized at most once.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use authlog_core::{Classification, Headers, LogEntry, Payload, RequestParts, ResponseRecord};
use chrono::Utc;
use flate2::write::{GzDecoder, ZlibDecoder};
use hyper::{HeaderMap, Method};

/// Marker appended to raw bodies cut at the capture limit.
pub const TRUNCATION_MARKER: &str = "…[truncated]";

/// In-flight fields of one monitored request.
#[derive(Debug)]
pub struct CaptureBuffer {
    parts: RequestParts,
    started: Instant,
}

impl CaptureBuffer {
    /// Opens a buffer; the entry timestamp is taken now.
    pub fn open(
        method: &Method,
        url: impl Into<String>,
        headers: &HeaderMap,
        classification: Classification,
    ) -> Self {
        Self {
            parts: RequestParts {
                timestamp: Utc::now(),
                method: method.as_str().to_string(),
                url: url.into(),
                headers: Headers::from(headers),
                body: None,
                tags: classification.tags,
            },
            started: Instant::now(),
        }
    }

    /// Snapshots the request body, keeping at most `max_bytes`.
    pub fn set_body(&mut self, bytes: &[u8], content_encoding: Option<&str>, max_bytes: usize) {
        let mut body = BodyAccumulator::new(max_bytes, content_encoding);
        body.append(bytes);
        self.parts.body = body.into_payload();
    }

    /// Fields captured so far.
    pub fn parts(&self) -> &RequestParts {
        &self.parts
    }

    /// Time since the buffer was opened.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Finalizes with a fully drained response.
    pub fn complete(self, response: ResponseRecord) -> LogEntry {
        let elapsed = self.elapsed();
        LogEntry::completed(self.parts, response, elapsed)
    }

    /// Finalizes with a failure description.
    pub fn fail(self, error: impl Into<String>) -> LogEntry {
        let elapsed = self.elapsed();
        LogEntry::failed(self.parts, error, elapsed)
    }
}

/// Bounded copy of a body for logging.
///
/// `gzip` and `deflate` content is inflated as it arrives and the limit
/// applies to the inflated bytes. The encoded bytes are kept too, up to the
/// same limit, and logged instead when the content does not inflate.
#[derive(Debug)]
pub struct BodyAccumulator {
    raw: Capped,
    inflater: Option<Inflater>,
}

enum Inflater {
    Gzip(GzDecoder<Capped>),
    Deflate(ZlibDecoder<Capped>),
    Failed,
}

impl std::fmt::Debug for Inflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gzip(_) => f.write_str("Gzip"),
            Self::Deflate(_) => f.write_str("Deflate"),
            Self::Failed => f.write_str("Failed"),
        }
    }
}

impl Inflater {
    fn for_encoding(encoding: &str, max_size: usize) -> Option<Self> {
        match encoding.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Some(Self::Gzip(GzDecoder::new(Capped::new(max_size)))),
            "deflate" => Some(Self::Deflate(ZlibDecoder::new(Capped::new(max_size)))),
            _ => None,
        }
    }

    fn output(&mut self) -> Option<&mut Capped> {
        match self {
            Self::Gzip(decoder) => Some(decoder.get_mut()),
            Self::Deflate(decoder) => Some(decoder.get_mut()),
            Self::Failed => None,
        }
    }

    fn write(&mut self, chunk: &[u8]) {
        let result = match self {
            Self::Gzip(decoder) => decoder.write_all(chunk),
            Self::Deflate(decoder) => decoder.write_all(chunk),
            Self::Failed => return,
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "Failed to decode captured body");
            *self = Self::Failed;
        }
    }

    /// Takes the inflated bytes and whether they were cut. `None` when the
    /// content did not inflate completely.
    fn finish(mut self) -> Option<(Vec<u8>, bool)> {
        let cut = self.output()?.cut;
        if !cut {
            let result = match &mut self {
                Self::Gzip(decoder) => decoder.try_finish(),
                Self::Deflate(decoder) => decoder.try_finish(),
                Self::Failed => return None,
            };
            if let Err(e) = result {
                tracing::debug!(error = %e, "Captured body ended mid-stream");
                return None;
            }
        }
        let output = self.output()?;
        Some((std::mem::take(&mut output.buffer), output.cut))
    }
}

/// Byte sink that keeps at most `max_size` bytes and remembers whether
/// anything was dropped.
#[derive(Debug)]
struct Capped {
    buffer: Vec<u8>,
    max_size: usize,
    cut: bool,
}

impl Capped {
    fn new(max_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_size,
            cut: false,
        }
    }
}

impl Write for Capped {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let remaining = self.max_size.saturating_sub(self.buffer.len());
        if data.len() > remaining {
            self.cut = true;
        }
        self.buffer.extend_from_slice(&data[..data.len().min(remaining)]);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BodyAccumulator {
    /// Creates an accumulator for a body sent with `content_encoding`.
    pub fn new(max_size: usize, content_encoding: Option<&str>) -> Self {
        Self {
            raw: Capped::new(max_size),
            inflater: content_encoding.and_then(|enc| Inflater::for_encoding(enc, max_size)),
        }
    }

    /// Appends a chunk. Returns false once the limit has been hit.
    pub fn append(&mut self, chunk: &[u8]) -> bool {
        if !self.raw.cut {
            let _ = self.raw.write(chunk);
        }

        match self.inflater.as_mut() {
            Some(inflater) => {
                if inflater.output().is_some_and(|out| !out.cut) {
                    inflater.write(chunk);
                }
                inflater.output().is_some_and(|out| !out.cut)
            }
            None => !self.raw.cut,
        }
    }

    /// Encoded bytes kept so far.
    pub fn len(&self) -> usize {
        self.raw.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.buffer.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        match &self.inflater {
            Some(Inflater::Gzip(decoder)) => decoder.get_ref().cut,
            Some(Inflater::Deflate(decoder)) => decoder.get_ref().cut,
            Some(Inflater::Failed) | None => self.raw.cut,
        }
    }

    /// Turns the copy into a loggable payload. Truncated bodies are always
    /// raw text ending in [`TRUNCATION_MARKER`].
    pub fn into_payload(self) -> Option<Payload> {
        if self.raw.buffer.is_empty() {
            return None;
        }

        let (bytes, truncated) = match self.inflater.and_then(Inflater::finish) {
            Some(decoded) => decoded,
            None => (self.raw.buffer, self.raw.cut),
        };

        if !truncated {
            return Payload::parse(&bytes);
        }

        let mut text = String::from_utf8_lossy(&bytes).into_owned();
        text.push_str(TRUNCATION_MARKER);
        Some(Payload::Raw(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authlog_core::Classifier;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use hyper::header::AUTHORIZATION;
    use serde_json::json;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn open(url: &str, headers: &HeaderMap) -> CaptureBuffer {
        let classification = Classifier::default().classify(url, headers);
        CaptureBuffer::open(&Method::POST, url, headers, classification)
    }

    #[test]
    fn open_records_request_fields() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer t".parse().unwrap());
        let capture = open("https://accounts.google.com/o/oauth2/token", &headers);

        let parts = capture.parts();
        assert_eq!(parts.method, "POST");
        assert_eq!(parts.url, "https://accounts.google.com/o/oauth2/token");
        assert!(parts.headers.contains("authorization"));
        assert!(parts.tags.contains(&"google-auth".to_string()));
        assert!(parts.tags.contains(&"has-auth-header".to_string()));
        assert!(parts.body.is_none());
    }

    #[test]
    fn set_body_keeps_unparseable_payload() {
        let mut capture = open("http://example.com/login", &HeaderMap::new());
        capture.set_body(b"user=alice&pass=secret", None, 1024);
        assert_eq!(
            capture.parts().body.as_ref().and_then(Payload::as_raw),
            Some("user=alice&pass=secret")
        );
    }

    #[test]
    fn complete_and_fail_set_duration() {
        let capture = open("http://example.com/login", &HeaderMap::new());
        std::thread::sleep(Duration::from_millis(5));
        let entry = capture.fail("connection refused");
        assert!(entry.duration_ms.unwrap() >= 5);
        assert_eq!(entry.error.as_deref(), Some("connection refused"));

        let capture = open("http://example.com/login", &HeaderMap::new());
        let entry = capture.complete(ResponseRecord {
            status: 204,
            headers: Headers::new(),
            body: None,
        });
        assert_eq!(entry.status(), Some(204));
        assert!(entry.error.is_none());
    }

    #[test]
    fn accumulator_truncates_at_limit() {
        let mut body = BodyAccumulator::new(8, None);
        assert!(body.append(b"{\"a\":"));
        assert!(!body.append(b"\"0123456789\"}"));
        assert_eq!(body.len(), 8);
        assert!(body.is_truncated());

        let payload = body.into_payload().unwrap();
        assert_eq!(payload.as_raw(), Some("{\"a\":\"01…[truncated]"));
    }

    #[test]
    fn accumulator_inflates_gzip() {
        let mut body = BodyAccumulator::new(1024, Some("gzip"));
        body.append(&gzip(br#"{"access_token":"abc"}"#));
        let payload = body.into_payload().unwrap();
        assert_eq!(payload, Payload::Structured(json!({"access_token": "abc"})));
    }

    #[test]
    fn accumulator_caps_inflated_size() {
        let mut body = BodyAccumulator::new(4, Some("gzip"));
        body.append(&gzip(b"abcdefgh"));
        let payload = body.into_payload().unwrap();
        assert_eq!(payload.as_raw(), Some("abcd…[truncated]"));
    }

    #[test]
    fn accumulator_inflates_chunks_larger_than_limit() {
        let text = "access_token=".repeat(200);
        let encoded = gzip(text.as_bytes());
        assert!(encoded.len() > 16);

        let mut body = BodyAccumulator::new(16, Some("gzip"));
        for chunk in encoded.chunks(5) {
            body.append(chunk);
        }
        let payload = body.into_payload().unwrap();
        assert_eq!(payload.as_raw(), Some("access_token=acc…[truncated]"));
    }

    #[test]
    fn accumulator_inflates_deflate() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(br#"{"ok":true}"#).unwrap();
        let encoded = encoder.finish().unwrap();

        let mut body = BodyAccumulator::new(1024, Some("deflate"));
        body.append(&encoded);
        assert_eq!(
            body.into_payload().unwrap(),
            Payload::Structured(json!({"ok": true}))
        );
    }

    #[test]
    fn accumulator_keeps_undecodable_bytes() {
        let mut body = BodyAccumulator::new(1024, Some("gzip"));
        body.append(b"plain text");
        let payload = body.into_payload().unwrap();
        assert_eq!(payload.as_raw(), Some("plain text"));
    }

    #[test]
    fn accumulator_keeps_encoded_bytes_of_cut_stream() {
        let encoded = gzip(b"abcdefgh");
        let mut body = BodyAccumulator::new(1024, Some("gzip"));
        body.append(&encoded[..encoded.len() - 4]);
        let payload = body.into_payload().unwrap();
        assert!(payload.as_raw().is_some());
    }

    #[test]
    fn accumulator_ignores_identity_encoding() {
        let mut body = BodyAccumulator::new(1024, Some("identity"));
        body.append(b"[1,2]");
        let payload = body.into_payload().unwrap();
        assert!(payload.is_structured());
    }

    #[test]
    fn empty_accumulator_has_no_payload() {
        assert!(BodyAccumulator::new(1024, Some("gzip")).into_payload().is_none());
    }
}
