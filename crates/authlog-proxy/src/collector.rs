//! Response capture that never delays the caller.
//!
//! [`CapturingBody`] wraps the upstream response body. Every frame is handed
//! to the caller unchanged while the data is copied into a bounded buffer.
//! When the stream ends the copy is decoded and the entry is finalized;
//! when it errors a failed entry is finalized instead. A body dropped before
//! either (the caller went away) abandons its capture.

use std::pin::Pin;
use std::task::{Context, Poll};

use authlog_core::{Headers, ResponseRecord};
use hyper::body::{Body, Bytes, Frame, SizeHint};
use hyper::header::CONTENT_ENCODING;
use hyper::HeaderMap;
use tracing::debug;

use crate::capture::{BodyAccumulator, CaptureBuffer};
use crate::recorder::Recorder;

/// Collects one response and finalizes its entry exactly once.
#[derive(Debug)]
pub struct ResponseCollector {
    capture: Option<CaptureBuffer>,
    status: u16,
    headers: Headers,
    body: BodyAccumulator,
    recorder: Recorder,
}

impl ResponseCollector {
    pub fn new(
        capture: CaptureBuffer,
        status: u16,
        headers: &HeaderMap,
        max_capture_bytes: usize,
        recorder: Recorder,
    ) -> Self {
        let content_encoding = headers.get(CONTENT_ENCODING).and_then(|v| v.to_str().ok());
        Self {
            capture: Some(capture),
            status,
            headers: Headers::from(headers),
            body: BodyAccumulator::new(max_capture_bytes, content_encoding),
            recorder,
        }
    }

    /// Copies a data chunk.
    pub fn on_data(&mut self, chunk: &[u8]) {
        if self.capture.is_some() {
            self.body.append(chunk);
        }
    }

    /// Returns true once the entry has been finalized.
    pub fn is_finished(&self) -> bool {
        self.capture.is_none()
    }

    /// Finalizes a completed exchange. No-op if already finalized.
    pub fn finish(&mut self) {
        let Some(capture) = self.capture.take() else {
            return;
        };

        let body = std::mem::replace(&mut self.body, BodyAccumulator::new(0, None));
        let response = ResponseRecord {
            status: self.status,
            headers: std::mem::take(&mut self.headers),
            body: body.into_payload(),
        };

        self.recorder.record(capture.complete(response));
    }

    /// Finalizes a failed exchange. No-op if already finalized.
    pub fn fail(&mut self, error: impl Into<String>) {
        if let Some(capture) = self.capture.take() {
            self.recorder.record(capture.fail(error));
        }
    }
}

impl Drop for ResponseCollector {
    fn drop(&mut self) {
        if let Some(capture) = self.capture.take() {
            debug!(
                url = %capture.parts().url,
                received = self.body.len(),
                "Response not drained, capture abandoned"
            );
        }
    }
}

/// Response body that tees its data into a [`ResponseCollector`].
#[derive(Debug)]
pub struct CapturingBody<B> {
    inner: B,
    collector: ResponseCollector,
}

impl<B> CapturingBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    /// Wraps `inner`. A body that is already at its end finalizes at once,
    /// since it may never be polled.
    pub fn new(inner: B, mut collector: ResponseCollector) -> Self {
        if inner.is_end_stream() {
            collector.finish();
        }
        Self { inner, collector }
    }
}

impl<B> Body for CapturingBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: std::fmt::Display,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.collector.on_data(data);
                }
                if this.inner.is_end_stream() {
                    this.collector.finish();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.collector.fail(format!("upstream body error: {}", e));
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.collector.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authlog_core::{Classifier, EventHub, LogEntry, Payload, Subscription};
    use authlog_storage::LogStore;
    use futures::stream;
    use http_body_util::{BodyExt, Full, StreamBody};
    use hyper::Method;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        recorder: Recorder,
        sub: Subscription,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let recorder = Recorder::new(LogStore::open(temp.path()), EventHub::new());
        let sub = recorder.hub().subscribe();
        Fixture {
            _temp: temp,
            recorder,
            sub,
        }
    }

    fn collector(recorder: &Recorder, headers: &HeaderMap) -> ResponseCollector {
        let url = "https://api.stripe.com/v1/tokens";
        let classification = Classifier::default().classify(url, &HeaderMap::new());
        let capture = CaptureBuffer::open(&Method::POST, url, &HeaderMap::new(), classification);
        ResponseCollector::new(capture, 200, headers, 1024, recorder.clone())
    }

    async fn next_entry(sub: &mut Subscription) -> Arc<LogEntry> {
        tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("entry was not recorded")
            .expect("hub closed")
    }

    fn chunks(
        parts: Vec<Result<&'static str, std::io::Error>>,
    ) -> StreamBody<stream::Iter<std::vec::IntoIter<Result<Frame<Bytes>, std::io::Error>>>> {
        let frames: Vec<Result<Frame<Bytes>, std::io::Error>> = parts
            .into_iter()
            .map(|p| p.map(|s| Frame::data(Bytes::from_static(s.as_bytes()))))
            .collect();
        StreamBody::new(stream::iter(frames))
    }

    #[tokio::test]
    async fn forwards_chunks_unchanged_and_reassembles_copy() {
        let mut fx = fixture();
        let body = CapturingBody::new(
            chunks(vec![Ok(r#"{"id":"#), Ok(r#""tok_1","#), Ok(r#""live":true}"#)]),
            collector(&fx.recorder, &HeaderMap::new()),
        );

        let delivered = body.collect().await.unwrap().to_bytes();
        assert_eq!(&delivered[..], br#"{"id":"tok_1","live":true}"#);

        let entry = next_entry(&mut fx.sub).await;
        let response = entry.response.as_ref().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(
            response.body,
            Some(Payload::Structured(json!({"id": "tok_1", "live": true})))
        );
        assert!(entry.error.is_none());
        assert!(entry.duration_ms.is_some());
    }

    #[tokio::test]
    async fn non_json_response_is_kept_raw() {
        let mut fx = fixture();
        let body = CapturingBody::new(
            chunks(vec![Ok("<html>"), Ok("denied</html>")]),
            collector(&fx.recorder, &HeaderMap::new()),
        );
        body.collect().await.unwrap();

        let entry = next_entry(&mut fx.sub).await;
        let body = entry.response.as_ref().and_then(|r| r.body.as_ref());
        assert_eq!(body.and_then(Payload::as_raw), Some("<html>denied</html>"));
    }

    #[tokio::test]
    async fn stream_error_finalizes_failed_entry() {
        let mut fx = fixture();
        let body = CapturingBody::new(
            chunks(vec![
                Ok("partial"),
                Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            ]),
            collector(&fx.recorder, &HeaderMap::new()),
        );
        assert!(body.collect().await.is_err());

        let entry = next_entry(&mut fx.sub).await;
        assert!(entry.response.is_none());
        assert_eq!(entry.error.as_deref(), Some("upstream body error: reset"));
    }

    #[tokio::test]
    async fn empty_body_finalizes_on_wrap() {
        let mut fx = fixture();
        let body = CapturingBody::new(
            Full::new(Bytes::new()),
            collector(&fx.recorder, &HeaderMap::new()),
        );
        assert!(body.collector.is_finished());
        drop(body);

        let entry = next_entry(&mut fx.sub).await;
        assert_eq!(entry.status(), Some(200));
        assert!(entry.response.as_ref().unwrap().body.is_none());
    }

    #[tokio::test]
    async fn full_body_finalizes_after_last_frame() {
        let mut fx = fixture();
        let mut body = CapturingBody::new(
            Full::new(Bytes::from_static(b"ok")),
            collector(&fx.recorder, &HeaderMap::new()),
        );

        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap(), Bytes::from_static(b"ok"));
        assert!(body.collector.is_finished());

        let entry = next_entry(&mut fx.sub).await;
        let body = entry.response.as_ref().and_then(|r| r.body.as_ref());
        assert_eq!(body.and_then(Payload::as_raw), Some("ok"));
    }

    #[tokio::test]
    async fn dropped_body_abandons_capture() {
        let mut fx = fixture();
        let mut body = CapturingBody::new(
            chunks(vec![Ok("first"), Ok("second")]),
            collector(&fx.recorder, &HeaderMap::new()),
        );
        body.frame().await.unwrap().unwrap();
        drop(body);

        let waited = tokio::time::timeout(Duration::from_millis(200), fx.sub.recv()).await;
        assert!(waited.is_err(), "abandoned capture must not be recorded");
        assert!(fx.recorder.store().recent(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn finish_runs_once() {
        let mut fx = fixture();
        let mut c = collector(&fx.recorder, &HeaderMap::new());
        c.finish();
        c.fail("late error");
        c.finish();

        next_entry(&mut fx.sub).await;
        let waited = tokio::time::timeout(Duration::from_millis(200), fx.sub.recv()).await;
        assert!(waited.is_err());
    }
}
