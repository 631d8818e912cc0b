//! Per-request proxy orchestration.
//!
//! Resolves the real upstream of each inbound request, classifies it, and
//! either forwards it untouched or runs it through the capture pipeline:
//!
//! ```text
//! Request → Resolve target → Classify → Monitored?
//!                                          │
//!                        ┌─────────────────┴─────────────────┐
//!                        │ No                                │ Yes
//!                        ▼                                   ▼
//!                   Passthrough                      Open CaptureBuffer
//!                                                            │
//!                                               Snapshot request body prefix
//!                                                            │
//!                                                    Forward upstream ──── error ──→ failed entry + 5xx
//!                                                            │
//!                                                  Stream response back
//!                                                  through CapturingBody
//! ```

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use authlog_core::Classifier;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body, Bytes, Frame, Incoming, SizeHint};
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Method, Request, Response, StatusCode, Uri, Version};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::capture::CaptureBuffer;
use crate::collector::{CapturingBody, ResponseCollector};
use crate::recorder::Recorder;

/// Body type returned to callers and sent upstream.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Upstream HTTP client.
pub type UpstreamClient = Client<HttpConnector, ProxyBody>;

/// Headers that describe a single hop and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Handler configuration.
#[derive(Clone)]
pub struct HandlerConfig {
    /// Decides which requests are captured.
    pub classifier: Arc<Classifier>,
    /// Receives finalized entries.
    pub recorder: Recorder,
    /// How long to wait for upstream response headers.
    pub upstream_timeout: Duration,
    /// Maximum bytes kept per captured body.
    pub max_capture_bytes: usize,
    /// The proxy's own listen address, for loop detection.
    pub local_addr: Option<SocketAddr>,
}

impl std::fmt::Debug for HandlerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerConfig")
            .field("classifier", &self.classifier)
            .field("recorder", &self.recorder)
            .field("upstream_timeout", &self.upstream_timeout)
            .field("max_capture_bytes", &self.max_capture_bytes)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

/// HTTP handler for the capturing proxy.
#[derive(Clone, Debug)]
pub struct ProxyHandler {
    config: HandlerConfig,
    client: UpstreamClient,
}

impl ProxyHandler {
    /// Creates a new proxy handler with the given configuration.
    pub fn new(config: HandlerConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self { config, client }
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Handles one inbound request. Never fails: every problem becomes a
    /// response to the caller.
    pub async fn handle(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        if req.method() == Method::CONNECT {
            return self.tunnel(req);
        }

        let target = match resolve_target(&req) {
            Some(target) => target,
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "request has no target host",
                );
            }
        };

        if self.is_self_target(&target) {
            warn!(uri = %target, "Refusing to proxy a request to the proxy itself");
            return error_response(StatusCode::LOOP_DETECTED, "request targets the proxy itself");
        }

        let url = target.to_string();
        let classification = self.config.classifier.classify(&url, req.headers());

        if !classification.monitored {
            return self.passthrough(req, target).await;
        }

        debug!(url = %url, tags = ?classification.tags, "Capturing request");

        let capture = CaptureBuffer::open(req.method(), url, req.headers(), classification);
        self.capture(req, target, capture).await
    }

    /// Forwards an unmonitored request without buffering anything.
    async fn passthrough(&self, req: Request<Incoming>, target: Uri) -> Response<ProxyBody> {
        let (parts, body) = req.into_parts();
        let upstream = upstream_request(parts, target, body.boxed());

        match self.send(upstream).await {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Response::from_parts(parts, body.boxed())
            }
            Err(failure) => {
                debug!(error = %failure.message, "Passthrough request failed");
                error_response(failure.status, &failure.message)
            }
        }
    }

    /// Forwards a monitored request and wires up response capture.
    async fn capture(
        &self,
        req: Request<Incoming>,
        target: Uri,
        mut capture: CaptureBuffer,
    ) -> Response<ProxyBody> {
        let (mut parts, mut body) = req.into_parts();
        let max_bytes = self.config.max_capture_bytes;

        let prefix = match read_prefix(&mut body, max_bytes).await {
            Ok(prefix) => prefix,
            Err(e) => {
                debug!(url = %capture.parts().url, error = %e, "Caller aborted request body, capture abandoned");
                return error_response(StatusCode::BAD_REQUEST, "failed to read request body");
            }
        };

        let encoding = parts
            .headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        capture.set_body(&prefix.bytes, encoding.as_deref(), max_bytes);

        let body = if prefix.complete {
            if !prefix.bytes.is_empty() {
                parts.headers.remove(header::TRANSFER_ENCODING);
                parts
                    .headers
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(prefix.bytes.len()));
            }
            Full::new(prefix.bytes).map_err(|never| match never {}).boxed()
        } else {
            // Too large to hold: replay what was read, then stream the rest.
            PrefixedBody {
                prefix: Some(prefix.bytes),
                rest: body,
            }
            .boxed()
        };
        let upstream = upstream_request(parts, target, body);

        match self.send(upstream).await {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);

                let collector = ResponseCollector::new(
                    capture,
                    parts.status.as_u16(),
                    &parts.headers,
                    self.config.max_capture_bytes,
                    self.config.recorder.clone(),
                );
                let body = CapturingBody::new(body, collector);
                Response::from_parts(parts, body.boxed())
            }
            Err(failure) => {
                warn!(url = %capture.parts().url, error = %failure.message, "Upstream request failed");
                self.config.recorder.record(capture.fail(failure.message.clone()));
                error_response(failure.status, &failure.message)
            }
        }
    }

    /// Sends a request upstream, bounded by the configured timeout.
    async fn send(
        &self,
        req: Request<ProxyBody>,
    ) -> Result<Response<Incoming>, UpstreamFailure> {
        let timeout = self.config.upstream_timeout;

        match tokio::time::timeout(timeout, self.client.request(req)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(UpstreamFailure {
                status: StatusCode::BAD_GATEWAY,
                message: format!("upstream request failed: {}", error_chain(&e)),
            }),
            Err(_) => Err(UpstreamFailure {
                status: StatusCode::GATEWAY_TIMEOUT,
                message: format!("upstream timed out after {}ms", timeout.as_millis()),
            }),
        }
    }

    /// Tunnels a CONNECT request byte-for-byte. Tunnelled traffic is opaque
    /// and never captured.
    fn tunnel(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        let Some(authority) = req.uri().authority().map(|a| a.to_string()) else {
            return error_response(StatusCode::BAD_REQUEST, "CONNECT requires host:port");
        };

        debug!(authority = %authority, "Opening tunnel");

        tokio::spawn(async move {
            let upgraded = match hyper::upgrade::on(req).await {
                Ok(upgraded) => upgraded,
                Err(e) => {
                    warn!(authority = %authority, error = %e, "Tunnel upgrade failed");
                    return;
                }
            };

            let mut server = match TcpStream::connect(authority.as_str()).await {
                Ok(server) => server,
                Err(e) => {
                    warn!(authority = %authority, error = %e, "Tunnel connect failed");
                    return;
                }
            };

            let mut client = TokioIo::new(upgraded);
            match tokio::io::copy_bidirectional(&mut client, &mut server).await {
                Ok((up, down)) => {
                    debug!(authority = %authority, up, down, "Tunnel closed");
                }
                Err(e) => debug!(authority = %authority, error = %e, "Tunnel closed with error"),
            }
        });

        Response::new(empty_body())
    }

    /// Checks whether `target` points back at this proxy.
    fn is_self_target(&self, target: &Uri) -> bool {
        let Some(local) = self.config.local_addr else {
            return false;
        };
        let Some(host) = target.host() else {
            return false;
        };

        let port = target
            .port_u16()
            .unwrap_or(if target.scheme_str() == Some("https") { 443 } else { 80 });
        if port != local.port() {
            return false;
        }

        let host = host.trim_start_matches('[').trim_end_matches(']');
        let local_ip = local.ip();
        host.eq_ignore_ascii_case("localhost")
            || host
                .parse::<std::net::IpAddr>()
                .map(|ip| ip == local_ip || ip.is_loopback() || ip.is_unspecified())
                .unwrap_or(false)
    }
}

/// Why an upstream exchange produced no response.
#[derive(Debug)]
struct UpstreamFailure {
    status: StatusCode,
    message: String,
}

/// Determines the absolute upstream URI of a proxied request.
///
/// Absolute-form requests (the usual shape behind `HTTP_PROXY`) are used as
/// is; origin-form requests are rebuilt from the `Host` header over plain
/// HTTP.
pub fn resolve_target<B>(req: &Request<B>) -> Option<Uri> {
    let uri = req.uri();
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Some(uri.clone());
    }

    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .filter(|h| !h.is_empty())?;
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    format!("http://{}{}", host, path).parse().ok()
}

fn upstream_request(
    mut parts: hyper::http::request::Parts,
    target: Uri,
    body: ProxyBody,
) -> Request<ProxyBody> {
    parts.uri = target;
    parts.version = Version::HTTP_11;
    strip_hop_by_hop(&mut parts.headers);
    Request::from_parts(parts, body)
}

/// Removes hop-by-hop headers, including any named by `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
    for name in named {
        headers.remove(name.as_str());
    }
}

/// The leading part of a request body.
struct BodyPrefix {
    bytes: Bytes,
    /// True when `bytes` is the whole body.
    complete: bool,
}

/// Reads data frames until the body ends or more than `limit` bytes are held.
async fn read_prefix(body: &mut Incoming, limit: usize) -> Result<BodyPrefix, hyper::Error> {
    let mut buffer = Vec::new();
    while let Some(frame) = body.frame().await {
        if let Ok(data) = frame?.into_data() {
            buffer.extend_from_slice(&data);
            if buffer.len() > limit {
                return Ok(BodyPrefix {
                    bytes: buffer.into(),
                    complete: false,
                });
            }
        }
    }

    Ok(BodyPrefix {
        bytes: buffer.into(),
        complete: true,
    })
}

/// Request body that replays an already read prefix before the rest.
struct PrefixedBody {
    prefix: Option<Bytes>,
    rest: Incoming,
}

impl Body for PrefixedBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if let Some(prefix) = this.prefix.take() {
            return Poll::Ready(Some(Ok(Frame::data(prefix))));
        }
        Pin::new(&mut this.rest).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.prefix.is_none() && self.rest.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        let held = self.prefix.as_ref().map_or(0, |p| p.len() as u64);
        let rest = self.rest.size_hint();

        let mut hint = SizeHint::new();
        hint.set_lower(rest.lower() + held);
        if let Some(upper) = rest.upper() {
            hint.set_upper(upper + held);
        }
        hint
    }
}

fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

/// Builds the JSON error reply sent to the caller.
fn error_response(status: StatusCode, details: &str) -> Response<ProxyBody> {
    let body = serde_json::json!({
        "error": "Proxy error",
        "details": details,
    })
    .to_string();

    let mut response = Response::new(Full::new(Bytes::from(body)).map_err(|never| match never {}).boxed());
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

/// Joins an error and its sources into one line.
fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
