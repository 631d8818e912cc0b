//! Authlog Proxy - capturing forward proxy for auth traffic.
//!
//! Clients point `HTTP_PROXY` at this proxy. Every request is forwarded to
//! its real destination; requests that look auth-related are also captured
//! into a [`LogEntry`](authlog_core::LogEntry), appended to the log store
//! and published to live subscribers.
//!
//! ## Architecture
//!
//! ```text
//! Client → ProxyServer → ProxyHandler → Classifier → Monitored?
//!                                                       │
//!                                     ┌─────────────────┴──────────────┐
//!                                     │ No                             │ Yes
//!                                     ▼                                ▼
//!                                Passthrough                     CaptureBuffer
//!                                                                      │
//!                                                                      ▼
//!                                                            ResponseCollector
//!                                                                      │
//!                                                                      ▼
//!                                                   Recorder → LogStore → EventHub
//! ```
//!
//! `CONNECT` tunnels are relayed without inspection.

mod capture;
mod collector;
mod error;
mod handler;
mod proxy;
mod recorder;

pub use capture::{BodyAccumulator, CaptureBuffer, TRUNCATION_MARKER};
pub use collector::{CapturingBody, ResponseCollector};
pub use error::{ProxyError, Result};
pub use handler::{resolve_target, HandlerConfig, ProxyBody, ProxyHandler, UpstreamClient};
pub use proxy::{ProxyConfig, ProxyHandle, ProxyServer, DEFAULT_UPSTREAM_TIMEOUT};
pub use recorder::Recorder;

/// Default proxy port.
pub const DEFAULT_PROXY_PORT: u16 = 8888;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_is_correct() {
        assert_eq!(DEFAULT_PROXY_PORT, 8888);
    }
}
