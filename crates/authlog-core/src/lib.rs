//! Authlog Core - log entry model, request classification, and live fan-out.
//!
//! This crate holds the pieces of the capture pipeline that do no I/O:
//!
//! - [`LogEntry`] and its parts: the record written for each monitored request
//! - [`Classifier`]: decides which requests are monitored and tags them
//! - [`MonitorConfig`] and [`Provider`]: which hosts and paths are interesting
//! - [`EventHub`]: pushes finalized entries to live dashboard subscribers

pub mod classifier;
pub mod config;
pub mod entry;
pub mod events;
pub mod providers;

pub use classifier::{
    Classification, Classifier, TAG_HAS_AUTH_HEADER, TAG_OAUTH, TAG_TOKEN_EXCHANGE,
};
pub use config::{MonitorConfig, DEFAULT_AUTH_ENDPOINTS, DEFAULT_MAX_CAPTURE_BYTES};
pub use entry::{HeaderValue, Headers, LogEntry, Payload, RequestParts, ResponseRecord};
pub use events::{EventHub, Subscription, DEFAULT_SUBSCRIBER_CAPACITY};
pub use providers::{bundled_providers, Provider};
