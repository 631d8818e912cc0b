//! Monitoring configuration.

use serde::{Deserialize, Serialize};

use crate::providers::{bundled_providers, Provider};

/// Default auth-related path fragments.
pub const DEFAULT_AUTH_ENDPOINTS: &[&str] =
    &["/oauth", "/auth", "/token", "/login", "/signin", "/signup"];

/// Default cap on bytes kept per captured body (1 MiB).
pub const DEFAULT_MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// Which traffic is captured and how much of it is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Hosts whose traffic is always captured, each with its tag.
    pub providers: Vec<Provider>,
    /// Path fragments that mark a request as auth-related on any host.
    pub auth_endpoints: Vec<String>,
    /// Maximum bytes of each body kept in the log.
    pub max_capture_bytes: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            providers: bundled_providers(),
            auth_endpoints: DEFAULT_AUTH_ENDPOINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_capture_bytes: DEFAULT_MAX_CAPTURE_BYTES,
        }
    }
}

impl MonitorConfig {
    /// Creates a config that monitors nothing.
    pub fn empty() -> Self {
        Self {
            providers: Vec::new(),
            auth_endpoints: Vec::new(),
            max_capture_bytes: DEFAULT_MAX_CAPTURE_BYTES,
        }
    }

    /// Replaces the monitored hosts from `host` or `host=tag` specs.
    ///
    /// Blank specs are ignored.
    pub fn with_hosts<I, S>(mut self, specs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.providers = specs
            .into_iter()
            .filter_map(|spec| Provider::parse(spec.as_ref()))
            .collect();
        self
    }

    /// Replaces the auth endpoint fragments. Blank entries are ignored.
    pub fn with_auth_endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.auth_endpoints = endpoints
            .into_iter()
            .map(|e| e.as_ref().trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    /// Sets the per-body capture cap.
    pub fn with_max_capture_bytes(mut self, max: usize) -> Self {
        self.max_capture_bytes = max;
        self
    }

    /// Monitored host names, for startup banners.
    pub fn host_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.host.as_str()).collect()
    }
}
