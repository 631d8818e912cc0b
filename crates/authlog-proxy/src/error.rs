//! Error types for the proxy.

use thiserror::Error;

/// Proxy error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// IO error (binding the listener).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to bind the listen address.
    #[error("failed to bind to {0}: {1}")]
    Bind(std::net::SocketAddr, std::io::Error),
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
