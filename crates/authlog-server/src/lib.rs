//! Authlog Server - dashboard API.
//!
//! Read API over the log store plus a live stream of newly captured entries.
//!
//! ## Endpoints
//!
//! - `GET /` - Log viewer page
//! - `GET /api/logs?limit=N` - Most recent entries, newest first
//! - `POST /api/logs` - Append an entry and publish it to live sessions
//! - `GET /api/logs/stream` - Server-sent events, one `auth-log` event per entry
//! - `GET /api/health` - Liveness and live session count
//!
//! ## Example
//!
//! ```no_run
//! use authlog_core::EventHub;
//! use authlog_server::{AppState, Server, ServerConfig};
//! use authlog_storage::LogStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let state = AppState::new(LogStore::open("./logs"), EventHub::new());
//!     let server = Server::with_state(ServerConfig::default(), state).unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

pub mod error;
mod handlers;
pub mod models;
pub mod state;

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use error::{ApiError, Result};
pub use handlers::{KEEP_ALIVE_INTERVAL, LOG_EVENT};
pub use state::AppState;

/// Default server port.
pub const DEFAULT_PORT: u16 = 3333;

/// Default server host (localhost only).
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 127.0.0.1).
    pub host: String,
    /// Port to bind to (default: 3333).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    BindError(SocketAddr, std::io::Error),

    /// Server runtime error.
    #[error("server error: {0}")]
    Runtime(String),
}

/// Builds the API router over the given state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/api/logs", get(handlers::get_logs).post(handlers::post_log))
        .route("/api/logs/stream", get(handlers::stream_logs))
        .route("/api/health", get(handlers::health))
        .layer(cors)
        .with_state(state)
}

/// The dashboard API server.
pub struct Server {
    router: Router,
    addr: SocketAddr,
}

impl Server {
    /// Creates a server over existing application state.
    pub fn with_state(
        config: ServerConfig,
        state: AppState,
    ) -> std::result::Result<Self, ServerError> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| ServerError::Runtime(format!("invalid address: {}", e)))?;

        Ok(Self {
            router: router(state),
            addr,
        })
    }

    /// Returns the configured server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the router for testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Runs the server until the process exits.
    pub async fn run(self) -> std::result::Result<(), ServerError> {
        let listener = bind(self.addr)?;
        info!("Starting dashboard API on {}", self.addr);

        axum::serve(listener, self.router)
            .await
            .map_err(|e| ServerError::Runtime(e.to_string()))
    }

    /// Starts the server in the background.
    ///
    /// Binding happens before this returns, so the handle reports the real
    /// address even when port 0 was requested.
    pub async fn start(self) -> std::result::Result<ServerHandle, ServerError> {
        let listener = bind(self.addr)?;
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(self.addr, e))?;
        info!("Starting dashboard API on {}", addr);

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let router = self.router;

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!("Dashboard API error: {}", e);
            }
            info!("Dashboard API stopped");
        });

        Ok(ServerHandle {
            shutdown_tx,
            addr,
            handle,
        })
    }
}

/// Binds with `SO_REUSEADDR` so a quick restart does not trip over
/// lingering sockets.
fn bind(addr: SocketAddr) -> std::result::Result<tokio::net::TcpListener, ServerError> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ServerError::BindError(addr, e))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| ServerError::BindError(addr, e))?;
    socket
        .bind(&addr.into())
        .map_err(|e| ServerError::BindError(addr, e))?;
    socket
        .listen(128)
        .map_err(|e| ServerError::BindError(addr, e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| ServerError::BindError(addr, e))?;

    let std_listener: std::net::TcpListener = socket.into();
    tokio::net::TcpListener::from_std(std_listener).map_err(|e| ServerError::BindError(addr, e))
}

/// Handle for controlling a running API server.
#[derive(Debug)]
pub struct ServerHandle {
    shutdown_tx: broadcast::Sender<()>,
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Returns the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signals the server to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Shuts down the server and waits for it to finish.
    pub async fn stop(self) {
        self.shutdown();
        let _ = self.handle.await;
    }
}
