//! Proxy server.
//!
//! Accepts plain HTTP proxy connections and hands every request to a
//! [`ProxyHandler`].

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use authlog_core::{Classifier, MonitorConfig};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::error::{ProxyError, Result};
use crate::handler::{HandlerConfig, ProxyHandler};
use crate::recorder::Recorder;
use crate::DEFAULT_PROXY_PORT;

/// Default time to wait for upstream response headers.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Proxy server configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind the proxy to.
    pub addr: SocketAddr,
    /// Which traffic is captured.
    pub monitor: MonitorConfig,
    /// How long to wait for upstream response headers.
    pub upstream_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PROXY_PORT)),
            monitor: MonitorConfig::default(),
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }
}

impl ProxyConfig {
    /// Sets the listen address.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Sets the port (uses 127.0.0.1 as host).
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr = SocketAddr::from(([127, 0, 0, 1], port));
        self
    }

    /// Sets the monitoring configuration.
    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    /// Sets the upstream timeout.
    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }
}

/// Capturing forward proxy.
#[derive(Debug)]
pub struct ProxyServer {
    config: ProxyConfig,
    recorder: Recorder,
}

impl ProxyServer {
    /// Creates a proxy server that records into `recorder`.
    pub fn new(config: ProxyConfig, recorder: Recorder) -> Self {
        Self { config, recorder }
    }

    /// Returns the address the proxy is configured to listen on.
    pub fn addr(&self) -> SocketAddr {
        self.config.addr
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Runs the proxy until the process exits.
    pub async fn run(self) -> Result<()> {
        let listener = self.bind().await?;
        let (_shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        self.serve(listener, shutdown_rx).await;
        Ok(())
    }

    /// Starts the proxy in the background.
    ///
    /// The listener is bound before this returns, so the handle reports the
    /// real address even when port 0 was requested.
    pub async fn start(self) -> Result<ProxyHandle> {
        let listener = self.bind().await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let handle = tokio::spawn(async move {
            self.serve(listener, shutdown_rx).await;
        });

        Ok(ProxyHandle {
            shutdown_tx,
            addr,
            handle,
        })
    }

    async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(self.config.addr)
            .await
            .map_err(|e| ProxyError::Bind(self.config.addr, e))
    }

    async fn serve(self, listener: TcpListener, mut shutdown_rx: broadcast::Receiver<()>) {
        let local_addr = listener.local_addr().ok();
        let handler = ProxyHandler::new(HandlerConfig {
            max_capture_bytes: self.config.monitor.max_capture_bytes,
            classifier: Arc::new(Classifier::new(self.config.monitor)),
            recorder: self.recorder,
            upstream_timeout: self.config.upstream_timeout,
            local_addr,
        });

        if let Some(addr) = local_addr {
            info!("Starting auth proxy on {}", addr);
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let handler = handler.clone();
                            tokio::spawn(serve_connection(stream, peer, handler));
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Proxy shutdown signal received");
                    break;
                }
            }
        }

        info!("Proxy server stopped");
    }
}

async fn serve_connection(stream: tokio::net::TcpStream, peer: SocketAddr, handler: ProxyHandler) {
    let _ = stream.set_nodelay(true);

    let service = service_fn(move |req| {
        let handler = handler.clone();
        async move { Ok::<_, Infallible>(handler.handle(req).await) }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await
    {
        debug!(peer = %peer, error = %e, "Connection closed with error");
    }
}

/// Handle for controlling a running proxy server.
#[derive(Debug)]
pub struct ProxyHandle {
    shutdown_tx: broadcast::Sender<()>,
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl ProxyHandle {
    /// Returns the address the proxy is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signals the proxy to stop accepting connections.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Waits for the proxy to finish.
    pub async fn wait(self) {
        let _ = self.handle.await;
    }

    /// Shuts down the proxy and waits for it to finish.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
    }
}
