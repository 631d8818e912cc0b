//! Command-line arguments.
//!
//! Every option can also be set through the environment variable named in
//! its help text.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use authlog_core::{MonitorConfig, DEFAULT_MAX_CAPTURE_BYTES};
use authlog_proxy::{ProxyConfig, DEFAULT_PROXY_PORT};
use authlog_server::{ServerConfig, DEFAULT_PORT};
use clap::{ArgAction, Args, Parser, Subcommand};

/// Authlog - record and inspect auth traffic through a local proxy
#[derive(Parser, Debug)]
#[command(name = "authlog", version, about)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Directory holding the daily log files
    #[arg(long, global = true, env = "LOG_FILE_PATH", default_value = "./logs")]
    pub log_dir: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Options for `start` when no subcommand is given
    #[command(flatten)]
    pub start: StartArgs,
}

impl Cli {
    /// The command to run; `start` is the default.
    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Start(self.start.clone()))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the proxy and the dashboard API
    Start(StartArgs),
    /// Print recent log entries
    Logs(LogsArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StartArgs {
    /// Proxy server port
    #[arg(short = 'p', long, env = "PROXY_PORT", default_value_t = DEFAULT_PROXY_PORT)]
    pub proxy_port: u16,

    /// Dashboard port
    #[arg(short = 'w', long, env = "WEB_UI_PORT", default_value_t = DEFAULT_PORT)]
    pub web_port: u16,

    /// Do not open the dashboard in a browser
    #[arg(long)]
    pub no_browser: bool,

    /// Open the dashboard in a browser on start
    #[arg(
        long,
        env = "AUTO_OPEN_BROWSER",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = parse_open_browser,
        hide = true
    )]
    pub open_browser: bool,

    /// Hosts to monitor, as `host` or `host=tag` (replaces the bundled list)
    #[arg(long, env = "MONITORED_HOSTS", value_delimiter = ',')]
    pub monitored_hosts: Vec<String>,

    /// Path fragments that mark auth requests on any host
    #[arg(long, env = "AUTH_ENDPOINTS", value_delimiter = ',')]
    pub auth_endpoints: Vec<String>,

    /// Seconds to wait for upstream response headers
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 30)]
    pub upstream_timeout_secs: u64,

    /// Maximum bytes of each body kept in the log
    #[arg(long, env = "MAX_CAPTURE_BYTES", default_value_t = DEFAULT_MAX_CAPTURE_BYTES)]
    pub max_capture_bytes: usize,
}

impl StartArgs {
    pub fn should_open_browser(&self) -> bool {
        self.open_browser && !self.no_browser
    }

    /// Monitoring rules; empty lists keep the bundled defaults.
    pub fn monitor_config(&self) -> MonitorConfig {
        let mut config = MonitorConfig::default().with_max_capture_bytes(self.max_capture_bytes);
        if self.monitored_hosts.iter().any(|h| !h.trim().is_empty()) {
            config = config.with_hosts(&self.monitored_hosts);
        }
        if self.auth_endpoints.iter().any(|e| !e.trim().is_empty()) {
            config = config.with_auth_endpoints(&self.auth_endpoints);
        }
        config
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig::default()
            .with_addr(SocketAddr::from(([127, 0, 0, 1], self.proxy_port)))
            .with_monitor(self.monitor_config())
            .with_upstream_timeout(Duration::from_secs(self.upstream_timeout_secs))
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::default().with_port(self.web_port)
    }
}

/// Only an explicit "off" value disables the browser; anything else enables it.
fn parse_open_browser(value: &str) -> Result<bool, Infallible> {
    let value = value.trim().to_ascii_lowercase();
    Ok(!matches!(value.as_str(), "false" | "0" | "no" | "off"))
}

#[derive(Args, Debug, Clone)]
pub struct LogsArgs {
    /// Number of log entries to show
    #[arg(short = 'n', long, default_value_t = 20)]
    pub lines: usize,

    /// Keep printing entries as they are logged
    #[arg(short, long)]
    pub follow: bool,
}
