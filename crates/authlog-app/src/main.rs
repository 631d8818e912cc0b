//! Authlog - auth traffic debugging proxy.
//!
//! Runs the capturing proxy together with the dashboard API, or prints the
//! recorded log from the terminal.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use authlog_app::{format_entry, Cli, Command, LogsArgs, StartArgs};
use authlog_core::EventHub;
use authlog_proxy::{ProxyServer, Recorder};
use authlog_server::{AppState, Server};
use authlog_storage::{LogStore, LogTail};
use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How often `logs --follow` checks for new entries.
const FOLLOW_INTERVAL: Duration = Duration::from_millis(500);

/// Initialize logging with file rotation.
///
/// The debug log lives next to the auth logs but uses its own prefix, so the
/// store never mistakes it for a partition.
fn init_logging(
    log_level: &str,
    log_dir: &Path,
    to_file: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("authlog={},warn", log_level)));

    if to_file && std::fs::create_dir_all(log_dir).is_ok() {
        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .max_log_files(5)
            .filename_prefix("authlog-debug")
            .filename_suffix("log")
            .build(log_dir)
            .ok();

        if let Some(appender) = file_appender {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stdout))
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();

            tracing::debug!("Logging to {:?}", log_dir);
            return Some(guard);
        }
    }

    // Fallback: console logging only
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    if to_file {
        tracing::warn!("File logging unavailable, using console only");
    }
    None
}

/// Runs the proxy and the dashboard API until Ctrl-C.
async fn run_start(args: StartArgs, log_dir: PathBuf) -> anyhow::Result<()> {
    let recorder = Recorder::new(LogStore::open(&log_dir), EventHub::new());
    let proxy_config = args.proxy_config();
    let hosts = proxy_config.monitor.host_names().join(", ");

    let proxy = ProxyServer::new(proxy_config, recorder.clone())
        .start()
        .await
        .context("failed to start proxy")?;
    tracing::info!("Auth proxy running on http://{}", proxy.addr());
    tracing::info!("Monitoring hosts: {}", hosts);

    let server = Server::with_state(args.server_config(), AppState::from_recorder(&recorder))
        .context("invalid dashboard address")?
        .start()
        .await
        .context("failed to start dashboard API")?;
    let dashboard_url = format!("http://localhost:{}", server.addr().port());
    tracing::info!("Dashboard running on {}", dashboard_url);
    tracing::info!("Writing auth logs to {:?}", log_dir);

    println!();
    println!("Configure your application to use the proxy:");
    println!("  HTTP_PROXY=http://localhost:{}", proxy.addr().port());
    println!("  HTTPS_PROXY=http://localhost:{}", proxy.addr().port());
    println!();

    if args.should_open_browser() {
        if let Err(e) = open::that(&dashboard_url) {
            tracing::warn!("Failed to open browser: {}", e);
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    tracing::info!("Authlog shutting down");
    proxy.stop().await;
    server.stop().await;
    Ok(())
}

/// Prints recent entries, oldest first, then follows new ones if asked.
async fn run_logs(args: LogsArgs, log_dir: PathBuf) -> anyhow::Result<()> {
    let store = LogStore::open(&log_dir);
    let entries = store
        .recent(args.lines)
        .with_context(|| format!("failed to read logs from {:?}", log_dir))?;

    if entries.is_empty() && !args.follow {
        println!("No log entries found in {}", log_dir.display());
        return Ok(());
    }

    for entry in entries.iter().rev() {
        println!("{}", format_entry(entry));
    }

    if !args.follow {
        return Ok(());
    }

    let mut tail = LogTail::from_end(store)?;
    println!("Following {}...", log_dir.display());

    let mut interval = tokio::time::interval(FOLLOW_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                for entry in tail.poll()? {
                    println!("{}", format_entry(&entry));
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command();

    // Keep the guard alive for the duration of the program.
    let _log_guard = init_logging(
        &cli.log_level,
        &cli.log_dir,
        matches!(command, Command::Start(_)),
    );

    match command {
        Command::Start(args) => {
            tracing::info!("Starting Authlog...");
            run_start(args, cli.log_dir).await
        }
        Command::Logs(args) => run_logs(args, cli.log_dir).await,
    }
}
