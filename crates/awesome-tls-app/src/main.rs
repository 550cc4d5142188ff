//! Awesome TLS - TLS-fingerprint spoofing for intercepted HTTP traffic.
//!
//! Runs the host proxy with the spoofing add-on installed and manages the
//! external engine process: requests entering the proxy are redirected to the
//! engine's spoof listener with their transport config attached, and the
//! engine's lifecycle is tied to this process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use directories::ProjectDirs;
use tokio::sync::Notify;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use awesome_tls_core::{
    EngineLibrary, LifecycleController, LiveSettings, ProcessEngine, Settings,
    DEFAULT_HOST_PROXY_ADDR, DEFAULT_INTERCEPT_ADDR, DEFAULT_SPOOF_PROXY_ADDR,
};
use awesome_tls_proxy::{ProxyConfig, ProxyServer};

/// Awesome TLS - spoof TLS fingerprints of intercepted requests
#[derive(Parser, Debug)]
#[command(name = "awesome-tls", version, about)]
struct Args {
    /// Host proxy listen address
    #[arg(long, default_value = DEFAULT_HOST_PROXY_ADDR)]
    listen: std::net::SocketAddr,

    /// Engine intercept listener address ([ip:]port)
    #[arg(long, default_value = DEFAULT_INTERCEPT_ADDR)]
    intercept: String,

    /// Engine spoof listener address ([ip:]port)
    #[arg(long, default_value = DEFAULT_SPOOF_PROXY_ADDR)]
    spoof: String,

    /// Path to the spoofing engine binary
    #[arg(long, default_value = "awesome-tls-engine")]
    engine: PathBuf,

    /// TLS fingerprint profile to emulate
    #[arg(long, default_value = "Default")]
    fingerprint: String,

    /// Hexadecimal ClientHello override (wins over --fingerprint)
    #[arg(long, default_value = "")]
    hex_client_hello: String,

    /// Reuse the intercepted client's own fingerprint
    #[arg(long)]
    use_intercepted_fingerprint: bool,

    /// HTTP dial timeout in seconds
    #[arg(long, default_value_t = 30)]
    http_timeout: u64,

    /// Keep-alive probe interval in seconds
    #[arg(long, default_value_t = 30)]
    http_keep_alive_interval: u64,

    /// Idle connection timeout in seconds
    #[arg(long, default_value_t = 90)]
    idle_conn_timeout: u64,

    /// TLS handshake timeout in seconds
    #[arg(long, default_value_t = 10)]
    tls_handshake_timeout: u64,

    /// Probe the engine binary and exit
    #[arg(long)]
    smoke_test: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn settings(&self) -> Settings {
        Settings {
            intercept_addr: self.intercept.clone(),
            host_proxy_addr: self.listen.to_string(),
            spoof_proxy_addr: self.spoof.clone(),
            fingerprint: self.fingerprint.clone(),
            hex_client_hello: self.hex_client_hello.clone(),
            use_intercepted_fingerprint: self.use_intercepted_fingerprint,
            http_timeout: Duration::from_secs(self.http_timeout),
            http_keep_alive_interval: Duration::from_secs(self.http_keep_alive_interval),
            idle_conn_timeout: Duration::from_secs(self.idle_conn_timeout),
            tls_handshake_timeout: Duration::from_secs(self.tls_handshake_timeout),
        }
    }
}

/// Get the logs directory path.
fn logs_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "awesome-tls", "AwesomeTLS").map(|dirs| dirs.data_dir().join("logs"))
}

/// Initialize logging with optional file rotation.
fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug { "debug" } else { &args.log_level };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("awesome_tls={log_level},warn")));

    if let Some(log_dir) = logs_dir() {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(5)
                .filename_prefix("awesome-tls")
                .filename_suffix("log")
                .build(&log_dir)
                .ok();

            if let Some(appender) = file_appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(std::io::stdout))
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();

                tracing::info!("logging to {:?}", log_dir);
                return Some(guard);
            }
        }
    }

    // Fallback: console logging only
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args);

    let engine = Arc::new(ProcessEngine::new(&args.engine));

    if args.smoke_test {
        engine.smoke_test();
        return Ok(());
    }

    let settings = LiveSettings::new(args.settings());

    // The disable action a host proxy would expose maps to shutting this
    // process down: a fatal condition must never leave the proxy passing
    // unspoofed traffic.
    let disabled = Arc::new(Notify::new());
    let disabled_tx = disabled.clone();
    let lifecycle = LifecycleController::new(engine).on_disable(move |message| {
        tracing::error!("disabling: {message}");
        disabled_tx.notify_one();
    });

    let proxy_config = ProxyConfig::new(settings.clone(), lifecycle.clone())
        .context("failed to create proxy config")?
        .with_addr(args.listen);
    let proxy = ProxyServer::new(proxy_config).context("failed to create proxy server")?;

    tracing::info!("host proxy listening on {}", proxy.addr());
    tracing::info!("CA certificate: {:?}", proxy.ca_cert_path());

    let handle = proxy.start().context("failed to start proxy")?;

    // Engine start may block for its whole lifetime; it runs off this path.
    let snapshot = settings.snapshot();
    lifecycle.spawn_start(
        &snapshot.intercept_addr,
        &snapshot.host_proxy_addr,
        &snapshot.spoof_proxy_addr,
    );

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            tracing::info!("shutdown requested");
        }
        _ = disabled.notified() => {
            tracing::error!("shutting down after fatal error");
        }
    }

    // Teardown is best-effort and must always complete.
    lifecycle.stop();
    handle.stop().await;

    tracing::info!("awesome-tls shut down");
    Ok(())
}
