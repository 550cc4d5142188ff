//! Host proxy with the spoofing add-on installed.
//!
//! Runs a MITM proxy whose only job is to hand every outbound request to the
//! [`SpoofHandler`]. In the original deployment the host proxy is an external
//! tool the add-on registers with; here the crate carries its own host so the
//! add-on is runnable standalone.

use std::net::SocketAddr;

use hudsucker::rustls::crypto::aws_lc_rs::default_provider;
use hudsucker::Proxy;
use tokio::sync::broadcast;

use awesome_tls_core::{LifecycleController, LiveSettings};

use crate::ca::CaManager;
use crate::error::{ProxyError, Result};
use crate::rewriter::SpoofHandler;
use crate::DEFAULT_LISTEN_PORT;

/// Proxy server configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind the host proxy to.
    pub addr: SocketAddr,
    /// The CA manager for certificate generation.
    pub ca_manager: CaManager,
    /// Live settings the rewriter snapshots per request.
    pub settings: LiveSettings,
    /// Lifecycle controller fatal rewrite failures are reported to.
    pub lifecycle: LifecycleController,
}

impl ProxyConfig {
    /// Creates a configuration with the default CA directory and listen port.
    pub fn new(settings: LiveSettings, lifecycle: LifecycleController) -> Result<Self> {
        let ca_manager = CaManager::with_default_dir().map_err(ProxyError::Ca)?;

        Ok(Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_LISTEN_PORT)),
            ca_manager,
            settings,
            lifecycle,
        })
    }

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

    /// Sets the CA manager.
    pub fn with_ca_manager(mut self, ca_manager: CaManager) -> Self {
        self.ca_manager = ca_manager;
        self
    }
}

/// Host proxy server carrying the spoofing add-on.
pub struct ProxyServer {
    config: ProxyConfig,
}

impl ProxyServer {
    /// Creates a new proxy server, generating the CA if missing.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        config.ca_manager.ensure_ca().map_err(ProxyError::Ca)?;
        Ok(Self { config })
    }

    /// Returns the address the proxy is configured to listen on.
    pub fn addr(&self) -> SocketAddr {
        self.config.addr
    }

    /// Returns the CA certificate path for user installation.
    pub fn ca_cert_path(&self) -> std::path::PathBuf {
        self.config.ca_manager.cert_path()
    }

    /// Runs the proxy until shut down, blocking the current task.
    pub async fn run(self) -> Result<()> {
        let authority = self.config.ca_manager.ensure_ca().map_err(ProxyError::Ca)?;
        let handler = SpoofHandler::new(self.config.settings, self.config.lifecycle);

        tracing::info!("starting host proxy on {}", self.config.addr);

        let proxy = Proxy::builder()
            .with_addr(self.config.addr)
            .with_ca(authority)
            .with_rustls_connector(default_provider())
            .with_http_handler(handler)
            .build()
            .map_err(|e| ProxyError::Proxy(e.to_string()))?;

        proxy
            .start()
            .await
            .map_err(|e| ProxyError::Proxy(e.to_string()))?;

        tracing::info!("host proxy stopped");
        Ok(())
    }

    /// Starts the proxy in the background, returning a control handle.
    pub fn start(self) -> Result<ProxyHandle> {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let shutdown_tx_clone = shutdown_tx.clone();
        let addr = self.config.addr;

        // Load the CA before spawning so setup errors surface here.
        let authority = self.config.ca_manager.ensure_ca().map_err(ProxyError::Ca)?;
        let handler = SpoofHandler::new(self.config.settings, self.config.lifecycle);

        let handle = tokio::spawn(async move {
            let proxy = match Proxy::builder()
                .with_addr(addr)
                .with_ca(authority)
                .with_rustls_connector(default_provider())
                .with_http_handler(handler)
                .build()
            {
                Ok(proxy) => proxy,
                Err(e) => {
                    tracing::error!("failed to build proxy: {e}");
                    return;
                }
            };

            let mut shutdown_rx = shutdown_tx.subscribe();

            tokio::select! {
                result = proxy.start() => {
                    if let Err(e) = result {
                        tracing::error!("proxy error: {e}");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("proxy shutdown signal received");
                }
            };
        });

        Ok(ProxyHandle {
            shutdown_tx: shutdown_tx_clone,
            addr,
            handle,
        })
    }
}

/// Handle for controlling a running proxy server.
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

    /// Signals the proxy to shut down.
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
