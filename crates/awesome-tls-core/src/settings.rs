//! Live extension settings shared across request threads.
//!
//! Settings may be mutated at any time (CLI reload, future UI). Request
//! handling never reads them field by field; it takes one [`Settings`]
//! snapshot per request so an in-flight rewrite can never observe a
//! half-applied update.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::transport::{
    DEFAULT_HTTP_KEEP_ALIVE_INTERVAL, DEFAULT_HTTP_TIMEOUT, DEFAULT_IDLE_CONN_TIMEOUT,
    DEFAULT_TLS_HANDSHAKE_TIMEOUT,
};

/// Default address the engine's intercept listener binds to.
pub const DEFAULT_INTERCEPT_ADDR: &str = "127.0.0.1:8886";

/// Default address of the host proxy the engine loops traffic back through.
pub const DEFAULT_HOST_PROXY_ADDR: &str = "127.0.0.1:8080";

/// Default address of the engine's spoofing listener.
pub const DEFAULT_SPOOF_PROXY_ADDR: &str = "127.0.0.1:8887";

/// Extension settings as the user configured them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Engine intercept listener address.
    pub intercept_addr: String,
    /// Host proxy address the engine reports back to.
    pub host_proxy_addr: String,
    /// Spoofing listener address requests are redirected to.
    pub spoof_proxy_addr: String,
    /// TLS fingerprint profile to emulate.
    pub fingerprint: String,
    /// Raw hexadecimal ClientHello override; wins over `fingerprint` when non-empty.
    pub hex_client_hello: String,
    /// Derive the fingerprint from the intercepted client connection instead.
    pub use_intercepted_fingerprint: bool,
    pub http_timeout: Duration,
    pub http_keep_alive_interval: Duration,
    pub idle_conn_timeout: Duration,
    pub tls_handshake_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            intercept_addr: DEFAULT_INTERCEPT_ADDR.to_string(),
            host_proxy_addr: DEFAULT_HOST_PROXY_ADDR.to_string(),
            spoof_proxy_addr: DEFAULT_SPOOF_PROXY_ADDR.to_string(),
            fingerprint: "Default".to_string(),
            hex_client_hello: String::new(),
            use_intercepted_fingerprint: false,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            http_keep_alive_interval: DEFAULT_HTTP_KEEP_ALIVE_INTERVAL,
            idle_conn_timeout: DEFAULT_IDLE_CONN_TIMEOUT,
            tls_handshake_timeout: DEFAULT_TLS_HANDSHAKE_TIMEOUT,
        }
    }
}

/// Shared handle to the current settings.
///
/// Cloning is cheap; all clones observe the same underlying settings.
#[derive(Debug, Clone, Default)]
pub struct LiveSettings {
    inner: Arc<RwLock<Settings>>,
}

impl LiveSettings {
    /// Creates a handle holding the given initial settings.
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Returns a consistent copy of the current settings.
    ///
    /// All fields are read under a single lock acquisition. This is the only
    /// read path request handling is allowed to use.
    pub fn snapshot(&self) -> Settings {
        self.inner.read().clone()
    }

    /// Replaces the settings wholesale.
    pub fn replace(&self, settings: Settings) {
        *self.inner.write() = settings;
    }

    /// Applies an in-place update under the write lock.
    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        f(&mut self.inner.write());
    }
}
