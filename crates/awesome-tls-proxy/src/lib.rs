//! Awesome TLS proxy - the intercepting add-on and its host proxy.
//!
//! Intercepts every outbound request, attaches the encoded per-request
//! transport config under the reserved header, and redirects the request to
//! the TLS-fingerprint-spoofing engine. The engine's sentinel-marked error
//! reports are routed to the diagnostic log instead of upstream.
//!
//! ## Request flow
//!
//! ```text
//! Client → Host proxy → SpoofHandler ── sentinel host? ──→ diagnostics (consumed)
//!                            │
//!                            ▼
//!                  settings snapshot → TransportConfig → Awesometlsconfig header
//!                            │
//!                            ▼
//!                  authority := spoof listener → engine → real upstream
//! ```

mod ca;
mod error;
mod proxy;
mod rewriter;

pub use ca::{CaManager, CaManagerError};
pub use error::{ProxyError, Result};
pub use proxy::{ProxyConfig, ProxyHandle, ProxyServer};
pub use rewriter::{rewrite_request, SpoofHandler};

/// Default port the host proxy listens on.
pub const DEFAULT_LISTEN_PORT: u16 = 8080;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_matches_host_proxy_settings() {
        assert_eq!(DEFAULT_LISTEN_PORT, 8080);
    }
}
