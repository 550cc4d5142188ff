//! Per-request transport configuration and its wire encoding.
//!
//! Each intercepted request gets one immutable [`TransportConfig`] built from
//! a single settings snapshot plus the request's original destination. The
//! JSON field names are a stable contract with the spoofing engine's parser
//! and must not change.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::settings::Settings;

/// Name of the request header carrying the encoded transport config.
///
/// The spoofing engine is the sole consumer and strips it before forwarding
/// the request upstream.
pub const CONFIG_HEADER_NAME: &str = "Awesometlsconfig";

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HTTP_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Immutable transport configuration for one intercepted request.
///
/// Timing fields are whole seconds on the wire, matching what the engine
/// expects to deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransportConfig {
    /// Hostname of the original destination (not the spoofing engine).
    pub host: String,
    /// Scheme of the original destination, `http` or `https`.
    pub scheme: String,
    /// TLS fingerprint profile to emulate.
    pub fingerprint: String,
    /// Raw ClientHello override; takes precedence when non-empty.
    pub hex_client_hello: String,
    pub http_timeout: u64,
    pub http_keep_alive_interval: u64,
    pub idle_conn_timeout: u64,
    #[serde(rename = "TLSHandshakeTimeout")]
    pub tls_handshake_timeout: u64,
    pub use_intercepted_fingerprint: bool,
}

impl TransportConfig {
    /// Builds a config from a settings snapshot and the request's original
    /// destination.
    ///
    /// The caller must pass a snapshot, not live settings, so every field
    /// resolves against the same point in time.
    pub fn from_settings(settings: &Settings, host: &str, scheme: &str) -> Self {
        Self {
            host: host.to_string(),
            scheme: scheme.to_string(),
            fingerprint: settings.fingerprint.clone(),
            hex_client_hello: settings.hex_client_hello.clone(),
            http_timeout: settings.http_timeout.as_secs(),
            http_keep_alive_interval: settings.http_keep_alive_interval.as_secs(),
            idle_conn_timeout: settings.idle_conn_timeout.as_secs(),
            tls_handshake_timeout: settings.tls_handshake_timeout.as_secs(),
            use_intercepted_fingerprint: settings.use_intercepted_fingerprint,
        }
    }

    /// Encodes the config as the JSON header value.
    ///
    /// Deterministic and side-effect-free. A flat struct of strings, integers
    /// and booleans cannot fail to serialize.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap()
    }
}

/// Network address of the spoofing engine's listener, frozen at rewrite time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub host: String,
    pub port: u16,
}

impl RedirectTarget {
    /// Parses a `[host:]port` address as the engine's CLI accepts it.
    ///
    /// A missing host means loopback, matching the engine's listeners.
    pub fn parse(addr: &str) -> Result<Self> {
        let invalid = |reason: &str| ConfigError::InvalidRedirectTarget {
            addr: addr.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = addr.trim();
        if trimmed.is_empty() {
            return Err(invalid("address is empty"));
        }

        let (host, port) = match trimmed.rsplit_once(':') {
            Some((host, port)) => (host, port),
            None => ("", trimmed),
        };

        let port: u16 = port
            .parse()
            .map_err(|_| invalid("port is not a number in 0-65535"))?;
        if port == 0 {
            return Err(invalid("port must be non-zero"));
        }

        let host = if host.is_empty() { "127.0.0.1" } else { host };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Returns the `host:port` authority string.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_settings() -> Settings {
        Settings {
            fingerprint: "Chrome131".to_string(),
            hex_client_hello: "16030100".to_string(),
            use_intercepted_fingerprint: true,
            http_timeout: Duration::from_secs(15),
            http_keep_alive_interval: Duration::from_secs(20),
            idle_conn_timeout: Duration::from_secs(45),
            tls_handshake_timeout: Duration::from_secs(5),
            ..Settings::default()
        }
    }

    #[test]
    fn encode_uses_engine_field_names() {
        let config = TransportConfig::from_settings(&sample_settings(), "example.com", "https");
        let value: serde_json::Value = serde_json::from_str(&config.encode()).unwrap();

        assert_eq!(value["Host"], "example.com");
        assert_eq!(value["Scheme"], "https");
        assert_eq!(value["Fingerprint"], "Chrome131");
        assert_eq!(value["HexClientHello"], "16030100");
        assert_eq!(value["HttpTimeout"], 15);
        assert_eq!(value["HttpKeepAliveInterval"], 20);
        assert_eq!(value["IdleConnTimeout"], 45);
        assert_eq!(value["TLSHandshakeTimeout"], 5);
        assert_eq!(value["UseInterceptedFingerprint"], true);
    }

    #[test]
    fn encode_round_trips_all_fields() {
        let config = TransportConfig::from_settings(&sample_settings(), "example.com", "http");
        let decoded: TransportConfig = serde_json::from_str(&config.encode()).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn encode_is_deterministic() {
        let config = TransportConfig::from_settings(&sample_settings(), "example.com", "https");
        assert_eq!(config.encode(), config.encode());
    }

    #[test]
    fn empty_string_fields_encode() {
        let config = TransportConfig::from_settings(&Settings::default(), "", "");
        let decoded: TransportConfig = serde_json::from_str(&config.encode()).unwrap();
        assert_eq!(decoded.host, "");
        assert_eq!(decoded.hex_client_hello, "");
    }

    #[test]
    fn concurrent_rewrites_never_see_torn_settings() {
        use crate::settings::LiveSettings;

        // Writer publishes settings whose fingerprint and http timeout are
        // correlated; a reader observing a mix of two generations in one
        // encoded config proves a torn snapshot.
        let live = LiveSettings::new(Settings::default());

        let writer = {
            let live = live.clone();
            std::thread::spawn(move || {
                for i in 1..=500u64 {
                    live.replace(Settings {
                        fingerprint: format!("fp{i}"),
                        http_timeout: Duration::from_secs(i),
                        ..Settings::default()
                    });
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let live = live.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let snapshot = live.snapshot();
                        let config =
                            TransportConfig::from_settings(&snapshot, "example.com", "https");
                        let decoded: TransportConfig =
                            serde_json::from_str(&config.encode()).unwrap();

                        if let Some(i) = decoded.fingerprint.strip_prefix("fp") {
                            let i: u64 = i.parse().unwrap();
                            assert_eq!(decoded.http_timeout, i, "torn snapshot");
                        } else {
                            assert_eq!(decoded.fingerprint, "Default");
                            assert_eq!(decoded.http_timeout, 30);
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn redirect_target_host_and_port() {
        let target = RedirectTarget::parse("127.0.0.1:8887").unwrap();
        assert_eq!(target.host, "127.0.0.1");
        assert_eq!(target.port, 8887);
        assert_eq!(target.authority(), "127.0.0.1:8887");
    }

    #[test]
    fn redirect_target_bare_port_defaults_to_loopback() {
        let target = RedirectTarget::parse(":8887").unwrap();
        assert_eq!(target.host, "127.0.0.1");

        let target = RedirectTarget::parse("8887").unwrap();
        assert_eq!(target.host, "127.0.0.1");
        assert_eq!(target.port, 8887);
    }

    #[test]
    fn redirect_target_rejects_garbage() {
        assert!(RedirectTarget::parse("").is_err());
        assert!(RedirectTarget::parse("   ").is_err());
        assert!(RedirectTarget::parse("localhost:notaport").is_err());
        assert!(RedirectTarget::parse("localhost:0").is_err());
        assert!(RedirectTarget::parse("localhost:99999").is_err());
    }
}
