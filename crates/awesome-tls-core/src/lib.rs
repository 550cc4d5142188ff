//! Awesome TLS core - transport configuration, engine boundary and lifecycle.
//!
//! This crate holds everything the intercepting-proxy add-on needs that is
//! independent of the host proxy:
//!
//! - [`settings`]: live settings with snapshot-per-request reads
//! - [`transport`]: per-request [`TransportConfig`] and its JSON wire encoding
//! - [`engine`]: the spoofing engine's string-result call surface and the
//!   adapter turning raw error strings into a tagged [`StartOutcome`]
//! - [`lifecycle`]: the start/stop state machine coordinating the engine with
//!   the host
//! - [`diagnostics`]: the sentinel-host error channel the engine reports
//!   per-connection failures through

pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod settings;
pub mod transport;

pub use diagnostics::{inspect_message, is_error_report, ERROR_SENTINEL_HOST};
pub use engine::{
    EngineLibrary, ProcessEngine, StartOutcome, DEFAULT_STARTUP_GRACE, GRACEFUL_STOP_MARKER,
};
pub use error::{ConfigError, Result};
pub use lifecycle::{EngineState, LifecycleController, OnDisableCallback};
pub use settings::{
    LiveSettings, Settings, DEFAULT_HOST_PROXY_ADDR, DEFAULT_INTERCEPT_ADDR,
    DEFAULT_SPOOF_PROXY_ADDR,
};
pub use transport::{RedirectTarget, TransportConfig, CONFIG_HEADER_NAME};
