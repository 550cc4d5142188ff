//! Boundary to the external TLS-fingerprint-spoofing engine.
//!
//! The engine speaks a string-result convention: every call returns an error
//! string where `""` means success. The substring match that distinguishes a
//! graceful self-stop from a fatal error lives only in
//! [`StartOutcome::from_error_string`]; the rest of the codebase works with
//! the tagged variant.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use parking_lot::Mutex;

/// Substring the engine emits when it was stopped by an explicit
/// [`EngineLibrary::stop_server`] call. Stable contract with the engine;
/// coordinate both sides before changing it.
pub const GRACEFUL_STOP_MARKER: &str = "Server stopped";

/// The spoofing engine's native call surface.
///
/// Calling `start_server` while already running is undefined; the lifecycle
/// controller guarantees at most one start per handle. Stopping an unstarted
/// engine is likewise undefined.
pub trait EngineLibrary: Send + Sync {
    /// Starts the engine's listeners. Returns `""` on success, otherwise a
    /// failure description. May block for the engine's startup.
    fn start_server(
        &self,
        intercept_addr: &str,
        host_proxy_addr: &str,
        spoof_proxy_addr: &str,
    ) -> String;

    /// Stops a previously started engine. Returns `""` on success.
    fn stop_server(&self) -> String;

    /// Liveness probe; must not block indefinitely.
    fn smoke_test(&self);
}

/// Tagged interpretation of an engine start result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Empty error string: the engine is up.
    Started,
    /// The start raced with an explicit stop; informational, not an error.
    GracefulStop(String),
    /// Anything else is fatal to the extension.
    Fatal(String),
}

impl StartOutcome {
    /// Classifies the raw error string returned by the engine.
    pub fn from_error_string(err: &str) -> Self {
        if err.is_empty() {
            StartOutcome::Started
        } else if err.contains(GRACEFUL_STOP_MARKER) {
            StartOutcome::GracefulStop(err.to_string())
        } else {
            StartOutcome::Fatal(err.to_string())
        }
    }
}

/// Default time the process binding waits for the engine to survive startup.
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_millis(300);

/// Engine binding that runs the engine's standalone binary as a child
/// process.
///
/// The binary accepts `-intercept`, `-burp` and `-spoof` address flags. A
/// child that dies within the startup grace period is reported as a start
/// failure; one that survives it is considered running.
pub struct ProcessEngine {
    binary: PathBuf,
    startup_grace: Duration,
    child: Mutex<Option<Child>>,
}

impl ProcessEngine {
    /// Creates a binding for the engine binary at the given path.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            startup_grace: DEFAULT_STARTUP_GRACE,
            child: Mutex::new(None),
        }
    }

    /// Overrides the startup grace period.
    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    fn describe_exit(status: std::process::ExitStatus, stderr: String) -> String {
        let stderr = stderr.trim();
        if stderr.is_empty() {
            format!("engine exited during startup ({status})")
        } else {
            format!("engine exited during startup ({status}): {stderr}")
        }
    }
}

impl EngineLibrary for ProcessEngine {
    fn start_server(
        &self,
        intercept_addr: &str,
        host_proxy_addr: &str,
        spoof_proxy_addr: &str,
    ) -> String {
        let mut command = Command::new(&self.binary);
        command
            .arg("-intercept")
            .arg(intercept_addr)
            .arg("-burp")
            .arg(host_proxy_addr)
            .arg("-spoof")
            .arg(spoof_proxy_addr)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return format!("failed to spawn engine {}: {e}", self.binary.display());
            }
        };

        // Blocking by contract; the lifecycle controller runs this off the
        // host's registration path.
        std::thread::sleep(self.startup_grace);

        match child.try_wait() {
            Ok(Some(status)) => {
                let stderr = child
                    .stderr
                    .take()
                    .and_then(|mut pipe| {
                        use std::io::Read;
                        let mut buf = String::new();
                        pipe.read_to_string(&mut buf).ok().map(|_| buf)
                    })
                    .unwrap_or_default();
                Self::describe_exit(status, stderr)
            }
            Ok(None) => {
                tracing::debug!("engine process {} is up", child.id());
                *self.child.lock() = Some(child);
                String::new()
            }
            Err(e) => format!("failed to poll engine process: {e}"),
        }
    }

    fn stop_server(&self) -> String {
        let Some(mut child) = self.child.lock().take() else {
            return "engine is not running".to_string();
        };

        if let Err(e) = child.kill() {
            return format!("failed to stop engine: {e}");
        }
        match child.wait() {
            Ok(status) => {
                tracing::debug!("engine process exited ({status})");
                String::new()
            }
            Err(e) => format!("failed to reap engine: {e}"),
        }
    }

    fn smoke_test(&self) {
        if self.binary.exists() {
            tracing::info!("smoke test: engine binary found at {}", self.binary.display());
        } else {
            tracing::warn!("smoke test: engine binary missing at {}", self.binary.display());
        }
    }
}

/// Writes an executable stand-in for the engine binary.
#[cfg(all(test, unix))]
pub(crate) fn fake_engine(dir: &tempfile::TempDir, script: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join("engine");
    std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
