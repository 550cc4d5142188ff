//! Error channel for engine-reported diagnostics.
//!
//! The engine has no structured side channel back to the extension, so it
//! reuses the proxy path: a "request" addressed to the reserved sentinel host
//! is not traffic, its body is a diagnostic report about one connection.
//! These are informational; they never disable the extension.

/// Reserved destination host marking a proxy message as an error report.
pub const ERROR_SENTINEL_HOST: &str = "awesome-tls-error";

/// Checks a destination host against the sentinel marker. The match is exact
/// and case-sensitive.
pub fn is_error_report(destination_host: &str) -> bool {
    destination_host == ERROR_SENTINEL_HOST
}

/// Checks an intercepted proxy message against the sentinel marker.
///
/// Returns the diagnostic payload when the destination host matches,
/// `None` otherwise. `body` is the message's body bytes.
pub fn inspect_message(destination_host: &str, body: &[u8]) -> Option<String> {
    if !is_error_report(destination_host) {
        return None;
    }
    Some(String::from_utf8_lossy(body).into_owned())
}

/// Routes an engine diagnostic to the error sink.
pub fn report(payload: &str) {
    tracing::error!(target: "awesome_tls::engine", "{payload}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_host_yields_payload() {
        let payload = inspect_message(ERROR_SENTINEL_HOST, b"handshake failed");
        assert_eq!(payload.as_deref(), Some("handshake failed"));
    }

    #[test]
    fn other_hosts_are_not_errors() {
        assert_eq!(inspect_message("example.com", b"handshake failed"), None);
        assert_eq!(inspect_message("", b"handshake failed"), None);
    }

    #[test]
    fn match_is_case_sensitive() {
        assert_eq!(inspect_message("Awesome-TLS-Error", b"x"), None);
        assert!(!is_error_report("Awesome-TLS-Error"));
        assert!(is_error_report(ERROR_SENTINEL_HOST));
    }

    #[test]
    fn invalid_utf8_is_reported_lossily() {
        let payload = inspect_message(ERROR_SENTINEL_HOST, &[0xff, 0xfe, b'!']);
        assert_eq!(payload.unwrap(), "\u{fffd}\u{fffd}!");
    }

}
