//! Error text helpers shared by every driver.

use std::error::Error as StdError;

/// Joins an error and its sources into one line.
pub fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Returns true if the message looks like a TLS handshake or certificate failure.
pub fn is_tls_failure(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["certificate", "handshake", "tls", "unknownissuer", "invalid peer"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Shortens a response body for diagnostics.
pub fn truncate(body: &str, max: usize) -> &str {
    let body = body.trim();
    if body.len() <= max {
        return body;
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
