//! Error types for storecheck.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main error type for storecheck.
///
/// Every adapter and establisher operation returns
/// `Result<T> = std::result::Result<T, CheckError>`. The variant decides how
/// far a failure reaches: connection-level errors skip an instance, namespace
/// errors end its run, and everything else fails a single step.
#[derive(thiserror::Error, Debug)]
pub enum CheckError {
    /// Backend instance unreachable.
    #[error("Connect error: {0}")]
    Connect(String),

    /// Credentials rejected by the backend.
    #[error("Auth error: {0}")]
    Auth(String),

    /// Certificate, key or CA material missing or unparsable.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Namespace (table or index) could not be created.
    #[error("Namespace error: {0}")]
    Namespace(String),

    /// A single write failed.
    #[error("Write error: {0}")]
    Write(String),

    /// A single read failed.
    #[error("Read error: {0}")]
    Read(String),

    /// A single delete failed.
    #[error("Delete error: {0}")]
    Delete(String),

    /// The operation succeeded but the observed state is not the expected one.
    #[error("Verification mismatch: {0}")]
    VerificationMismatch(String),

    /// An operation exceeded its time bound.
    #[error("Operation '{operation}' exceeded timeout of {timeout:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Bound that was exceeded
        timeout: Duration,
    },

    /// The backend family was not compiled into this build.
    #[error("Backend not available: {0}")]
    BackendUnavailable(String),

    /// Invalid configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CheckError {
    /// Returns the reportable kind of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            CheckError::Connect(_) => FailureKind::Connect,
            CheckError::Auth(_) => FailureKind::Auth,
            CheckError::Tls(_) => FailureKind::Tls,
            CheckError::Namespace(_) => FailureKind::Namespace,
            CheckError::Write(_) => FailureKind::Write,
            CheckError::Read(_) => FailureKind::Read,
            CheckError::Delete(_) => FailureKind::Delete,
            CheckError::VerificationMismatch(_) => FailureKind::VerificationMismatch,
            CheckError::Timeout { .. } => FailureKind::Timeout,
            CheckError::BackendUnavailable(_) => FailureKind::BackendUnavailable,
            CheckError::Config(_)
            | CheckError::Io(_)
            | CheckError::Yaml(_)
            | CheckError::Json(_) => FailureKind::Config,
        }
    }
}

/// Serializable classification of a failed result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Connect,
    Auth,
    Tls,
    Namespace,
    Write,
    Read,
    Delete,
    VerificationMismatch,
    Timeout,
    BackendUnavailable,
    Config,
    /// The instance task itself aborted (panic or cancellation).
    Aborted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Connect => "connect",
            FailureKind::Auth => "auth",
            FailureKind::Tls => "tls",
            FailureKind::Namespace => "namespace",
            FailureKind::Write => "write",
            FailureKind::Read => "read",
            FailureKind::Delete => "delete",
            FailureKind::VerificationMismatch => "verification_mismatch",
            FailureKind::Timeout => "timeout",
            FailureKind::BackendUnavailable => "backend_unavailable",
            FailureKind::Config => "config",
            FailureKind::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type alias for Result with CheckError.
pub type Result<T> = std::result::Result<T, CheckError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CheckError::Write("insert rejected".to_string());
        assert_eq!(err.to_string(), "Write error: insert rejected");
    }

    #[test]
    fn test_timeout_display_mentions_operation() {
        let err = CheckError::Timeout {
            operation: "get".to_string(),
            timeout: Duration::from_secs(30),
        };
        assert!(err.to_string().contains("'get'"));
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(CheckError::Tls("x".into()).kind(), FailureKind::Tls);
        assert_eq!(
            CheckError::VerificationMismatch("x".into()).kind(),
            FailureKind::VerificationMismatch
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(CheckError::from(io).kind(), FailureKind::Config);
    }

    #[test]
    fn test_failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::VerificationMismatch).unwrap();
        assert_eq!(json, "\"verification_mismatch\"");
    }
}
