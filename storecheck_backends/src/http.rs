//! Shared HTTP plumbing for the REST-speaking families.

use storecheck_core::{BackendConfig, CheckError, Result, TimeoutConfig};

use crate::classify::{error_chain, is_tls_failure, truncate};
use crate::tls::TlsMaterial;

/// Base URL for `config`, `https` when TLS is enabled.
pub fn base_url(config: &BackendConfig) -> String {
    let scheme = if config.tls.enabled { "https" } else { "http" };
    format!("{}://{}:{}", scheme, config.host, config.port)
}

/// Builds a client honoring the instance's TLS material and timeouts.
pub fn build_client(
    tls: Option<&TlsMaterial>,
    timeouts: &TimeoutConfig,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .user_agent(concat!("storecheck/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(timeouts.operation.duration())
        .timeout(timeouts.operation.duration());

    if let Some(tls) = tls {
        if let Some(ca) = &tls.ca {
            let cert = reqwest::Certificate::from_pem(&ca.pem)
                .map_err(|e| CheckError::Tls(format!("{}: {}", ca.path.display(), e)))?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(identity) = &tls.identity {
            let identity = reqwest::Identity::from_pem(&identity.bundle()).map_err(|e| {
                CheckError::Tls(format!("{}: {}", identity.cert.path.display(), e))
            })?;
            builder = builder.identity(identity);
        }
        if tls.skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
    }

    builder
        .build()
        .map_err(|e| CheckError::Tls(format!("failed to build HTTP client: {}", e)))
}

/// Why a request did not produce a successful response.
#[derive(Debug)]
pub enum HttpFailure {
    /// The request never completed
    Transport(reqwest::Error),
    /// The server answered with a non-success status
    Status { status: u16, body: String },
}

impl HttpFailure {
    /// Wraps the failure in the error an operation reports, e.g. `CheckError::Write`.
    pub fn into_error(self, endpoint: &str, wrap: fn(String) -> CheckError) -> CheckError {
        match self {
            HttpFailure::Transport(e) => wrap(format!("{}: {}", endpoint, error_chain(&e))),
            HttpFailure::Status { status, body } => {
                wrap(format!("{} returned HTTP {}: {}", endpoint, status, truncate(&body, 512)))
            }
        }
    }

    /// Classifies the failure as a connection-level error.
    pub fn classify(self, endpoint: &str) -> CheckError {
        match self {
            HttpFailure::Transport(e) => classify_transport(&e, endpoint),
            HttpFailure::Status { status, body } => classify_status(status, &body, endpoint),
        }
    }
}

/// Sends `request` and returns the body of a successful response.
pub async fn send(request: reqwest::RequestBuilder) -> std::result::Result<String, HttpFailure> {
    let response = request.send().await.map_err(HttpFailure::Transport)?;
    let status = response.status();
    let body = response.text().await.map_err(HttpFailure::Transport)?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(HttpFailure::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Classifies a transport error raised while talking to `endpoint`.
pub fn classify_transport(err: &reqwest::Error, endpoint: &str) -> CheckError {
    let message = format!("{}: {}", endpoint, error_chain(err));
    if is_tls_failure(&message) {
        CheckError::Tls(message)
    } else {
        CheckError::Connect(message)
    }
}

/// Classifies a non-success HTTP response received during connection setup.
pub fn classify_status(status: u16, body: &str, endpoint: &str) -> CheckError {
    let message = format!("{} returned HTTP {}: {}", endpoint, status, truncate(body, 512));
    if status == 401 || status == 403 || body.contains("AUTHENTICATION_FAILED") {
        CheckError::Auth(message)
    } else {
        CheckError::Connect(message)
    }
}
