//! TLS material loading.
//!
//! Every configured certificate, key and CA file is read and parsed before
//! any network activity, so a bad file fails one instance with
//! [`CheckError::Tls`] instead of surfacing later as an opaque handshake error.

use std::fmt;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use storecheck_core::{BackendKind, CheckError, Result, TlsSettings};

/// A PEM file that was read and parsed.
#[derive(Clone)]
pub struct PemFile {
    pub path: PathBuf,
    pub pem: Vec<u8>,
}

impl fmt::Debug for PemFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PemFile")
            .field("path", &self.path)
            .field("bytes", &self.pem.len())
            .finish()
    }
}

/// Client certificate and its private key.
#[derive(Clone, Debug)]
pub struct ClientIdentity {
    pub cert: PemFile,
    pub key: PemFile,
}

impl ClientIdentity {
    /// Certificate chain followed by the key, as one PEM bundle.
    pub fn bundle(&self) -> Vec<u8> {
        let mut pem = self.cert.pem.clone();
        if !pem.ends_with(b"\n") {
            pem.push(b'\n');
        }
        pem.extend_from_slice(&self.key.pem);
        pem
    }
}

/// Validated TLS inputs for one backend instance.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterial {
    pub ca: Option<PemFile>,
    pub identity: Option<ClientIdentity>,
    pub skip_verify: bool,
}

impl TlsMaterial {
    /// Loads the material `settings` asks for.
    ///
    /// Returns `Ok(None)` when TLS is disabled.
    pub async fn load(settings: &TlsSettings) -> Result<Option<Self>> {
        if !settings.enabled {
            return Ok(None);
        }

        let ca = match &settings.ca_cert {
            Some(path) => Some(load_certificates(path).await?),
            None => None,
        };

        let identity = match (&settings.client_cert, &settings.client_key) {
            (Some(cert), Some(key)) => Some(ClientIdentity {
                cert: load_certificates(cert).await?,
                key: load_private_key(key).await?,
            }),
            (Some(cert), None) => {
                return Err(CheckError::Tls(format!(
                    "client certificate {} configured without a key",
                    cert.display()
                )))
            }
            (None, Some(key)) => {
                return Err(CheckError::Tls(format!(
                    "client key {} configured without a certificate",
                    key.display()
                )))
            }
            (None, None) => None,
        };

        if settings.skip_verify {
            tracing::warn!("certificate verification disabled");
        }

        Ok(Some(Self {
            ca,
            identity,
            skip_verify: settings.skip_verify,
        }))
    }

    /// Fails unless CA, certificate and key are all present.
    pub fn require_complete(&self, kind: BackendKind) -> Result<()> {
        if self.ca.is_none() || self.identity.is_none() {
            return Err(CheckError::Tls(format!(
                "{} TLS requires ssl_ca_crt, ssl_client_crt and ssl_client_key",
                kind
            )));
        }
        Ok(())
    }
}

async fn read_pem(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| CheckError::Tls(format!("failed to read {}: {}", path.display(), e)))
}

/// Reads `path` and checks it holds at least one certificate.
pub async fn load_certificates(path: &Path) -> Result<PemFile> {
    let pem = read_pem(path).await?;
    let count = parse_certificates(&pem)
        .map_err(|e| CheckError::Tls(format!("{}: {}", path.display(), e)))?;
    tracing::debug!(path = %path.display(), certificates = count, "loaded certificates");
    Ok(PemFile {
        path: path.to_path_buf(),
        pem,
    })
}

/// Reads `path` and checks it holds a private key.
pub async fn load_private_key(path: &Path) -> Result<PemFile> {
    let pem = read_pem(path).await?;
    parse_private_key(&pem).map_err(|e| CheckError::Tls(format!("{}: {}", path.display(), e)))?;
    Ok(PemFile {
        path: path.to_path_buf(),
        pem,
    })
}

/// Counts the certificates in a PEM buffer.
fn parse_certificates(pem: &[u8]) -> std::result::Result<usize, String> {
    let mut reader = BufReader::new(pem);
    let mut count = 0;
    for cert in rustls_pemfile::certs(&mut reader) {
        cert.map_err(|e| format!("invalid certificate PEM: {}", e))?;
        count += 1;
    }
    if count == 0 {
        return Err("no certificate found".to_string());
    }
    Ok(count)
}

fn parse_private_key(pem: &[u8]) -> std::result::Result<(), String> {
    let mut reader = BufReader::new(pem);
    match rustls_pemfile::private_key(&mut reader) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err("no private key found".to_string()),
        Err(e) => Err(format!("invalid private key PEM: {}", e)),
    }
}
