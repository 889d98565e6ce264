//! RawKVStore adapter over the TiKV raw API.
//!
//! The keyspace is global, so there is no namespace to create: the run's key
//! prefix is the only isolation.

use async_trait::async_trait;
use tikv_client::{Config, KvPair, RawClient};

use storecheck_core::{Adapter, BackendConfig, BackendKind, CheckError, Result, TimeoutConfig};

use crate::classify::is_tls_failure;
use crate::tls::TlsMaterial;

/// Session against one TiKV cluster through its PD endpoint.
pub struct TiKvAdapter {
    client: RawClient,
    endpoint: String,
    probe_key: String,
}

impl std::fmt::Debug for TiKvAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiKvAdapter")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl TiKvAdapter {
    /// Connects to the PD endpoint `host:port`.
    ///
    /// TLS needs the CA, the client certificate and its key.
    pub async fn connect(
        config: &BackendConfig,
        tls: Option<&TlsMaterial>,
        timeouts: &TimeoutConfig,
    ) -> Result<Self> {
        let mut client_config = Config::default().with_timeout(timeouts.operation.duration());
        if let Some(tls) = tls {
            tls.require_complete(BackendKind::TiKV)?;
            if let (Some(ca), Some(identity)) = (&tls.ca, &tls.identity) {
                client_config = client_config.with_security(
                    ca.path.clone(),
                    identity.cert.path.clone(),
                    identity.key.path.clone(),
                );
            }
        }

        let endpoint = config.endpoint();
        let client = RawClient::new_with_config(vec![endpoint.clone()], client_config)
            .await
            .map_err(|e| classify(&e, &endpoint))?;

        Ok(Self {
            client,
            endpoint,
            probe_key: config.key_prefix().as_str().to_string(),
        })
    }

    fn failure(&self, err: tikv_client::Error, wrap: fn(String) -> CheckError) -> CheckError {
        wrap(format!("{}: {}", self.endpoint, err))
    }
}

fn classify(err: &tikv_client::Error, endpoint: &str) -> CheckError {
    let message = format!("{}: {}", endpoint, err);
    if is_tls_failure(&message) {
        CheckError::Tls(message)
    } else {
        CheckError::Connect(message)
    }
}

/// Decodes a stored value, which this tool always writes as UTF-8.
pub fn decode(key: &str, bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|e| CheckError::Read(format!("{} holds non UTF-8 data: {}", key, e)))
}

fn decode_pair(pair: KvPair) -> Result<(String, String)> {
    let key: Vec<u8> = pair.key().clone().into();
    let value = pair.value().clone();
    let key = String::from_utf8(key)
        .map_err(|e| CheckError::Read(format!("scan returned a non UTF-8 key: {}", e)))?;
    let value = decode(&key, value)?;
    Ok((key, value))
}

#[async_trait]
impl Adapter for TiKvAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::TiKV
    }

    async fn ensure_namespace(&self) -> Result<()> {
        tracing::debug!(endpoint = %self.endpoint, "raw keyspace needs no namespace");
        Ok(())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.client
            .put(key.to_string(), value.as_bytes().to_vec())
            .await
            .map_err(|e| self.failure(e, CheckError::Write))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .client
            .get(key.to_string())
            .await
            .map_err(|e| self.failure(e, CheckError::Read))?;
        value.map(|bytes| decode(key, bytes)).transpose()
    }

    async fn scan(&self, start: &str, end: &str, limit: usize) -> Result<Vec<(String, String)>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);
        let pairs = self
            .client
            .scan(start.to_string()..end.to_string(), limit)
            .await
            .map_err(|e| self.failure(e, CheckError::Read))?;
        pairs.into_iter().map(decode_pair).collect()
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete(key.to_string())
            .await
            .map_err(|e| self.failure(e, CheckError::Delete))
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .get(self.probe_key.clone())
            .await
            .map_err(|e| classify(&e, &self.endpoint))?;
        tracing::info!(endpoint = %self.endpoint, "✓ Connected to TiKV");
        Ok(())
    }

    async fn close(self: Box<Self>) {
        tracing::debug!(endpoint = %self.endpoint, "tikv client released");
    }
}
