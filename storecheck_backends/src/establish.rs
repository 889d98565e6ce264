//! Connection establishment for the real backend families.

use async_trait::async_trait;

use storecheck_core::timeout::with_timeout;
use storecheck_core::{Adapter, BackendConfig, BackendKind, CheckError, Establish, Result, TimeoutConfig};

use crate::tls::TlsMaterial;

/// Opens live sessions against configured backend instances.
///
/// TLS material is loaded and validated first, then the family driver
/// connects, then the session is pinged under the operation timeout. A
/// session whose ping fails is closed before the error is returned.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConnectionEstablisher;

impl ConnectionEstablisher {
    pub fn new() -> Self {
        Self
    }

    /// Families compiled into this build.
    pub fn available() -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|kind| is_available(*kind))
            .collect()
    }
}

/// Returns true if the driver for `kind` is compiled in.
pub fn is_available(kind: BackendKind) -> bool {
    match kind {
        BackendKind::ClickHouse => cfg!(feature = "clickhouse"),
        BackendKind::TiDB => cfg!(feature = "tidb"),
        BackendKind::TiKV => cfg!(feature = "tikv"),
        BackendKind::Elasticsearch => cfg!(feature = "elasticsearch"),
    }
}

fn unavailable(kind: BackendKind) -> CheckError {
    CheckError::BackendUnavailable(format!(
        "{} support was not compiled into this build (enable the `{}` feature)",
        kind,
        kind.as_str()
    ))
}

#[async_trait]
impl Establish for ConnectionEstablisher {
    async fn establish(
        &self,
        config: &BackendConfig,
        timeouts: &TimeoutConfig,
    ) -> Result<Box<dyn Adapter>> {
        let kind = config.kind();
        if !is_available(kind) {
            return Err(unavailable(kind));
        }

        let tls = TlsMaterial::load(&config.tls).await?;
        tracing::debug!(
            backend = %config.id,
            tls = tls.is_some(),
            "connecting"
        );

        let adapter = connect(kind, config, tls.as_ref(), timeouts).await?;
        if let Err(e) = with_timeout(timeouts.operation, "ping", adapter.ping()).await {
            adapter.close().await;
            return Err(e);
        }
        Ok(adapter)
    }
}

#[allow(unused_variables)]
async fn connect(
    kind: BackendKind,
    config: &BackendConfig,
    tls: Option<&TlsMaterial>,
    timeouts: &TimeoutConfig,
) -> Result<Box<dyn Adapter>> {
    match kind {
        #[cfg(feature = "clickhouse")]
        BackendKind::ClickHouse => {
            let client = crate::http::build_client(tls, timeouts)?;
            Ok(Box::new(crate::clickhouse::ClickHouseAdapter::new(
                config,
                client,
                timeouts.visibility,
            )))
        }
        #[cfg(feature = "tidb")]
        BackendKind::TiDB => Ok(Box::new(
            crate::tidb::TiDbAdapter::connect(config, tls, timeouts).await?,
        )),
        #[cfg(feature = "tikv")]
        BackendKind::TiKV => Ok(Box::new(
            crate::tikv::TiKvAdapter::connect(config, tls, timeouts).await?,
        )),
        #[cfg(feature = "elasticsearch")]
        BackendKind::Elasticsearch => {
            let client = crate::http::build_client(tls, timeouts)?;
            Ok(Box::new(crate::elasticsearch::ElasticsearchAdapter::new(
                config, client,
            )?))
        }
        #[allow(unreachable_patterns)]
        other => Err(unavailable(other)),
    }
}
