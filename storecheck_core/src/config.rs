//! YAML configuration model and loading.
//!
//! The file carries one list per backend family plus an optional `settings`
//! block:
//!
//! ```yaml
//! clickhouse:
//!   - host: ch-0.internal
//!     port: 8443
//!     username: default
//!     password: secret
//!     database: devops
//!     db_table_name: check_kv
//!     cluster: "{cluster}"
//!     tls: true
//!     ssl_ca_crt: /etc/certs/ca.pem
//! tikv:
//!   - host: pd-0.internal
//!     port: 2379
//!     prefix: devops
//! settings:
//!   operation_timeout_ms: 30000
//!   report_path: reports/storecheck.json
//! ```
//!
//! Entries are resolved into immutable [`BackendConfig`] values, one per
//! configured backend instance, in family order then file order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CheckError, Result};
use crate::timeout::{OperationTimeout, PollConfig, TimeoutConfig};
use crate::types::{BackendId, BackendKind, KeyPrefix, DEFAULT_NAMESPACE};

/// Default ClickHouse table when none is configured.
pub const DEFAULT_CLICKHOUSE_TABLE: &str = "main_dist";
/// Default TiDB table when none is configured.
pub const DEFAULT_TIDB_TABLE: &str = "test";
/// Default Elasticsearch index when none is configured.
pub const DEFAULT_ES_INDEX: &str = "test-1";
/// Config file read when `STORECHECK_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
/// Environment variable overriding the config path.
pub const CONFIG_PATH_ENV: &str = "STORECHECK_CONFIG";

/// Raw configuration file as written by operators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub clickhouse: Vec<BackendEntry>,
    #[serde(default)]
    pub tidb: Vec<BackendEntry>,
    #[serde(default)]
    pub tikv: Vec<BackendEntry>,
    #[serde(default, alias = "elasticsearch")]
    pub es: Vec<BackendEntry>,
    #[serde(default)]
    pub settings: Settings,
}

/// One backend entry as it appears in the file.
///
/// Empty strings are treated as unset, matching how operators blank out
/// optional fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendEntry {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Namespace identifier: SQL database, or the TiKV key prefix
    #[serde(default, alias = "prefix")]
    pub database: Option<String>,
    #[serde(default, alias = "db_table_name", alias = "index")]
    pub table_name: Option<String>,
    /// ClickHouse fallback when `table_name` is unset
    #[serde(default)]
    pub local_table_name: Option<String>,
    /// ClickHouse cluster for `ON CLUSTER` DDL
    #[serde(default)]
    pub cluster: Option<String>,
    /// Defaults to on for Elasticsearch, off for the other families
    #[serde(default)]
    pub tls: Option<bool>,
    #[serde(default)]
    pub tls_skip_verify: bool,
    #[serde(default)]
    pub ssl_client_crt: Option<PathBuf>,
    #[serde(default)]
    pub ssl_client_key: Option<PathBuf>,
    #[serde(default)]
    pub ssl_ca_crt: Option<PathBuf>,
}

/// Run-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub operation_timeout_ms: u64,
    pub visibility_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_concurrent: usize,
    pub report_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 30_000,
            visibility_timeout_ms: 10_000,
            poll_interval_ms: 200,
            max_concurrent: 4,
            report_path: None,
        }
    }
}

impl Settings {
    /// Converts the millisecond settings into timeout bounds.
    pub fn timeouts(&self) -> TimeoutConfig {
        TimeoutConfig {
            operation: OperationTimeout::from_millis(self.operation_timeout_ms),
            visibility: PollConfig::new(
                Duration::from_millis(self.visibility_timeout_ms),
                Duration::from_millis(self.poll_interval_ms),
            ),
        }
    }

    /// Validates bounds against each other.
    pub fn validate(&self) -> Result<()> {
        if self.operation_timeout_ms == 0
            || self.visibility_timeout_ms == 0
            || self.poll_interval_ms == 0
        {
            return Err(CheckError::Config("timeouts must be non-zero".to_string()));
        }
        if self.poll_interval_ms >= self.visibility_timeout_ms {
            return Err(CheckError::Config(format!(
                "poll_interval_ms ({}) must be below visibility_timeout_ms ({})",
                self.poll_interval_ms, self.visibility_timeout_ms
            )));
        }
        if self.operation_timeout_ms <= self.visibility_timeout_ms {
            return Err(CheckError::Config(format!(
                "operation_timeout_ms ({}) must exceed visibility_timeout_ms ({})",
                self.operation_timeout_ms, self.visibility_timeout_ms
            )));
        }
        if self.max_concurrent == 0 {
            return Err(CheckError::Config("max_concurrent must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// TLS settings of one backend instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    pub enabled: bool,
    /// Accept server certificates that fail verification
    pub skip_verify: bool,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub ca_cert: Option<PathBuf>,
}

/// Resolved, immutable parameters for one backend instance.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub id: BackendId,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Namespace identifier (database, index owner or key prefix)
    pub namespace: String,
    /// Table or index name; `None` for TiKV
    pub table: Option<String>,
    pub cluster: Option<String>,
    pub tls: TlsSettings,
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        self.id.kind
    }

    /// `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The prefix every logical key of this instance's run carries.
    pub fn key_prefix(&self) -> KeyPrefix {
        KeyPrefix::new(&self.namespace)
    }

    /// Table or index name, empty for backends without one.
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or("")
    }

    /// The data this instance's run reads and writes.
    ///
    /// Instances with equal targets may be hosts of one cluster and would
    /// see each other's seed keys, so they must not run at the same time.
    pub fn storage_target(&self) -> StorageTarget {
        StorageTarget {
            kind: self.kind(),
            namespace: self.namespace.clone(),
            table: self.table.clone(),
        }
    }
}

/// Family, namespace and table shared by instances that address the same data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageTarget {
    pub kind: BackendKind,
    pub namespace: String,
    pub table: Option<String>,
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("namespace", &self.namespace)
            .field("table", &self.table)
            .field("cluster", &self.cluster)
            .field("tls", &self.tls)
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn non_empty_path(value: &Option<PathBuf>) -> Option<PathBuf> {
    value
        .as_ref()
        .filter(|p| !p.as_os_str().is_empty())
        .cloned()
}

impl BackendEntry {
    /// Resolves defaults for `kind` and validates the entry.
    pub fn resolve(&self, kind: BackendKind, ordinal: usize) -> Result<BackendConfig> {
        let host = self.host.trim().to_string();
        if host.is_empty() {
            return Err(CheckError::Config(format!("{}#{}: host is required", kind, ordinal)));
        }
        if self.port == 0 {
            return Err(CheckError::Config(format!("{}#{}: port is required", kind, ordinal)));
        }

        let database = non_empty(&self.database);
        let namespace = match kind {
            BackendKind::ClickHouse | BackendKind::TiDB => database.ok_or_else(|| {
                CheckError::Config(format!("{}#{}: database is required", kind, ordinal))
            })?,
            BackendKind::TiKV | BackendKind::Elasticsearch => {
                database.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
            }
        };

        let table = match kind {
            BackendKind::ClickHouse => Some(
                non_empty(&self.table_name)
                    .or_else(|| non_empty(&self.local_table_name))
                    .unwrap_or_else(|| DEFAULT_CLICKHOUSE_TABLE.to_string()),
            ),
            BackendKind::TiDB => Some(
                non_empty(&self.table_name).unwrap_or_else(|| DEFAULT_TIDB_TABLE.to_string()),
            ),
            BackendKind::TiKV => None,
            BackendKind::Elasticsearch => Some(
                non_empty(&self.table_name)
                    .unwrap_or_else(|| DEFAULT_ES_INDEX.to_string())
                    .to_lowercase(),
            ),
        };

        let id = BackendId::new(kind, ordinal, format!("{}:{}", host, self.port));

        Ok(BackendConfig {
            id,
            host,
            port: self.port,
            username: non_empty(&self.username),
            password: non_empty(&self.password),
            namespace,
            table,
            cluster: if kind == BackendKind::ClickHouse {
                non_empty(&self.cluster)
            } else {
                None
            },
            tls: TlsSettings {
                enabled: self.tls.unwrap_or(kind == BackendKind::Elasticsearch),
                skip_verify: self.tls_skip_verify,
                client_cert: non_empty_path(&self.ssl_client_crt),
                client_key: non_empty_path(&self.ssl_client_key),
                ca_cert: non_empty_path(&self.ssl_ca_crt),
            },
        })
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct CheckConfig {
    pub backends: Vec<BackendConfig>,
    pub settings: Settings,
}

impl CheckConfig {
    /// Parses and resolves a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(yaml)?;
        Self::from_file(file)
    }

    /// Resolves a parsed config file.
    pub fn from_file(file: ConfigFile) -> Result<Self> {
        file.settings.validate()?;

        let mut backends = Vec::new();
        for kind in BackendKind::ALL {
            let entries = match kind {
                BackendKind::ClickHouse => &file.clickhouse,
                BackendKind::TiDB => &file.tidb,
                BackendKind::TiKV => &file.tikv,
                BackendKind::Elasticsearch => &file.es,
            };
            for (i, entry) in entries.iter().enumerate() {
                backends.push(entry.resolve(kind, i + 1)?);
            }
        }

        Ok(Self {
            backends,
            settings: file.settings,
        })
    }

    /// Reads and resolves the config file at `path`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = tokio::fs::read_to_string(path).await.map_err(|e| {
            CheckError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml_str(&yaml)?;
        tracing::info!(
            path = %path.display(),
            backends = config.backends.len(),
            "loaded configuration"
        );
        Ok(config)
    }

    /// Config path from `STORECHECK_CONFIG`, else `config.yaml`.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
clickhouse:
  - host: ch-0
    port: 8123
    username: default
    password: hunter2
    database: analytics
    db_table_name: ""
    local_table_name: kv_local
    cluster: "{cluster}"
tidb:
  - host: tidb-0
    port: 4000
    username: root
    database: devops
    tls: true
    ssl_ca_crt: /certs/ca.pem
tikv:
  - host: pd-0
    port: 2379
    prefix: infra
es:
  - host: es-0
    port: 9200
    username: elastic
    password: changeme
"#;

    #[test]
    fn test_parse_sample_resolves_all_families_in_order() {
        let config = CheckConfig::from_yaml_str(SAMPLE).unwrap();
        let kinds: Vec<_> = config.backends.iter().map(|b| b.kind()).collect();
        assert_eq!(kinds, BackendKind::ALL.to_vec());
        assert_eq!(config.settings, Settings::default());
    }

    #[test]
    fn test_clickhouse_table_fallbacks() {
        let config = CheckConfig::from_yaml_str(SAMPLE).unwrap();
        let ch = &config.backends[0];
        assert_eq!(ch.table_name(), "kv_local");
        assert_eq!(ch.cluster.as_deref(), Some("{cluster}"));
        assert_eq!(ch.key_prefix().as_str(), "analytics:");

        let bare = BackendEntry {
            host: "ch".into(),
            port: 8123,
            database: Some("db".into()),
            ..Default::default()
        };
        let resolved = bare.resolve(BackendKind::ClickHouse, 1).unwrap();
        assert_eq!(resolved.table_name(), DEFAULT_CLICKHOUSE_TABLE);
    }

    #[test]
    fn test_tikv_prefix_alias_and_es_defaults() {
        let config = CheckConfig::from_yaml_str(SAMPLE).unwrap();
        let tikv = &config.backends[2];
        assert_eq!(tikv.namespace, "infra");
        assert!(tikv.table.is_none());

        let es = &config.backends[3];
        assert_eq!(es.namespace, DEFAULT_NAMESPACE);
        assert_eq!(es.table_name(), DEFAULT_ES_INDEX);
        assert_eq!(es.id.to_string(), "elasticsearch#1 (es-0:9200)");
    }

    #[test]
    fn test_elasticsearch_defaults_to_tls() {
        let config = CheckConfig::from_yaml_str(SAMPLE).unwrap();
        assert!(config.backends[3].tls.enabled);
        assert!(!config.backends[0].tls.enabled);
        assert!(!config.backends[2].tls.enabled);

        let plain = "es:\n  - host: es-0\n    port: 9200\n    tls: false\n";
        let config = CheckConfig::from_yaml_str(plain).unwrap();
        assert!(!config.backends[0].tls.enabled);
    }

    #[test]
    fn test_storage_target_ignores_host() {
        let yaml = r#"
tidb:
  - host: tidb-0
    port: 4000
    database: devops
  - host: tidb-1
    port: 4000
    database: devops
  - host: tidb-2
    port: 4000
    database: staging
tikv:
  - host: pd-0
    port: 2379
    prefix: devops
"#;
        let config = CheckConfig::from_yaml_str(yaml).unwrap();
        let targets: Vec<_> = config.backends.iter().map(|b| b.storage_target()).collect();
        assert_eq!(targets[0], targets[1]);
        assert_ne!(targets[0], targets[2]);
        // same namespace on another family is separate data
        assert_ne!(targets[0], targets[3]);
    }

    #[test]
    fn test_tls_paths_resolved() {
        let config = CheckConfig::from_yaml_str(SAMPLE).unwrap();
        let tidb = &config.backends[1];
        assert!(tidb.tls.enabled);
        assert_eq!(tidb.tls.ca_cert, Some(PathBuf::from("/certs/ca.pem")));
        assert!(tidb.tls.client_cert.is_none());
        assert_eq!(tidb.table_name(), DEFAULT_TIDB_TABLE);
    }

    #[test]
    fn test_sql_backends_require_database() {
        let yaml = "tidb:\n  - host: tidb-0\n    port: 4000\n";
        let err = CheckConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, CheckError::Config(msg) if msg.contains("database")));
    }

    #[test]
    fn test_missing_host_rejected() {
        let yaml = "tikv:\n  - host: \"\"\n    port: 2379\n";
        assert!(matches!(
            CheckConfig::from_yaml_str(yaml),
            Err(CheckError::Config(_))
        ));
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());

        settings.poll_interval_ms = settings.visibility_timeout_ms;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.operation_timeout_ms = settings.visibility_timeout_ms;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.max_concurrent = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_block_parsed_with_defaults() {
        let yaml = "settings:\n  max_concurrent: 2\n  report_path: out/report.json\n";
        let config = CheckConfig::from_yaml_str(yaml).unwrap();
        assert!(config.backends.is_empty());
        assert_eq!(config.settings.max_concurrent, 2);
        assert_eq!(config.settings.operation_timeout_ms, 30_000);
        assert_eq!(
            config.settings.report_path,
            Some(PathBuf::from("out/report.json"))
        );
        let timeouts = config.settings.timeouts();
        assert_eq!(timeouts.operation.duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = CheckConfig::from_yaml_str(SAMPLE).unwrap();
        let rendered = format!("{:?}", config.backends[0]);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_load_from_disk() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.yaml");
        tokio::fs::write(&path, SAMPLE).await.unwrap();

        let config = CheckConfig::load(&path).await.unwrap();
        assert_eq!(config.backends.len(), 4);

        let missing = CheckConfig::load(temp.path().join("absent.yaml")).await;
        assert!(matches!(missing, Err(CheckError::Config(_))));
    }

    #[test]
    fn test_invalid_yaml_is_yaml_error() {
        let err = CheckConfig::from_yaml_str("tikv: [ {host: a, port: notanumber} ]").unwrap_err();
        assert!(matches!(err, CheckError::Yaml(_)));
    }
}
