//! RelationalStore adapter for TiDB over the MySQL protocol.

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlSslMode};

use storecheck_core::{Adapter, BackendConfig, BackendKind, CheckError, Result, TimeoutConfig};

use crate::classify::{error_chain, is_tls_failure};
use crate::tls::TlsMaterial;

/// MySQL "access denied" error number.
const ER_ACCESS_DENIED: u16 = 1045;
/// SQLSTATE for invalid authorization.
const SQLSTATE_INVALID_AUTHORIZATION: &str = "28000";

/// Session against one TiDB server.
#[derive(Debug)]
pub struct TiDbAdapter {
    pool: MySqlPool,
    endpoint: String,
    table: String,
}

impl TiDbAdapter {
    /// Opens a small pool against `config`.
    pub async fn connect(
        config: &BackendConfig,
        tls: Option<&TlsMaterial>,
        timeouts: &TimeoutConfig,
    ) -> Result<Self> {
        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.namespace);
        if let Some(user) = &config.username {
            options = options.username(user);
        }
        if let Some(password) = &config.password {
            options = options.password(password);
        }
        options = apply_tls(options, tls);

        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(timeouts.operation.duration())
            .connect_with(options)
            .await
            .map_err(|e| classify(&e, &config.endpoint()))?;

        Ok(Self {
            pool,
            endpoint: config.endpoint(),
            table: qualified_name(&config.namespace, config.table_name()),
        })
    }

    fn failure(&self, err: sqlx::Error, wrap: fn(String) -> CheckError) -> CheckError {
        wrap(format!("{}: {}", self.endpoint, error_chain(&err)))
    }
}

fn apply_tls(options: MySqlConnectOptions, tls: Option<&TlsMaterial>) -> MySqlConnectOptions {
    let Some(tls) = tls else {
        return options.ssl_mode(MySqlSslMode::Preferred);
    };

    let mode = if tls.skip_verify || tls.ca.is_none() {
        MySqlSslMode::Required
    } else {
        MySqlSslMode::VerifyCa
    };
    let mut options = options.ssl_mode(mode);
    if let Some(ca) = &tls.ca {
        options = options.ssl_ca_from_pem(ca.pem.clone());
    }
    if let Some(identity) = &tls.identity {
        options = options
            .ssl_client_cert_from_pem(&identity.cert.pem)
            .ssl_client_key_from_pem(&identity.key.pem);
    }
    options
}

/// Classifies a connection-time driver error.
fn classify(err: &sqlx::Error, endpoint: &str) -> CheckError {
    let message = format!("{}: {}", endpoint, error_chain(err));
    match err {
        sqlx::Error::Database(db) => {
            let number = db
                .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                .map(|e| e.number());
            classify_database(db.code().as_deref(), number, message)
        }
        sqlx::Error::Tls(_) => CheckError::Tls(message),
        _ if is_tls_failure(&message) => CheckError::Tls(message),
        _ => CheckError::Connect(message),
    }
}

/// Maps a server-reported error to Auth or Connect.
pub fn classify_database(sqlstate: Option<&str>, number: Option<u16>, message: String) -> CheckError {
    if number == Some(ER_ACCESS_DENIED) || sqlstate == Some(SQLSTATE_INVALID_AUTHORIZATION) {
        CheckError::Auth(message)
    } else {
        CheckError::Connect(message)
    }
}

/// Quotes an identifier with backticks, doubling embedded backticks.
pub fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

pub fn qualified_name(database: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(database), quote_ident(table))
}

pub fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (`key` VARCHAR(255) PRIMARY KEY, `value` TEXT)",
        table
    )
}

#[async_trait]
impl Adapter for TiDbAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::TiDB
    }

    async fn ensure_namespace(&self) -> Result<()> {
        sqlx::query(&create_table_sql(&self.table))
            .execute(&self.pool)
            .await
            .map_err(|e| self.failure(e, CheckError::Namespace))?;
        tracing::info!(endpoint = %self.endpoint, table = %self.table, "table ready");
        Ok(())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (`key`, `value`) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE `value` = VALUES(`value`)",
            self.table
        );
        sqlx::query(&sql)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(|e| self.failure(e, CheckError::Write))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let sql = format!("SELECT `value` FROM {} WHERE `key` = ?", self.table);
        sqlx::query_scalar::<_, String>(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.failure(e, CheckError::Read))
    }

    async fn scan(&self, start: &str, end: &str, limit: usize) -> Result<Vec<(String, String)>> {
        let sql = format!(
            "SELECT `key`, `value` FROM {} WHERE `key` >= ? AND `key` < ? ORDER BY `key` LIMIT ?",
            self.table
        );
        sqlx::query_as::<_, (String, String)>(&sql)
            .bind(start)
            .bind(end)
            .bind(u64::try_from(limit).unwrap_or(u64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.failure(e, CheckError::Read))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE `key` = ?", self.table);
        sqlx::query(&sql)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| self.failure(e, CheckError::Delete))?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let version = sqlx::query_scalar::<_, String>("SELECT VERSION()")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(&e, &self.endpoint))?;
        tracing::info!(endpoint = %self.endpoint, "✓ Connected to TiDB {}", version);
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.pool.close().await;
        tracing::debug!(endpoint = %self.endpoint, "tidb pool closed");
    }
}
