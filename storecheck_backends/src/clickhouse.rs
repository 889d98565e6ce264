//! ColumnStore adapter over the ClickHouse HTTP interface.
//!
//! Rows live in a `(key String, value String)` MergeTree table. Inserts into
//! distributed tables and `ALTER TABLE` mutations apply asynchronously, so
//! `put` and `delete` poll until their effect is visible.

use async_trait::async_trait;
use serde::Deserialize;

use storecheck_core::poll::poll_until;
use storecheck_core::{Adapter, BackendConfig, BackendKind, CheckError, PollConfig, Result};

use crate::http::{self, HttpFailure};

/// Per-query execution cap passed to the server, in seconds.
const MAX_EXECUTION_TIME_SECS: u32 = 60;

#[derive(Debug, Deserialize)]
struct ValueRow {
    value: String,
}

#[derive(Debug, Deserialize)]
struct PairRow {
    key: String,
    value: String,
}

/// Session against one ClickHouse server.
pub struct ClickHouseAdapter {
    client: reqwest::Client,
    url: String,
    endpoint: String,
    database: String,
    table: String,
    cluster: Option<String>,
    username: Option<String>,
    password: Option<String>,
    visibility: PollConfig,
}

impl std::fmt::Debug for ClickHouseAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseAdapter")
            .field("url", &self.url)
            .field("database", &self.database)
            .field("table", &self.table)
            .field("cluster", &self.cluster)
            .finish_non_exhaustive()
    }
}

impl ClickHouseAdapter {
    pub fn new(config: &BackendConfig, client: reqwest::Client, visibility: PollConfig) -> Self {
        Self {
            client,
            url: format!("{}/", http::base_url(config)),
            endpoint: config.endpoint(),
            database: config.namespace.clone(),
            table: config.table_name().to_string(),
            cluster: config.cluster.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            visibility,
        }
    }

    fn qualified(&self) -> String {
        qualified_name(&self.database, &self.table)
    }

    /// Runs `sql`; `data` becomes the request body with the query moved to the URL.
    async fn execute(
        &self,
        sql: &str,
        params: &[(&str, &str)],
        data: Option<String>,
    ) -> std::result::Result<String, HttpFailure> {
        let mut query: Vec<(String, String)> = vec![
            ("database".to_string(), self.database.clone()),
            (
                "max_execution_time".to_string(),
                MAX_EXECUTION_TIME_SECS.to_string(),
            ),
        ];
        for (name, value) in params {
            query.push((format!("param_{}", name), value.to_string()));
        }
        let body = match data {
            Some(data) => {
                query.push(("query".to_string(), sql.to_string()));
                data
            }
            None => sql.to_string(),
        };

        let mut request = self.client.post(&self.url).query(&query).body(body);
        if let Some(user) = &self.username {
            request = request.header("X-ClickHouse-User", user);
        }
        if let Some(password) = &self.password {
            request = request.header("X-ClickHouse-Key", password);
        }
        http::send(request).await
    }

    async fn select_value(&self, key: &str) -> Result<Option<String>> {
        let sql = format!(
            "SELECT value FROM {} WHERE key = {{key:String}} LIMIT 1 FORMAT JSONEachRow",
            self.qualified()
        );
        let body = self
            .execute(&sql, &[("key", key)], None)
            .await
            .map_err(|e| e.into_error(&self.endpoint, CheckError::Read))?;
        let rows: Vec<ValueRow> = parse_rows(&body).map_err(CheckError::Read)?;
        Ok(rows.into_iter().next().map(|row| row.value))
    }

    async fn mutate(&self, sql: &str, wrap: fn(String) -> CheckError) -> Result<()> {
        tracing::debug!(endpoint = %self.endpoint, "{}", sql);
        self.execute(sql, &[], None)
            .await
            .map(|_| ())
            .map_err(|e| e.into_error(&self.endpoint, wrap))
    }
}

/// Labels a failed lookup issued on behalf of a write or delete as that operation's failure.
fn reclassify(err: CheckError, wrap: fn(String) -> CheckError) -> CheckError {
    match err {
        CheckError::Read(message) => wrap(message),
        other => wrap(other.to_string()),
    }
}

#[async_trait]
impl Adapter for ClickHouseAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::ClickHouse
    }

    async fn ensure_namespace(&self) -> Result<()> {
        for sql in namespace_statements(&self.database, &self.table, self.cluster.as_deref()) {
            self.mutate(&sql, CheckError::Namespace).await?;
        }
        tracing::info!(endpoint = %self.endpoint, table = %self.qualified(), "table ready");
        Ok(())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let exists = self
            .select_value(key)
            .await
            .map_err(|e| reclassify(e, CheckError::Write))?
            .is_some();

        if exists {
            let sql = format!(
                "ALTER TABLE {} UPDATE value = {} WHERE key = {}",
                self.qualified(),
                quote_string(value),
                quote_string(key)
            );
            self.mutate(&sql, CheckError::Write).await?;
        } else {
            let sql = format!("INSERT INTO {} (key, value) FORMAT JSONEachRow", self.qualified());
            let row = serde_json::json!({ "key": key, "value": value }).to_string();
            self.execute(&sql, &[], Some(row))
                .await
                .map_err(|e| e.into_error(&self.endpoint, CheckError::Write))?;
        }

        let outcome = poll_until(&self.visibility, || async move {
            Ok(self.select_value(key).await?.as_deref() == Some(value))
        })
        .await
        .map_err(|e| reclassify(e, CheckError::Write))?;
        if !outcome.is_visible() {
            return Err(CheckError::Write(format!(
                "{} not visible after {:?}",
                key,
                outcome.waited()
            )));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.select_value(key).await
    }

    async fn scan(&self, start: &str, end: &str, limit: usize) -> Result<Vec<(String, String)>> {
        let sql = format!(
            "SELECT key, value FROM {} WHERE key >= {{start:String}} AND key < {{end:String}} \
             ORDER BY key LIMIT {} FORMAT JSONEachRow",
            self.qualified(),
            limit
        );
        let body = self
            .execute(&sql, &[("start", start), ("end", end)], None)
            .await
            .map_err(|e| e.into_error(&self.endpoint, CheckError::Read))?;
        let rows: Vec<PairRow> = parse_rows(&body).map_err(CheckError::Read)?;
        Ok(rows.into_iter().map(|row| (row.key, row.value)).collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let present = self
            .select_value(key)
            .await
            .map_err(|e| reclassify(e, CheckError::Delete))?
            .is_some();
        if !present {
            return Ok(());
        }

        let sql = format!(
            "ALTER TABLE {} DELETE WHERE key = {}",
            self.qualified(),
            quote_string(key)
        );
        self.mutate(&sql, CheckError::Delete).await?;

        let outcome = poll_until(&self.visibility, || async move {
            Ok(self.select_value(key).await?.is_none())
        })
        .await
        .map_err(|e| reclassify(e, CheckError::Delete))?;
        if !outcome.is_visible() {
            return Err(CheckError::Delete(format!(
                "{} still present after {:?}",
                key,
                outcome.waited()
            )));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let version = self
            .execute("SELECT version()", &[], None)
            .await
            .map_err(|e| e.classify(&self.endpoint))?;
        tracing::info!(endpoint = %self.endpoint, "✓ Connected to ClickHouse {}", version.trim());
        Ok(())
    }

    async fn close(self: Box<Self>) {
        tracing::debug!(endpoint = %self.endpoint, "clickhouse session released");
    }
}

/// Quotes an identifier with backticks.
pub fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('\\', "\\\\").replace('`', "\\`"))
}

/// `database`.`table`, both quoted.
pub fn qualified_name(database: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(database), quote_ident(table))
}

/// Quotes a string literal.
pub fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// DDL creating the table, plus its distributed companion on a cluster.
pub fn namespace_statements(database: &str, table: &str, cluster: Option<&str>) -> Vec<String> {
    let local = qualified_name(database, table);
    match cluster {
        None => vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (key String, value String) \
             ENGINE = MergeTree ORDER BY key",
            local
        )],
        Some(cluster) => {
            let cluster = quote_string(cluster);
            let distributed = qualified_name(database, &format!("{}_dist", table));
            vec![
                format!(
                    "CREATE TABLE IF NOT EXISTS {} ON CLUSTER {} (key String, value String) \
                     ENGINE = ReplicatedMergeTree ORDER BY key",
                    local, cluster
                ),
                format!(
                    "CREATE TABLE IF NOT EXISTS {} ON CLUSTER {} AS {} \
                     ENGINE = Distributed({}, {}, {}, rand())",
                    distributed,
                    cluster,
                    local,
                    cluster,
                    quote_string(database),
                    quote_string(table)
                ),
            ]
        }
    }
}

/// Parses a `JSONEachRow` body.
fn parse_rows<T: serde::de::DeserializeOwned>(body: &str) -> std::result::Result<Vec<T>, String> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| format!("unexpected row {:?}: {}", line, e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_failures_take_the_operation_kind() {
        let err = reclassify(
            CheckError::Read("ch-0:8123 returned HTTP 500: overloaded".to_string()),
            CheckError::Write,
        );
        assert!(matches!(err, CheckError::Write(ref m) if m == "ch-0:8123 returned HTTP 500: overloaded"));

        let err = reclassify(CheckError::Read("connection reset".to_string()), CheckError::Delete);
        assert!(matches!(err, CheckError::Delete(ref m) if m == "connection reset"));

        let err = reclassify(CheckError::Connect("refused".to_string()), CheckError::Write);
        assert!(matches!(err, CheckError::Write(ref m) if m.contains("refused")));
    }

    #[test]
    fn test_quote_ident_escapes_backticks() {
        assert_eq!(quote_ident("kv"), "`kv`");
        assert_eq!(quote_ident("a`b"), "`a\\`b`");
        assert_eq!(qualified_name("devops", "main_dist"), "`devops`.`main_dist`");
    }

    #[test]
    fn test_quote_string_escapes_quotes() {
        assert_eq!(quote_string("plain"), "'plain'");
        assert_eq!(quote_string("it's"), "'it\\'s'");
        assert_eq!(quote_string("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn test_single_node_namespace() {
        let statements = namespace_statements("devops", "kv", None);
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("`devops`.`kv`"));
        assert!(statements[0].contains("ENGINE = MergeTree ORDER BY key"));
        assert!(!statements[0].contains("ON CLUSTER"));
    }

    #[test]
    fn test_cluster_namespace_adds_distributed_table() {
        let statements = namespace_statements("devops", "kv", Some("{cluster}"));
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("ON CLUSTER '{cluster}'"));
        assert!(statements[0].contains("ReplicatedMergeTree"));
        assert!(statements[1].starts_with("CREATE TABLE IF NOT EXISTS `devops`.`kv_dist`"));
        assert!(statements[1].contains("Distributed('{cluster}', 'devops', 'kv', rand())"));
    }

    #[test]
    fn test_parse_json_each_row() {
        let body = "{\"key\":\"devops:a\",\"value\":\"1\"}\n{\"key\":\"devops:b\",\"value\":\"2\"}\n";
        let rows: Vec<PairRow> = parse_rows(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].key, "devops:b");

        let empty: Vec<ValueRow> = parse_rows("").unwrap();
        assert!(empty.is_empty());

        assert!(parse_rows::<ValueRow>("not json").is_err());
    }
}
