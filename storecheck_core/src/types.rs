//! Core types for storecheck.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace used when a backend entry configures none.
pub const DEFAULT_NAMESPACE: &str = "devops";

/// Separator between the namespace and the logical key.
pub const PREFIX_SEPARATOR: &str = ":";

/// Supported backend families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Columnar analytic store (ColumnStore)
    ClickHouse,
    /// Distributed relational store (RelationalStore)
    TiDB,
    /// Raw distributed key-value store (RawKVStore)
    TiKV,
    /// Document/search index (DocumentStore)
    Elasticsearch,
}

impl BackendKind {
    /// All families, in configuration order.
    pub const ALL: [BackendKind; 4] = [
        BackendKind::ClickHouse,
        BackendKind::TiDB,
        BackendKind::TiKV,
        BackendKind::Elasticsearch,
    ];

    /// Short lowercase name used in identifiers and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::ClickHouse => "clickhouse",
            BackendKind::TiDB => "tidb",
            BackendKind::TiKV => "tikv",
            BackendKind::Elasticsearch => "elasticsearch",
        }
    }

    /// Product-neutral family name.
    pub fn family(&self) -> &'static str {
        match self {
            BackendKind::ClickHouse => "ColumnStore",
            BackendKind::TiDB => "RelationalStore",
            BackendKind::TiKV => "RawKVStore",
            BackendKind::Elasticsearch => "DocumentStore",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one configured backend instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendId {
    /// Backend family
    pub kind: BackendKind,
    /// 1-based position within its family's config list
    pub ordinal: usize,
    /// `host:port`
    pub endpoint: String,
}

impl BackendId {
    /// Creates a backend identifier.
    pub fn new(kind: BackendKind, ordinal: usize, endpoint: impl Into<String>) -> Self {
        Self {
            kind,
            ordinal,
            endpoint: endpoint.into(),
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} ({})", self.kind, self.ordinal, self.endpoint)
    }
}

/// Per-run key prefix, `"<namespace>:"`.
///
/// Fixed for the lifetime of one backend's run. There are no setters; a run
/// that needs a different prefix builds a new value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeyPrefix(String);

impl KeyPrefix {
    /// Builds the prefix for a namespace identifier.
    ///
    /// An empty namespace falls back to [`DEFAULT_NAMESPACE`].
    pub fn new(namespace: &str) -> Self {
        let namespace = namespace.trim();
        let namespace = if namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            namespace
        };
        Self(format!("{}{}", namespace, PREFIX_SEPARATOR))
    }

    /// Returns the raw prefix string, separator included.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prepends the prefix to a logical key.
    pub fn apply(&self, logical_key: &str) -> String {
        format!("{}{}", self.0, logical_key)
    }

    /// Strips the prefix from a raw key for display.
    ///
    /// Keys that do not carry the prefix are returned unchanged.
    pub fn strip<'a>(&self, raw_key: &'a str) -> &'a str {
        raw_key.strip_prefix(self.0.as_str()).unwrap_or(raw_key)
    }

    /// Returns true if the raw key belongs to this prefix.
    pub fn owns(&self, raw_key: &str) -> bool {
        raw_key.starts_with(self.0.as_str())
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A seeded test record, keyed by its logical (unprefixed) key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueRecord {
    /// Logical key
    pub key: String,
    /// Value last written by the run
    pub value: String,
    /// When the record was first written
    pub created_at: DateTime<Utc>,
}

impl KeyValueRecord {
    /// Creates a record stamped with the current time.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            created_at: Utc::now(),
        }
    }
}

/// Protocol step a result belongs to.
///
/// `Connect` covers instance-level failures raised before the protocol starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Connect,
    NamespaceSetup,
    SeedInsert,
    ReadBack,
    Update,
    RangeScan,
    Delete,
    Cleanup,
    FinalCheck,
}

impl Step {
    /// Protocol steps in execution order.
    pub const PROTOCOL: [Step; 8] = [
        Step::NamespaceSetup,
        Step::SeedInsert,
        Step::ReadBack,
        Step::Update,
        Step::RangeScan,
        Step::Delete,
        Step::Cleanup,
        Step::FinalCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Connect => "connect",
            Step::NamespaceSetup => "namespace_setup",
            Step::SeedInsert => "seed_insert",
            Step::ReadBack => "read_back",
            Step::Update => "update",
            Step::RangeScan => "range_scan",
            Step::Delete => "delete",
            Step::Cleanup => "cleanup",
            Step::FinalCheck => "final_check",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
