//! In-memory adapter and establisher.
//!
//! A backend stand-in with the full [`Adapter`] semantics, used to exercise
//! the protocol without a network. Faults can be injected per raw key to
//! drive the failure paths of the runner.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::adapter::{Adapter, Establish};
use crate::config::BackendConfig;
use crate::error::{CheckError, Result};
use crate::timeout::TimeoutConfig;
use crate::types::BackendKind;

/// Faults injected into a [`MemoryStore`].
#[derive(Clone, Debug, Default)]
pub struct Faults {
    /// `ensure_namespace` fails
    pub fail_namespace: bool,
    /// `put` fails for these raw keys
    pub fail_put: HashSet<String>,
    /// `get` fails for these raw keys
    pub fail_get: HashSet<String>,
    /// `delete` fails for these raw keys
    pub fail_delete: HashSet<String>,
    /// `scan` fails
    pub fail_scan: bool,
    /// `scan` panics, as a crashing driver would
    pub panic_on_scan: bool,
    /// `put` reports success without storing anything
    pub drop_writes: HashSet<String>,
    /// `delete` reports success without removing anything
    pub ignore_deletes: HashSet<String>,
    /// Extra pair appended to every scan result
    pub scan_extra: Option<(String, String)>,
    /// Every data operation stalls for this long before running
    pub stall: Option<Duration>,
}

#[derive(Debug, Default)]
struct StoreState {
    namespaces: HashMap<String, BTreeMap<String, String>>,
    namespace_creations: usize,
    sessions_opened: usize,
    sessions_closed: usize,
    faults: Faults,
}

/// Shared state behind one or more [`MemoryAdapter`] sessions.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store with faults injected.
    pub fn with_faults(faults: Faults) -> Self {
        let store = Self::new();
        store.lock().faults = faults;
        store
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens a raw key-value session scoped to `namespace`.
    pub fn adapter(&self, namespace: impl Into<String>) -> MemoryAdapter {
        self.adapter_for(BackendKind::TiKV, namespace)
    }

    /// Opens a session that reports itself as `kind`.
    pub fn adapter_for(&self, kind: BackendKind, namespace: impl Into<String>) -> MemoryAdapter {
        self.lock().sessions_opened += 1;
        MemoryAdapter {
            store: self.clone(),
            kind,
            namespace: namespace.into(),
        }
    }

    /// Copy of the data held in `namespace`.
    pub fn snapshot(&self, namespace: &str) -> BTreeMap<String, String> {
        self.lock()
            .namespaces
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    /// Seeds a pair directly, creating the namespace if needed.
    pub fn insert_raw(&self, namespace: &str, key: &str, value: &str) {
        self.lock()
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Number of times a namespace was actually created.
    pub fn namespace_creations(&self) -> usize {
        self.lock().namespace_creations
    }

    pub fn sessions_opened(&self) -> usize {
        self.lock().sessions_opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.lock().sessions_closed
    }
}

/// One session against a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryAdapter {
    store: MemoryStore,
    kind: BackendKind,
    namespace: String,
}

impl MemoryAdapter {
    async fn stall(&self) {
        let stall = self.store.lock().faults.stall;
        if let Some(duration) = stall {
            tokio::time::sleep(duration).await;
        }
    }

    fn missing_namespace(&self) -> String {
        format!("namespace '{}' does not exist", self.namespace)
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn ensure_namespace(&self) -> Result<()> {
        self.stall().await;
        let mut state = self.store.lock();
        if state.faults.fail_namespace {
            return Err(CheckError::Namespace(format!(
                "injected failure creating '{}'",
                self.namespace
            )));
        }
        if !state.namespaces.contains_key(&self.namespace) {
            state.namespaces.insert(self.namespace.clone(), BTreeMap::new());
            state.namespace_creations += 1;
        }
        Ok(())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.stall().await;
        let mut state = self.store.lock();
        if state.faults.fail_put.contains(key) {
            return Err(CheckError::Write(format!("injected failure writing {}", key)));
        }
        let drop_write = state.faults.drop_writes.contains(key);
        let missing = self.missing_namespace();
        let data = state
            .namespaces
            .get_mut(&self.namespace)
            .ok_or(CheckError::Write(missing))?;
        if !drop_write {
            data.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.stall().await;
        let state = self.store.lock();
        if state.faults.fail_get.contains(key) {
            return Err(CheckError::Read(format!("injected failure reading {}", key)));
        }
        let data = state
            .namespaces
            .get(&self.namespace)
            .ok_or_else(|| CheckError::Read(self.missing_namespace()))?;
        Ok(data.get(key).cloned())
    }

    async fn scan(&self, start: &str, end: &str, limit: usize) -> Result<Vec<(String, String)>> {
        self.stall().await;
        if self.store.lock().faults.panic_on_scan {
            panic!("injected panic scanning {}", self.namespace);
        }
        let state = self.store.lock();
        if state.faults.fail_scan {
            return Err(CheckError::Read("injected scan failure".to_string()));
        }
        let data = state
            .namespaces
            .get(&self.namespace)
            .ok_or_else(|| CheckError::Read(self.missing_namespace()))?;

        let mut pairs: Vec<(String, String)> = if start < end {
            data.range(start.to_string()..end.to_string())
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        } else {
            Vec::new()
        };
        if let Some(extra) = &state.faults.scan_extra {
            pairs.push(extra.clone());
        }
        Ok(pairs)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.stall().await;
        let mut state = self.store.lock();
        if state.faults.fail_delete.contains(key) {
            return Err(CheckError::Delete(format!("injected failure deleting {}", key)));
        }
        let ignore = state.faults.ignore_deletes.contains(key);
        let missing = self.missing_namespace();
        let data = state
            .namespaces
            .get_mut(&self.namespace)
            .ok_or(CheckError::Delete(missing))?;
        if !ignore {
            data.remove(key);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.store.lock().sessions_closed += 1;
        tracing::debug!(namespace = %self.namespace, "memory session closed");
    }
}

/// Establisher handing out [`MemoryAdapter`] sessions keyed by host.
///
/// Hosts without a registered store are unreachable. Hosts marked with
/// [`MemoryEstablisher::reject_auth`] fail authentication.
#[derive(Clone, Debug, Default)]
pub struct MemoryEstablisher {
    stores: HashMap<String, MemoryStore>,
    rejected: HashSet<String>,
}

impl MemoryEstablisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `store` as the backend behind `host`.
    pub fn with_host(mut self, host: impl Into<String>, store: MemoryStore) -> Self {
        self.stores.insert(host.into(), store);
        self
    }

    /// Makes `host` reject every credential.
    pub fn reject_auth(mut self, host: impl Into<String>) -> Self {
        self.rejected.insert(host.into());
        self
    }
}

#[async_trait]
impl Establish for MemoryEstablisher {
    async fn establish(
        &self,
        config: &BackendConfig,
        _timeouts: &TimeoutConfig,
    ) -> Result<Box<dyn Adapter>> {
        let store = self.stores.get(&config.host).ok_or_else(|| {
            CheckError::Connect(format!("{} is unreachable", config.endpoint()))
        })?;
        if self.rejected.contains(&config.host) {
            return Err(CheckError::Auth(format!(
                "credentials rejected by {}",
                config.endpoint()
            )));
        }

        let namespace = config
            .table
            .clone()
            .unwrap_or_else(|| config.namespace.clone());
        let adapter = store.adapter_for(config.kind(), namespace);
        adapter.ping().await?;
        Ok(Box::new(adapter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ready_adapter(store: &MemoryStore) -> MemoryAdapter {
        let adapter = store.adapter("kv");
        adapter.ensure_namespace().await.unwrap();
        adapter
    }

    #[tokio::test]
    async fn test_put_then_get_round_trips() {
        let store = MemoryStore::new();
        let adapter = ready_adapter(&store).await;

        adapter.put("devops:a", "1").await.unwrap();
        assert_eq!(adapter.get("devops:a").await.unwrap(), Some("1".to_string()));

        adapter.put("devops:a", "2").await.unwrap();
        assert_eq!(adapter.get("devops:a").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_delete_then_get_is_absent() {
        let store = MemoryStore::new();
        let adapter = ready_adapter(&store).await;

        adapter.put("devops:a", "1").await.unwrap();
        adapter.delete("devops:a").await.unwrap();
        assert_eq!(adapter.get("devops:a").await.unwrap(), None);

        // absent key delete is not an error
        adapter.delete("devops:a").await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_namespace_idempotent() {
        let store = MemoryStore::new();
        let adapter = ready_adapter(&store).await;
        adapter.put("devops:a", "1").await.unwrap();

        adapter.ensure_namespace().await.unwrap();
        assert_eq!(store.namespace_creations(), 1);
        assert_eq!(store.snapshot("kv").len(), 1);
    }

    #[tokio::test]
    async fn test_scan_prefix_range() {
        let store = MemoryStore::new();
        let adapter = ready_adapter(&store).await;
        for key in ["p_1", "p_2", "p_3", "q_1"] {
            adapter.put(key, "v").await.unwrap();
        }

        let pairs = adapter.scan("p", "p\u{ff}", 100).await.unwrap();
        let keys: Vec<_> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["p_1", "p_2", "p_3"]);

        adapter.delete("p_2").await.unwrap();
        let pairs = adapter.scan("p", "p\u{ff}", 100).await.unwrap();
        assert_eq!(pairs.len(), 2);

        assert_eq!(adapter.scan("p", "p\u{ff}", 1).await.unwrap().len(), 1);
        assert!(adapter.scan("z", "a", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_operations_require_namespace() {
        let store = MemoryStore::new();
        let adapter = store.adapter("kv");
        assert!(matches!(adapter.put("k", "v").await, Err(CheckError::Write(_))));
        assert!(matches!(adapter.get("k").await, Err(CheckError::Read(_))));
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let mut faults = Faults::default();
        faults.fail_put.insert("bad".to_string());
        faults.drop_writes.insert("lost".to_string());
        let store = MemoryStore::with_faults(faults);
        let adapter = ready_adapter(&store).await;

        assert!(matches!(adapter.put("bad", "v").await, Err(CheckError::Write(_))));
        adapter.put("lost", "v").await.unwrap();
        assert_eq!(adapter.get("lost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_counts_sessions() {
        let store = MemoryStore::new();
        let adapter = Box::new(store.adapter("kv"));
        assert_eq!(store.sessions_opened(), 1);
        adapter.close().await;
        assert_eq!(store.sessions_closed(), 1);
    }
}
