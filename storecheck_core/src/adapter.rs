//! Adapter contract shared by every backend family.
//!
//! The verification protocol only ever talks to a backend through
//! [`Adapter`]. Keys handed to an adapter are raw keys: the caller has
//! already applied the run's [`crate::types::KeyPrefix`].

use async_trait::async_trait;

use crate::config::BackendConfig;
use crate::error::Result;
use crate::timeout::TimeoutConfig;
use crate::types::BackendKind;

/// A live session against one backend instance.
///
/// Implementations must honor these semantics whatever the backend's native
/// paradigm:
///
/// - `ensure_namespace` is idempotent.
/// - `put` is an upsert.
/// - `get` returns `Ok(None)` for an absent key.
/// - `scan` returns `[start, end)` in key order, at most `limit` pairs, and an
///   empty list when nothing matches.
/// - `delete` of an absent key succeeds.
/// - a `get` after a successful `put` on the same session observes the write.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Family this adapter talks to.
    fn kind(&self) -> BackendKind;

    /// Creates the table, collection or index if it does not exist.
    async fn ensure_namespace(&self) -> Result<()>;

    /// Writes `value` under `key`, overwriting any previous value.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Reads the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Lists pairs whose keys fall in `[start, end)`.
    async fn scan(&self, start: &str, end: &str, limit: usize) -> Result<Vec<(String, String)>>;

    /// Removes `key`.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Cheap liveness probe run before a session is handed out.
    async fn ping(&self) -> Result<()>;

    /// Releases the session.
    ///
    /// Consumes the adapter, so it runs exactly once per session.
    async fn close(self: Box<Self>);
}

/// Turns a backend configuration into a live, probed [`Adapter`].
#[async_trait]
pub trait Establish: Send + Sync {
    async fn establish(
        &self,
        config: &BackendConfig,
        timeouts: &TimeoutConfig,
    ) -> Result<Box<dyn Adapter>>;
}
