//! Runs the protocol across every configured backend instance.
//!
//! Each instance gets its own session, runner and key prefix. Instances that
//! address the same data (see [`BackendConfig::storage_target`]) share seed
//! keys, so they run one after another; distinct targets run concurrently up
//! to `max_concurrent`. One instance's failure never stops another.

use futures_util::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::adapter::Establish;
use crate::config::{BackendConfig, CheckConfig, Settings};
use crate::report::{Reporter, VerificationReport, VerificationResult};
use crate::runner::VerificationRunner;
use crate::timeout::{with_timeout, TimeoutConfig};
use crate::types::{BackendId, Step};

/// Instances in configuration order, tagged with their position.
type Group = Vec<(usize, BackendConfig)>;

/// Coordinates a verification run over many instances.
pub struct Coordinator {
    establisher: Arc<dyn Establish>,
    timeouts: TimeoutConfig,
    max_concurrent: usize,
}

impl Coordinator {
    pub fn new(establisher: Arc<dyn Establish>, settings: &Settings) -> Self {
        Self {
            establisher,
            timeouts: settings.timeouts(),
            max_concurrent: settings.max_concurrent.max(1),
        }
    }

    /// Runs every backend in `config`.
    pub async fn run_config(&self, config: &CheckConfig) -> VerificationReport {
        self.run(&config.backends).await
    }

    /// Runs `backends` and aggregates their results in the given order.
    pub async fn run(&self, backends: &[BackendConfig]) -> VerificationReport {
        let mut reporter = Reporter::new();
        let groups = group_by_target(backends);
        tracing::info!(
            run_id = %reporter.run_id(),
            instances = backends.len(),
            targets = groups.len(),
            max_concurrent = self.max_concurrent,
            "verification run started"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut join_set = JoinSet::new();
        let mut pending: BTreeMap<usize, BackendId> = backends
            .iter()
            .enumerate()
            .map(|(order, config)| (order, config.id.clone()))
            .collect();

        for group in groups {
            let semaphore = semaphore.clone();
            let establisher = self.establisher.clone();
            let timeouts = self.timeouts;

            join_set.spawn(async move {
                let mut finished = Vec::with_capacity(group.len());
                for (order, config) in group {
                    // A closed semaphore only means no throttling
                    let _permit = semaphore.clone().acquire_owned().await.ok();
                    let backend = config.id.clone();
                    let establisher = establisher.clone();
                    let instance = tokio::spawn(async move {
                        verify_instance(establisher.as_ref(), &config, &timeouts).await
                    });
                    let results = match instance.await {
                        Ok(results) => results,
                        Err(e) => {
                            tracing::error!(backend = %backend, "verification task failed: {}", e);
                            let message = format!("verification of {} aborted: {}", backend, e);
                            vec![VerificationResult::aborted(backend.clone(), message)]
                        }
                    };
                    finished.push((order, backend, results));
                }
                finished
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(finished) => {
                    for (order, backend, results) in finished {
                        pending.remove(&order);
                        reporter.record(order, backend, results);
                    }
                }
                Err(e) => {
                    tracing::error!("verification group failed: {}", e);
                }
            }
        }

        // Anything still pending ended without returning results
        for (order, backend) in pending {
            let message = format!("verification of {} aborted before completion", backend);
            reporter.record(order, backend.clone(), vec![VerificationResult::aborted(backend, message)]);
        }

        let report = reporter.finish();
        tracing::info!(
            run_id = %report.run_id,
            failures = report.failures().count(),
            "verification run finished"
        );
        report
    }
}

/// Partitions `backends` by storage target, keeping configuration order
/// within each group and across groups by first appearance.
fn group_by_target(backends: &[BackendConfig]) -> Vec<Group> {
    let mut groups: Vec<(crate::config::StorageTarget, Group)> = Vec::new();
    for (order, config) in backends.iter().enumerate() {
        let target = config.storage_target();
        match groups.iter_mut().find(|(existing, _)| *existing == target) {
            Some((_, members)) => members.push((order, config.clone())),
            None => groups.push((target, vec![(order, config.clone())])),
        }
    }
    groups.into_iter().map(|(_, members)| members).collect()
}

/// Establishes a session for one instance, runs the protocol and closes it.
///
/// A session that cannot be established yields exactly one `Connect`
/// failure and no step results. The session is closed even if the runner
/// panics; the panic then continues to the caller.
pub async fn verify_instance(
    establisher: &dyn Establish,
    config: &BackendConfig,
    timeouts: &TimeoutConfig,
) -> Vec<VerificationResult> {
    tracing::info!(backend = %config.id, family = config.kind().family(), "=== Testing {} ===", config.id);
    let started = Instant::now();

    let adapter = match with_timeout(
        timeouts.operation,
        "connect",
        establisher.establish(config, timeouts),
    )
    .await
    {
        Ok(adapter) => adapter,
        Err(e) => {
            tracing::warn!(backend = %config.id, "❌ connection failed: {}", e);
            return vec![VerificationResult::failed(
                config.id.clone(),
                Step::Connect,
                None,
                &e,
                started.elapsed(),
            )];
        }
    };
    tracing::info!(backend = %config.id, "✓ connected");

    let runner = VerificationRunner::new(config.id.clone(), config.key_prefix(), *timeouts);
    let outcome = AssertUnwindSafe(runner.run(adapter.as_ref()))
        .catch_unwind()
        .await;
    adapter.close().await;
    tracing::debug!(backend = %config.id, "session closed");

    match outcome {
        Ok(results) => results,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::memory::{Faults, MemoryEstablisher, MemoryStore};
    use std::time::Duration;
    use crate::types::BackendKind;

    fn backend(kind: BackendKind, ordinal: usize, host: &str) -> BackendConfig {
        let yaml = format!("host: {}\nport: 1\ndatabase: devops\n", host);
        let entry: crate::config::BackendEntry = serde_yaml::from_str(&yaml).unwrap();
        entry.resolve(kind, ordinal).unwrap()
    }

    #[tokio::test]
    async fn test_unreachable_instance_is_single_connect_failure() {
        let establisher = MemoryEstablisher::new();
        let results = verify_instance(
            &establisher,
            &backend(BackendKind::TiKV, 1, "nowhere"),
            &TimeoutConfig::default(),
        )
        .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].step, Step::Connect);
        assert_eq!(results[0].failure, Some(FailureKind::Connect));
    }

    #[tokio::test]
    async fn test_auth_rejection_is_reported_as_auth() {
        let establisher = MemoryEstablisher::new()
            .with_host("locked", MemoryStore::new())
            .reject_auth("locked");
        let results = verify_instance(
            &establisher,
            &backend(BackendKind::TiDB, 1, "locked"),
            &TimeoutConfig::default(),
        )
        .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].failure, Some(FailureKind::Auth));
    }

    #[tokio::test]
    async fn test_session_closed_after_run() {
        let store = MemoryStore::new();
        let establisher = MemoryEstablisher::new().with_host("kv-0", store.clone());
        let results = verify_instance(
            &establisher,
            &backend(BackendKind::TiKV, 1, "kv-0"),
            &TimeoutConfig::default(),
        )
        .await;

        assert!(results.iter().all(|r| !r.is_failure()));
        assert_eq!(store.sessions_opened(), 1);
        assert_eq!(store.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn test_report_follows_config_order() {
        let establisher = Arc::new(
            MemoryEstablisher::new()
                .with_host("a", MemoryStore::new())
                .with_host("b", MemoryStore::new()),
        );
        let coordinator = Coordinator::new(establisher, &Settings::default());
        let backends = vec![
            backend(BackendKind::ClickHouse, 1, "a"),
            backend(BackendKind::TiKV, 1, "missing"),
            backend(BackendKind::Elasticsearch, 1, "b"),
        ];

        let report = coordinator.run(&backends).await;
        let kinds: Vec<_> = report.backends.iter().map(|b| b.backend.kind).collect();
        assert_eq!(
            kinds,
            vec![BackendKind::ClickHouse, BackendKind::TiKV, BackendKind::Elasticsearch]
        );
        assert_eq!(report.backends[1].results.len(), 1);
        assert_eq!(report.backends[0].failed(), 0);
        assert_eq!(report.backends[2].failed(), 0);
        assert!(report.has_failures());
    }

    #[test]
    fn test_instances_grouped_by_storage_target() {
        let backends = vec![
            backend(BackendKind::TiDB, 1, "tidb-0"),
            backend(BackendKind::TiKV, 1, "pd-0"),
            backend(BackendKind::TiDB, 2, "tidb-1"),
        ];
        let groups = group_by_target(&backends);
        let orders: Vec<Vec<usize>> = groups
            .iter()
            .map(|group| group.iter().map(|(order, _)| *order).collect())
            .collect();
        assert_eq!(orders, vec![vec![0, 2], vec![1]]);
    }

    #[tokio::test]
    async fn test_hosts_of_one_cluster_do_not_interfere() {
        let store = MemoryStore::with_faults(Faults {
            stall: Some(Duration::from_millis(1)),
            ..Default::default()
        });
        let establisher = Arc::new(
            MemoryEstablisher::new()
                .with_host("tidb-0", store.clone())
                .with_host("tidb-1", store.clone()),
        );
        let coordinator = Coordinator::new(establisher, &Settings::default());
        let backends = vec![
            backend(BackendKind::TiDB, 1, "tidb-0"),
            backend(BackendKind::TiDB, 2, "tidb-1"),
        ];

        let report = coordinator.run(&backends).await;
        let failures: Vec<_> = report.failures().collect();
        assert!(failures.is_empty(), "{failures:#?}");
        assert_eq!(report.backends.len(), 2);
        assert_eq!(store.sessions_closed(), 2);
        assert_eq!(store.snapshot("test").len(), 1);
    }

    #[tokio::test]
    async fn test_session_closed_when_runner_panics() {
        let store = MemoryStore::with_faults(Faults {
            panic_on_scan: true,
            ..Default::default()
        });
        let establisher = Arc::new(MemoryEstablisher::new().with_host("kv-0", store.clone()));
        let coordinator = Coordinator::new(establisher, &Settings::default());
        let backends = vec![
            backend(BackendKind::TiKV, 1, "kv-0"),
            backend(BackendKind::TiKV, 2, "missing"),
        ];

        let report = coordinator.run(&backends).await;
        assert_eq!(report.backends.len(), 2);
        assert_eq!(report.backends[0].results.len(), 1);
        assert_eq!(report.backends[0].results[0].failure, Some(FailureKind::Aborted));
        // the sibling sharing the target still ran
        assert_eq!(report.backends[1].results[0].failure, Some(FailureKind::Connect));
        assert_eq!(store.sessions_opened(), 1);
        assert_eq!(store.sessions_closed(), 1);
    }
}
