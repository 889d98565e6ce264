//! Verification runner: the fixed CRUD protocol.
//!
//! One runner drives one backend instance through
//! `NamespaceSetup → SeedInsert → ReadBack → Update → RangeScan → Delete →
//! Cleanup → FinalCheck`. A namespace failure ends the run; every other
//! failure is recorded and the next step runs. Nothing is retried.

use chrono::Utc;
use std::collections::BTreeMap;
use tokio::time::Instant;

use crate::adapter::Adapter;
use crate::error::{CheckError, Result};
use crate::report::VerificationResult;
use crate::timeout::{with_timeout, OperationTimeout, TimeoutConfig};
use crate::types::{BackendId, KeyPrefix, KeyValueRecord, Step};

/// Suffix appended to the seed key base to form the exclusive scan bound.
///
/// The range `[base, base + "z")` excludes keys sorting at or above
/// `base + "z"`; seed keys stay below it.
pub const PREFIX_SCAN_UPPER_BOUND_SUFFIX: &str = "z";

/// Maximum pairs requested by the range scan.
pub const SCAN_LIMIT: usize = 100;

/// Base of every seeded logical key.
pub const SEED_KEY_BASE: &str = "test_key";

/// Which records the protocol writes and which of them each step targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedPlan {
    /// `(logical key, initial value)` in insertion order
    pub records: Vec<(String, String)>,
    /// Record overwritten by the Update step
    pub update_target: String,
    /// Record removed by the Delete step
    pub delete_target: String,
    /// Record kept by Cleanup and read by FinalCheck
    pub retained: String,
}

impl Default for SeedPlan {
    fn default() -> Self {
        let records = (1..=3)
            .map(|n| {
                (
                    format!("{}_{}", SEED_KEY_BASE, n),
                    format!("Initial value for test key {}", n),
                )
            })
            .collect();
        Self {
            records,
            update_target: format!("{}_1", SEED_KEY_BASE),
            delete_target: format!("{}_2", SEED_KEY_BASE),
            retained: format!("{}_3", SEED_KEY_BASE),
        }
    }
}

impl SeedPlan {
    /// Common logical prefix of all seed keys, e.g. `test_key_`.
    pub fn scan_base(&self) -> String {
        format!("{}_", SEED_KEY_BASE)
    }
}

/// Records the run believes are currently stored, keyed by logical key.
#[derive(Debug, Default)]
struct RunState {
    present: BTreeMap<String, KeyValueRecord>,
}

/// Drives the protocol against one adapter session.
#[derive(Clone, Debug)]
pub struct VerificationRunner {
    backend: BackendId,
    prefix: KeyPrefix,
    plan: SeedPlan,
    timeouts: TimeoutConfig,
}

impl VerificationRunner {
    /// Creates a runner with the default seed plan.
    pub fn new(backend: BackendId, prefix: KeyPrefix, timeouts: TimeoutConfig) -> Self {
        Self {
            backend,
            prefix,
            plan: SeedPlan::default(),
            timeouts,
        }
    }

    /// Runs every protocol step and returns their results in order.
    pub async fn run(&self, adapter: &dyn Adapter) -> Vec<VerificationResult> {
        let mut results = Vec::new();
        let mut state = RunState::default();

        tracing::info!(
            backend = %self.backend,
            family = adapter.kind().family(),
            prefix = %self.prefix,
            "starting verification"
        );

        if !self.namespace_setup(adapter, &mut results).await {
            tracing::warn!(backend = %self.backend, "namespace setup failed, skipping remaining steps");
            return results;
        }
        self.seed_insert(adapter, &mut state, &mut results).await;
        self.read_back(adapter, &state, &mut results).await;
        self.update(adapter, &mut state, &mut results).await;
        self.range_scan(adapter, &state, &mut results).await;
        self.delete(adapter, &mut state, &mut results).await;
        self.cleanup(adapter, &mut state, &mut results).await;
        self.final_check(adapter, &state, &mut results).await;

        let failed = results.iter().filter(|r| r.is_failure()).count();
        tracing::info!(
            backend = %self.backend,
            steps = results.len(),
            failed,
            "verification completed"
        );
        results
    }

    fn record(
        &self,
        results: &mut Vec<VerificationResult>,
        step: Step,
        subject: Option<&str>,
        started: Instant,
        outcome: Result<String>,
    ) {
        let elapsed = started.elapsed();
        let subject = subject.map(str::to_string);
        let result = match outcome {
            Ok(message) => {
                tracing::info!(backend = %self.backend, %step, subject = subject.as_deref(), "✓ {}", message);
                VerificationResult::passed(self.backend.clone(), step, subject, message, elapsed)
            }
            Err(err) => {
                tracing::warn!(backend = %self.backend, %step, subject = subject.as_deref(), "❌ {}", err);
                VerificationResult::failed(self.backend.clone(), step, subject, &err, elapsed)
            }
        };
        results.push(result);
    }

    fn operation_bound(&self) -> OperationTimeout {
        self.timeouts.operation
    }

    async fn get(&self, adapter: &dyn Adapter, raw_key: &str) -> Result<Option<String>> {
        with_timeout(self.operation_bound(), "get", adapter.get(raw_key)).await
    }

    async fn put(&self, adapter: &dyn Adapter, raw_key: &str, value: &str) -> Result<()> {
        with_timeout(self.operation_bound(), "put", adapter.put(raw_key, value)).await
    }

    async fn remove(&self, adapter: &dyn Adapter, raw_key: &str) -> Result<()> {
        with_timeout(self.operation_bound(), "delete", adapter.delete(raw_key)).await
    }

    /// Reads `key` and checks it holds `expected`.
    async fn expect_value(&self, adapter: &dyn Adapter, key: &str, expected: &str) -> Result<String> {
        match self.get(adapter, &self.prefix.apply(key)).await? {
            Some(value) if value == expected => Ok(value),
            Some(value) => Err(CheckError::VerificationMismatch(format!(
                "{} holds {:?}, expected {:?}",
                key, value, expected
            ))),
            None => Err(CheckError::VerificationMismatch(format!("{} not found", key))),
        }
    }

    /// Reads `key` and checks it is absent.
    async fn expect_absent(&self, adapter: &dyn Adapter, key: &str) -> Result<()> {
        match self.get(adapter, &self.prefix.apply(key)).await? {
            None => Ok(()),
            Some(value) => Err(CheckError::VerificationMismatch(format!(
                "{} still exists with value {:?}",
                key, value
            ))),
        }
    }

    async fn namespace_setup(&self, adapter: &dyn Adapter, results: &mut Vec<VerificationResult>) -> bool {
        let started = Instant::now();
        let outcome = with_timeout(
            self.operation_bound(),
            "ensure_namespace",
            adapter.ensure_namespace(),
        )
        .await
        .map(|()| "namespace ready".to_string());
        let ok = outcome.is_ok();
        self.record(results, Step::NamespaceSetup, None, started, outcome);
        ok
    }

    async fn seed_insert(
        &self,
        adapter: &dyn Adapter,
        state: &mut RunState,
        results: &mut Vec<VerificationResult>,
    ) {
        for (key, value) in &self.plan.records {
            let started = Instant::now();
            let outcome = self.put(adapter, &self.prefix.apply(key), value).await;
            if outcome.is_ok() {
                state
                    .present
                    .insert(key.clone(), KeyValueRecord::new(key.clone(), value.clone()));
            }
            let outcome = outcome.map(|()| format!("inserted with value: {}", value));
            self.record(results, Step::SeedInsert, Some(key), started, outcome);
        }
    }

    async fn read_back(
        &self,
        adapter: &dyn Adapter,
        state: &RunState,
        results: &mut Vec<VerificationResult>,
    ) {
        for record in self.seeded_in_order(state) {
            let started = Instant::now();
            let outcome = self
                .expect_value(adapter, &record.key, &record.value)
                .await
                .map(|value| format!("retrieved: {}", value));
            self.record(results, Step::ReadBack, Some(&record.key), started, outcome);
        }
    }

    async fn update(
        &self,
        adapter: &dyn Adapter,
        state: &mut RunState,
        results: &mut Vec<VerificationResult>,
    ) {
        let started = Instant::now();
        let key = self.plan.update_target.clone();

        let outcome = if state.present.contains_key(&key) {
            let new_value = format!(
                "Updated value for {} - modified at {}",
                key.replace('_', " "),
                Utc::now().to_rfc3339()
            );
            match self.put(adapter, &self.prefix.apply(&key), &new_value).await {
                Ok(()) => {
                    if let Some(record) = state.present.get_mut(&key) {
                        record.value = new_value.clone();
                    }
                    self.expect_value(adapter, &key, &new_value)
                        .await
                        .map(|value| format!("updated to: {}", value))
                }
                Err(err) => Err(err),
            }
        } else {
            Err(CheckError::Write(format!("{} was not seeded, nothing to update", key)))
        };
        self.record(results, Step::Update, Some(&key), started, outcome);
    }

    async fn range_scan(
        &self,
        adapter: &dyn Adapter,
        state: &RunState,
        results: &mut Vec<VerificationResult>,
    ) {
        let started = Instant::now();
        let start = self.prefix.apply(&self.plan.scan_base());
        let end = format!("{}{}", start, PREFIX_SCAN_UPPER_BOUND_SUFFIX);

        let outcome = match with_timeout(
            self.operation_bound(),
            "scan",
            adapter.scan(&start, &end, SCAN_LIMIT),
        )
        .await
        {
            Ok(pairs) => self.check_scan(&start, &pairs, state),
            Err(err) => Err(err),
        };
        self.record(results, Step::RangeScan, None, started, outcome);
    }

    fn check_scan(&self, start: &str, pairs: &[(String, String)], state: &RunState) -> Result<String> {
        let found: BTreeMap<&str, &str> = pairs
            .iter()
            .map(|(k, v)| (self.prefix.strip(k), v.as_str()))
            .collect();

        for (key, value) in pairs {
            tracing::debug!(backend = %self.backend, "  - {}: {}", self.prefix.strip(key), value);
        }

        let stray: Vec<&str> = pairs
            .iter()
            .filter(|(k, _)| !k.starts_with(start))
            .map(|(k, _)| k.as_str())
            .collect();
        if !stray.is_empty() {
            return Err(CheckError::VerificationMismatch(format!(
                "scan returned keys outside {}: {}",
                start,
                stray.join(", ")
            )));
        }

        let mut problems = Vec::new();
        for record in state.present.values() {
            match found.get(record.key.as_str()) {
                Some(value) if *value == record.value => {}
                Some(value) => problems.push(format!("{} holds {:?}", record.key, value)),
                None => problems.push(format!("{} missing", record.key)),
            }
        }
        if !problems.is_empty() {
            return Err(CheckError::VerificationMismatch(format!(
                "scan found {} keys in range but {}",
                pairs.len(),
                problems.join(", ")
            )));
        }

        Ok(format!("scan found {} keys in range", pairs.len()))
    }

    async fn delete(
        &self,
        adapter: &dyn Adapter,
        state: &mut RunState,
        results: &mut Vec<VerificationResult>,
    ) {
        let started = Instant::now();
        let key = self.plan.delete_target.clone();

        let outcome = if state.present.contains_key(&key) {
            self.delete_confirmed(adapter, &key, state)
                .await
                .map(|()| "deleted successfully".to_string())
        } else {
            Err(CheckError::Delete(format!("{} was not seeded, nothing to delete", key)))
        };
        self.record(results, Step::Delete, Some(&key), started, outcome);
    }

    /// Deletes `key`, confirms absence, and forgets it on success.
    async fn delete_confirmed(&self, adapter: &dyn Adapter, key: &str, state: &mut RunState) -> Result<()> {
        self.remove(adapter, &self.prefix.apply(key)).await?;
        self.expect_absent(adapter, key).await?;
        state.present.remove(key);
        Ok(())
    }

    async fn cleanup(
        &self,
        adapter: &dyn Adapter,
        state: &mut RunState,
        results: &mut Vec<VerificationResult>,
    ) {
        let targets: Vec<String> = self
            .seeded_in_order(state)
            .into_iter()
            .filter(|record| record.key != self.plan.retained)
            .map(|record| record.key)
            .collect();

        if targets.is_empty() {
            self.record(
                results,
                Step::Cleanup,
                None,
                Instant::now(),
                Ok("no records to clean up".to_string()),
            );
            return;
        }

        for key in targets {
            let started = Instant::now();
            let outcome = self
                .delete_confirmed(adapter, &key, state)
                .await
                .map(|()| "cleaned up".to_string());
            self.record(results, Step::Cleanup, Some(&key), started, outcome);
        }
    }

    async fn final_check(
        &self,
        adapter: &dyn Adapter,
        state: &RunState,
        results: &mut Vec<VerificationResult>,
    ) {
        let started = Instant::now();
        let key = self.plan.retained.clone();

        let outcome = match state.present.get(&key) {
            Some(record) => self
                .expect_value(adapter, &key, &record.value)
                .await
                .map(|value| format!("{} still exists with value {}", key, value)),
            None => Err(CheckError::VerificationMismatch(format!(
                "retained record {} was not seeded",
                key
            ))),
        };
        self.record(results, Step::FinalCheck, Some(&key), started, outcome);
    }

    /// Present records in seed-plan order.
    fn seeded_in_order(&self, state: &RunState) -> Vec<KeyValueRecord> {
        self.plan
            .records
            .iter()
            .filter_map(|(key, _)| state.present.get(key).cloned())
            .collect()
    }
}
