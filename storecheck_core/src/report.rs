//! Verification results and the aggregated run report.
//!
//! Each protocol step yields one or more [`VerificationResult`]s. The
//! [`Reporter`] gathers them per backend instance and produces a
//! [`VerificationReport`], ordered by instance (configuration order) and then
//! by step. The report renders as a human summary through `Display` and
//! persists as JSON for machine consumption.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{CheckError, FailureKind, Result};
use crate::types::{BackendId, Step};

/// Pass or fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
}

/// Outcome of one step (or one record within a step) on one instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub backend: BackendId,
    pub step: Step,
    /// Logical key the result is about, if any
    pub subject: Option<String>,
    pub outcome: Outcome,
    /// Set when `outcome` is `Failed`
    pub failure: Option<FailureKind>,
    pub message: Option<String>,
    pub elapsed_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl VerificationResult {
    /// A passing result.
    pub fn passed(
        backend: BackendId,
        step: Step,
        subject: Option<String>,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            backend,
            step,
            subject,
            outcome: Outcome::Passed,
            failure: None,
            message: Some(message.into()),
            elapsed_ms: millis(elapsed),
            recorded_at: Utc::now(),
        }
    }

    /// A failing result carrying the error's kind and message.
    pub fn failed(
        backend: BackendId,
        step: Step,
        subject: Option<String>,
        error: &CheckError,
        elapsed: Duration,
    ) -> Self {
        Self {
            backend,
            step,
            subject,
            outcome: Outcome::Failed,
            failure: Some(error.kind()),
            message: Some(error.to_string()),
            elapsed_ms: millis(elapsed),
            recorded_at: Utc::now(),
        }
    }

    /// Instance-level failure for a run that ended abnormally.
    pub fn aborted(backend: BackendId, message: impl Into<String>) -> Self {
        Self {
            backend,
            step: Step::Connect,
            subject: None,
            outcome: Outcome::Failed,
            failure: Some(FailureKind::Aborted),
            message: Some(message.into()),
            elapsed_ms: 0,
            recorded_at: Utc::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.outcome == Outcome::Failed
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = match self.outcome {
            Outcome::Passed => "✓",
            Outcome::Failed => "❌",
        };
        write!(f, "{} {}", mark, self.step)?;
        if let Some(subject) = &self.subject {
            write!(f, " [{}]", subject)?;
        }
        if let Some(kind) = self.failure {
            write!(f, " ({})", kind)?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Results for one backend instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendReport {
    pub backend: BackendId,
    pub results: Vec<VerificationResult>,
}

impl BackendReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| !r.is_failure()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.is_failure()).count()
    }
}

/// Pass/fail counts for one instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InstanceSummary {
    pub backend: BackendId,
    pub passed: usize,
    pub failed: usize,
}

/// Aggregated outcome of a verification run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub backends: Vec<BackendReport>,
}

impl VerificationReport {
    /// All results, ordered by instance then by step.
    pub fn results(&self) -> impl Iterator<Item = &VerificationResult> {
        self.backends.iter().flat_map(|b| b.results.iter())
    }

    pub fn failures(&self) -> impl Iterator<Item = &VerificationResult> {
        self.results().filter(|r| r.is_failure())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn summary(&self) -> Vec<InstanceSummary> {
        self.backends
            .iter()
            .map(|b| InstanceSummary {
                backend: b.backend.clone(),
                passed: b.passed(),
                failed: b.failed(),
            })
            .collect()
    }

    /// Writes the report as pretty JSON, creating parent directories.
    pub async fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        tracing::info!(path = %path.display(), "report written");
        Ok(())
    }

    /// Reads a report written by [`VerificationReport::write_json`].
    pub async fn read_json(path: impl AsRef<Path>) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&contents)?)
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Verification run {}", self.run_id)?;
        for backend in &self.backends {
            writeln!(f)?;
            writeln!(f, "=== {} ({}) ===", backend.backend, backend.backend.kind.family())?;
            for result in &backend.results {
                writeln!(f, "  {}", result)?;
            }
        }

        writeln!(f)?;
        writeln!(f, "Summary:")?;
        for line in self.summary() {
            let status = if line.failed == 0 { "OK" } else { "FAILED" };
            writeln!(
                f,
                "  {:<40} {:>3} passed {:>3} failed  {}",
                line.backend.to_string(),
                line.passed,
                line.failed,
                status
            )?;
        }
        Ok(())
    }
}

/// Collects per-instance results while a run is in progress.
#[derive(Debug)]
pub struct Reporter {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    entries: Vec<(usize, BackendReport)>,
}

impl Reporter {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Records the results of the instance at position `order`.
    ///
    /// Instances may be recorded in any order.
    pub fn record(&mut self, order: usize, backend: BackendId, results: Vec<VerificationResult>) {
        self.entries.push((order, BackendReport { backend, results }));
    }

    /// Finalizes the report.
    pub fn finish(mut self) -> VerificationReport {
        self.entries.sort_by_key(|(order, _)| *order);
        let backends = self
            .entries
            .into_iter()
            .map(|(_, mut report)| {
                report.results.sort_by_key(|r| r.step);
                report
            })
            .collect();

        VerificationReport {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            backends,
        }
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BackendKind;
    use tempfile::TempDir;

    fn id(kind: BackendKind, ordinal: usize) -> BackendId {
        BackendId::new(kind, ordinal, format!("host-{}:1", ordinal))
    }

    fn pass(backend: &BackendId, step: Step) -> VerificationResult {
        VerificationResult::passed(backend.clone(), step, None, "ok", Duration::from_millis(3))
    }

    #[test]
    fn test_failed_result_carries_kind() {
        let err = CheckError::Read("boom".into());
        let result = VerificationResult::failed(
            id(BackendKind::TiDB, 1),
            Step::ReadBack,
            Some("test_key_1".into()),
            &err,
            Duration::ZERO,
        );
        assert!(result.is_failure());
        assert_eq!(result.failure, Some(FailureKind::Read));
        assert_eq!(result.message.as_deref(), Some("Read error: boom"));
    }

    #[test]
    fn test_reporter_orders_by_instance_then_step() {
        let a = id(BackendKind::ClickHouse, 1);
        let b = id(BackendKind::TiKV, 1);

        let mut reporter = Reporter::new();
        reporter.record(1, b.clone(), vec![pass(&b, Step::NamespaceSetup)]);
        reporter.record(
            0,
            a.clone(),
            vec![pass(&a, Step::ReadBack), pass(&a, Step::SeedInsert)],
        );
        let report = reporter.finish();

        let order: Vec<_> = report
            .results()
            .map(|r| (r.backend.kind, r.step))
            .collect();
        assert_eq!(
            order,
            vec![
                (BackendKind::ClickHouse, Step::SeedInsert),
                (BackendKind::ClickHouse, Step::ReadBack),
                (BackendKind::TiKV, Step::NamespaceSetup),
            ]
        );
        assert!(!report.has_failures());
    }

    #[test]
    fn test_summary_counts() {
        let a = id(BackendKind::Elasticsearch, 1);
        let mut reporter = Reporter::new();
        reporter.record(
            0,
            a.clone(),
            vec![
                pass(&a, Step::NamespaceSetup),
                VerificationResult::aborted(a.clone(), "task panicked"),
            ],
        );
        let report = reporter.finish();

        assert!(report.has_failures());
        assert_eq!(report.failures().count(), 1);
        let summary = report.summary();
        assert_eq!(summary[0].passed, 1);
        assert_eq!(summary[0].failed, 1);

        let text = report.to_string();
        assert!(text.contains("elasticsearch#1"));
        assert!(text.contains("FAILED"));
        assert!(text.contains("aborted"));
    }

    #[tokio::test]
    async fn test_write_json_creates_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("reports").join("run.json");

        let a = id(BackendKind::TiKV, 2);
        let mut reporter = Reporter::new();
        reporter.record(0, a.clone(), vec![pass(&a, Step::FinalCheck)]);
        let report = reporter.finish();

        report.write_json(&path).await.unwrap();
        let loaded = VerificationReport::read_json(&path).await.unwrap();
        assert_eq!(loaded, report);

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(raw.contains("\"final_check\""));
        assert!(raw.contains("\"passed\""));
    }
}
