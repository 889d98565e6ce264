//! End-to-end tests for a verification run over in-memory backends.

use async_trait::async_trait;
use std::sync::Arc;

use storecheck_core::memory::{Faults, MemoryEstablisher, MemoryStore};
use storecheck_core::{
    Adapter, BackendConfig, BackendKind, CheckConfig, Coordinator, Establish, FailureKind,
    Outcome, Step, TimeoutConfig, VerificationReport,
};

const CONFIG: &str = r#"
clickhouse:
  - host: ch-0
    port: 8123
    database: devops
tidb:
  - host: tidb-0
    port: 4000
    database: devops
tikv:
  - host: pd-0
    port: 2379
    prefix: devops
  - host: pd-unreachable
    port: 2379
es:
  - host: es-0
    port: 9200
settings:
  max_concurrent: 2
"#;

fn establisher() -> (MemoryEstablisher, Vec<MemoryStore>) {
    let stores: Vec<MemoryStore> = (0..4).map(|_| MemoryStore::new()).collect();
    let establisher = MemoryEstablisher::new()
        .with_host("ch-0", stores[0].clone())
        .with_host("tidb-0", stores[1].clone())
        .with_host("pd-0", stores[2].clone())
        .with_host("es-0", stores[3].clone());
    (establisher, stores)
}

async fn run(config: &CheckConfig, establisher: MemoryEstablisher) -> VerificationReport {
    Coordinator::new(Arc::new(establisher), &config.settings)
        .run_config(config)
        .await
}

#[tokio::test]
async fn test_full_run_over_all_families() {
    let config = CheckConfig::from_yaml_str(CONFIG).unwrap();
    let (establisher, stores) = establisher();
    let report = run(&config, establisher).await;

    let ids: Vec<String> = report.backends.iter().map(|b| b.backend.to_string()).collect();
    assert_eq!(
        ids,
        vec![
            "clickhouse#1 (ch-0:8123)",
            "tidb#1 (tidb-0:4000)",
            "tikv#1 (pd-0:2379)",
            "tikv#2 (pd-unreachable:2379)",
            "elasticsearch#1 (es-0:9200)",
        ]
    );

    // the unreachable instance contributes one connect failure and nothing else
    let unreachable = &report.backends[3];
    assert_eq!(unreachable.results.len(), 1);
    assert_eq!(unreachable.results[0].step, Step::Connect);
    assert_eq!(unreachable.results[0].failure, Some(FailureKind::Connect));

    for (i, backend) in report.backends.iter().enumerate() {
        if i == 3 {
            continue;
        }
        assert_eq!(backend.failed(), 0, "{:#?}", backend.results);
        let steps: Vec<Step> = backend.results.iter().map(|r| r.step).collect();
        let mut distinct = steps.clone();
        distinct.dedup();
        assert_eq!(distinct, Step::PROTOCOL.to_vec());
    }

    // only the retained record is left behind
    let tikv = stores[2].snapshot("devops");
    assert_eq!(tikv.keys().collect::<Vec<_>>(), vec!["devops:test_key_3"]);
    let es = stores[3].snapshot("test-1");
    assert_eq!(es.keys().collect::<Vec<_>>(), vec!["devops:test_key_3"]);
    let tidb = stores[1].snapshot("test");
    assert_eq!(tidb.len(), 1);

    for store in &stores {
        assert_eq!(store.sessions_opened(), store.sessions_closed());
    }

    assert!(report.has_failures());
    assert_eq!(report.failures().count(), 1);
}

#[tokio::test]
async fn test_namespace_failure_closes_session() {
    let config = CheckConfig::from_yaml_str(
        "tikv:\n  - host: pd-0\n    port: 2379\n",
    )
    .unwrap();
    let store = MemoryStore::with_faults(Faults {
        fail_namespace: true,
        ..Default::default()
    });
    let report = run(&config, MemoryEstablisher::new().with_host("pd-0", store.clone())).await;

    let results = &report.backends[0].results;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].step, Step::NamespaceSetup);
    assert_eq!(results[0].failure, Some(FailureKind::Namespace));
    assert_eq!(store.sessions_closed(), 1);
}

#[tokio::test]
async fn test_second_run_over_same_store_passes() {
    let config = CheckConfig::from_yaml_str(
        "tikv:\n  - host: pd-0\n    port: 2379\n    prefix: team\n",
    )
    .unwrap();
    let store = MemoryStore::new();
    // leftover from an earlier run outside the scan range
    store.insert_raw("team", "team:unrelated", "x");

    for _ in 0..2 {
        let report = run(&config, MemoryEstablisher::new().with_host("pd-0", store.clone())).await;
        assert!(!report.has_failures(), "{}", report);
    }

    let data = store.snapshot("team");
    assert_eq!(data.len(), 2);
    assert_eq!(
        data.get("team:test_key_3").map(String::as_str),
        Some("Initial value for test key 3")
    );
    assert_eq!(store.namespace_creations(), 0);
}

#[tokio::test]
async fn test_report_round_trips_through_json() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("out").join("report.json");

    let config = CheckConfig::from_yaml_str(CONFIG).unwrap();
    let (establisher, _stores) = establisher();
    let report = run(&config, establisher).await;
    report.write_json(&path).await.unwrap();

    let loaded = VerificationReport::read_json(&path).await.unwrap();
    assert_eq!(loaded.run_id, report.run_id);
    assert_eq!(loaded.results().count(), report.results().count());
    assert!(loaded
        .failures()
        .all(|r| r.outcome == Outcome::Failed && r.failure.is_some()));
}

struct PanickingEstablisher;

#[async_trait]
impl Establish for PanickingEstablisher {
    async fn establish(
        &self,
        config: &BackendConfig,
        _timeouts: &TimeoutConfig,
    ) -> storecheck_core::Result<Box<dyn Adapter>> {
        panic!("driver crashed while connecting to {}", config.endpoint());
    }
}

#[tokio::test]
async fn test_panicking_instance_is_reported_as_aborted() {
    let config = CheckConfig::from_yaml_str(
        "tikv:\n  - host: pd-0\n    port: 2379\n  - host: pd-1\n    port: 2379\n",
    )
    .unwrap();
    let report = Coordinator::new(Arc::new(PanickingEstablisher), &config.settings)
        .run_config(&config)
        .await;

    assert_eq!(report.backends.len(), 2);
    for backend in &report.backends {
        assert_eq!(backend.results.len(), 1);
        assert_eq!(backend.results[0].failure, Some(FailureKind::Aborted));
        assert_eq!(backend.backend.kind, BackendKind::TiKV);
    }
}
