//! Restarting the engine against the same SQLite file

use std::path::Path;
use std::sync::Arc;

use winsentry::config::{Config, StorageConfig};
use winsentry::model::{AlertCondition, AlertRuleSpec, ScriptBindings, Status};
use winsentry::storage::HistoryQuery;
use winsentry::{Engine, EngineBuilder};

use crate::helpers::*;

fn sqlite_config(path: &Path) -> Config {
    Config {
        storage: StorageConfig::Sqlite {
            path: path.to_path_buf(),
            retention_days: 30,
        },
        ..Default::default()
    }
}

fn sqlite_engine(config: Config, probe: &Arc<FakeProbe>) -> EngineBuilder {
    let (sink, _sent) = RecordingSink::new();
    Engine::builder(config)
        .probes(probe.probe_set())
        .sink(sink)
        .interpreter(broken_interpreter())
}

#[tokio::test]
async fn test_restart_restores_targets_status_and_rules() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("winsentry.db");

    let probe = FakeProbe::new();
    let engine = sqlite_engine(sqlite_config(&db), &probe)
        .start()
        .await
        .unwrap();

    let target = engine.create_target(port_spec(8080, 3600)).await.unwrap();
    wait_for_first_check(&engine, target.id).await;
    let recipient = engine
        .add_recipient("ops".to_string(), "ops@example.com".to_string(), true)
        .await
        .unwrap();
    let rule = engine
        .create_rule(AlertRuleSpec {
            name: "down".to_string(),
            monitored_item_id: target.id,
            condition: AlertCondition::StatusChange {
                from_status: None,
                to_status: Some(Status::Stopped),
            },
            recipient_ids: vec![recipient.id],
            enabled: true,
            cooldown_secs: Some(600),
            subject_template: None,
            body_template: None,
        })
        .await
        .unwrap();

    probe.sequence(target.id, [Status::Stopped; 3]);
    for _ in 0..3 {
        engine.check_now(target.id).await.unwrap();
    }
    engine.shutdown().await;

    let probe = FakeProbe::new();
    probe.always(target.id, Status::Stopped);
    let engine = sqlite_engine(sqlite_config(&db), &probe)
        .start()
        .await
        .unwrap();

    let targets = engine.list_targets().await;
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].id, target.id);
    assert_eq!(targets[0].name.as_deref(), Some("port-8080"));

    let status = engine.get_status(target.id).await.unwrap();
    assert_eq!(status.snapshot.record.last_known_status, Status::Stopped);
    assert!(status.snapshot.record.consecutive_count >= 3);

    let record = engine.check_now(target.id).await.unwrap();
    assert!(record.consecutive_count >= 4);

    let rules = engine.list_rules().await;
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].id, rule.id);
    assert_eq!(rules[0].recipient_ids, [recipient.id]);
    assert_eq!(engine.list_recipients().await.unwrap(), [recipient]);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_execution_budget_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("winsentry.db");

    let probe = FakeProbe::new();
    let engine = sqlite_engine(sqlite_config(&db), &probe)
        .start()
        .await
        .unwrap();

    let mut spec = port_spec(8080, 3600);
    spec.scripts = ScriptBindings {
        stopped: Some(inline_script("exit 0", 1, 1)),
        ..Default::default()
    };
    let target = engine.create_target(spec).await.unwrap();
    wait_for_first_check(&engine, target.id).await;

    probe.always(target.id, Status::Stopped);
    engine.check_now(target.id).await.unwrap();
    wait_for_status(&engine, target.id, |s| {
        s.snapshot.counters.stopped.executions_used == 1
    })
    .await;
    engine.shutdown().await;

    let probe = FakeProbe::new();
    probe.always(target.id, Status::Stopped);
    let engine = sqlite_engine(sqlite_config(&db), &probe)
        .start()
        .await
        .unwrap();

    let status = engine.get_status(target.id).await.unwrap();
    assert_eq!(status.snapshot.counters.stopped.executions_used, 1);

    for _ in 0..3 {
        engine.check_now(target.id).await.unwrap();
    }
    let logs = engine
        .execution_history(&HistoryQuery::for_target(target.id))
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_configured_targets_only_seed_an_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("winsentry.db");

    let mut config = sqlite_config(&db);
    config.targets = vec![port_spec(8080, 3600)];

    let probe = FakeProbe::new();
    let engine = sqlite_engine(config.clone(), &probe).start().await.unwrap();
    assert_eq!(engine.list_targets().await.len(), 1);
    engine.create_target(port_spec(9090, 3600)).await.unwrap();
    engine.shutdown().await;

    let engine = sqlite_engine(config, &probe).start().await.unwrap();
    let mut ports: Vec<String> = engine
        .list_targets()
        .await
        .iter()
        .map(|t| t.identity.parameter())
        .collect();
    ports.sort();
    assert_eq!(ports, ["8080", "9090"]);

    engine.shutdown().await;
}
