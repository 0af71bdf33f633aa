//! Recovery scripts end to end through `sh`

use std::sync::Arc;
use std::time::{Duration, Instant};

use winsentry::model::{
    ExecutionOutcome, ScriptBindings, Status, TIMEOUT_EXIT_CODE, TargetSpec, TriggerOn,
};
use winsentry::storage::MemoryGateway;

use crate::helpers::*;

fn with_stopped_script(mut spec: TargetSpec, content: &str, threshold: u32, max: u32) -> TargetSpec {
    spec.scripts = ScriptBindings {
        trigger_on_status: TriggerOn::Stopped,
        stopped: Some(inline_script(content, threshold, max)),
        running: None,
    };
    spec
}

#[tokio::test]
async fn test_script_fires_once_when_duration_threshold_is_reached() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let script = format!("echo \"$1\" >> '{}'", marker.display());

    let probe = FakeProbe::new();
    let (builder, _sent) = engine_builder(test_config(), &probe, Arc::new(MemoryGateway::new()));
    let engine = builder.start().await.unwrap();

    let spec = with_stopped_script(port_spec(8080, 3600), &script, 3, 5);
    let target = engine.create_target(spec).await.unwrap();
    wait_for_first_check(&engine, target.id).await;

    probe.sequence(target.id, [Status::Stopped; 5]);
    for expected in 1..=3 {
        let record = engine.check_now(target.id).await.unwrap();
        assert_eq!(record.consecutive_count, expected);
    }

    let logs = wait_for_executions(&engine, target.id, 1).await;
    assert_eq!(logs[0].outcome, ExecutionOutcome::Success);
    assert_eq!(logs[0].exit_code, 0);
    assert_eq!(logs[0].triggering_status, Status::Stopped);

    engine.check_now(target.id).await.unwrap();
    engine.check_now(target.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let logs = wait_for_executions(&engine, target.id, 1).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(std::fs::read_to_string(&marker).unwrap(), "8080\n");

    let status = engine.get_status(target.id).await.unwrap();
    assert_eq!(status.snapshot.counters.stopped.executions_used, 1);
    assert_eq!(status.snapshot.counters.stopped.retry_count, 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_max_executions_holds_until_the_status_flips() {
    let probe = FakeProbe::new();
    let (builder, _sent) = engine_builder(test_config(), &probe, Arc::new(MemoryGateway::new()));
    let engine = builder.start().await.unwrap();

    let spec = with_stopped_script(port_spec(8080, 3600), "exit 3", 1, 1);
    let target = engine.create_target(spec).await.unwrap();
    wait_for_first_check(&engine, target.id).await;

    probe.sequence(
        target.id,
        [
            Status::Stopped,
            Status::Stopped,
            Status::Stopped,
            Status::Running,
            Status::Stopped,
        ],
    );

    engine.check_now(target.id).await.unwrap();
    let logs = wait_for_executions(&engine, target.id, 1).await;
    assert_eq!(logs[0].outcome, ExecutionOutcome::Failed);
    assert_eq!(logs[0].exit_code, 3);
    wait_for_status(&engine, target.id, |s| {
        s.snapshot.counters.stopped.executions_used == 1
    })
    .await;

    engine.check_now(target.id).await.unwrap();
    engine.check_now(target.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(wait_for_executions(&engine, target.id, 1).await.len(), 1);

    let record = engine.check_now(target.id).await.unwrap();
    assert_eq!(record.last_known_status, Status::Running);
    let status = engine.get_status(target.id).await.unwrap();
    assert_eq!(status.snapshot.counters.stopped.executions_used, 0);

    let record = engine.check_now(target.id).await.unwrap();
    assert_eq!(record.consecutive_count, 1);
    assert_eq!(wait_for_executions(&engine, target.id, 2).await.len(), 2);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_trigger_during_running_job_fires_when_it_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("recovered");

    let probe = FakeProbe::new();
    let (builder, _sent) = engine_builder(test_config(), &probe, Arc::new(MemoryGateway::new()));
    let engine = builder.start().await.unwrap();

    let mut spec = port_spec(8080, 3600);
    spec.scripts = ScriptBindings {
        trigger_on_status: TriggerOn::Both,
        stopped: Some(inline_script("sleep 1", 1, 5)),
        running: Some(inline_script(
            &format!("echo running >> '{}'", marker.display()),
            1,
            5,
        )),
    };
    let target = engine.create_target(spec).await.unwrap();
    wait_for_first_check(&engine, target.id).await;

    probe.sequence(
        target.id,
        [Status::Stopped, Status::Running, Status::Running, Status::Running],
    );
    engine.check_now(target.id).await.unwrap();
    let record = engine.check_now(target.id).await.unwrap();
    assert_eq!(record.last_known_status, Status::Running);
    engine.check_now(target.id).await.unwrap();

    let logs = wait_for_executions(&engine, target.id, 2).await;
    let statuses: Vec<Status> = logs.iter().map(|log| log.triggering_status).collect();
    assert!(statuses.contains(&Status::Stopped));
    assert!(statuses.contains(&Status::Running));
    assert_eq!(std::fs::read_to_string(&marker).unwrap(), "running\n");

    wait_for_status(&engine, target.id, |s| {
        s.snapshot.counters.running.executions_used == 1
    })
    .await;

    engine.check_now(target.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(wait_for_executions(&engine, target.id, 2).await.len(), 2);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_global_worker_cap_serializes_scripts() {
    let dir = tempfile::tempdir().unwrap();
    let journal = dir.path().join("journal");
    let script = format!(
        "echo start >> '{0}'; sleep 0.3; echo end >> '{0}'",
        journal.display()
    );

    let mut config = test_config();
    config.executor.max_workers = 1;

    let probe = FakeProbe::new();
    let (builder, _sent) = engine_builder(config, &probe, Arc::new(MemoryGateway::new()));
    let engine = builder.start().await.unwrap();

    let first = engine
        .create_target(with_stopped_script(port_spec(8080, 3600), &script, 1, 5))
        .await
        .unwrap();
    let second = engine
        .create_target(with_stopped_script(port_spec(9090, 3600), &script, 1, 5))
        .await
        .unwrap();
    wait_for_first_check(&engine, first.id).await;
    wait_for_first_check(&engine, second.id).await;

    probe.always(first.id, Status::Stopped);
    probe.always(second.id, Status::Stopped);
    engine.check_now(first.id).await.unwrap();
    engine.check_now(second.id).await.unwrap();

    wait_for_executions(&engine, first.id, 1).await;
    wait_for_executions(&engine, second.id, 1).await;

    let lines: Vec<String> = std::fs::read_to_string(&journal)
        .unwrap()
        .lines()
        .map(String::from)
        .collect();
    assert_eq!(lines, ["start", "end", "start", "end"]);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_script_timeout_is_recorded() {
    let mut config = test_config();
    config.executor.timeout_secs = 1;

    let probe = FakeProbe::new();
    let (builder, _sent) = engine_builder(config, &probe, Arc::new(MemoryGateway::new()));
    let engine = builder.start().await.unwrap();

    let target = engine
        .create_target(with_stopped_script(port_spec(8080, 3600), "sleep 30", 1, 5))
        .await
        .unwrap();
    wait_for_first_check(&engine, target.id).await;

    probe.always(target.id, Status::Stopped);
    engine.check_now(target.id).await.unwrap();

    let logs = wait_for_executions(&engine, target.id, 1).await;
    assert_eq!(logs[0].outcome, ExecutionOutcome::Timeout);
    assert_eq!(logs[0].exit_code, TIMEOUT_EXIT_CODE);
    assert!(logs[0].ended_at - logs[0].started_at < chrono::Duration::seconds(10));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_deleting_a_target_cancels_its_script() {
    let probe = FakeProbe::new();
    let (builder, _sent) = engine_builder(test_config(), &probe, Arc::new(MemoryGateway::new()));
    let engine = builder.start().await.unwrap();

    let target = engine
        .create_target(with_stopped_script(port_spec(8080, 3600), "sleep 30", 1, 5))
        .await
        .unwrap();
    wait_for_first_check(&engine, target.id).await;

    probe.always(target.id, Status::Stopped);
    engine.check_now(target.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    engine.delete_target(target.id).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    let logs = wait_for_executions(&engine, target.id, 1).await;
    assert_eq!(logs[0].outcome, ExecutionOutcome::Cancelled);

    engine.shutdown().await;
}
