//! Target loops: probe isolation, backoff and lifecycle under a paused clock

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use winsentry::EngineError;
use winsentry::model::{
    AlertCondition, AlertRuleSpec, ExecutionOutcome, LAUNCH_ERROR_EXIT_CODE, ScriptBindings,
    Status, TargetUpdate,
};
use winsentry::storage::{HistoryQuery, MemoryGateway, PersistenceGateway};

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_hung_probe_reports_unknown_without_blocking_others() {
    let probe = FakeProbe::new();
    let (builder, _sent) = engine_builder(test_config(), &probe, Arc::new(MemoryGateway::new()));
    let engine = builder.interpreter(broken_interpreter()).start().await.unwrap();

    let hung = engine.create_target(port_spec(8080, 5)).await.unwrap();
    let healthy = engine.create_target(port_spec(9090, 5)).await.unwrap();
    probe.set(hung.id, Behavior::Hang);
    probe.always(healthy.id, Status::Running);

    tokio::time::sleep(Duration::from_secs(31)).await;

    let hung_status = engine.get_status(hung.id).await.unwrap();
    assert_eq!(hung_status.snapshot.record.status, Status::Unknown);
    assert!(hung_status.snapshot.record.last_checked_at.is_some());
    assert!(probe.calls(hung.id) >= 2, "hung target was probed again");

    let healthy_status = engine.get_status(healthy.id).await.unwrap();
    assert_eq!(healthy_status.snapshot.record.status, Status::Running);
    assert!(healthy_status.snapshot.record.consecutive_count >= 5);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_panicking_probe_keeps_loop_alive() {
    let probe = FakeProbe::new();
    let (builder, _sent) = engine_builder(test_config(), &probe, Arc::new(MemoryGateway::new()));
    let engine = builder.interpreter(broken_interpreter()).start().await.unwrap();

    let faulty = engine.create_target(port_spec(8080, 5)).await.unwrap();
    let healthy = engine.create_target(port_spec(9090, 5)).await.unwrap();
    probe.set(faulty.id, Behavior::Panic);
    probe.always(healthy.id, Status::Stopped);

    tokio::time::sleep(Duration::from_secs(21)).await;

    assert!(probe.calls(faulty.id) >= 3);
    let faulty_status = engine.get_status(faulty.id).await.unwrap();
    assert_eq!(faulty_status.snapshot.record.status, Status::Unknown);
    assert!(faulty_status.monitoring);

    let healthy_status = engine.get_status(healthy.id).await.unwrap();
    assert_eq!(healthy_status.snapshot.record.last_known_status, Status::Stopped);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_observations_keep_the_count() {
    let probe = FakeProbe::new();
    let (builder, _sent) = engine_builder(test_config(), &probe, Arc::new(MemoryGateway::new()));
    let engine = builder.start().await.unwrap();

    let target = engine.create_target(port_spec(8080, 3600)).await.unwrap();
    wait_for_first_check(&engine, target.id).await;

    probe.sequence(
        target.id,
        [Status::Running, Status::Running, Status::Unknown, Status::Running],
    );
    let mut last = None;
    for _ in 0..4 {
        last = Some(engine.check_now(target.id).await.unwrap());
    }

    let record = last.unwrap();
    assert_eq!(record.status, Status::Running);
    assert_eq!(record.last_known_status, Status::Running);
    assert_eq!(record.consecutive_count, 3);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_recovery_backs_off_up_to_the_cap() {
    let mut config = test_config();
    config.scheduler.max_backoff_secs = 15;

    let probe = FakeProbe::new();
    let (builder, _sent) = engine_builder(config, &probe, Arc::new(MemoryGateway::new()));
    let engine = builder.interpreter(broken_interpreter()).start().await.unwrap();

    let mut script = inline_script("exit 0", 1, 5);
    script.retry_interval_multiplier = 2;
    let mut spec = port_spec(8080, 5);
    spec.scripts = ScriptBindings {
        stopped: Some(script),
        ..Default::default()
    };
    let target = engine.create_target(spec).await.unwrap();
    probe.always(target.id, Status::Stopped);

    let id = target.id;
    let engine_ref = &engine;
    let interval_after = move |retries: u32| async move {
        wait_for_status(engine_ref, id, |s| {
            s.snapshot.counters.stopped.retry_count == retries
        })
        .await;
        let status = engine_ref.get_status(id).await.unwrap();
        let checked = status.snapshot.record.last_checked_at.unwrap();
        (status.next_check_at - checked).num_seconds()
    };

    assert_eq!(interval_after(1).await, 10);
    assert_eq!(interval_after(2).await, 15);

    let logs = engine
        .execution_history(&HistoryQuery::for_target(target.id))
        .await
        .unwrap();
    assert!(logs.len() >= 2);
    assert_eq!(logs[0].outcome, ExecutionOutcome::LaunchError);
    assert_eq!(logs[0].exit_code, LAUNCH_ERROR_EXIT_CODE);
    assert_eq!(logs[0].retry_count, 0);
    assert_eq!(logs[1].retry_count, 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_disable_stops_probing_and_enable_resumes() {
    let probe = FakeProbe::new();
    let (builder, _sent) = engine_builder(test_config(), &probe, Arc::new(MemoryGateway::new()));
    let engine = builder.start().await.unwrap();

    let target = engine.create_target(port_spec(8080, 5)).await.unwrap();
    probe.always(target.id, Status::Running);
    tokio::time::sleep(Duration::from_secs(12)).await;

    engine.set_enabled(target.id, false).await.unwrap();
    let calls = probe.calls(target.id);
    assert!(calls >= 2);
    assert!(!engine.get_status(target.id).await.unwrap().monitoring);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(probe.calls(target.id), calls);
    assert_matches!(
        engine.check_now(target.id).await,
        Err(EngineError::Invalid(_))
    );

    engine.set_enabled(target.id, true).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(probe.calls(target.id) > calls);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_interval_change_takes_effect_immediately() {
    let probe = FakeProbe::new();
    let (builder, _sent) = engine_builder(test_config(), &probe, Arc::new(MemoryGateway::new()));
    let engine = builder.start().await.unwrap();

    let target = engine.create_target(port_spec(8080, 3600)).await.unwrap();
    wait_for_first_check(&engine, target.id).await;
    let calls = probe.calls(target.id);

    engine
        .update_target(
            target.id,
            TargetUpdate {
                monitoring_interval_secs: Some(5),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(probe.calls(target.id) > calls);
    assert_eq!(engine.get_target(target.id).await.unwrap().monitoring_interval_secs, 5);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_delete_target_removes_loop_status_and_rules() {
    let probe = FakeProbe::new();
    let gateway = Arc::new(MemoryGateway::new());
    let (builder, _sent) = engine_builder(test_config(), &probe, gateway.clone());
    let engine = builder.start().await.unwrap();

    let target = engine.create_target(port_spec(8080, 5)).await.unwrap();
    engine
        .create_rule(AlertRuleSpec {
            name: "down".to_string(),
            monitored_item_id: target.id,
            condition: AlertCondition::StatusChange {
                from_status: None,
                to_status: Some(Status::Stopped),
            },
            recipient_ids: vec![],
            enabled: true,
            cooldown_secs: None,
            subject_template: None,
            body_template: None,
        })
        .await
        .unwrap();
    wait_for_first_check(&engine, target.id).await;

    engine.delete_target(target.id).await.unwrap();
    let calls = probe.calls(target.id);

    assert_matches!(
        engine.get_status(target.id).await,
        Err(EngineError::TargetNotFound(_))
    );
    assert!(engine.list_rules().await.is_empty());
    assert!(gateway.load_targets().await.unwrap().is_empty());
    assert!(gateway.load_rules().await.unwrap().is_empty());
    assert!(gateway.load_status(target.id).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(probe.calls(target.id), calls);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_status_write_failures_do_not_stop_monitoring() {
    let probe = FakeProbe::new();
    let gateway = FlakyGateway::new();
    let (builder, _sent) = engine_builder(test_config(), &probe, gateway.clone());
    let engine = builder.start().await.unwrap();

    let target = engine.create_target(port_spec(8080, 5)).await.unwrap();
    probe.always(target.id, Status::Running);
    gateway.set_failing(true);

    tokio::time::sleep(Duration::from_secs(21)).await;
    let live = engine.get_status(target.id).await.unwrap();
    assert!(live.snapshot.record.consecutive_count >= 4);
    assert!(live.monitoring);

    gateway.set_failing(false);
    tokio::time::sleep(Duration::from_secs(5)).await;

    let stored = gateway.load_status(target.id).await.unwrap().unwrap();
    assert_eq!(stored.record.last_known_status, Status::Running);
    assert!(stored.record.consecutive_count >= 5);

    engine.shutdown().await;
}
