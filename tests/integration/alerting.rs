//! Alert rules evaluated against live target loops

use std::sync::Arc;
use std::time::Duration;

use winsentry::model::{
    AlertCondition, AlertRuleSpec, Classification, Status, SystemResource, TargetIdentity,
    TargetId, TargetSpec, ThresholdConfig,
};
use winsentry::probe::{ResourceMetrics, SystemMetrics};
use winsentry::storage::{HistoryQuery, MemoryGateway};
use winsentry::Engine;

use crate::helpers::*;

const QUIET: Duration = Duration::from_millis(500);
const WITHIN: Duration = Duration::from_secs(5);

fn rule(target: TargetId, condition: AlertCondition) -> AlertRuleSpec {
    AlertRuleSpec {
        name: "ops".to_string(),
        monitored_item_id: target,
        condition,
        recipient_ids: vec![],
        enabled: true,
        cooldown_secs: Some(0),
        subject_template: None,
        body_template: None,
    }
}

fn went_down() -> AlertCondition {
    AlertCondition::StatusChange {
        from_status: Some(Status::Running),
        to_status: Some(Status::Stopped),
    }
}

fn cpu(percent: f32) -> ResourceMetrics {
    ResourceMetrics::System(SystemMetrics {
        cpu_percent: percent,
        ram_percent: 10.0,
        ram_used_mb: 512.0,
        disk_percent: None,
    })
}

async fn cpu_target(engine: &Engine, email_alerts_enabled: bool) -> TargetId {
    let mut spec = TargetSpec::new(TargetIdentity::System {
        resource: SystemResource::Cpu,
        drive: None,
    });
    spec.name = Some("cpu".to_string());
    spec.monitoring_interval_secs = 3600;
    spec.thresholds = Some(ThresholdConfig {
        cpu_threshold: Some(80.0),
        ram_threshold: None,
        disk_threshold: None,
        email_alerts_enabled,
        critical_multiplier: Some(1.25),
        aggregation: None,
    });
    let target = engine.create_target(spec).await.unwrap();
    wait_for_first_check(engine, target.id).await;
    target.id
}

#[tokio::test(start_paused = true)]
async fn test_status_change_notifies_enabled_recipients() {
    let probe = FakeProbe::new();
    let (builder, mut sent) = engine_builder(test_config(), &probe, Arc::new(MemoryGateway::new()));
    let engine = builder.start().await.unwrap();

    let target = engine.create_target(port_spec(8080, 3600)).await.unwrap();
    wait_for_first_check(&engine, target.id).await;

    let ops = engine
        .add_recipient("ops".to_string(), "ops@example.com".to_string(), true)
        .await
        .unwrap();
    let away = engine
        .add_recipient("away".to_string(), "away@example.com".to_string(), false)
        .await
        .unwrap();
    let mut spec = rule(target.id, went_down());
    spec.recipient_ids = vec![ops.id, away.id];
    engine.create_rule(spec).await.unwrap();

    probe.sequence(target.id, [Status::Running, Status::Stopped]);
    engine.check_now(target.id).await.unwrap();
    assert!(next_sent(&mut sent, QUIET).await.is_none());
    engine.check_now(target.id).await.unwrap();

    let alert = next_sent(&mut sent, WITHIN).await.expect("alert delivered");
    assert_eq!(alert.to, ["ops@example.com"]);
    assert_eq!(alert.subject, "[WinSentry] ops: port-8080");
    assert!(alert.body.contains("port-8080 changed from running to stopped"));

    let rules = engine.list_rules().await;
    assert!(rules[0].last_fired_at.is_some());

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_suppresses_repeated_transitions() {
    let probe = FakeProbe::new();
    let (builder, mut sent) = engine_builder(test_config(), &probe, Arc::new(MemoryGateway::new()));
    let engine = builder.start().await.unwrap();

    let target = engine.create_target(port_spec(8080, 3600)).await.unwrap();
    wait_for_first_check(&engine, target.id).await;

    let mut spec = rule(target.id, went_down());
    spec.cooldown_secs = Some(3600);
    engine.create_rule(spec).await.unwrap();

    probe.sequence(
        target.id,
        [Status::Running, Status::Stopped, Status::Running, Status::Stopped],
    );
    for _ in 0..4 {
        engine.check_now(target.id).await.unwrap();
    }

    assert!(next_sent(&mut sent, WITHIN).await.is_some());
    assert!(next_sent(&mut sent, QUIET).await.is_none());

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_duration_rule_fires_at_the_exact_count() {
    let probe = FakeProbe::new();
    let (builder, mut sent) = engine_builder(test_config(), &probe, Arc::new(MemoryGateway::new()));
    let engine = builder.start().await.unwrap();

    let target = engine.create_target(port_spec(8080, 3600)).await.unwrap();
    wait_for_first_check(&engine, target.id).await;

    let mut spec = rule(
        target.id,
        AlertCondition::Duration {
            status: Status::Stopped,
            interval_count: 3,
        },
    );
    spec.subject_template = Some("{target_name} {status} x{consecutive_count}".to_string());
    engine.create_rule(spec).await.unwrap();

    probe.sequence(target.id, [Status::Stopped; 5]);
    for _ in 0..2 {
        engine.check_now(target.id).await.unwrap();
    }
    assert!(next_sent(&mut sent, QUIET).await.is_none());

    engine.check_now(target.id).await.unwrap();
    let alert = next_sent(&mut sent, WITHIN).await.expect("alert delivered");
    assert_eq!(alert.subject, "port-8080 stopped x3");

    engine.check_now(target.id).await.unwrap();
    engine.check_now(target.id).await.unwrap();
    assert!(next_sent(&mut sent, QUIET).await.is_none());

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_threshold_escalation_alerts_once_per_level() {
    let probe = FakeProbe::new();
    let (builder, mut sent) = engine_builder(test_config(), &probe, Arc::new(MemoryGateway::new()));
    let engine = builder.start().await.unwrap();

    let target = cpu_target(&engine, true).await;
    let mut spec = rule(
        target,
        AlertCondition::Threshold {
            min_level: Classification::Warning,
        },
    );
    spec.subject_template = Some("{target_name} {classification}".to_string());
    engine.create_rule(spec).await.unwrap();

    probe.metrics(target, cpu(50.0));
    engine.check_now(target).await.unwrap();
    assert!(next_sent(&mut sent, QUIET).await.is_none());

    probe.metrics(target, cpu(85.0));
    engine.check_now(target).await.unwrap();
    let warning = next_sent(&mut sent, WITHIN).await.expect("warning alert");
    assert_eq!(warning.subject, "cpu warning");

    probe.metrics(target, cpu(90.0));
    engine.check_now(target).await.unwrap();
    assert!(next_sent(&mut sent, QUIET).await.is_none());

    probe.metrics(target, cpu(101.0));
    engine.check_now(target).await.unwrap();
    let critical = next_sent(&mut sent, WITHIN).await.expect("critical alert");
    assert_eq!(critical.subject, "cpu critical");

    let samples = engine
        .metric_history(&HistoryQuery::for_target(target))
        .await
        .unwrap();
    let levels: Vec<Classification> = samples.iter().map(|s| s.classification).collect();
    assert_eq!(
        levels,
        [
            Classification::Normal,
            Classification::Warning,
            Classification::Warning,
            Classification::Critical
        ]
    );
    assert_eq!(
        engine.get_status(target).await.unwrap().snapshot.classification,
        Classification::Critical
    );

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_threshold_alerts_respect_email_flag() {
    let probe = FakeProbe::new();
    let (builder, mut sent) = engine_builder(test_config(), &probe, Arc::new(MemoryGateway::new()));
    let engine = builder.start().await.unwrap();

    let target = cpu_target(&engine, false).await;
    engine
        .create_rule(rule(
            target,
            AlertCondition::Threshold {
                min_level: Classification::Warning,
            },
        ))
        .await
        .unwrap();

    probe.metrics(target, cpu(150.0));
    engine.check_now(target).await.unwrap();

    assert!(next_sent(&mut sent, QUIET).await.is_none());
    let samples = engine
        .metric_history(&HistoryQuery::for_target(target))
        .await
        .unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].classification, Classification::Critical);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_muted_alerts_resume_after_unmute() {
    let probe = FakeProbe::new();
    let (builder, mut sent) = engine_builder(test_config(), &probe, Arc::new(MemoryGateway::new()));
    let engine = builder.start().await.unwrap();

    let target = engine.create_target(port_spec(8080, 3600)).await.unwrap();
    wait_for_first_check(&engine, target.id).await;
    engine.create_rule(rule(target.id, went_down())).await.unwrap();

    engine.mute_alerts(None).await;
    probe.sequence(
        target.id,
        [Status::Running, Status::Stopped, Status::Running, Status::Stopped],
    );
    engine.check_now(target.id).await.unwrap();
    engine.check_now(target.id).await.unwrap();
    assert!(next_sent(&mut sent, QUIET).await.is_none());
    assert!(engine.list_rules().await[0].last_fired_at.is_none());

    engine.unmute_alerts().await;
    engine.check_now(target.id).await.unwrap();
    engine.check_now(target.id).await.unwrap();
    assert!(next_sent(&mut sent, WITHIN).await.is_some());

    engine.shutdown().await;
}
