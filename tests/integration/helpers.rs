//! Fakes and builders shared by the engine integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use winsentry::config::{Config, StorageConfig};
use winsentry::model::{
    AlertRule, ExecutionLog, MetricSample, NotificationTransport, Recipient, RecipientId, RuleId,
    ScriptConfig, ScriptSource, Status, TargetId, TargetIdentity, TargetSpec, WatchTarget,
};
use winsentry::notify::{NotificationError, NotificationSink};
use winsentry::probe::{Probe, ProbeError, ProbeResult, ProbeSet, ResourceMetrics};
use winsentry::script::Interpreter;
use winsentry::storage::{
    HealthStatus, HistoryQuery, MemoryGateway, PersistenceGateway, PurgeStats, SharedGateway,
    StatusSnapshot, StorageError, StorageResult,
};
use winsentry::{Engine, EngineBuilder, TargetStatus};

// ============================================================================
// Probe
// ============================================================================

/// What the fake probe does for one target
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Pop one status per probe, Unknown once exhausted
    Sequence(VecDeque<Status>),
    /// Same result on every probe
    Always(ProbeResult),
    Fail(ProbeError),
    Panic,
    Hang,
}

enum Step {
    Done(Result<ProbeResult, ProbeError>),
    Panic,
    Hang,
}

/// Probe whose answers are scripted per target id
///
/// Targets without a behavior report Unknown.
#[derive(Default)]
pub struct FakeProbe {
    behaviors: std::sync::Mutex<HashMap<TargetId, Behavior>>,
    calls: std::sync::Mutex<HashMap<TargetId, usize>>,
}

impl FakeProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, id: TargetId, behavior: Behavior) {
        self.behaviors.lock().unwrap().insert(id, behavior);
    }

    pub fn sequence(&self, id: TargetId, statuses: impl IntoIterator<Item = Status>) {
        self.set(id, Behavior::Sequence(statuses.into_iter().collect()));
    }

    pub fn always(&self, id: TargetId, status: Status) {
        self.set(id, Behavior::Always(ProbeResult::status(status)));
    }

    pub fn metrics(&self, id: TargetId, metrics: ResourceMetrics) {
        self.set(
            id,
            Behavior::Always(ProbeResult {
                status: Status::Running,
                owning_pids: Vec::new(),
                metrics: Some(metrics),
            }),
        );
    }

    pub fn calls(&self, id: TargetId) -> usize {
        self.calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn probe_set(self: &Arc<Self>) -> ProbeSet {
        ProbeSet::uniform(self.clone())
    }

    fn next_step(&self, id: TargetId) -> Step {
        *self.calls.lock().unwrap().entry(id).or_default() += 1;

        let mut behaviors = self.behaviors.lock().unwrap();
        match behaviors.get_mut(&id) {
            None => Step::Done(Ok(ProbeResult::status(Status::Unknown))),
            Some(Behavior::Sequence(statuses)) => Step::Done(Ok(ProbeResult::status(
                statuses.pop_front().unwrap_or(Status::Unknown),
            ))),
            Some(Behavior::Always(result)) => Step::Done(Ok(result.clone())),
            Some(Behavior::Fail(e)) => Step::Done(Err(e.clone())),
            Some(Behavior::Panic) => Step::Panic,
            Some(Behavior::Hang) => Step::Hang,
        }
    }
}

#[async_trait]
impl Probe for FakeProbe {
    async fn probe(&self, target: &WatchTarget) -> Result<ProbeResult, ProbeError> {
        match self.next_step(target.id) {
            Step::Done(result) => result,
            Step::Panic => panic!("probe blew up for {}", target.display_name()),
            Step::Hang => std::future::pending().await,
        }
    }
}

// ============================================================================
// Sink
// ============================================================================

#[derive(Debug, Clone)]
pub struct Sent {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Sink forwarding every notification to a channel
pub struct RecordingSink {
    tx: mpsc::UnboundedSender<Sent>,
}

impl RecordingSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Sent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(
        &self,
        recipients: &[Recipient],
        subject: &str,
        body: &str,
    ) -> Result<(), NotificationError> {
        let _ = self.tx.send(Sent {
            to: recipients.iter().map(|r| r.email.clone()).collect(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Wait for the next notification, `None` after `within`
pub async fn next_sent(rx: &mut mpsc::UnboundedReceiver<Sent>, within: Duration) -> Option<Sent> {
    tokio::time::timeout(within, rx.recv()).await.ok().flatten()
}

// ============================================================================
// Gateway
// ============================================================================

/// In-memory gateway whose status and history writes can be switched off
pub struct FlakyGateway {
    inner: MemoryGateway,
    failing: AtomicBool,
}

impl FlakyGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryGateway::new(),
            failing: AtomicBool::new(false),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::QueryFailed("disk on fire".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PersistenceGateway for FlakyGateway {
    async fn upsert_target(&self, target: &WatchTarget) -> StorageResult<()> {
        self.inner.upsert_target(target).await
    }

    async fn delete_target(&self, id: TargetId) -> StorageResult<()> {
        self.inner.delete_target(id).await
    }

    async fn load_targets(&self) -> StorageResult<Vec<WatchTarget>> {
        self.inner.load_targets().await
    }

    async fn save_status(&self, snapshot: &StatusSnapshot) -> StorageResult<()> {
        self.check()?;
        self.inner.save_status(snapshot).await
    }

    async fn load_status(&self, id: TargetId) -> StorageResult<Option<StatusSnapshot>> {
        self.inner.load_status(id).await
    }

    async fn load_all_status(&self) -> StorageResult<Vec<StatusSnapshot>> {
        self.inner.load_all_status().await
    }

    async fn append_execution(&self, log: &ExecutionLog) -> StorageResult<()> {
        self.check()?;
        self.inner.append_execution(log).await
    }

    async fn query_executions(&self, query: &HistoryQuery) -> StorageResult<Vec<ExecutionLog>> {
        self.inner.query_executions(query).await
    }

    async fn append_metric(&self, sample: &MetricSample) -> StorageResult<()> {
        self.check()?;
        self.inner.append_metric(sample).await
    }

    async fn query_metrics(&self, query: &HistoryQuery) -> StorageResult<Vec<MetricSample>> {
        self.inner.query_metrics(query).await
    }

    async fn purge_history(&self, before: DateTime<Utc>) -> StorageResult<PurgeStats> {
        self.inner.purge_history(before).await
    }

    async fn upsert_rule(&self, rule: &AlertRule) -> StorageResult<()> {
        self.inner.upsert_rule(rule).await
    }

    async fn delete_rule(&self, id: RuleId) -> StorageResult<()> {
        self.inner.delete_rule(id).await
    }

    async fn load_rules(&self) -> StorageResult<Vec<AlertRule>> {
        self.inner.load_rules().await
    }

    async fn record_rule_fired(&self, id: RuleId, at: DateTime<Utc>) -> StorageResult<()> {
        self.inner.record_rule_fired(id, at).await
    }

    async fn upsert_recipient(&self, recipient: &Recipient) -> StorageResult<()> {
        self.inner.upsert_recipient(recipient).await
    }

    async fn delete_recipient(&self, id: RecipientId) -> StorageResult<()> {
        self.inner.delete_recipient(id).await
    }

    async fn load_recipients(&self) -> StorageResult<Vec<Recipient>> {
        self.inner.load_recipients().await
    }

    async fn save_transport(&self, transport: &NotificationTransport) -> StorageResult<()> {
        self.inner.save_transport(transport).await
    }

    async fn load_transport(&self) -> StorageResult<Option<NotificationTransport>> {
        self.inner.load_transport().await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.inner.health_check().await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}

// ============================================================================
// Engine
// ============================================================================

pub fn test_config() -> Config {
    Config {
        storage: StorageConfig::None,
        ..Default::default()
    }
}

/// Interpreter that can never be launched; every job ends as a launch error
pub fn broken_interpreter() -> Interpreter {
    Interpreter {
        program: "/nonexistent/winsentry-interpreter".to_string(),
        args: Vec::new(),
        extension: "sh".to_string(),
    }
}

/// Builder with in-memory storage, the fake probe and a recording sink
pub fn engine_builder(
    config: Config,
    probe: &Arc<FakeProbe>,
    gateway: SharedGateway,
) -> (EngineBuilder, mpsc::UnboundedReceiver<Sent>) {
    let (sink, rx) = RecordingSink::new();
    let builder = Engine::builder(config)
        .gateway(gateway)
        .probes(probe.probe_set())
        .sink(sink);
    (builder, rx)
}

pub fn port_spec(port: u16, interval_secs: u64) -> TargetSpec {
    let mut spec = TargetSpec::new(TargetIdentity::Port { port });
    spec.name = Some(format!("port-{port}"));
    spec.monitoring_interval_secs = interval_secs;
    spec
}

pub fn inline_script(content: &str, duration_threshold: u32, max_executions: u32) -> ScriptConfig {
    let mut config = ScriptConfig::new(ScriptSource::Inline {
        content: content.to_string(),
    });
    config.duration_threshold = duration_threshold;
    config.max_executions = max_executions;
    config
}

/// Poll until the status of a target satisfies `check`
pub async fn wait_for_status(engine: &Engine, id: TargetId, check: impl Fn(&TargetStatus) -> bool) {
    let check = &check;
    wait_until(move || async move { engine.get_status(id).await.is_ok_and(|s| check(&s)) }).await;
}

/// Poll until the first automatic cycle of a target has run
pub async fn wait_for_first_check(engine: &Engine, id: TargetId) {
    wait_for_status(engine, id, |s| s.snapshot.record.last_checked_at.is_some()).await;
}

/// Poll until `n` execution logs of a target are stored
pub async fn wait_for_executions(engine: &Engine, id: TargetId, n: usize) -> Vec<ExecutionLog> {
    let query = &HistoryQuery::for_target(id);
    wait_until(move || async move {
        engine
            .execution_history(query)
            .await
            .is_ok_and(|logs| logs.len() >= n)
    })
    .await;
    engine.execution_history(query).await.unwrap()
}

/// Poll `condition` every 10ms, panicking after thirty seconds
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..3000 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
