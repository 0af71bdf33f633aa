//! Engine facade
//!
//! Wires the collaborators together in startup order and exposes the
//! management operations as async methods:
//!
//! ```text
//! open gateway (migrations) ─▶ load registry ─▶ alert actor ─▶ script engine
//!                           ─▶ target loops ─▶ retention
//! ```
//!
//! Failing to open the gateway is the only fatal startup error. Management
//! writes go to the store first and are applied in memory only when the write
//! succeeded.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::actors::alert::AlertHandle;
use crate::actors::messages::TargetSummary;
use crate::actors::retention;
use crate::actors::scheduler::Scheduler;
use crate::actors::target::MonitorContext;
use crate::clock::{SharedClock, TokioClock};
use crate::config::Config;
use crate::model::{
    AlertCondition, AlertRule, AlertRuleSpec, ExecutionLog, MetricSample, NotificationTransport, Recipient,
    RecipientId, RuleId, StatusRecord, TargetId, TargetSpec, TargetUpdate, WatchTarget,
};
use crate::notify::{LogSink, NotificationError, SharedSink, sink_for};
use crate::probe::ProbeSet;
use crate::registry::{Registry, TargetState};
use crate::script::{Interpreter, ScriptEngine};
use crate::storage::{
    HistoryQuery, PurgeStats, SharedGateway, StatusSnapshot, StorageError, open_gateway,
};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("target {0} not found")]
    TargetNotFound(TargetId),

    #[error("alert rule {0} not found")]
    RuleNotFound(RuleId),

    #[error("recipient {0} not found")]
    RecipientNotFound(RecipientId),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Notification(#[from] NotificationError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Current view of one target
#[derive(Debug, Clone)]
pub struct TargetStatus {
    pub target: WatchTarget,
    pub snapshot: StatusSnapshot,
    pub next_check_at: DateTime<Utc>,
    pub monitoring: bool,
}

/// Collaborators an engine can be started with
///
/// Anything left unset falls back to the local default.
pub struct EngineBuilder {
    config: Config,
    gateway: Option<SharedGateway>,
    probes: Option<ProbeSet>,
    sink: Option<SharedSink>,
    clock: Option<SharedClock>,
    interpreter: Option<Interpreter>,
}

impl EngineBuilder {
    pub fn gateway(mut self, gateway: SharedGateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn probes(mut self, probes: ProbeSet) -> Self {
        self.probes = Some(probes);
        self
    }

    /// Fixed sink; transport changes are then persisted but not applied
    pub fn sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn interpreter(mut self, interpreter: Interpreter) -> Self {
        self.interpreter = Some(interpreter);
        self
    }

    pub async fn start(self) -> EngineResult<Engine> {
        let config = self.config;
        let clock = self.clock.unwrap_or_else(TokioClock::shared);

        let gateway = match self.gateway {
            Some(gateway) => gateway,
            None => open_gateway(&config.storage).await?,
        };
        let health = gateway.health_check().await?;
        if !health.healthy {
            return Err(StorageError::UnhealthyBackend(health.message).into());
        }
        debug!("persistence gateway ready: {}", health.message);

        let registry = Arc::new(Registry::new());
        let now = clock.now();

        let mut targets = gateway.load_targets().await?;
        if targets.is_empty() && !config.targets.is_empty() {
            info!("seeding {} targets from configuration", config.targets.len());
            for spec in &config.targets {
                if let Err(e) = validate_spec(spec) {
                    warn!("skipping configured target {}: {e}", spec.identity);
                    continue;
                }
                let target = spec.clone().into_target(Uuid::now_v7(), now);
                gateway.upsert_target(&target).await?;
                targets.push(target);
            }
        }

        let mut snapshots: HashMap<TargetId, StatusSnapshot> = gateway
            .load_all_status()
            .await?
            .into_iter()
            .map(|snapshot| (snapshot.target_id, snapshot))
            .collect();

        for target in targets {
            let state = match snapshots.remove(&target.id) {
                Some(snapshot) => TargetState::restore(target, snapshot, now),
                None => TargetState::new(target, now),
            };
            registry.insert(state).await;
        }
        info!("loaded {} watch targets", registry.len().await);

        let transport = match gateway.load_transport().await? {
            Some(transport) => transport,
            None => config.notifications.clone().unwrap_or_default(),
        };
        let fixed_sink = self.sink.is_some();
        let sink = match self.sink {
            Some(sink) => sink,
            None => sink_for(&transport).unwrap_or_else(|e| {
                error!("notification transport unusable, falling back to log: {e}");
                Arc::new(LogSink)
            }),
        };

        let alerts = AlertHandle::spawn(
            gateway.load_rules().await?,
            gateway.load_recipients().await?,
            sink,
            gateway.clone(),
            clock.clone(),
            config.alerts.clone(),
        );

        let scripts = ScriptEngine::with_interpreter(
            config.executor.clone(),
            self.interpreter.unwrap_or_else(Interpreter::platform_default),
            gateway.clone(),
            clock.clone(),
        );

        let ctx = Arc::new(MonitorContext {
            probes: self.probes.unwrap_or_else(ProbeSet::local),
            scripts: scripts.clone(),
            gateway: gateway.clone(),
            alerts: alerts.clone(),
            clock: clock.clone(),
            config: config.scheduler.clone(),
            thresholds: config.thresholds,
        });
        let scheduler = Scheduler::new(ctx);

        for slot in registry.slots().await {
            let state = slot.state.lock().await;
            alerts.update_target(TargetSummary::from(&state.target)).await;
            let enabled = state.target.enabled;
            drop(state);
            if enabled {
                scheduler.add(slot).await;
            }
        }

        let retention_cancel = CancellationToken::new();
        let retention_days = config.storage.retention_days();
        let retention = (retention_days > 0).then(|| {
            retention::spawn(
                gateway.clone(),
                clock.clone(),
                retention_days,
                retention_cancel.clone(),
            )
        });

        info!("engine started");

        Ok(Engine {
            gateway,
            registry,
            scheduler,
            scripts,
            alerts,
            clock,
            fixed_sink,
            retention_cancel,
            retention,
        })
    }
}

/// Running monitoring engine
pub struct Engine {
    gateway: SharedGateway,
    registry: Arc<Registry>,
    scheduler: Scheduler,
    scripts: ScriptEngine,
    alerts: AlertHandle,
    clock: SharedClock,
    fixed_sink: bool,
    retention_cancel: CancellationToken,
    retention: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder {
            config,
            gateway: None,
            probes: None,
            sink: None,
            clock: None,
            interpreter: None,
        }
    }

    /// Start with local probes and the configured store and transport
    pub async fn start(config: Config) -> EngineResult<Self> {
        Self::builder(config).start().await
    }

    pub fn gateway(&self) -> &SharedGateway {
        &self.gateway
    }

    // ========================================================================
    // Targets
    // ========================================================================

    pub async fn create_target(&self, spec: TargetSpec) -> EngineResult<WatchTarget> {
        validate_spec(&spec).map_err(EngineError::Invalid)?;

        let now = self.clock.now();
        let target = spec.into_target(Uuid::now_v7(), now);
        self.gateway.upsert_target(&target).await?;

        let state = TargetState::new(target.clone(), now);
        let snapshot = state.snapshot();
        let slot = self.registry.insert(state).await;
        if let Err(e) = self.gateway.save_status(&snapshot).await {
            warn!(target_id = %target.id, "initial status write failed: {e}");
        }

        self.alerts
            .update_target(TargetSummary::from(&target))
            .await;
        if target.enabled {
            self.scheduler.add(slot).await;
        }

        info!(target_id = %target.id, "created {} target {}", target.kind(), target.display_name());
        Ok(target)
    }

    pub async fn update_target(
        &self,
        id: TargetId,
        update: TargetUpdate,
    ) -> EngineResult<WatchTarget> {
        let slot = self
            .registry
            .get(id)
            .await
            .ok_or(EngineError::TargetNotFound(id))?;

        let (target, was_enabled, interval_changed) = {
            let mut state = slot.state.lock().await;
            let mut target = state.target.clone();
            let was_enabled = target.enabled;
            let interval_before = target.monitoring_interval_secs;

            if let Some(name) = update.name {
                target.name = Some(name);
            }
            if let Some(secs) = update.monitoring_interval_secs {
                if secs == 0 {
                    return Err(EngineError::Invalid(
                        "monitoring interval must be at least one second".to_string(),
                    ));
                }
                target.monitoring_interval_secs = secs;
            }
            if let Some(enabled) = update.enabled {
                target.enabled = enabled;
            }
            if let Some(scripts) = update.scripts {
                target.scripts = scripts;
            }
            if let Some(thresholds) = update.thresholds {
                target.thresholds = thresholds;
            }
            target.updated_at = self.clock.now();

            self.gateway.upsert_target(&target).await?;

            state.target = target.clone();
            if update.reset_executions {
                state.counters = Default::default();
                let snapshot = state.snapshot();
                if let Err(e) = self.gateway.save_status(&snapshot).await {
                    warn!(target_id = %id, "status write after reset failed: {e}");
                }
            }

            (
                target,
                was_enabled,
                interval_before != state.target.monitoring_interval_secs,
            )
        };

        self.alerts
            .update_target(TargetSummary::from(&target))
            .await;

        match (was_enabled, target.enabled) {
            (false, true) => self.scheduler.add(slot).await,
            (true, false) => {
                self.scheduler.remove(id).await;
            }
            (true, true) if interval_changed => {
                self.scheduler.reschedule(id).await;
            }
            _ => {}
        }

        Ok(target)
    }

    /// Toggle monitoring (and with it automatic recovery) of a target
    pub async fn set_enabled(&self, id: TargetId, enabled: bool) -> EngineResult<WatchTarget> {
        self.update_target(
            id,
            TargetUpdate {
                enabled: Some(enabled),
                ..Default::default()
            },
        )
        .await
    }

    /// Stop monitoring and delete a target with its status and alert rules
    ///
    /// Execution logs and metric samples stay until purged.
    pub async fn delete_target(&self, id: TargetId) -> EngineResult<()> {
        if !self.registry.contains(id).await {
            return Err(EngineError::TargetNotFound(id));
        }

        self.scheduler.remove(id).await;
        self.registry.remove(id).await;
        self.gateway.delete_target(id).await?;

        for rule_id in self.alerts.remove_target(id).await {
            if let Err(e) = self.gateway.delete_rule(rule_id).await {
                warn!(%rule_id, "deleting rule of removed target failed: {e}");
            }
        }

        info!(target_id = %id, "target deleted");
        Ok(())
    }

    pub async fn get_target(&self, id: TargetId) -> EngineResult<WatchTarget> {
        let slot = self
            .registry
            .get(id)
            .await
            .ok_or(EngineError::TargetNotFound(id))?;
        let target = slot.state.lock().await.target.clone();
        Ok(target)
    }

    pub async fn list_targets(&self) -> Vec<WatchTarget> {
        self.registry
            .states()
            .await
            .into_iter()
            .map(|state| state.target)
            .collect()
    }

    pub async fn get_status(&self, id: TargetId) -> EngineResult<TargetStatus> {
        let slot = self
            .registry
            .get(id)
            .await
            .ok_or(EngineError::TargetNotFound(id))?;
        let state = slot.state.lock().await.clone();
        Ok(self.status_of(state).await)
    }

    pub async fn list_status(&self) -> Vec<TargetStatus> {
        let mut statuses = Vec::new();
        for state in self.registry.states().await {
            statuses.push(self.status_of(state).await);
        }
        statuses
    }

    async fn status_of(&self, state: TargetState) -> TargetStatus {
        TargetStatus {
            monitoring: self.scheduler.is_running(state.target.id).await,
            snapshot: state.snapshot(),
            next_check_at: state.next_check_at,
            target: state.target,
        }
    }

    /// Run one monitoring cycle of an enabled target immediately
    pub async fn check_now(&self, id: TargetId) -> EngineResult<StatusRecord> {
        if !self.registry.contains(id).await {
            return Err(EngineError::TargetNotFound(id));
        }
        self.scheduler
            .check_now(id)
            .await
            .ok_or_else(|| EngineError::Invalid(format!("target {id} is not being monitored")))
    }

    // ========================================================================
    // History
    // ========================================================================

    pub async fn execution_history(&self, query: &HistoryQuery) -> EngineResult<Vec<ExecutionLog>> {
        Ok(self.gateway.query_executions(query).await?)
    }

    pub async fn metric_history(&self, query: &HistoryQuery) -> EngineResult<Vec<MetricSample>> {
        Ok(self.gateway.query_metrics(query).await?)
    }

    pub async fn purge_history(&self, before: DateTime<Utc>) -> EngineResult<PurgeStats> {
        let stats = self.gateway.purge_history(before).await?;
        info!(
            executions = stats.executions,
            metrics = stats.metrics,
            "purged history older than {before}"
        );
        Ok(stats)
    }

    // ========================================================================
    // Alert rules
    // ========================================================================

    pub async fn create_rule(&self, spec: AlertRuleSpec) -> EngineResult<AlertRule> {
        self.save_rule(Uuid::now_v7(), spec, None).await
    }

    /// Replace a rule; its cooldown anchor is kept
    pub async fn update_rule(&self, id: RuleId, spec: AlertRuleSpec) -> EngineResult<AlertRule> {
        let existing = self
            .list_rules()
            .await
            .into_iter()
            .find(|rule| rule.id == id)
            .ok_or(EngineError::RuleNotFound(id))?;
        self.save_rule(id, spec, existing.last_fired_at).await
    }

    async fn save_rule(
        &self,
        id: RuleId,
        spec: AlertRuleSpec,
        last_fired_at: Option<DateTime<Utc>>,
    ) -> EngineResult<AlertRule> {
        if spec.name.trim().is_empty() {
            return Err(EngineError::Invalid("rule name must not be empty".to_string()));
        }
        match &spec.condition {
            AlertCondition::Duration {
                interval_count: 0, ..
            } => {
                return Err(EngineError::Invalid(
                    "duration interval_count must be at least 1".to_string(),
                ));
            }
            AlertCondition::Recurring { schedule } => {
                schedule.validate().map_err(EngineError::Invalid)?;
            }
            _ => {}
        }
        let target = self.get_target(spec.monitored_item_id).await?;

        let mut rule = spec.into_rule(id, target.kind());
        rule.last_fired_at = last_fired_at;

        self.gateway.upsert_rule(&rule).await?;
        self.alerts.upsert_rule(rule.clone()).await;
        Ok(rule)
    }

    pub async fn delete_rule(&self, id: RuleId) -> EngineResult<()> {
        if !self.list_rules().await.iter().any(|rule| rule.id == id) {
            return Err(EngineError::RuleNotFound(id));
        }
        self.gateway.delete_rule(id).await?;
        self.alerts.remove_rule(id).await;
        Ok(())
    }

    /// Rules with their live cooldown anchors
    pub async fn list_rules(&self) -> Vec<AlertRule> {
        self.alerts.list_rules().await
    }

    pub async fn mute_alerts(&self, until: Option<DateTime<Utc>>) {
        self.alerts.mute(until).await;
    }

    pub async fn unmute_alerts(&self) {
        self.alerts.unmute().await;
    }

    // ========================================================================
    // Recipients and transport
    // ========================================================================

    pub async fn add_recipient(
        &self,
        name: String,
        email: String,
        enabled: bool,
    ) -> EngineResult<Recipient> {
        let recipient = Recipient {
            id: Uuid::now_v7(),
            name,
            email,
            enabled,
        };
        self.save_recipient(recipient).await
    }

    pub async fn update_recipient(&self, recipient: Recipient) -> EngineResult<Recipient> {
        if !self
            .list_recipients()
            .await?
            .iter()
            .any(|r| r.id == recipient.id)
        {
            return Err(EngineError::RecipientNotFound(recipient.id));
        }
        self.save_recipient(recipient).await
    }

    async fn save_recipient(&self, recipient: Recipient) -> EngineResult<Recipient> {
        if let Err(e) = recipient.email.parse::<lettre::Address>() {
            return Err(EngineError::Invalid(format!(
                "'{}' is not an email address: {e}",
                recipient.email
            )));
        }
        self.gateway.upsert_recipient(&recipient).await?;
        self.refresh_recipients().await?;
        Ok(recipient)
    }

    pub async fn delete_recipient(&self, id: RecipientId) -> EngineResult<()> {
        if !self.list_recipients().await?.iter().any(|r| r.id == id) {
            return Err(EngineError::RecipientNotFound(id));
        }
        self.gateway.delete_recipient(id).await?;
        self.refresh_recipients().await
    }

    pub async fn list_recipients(&self) -> EngineResult<Vec<Recipient>> {
        Ok(self.gateway.load_recipients().await?)
    }

    async fn refresh_recipients(&self) -> EngineResult<()> {
        let recipients = self.gateway.load_recipients().await?;
        self.alerts.set_recipients(recipients).await;
        Ok(())
    }

    pub async fn transport(&self) -> EngineResult<NotificationTransport> {
        Ok(self.gateway.load_transport().await?.unwrap_or_default())
    }

    /// Persist and apply a new notification transport
    pub async fn set_transport(&self, transport: NotificationTransport) -> EngineResult<()> {
        let sink = sink_for(&transport)?;
        self.gateway.save_transport(&transport).await?;
        if self.fixed_sink {
            debug!("engine runs with a fixed sink, transport only persisted");
        } else {
            self.alerts.set_sink(sink).await;
        }
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Stop every loop, cancel running scripts and close the store
    pub async fn shutdown(self) {
        info!("shutting down engine");

        self.scheduler.shutdown().await;
        self.scripts.shutdown();
        self.alerts.shutdown().await;

        self.retention_cancel.cancel();
        if let Some(retention) = self.retention {
            let _ = retention.await;
        }

        if let Err(e) = self.gateway.close().await {
            warn!("closing the store failed: {e}");
        }
        info!("engine stopped");
    }
}

fn validate_spec(spec: &TargetSpec) -> Result<(), String> {
    spec.identity.validate()?;
    if spec.monitoring_interval_secs == 0 {
        return Err("monitoring interval must be at least one second".to_string());
    }
    for config in [&spec.scripts.stopped, &spec.scripts.running]
        .into_iter()
        .flatten()
    {
        if config.duration_threshold == 0 {
            return Err("duration_threshold must be at least 1".to_string());
        }
    }
    Ok(())
}
