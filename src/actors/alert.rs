//! AlertActor - Evaluates alert rules and dispatches notifications
//!
//! Target loops publish [`AlertEvent`]s; the actor matches them against the
//! enabled rules of that target, applies the rule's cooldown and hands the
//! rendered notification to the [`NotificationSink`](crate::notify::NotificationSink).
//!
//! ## Conditions
//!
//! ```text
//! status_change  transition between known statuses matches from/to
//! duration       status == rule status and consecutive_count == interval_count
//! threshold      escalation to at least min_level (and email alerts enabled)
//! recurring      schedule tick, independent of any event
//! ```
//!
//! ## Cooldown
//!
//! A rule never fires twice within its cooldown window anchored at
//! `last_fired_at`. The anchor moves as soon as the rule fires, before
//! delivery, so a failed delivery still counts as a firing. Without an explicit
//! `cooldown_secs` the window is `cooldown_intervals × monitoring interval`.
//!
//! Delivery runs in its own task and is never retried.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::clock::SharedClock;
use crate::config::AlertConfig;
use crate::model::{
    AlertCondition, AlertRule, Recipient, RecipientId, RecurringSchedule, RuleId, StatusRecord,
    TargetId,
};
use crate::notify::SharedSink;
use crate::storage::{SharedGateway, persist_with_retry};

use super::messages::{AlertCommand, AlertEvent, AlertEventKind, TargetSummary};

/// Resolution of recurring schedules
const RECURRING_TICK: Duration = Duration::from_secs(1);

/// Ten years
const MAX_COOLDOWN_SECS: i64 = 10 * 365 * 24 * 3600;

static PLACEHOLDER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\{(\w+)\}").ok());

const DEFAULT_SUBJECT: &str = "[WinSentry] {rule_name}: {target_name}";

const DEFAULT_BODY: &str = "{summary}\n\n\
Target: {target_name} ({target_kind} {target})\n\
Status: {status}\n\
Consecutive checks: {consecutive_count}\n\
Failed recovery attempts: {failure_count}\n\
Time: {timestamp}\n";

/// Template variables of one firing
type Vars = HashMap<&'static str, String>;

/// What the actor knows about a monitored target
#[derive(Debug, Clone)]
struct TargetEntry {
    summary: TargetSummary,
    /// Last observed record and failure count, for recurring rules
    last: Option<(StatusRecord, u32)>,
}

/// Actor that evaluates alert rules and sends notifications
pub struct AlertActor {
    rules: HashMap<RuleId, AlertRule>,

    /// Next due time of each recurring rule
    next_due: HashMap<RuleId, DateTime<Utc>>,

    targets: HashMap<TargetId, TargetEntry>,

    recipients: HashMap<RecipientId, Recipient>,

    sink: SharedSink,

    gateway: SharedGateway,

    clock: SharedClock,

    config: AlertConfig,

    command_rx: mpsc::Receiver<AlertCommand>,

    muted: bool,

    muted_until: Option<DateTime<Utc>>,
}

impl AlertActor {
    pub fn new(
        command_rx: mpsc::Receiver<AlertCommand>,
        sink: SharedSink,
        gateway: SharedGateway,
        clock: SharedClock,
        config: AlertConfig,
    ) -> Self {
        Self {
            rules: HashMap::new(),
            next_due: HashMap::new(),
            targets: HashMap::new(),
            recipients: HashMap::new(),
            sink,
            gateway,
            clock,
            config,
            command_rx,
            muted: false,
            muted_until: None,
        }
    }

    pub fn register_rule(&mut self, rule: AlertRule) {
        self.next_due.remove(&rule.id);
        if let AlertCondition::Recurring { schedule } = &rule.condition {
            match schedule.next_after(self.clock.now()) {
                Some(due) => {
                    self.next_due.insert(rule.id, due);
                }
                None => {
                    error!(
                        rule_id = %rule.id,
                        ?schedule,
                        "recurring rule '{}' cannot be scheduled, skipping",
                        rule.name
                    );
                    self.rules.remove(&rule.id);
                    return;
                }
            }
        }
        self.rules.insert(rule.id, rule);
    }

    pub fn register_target(&mut self, summary: TargetSummary) {
        match self.targets.get_mut(&summary.id) {
            Some(entry) => entry.summary = summary,
            None => {
                self.targets.insert(
                    summary.id,
                    TargetEntry {
                        summary,
                        last: None,
                    },
                );
            }
        }
    }

    pub fn set_recipients(&mut self, recipients: Vec<Recipient>) {
        self.recipients = recipients.into_iter().map(|r| (r.id, r)).collect();
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting alert actor with {} rules", self.rules.len());

        let mut ticker = interval(RECURRING_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_recurring();
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        warn!("command channel closed, shutting down");
                        break;
                    };

                    match cmd {
                        AlertCommand::Evaluate(event) => self.handle_event(event),

                        AlertCommand::UpsertRule(rule) => {
                            debug!(rule_id = %rule.id, "registering rule '{}'", rule.name);
                            self.register_rule(rule);
                        }

                        AlertCommand::RemoveRule(id) => {
                            self.rules.remove(&id);
                            self.next_due.remove(&id);
                        }

                        AlertCommand::RemoveTarget { target_id, respond_to } => {
                            let _ = respond_to.send(self.remove_target(target_id));
                        }

                        AlertCommand::UpdateTarget(summary) => self.register_target(summary),

                        AlertCommand::ListRules { respond_to } => {
                            let mut rules: Vec<AlertRule> = self.rules.values().cloned().collect();
                            rules.sort_by_key(|rule| rule.id);
                            let _ = respond_to.send(rules);
                        }

                        AlertCommand::SetRecipients(recipients) => self.set_recipients(recipients),

                        AlertCommand::SetSink(sink) => {
                            debug!("notification sink replaced");
                            self.sink = sink;
                        }

                        AlertCommand::Mute { until } => {
                            info!(?until, "alerts muted");
                            self.muted = true;
                            self.muted_until = until;
                        }

                        AlertCommand::Unmute => {
                            info!("alerts unmuted");
                            self.muted = false;
                            self.muted_until = None;
                        }

                        AlertCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }
            }
        }

        debug!("alert actor stopped");
    }

    fn is_muted(&mut self, now: DateTime<Utc>) -> bool {
        if !self.muted {
            return false;
        }
        match self.muted_until {
            Some(until) if now >= until => {
                info!("alert mute expired");
                self.muted = false;
                self.muted_until = None;
                false
            }
            _ => true,
        }
    }

    fn remove_target(&mut self, target_id: TargetId) -> Vec<RuleId> {
        self.targets.remove(&target_id);

        let removed: Vec<RuleId> = self
            .rules
            .values()
            .filter(|rule| rule.monitored_item_id == target_id)
            .map(|rule| rule.id)
            .collect();
        for id in &removed {
            self.rules.remove(id);
            self.next_due.remove(id);
        }
        removed
    }

    #[instrument(skip(self, event), fields(target = %event.target.name))]
    fn handle_event(&mut self, event: AlertEvent) {
        self.register_target(event.target.clone());
        if let AlertEventKind::Observed {
            record,
            failure_count,
            ..
        } = &event.kind
        {
            if let Some(entry) = self.targets.get_mut(&event.target.id) {
                entry.last = Some((*record, *failure_count));
            }
        }

        if self.is_muted(event.at) {
            trace!("alerts muted, skipping evaluation");
            return;
        }

        let mut matching: Vec<RuleId> = self
            .rules
            .values()
            .filter(|rule| {
                rule.enabled
                    && rule.monitored_item_id == event.target.id
                    && condition_matches(&rule.condition, &event.kind)
            })
            .map(|rule| rule.id)
            .collect();
        matching.sort();

        for id in matching {
            let vars = event_vars(&event);
            self.fire(id, &event.target, vars, event.at);
        }
    }

    fn run_recurring(&mut self) {
        let now = self.clock.now();
        if self.is_muted(now) {
            return;
        }

        let due: Vec<RuleId> = self
            .next_due
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in due {
            let Some(rule) = self.rules.get(&id) else {
                self.next_due.remove(&id);
                continue;
            };
            let AlertCondition::Recurring { schedule } = &rule.condition else {
                self.next_due.remove(&id);
                continue;
            };
            match schedule.next_after(now) {
                Some(due) => {
                    self.next_due.insert(id, due);
                }
                None => {
                    warn!(rule_id = %id, "recurring rule has no further occurrence");
                    self.next_due.remove(&id);
                }
            }

            if !rule.enabled {
                continue;
            }

            let Some(entry) = self.targets.get(&rule.monitored_item_id).cloned() else {
                debug!(rule_id = %id, "recurring rule for an unknown target");
                continue;
            };

            let mut vars = summary_vars(&entry.summary, now);
            if let Some((record, failure_count)) = entry.last {
                record_vars(&mut vars, &record, failure_count);
            }
            vars.insert(
                "summary",
                format!("Scheduled report for {}", entry.summary.name),
            );
            self.fire(id, &entry.summary, vars, now);
        }
    }

    fn fire(&mut self, id: RuleId, target: &TargetSummary, mut vars: Vars, at: DateTime<Utc>) {
        let Some(rule) = self.rules.get_mut(&id) else {
            return;
        };

        let cooldown = cooldown_for(rule, target.monitoring_interval_secs, &self.config);
        if let Some(until) = rule.last_fired_at.and_then(|last| last.checked_add_signed(cooldown)) {
            if at < until {
                debug!(rule_id = %id, "rule '{}' in cooldown until {until}", rule.name);
                return;
            }
        }
        rule.last_fired_at = Some(at);

        vars.insert("rule_name", rule.name.clone());
        vars.insert("condition", rule.condition.name().to_string());
        let subject = render(
            rule.subject_template.as_deref().unwrap_or(DEFAULT_SUBJECT),
            &vars,
        );
        let body = render(
            rule.body_template.as_deref().unwrap_or(DEFAULT_BODY),
            &vars,
        );

        let recipients: Vec<Recipient> = rule
            .recipient_ids
            .iter()
            .filter_map(|rid| self.recipients.get(rid))
            .filter(|recipient| recipient.enabled)
            .cloned()
            .collect();

        info!(rule_id = %id, "alert rule '{}' fired for {}", rule.name, target.name);

        tokio::spawn(deliver(
            self.sink.clone(),
            self.gateway.clone(),
            id,
            at,
            recipients,
            subject,
            body,
        ));
    }
}

async fn deliver(
    sink: SharedSink,
    gateway: SharedGateway,
    rule_id: RuleId,
    at: DateTime<Utc>,
    recipients: Vec<Recipient>,
    subject: String,
    body: String,
) {
    persist_with_retry("alert rule fired_at write", || {
        gateway.record_rule_fired(rule_id, at)
    })
    .await;

    match sink.send(&recipients, &subject, &body).await {
        Ok(()) => debug!(%rule_id, "notification delivered"),
        Err(e) => error!(%rule_id, "notification delivery failed: {e}"),
    }
}

/// Whether an event satisfies a rule condition
pub fn condition_matches(condition: &AlertCondition, event: &AlertEventKind) -> bool {
    match (condition, event) {
        (
            AlertCondition::StatusChange {
                from_status,
                to_status,
            },
            AlertEventKind::Observed {
                transition: Some(transition),
                ..
            },
        ) => {
            from_status.is_none_or(|from| from == transition.from)
                && to_status.is_none_or(|to| to == transition.to)
        }
        (
            AlertCondition::Duration {
                status,
                interval_count,
            },
            AlertEventKind::Observed { record, .. },
        ) => record.status == *status && record.consecutive_count == (*interval_count).max(1),
        (
            AlertCondition::Threshold { min_level },
            AlertEventKind::Escalated { sample, notify, .. },
        ) => *notify && sample.classification >= *min_level,
        _ => false,
    }
}

/// Cooldown window of a rule
pub fn cooldown_for(rule: &AlertRule, interval_secs: u64, config: &AlertConfig) -> chrono::Duration {
    let secs = match (&rule.cooldown_secs, &rule.condition) {
        (Some(secs), _) => *secs,
        (None, AlertCondition::Recurring { schedule }) => match schedule {
            RecurringSchedule::EverySecs(period) => {
                (*period).min(config.recurring_cooldown_secs)
            }
            _ => config.recurring_cooldown_secs,
        },
        (None, _) => interval_secs.saturating_mul(u64::from(config.cooldown_intervals)),
    };
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX).min(MAX_COOLDOWN_SECS))
}

/// Substitute `{name}` placeholders; unknown names render as `<missing:name>`
pub fn render(template: &str, vars: &Vars) -> String {
    let Some(placeholder) = PLACEHOLDER.as_ref() else {
        return template.to_string();
    };
    placeholder
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            vars.get(name)
                .cloned()
                .unwrap_or_else(|| format!("<missing:{name}>"))
        })
        .into_owned()
}

fn summary_vars(target: &TargetSummary, at: DateTime<Utc>) -> Vars {
    let mut vars = Vars::new();
    vars.insert("target_id", target.id.to_string());
    vars.insert("target_name", target.name.clone());
    vars.insert("target_kind", target.kind.to_string());
    vars.insert("target", target.identity.parameter());
    vars.insert("timestamp", at.to_rfc3339());
    vars
}

fn record_vars(vars: &mut Vars, record: &StatusRecord, failure_count: u32) {
    vars.insert("status", record.status.to_string());
    vars.insert("consecutive_count", record.consecutive_count.to_string());
    vars.insert("failure_count", failure_count.to_string());
    vars.insert("last_status_change", record.last_status_change.to_rfc3339());
}

fn event_vars(event: &AlertEvent) -> Vars {
    let mut vars = summary_vars(&event.target, event.at);
    let name = &event.target.name;

    match &event.kind {
        AlertEventKind::Observed {
            record,
            transition,
            failure_count,
        } => {
            record_vars(&mut vars, record, *failure_count);
            let summary = match transition {
                Some(transition) => {
                    vars.insert("previous_status", transition.from.to_string());
                    format!("{name} changed from {} to {}", transition.from, transition.to)
                }
                None => format!(
                    "{name} has been {} for {} checks",
                    record.status, record.consecutive_count
                ),
            };
            vars.insert("summary", summary);
        }
        AlertEventKind::Escalated {
            sample, previous, ..
        } => {
            vars.insert("classification", sample.classification.to_string());
            vars.insert("previous_classification", previous.to_string());
            vars.insert("cpu_percent", format!("{:.1}", sample.cpu_percent));
            vars.insert("ram_mb", format!("{:.1}", sample.ram_mb));
            if let Some(ram) = sample.ram_percent {
                vars.insert("ram_percent", format!("{ram:.1}"));
            }
            if let Some(disk) = sample.disk_percent {
                vars.insert("disk_percent", format!("{disk:.1}"));
            }
            vars.insert(
                "summary",
                format!(
                    "{name} resource usage is {} (was {previous}): CPU {:.1}%, RAM {:.1} MB",
                    sample.classification, sample.cpu_percent, sample.ram_mb
                ),
            );
        }
    }
    vars
}

/// Handle for controlling the AlertActor
#[derive(Clone)]
pub struct AlertHandle {
    sender: mpsc::Sender<AlertCommand>,
}

impl AlertHandle {
    /// Spawn a new alert actor with its persisted rules and recipients
    pub fn spawn(
        rules: Vec<AlertRule>,
        recipients: Vec<Recipient>,
        sink: SharedSink,
        gateway: SharedGateway,
        clock: SharedClock,
        config: AlertConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);

        let mut actor = AlertActor::new(cmd_rx, sink, gateway, clock, config);
        for rule in rules {
            actor.register_rule(rule);
        }
        actor.set_recipients(recipients);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn dispatch(&self, event: AlertEvent) {
        if self.sender.send(AlertCommand::Evaluate(event)).await.is_err() {
            trace!("alert actor gone, event dropped");
        }
    }

    pub async fn upsert_rule(&self, rule: AlertRule) {
        let _ = self.sender.send(AlertCommand::UpsertRule(rule)).await;
    }

    pub async fn remove_rule(&self, id: RuleId) {
        let _ = self.sender.send(AlertCommand::RemoveRule(id)).await;
    }

    /// Forget a target; returns the ids of the rules that watched it
    pub async fn remove_target(&self, target_id: TargetId) -> Vec<RuleId> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(AlertCommand::RemoveTarget {
                target_id,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn update_target(&self, summary: TargetSummary) {
        let _ = self.sender.send(AlertCommand::UpdateTarget(summary)).await;
    }

    pub async fn list_rules(&self) -> Vec<AlertRule> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(AlertCommand::ListRules { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn set_recipients(&self, recipients: Vec<Recipient>) {
        let _ = self
            .sender
            .send(AlertCommand::SetRecipients(recipients))
            .await;
    }

    pub async fn set_sink(&self, sink: SharedSink) {
        let _ = self.sender.send(AlertCommand::SetSink(sink)).await;
    }

    /// Mute alerts, optionally until the given time
    pub async fn mute(&self, until: Option<DateTime<Utc>>) {
        let _ = self.sender.send(AlertCommand::Mute { until }).await;
    }

    pub async fn unmute(&self) {
        let _ = self.sender.send(AlertCommand::Unmute).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(AlertCommand::Shutdown).await;
    }
}
