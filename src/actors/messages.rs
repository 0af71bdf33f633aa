//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to one actor via mpsc
//! 2. **Events**: Facts produced by a target loop and handed to the alert
//!    dispatcher; they carry everything needed to render a notification

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::model::{
    AlertRule, Classification, MetricSample, Recipient, RuleId, StatusRecord, TargetId,
    TargetIdentity, TargetKind, WatchTarget,
};
use crate::monitors::state::Transition;
use crate::notify::SharedSink;

/// Identity of the target an event is about
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSummary {
    pub id: TargetId,
    pub name: String,
    pub kind: TargetKind,
    pub identity: TargetIdentity,
    pub monitoring_interval_secs: u64,
}

impl From<&WatchTarget> for TargetSummary {
    fn from(target: &WatchTarget) -> Self {
        Self {
            id: target.id,
            name: target.display_name(),
            kind: target.kind(),
            identity: target.identity.clone(),
            monitoring_interval_secs: target.monitoring_interval_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertEventKind {
    /// A successful probe updated the status record
    Observed {
        record: StatusRecord,
        transition: Option<Transition>,
        /// Consecutive failed recovery attempts in the current direction
        failure_count: u32,
    },

    /// The threshold evaluator classified a target higher than before
    Escalated {
        sample: MetricSample,
        previous: Classification,
        /// `email_alerts_enabled` of the target's threshold config
        notify: bool,
    },
}

/// Event published by a target loop for the alert dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub target: TargetSummary,
    pub kind: AlertEventKind,
    pub at: DateTime<Utc>,
}

/// Commands that can be sent to a target loop
#[derive(Debug)]
pub enum TargetCommand {
    /// Run one cycle immediately, bypassing the deadline
    CheckNow {
        respond_to: oneshot::Sender<StatusRecord>,
    },

    /// The target's interval changed; recompute the next deadline
    Reschedule,

    /// Stop the loop, cancelling an in-flight recovery script
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Commands that can be sent to the AlertActor
#[derive(Debug)]
pub enum AlertCommand {
    Evaluate(AlertEvent),

    UpsertRule(AlertRule),

    RemoveRule(RuleId),

    /// Drop every rule watching a deleted target
    RemoveTarget {
        target_id: TargetId,
        respond_to: oneshot::Sender<Vec<RuleId>>,
    },

    /// Keep a target's summary current for recurring rules
    UpdateTarget(TargetSummary),

    ListRules {
        respond_to: oneshot::Sender<Vec<AlertRule>>,
    },

    SetRecipients(Vec<Recipient>),

    SetSink(SharedSink),

    /// Suppress all rules, optionally until the given time
    Mute { until: Option<DateTime<Utc>> },

    Unmute,

    Shutdown,
}

