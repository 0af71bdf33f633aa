//! Core data model
//!
//! Everything the engine persists or passes between components lives here:
//! watch targets and their kind-specific identity, the status snapshot, script
//! bindings with their per-direction runtime counters, threshold settings,
//! alert rules, recipients and the append-only history rows.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TargetId = Uuid;
pub type RuleId = Uuid;
pub type RecipientId = Uuid;
pub type JobId = Uuid;

/// Exit code recorded when a script is killed after exceeding its timeout
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Exit code recorded when no process could be spawned
pub const LAUNCH_ERROR_EXIT_CODE: i32 = -2;

/// Exit code recorded when a script was terminated by cancellation or a signal
pub const TERMINATED_EXIT_CODE: i32 = -3;

// ============================================================================
// Targets
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Port,
    Process,
    Service,
    System,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetKind::Port => write!(f, "port"),
            TargetKind::Process => write!(f, "process"),
            TargetKind::Service => write!(f, "service"),
            TargetKind::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemResource {
    Cpu,
    Ram,
    Disk,
}

/// Kind-specific identity of a watch target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetIdentity {
    Port {
        port: u16,
    },
    Process {
        #[serde(default)]
        pid: Option<u32>,
        #[serde(default)]
        name: Option<String>,
    },
    Service {
        service_name: String,
    },
    System {
        resource: SystemResource,
        #[serde(default)]
        drive: Option<String>,
    },
}

impl TargetIdentity {
    pub fn kind(&self) -> TargetKind {
        match self {
            TargetIdentity::Port { .. } => TargetKind::Port,
            TargetIdentity::Process { .. } => TargetKind::Process,
            TargetIdentity::Service { .. } => TargetKind::Service,
            TargetIdentity::System { .. } => TargetKind::System,
        }
    }

    /// The value handed to recovery scripts as their primary parameter
    pub fn parameter(&self) -> String {
        match self {
            TargetIdentity::Port { port } => port.to_string(),
            TargetIdentity::Process { pid: Some(pid), .. } => pid.to_string(),
            TargetIdentity::Process {
                pid: None,
                name: Some(name),
            } => name.clone(),
            TargetIdentity::Process {
                pid: None,
                name: None,
            } => String::new(),
            TargetIdentity::Service { service_name } => service_name.clone(),
            TargetIdentity::System {
                resource,
                drive: Some(drive),
            } => format!("{resource:?}:{drive}").to_lowercase(),
            TargetIdentity::System { resource, drive: None } => format!("{resource:?}").to_lowercase(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            TargetIdentity::Port { port: 0 } => Err("port number must be in 1..=65535".to_string()),
            TargetIdentity::Process {
                pid: None,
                name: None,
            } => Err("process target needs a pid or a name".to_string()),
            TargetIdentity::Service { service_name } if service_name.trim().is_empty() => {
                Err("service name must not be empty".to_string())
            }
            TargetIdentity::System {
                resource: SystemResource::Disk,
                drive: None,
            } => Err("disk targets need a drive".to_string()),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for TargetIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetIdentity::Port { port } => write!(f, "port {port}"),
            TargetIdentity::Process { pid, name } => match (pid, name) {
                (Some(pid), Some(name)) => write!(f, "process {name} ({pid})"),
                (Some(pid), None) => write!(f, "process {pid}"),
                (None, Some(name)) => write!(f, "process {name}"),
                (None, None) => write!(f, "process <unset>"),
            },
            TargetIdentity::Service { service_name } => write!(f, "service {service_name}"),
            TargetIdentity::System { resource, drive } => match drive {
                Some(drive) => write!(f, "system {resource:?} {drive}"),
                None => write!(f, "system {resource:?}"),
            },
        }
    }
}

/// A monitored entity with its configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchTarget {
    pub id: TargetId,

    #[serde(default)]
    pub name: Option<String>,

    pub identity: TargetIdentity,

    /// Base probe interval in seconds
    pub monitoring_interval_secs: u64,

    /// Auto-execute / monitoring switch
    pub enabled: bool,

    #[serde(default)]
    pub scripts: ScriptBindings,

    #[serde(default)]
    pub thresholds: Option<ThresholdConfig>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WatchTarget {
    pub fn kind(&self) -> TargetKind {
        self.identity.kind()
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.identity.to_string())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.monitoring_interval_secs.max(1))
    }
}

/// Input for creating a target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSpec {
    #[serde(default)]
    pub name: Option<String>,

    pub identity: TargetIdentity,

    #[serde(default = "default_monitoring_interval")]
    pub monitoring_interval_secs: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub scripts: ScriptBindings,

    #[serde(default)]
    pub thresholds: Option<ThresholdConfig>,
}

impl TargetSpec {
    pub fn new(identity: TargetIdentity) -> Self {
        Self {
            name: None,
            identity,
            monitoring_interval_secs: default_monitoring_interval(),
            enabled: true,
            scripts: ScriptBindings::default(),
            thresholds: None,
        }
    }

    pub fn into_target(self, id: TargetId, now: DateTime<Utc>) -> WatchTarget {
        WatchTarget {
            id,
            name: self.name,
            identity: self.identity,
            monitoring_interval_secs: self.monitoring_interval_secs,
            enabled: self.enabled,
            scripts: self.scripts,
            thresholds: self.thresholds,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a target; `None` leaves a field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetUpdate {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub monitoring_interval_secs: Option<u64>,

    #[serde(default)]
    pub enabled: Option<bool>,

    #[serde(default)]
    pub scripts: Option<ScriptBindings>,

    /// `Some(None)` removes the threshold configuration
    #[serde(default)]
    pub thresholds: Option<Option<ThresholdConfig>>,

    /// Reset executions_used and retry counters for both directions
    #[serde(default)]
    pub reset_executions: bool,
}

fn default_monitoring_interval() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Unknown,
    Running,
    Stopped,
}

impl Status {
    pub fn is_known(self) -> bool {
        self != Status::Unknown
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Unknown => write!(f, "unknown"),
            Status::Running => write!(f, "running"),
            Status::Stopped => write!(f, "stopped"),
        }
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Status::Unknown),
            "running" => Ok(Status::Running),
            "stopped" => Ok(Status::Stopped),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

/// Current status snapshot of one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Latest reported status (Unknown after a failed probe)
    pub status: Status,

    /// Last known status the consecutive count belongs to
    pub last_known_status: Status,

    /// Consecutive identical known observations (always >= 1)
    pub consecutive_count: u32,

    pub last_status_change: DateTime<Utc>,

    pub last_checked_at: Option<DateTime<Utc>>,
}

impl StatusRecord {
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            status: Status::Unknown,
            last_known_status: Status::Unknown,
            consecutive_count: 1,
            last_status_change: now,
            last_checked_at: None,
        }
    }
}

// ============================================================================
// Scripts
// ============================================================================

/// Which status direction runs recovery scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOn {
    #[default]
    Stopped,
    Running,
    Both,
}

impl TriggerOn {
    pub fn matches(self, status: Status) -> bool {
        match (self, status) {
            (_, Status::Unknown) => false,
            (TriggerOn::Both, _) => true,
            (TriggerOn::Stopped, Status::Stopped) => true,
            (TriggerOn::Running, Status::Running) => true,
            _ => false,
        }
    }
}

/// Where the recovery script comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptSource {
    Inline { content: String },
    File { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptConfig {
    pub source: ScriptSource,

    /// Consecutive observations required before firing
    #[serde(default = "default_duration_threshold")]
    pub duration_threshold: u32,

    /// Ceiling of executions since the last reset
    #[serde(default = "default_max_executions")]
    pub max_executions: u32,

    /// Interval backoff factor after failed executions
    #[serde(default = "default_retry_interval_multiplier")]
    pub retry_interval_multiplier: u32,
}

impl ScriptConfig {
    pub fn new(source: ScriptSource) -> Self {
        Self {
            source,
            duration_threshold: default_duration_threshold(),
            max_executions: default_max_executions(),
            retry_interval_multiplier: default_retry_interval_multiplier(),
        }
    }
}

fn default_duration_threshold() -> u32 {
    1
}

fn default_max_executions() -> u32 {
    5
}

fn default_retry_interval_multiplier() -> u32 {
    10
}

/// Recovery scripts of one target, at most one per status direction
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScriptBindings {
    #[serde(default)]
    pub trigger_on_status: TriggerOn,

    #[serde(default)]
    pub stopped: Option<ScriptConfig>,

    #[serde(default)]
    pub running: Option<ScriptConfig>,
}

impl ScriptBindings {
    pub fn for_status(&self, status: Status) -> Option<&ScriptConfig> {
        match status {
            Status::Stopped => self.stopped.as_ref(),
            Status::Running => self.running.as_ref(),
            Status::Unknown => None,
        }
    }
}

/// Runtime counters of one status direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScriptCounters {
    /// Completed executions since the last reset
    pub executions_used: u32,

    /// Consecutive failed executions (drives interval backoff)
    pub retry_count: u32,

    /// Consecutive count at which the last job was submitted
    pub last_attempt_count: Option<u32>,
}

impl ScriptCounters {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirectionCounters {
    pub stopped: ScriptCounters,
    pub running: ScriptCounters,
}

impl DirectionCounters {
    pub fn get(&self, status: Status) -> Option<&ScriptCounters> {
        match status {
            Status::Stopped => Some(&self.stopped),
            Status::Running => Some(&self.running),
            Status::Unknown => None,
        }
    }

    pub fn get_mut(&mut self, status: Status) -> Option<&mut ScriptCounters> {
        match status {
            Status::Stopped => Some(&mut self.stopped),
            Status::Running => Some(&mut self.running),
            Status::Unknown => None,
        }
    }
}

// ============================================================================
// Thresholds
// ============================================================================

/// How per-process metrics of a multi-process target are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    #[default]
    Sum,
    Max,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default)]
    pub cpu_threshold: Option<f32>,

    #[serde(default)]
    pub ram_threshold: Option<f32>,

    /// Only meaningful for disk system targets
    #[serde(default)]
    pub disk_threshold: Option<f32>,

    #[serde(default = "default_true")]
    pub email_alerts_enabled: bool,

    /// Overrides the engine-wide critical multiplier
    #[serde(default)]
    pub critical_multiplier: Option<f32>,

    /// Overrides the engine-wide aggregation policy
    #[serde(default)]
    pub aggregation: Option<AggregationPolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    #[default]
    Normal,
    Warning,
    Critical,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Normal => write!(f, "normal"),
            Classification::Warning => write!(f, "warning"),
            Classification::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Classification::Normal),
            "warning" => Ok(Classification::Warning),
            "critical" => Ok(Classification::Critical),
            other => Err(format!("unknown classification '{other}'")),
        }
    }
}

// ============================================================================
// Alerts
// ============================================================================

/// Schedule of a recurring alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurringSchedule {
    /// Fixed period in seconds
    EverySecs(u64),

    /// Every day at the given UTC time ("HH:MM:SS")
    DailyAt(NaiveTime),

    /// Every week on the given day at the given UTC time
    Weekly { weekday: Weekday, at: NaiveTime },

    /// Cron expression evaluated in UTC
    ///
    /// The classic five fields (minute, hour, day of month, month, day of
    /// week) are accepted; a leading seconds field is optional.
    Cron(String),
}

/// Longest accepted `every_secs` period (one year)
pub const MAX_RECURRING_PERIOD_SECS: u64 = 366 * 24 * 3600;

/// Parse a cron expression with five or six/seven fields
pub fn parse_cron(expr: &str) -> Result<cron::Schedule, String> {
    let fields = expr.split_whitespace().count();
    let normalized = match fields {
        5 => format!("0 {}", expr.trim()),
        6 | 7 => expr.trim().to_string(),
        n => return Err(format!("cron expression '{expr}' has {n} fields, expected 5")),
    };
    cron::Schedule::from_str(&normalized)
        .map_err(|e| format!("invalid cron expression '{expr}': {e}"))
}

impl RecurringSchedule {
    /// Reject schedules that can never be computed
    pub fn validate(&self) -> Result<(), String> {
        match self {
            RecurringSchedule::EverySecs(0) => Err("every_secs must be at least 1".to_string()),
            RecurringSchedule::EverySecs(secs) if *secs > MAX_RECURRING_PERIOD_SECS => {
                Err(format!("every_secs must not exceed {MAX_RECURRING_PERIOD_SECS}"))
            }
            RecurringSchedule::Cron(expr) => parse_cron(expr).map(|_| ()),
            _ => Ok(()),
        }
    }

    /// First occurrence strictly after `after`; `None` if there is none
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            RecurringSchedule::EverySecs(secs) => {
                let secs = i64::try_from((*secs).max(1)).ok()?;
                after.checked_add_signed(chrono::Duration::try_seconds(secs)?)
            }
            RecurringSchedule::DailyAt(at) => {
                let today = after.date_naive().and_time(*at).and_utc();
                if today > after {
                    Some(today)
                } else {
                    today.checked_add_signed(chrono::Duration::days(1))
                }
            }
            RecurringSchedule::Weekly { weekday, at } => {
                let days_ahead = (weekday.num_days_from_monday() as i64
                    - after.weekday().num_days_from_monday() as i64)
                    .rem_euclid(7);
                let candidate = after
                    .date_naive()
                    .checked_add_signed(chrono::Duration::days(days_ahead))?
                    .and_time(*at)
                    .and_utc();
                if candidate > after {
                    Some(candidate)
                } else {
                    candidate.checked_add_signed(chrono::Duration::days(7))
                }
            }
            RecurringSchedule::Cron(expr) => parse_cron(expr).ok()?.after(&after).next(),
        }
    }
}

/// Alert condition together with its condition-specific payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition", content = "value", rename_all = "snake_case")]
pub enum AlertCondition {
    /// Transition between known statuses; `None` matches any
    StatusChange {
        #[serde(default)]
        from_status: Option<Status>,
        #[serde(default)]
        to_status: Option<Status>,
    },

    /// `status` observed for `interval_count` consecutive intervals
    Duration { status: Status, interval_count: u32 },

    /// Threshold escalation reaching at least `min_level`
    Threshold {
        #[serde(default = "default_threshold_level")]
        min_level: Classification,
    },

    /// Independent of the target's status
    Recurring { schedule: RecurringSchedule },
}

fn default_threshold_level() -> Classification {
    Classification::Warning
}

impl AlertCondition {
    pub fn name(&self) -> &'static str {
        match self {
            AlertCondition::StatusChange { .. } => "status_change",
            AlertCondition::Duration { .. } => "duration",
            AlertCondition::Threshold { .. } => "threshold",
            AlertCondition::Recurring { .. } => "recurring",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: RuleId,

    pub name: String,

    pub monitored_item_type: TargetKind,

    pub monitored_item_id: TargetId,

    #[serde(flatten)]
    pub condition: AlertCondition,

    #[serde(default)]
    pub recipient_ids: Vec<RecipientId>,

    pub enabled: bool,

    /// Minimum time between firings; defaults to a multiple of the target interval
    #[serde(default)]
    pub cooldown_secs: Option<u64>,

    #[serde(default)]
    pub subject_template: Option<String>,

    #[serde(default)]
    pub body_template: Option<String>,

    #[serde(default)]
    pub last_fired_at: Option<DateTime<Utc>>,
}

/// Input for creating or replacing an alert rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleSpec {
    pub name: String,

    pub monitored_item_id: TargetId,

    #[serde(flatten)]
    pub condition: AlertCondition,

    #[serde(default)]
    pub recipient_ids: Vec<RecipientId>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub cooldown_secs: Option<u64>,

    #[serde(default)]
    pub subject_template: Option<String>,

    #[serde(default)]
    pub body_template: Option<String>,
}

impl AlertRuleSpec {
    pub fn into_rule(self, id: RuleId, item_type: TargetKind) -> AlertRule {
        AlertRule {
            id,
            name: self.name,
            monitored_item_type: item_type,
            monitored_item_id: self.monitored_item_id,
            condition: self.condition,
            recipient_ids: self.recipient_ids,
            enabled: self.enabled,
            cooldown_secs: self.cooldown_secs,
            subject_template: self.subject_template,
            body_template: self.body_template,
            last_fired_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub name: String,
    pub email: String,
    pub enabled: bool,
}

/// How notifications leave the engine
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum NotificationTransport {
    Smtp {
        host: String,
        #[serde(default = "default_smtp_port")]
        port: u16,
        from: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
    Webhook {
        url: String,
    },
    /// Notifications are only written to the log
    #[default]
    Log,
}

fn default_smtp_port() -> u16 {
    587
}

// ============================================================================
// History rows
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    Failed,
    LaunchError,
    Timeout,
    Cancelled,
}

impl ExecutionOutcome {
    pub fn is_success(self) -> bool {
        self == ExecutionOutcome::Success
    }
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionOutcome::Success => write!(f, "success"),
            ExecutionOutcome::Failed => write!(f, "failed"),
            ExecutionOutcome::LaunchError => write!(f, "launch_error"),
            ExecutionOutcome::Timeout => write!(f, "timeout"),
            ExecutionOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for ExecutionOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ExecutionOutcome::Success),
            "failed" => Ok(ExecutionOutcome::Failed),
            "launch_error" => Ok(ExecutionOutcome::LaunchError),
            "timeout" => Ok(ExecutionOutcome::Timeout),
            "cancelled" => Ok(ExecutionOutcome::Cancelled),
            other => Err(format!("unknown execution outcome '{other}'")),
        }
    }
}

/// One recovery script execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub job_id: JobId,
    pub target_id: TargetId,
    pub triggering_status: Status,
    pub outcome: ExecutionOutcome,
    pub exit_code: i32,
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    /// Captured stdout, at most `max_output_bytes`
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Consecutive failures before this execution
    pub retry_count: u32,
}

/// One threshold evaluation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub target_id: TargetId,
    pub pids: Vec<u32>,
    pub cpu_percent: f32,
    pub ram_mb: f64,
    pub ram_percent: Option<f32>,
    pub disk_percent: Option<f32>,
    pub classification: Classification,
    pub timestamp: DateTime<Utc>,
}
