//! Persistence gateway trait definition
//!
//! This module defines the core `PersistenceGateway` trait that every
//! durable store has to implement.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{HistoryQuery, PurgeStats, StatusSnapshot};
use crate::model::{
    AlertRule, ExecutionLog, MetricSample, NotificationTransport, Recipient, RecipientId, RuleId,
    TargetId, WatchTarget,
};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Trait for the engine's durable store
///
/// The engine keeps all live state in memory and writes through this trait.
/// Reads happen at startup (registry, rules, recipients, transport) and on
/// history requests from the management surface.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared by every target
/// loop, the script engine and the alert dispatcher.
///
/// ## Error Handling
///
/// Methods return `StorageResult<T>`. Callers on the monitoring path never
/// propagate these errors; see [`super::persist_with_retry`].
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    // ========================================================================
    // Targets
    // ========================================================================

    async fn upsert_target(&self, target: &WatchTarget) -> StorageResult<()>;

    /// Delete a target together with its latest status row
    ///
    /// History rows are kept.
    async fn delete_target(&self, id: TargetId) -> StorageResult<()>;

    async fn load_targets(&self) -> StorageResult<Vec<WatchTarget>>;

    // ========================================================================
    // Latest status
    // ========================================================================

    async fn save_status(&self, snapshot: &StatusSnapshot) -> StorageResult<()>;

    async fn load_status(&self, id: TargetId) -> StorageResult<Option<StatusSnapshot>>;

    async fn load_all_status(&self) -> StorageResult<Vec<StatusSnapshot>>;

    // ========================================================================
    // Append-only history
    // ========================================================================

    async fn append_execution(&self, log: &ExecutionLog) -> StorageResult<()>;

    async fn query_executions(&self, query: &HistoryQuery) -> StorageResult<Vec<ExecutionLog>>;

    async fn append_metric(&self, sample: &MetricSample) -> StorageResult<()>;

    async fn query_metrics(&self, query: &HistoryQuery) -> StorageResult<Vec<MetricSample>>;

    /// Delete execution logs and metric samples older than `before`
    async fn purge_history(&self, before: DateTime<Utc>) -> StorageResult<PurgeStats>;

    // ========================================================================
    // Alerting configuration
    // ========================================================================

    async fn upsert_rule(&self, rule: &AlertRule) -> StorageResult<()>;

    async fn delete_rule(&self, id: RuleId) -> StorageResult<()>;

    async fn load_rules(&self) -> StorageResult<Vec<AlertRule>>;

    async fn record_rule_fired(&self, id: RuleId, at: DateTime<Utc>) -> StorageResult<()>;

    async fn upsert_recipient(&self, recipient: &Recipient) -> StorageResult<()>;

    async fn delete_recipient(&self, id: RecipientId) -> StorageResult<()>;

    async fn load_recipients(&self) -> StorageResult<Vec<Recipient>>;

    async fn save_transport(&self, transport: &NotificationTransport) -> StorageResult<()>;

    async fn load_transport(&self) -> StorageResult<Option<NotificationTransport>>;

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Performs a lightweight operation to verify the backend is operational
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
