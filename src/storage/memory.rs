//! In-memory persistence gateway (no durability)
//!
//! Used when the configuration selects `"backend": "none"` and throughout the
//! test suite. History tables are bounded ring buffers; when one is full the
//! oldest rows are evicted.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use super::backend::{HealthStatus, PersistenceGateway};
use super::error::StorageResult;
use super::schema::{HistoryQuery, PurgeStats, StatusSnapshot};
use crate::model::{
    AlertRule, ExecutionLog, MetricSample, NotificationTransport, Recipient, RecipientId, RuleId,
    TargetId, WatchTarget,
};

/// Maximum history rows kept per table
const MAX_HISTORY_ROWS: usize = 10_000;

#[derive(Debug, Default)]
struct MemoryState {
    targets: HashMap<TargetId, WatchTarget>,
    status: HashMap<TargetId, StatusSnapshot>,
    executions: VecDeque<ExecutionLog>,
    metrics: VecDeque<MetricSample>,
    rules: HashMap<RuleId, AlertRule>,
    recipients: HashMap<RecipientId, Recipient>,
    transport: Option<NotificationTransport>,
}

/// In-memory persistence gateway
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

fn select<T: Clone>(
    rows: &VecDeque<T>,
    query: &HistoryQuery,
    key: impl Fn(&T) -> (TargetId, DateTime<Utc>),
) -> Vec<T> {
    let mut selected: Vec<T> = rows
        .iter()
        .filter(|row| {
            let (target_id, at) = key(row);
            query.matches(target_id, at)
        })
        .cloned()
        .collect();

    if let Some(limit) = query.limit {
        let skip = selected.len().saturating_sub(limit);
        selected.drain(..skip);
    }

    selected
}

fn push_bounded<T>(rows: &mut VecDeque<T>, row: T) {
    if rows.len() == MAX_HISTORY_ROWS {
        rows.pop_front();
    }
    rows.push_back(row);
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn upsert_target(&self, target: &WatchTarget) -> StorageResult<()> {
        self.state
            .lock()
            .await
            .targets
            .insert(target.id, target.clone());
        Ok(())
    }

    async fn delete_target(&self, id: TargetId) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        state.targets.remove(&id);
        state.status.remove(&id);
        Ok(())
    }

    async fn load_targets(&self) -> StorageResult<Vec<WatchTarget>> {
        let mut targets: Vec<WatchTarget> =
            self.state.lock().await.targets.values().cloned().collect();
        targets.sort_by_key(|t| t.created_at);
        Ok(targets)
    }

    async fn save_status(&self, snapshot: &StatusSnapshot) -> StorageResult<()> {
        self.state
            .lock()
            .await
            .status
            .insert(snapshot.target_id, *snapshot);
        Ok(())
    }

    async fn load_status(&self, id: TargetId) -> StorageResult<Option<StatusSnapshot>> {
        Ok(self.state.lock().await.status.get(&id).copied())
    }

    async fn load_all_status(&self) -> StorageResult<Vec<StatusSnapshot>> {
        Ok(self.state.lock().await.status.values().copied().collect())
    }

    async fn append_execution(&self, log: &ExecutionLog) -> StorageResult<()> {
        push_bounded(&mut self.state.lock().await.executions, log.clone());
        Ok(())
    }

    async fn query_executions(&self, query: &HistoryQuery) -> StorageResult<Vec<ExecutionLog>> {
        let state = self.state.lock().await;
        Ok(select(&state.executions, query, |log| {
            (log.target_id, log.started_at)
        }))
    }

    async fn append_metric(&self, sample: &MetricSample) -> StorageResult<()> {
        push_bounded(&mut self.state.lock().await.metrics, sample.clone());
        Ok(())
    }

    async fn query_metrics(&self, query: &HistoryQuery) -> StorageResult<Vec<MetricSample>> {
        let state = self.state.lock().await;
        Ok(select(&state.metrics, query, |sample| {
            (sample.target_id, sample.timestamp)
        }))
    }

    async fn purge_history(&self, before: DateTime<Utc>) -> StorageResult<PurgeStats> {
        let mut state = self.state.lock().await;

        let executions = state.executions.len();
        state.executions.retain(|log| log.ended_at >= before);
        let metrics = state.metrics.len();
        state.metrics.retain(|sample| sample.timestamp >= before);

        let stats = PurgeStats {
            executions: (executions - state.executions.len()) as u64,
            metrics: (metrics - state.metrics.len()) as u64,
        };
        debug!(?stats, "purged in-memory history");
        Ok(stats)
    }

    async fn upsert_rule(&self, rule: &AlertRule) -> StorageResult<()> {
        self.state.lock().await.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn delete_rule(&self, id: RuleId) -> StorageResult<()> {
        self.state.lock().await.rules.remove(&id);
        Ok(())
    }

    async fn load_rules(&self) -> StorageResult<Vec<AlertRule>> {
        Ok(self.state.lock().await.rules.values().cloned().collect())
    }

    async fn record_rule_fired(&self, id: RuleId, at: DateTime<Utc>) -> StorageResult<()> {
        if let Some(rule) = self.state.lock().await.rules.get_mut(&id) {
            rule.last_fired_at = Some(at);
        }
        Ok(())
    }

    async fn upsert_recipient(&self, recipient: &Recipient) -> StorageResult<()> {
        self.state
            .lock()
            .await
            .recipients
            .insert(recipient.id, recipient.clone());
        Ok(())
    }

    async fn delete_recipient(&self, id: RecipientId) -> StorageResult<()> {
        self.state.lock().await.recipients.remove(&id);
        Ok(())
    }

    async fn load_recipients(&self) -> StorageResult<Vec<Recipient>> {
        Ok(self.state.lock().await.recipients.values().cloned().collect())
    }

    async fn save_transport(&self, transport: &NotificationTransport) -> StorageResult<()> {
        self.state.lock().await.transport = Some(transport.clone());
        Ok(())
    }

    async fn load_transport(&self) -> StorageResult<Option<NotificationTransport>> {
        Ok(self.state.lock().await.transport.clone())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let state = self.state.lock().await;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("targets".to_string(), state.targets.len().to_string()),
                ("executions".to_string(), state.executions.len().to_string()),
                ("metrics".to_string(), state.metrics.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
