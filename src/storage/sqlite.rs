//! SQLite persistence gateway
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers of the history tables do not block status writes
//! - **Connection pooling**: Shared by all target loops
//! - **Migrations**: Additive schema versioning with sqlx, applied before any
//!   monitoring loop starts
//!
//! ## Schema
//!
//! Hybrid layout: columns for everything that is filtered or ordered on
//! (ids, timestamps, status), JSON text for nested configuration (target
//! identity, script bindings, thresholds, alert condition payloads).
//! Timestamps are stored as Unix milliseconds.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::backend::{HealthStatus, PersistenceGateway};
use super::error::{StorageError, StorageResult};
use super::schema::{HistoryQuery, PurgeStats, StatusSnapshot};
use crate::model::{
    AlertRule, ExecutionLog, MetricSample, NotificationTransport, Recipient, RecipientId, RuleId,
    StatusRecord, TargetId, WatchTarget,
};

/// SQLite persistence gateway
pub struct SqliteGateway {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteGateway {
    /// Open (or create) the database and run migrations
    ///
    /// Failing here is the one fatal error of the engine.
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> StorageResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| StorageError::SerializationError(format!("invalid timestamp {millis}")))
    }

    fn optional_timestamp(millis: Option<i64>) -> StorageResult<Option<DateTime<Utc>>> {
        millis.map(Self::millis_to_timestamp).transpose()
    }
}

fn parse_uuid(value: &str) -> StorageResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| StorageError::SerializationError(format!("{value}: {e}")))
}

fn parse_text<T: FromStr<Err = String>>(value: &str) -> StorageResult<T> {
    value.parse().map_err(StorageError::SerializationError)
}

/// Decode a unit enum stored by its serde name
fn parse_serde_name<T: DeserializeOwned>(value: String) -> StorageResult<T> {
    Ok(serde_json::from_value(serde_json::Value::String(value))?)
}

fn serde_name<T: serde::Serialize>(value: &T) -> StorageResult<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(name) => Ok(name),
        other => Err(StorageError::SerializationError(format!(
            "expected a unit variant, got {other}"
        ))),
    }
}

fn push_history_filter(
    builder: &mut QueryBuilder<'_, Sqlite>,
    query: &HistoryQuery,
    time_column: &str,
) {
    builder.push(" WHERE 1 = 1");
    if let Some(target_id) = query.target_id {
        builder.push(" AND target_id = ");
        builder.push_bind(target_id.to_string());
    }
    if let Some(since) = query.since {
        builder.push(format!(" AND {time_column} >= "));
        builder.push_bind(SqliteGateway::timestamp_to_millis(&since));
    }
    if let Some(until) = query.until {
        builder.push(format!(" AND {time_column} <= "));
        builder.push_bind(SqliteGateway::timestamp_to_millis(&until));
    }
    builder.push(format!(" ORDER BY {time_column} DESC"));
    if let Some(limit) = query.limit {
        builder.push(" LIMIT ");
        builder.push_bind(limit as i64);
    }
}

fn target_from_row(row: &SqliteRow) -> StorageResult<WatchTarget> {
    let thresholds: Option<String> = row.try_get("thresholds")?;
    Ok(WatchTarget {
        id: parse_uuid(row.try_get("id")?)?,
        name: row.try_get("name")?,
        identity: serde_json::from_str(row.try_get("identity")?)?,
        monitoring_interval_secs: row.try_get::<i64, _>("monitoring_interval_secs")? as u64,
        enabled: row.try_get("enabled")?,
        scripts: serde_json::from_str(row.try_get("scripts")?)?,
        thresholds: thresholds.as_deref().map(serde_json::from_str).transpose()?,
        created_at: SqliteGateway::millis_to_timestamp(row.try_get("created_at")?)?,
        updated_at: SqliteGateway::millis_to_timestamp(row.try_get("updated_at")?)?,
    })
}

fn status_from_row(row: &SqliteRow) -> StorageResult<StatusSnapshot> {
    Ok(StatusSnapshot {
        target_id: parse_uuid(row.try_get("target_id")?)?,
        record: StatusRecord {
            status: parse_text(row.try_get("status")?)?,
            last_known_status: parse_text(row.try_get("last_known_status")?)?,
            consecutive_count: row.try_get::<i64, _>("consecutive_count")? as u32,
            last_status_change: SqliteGateway::millis_to_timestamp(
                row.try_get("last_status_change")?,
            )?,
            last_checked_at: SqliteGateway::optional_timestamp(row.try_get("last_checked_at")?)?,
        },
        counters: serde_json::from_str(row.try_get("counters")?)?,
        classification: parse_text(row.try_get("classification")?)?,
    })
}

fn execution_from_row(row: &SqliteRow) -> StorageResult<ExecutionLog> {
    Ok(ExecutionLog {
        job_id: parse_uuid(row.try_get("job_id")?)?,
        target_id: parse_uuid(row.try_get("target_id")?)?,
        triggering_status: parse_text(row.try_get("triggering_status")?)?,
        outcome: parse_text(row.try_get("outcome")?)?,
        exit_code: row.try_get::<i64, _>("exit_code")? as i32,
        stdout_bytes: row.try_get::<i64, _>("stdout_bytes")? as u64,
        stderr_bytes: row.try_get::<i64, _>("stderr_bytes")? as u64,
        stdout_truncated: row.try_get("stdout_truncated")?,
        stderr_truncated: row.try_get("stderr_truncated")?,
        stdout: row.try_get("stdout")?,
        stderr: row.try_get("stderr")?,
        error_message: row.try_get("error_message")?,
        started_at: SqliteGateway::millis_to_timestamp(row.try_get("started_at")?)?,
        ended_at: SqliteGateway::millis_to_timestamp(row.try_get("ended_at")?)?,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
    })
}

fn metric_from_row(row: &SqliteRow) -> StorageResult<MetricSample> {
    Ok(MetricSample {
        target_id: parse_uuid(row.try_get("target_id")?)?,
        pids: serde_json::from_str(row.try_get("pids")?)?,
        cpu_percent: row.try_get::<f64, _>("cpu_percent")? as f32,
        ram_mb: row.try_get("ram_mb")?,
        ram_percent: row.try_get::<Option<f64>, _>("ram_percent")?.map(|v| v as f32),
        disk_percent: row.try_get::<Option<f64>, _>("disk_percent")?.map(|v| v as f32),
        classification: parse_text(row.try_get("classification")?)?,
        timestamp: SqliteGateway::millis_to_timestamp(row.try_get("timestamp")?)?,
    })
}

fn rule_from_row(row: &SqliteRow) -> StorageResult<AlertRule> {
    let condition: String = row.try_get("condition")?;
    let value: serde_json::Value = serde_json::from_str(row.try_get("condition_value")?)?;
    let condition = serde_json::from_value(serde_json::json!({
        "condition": condition,
        "value": value,
    }))?;

    Ok(AlertRule {
        id: parse_uuid(row.try_get("id")?)?,
        name: row.try_get("name")?,
        monitored_item_type: parse_serde_name(row.try_get("monitored_item_type")?)?,
        monitored_item_id: parse_uuid(row.try_get("monitored_item_id")?)?,
        condition,
        recipient_ids: serde_json::from_str(row.try_get("recipient_ids")?)?,
        enabled: row.try_get("enabled")?,
        cooldown_secs: row.try_get::<Option<i64>, _>("cooldown_secs")?.map(|v| v as u64),
        subject_template: row.try_get("subject_template")?,
        body_template: row.try_get("body_template")?,
        last_fired_at: SqliteGateway::optional_timestamp(row.try_get("last_fired_at")?)?,
    })
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    #[instrument(skip_all, fields(target_id = %target.id))]
    async fn upsert_target(&self, target: &WatchTarget) -> StorageResult<()> {
        let thresholds = target
            .thresholds
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO targets (
                id, kind, name, identity, monitoring_interval_secs, enabled,
                scripts, thresholds, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                kind = excluded.kind,
                name = excluded.name,
                identity = excluded.identity,
                monitoring_interval_secs = excluded.monitoring_interval_secs,
                enabled = excluded.enabled,
                scripts = excluded.scripts,
                thresholds = excluded.thresholds,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(target.id.to_string())
        .bind(target.kind().to_string())
        .bind(&target.name)
        .bind(serde_json::to_string(&target.identity)?)
        .bind(target.monitoring_interval_secs as i64)
        .bind(target.enabled)
        .bind(serde_json::to_string(&target.scripts)?)
        .bind(thresholds)
        .bind(Self::timestamp_to_millis(&target.created_at))
        .bind(Self::timestamp_to_millis(&target.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_target(&self, id: TargetId) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM target_status WHERE target_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM targets WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load_targets(&self) -> StorageResult<Vec<WatchTarget>> {
        let rows = sqlx::query("SELECT * FROM targets ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(target_from_row).collect()
    }

    #[instrument(skip_all, fields(target_id = %snapshot.target_id))]
    async fn save_status(&self, snapshot: &StatusSnapshot) -> StorageResult<()> {
        let record = &snapshot.record;

        sqlx::query(
            r#"
            INSERT INTO target_status (
                target_id, status, last_known_status, consecutive_count,
                last_status_change, last_checked_at, counters, classification
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (target_id) DO UPDATE SET
                status = excluded.status,
                last_known_status = excluded.last_known_status,
                consecutive_count = excluded.consecutive_count,
                last_status_change = excluded.last_status_change,
                last_checked_at = excluded.last_checked_at,
                counters = excluded.counters,
                classification = excluded.classification
            "#,
        )
        .bind(snapshot.target_id.to_string())
        .bind(record.status.to_string())
        .bind(record.last_known_status.to_string())
        .bind(record.consecutive_count as i64)
        .bind(Self::timestamp_to_millis(&record.last_status_change))
        .bind(record.last_checked_at.as_ref().map(Self::timestamp_to_millis))
        .bind(serde_json::to_string(&snapshot.counters)?)
        .bind(snapshot.classification.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_status(&self, id: TargetId) -> StorageResult<Option<StatusSnapshot>> {
        let row = sqlx::query("SELECT * FROM target_status WHERE target_id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(status_from_row).transpose()
    }

    async fn load_all_status(&self) -> StorageResult<Vec<StatusSnapshot>> {
        let rows = sqlx::query("SELECT * FROM target_status")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(status_from_row).collect()
    }

    #[instrument(skip_all, fields(job_id = %log.job_id, target_id = %log.target_id))]
    async fn append_execution(&self, log: &ExecutionLog) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_logs (
                job_id, target_id, triggering_status, outcome, exit_code,
                stdout_bytes, stderr_bytes, stdout_truncated, stderr_truncated,
                stdout, stderr, error_message, started_at, ended_at, retry_count
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(log.job_id.to_string())
        .bind(log.target_id.to_string())
        .bind(log.triggering_status.to_string())
        .bind(log.outcome.to_string())
        .bind(log.exit_code as i64)
        .bind(log.stdout_bytes as i64)
        .bind(log.stderr_bytes as i64)
        .bind(log.stdout_truncated)
        .bind(log.stderr_truncated)
        .bind(&log.stdout)
        .bind(&log.stderr)
        .bind(&log.error_message)
        .bind(Self::timestamp_to_millis(&log.started_at))
        .bind(Self::timestamp_to_millis(&log.ended_at))
        .bind(log.retry_count as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query_executions(&self, query: &HistoryQuery) -> StorageResult<Vec<ExecutionLog>> {
        let mut builder = QueryBuilder::new("SELECT * FROM execution_logs");
        push_history_filter(&mut builder, query, "started_at");

        let rows = builder.build().fetch_all(&self.pool).await?;

        let mut logs = rows
            .iter()
            .map(execution_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        // Reverse to get chronological order (oldest first)
        logs.reverse();
        Ok(logs)
    }

    #[instrument(skip_all, fields(target_id = %sample.target_id))]
    async fn append_metric(&self, sample: &MetricSample) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO metric_samples (
                target_id, timestamp, pids, cpu_percent, ram_mb,
                ram_percent, disk_percent, classification
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(sample.target_id.to_string())
        .bind(Self::timestamp_to_millis(&sample.timestamp))
        .bind(serde_json::to_string(&sample.pids)?)
        .bind(sample.cpu_percent as f64)
        .bind(sample.ram_mb)
        .bind(sample.ram_percent.map(|v| v as f64))
        .bind(sample.disk_percent.map(|v| v as f64))
        .bind(sample.classification.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query_metrics(&self, query: &HistoryQuery) -> StorageResult<Vec<MetricSample>> {
        let mut builder = QueryBuilder::new("SELECT * FROM metric_samples");
        push_history_filter(&mut builder, query, "timestamp");

        let rows = builder.build().fetch_all(&self.pool).await?;

        let mut samples = rows
            .iter()
            .map(metric_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        samples.reverse();
        Ok(samples)
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn purge_history(&self, before: DateTime<Utc>) -> StorageResult<PurgeStats> {
        let before_millis = Self::timestamp_to_millis(&before);

        info!("purging history older than {}", before);

        let executions = sqlx::query("DELETE FROM execution_logs WHERE ended_at < ?")
            .bind(before_millis)
            .execute(&self.pool)
            .await?
            .rows_affected();

        let metrics = sqlx::query("DELETE FROM metric_samples WHERE timestamp < ?")
            .bind(before_millis)
            .execute(&self.pool)
            .await?
            .rows_affected();

        info!(executions, metrics, "history purge complete");
        Ok(PurgeStats {
            executions,
            metrics,
        })
    }

    #[instrument(skip_all, fields(rule_id = %rule.id))]
    async fn upsert_rule(&self, rule: &AlertRule) -> StorageResult<()> {
        let condition = serde_json::to_value(&rule.condition)?;
        let condition_name = rule.condition.name();
        let condition_value = condition
            .get("value")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        sqlx::query(
            r#"
            INSERT INTO alert_rules (
                id, name, monitored_item_type, monitored_item_id, condition,
                condition_value, recipient_ids, enabled, cooldown_secs,
                subject_template, body_template, last_fired_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                monitored_item_type = excluded.monitored_item_type,
                monitored_item_id = excluded.monitored_item_id,
                condition = excluded.condition,
                condition_value = excluded.condition_value,
                recipient_ids = excluded.recipient_ids,
                enabled = excluded.enabled,
                cooldown_secs = excluded.cooldown_secs,
                subject_template = excluded.subject_template,
                body_template = excluded.body_template,
                last_fired_at = excluded.last_fired_at
            "#,
        )
        .bind(rule.id.to_string())
        .bind(&rule.name)
        .bind(serde_name(&rule.monitored_item_type)?)
        .bind(rule.monitored_item_id.to_string())
        .bind(condition_name)
        .bind(condition_value.to_string())
        .bind(serde_json::to_string(&rule.recipient_ids)?)
        .bind(rule.enabled)
        .bind(rule.cooldown_secs.map(|v| v as i64))
        .bind(&rule.subject_template)
        .bind(&rule.body_template)
        .bind(rule.last_fired_at.as_ref().map(Self::timestamp_to_millis))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_rule(&self, id: RuleId) -> StorageResult<()> {
        sqlx::query("DELETE FROM alert_rules WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_rules(&self) -> StorageResult<Vec<AlertRule>> {
        let rows = sqlx::query("SELECT * FROM alert_rules")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(rule_from_row).collect()
    }

    async fn record_rule_fired(&self, id: RuleId, at: DateTime<Utc>) -> StorageResult<()> {
        sqlx::query("UPDATE alert_rules SET last_fired_at = ? WHERE id = ?")
            .bind(Self::timestamp_to_millis(&at))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_recipient(&self, recipient: &Recipient) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO recipients (id, name, email, enabled)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                enabled = excluded.enabled
            "#,
        )
        .bind(recipient.id.to_string())
        .bind(&recipient.name)
        .bind(&recipient.email)
        .bind(recipient.enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_recipient(&self, id: RecipientId) -> StorageResult<()> {
        sqlx::query("DELETE FROM recipients WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_recipients(&self) -> StorageResult<Vec<Recipient>> {
        let rows = sqlx::query("SELECT * FROM recipients ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Recipient {
                    id: parse_uuid(row.try_get("id")?)?,
                    name: row.try_get("name")?,
                    email: row.try_get("email")?,
                    enabled: row.try_get("enabled")?,
                })
            })
            .collect()
    }

    async fn save_transport(&self, transport: &NotificationTransport) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_transport (id, config) VALUES (1, ?)
            ON CONFLICT (id) DO UPDATE SET config = excluded.config
            "#,
        )
        .bind(serde_json::to_string(transport)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_transport(&self) -> StorageResult<Option<NotificationTransport>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT config FROM notification_transport WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(row
            .map(|(config,)| serde_json::from_str(&config))
            .transpose()?)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(HealthStatus {
                healthy: true,
                message: "SQLite backend operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("db_path".to_string(), self.db_path.clone()),
                ]),
            }),
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
