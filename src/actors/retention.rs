//! Periodic purge of old execution logs and metric samples

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::clock::SharedClock;
use crate::storage::SharedGateway;

/// How often the purge runs
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Run the retention loop until `cancel` is triggered
///
/// The first purge happens immediately.
pub async fn run(
    gateway: SharedGateway,
    clock: SharedClock,
    retention_days: u32,
    cancel: CancellationToken,
) {
    info!(
        retention_days,
        interval_secs = CLEANUP_INTERVAL.as_secs(),
        "history retention started"
    );

    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("history retention stopping");
                break;
            }
            _ = interval.tick() => {
                let cutoff = clock.now() - chrono::Duration::days(i64::from(retention_days));
                match gateway.purge_history(cutoff).await {
                    Ok(stats) if stats.executions + stats.metrics > 0 => {
                        info!(
                            executions = stats.executions,
                            metrics = stats.metrics,
                            "purged history older than {cutoff}"
                        );
                    }
                    Ok(_) => debug!("no history to purge"),
                    Err(e) => error!(error = %e, "history purge failed"),
                }
            }
        }
    }
}

pub fn spawn(
    gateway: SharedGateway,
    clock: SharedClock,
    retention_days: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(gateway, clock, retention_days, cancel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::model::{Classification, MetricSample};
    use crate::storage::{HistoryQuery, MemoryGateway, PersistenceGateway};
    use std::sync::Arc;
    use uuid::Uuid;

    fn sample(target_id: Uuid, age_days: i64) -> MetricSample {
        MetricSample {
            target_id,
            pids: vec![],
            cpu_percent: 1.0,
            ram_mb: 1.0,
            ram_percent: None,
            disk_percent: None,
            classification: Classification::Normal,
            timestamp: chrono::Utc::now() - chrono::Duration::days(age_days),
        }
    }

    #[tokio::test]
    async fn test_initial_purge_drops_old_rows() {
        let gateway = Arc::new(MemoryGateway::new());
        let target = Uuid::now_v7();
        gateway.append_metric(&sample(target, 40)).await.unwrap();
        gateway.append_metric(&sample(target, 1)).await.unwrap();

        let cancel = CancellationToken::new();
        let task = spawn(gateway.clone(), TokioClock::shared(), 30, cancel.clone());

        let mut remaining = 2;
        for _ in 0..50 {
            remaining = gateway
                .query_metrics(&HistoryQuery::for_target(target))
                .await
                .unwrap()
                .len();
            if remaining == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(remaining, 1);

        cancel.cancel();
        task.await.unwrap();
    }
}
