//! Scheduler - Owns the set of running target loops

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::model::{StatusRecord, TargetId};
use crate::registry::TargetSlot;

use super::target::{MonitorContext, TargetHandle};

struct RunningLoop {
    handle: TargetHandle,
    task: JoinHandle<()>,
}

pub struct Scheduler {
    ctx: Arc<MonitorContext>,
    loops: Mutex<HashMap<TargetId, RunningLoop>>,
}

impl Scheduler {
    pub fn new(ctx: Arc<MonitorContext>) -> Self {
        Self {
            ctx,
            loops: Mutex::new(HashMap::new()),
        }
    }

    /// Start the loop of a target, replacing a running one
    pub async fn add(&self, slot: Arc<TargetSlot>) {
        let id = slot.id;
        let previous = self.loops.lock().await.remove(&id);
        if let Some(previous) = previous {
            debug!(target_id = %id, "replacing running loop");
            stop(previous).await;
        }

        let (handle, task) = TargetHandle::spawn(slot, self.ctx.clone());
        self.loops
            .lock()
            .await
            .insert(id, RunningLoop { handle, task });
        info!(target_id = %id, "monitoring started");
    }

    /// Stop the loop of a target; an in-flight script is cancelled and awaited
    /// up to the shutdown grace period
    pub async fn remove(&self, id: TargetId) -> bool {
        let running = self.loops.lock().await.remove(&id);
        match running {
            Some(running) => {
                stop(running).await;
                info!(target_id = %id, "monitoring stopped");
                true
            }
            None => false,
        }
    }

    /// Recompute the next deadline after an interval change
    pub async fn reschedule(&self, id: TargetId) -> bool {
        let Some(handle) = self.handle(id).await else {
            return false;
        };
        handle.reschedule().await.is_ok()
    }

    /// Run one cycle immediately
    pub async fn check_now(&self, id: TargetId) -> Option<StatusRecord> {
        let handle = self.handle(id).await?;
        match handle.check_now().await {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(target_id = %id, "check_now failed: {e:#}");
                None
            }
        }
    }

    pub async fn is_running(&self, id: TargetId) -> bool {
        self.loops.lock().await.contains_key(&id)
    }

    /// Stop every loop concurrently
    pub async fn shutdown(&self) {
        let loops: Vec<RunningLoop> = self.loops.lock().await.drain().map(|(_, l)| l).collect();
        debug!("stopping {} target loops", loops.len());
        join_all(loops.into_iter().map(stop)).await;
    }

    async fn handle(&self, id: TargetId) -> Option<TargetHandle> {
        self.loops.lock().await.get(&id).map(|l| l.handle.clone())
    }
}

async fn stop(running: RunningLoop) {
    running.handle.shutdown().await;
    if let Err(e) = running.task.await {
        warn!("target loop ended abnormally: {e}");
    }
}
