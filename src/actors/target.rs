//! TargetMonitorActor - One monitoring loop per watch target
//!
//! ## Cycle
//!
//! ```text
//! deadline ─▶ probe (timeout, panic-safe) ─▶ state tracker ─▶ [submit script]
//!                                                 │
//!                                   [threshold evaluation, metric sample]
//!                                                 │
//!                   persist status snapshot ─▶ alert events ─▶ next deadline
//! ```
//!
//! The next deadline is an explicit `next_check_at` in the target's state,
//! computed from the injected clock: the base interval, or the backoff interval
//! while recovery attempts keep failing. Cycles of one target never overlap;
//! a recovery script runs asynchronously and its completion is folded back
//! into the counters by the same loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::clock::SharedClock;
use crate::config::{SchedulerConfig, ThresholdDefaults};
use crate::model::{ExecutionLog, ExecutionOutcome, Status, StatusRecord, WatchTarget};
use crate::monitors::state::{
    Observation, TriggerDecision, backoff_interval, deferred_decision, observe,
};
use crate::monitors::threshold;
use crate::probe::{ProbeResult, ProbeSet};
use crate::registry::{TargetSlot, TargetState};
use crate::script::{JobHandle, ScriptEngine, ScriptRequest};
use crate::storage::{SharedGateway, persist_with_retry};

use super::alert::AlertHandle;
use super::messages::{AlertEvent, AlertEventKind, TargetCommand, TargetSummary};

/// Collaborators shared by every target loop
pub struct MonitorContext {
    pub probes: ProbeSet,
    pub scripts: ScriptEngine,
    pub gateway: SharedGateway,
    pub alerts: AlertHandle,
    pub clock: SharedClock,
    pub config: SchedulerConfig,
    pub thresholds: ThresholdDefaults,
}

/// Recovery script owned by the loop
struct InFlight {
    job: JobHandle,
    /// `last_status_change` when the job was submitted
    excursion: DateTime<Utc>,
}

/// Actor that monitors a single watch target
pub struct TargetMonitorActor {
    slot: Arc<TargetSlot>,

    ctx: Arc<MonitorContext>,

    command_rx: mpsc::Receiver<TargetCommand>,

    in_flight: Option<InFlight>,

    /// Excursion (`last_status_change`) whose trigger arrived while a job ran
    deferred: Option<DateTime<Utc>>,
}

impl TargetMonitorActor {
    pub fn new(
        slot: Arc<TargetSlot>,
        ctx: Arc<MonitorContext>,
        command_rx: mpsc::Receiver<TargetCommand>,
    ) -> Self {
        Self {
            slot,
            ctx,
            command_rx,
            in_flight: None,
            deferred: None,
        }
    }

    /// Run the actor's main loop
    ///
    /// This runs until:
    /// - A Shutdown command is received
    /// - The command channel is closed
    #[instrument(skip(self), fields(target_id = %self.slot.id))]
    pub async fn run(mut self) {
        debug!("starting target monitor");

        loop {
            let delay = self.until_next_check().await;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    self.cycle().await;
                }

                log = job_finished(&mut self.in_flight) => {
                    if let Some(in_flight) = self.in_flight.take() {
                        self.complete(in_flight, log).await;
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(TargetCommand::CheckNow { respond_to }) => {
                            debug!("received CheckNow command");
                            let record = self.cycle().await;
                            let _ = respond_to.send(record);
                        }

                        Some(TargetCommand::Reschedule) => {
                            self.reschedule().await;
                        }

                        Some(TargetCommand::Shutdown { respond_to }) => {
                            debug!("received shutdown command");
                            self.stop().await;
                            let _ = respond_to.send(());
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            self.stop().await;
                            break;
                        }
                    }
                }
            }
        }

        debug!("target monitor stopped");
    }

    async fn until_next_check(&self) -> Duration {
        let next = self.slot.state.lock().await.next_check_at;
        (next - self.ctx.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Probe, track, trigger, evaluate, persist and publish
    async fn cycle(&mut self) -> StatusRecord {
        let target = self.slot.state.lock().await.target.clone();
        let result = self.probe(&target).await;
        let now = self.ctx.clock.now();

        let slot = self.slot.clone();
        let mut guard = slot.state.lock().await;
        let state = &mut *guard;

        let update = observe(
            &state.record,
            &state.counters,
            &state.target.scripts,
            Observation {
                status: result.status,
                at: now,
            },
        );
        state.record = update.record;
        state.counters = update.counters;

        if let Some(transition) = update.transition {
            info!(
                "{} changed from {} to {}",
                target.display_name(),
                transition.from,
                transition.to
            );
        }

        if let TriggerDecision::Fire { status, retry } = update.decision {
            self.submit(state, status, retry);
        }

        let summary = TargetSummary::from(&state.target);
        let mut events = Vec::new();

        if result.status.is_known() {
            let failure_count = state
                .counters
                .get(state.record.last_known_status)
                .map_or(0, |counters| counters.retry_count);
            events.push(AlertEventKind::Observed {
                record: state.record,
                transition: update.transition,
                failure_count,
            });
        }

        let mut sample = None;
        if let (Some(config), Some(metrics)) = (&state.target.thresholds, &result.metrics) {
            let evaluation = threshold::evaluate(
                state.target.id,
                config,
                &self.ctx.thresholds,
                metrics,
                state.classification,
                now,
            );
            let current = evaluation.sample.classification;

            if evaluation.escalated {
                warn!(
                    "{} escalated from {} to {current}",
                    target.display_name(),
                    evaluation.previous
                );
                events.push(AlertEventKind::Escalated {
                    sample: evaluation.sample.clone(),
                    previous: evaluation.previous,
                    notify: config.email_alerts_enabled,
                });
            } else if current < evaluation.previous {
                info!(
                    "{} back to {current} from {}",
                    target.display_name(),
                    evaluation.previous
                );
            }

            state.classification = current;
            sample = Some(evaluation.sample);
        }

        state.next_check_at = next_deadline(state, now, &self.ctx.config);
        let record = state.record;
        let snapshot = state.snapshot();
        drop(guard);

        trace!(status = %record.status, count = record.consecutive_count, "cycle complete");

        let gateway = &self.ctx.gateway;
        if let Some(sample) = &sample {
            persist_with_retry("metric sample write", || gateway.append_metric(sample)).await;
        }
        persist_with_retry("status write", || gateway.save_status(&snapshot)).await;

        for kind in events {
            self.ctx
                .alerts
                .dispatch(AlertEvent {
                    target: summary.clone(),
                    kind,
                    at: now,
                })
                .await;
        }

        record
    }

    /// Run the probe under the probe timeout; failures and panics become Unknown
    async fn probe(&self, target: &WatchTarget) -> ProbeResult {
        let probe = self.ctx.probes.for_kind(target.kind()).clone();
        let timeout = Duration::from_secs(self.ctx.config.probe_timeout_secs.max(1));

        let outcome =
            tokio::time::timeout(timeout, AssertUnwindSafe(probe.probe(target)).catch_unwind())
                .await;

        match outcome {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => {
                warn!("probe of {} failed: {e}", target.display_name());
                ProbeResult::status(Status::Unknown)
            }
            Ok(Err(_)) => {
                error!("probe of {} panicked", target.display_name());
                ProbeResult::status(Status::Unknown)
            }
            Err(_) => {
                warn!(
                    "probe of {} timed out after {timeout:?}",
                    target.display_name()
                );
                ProbeResult::status(Status::Unknown)
            }
        }
    }

    fn submit(&mut self, state: &mut TargetState, status: Status, retry: bool) {
        if self.in_flight.is_some() {
            info!("recovery script still running, {status} trigger deferred until it finishes");
            self.deferred = Some(state.record.last_status_change);
            return;
        }
        let Some(config) = state.target.scripts.for_status(status).cloned() else {
            return;
        };
        let Some(counters) = state.counters.get_mut(status) else {
            return;
        };

        let request = ScriptRequest {
            target_id: state.target.id,
            target_name: state.target.display_name(),
            identity: state.target.identity.clone(),
            status,
            config,
            retry_count: counters.retry_count,
        };

        match self.ctx.scripts.submit(request) {
            Ok(job) => {
                counters.last_attempt_count = Some(state.record.consecutive_count);
                info!(
                    job_id = %job.job_id,
                    "{} recovery script submitted (attempt {} for {status})",
                    if retry { "retrying" } else { "starting" },
                    counters.executions_used + 1
                );
                self.in_flight = Some(InFlight {
                    job,
                    excursion: state.record.last_status_change,
                });
            }
            Err(e) => warn!("recovery script not submitted: {e}"),
        }
    }

    /// Fold a finished job into the counters of its direction
    async fn complete(&mut self, in_flight: InFlight, log: Option<ExecutionLog>) {
        let status = in_flight.job.status;
        let outcome = log.as_ref().map(|log| log.outcome);
        if outcome == Some(ExecutionOutcome::Cancelled) {
            debug!("recovery script cancelled");
            return;
        }
        let success = outcome.is_some_and(ExecutionOutcome::is_success);
        let now = self.ctx.clock.now();

        let snapshot = {
            let slot = self.slot.clone();
            let mut guard = slot.state.lock().await;
            let state = &mut *guard;

            if state.record.last_status_change != in_flight.excursion {
                debug!("status changed while the recovery script ran, counters left alone");
            } else if let Some(counters) = state.counters.get_mut(status) {
                counters.executions_used = counters.executions_used.saturating_add(1);
                if success {
                    counters.retry_count = 0;
                } else {
                    counters.retry_count = counters.retry_count.saturating_add(1);
                }
                debug!(
                    executions_used = counters.executions_used,
                    retry_count = counters.retry_count,
                    "recovery script for {status} finished"
                );
            }

            if let Some(excursion) = self.deferred.take() {
                self.resume_deferred(state, excursion);
            }

            let from = state.record.last_checked_at.unwrap_or(now);
            state.next_check_at = next_deadline(state, from, &self.ctx.config);
            state.snapshot()
        };

        let gateway = &self.ctx.gateway;
        persist_with_retry("status write", || gateway.save_status(&snapshot)).await;
    }

    /// Submit a trigger held back by the previous job if it still applies
    fn resume_deferred(&mut self, state: &mut TargetState, excursion: DateTime<Utc>) {
        if state.record.last_status_change != excursion {
            debug!("status changed since the deferred trigger, dropping it");
            return;
        }
        if let TriggerDecision::Fire { status, retry } =
            deferred_decision(&state.record, &state.counters, &state.target.scripts)
        {
            self.submit(state, status, retry);
        }
    }

    async fn reschedule(&self) {
        let now = self.ctx.clock.now();
        let mut state = self.slot.state.lock().await;
        let from = state.record.last_checked_at.unwrap_or(now);
        state.next_check_at = next_deadline(&state, from, &self.ctx.config);
        debug!(next_check_at = %state.next_check_at, "rescheduled");
    }

    /// Cancel the in-flight job and wait for it within the grace period
    async fn stop(&mut self) {
        let Some(mut in_flight) = self.in_flight.take() else {
            return;
        };

        in_flight.job.cancel();
        let grace = Duration::from_secs(self.ctx.config.shutdown_grace_secs);
        match tokio::time::timeout(grace, in_flight.job.finished()).await {
            Ok(_) => debug!("in-flight recovery script terminated"),
            Err(_) => warn!("recovery script did not stop within {grace:?}, abandoning it"),
        }
    }
}

async fn job_finished(in_flight: &mut Option<InFlight>) -> Option<ExecutionLog> {
    match in_flight {
        Some(in_flight) => in_flight.job.finished().await,
        None => std::future::pending().await,
    }
}

/// Deadline of the next probe, backing off while recovery attempts fail
fn next_deadline(
    state: &TargetState,
    from: DateTime<Utc>,
    config: &SchedulerConfig,
) -> DateTime<Utc> {
    let interval = backoff_interval(
        state.target.interval(),
        &state.record,
        &state.counters,
        &state.target.scripts,
        Duration::from_secs(config.max_backoff_secs),
    );
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|interval| from.checked_add_signed(interval))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Handle for controlling a TargetMonitorActor
#[derive(Clone)]
pub struct TargetHandle {
    sender: mpsc::Sender<TargetCommand>,
}

impl TargetHandle {
    /// Spawn the loop of one target
    pub fn spawn(slot: Arc<TargetSlot>, ctx: Arc<MonitorContext>) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = TargetMonitorActor::new(slot, ctx, cmd_rx);
        let task = tokio::spawn(actor.run());

        (Self { sender: cmd_tx }, task)
    }

    /// Run one cycle now and return the resulting status record
    pub async fn check_now(&self) -> Result<StatusRecord> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(TargetCommand::CheckNow { respond_to: tx })
            .await?;

        Ok(rx.await?)
    }

    pub async fn reschedule(&self) -> Result<()> {
        self.sender.send(TargetCommand::Reschedule).await?;
        Ok(())
    }

    /// Stop the loop; returns once the in-flight job is settled
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(TargetCommand::Shutdown { respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}
