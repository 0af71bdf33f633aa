//! Script execution engine
//!
//! Runs recovery scripts on behalf of target loops.
//!
//! ## Guarantees
//!
//! - **Per-target exclusion**: at most one job per target; a second
//!   submission while one is queued or running is rejected with
//!   [`SubmitError::Busy`]
//! - **Global cap**: at most `max_workers` scripts run at once; further jobs
//!   wait for a permit
//! - **Bounded**: every run has a timeout after which the process tree is
//!   terminated and the timeout sentinel exit code is recorded
//! - **Audited**: exactly one [`ExecutionLog`] is persisted per job, whatever
//!   the outcome (including launch errors and cancellation)
//!
//! ## Flow
//!
//! ```text
//! submit() ─▶ reserve target ─▶ spawn job task ─▶ JobHandle
//!                                    │
//!                       wait for permit (or cancel)
//!                                    │
//!                  materialize source ─▶ run interpreter
//!                                    │
//!               persist ExecutionLog ─▶ report through JobHandle
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Semaphore, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::ExecutorConfig;
use crate::model::{
    ExecutionLog, ExecutionOutcome, JobId, LAUNCH_ERROR_EXIT_CODE, ScriptConfig, Status, TargetId,
    TargetIdentity,
};
use crate::storage::{SharedGateway, persist_with_retry};

pub mod runtime;
pub mod subprocess;

pub use runtime::Interpreter;
use subprocess::Termination;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    /// Nothing was spawned (missing file, rejected extension, spawn failure)
    #[error("script launch failed: {0}")]
    Launch(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("a recovery script for target {0} is already queued or running")]
    Busy(TargetId),

    #[error("script engine is shutting down")]
    ShuttingDown,
}

/// Everything a job needs to know about its target
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub target_id: TargetId,
    pub target_name: String,
    pub identity: TargetIdentity,
    /// Status that triggered the job
    pub status: Status,
    pub config: ScriptConfig,
    /// Consecutive failed executions before this one
    pub retry_count: u32,
}

/// Handle of a submitted job
#[derive(Debug)]
pub struct JobHandle {
    pub job_id: JobId,
    pub target_id: TargetId,
    pub status: Status,
    cancel: CancellationToken,
    done: oneshot::Receiver<ExecutionLog>,
}

impl JobHandle {
    /// Request termination; the job still reports (as cancelled)
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the job's execution log
    ///
    /// Returns `None` if the job task vanished without reporting.
    pub async fn finished(&mut self) -> Option<ExecutionLog> {
        (&mut self.done).await.ok()
    }
}

struct Inner {
    config: ExecutorConfig,
    interpreter: Interpreter,
    permits: Arc<Semaphore>,
    in_flight: Mutex<HashSet<TargetId>>,
    gateway: SharedGateway,
    clock: SharedClock,
    shutdown: CancellationToken,
}

/// Releases the per-target reservation when the job task ends
struct Reservation {
    inner: Arc<Inner>,
    target_id: TargetId,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.inner.in_flight.lock() {
            in_flight.remove(&self.target_id);
        }
    }
}

/// Concurrency-bounded recovery script runner
#[derive(Clone)]
pub struct ScriptEngine {
    inner: Arc<Inner>,
}

impl ScriptEngine {
    pub fn new(config: ExecutorConfig, gateway: SharedGateway, clock: SharedClock) -> Self {
        Self::with_interpreter(config, Interpreter::platform_default(), gateway, clock)
    }

    pub fn with_interpreter(
        config: ExecutorConfig,
        interpreter: Interpreter,
        gateway: SharedGateway,
        clock: SharedClock,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_workers.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                interpreter,
                permits,
                in_flight: Mutex::new(HashSet::new()),
                gateway,
                clock,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Queue a recovery script for a target
    pub fn submit(&self, request: ScriptRequest) -> Result<JobHandle, SubmitError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SubmitError::ShuttingDown);
        }

        {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .map_err(|_| SubmitError::ShuttingDown)?;
            if !in_flight.insert(request.target_id) {
                return Err(SubmitError::Busy(request.target_id));
            }
        }

        let reservation = Reservation {
            inner: self.inner.clone(),
            target_id: request.target_id,
        };

        let job_id = Uuid::now_v7();
        let cancel = self.inner.shutdown.child_token();
        let (report_tx, report_rx) = oneshot::channel();

        let handle = JobHandle {
            job_id,
            target_id: request.target_id,
            status: request.status,
            cancel: cancel.clone(),
            done: report_rx,
        };

        let span = info_span!("script_job", %job_id, target_id = %request.target_id);
        let inner = self.inner.clone();
        tokio::spawn(
            async move {
                let log = inner.execute(job_id, &request, &cancel).await;

                let gateway = inner.gateway.clone();
                persist_with_retry("execution log write", || gateway.append_execution(&log)).await;

                drop(reservation);
                if report_tx.send(log).is_err() {
                    debug!("job owner went away before the report");
                }
            }
            .instrument(span),
        );

        Ok(handle)
    }

    /// Cancel all queued and running jobs; new submissions are rejected
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    async fn execute(
        &self,
        job_id: JobId,
        request: &ScriptRequest,
        cancel: &CancellationToken,
    ) -> ExecutionLog {
        let queued_at = self.clock.now();

        let permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => permit.ok(),
            _ = cancel.cancelled() => None,
        };
        let Some(_permit) = permit else {
            info!("job cancelled before it started");
            return self.log(
                job_id,
                request,
                ExecutionOutcome::Cancelled,
                subprocess::Termination::Cancelled.exit_code(),
                queued_at,
                Some("cancelled while waiting for a worker".to_string()),
            );
        };

        let started_at = self.clock.now();
        let script_dir: Option<PathBuf> = self.config.script_dir.clone();

        let script = match runtime::materialize(
            &request.config.source,
            &self.interpreter,
            script_dir.as_deref(),
        ) {
            Ok(script) => script,
            Err(e) => {
                warn!("{e}");
                return self.log(
                    job_id,
                    request,
                    ExecutionOutcome::LaunchError,
                    LAUNCH_ERROR_EXIT_CODE,
                    started_at,
                    Some(e.to_string()),
                );
            }
        };

        let mut command = self
            .interpreter
            .command(script.path(), &request.identity.parameter());
        command
            .env("WINSENTRY_TARGET_ID", request.target_id.to_string())
            .env("WINSENTRY_TARGET_KIND", request.identity.kind().to_string())
            .env("WINSENTRY_TARGET_NAME", &request.target_name)
            .env("WINSENTRY_TARGET_PARAM", request.identity.parameter())
            .env("WINSENTRY_STATUS", request.status.to_string())
            .env("WINSENTRY_RETRY_COUNT", request.retry_count.to_string());

        info!(
            "running recovery script for {} ({})",
            request.target_name, request.status
        );

        let output = subprocess::run(
            command,
            Duration::from_secs(self.config.timeout_secs),
            self.config.max_output_bytes,
            cancel,
        )
        .await;
        drop(script);

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                error!("failed to spawn interpreter: {e}");
                return self.log(
                    job_id,
                    request,
                    ExecutionOutcome::LaunchError,
                    LAUNCH_ERROR_EXIT_CODE,
                    started_at,
                    Some(ScriptError::Launch(e.to_string()).to_string()),
                );
            }
        };

        for (name, stream) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
            if stream.truncated {
                warn!(
                    "{name} truncated: captured {} of {} bytes",
                    stream.captured.len(),
                    stream.total_bytes
                );
            }
            if !stream.captured.is_empty() {
                debug!("{name}: {}", stream.text().trim_end());
            }
        }

        let (outcome, error_message) = match output.termination {
            Termination::Exited(0) => (ExecutionOutcome::Success, None),
            Termination::Exited(code) => (
                ExecutionOutcome::Failed,
                Some(format!("script exited with code {code}")),
            ),
            Termination::Signaled => (
                ExecutionOutcome::Failed,
                Some("script terminated without exit code".to_string()),
            ),
            Termination::TimedOut => (
                ExecutionOutcome::Timeout,
                Some(format!(
                    "script exceeded timeout of {}s",
                    self.config.timeout_secs
                )),
            ),
            Termination::Cancelled => (
                ExecutionOutcome::Cancelled,
                Some("script cancelled".to_string()),
            ),
        };

        info!(
            "recovery script for {} finished: {outcome} (exit code {})",
            request.target_name,
            output.termination.exit_code()
        );

        let mut log = self.log(
            job_id,
            request,
            outcome,
            output.termination.exit_code(),
            started_at,
            error_message,
        );
        log.stdout_bytes = output.stdout.total_bytes;
        log.stderr_bytes = output.stderr.total_bytes;
        log.stdout_truncated = output.stdout.truncated;
        log.stderr_truncated = output.stderr.truncated;
        log.stdout = output.stdout.text();
        log.stderr = output.stderr.text();
        log
    }

    fn log(
        &self,
        job_id: JobId,
        request: &ScriptRequest,
        outcome: ExecutionOutcome,
        exit_code: i32,
        started_at: chrono::DateTime<chrono::Utc>,
        error_message: Option<String>,
    ) -> ExecutionLog {
        ExecutionLog {
            job_id,
            target_id: request.target_id,
            triggering_status: request.status,
            outcome,
            exit_code,
            stdout_bytes: 0,
            stderr_bytes: 0,
            stdout_truncated: false,
            stderr_truncated: false,
            stdout: String::new(),
            stderr: String::new(),
            error_message,
            started_at,
            ended_at: self.clock.now(),
            retry_count: request.retry_count,
        }
    }
}
