//! Job lifecycle controller.
//!
//! Drives one remote job end to end on its own tokio task:
//! submit, poll until the job reaches a terminal state or the time budget
//! runs out, fetch the log, parse it and report. The caller only ever sees
//! events delivered through its [`Observer`].
//!
//! The run is an explicit state machine:
//!
//! ```text
//! Submitting ──> Polling ──(SUCCEEDED)──> Fetching ──> Done
//!      │            │ ↺ every poll_interval              ▲
//!      └────────────┴──(error / FAILED / timeout / cancel)┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::core::backend::JobBackend;
use crate::core::error::{RunError, ValidationError};
use crate::core::models::{
    FarmId, JobHandle, JobRequest, JobStatus, JobTemplate, Progress, QueueId, RunOutcome,
};
use crate::core::observer::Observer;
use crate::core::parser;

/// Timing knobs for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Wait between status checks
    pub poll_interval: Duration,
    /// Hard ceiling on time spent polling, measured from submission
    pub timeout: Duration,
    /// Pause after the tasks succeed before fetching logs, which the service
    /// publishes with a short lag
    pub log_settle_delay: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
            log_settle_delay: Duration::from_secs(5),
        }
    }
}

impl ControllerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            timeout: Duration::from_secs(config.timeout_secs),
            log_settle_delay: Duration::from_secs(config.log_settle_secs),
        }
    }
}

/// Supervises a single job. Consumed by [`JobLifecycleController::run`].
pub struct JobLifecycleController {
    backend: Arc<dyn JobBackend>,
    settings: ControllerSettings,
    cancel: CancellationToken,
}

impl JobLifecycleController {
    pub fn new(backend: Arc<dyn JobBackend>, settings: ControllerSettings) -> Self {
        Self {
            backend,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that cancels the run this controller will start.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Validate the request and start the run on a new tokio task.
    ///
    /// Invalid farm or queue IDs are reported to `observer` before this
    /// returns; no task is spawned and the backend is never touched. Every
    /// run that does start delivers exactly one terminal event.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run(
        self,
        request: JobRequest,
        observer: Arc<dyn Observer>,
    ) -> Result<RunHandle, ValidationError> {
        let (farm_id, queue_id) = match validate(&request) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Rejected job request");
                observer.on_validation_error(&e.to_string());
                return Err(e);
            }
        };

        let span = info_span!(
            "job_run",
            run_id = %Uuid::now_v7(),
            farm_id = %farm_id,
            queue_id = %queue_id
        );

        let run = Run {
            backend: self.backend,
            settings: self.settings,
            cancel: self.cancel.clone(),
            template: request.template,
            farm_id,
            queue_id,
            reporter: Reporter::new(observer),
        };
        let task = tokio::spawn(run.execute().instrument(span));

        Ok(RunHandle {
            cancel: self.cancel,
            task,
        })
    }
}

fn validate(request: &JobRequest) -> Result<(FarmId, QueueId), ValidationError> {
    let farm_id = FarmId::parse(&request.farm_id)?;
    let queue_id = QueueId::parse(&request.queue_id)?;
    Ok((farm_id, queue_id))
}

/// Caller's side of a running job.
pub struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RunHandle {
    /// Request cancellation. Takes effect at the next state boundary; a
    /// backend call already in flight is allowed to finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the worker task to exit. The terminal event has been
    /// delivered by the time this returns `Ok`.
    pub async fn wait(self) -> Result<(), JoinError> {
        self.task.await
    }
}

enum State {
    Submitting,
    Polling { handle: JobHandle, started: Instant },
    Fetching { handle: JobHandle },
    Done(RunOutcome),
}

/// Everything the worker task owns for the lifetime of one run.
struct Run {
    backend: Arc<dyn JobBackend>,
    settings: ControllerSettings,
    cancel: CancellationToken,
    template: JobTemplate,
    farm_id: FarmId,
    queue_id: QueueId,
    reporter: Reporter,
}

impl Run {
    async fn execute(self) {
        let mut state = State::Submitting;

        let outcome = loop {
            state = match state {
                State::Submitting => self.submit().await,
                State::Polling { handle, started } => self.poll(handle, started).await,
                State::Fetching { handle } => self.fetch(handle).await,
                State::Done(outcome) => break outcome,
            };
        };

        info!(outcome = %outcome, "Run finished");
        self.reporter.finish(outcome);
    }

    async fn submit(&self) -> State {
        if self.cancel.is_cancelled() {
            info!("Run cancelled before submission");
            return State::Done(RunOutcome::Cancelled);
        }

        info!(bundle = %self.template.bundle_path.display(), "Submitting job bundle");

        match self
            .backend
            .submit(&self.template, &self.farm_id, &self.queue_id)
            .await
        {
            Ok(job_id) => {
                let handle = JobHandle {
                    farm_id: self.farm_id.clone(),
                    queue_id: self.queue_id.clone(),
                    job_id,
                };
                info!(job_id = %handle.job_id, "Job submitted");
                self.reporter.submitted(&handle);
                State::Polling {
                    handle,
                    started: Instant::now(),
                }
            }
            Err(e) => {
                error!(error = %e, "Job submission failed");
                State::Done(RunError::Submission(e).into())
            }
        }
    }

    /// One poll tick.
    async fn poll(&self, handle: JobHandle, started: Instant) -> State {
        if self.cancel.is_cancelled() {
            return cancelled(&handle);
        }

        let raw_status = match self.backend.get_status(&handle).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(job_id = %handle.job_id, error = %e, "Status check failed");
                return State::Done(RunError::StatusCheck(e).into());
            }
        };

        let status = JobStatus::from_raw(&raw_status);
        let elapsed = started.elapsed();
        debug!(
            job_id = %handle.job_id,
            status = %status,
            raw_status = %raw_status,
            elapsed_secs = elapsed.as_secs(),
            "Polled job status"
        );

        match status {
            JobStatus::Succeeded => return State::Fetching { handle },
            JobStatus::Failed => {
                warn!(job_id = %handle.job_id, raw_status = %raw_status, "Job failed");
                return State::Done(RunError::JobFailed { raw_status }.into());
            }
            JobStatus::Pending | JobStatus::Running | JobStatus::Unknown => {}
        }

        if elapsed >= self.settings.timeout {
            warn!(
                job_id = %handle.job_id,
                elapsed_secs = elapsed.as_secs(),
                "Job exceeded time budget"
            );
            return State::Done(RunError::TimeoutExceeded(self.settings.timeout).into());
        }

        self.reporter.progress(&Progress {
            job_id: handle.job_id.clone(),
            elapsed,
            status,
            raw_status,
            percent: Progress::percent_for(elapsed, self.settings.timeout),
        });

        // Cancellation only cuts the wait short; it is acted on at the top
        // of the next tick.
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = sleep(self.settings.poll_interval) => {}
        }

        State::Polling { handle, started }
    }

    async fn fetch(&self, handle: JobHandle) -> State {
        let settle = self.settings.log_settle_delay;
        if !settle.is_zero() {
            debug!(job_id = %handle.job_id, settle_secs = settle.as_secs(), "Waiting for logs to settle");
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = sleep(settle) => {}
            }
        }
        if self.cancel.is_cancelled() {
            return cancelled(&handle);
        }

        let logs = match self.backend.get_logs(&handle).await {
            Ok(logs) => logs,
            Err(e) => {
                error!(job_id = %handle.job_id, error = %e, "Log retrieval failed");
                return State::Done(RunError::LogRetrieval(e).into());
            }
        };

        let records = parser::parse(&logs);
        if records.is_empty() {
            let preview: String = logs.chars().take(500).collect();
            warn!(
                job_id = %handle.job_id,
                output_len = logs.len(),
                preview = %preview,
                "No software packages found in job output"
            );
            return State::Done(RunError::EmptyResult.into());
        }

        info!(job_id = %handle.job_id, packages = records.len(), "Parsed job output");
        State::Done(RunOutcome::Success(records))
    }
}

fn cancelled(handle: &JobHandle) -> State {
    warn!(job_id = %handle.job_id, "Run cancelled; the remote job keeps running");
    State::Done(RunOutcome::Cancelled)
}

/// Delivers events to the observer and guarantees a single terminal event.
///
/// `finish` consumes the reporter, so a second terminal event cannot be
/// expressed. If the run is torn down without finishing (panic, runtime
/// shutdown) the drop path reports a failure instead.
struct Reporter {
    observer: Option<Arc<dyn Observer>>,
}

impl Reporter {
    fn new(observer: Arc<dyn Observer>) -> Self {
        Self {
            observer: Some(observer),
        }
    }

    fn submitted(&self, handle: &JobHandle) {
        if let Some(observer) = &self.observer {
            observer.on_submitted(handle);
        }
    }

    fn progress(&self, progress: &Progress) {
        if let Some(observer) = &self.observer {
            observer.on_progress(progress);
        }
    }

    fn finish(mut self, outcome: RunOutcome) {
        if let Some(observer) = self.observer.take() {
            observer.on_terminal(outcome);
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        if let Some(observer) = self.observer.take() {
            observer.on_terminal(RunOutcome::Failure(
                "run aborted before completion".to_string(),
            ));
        }
    }
}
