use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::core::backend::JobBackend;
use crate::core::error::{BackendError, SubmissionError};
use crate::core::models::{FarmId, JobHandle, JobTemplate, QueueId};

const DEMO_LOG: &str = "\
[2025-12-03T21:49:40.112000+00:00] Session session-5a1e started on worker-0
[2025-12-03T21:49:43.773000+00:00] # Name                    Version                   Build  Channel
[2025-12-03T21:49:43.773000+00:00] blender                   3.6.23          481731fa3deb7292fd3d0f1fbec830787d44c023_0 deadline-cloud
[2025-12-03T21:49:43.774000+00:00] blender                   4.2.3           hb0f4dca_0     deadline-cloud
[2025-12-03T21:49:43.774000+00:00] maya                      2025.2          h1f2e3d4_1     deadline-cloud
[2025-12-03T21:49:43.775000+00:00] nuke                      15.1.1          h9c8b7a6_0     deadline-cloud
[2025-12-03T21:49:43.775000+00:00] openssl                   3.0.13          h7f8727e_0     conda-forge
[2025-12-03T21:49:44.001000+00:00] Process pid 4242 exited with code 0
";

/// One recorded call against the simulated backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Submit { farm_id: String, queue_id: String },
    GetStatus { job_id: String },
    GetLogs { job_id: String },
}

/// Scripted stand-in for the Deadline service.
///
/// Statuses are served in order and the last one repeats forever, so a
/// single `"RUNNING"` entry simulates a job that never finishes.
pub struct SimulatedBackend {
    job_id: String,
    submit_error: Option<String>,
    statuses: Mutex<VecDeque<Result<String, String>>>,
    logs: Result<String, String>,
    latency: Duration,
    calls: Mutex<Vec<BackendCall>>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self {
            job_id: "job-5a1e0000".to_string(),
            submit_error: None,
            statuses: Mutex::new(VecDeque::from([Ok("SUCCEEDED".to_string())])),
            logs: Ok(String::new()),
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A job that runs for a few polls and lists some packages.
    pub fn demo() -> Self {
        Self::new()
            .with_statuses(["READY", "RUNNING", "RUNNING", "SUCCEEDED"])
            .with_logs(DEMO_LOG)
            .with_latency(Duration::from_millis(200))
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }

    pub fn with_submit_error(mut self, message: impl Into<String>) -> Self {
        self.submit_error = Some(message.into());
        self
    }

    pub fn with_statuses<I, S>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *lock(&self.statuses) = statuses.into_iter().map(|s| Ok(s.into())).collect();
        self
    }

    /// Append a failing status check to the script.
    pub fn with_status_error(self, message: impl Into<String>) -> Self {
        lock(&self.statuses).push_back(Err(message.into()));
        self
    }

    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.logs = Ok(logs.into());
        self
    }

    pub fn with_logs_error(mut self, message: impl Into<String>) -> Self {
        self.logs = Err(message.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.calls).clone()
    }

    pub fn status_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::GetStatus { .. }))
            .count()
    }

    pub fn log_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::GetLogs { .. }))
            .count()
    }

    fn record(&self, call: BackendCall) {
        lock(&self.calls).push(call);
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
    }

    fn next_status(&self) -> Result<String, String> {
        let mut statuses = lock(&self.statuses);
        if statuses.len() > 1 {
            statuses.pop_front().unwrap_or_else(|| Ok(String::new()))
        } else {
            statuses
                .front()
                .cloned()
                .unwrap_or_else(|| Ok("UNKNOWN".to_string()))
        }
    }
}

#[async_trait]
impl JobBackend for SimulatedBackend {
    async fn submit(
        &self,
        _template: &JobTemplate,
        farm_id: &FarmId,
        queue_id: &QueueId,
    ) -> Result<String, SubmissionError> {
        self.record(BackendCall::Submit {
            farm_id: farm_id.to_string(),
            queue_id: queue_id.to_string(),
        });
        self.delay().await;

        match &self.submit_error {
            Some(message) => Err(SubmissionError::Backend(simulated_failure(
                "bundle submit",
                message,
            ))),
            None => Ok(self.job_id.clone()),
        }
    }

    async fn get_status(&self, handle: &JobHandle) -> Result<String, BackendError> {
        self.record(BackendCall::GetStatus {
            job_id: handle.job_id.clone(),
        });
        self.delay().await;

        self.next_status()
            .map_err(|message| simulated_failure("job get", &message))
    }

    async fn get_logs(&self, handle: &JobHandle) -> Result<String, BackendError> {
        self.record(BackendCall::GetLogs {
            job_id: handle.job_id.clone(),
        });
        self.delay().await;

        self.logs
            .clone()
            .map_err(|message| simulated_failure("job logs", &message))
    }
}

fn simulated_failure(subcommand: &str, message: &str) -> BackendError {
    BackendError::Exit {
        command: format!("simulated {}", subcommand),
        code: "exit code 1".to_string(),
        stderr: message.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
