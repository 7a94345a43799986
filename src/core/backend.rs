pub mod deadline_cli;
pub mod simulated;

use std::sync::Arc;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::core::error::{BackendError, SubmissionError};
use crate::core::models::{FarmId, JobHandle, JobTemplate, QueueId};

pub use deadline_cli::DeadlineCli;
pub use simulated::SimulatedBackend;

/// Command/query surface of the job-management service.
///
/// Calls may take a long time; the controller only ever makes them from its
/// own worker task.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Submit the template and return the backend-assigned job ID.
    async fn submit(
        &self,
        template: &JobTemplate,
        farm_id: &FarmId,
        queue_id: &QueueId,
    ) -> Result<String, SubmissionError>;

    /// Raw status text for the job. A job that is still pending is not an error.
    async fn get_status(&self, handle: &JobHandle) -> Result<String, BackendError>;

    /// Raw log text produced by the job.
    async fn get_logs(&self, handle: &JobHandle) -> Result<String, BackendError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    #[default]
    Deadline,
    Simulated,
}

pub fn create_backend(config: &AppConfig) -> Arc<dyn JobBackend> {
    match config.backend {
        BackendType::Deadline => Arc::new(DeadlineCli::from_config(config)),
        BackendType::Simulated => Arc::new(SimulatedBackend::demo()),
    }
}
