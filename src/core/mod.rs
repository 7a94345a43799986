pub mod backend;
pub mod connection;
pub mod controller;
pub mod error;
pub mod models;
pub mod observer;
pub mod parser;

pub use backend::{BackendType, DeadlineCli, JobBackend, SimulatedBackend, create_backend};
pub use controller::{ControllerSettings, JobLifecycleController, RunHandle};
pub use error::{BackendError, RunError, SubmissionError, ValidationError};
pub use models::{
    FarmId, JobHandle, JobRequest, JobStatus, JobTemplate, Progress, QueueId, ResourceSummary,
    ResultSet, RunOutcome, SoftwareRecord,
};
pub use observer::{ChannelObserver, Observer, RunEvent};
