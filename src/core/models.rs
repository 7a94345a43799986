use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use super::error::ValidationError;

static FARM_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^farm-[0-9a-f]+$").expect("valid farm id pattern"));
static QUEUE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^queue-[0-9a-f]+$").expect("valid queue id pattern"));

/// Validated Deadline farm identifier (`farm-<hex>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FarmId(String);

impl FarmId {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if FARM_ID_RE.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(ValidationError::FarmId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated Deadline queue identifier (`queue-<hex>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueId(String);

impl QueueId {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if QUEUE_ID_RE.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(ValidationError::QueueId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The job bundle submitted to the farm, plus its template parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTemplate {
    pub bundle_path: PathBuf,
    pub parameters: Vec<(String, String)>,
}

impl JobTemplate {
    pub fn new(bundle_path: impl Into<PathBuf>) -> Self {
        Self {
            bundle_path: bundle_path.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }
}

/// Everything the caller hands to a run. IDs are validated by the controller.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub template: JobTemplate,
    pub farm_id: String,
    pub queue_id: String,
}

/// A submitted job. Immutable once the backend has assigned `job_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub farm_id: FarmId,
    pub queue_id: QueueId,
    pub job_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl JobStatus {
    /// Map Deadline task-run or lifecycle status text onto a status.
    ///
    /// Unrecognized text becomes `Unknown`, which the controller treats as
    /// still in progress.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "READY" | "ASSIGNED" | "STARTING" | "SCHEDULED" => Self::Pending,
            "RUNNING" | "INTERRUPTING" => Self::Running,
            "SUCCEEDED" => Self::Succeeded,
            "FAILED" | "CANCELED" | "CANCELLED" | "NOT_COMPATIBLE" | "CREATE_FAILED"
            | "UPDATE_FAILED" | "UPLOAD_FAILED" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One package row from a conda listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SoftwareRecord {
    pub name: String,
    pub version: String,
    pub build_hash: String,
}

pub type ResultSet = Vec<SoftwareRecord>;

/// A non-terminal status report, one per poll tick.
#[derive(Debug, Clone)]
pub struct Progress {
    pub job_id: String,
    pub elapsed: Duration,
    pub status: JobStatus,
    pub raw_status: String,
    /// Coarse completion estimate for display, capped at 90 until results arrive.
    pub percent: u8,
}

impl Progress {
    pub fn percent_for(elapsed: Duration, timeout: Duration) -> u8 {
        if timeout.is_zero() {
            return 90;
        }
        let fraction = elapsed.as_secs_f64() / timeout.as_secs_f64();
        (30.0 + fraction * 60.0).min(90.0) as u8
    }
}

/// Terminal result of one run. Exactly one is delivered per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success(ResultSet),
    Failure(String),
    Timeout,
    Cancelled,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(records) => write!(f, "found {} software packages", records.len()),
            Self::Failure(reason) => write!(f, "failed: {}", reason),
            Self::Timeout => f.write_str("timed out waiting for the job to finish"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// A farm or queue as listed by the Deadline CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceSummary {
    pub id: String,
    pub name: String,
}
