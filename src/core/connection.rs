//! Reachability check for the Deadline service.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use crate::core::backend::DeadlineCli;
use crate::core::error::BackendError;

/// Oldest CLI release whose `job logs` output the parser understands
pub const MIN_CLI_VERSION: (u32, u32, u32) = (0, 51, 1);

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("valid version pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected { farm_count: usize },
    Timeout,
    CliNotFound,
    AuthFailed,
    Error(String),
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Connected { farm_count } => format!("Connected ({} farms)", farm_count),
            Self::Timeout => "Connection Timeout".to_string(),
            Self::CliNotFound => "Deadline CLI Not Found".to_string(),
            Self::AuthFailed => "Authentication Failed".to_string(),
            Self::Error(detail) => format!("Connection Error: {}", detail),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionReport {
    pub status: ConnectionStatus,
    pub cli_version: Option<String>,
    pub version_warning: Option<String>,
}

/// Check the CLI version, then list farms to prove credentials work.
///
/// Version problems only produce a warning; they never fail the check.
pub async fn check_connection(cli: &DeadlineCli, timeout: Duration) -> ConnectionReport {
    let cli_version = match cli.version(VERSION_CHECK_TIMEOUT).await {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(error = %e, "Could not determine Deadline CLI version");
            None
        }
    };
    let version_warning = cli_version.as_deref().and_then(version_warning);
    if let Some(w) = &version_warning {
        warn!("{}", w);
    }

    let status = match cli.farm_list_raw(Some(timeout)).await {
        Ok(out) => ConnectionStatus::Connected {
            farm_count: count_list_items(&out),
        },
        Err(e) => classify(e),
    };

    ConnectionReport {
        status,
        cli_version,
        version_warning,
    }
}

/// Warning text when `version_output` names a release older than
/// [`MIN_CLI_VERSION`]. Unparsable output yields no warning.
pub fn version_warning(version_output: &str) -> Option<String> {
    let caps = VERSION_RE.captures(version_output)?;
    let found: (u32, u32, u32) = (
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    );

    (found < MIN_CLI_VERSION).then(|| {
        let (major, minor, patch) = found;
        let (min_major, min_minor, min_patch) = MIN_CLI_VERSION;
        format!(
            "Deadline CLI version {}.{}.{} detected. Please upgrade to version {}.{}.{} or higher for full compatibility.",
            major, minor, patch, min_major, min_minor, min_patch
        )
    })
}

fn classify(err: BackendError) -> ConnectionStatus {
    match err {
        BackendError::NotInstalled(_) => ConnectionStatus::CliNotFound,
        BackendError::TimedOut { .. } => ConnectionStatus::Timeout,
        BackendError::Exit { stderr, .. } => {
            let lower = stderr.to_lowercase();
            if lower.contains("credentials") || lower.contains("auth") {
                ConnectionStatus::AuthFailed
            } else {
                ConnectionStatus::Error(stderr)
            }
        }
        other => ConnectionStatus::Error(other.to_string()),
    }
}

fn count_list_items(yaml: &str) -> usize {
    yaml.lines().filter(|l| l.starts_with("- ")).count()
}
