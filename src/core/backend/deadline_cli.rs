use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::config::AppConfig;
use crate::core::backend::JobBackend;
use crate::core::error::{BackendError, SubmissionError};
use crate::core::models::{FarmId, JobHandle, JobTemplate, QueueId, ResourceSummary};

/// How much of an unexpected response to carry in error messages
const PREVIEW_CHARS: usize = 200;

static JOB_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)job-[0-9a-f]+").expect("valid job id pattern"));

/// Job backend driving the `deadline` command-line tool.
///
/// The CLI handles credentials itself; this type only shells out and reads
/// its YAML-ish stdout.
pub struct DeadlineCli {
    program: String,
    submit_timeout: Duration,
    status_timeout: Duration,
    logs_timeout: Duration,
}

impl Default for DeadlineCli {
    fn default() -> Self {
        Self::new("deadline")
    }
}

impl DeadlineCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            submit_timeout: Duration::from_secs(120),
            status_timeout: Duration::from_secs(60),
            logs_timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.deadline_bin.clone())
            .with_submit_timeout(Duration::from_secs(config.submit_timeout_secs))
            .with_status_timeout(Duration::from_secs(config.status_timeout_secs))
            .with_logs_timeout(Duration::from_secs(config.logs_timeout_secs))
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    pub fn with_status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout = timeout;
        self
    }

    pub fn with_logs_timeout(mut self, timeout: Duration) -> Self {
        self.logs_timeout = timeout;
        self
    }

    /// Output of `deadline --version`, trimmed.
    pub async fn version(&self, timeout: Duration) -> Result<String, BackendError> {
        let out = self.exec(&["--version".to_string()], Some(timeout)).await?;
        Ok(out.trim().to_string())
    }

    /// Raw output of `deadline farm list`.
    pub async fn farm_list_raw(&self, timeout: Option<Duration>) -> Result<String, BackendError> {
        self.exec(&["farm".to_string(), "list".to_string()], timeout)
            .await
    }

    pub async fn list_farms(&self) -> Result<Vec<ResourceSummary>, BackendError> {
        let out = self.farm_list_raw(None).await?;
        Ok(list_entries(&out, "farmId"))
    }

    pub async fn list_queues(&self, farm_id: &FarmId) -> Result<Vec<ResourceSummary>, BackendError> {
        let args = [
            "queue".to_string(),
            "list".to_string(),
            "--farm-id".to_string(),
            farm_id.to_string(),
        ];
        let out = self.exec(&args, None).await?;
        Ok(list_entries(&out, "queueId"))
    }

    async fn exec(&self, args: &[String], timeout: Option<Duration>) -> Result<String, BackendError> {
        let command = self.describe(args);
        debug!(command = %command, "Running deadline CLI");

        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, child)
                .await
                .map_err(|_| BackendError::TimedOut {
                    command: command.clone(),
                    timeout: limit,
                })?,
            None => child.await,
        }
        .map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                BackendError::NotInstalled(self.program.clone())
            } else {
                BackendError::Spawn {
                    command: command.clone(),
                    source: e,
                }
            }
        })?;

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| format!("exit code {}", c))
                .unwrap_or_else(|| "a signal".to_string());
            return Err(BackendError::Exit {
                command,
                code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Program plus subcommand words, for messages. Omits IDs and paths.
    fn describe(&self, args: &[String]) -> String {
        let words: Vec<&str> = args
            .iter()
            .take_while(|a| !a.starts_with('-') || a.as_str() == "--version")
            .take(2)
            .map(String::as_str)
            .collect();
        if words.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, words.join(" "))
        }
    }

    fn job_args(subcommand: &str, handle: &JobHandle) -> Vec<String> {
        vec![
            "job".to_string(),
            subcommand.to_string(),
            "--farm-id".to_string(),
            handle.farm_id.to_string(),
            "--queue-id".to_string(),
            handle.queue_id.to_string(),
            "--job-id".to_string(),
            handle.job_id.clone(),
        ]
    }
}

#[async_trait]
impl JobBackend for DeadlineCli {
    async fn submit(
        &self,
        template: &JobTemplate,
        farm_id: &FarmId,
        queue_id: &QueueId,
    ) -> Result<String, SubmissionError> {
        let mut args = vec![
            "bundle".to_string(),
            "submit".to_string(),
            template.bundle_path.display().to_string(),
            "--farm-id".to_string(),
            farm_id.to_string(),
            "--queue-id".to_string(),
            queue_id.to_string(),
        ];
        for (name, value) in &template.parameters {
            args.push("--parameter".to_string());
            args.push(format!("{}={}", name, value));
        }

        let out = self.exec(&args, Some(self.submit_timeout)).await?;
        extract_job_id(&out).ok_or_else(|| SubmissionError::MissingJobId(preview(out.trim())))
    }

    async fn get_status(&self, handle: &JobHandle) -> Result<String, BackendError> {
        let out = self
            .exec(&Self::job_args("get", handle), Some(self.status_timeout))
            .await?;
        Ok(resolve_status(&out))
    }

    async fn get_logs(&self, handle: &JobHandle) -> Result<String, BackendError> {
        self.exec(&Self::job_args("logs", handle), Some(self.logs_timeout))
            .await
    }
}

fn extract_job_id(output: &str) -> Option<String> {
    JOB_ID_RE.find(output).map(|m| m.as_str().to_string())
}

/// Pick the status text that decides the job's fate.
///
/// A failed lifecycle wins over whatever the tasks report. Otherwise the task
/// run status is authoritative, since the lifecycle stays at CREATE_COMPLETE
/// while tasks run. A record with neither field yields an empty string, which
/// maps to an unknown (still in progress) status.
fn resolve_status(output: &str) -> String {
    let lifecycle = scalar_field(output, "lifecycleStatus");
    let task_run = scalar_field(output, "taskRunStatus");

    match (lifecycle, task_run) {
        (Some(l), _) if is_failed_lifecycle(&l) => l,
        (_, Some(t)) => t,
        (Some(l), None) => l,
        (None, None) => {
            debug!(output = %preview(output), "Job record has no status fields");
            String::new()
        }
    }
}

fn is_failed_lifecycle(status: &str) -> bool {
    let upper = status.to_ascii_uppercase();
    upper == "FAILED" || upper == "CANCELED" || upper.ends_with("_FAILED")
}

/// First unindented `key: value` scalar in a YAML mapping. Keys of nested
/// mappings are not considered.
fn scalar_field(text: &str, key: &str) -> Option<String> {
    text.lines()
        .filter(|line| !line.starts_with(char::is_whitespace))
        .find_map(|line| {
            let (k, v) = split_pair(line)?;
            (k == key).then_some(v)
        })
}

fn split_pair(line: &str) -> Option<(&str, String)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key, unquote(value.trim())))
}

fn unquote(value: &str) -> String {
    if let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        unescape(inner)
    } else if let Some(inner) = value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')) {
        inner.replace("''", "'")
    } else {
        value.to_string()
    }
}

/// Backslash escapes of a double-quoted YAML scalar.
fn unescape(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Entries of a top-level YAML list of mappings, as produced by
/// `deadline farm list` and `deadline queue list`.
///
/// An entry starts at a column-0 `- ` marker and owns the keys on that line
/// plus those indented to the mapping's own level. Deeper lines belong to
/// nested values and are skipped.
fn list_entries(text: &str, id_key: &str) -> Vec<ResourceSummary> {
    let mut entries: Vec<BTreeMap<String, String>> = Vec::new();

    for line in text.lines() {
        let field = if let Some(rest) = line.strip_prefix("- ") {
            entries.push(BTreeMap::new());
            rest
        } else if let Some(rest) = line.strip_prefix("  ") {
            if rest.starts_with(char::is_whitespace) || rest.starts_with('-') {
                continue;
            }
            rest
        } else {
            continue;
        };

        if let (Some(entry), Some((k, v))) = (entries.last_mut(), split_pair(field)) {
            entry.entry(k.to_string()).or_insert(v);
        }
    }

    entries
        .into_iter()
        .filter_map(|entry| {
            let id = entry.get(id_key).filter(|id| !id.is_empty())?.clone();
            let name = entry
                .get("displayName")
                .filter(|n| !n.is_empty())
                .cloned()
                .unwrap_or_else(|| id.clone());
            Some(ResourceSummary { id, name })
        })
        .collect()
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}
