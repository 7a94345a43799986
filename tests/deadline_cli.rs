//! Integration tests for the Deadline CLI backend.
//!
//! Each test installs a small shell script standing in for `deadline` and
//! drives it through the backend and the controller.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dsview::core::connection::{ConnectionStatus, check_connection};
use dsview::core::{
    BackendError, ChannelObserver, ControllerSettings, DeadlineCli, FarmId, JobBackend, JobHandle,
    JobLifecycleController, JobRequest, JobTemplate, QueueId, RunEvent, RunOutcome,
    SubmissionError,
};
use tempfile::{TempDir, tempdir};

// Writing an executable while another thread forks can leave the file busy
// for exec; keep script setup and use one test at a time.
static SERIAL: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

const HEALTHY_CLI: &str = r#"#!/bin/sh
echo "$@" >> "$(dirname "$0")/calls.log"
case "$1 $2" in
  "--version ")
    echo "deadline, version 0.52.1"
    ;;
  "bundle submit")
    echo "Submitting to Queue: Main"
    echo "Waiting for Job to be created..."
    echo "Submitted job bundle:"
    echo "   $3"
    echo "job-0123abcd"
    ;;
  "job get")
    echo "jobId: job-0123abcd"
    echo "name: ListSoftware"
    echo "lifecycleStatus: CREATE_COMPLETE"
    echo "taskRunStatus: SUCCEEDED"
    ;;
  "job logs")
    echo "[2025-12-03T21:49:40.112000+00:00] Session started"
    echo "[2025-12-03T21:49:43.773000+00:00] # Name    Version    Build    Channel"
    echo "[2025-12-03T21:49:43.774000+00:00] blender   4.2.3      hb0f4dca_0  deadline-cloud"
    echo "[2025-12-03T21:49:43.775000+00:00] zlib      1.2.13     h5eee18b_1  conda-forge"
    ;;
  "farm list")
    echo "- farmId: farm-0a1b"
    echo "  displayName: Render Farm"
    echo "- farmId: farm-2c3d"
    ;;
  "queue list")
    echo "- queueId: queue-77"
    echo "  displayName: 'Main Queue'"
    ;;
  *)
    echo "unknown command: $*" >&2
    exit 2
    ;;
esac
"#;

const REJECTING_CLI: &str = r#"#!/bin/sh
echo "An error occurred (AccessDeniedException) when calling the CreateJob operation" >&2
exit 1
"#;

const SILENT_CLI: &str = r#"#!/bin/sh
echo "Submission complete"
"#;

const HANGING_CLI: &str = r#"#!/bin/sh
exec sleep 5
"#;

const STUCK_STATUS_CLI: &str = r#"#!/bin/sh
case "$1 $2" in
  "bundle submit")
    echo "job-0123abcd"
    ;;
  "job get")
    exec sleep 30
    ;;
  *)
    exit 2
    ;;
esac
"#;

const STUCK_SUBMIT_CLI: &str = r#"#!/bin/sh
exec sleep 30
"#;

fn install_cli(dir: &TempDir, script: &str) -> PathBuf {
    let path = dir.path().join("deadline");
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn recorded_calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn cli_at(path: &Path) -> DeadlineCli {
    DeadlineCli::new(path.display().to_string())
}

fn handle() -> JobHandle {
    JobHandle {
        farm_id: FarmId::parse("farm-0a1b").unwrap(),
        queue_id: QueueId::parse("queue-77").unwrap(),
        job_id: "job-0123abcd".to_string(),
    }
}

fn template() -> JobTemplate {
    JobTemplate::new("/opt/bundles/list_software").with_parameter("CondaChannel", "conda-forge")
}

#[tokio::test]
async fn test_submit_passes_ids_and_parameters() {
    let _guard = SERIAL.lock().await;
    let dir = tempdir().unwrap();
    let cli = cli_at(&install_cli(&dir, HEALTHY_CLI));

    let job_id = cli
        .submit(
            &template(),
            &FarmId::parse("farm-0a1b").unwrap(),
            &QueueId::parse("queue-77").unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(job_id, "job-0123abcd");
    assert_eq!(
        recorded_calls(dir.path()),
        vec![
            "bundle submit /opt/bundles/list_software --farm-id farm-0a1b --queue-id queue-77 \
             --parameter CondaChannel=conda-forge"
                .to_string()
        ]
    );
}

#[tokio::test]
async fn test_status_and_logs_address_the_job() {
    let _guard = SERIAL.lock().await;
    let dir = tempdir().unwrap();
    let cli = cli_at(&install_cli(&dir, HEALTHY_CLI));

    assert_eq!(cli.get_status(&handle()).await.unwrap(), "SUCCEEDED");
    let logs = cli.get_logs(&handle()).await.unwrap();
    assert!(logs.contains("zlib"));

    let calls = recorded_calls(dir.path());
    assert_eq!(
        calls,
        vec![
            "job get --farm-id farm-0a1b --queue-id queue-77 --job-id job-0123abcd".to_string(),
            "job logs --farm-id farm-0a1b --queue-id queue-77 --job-id job-0123abcd".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_rejected_submission_carries_stderr() {
    let _guard = SERIAL.lock().await;
    let dir = tempdir().unwrap();
    let cli = cli_at(&install_cli(&dir, REJECTING_CLI));

    let err = cli
        .submit(
            &template(),
            &FarmId::parse("farm-0a1b").unwrap(),
            &QueueId::parse("queue-77").unwrap(),
        )
        .await
        .unwrap_err();

    match err {
        SubmissionError::Backend(BackendError::Exit { code, stderr, .. }) => {
            assert_eq!(code, "exit code 1");
            assert!(stderr.contains("AccessDeniedException"));
        }
        other => panic!("expected exit error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_submission_without_job_id() {
    let _guard = SERIAL.lock().await;
    let dir = tempdir().unwrap();
    let cli = cli_at(&install_cli(&dir, SILENT_CLI));

    let err = cli
        .submit(
            &template(),
            &FarmId::parse("farm-0a1b").unwrap(),
            &QueueId::parse("queue-77").unwrap(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SubmissionError::MissingJobId(ref out) if out == "Submission complete"));
}

#[tokio::test]
async fn test_missing_binary_is_not_installed() {
    let _guard = SERIAL.lock().await;
    let dir = tempdir().unwrap();
    let cli = cli_at(&dir.path().join("no-such-deadline"));

    let err = cli.get_status(&handle()).await.unwrap_err();
    assert!(matches!(err, BackendError::NotInstalled(_)));
}

#[tokio::test]
async fn test_slow_logs_time_out() {
    let _guard = SERIAL.lock().await;
    let dir = tempdir().unwrap();
    let cli = cli_at(&install_cli(&dir, HANGING_CLI)).with_logs_timeout(Duration::from_millis(200));

    let err = cli.get_logs(&handle()).await.unwrap_err();
    assert!(matches!(err, BackendError::TimedOut { .. }));
}

#[tokio::test]
async fn test_lists_farms_and_queues() {
    let _guard = SERIAL.lock().await;
    let dir = tempdir().unwrap();
    let cli = cli_at(&install_cli(&dir, HEALTHY_CLI));

    let farms = cli.list_farms().await.unwrap();
    assert_eq!(farms.len(), 2);
    assert_eq!(farms[0].id, "farm-0a1b");
    assert_eq!(farms[0].name, "Render Farm");
    assert_eq!(farms[1].name, "farm-2c3d");

    let queues = cli
        .list_queues(&FarmId::parse("farm-0a1b").unwrap())
        .await
        .unwrap();
    assert_eq!(queues.len(), 1);
    assert_eq!(queues[0].name, "Main Queue");
}

#[tokio::test]
async fn test_connection_check_against_healthy_cli() {
    let _guard = SERIAL.lock().await;
    let dir = tempdir().unwrap();
    let cli = cli_at(&install_cli(&dir, HEALTHY_CLI));

    let report = check_connection(&cli, Duration::from_secs(10)).await;

    assert_eq!(report.status, ConnectionStatus::Connected { farm_count: 2 });
    assert_eq!(report.cli_version.as_deref(), Some("deadline, version 0.52.1"));
    assert!(report.version_warning.is_none());
}

#[tokio::test]
async fn test_connection_check_without_cli() {
    let _guard = SERIAL.lock().await;
    let dir = tempdir().unwrap();
    let cli = cli_at(&dir.path().join("missing"));

    let report = check_connection(&cli, Duration::from_secs(10)).await;
    assert_eq!(report.status, ConnectionStatus::CliNotFound);
}

#[tokio::test]
async fn test_full_run_through_the_cli() {
    let _guard = SERIAL.lock().await;
    let dir = tempdir().unwrap();
    let cli = Arc::new(cli_at(&install_cli(&dir, HEALTHY_CLI)));

    let settings = ControllerSettings {
        poll_interval: Duration::from_millis(10),
        timeout: Duration::from_secs(30),
        log_settle_delay: Duration::ZERO,
    };
    let controller = JobLifecycleController::new(cli, settings);
    let (observer, mut events) = ChannelObserver::new();

    let handle = controller
        .run(
            JobRequest {
                template: template(),
                farm_id: "farm-0a1b".to_string(),
                queue_id: "queue-77".to_string(),
            },
            Arc::new(observer),
        )
        .unwrap();
    handle.wait().await.unwrap();

    let mut terminal = None;
    while let Ok(event) = events.try_recv() {
        if let RunEvent::Terminal(outcome) = event {
            terminal = Some(outcome);
        }
    }

    match terminal {
        Some(RunOutcome::Success(records)) => {
            let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
            assert_eq!(names, vec!["blender", "zlib"]);
        }
        other => panic!("expected success, got {:?}", other),
    }
    assert_eq!(recorded_calls(dir.path()).len(), 3);
}

/// Run the listing job to completion and return its terminal outcome.
async fn run_with(cli: DeadlineCli, settings: ControllerSettings) -> Option<RunOutcome> {
    let controller = JobLifecycleController::new(Arc::new(cli), settings);
    let token = controller.cancellation_token();
    let (observer, mut events) = ChannelObserver::new();

    let handle = controller
        .run(
            JobRequest {
                template: template(),
                farm_id: "farm-0a1b".to_string(),
                queue_id: "queue-77".to_string(),
            },
            Arc::new(observer),
        )
        .unwrap();
    let cancel = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        token.cancel();
    });

    tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("run finishes even when a CLI call hangs")
        .unwrap();
    cancel.abort();

    let mut terminal = None;
    while let Ok(event) = events.try_recv() {
        if let RunEvent::Terminal(outcome) = event {
            assert!(terminal.is_none(), "more than one terminal event");
            terminal = Some(outcome);
        }
    }
    terminal
}

#[tokio::test]
async fn test_stuck_status_check_ends_the_run() {
    let _guard = SERIAL.lock().await;
    let dir = tempdir().unwrap();
    let cli = cli_at(&install_cli(&dir, STUCK_STATUS_CLI))
        .with_status_timeout(Duration::from_millis(500));

    let settings = ControllerSettings {
        poll_interval: Duration::from_millis(10),
        timeout: Duration::from_secs(1),
        log_settle_delay: Duration::ZERO,
    };

    match run_with(cli, settings).await {
        Some(RunOutcome::Failure(reason)) => {
            assert!(reason.starts_with("status check failed: "), "{}", reason);
            assert!(reason.contains("did not finish"), "{}", reason);
        }
        other => panic!("expected status check failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stuck_submission_ends_the_run() {
    let _guard = SERIAL.lock().await;
    let dir = tempdir().unwrap();
    let cli = cli_at(&install_cli(&dir, STUCK_SUBMIT_CLI))
        .with_submit_timeout(Duration::from_millis(500));

    match run_with(cli, ControllerSettings::default()).await {
        Some(RunOutcome::Failure(reason)) => {
            assert!(reason.starts_with("submission failed: "), "{}", reason);
            assert!(reason.contains("did not finish"), "{}", reason);
        }
        other => panic!("expected submission failure, got {:?}", other),
    }
}
