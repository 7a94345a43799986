use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use dsview::cli::report;
use dsview::cli::watch::watch;
use dsview::config::{self, AppConfig};
use dsview::context::AppContext;
use dsview::core::connection::check_connection;
use dsview::core::{
    BackendType, ChannelObserver, ControllerSettings, DeadlineCli, FarmId, JobLifecycleController,
    JobRequest, RunEvent, RunOutcome, SoftwareRecord, parser,
};
use dsview::export;
use dsview::logging::{self, LogConfig};
use dsview::settings::{Settings, SettingsStore};
use serde::Serialize;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Parser)]
#[command(name = "dsview")]
#[command(about = "List the software available on an AWS Deadline Cloud queue", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Serialize)]
struct GlobalArgs {
    /// Debug-level logging
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON on stderr
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long, global = true)]
    json_logs: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true, value_enum)]
    backend: Option<BackendType>,

    /// Path to the deadline executable
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    deadline_bin: Option<String>,
}

/// Command-line values that override the config file and environment.
#[derive(Serialize)]
struct Overrides<'a> {
    #[serde(flatten)]
    global: &'a GlobalArgs,
    #[serde(flatten)]
    run: Option<&'a RunArgs>,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit the listing job, wait for it and show the packages it found
    Run(RunArgs),
    /// Parse a saved job log without submitting anything
    Parse(ParseArgs),
    /// List farms visible to the current credentials
    Farms,
    /// List queues in a farm
    Queues(QueuesArgs),
    /// Check that the Deadline CLI is installed and can reach the service
    Check,
    /// Print the effective configuration
    Config(ConfigArgs),
}

#[derive(Args, Serialize)]
struct RunArgs {
    /// Defaults to the last farm used
    #[serde(skip)]
    #[arg(long)]
    farm_id: Option<String>,

    /// Defaults to the last queue used
    #[serde(skip)]
    #[arg(long)]
    queue_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    conda_channel: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    bundle_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    poll_interval_secs: Option<u64>,

    #[serde(skip)]
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct ParseArgs {
    /// Log file saved from a listing job
    file: PathBuf,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Default)]
struct OutputArgs {
    /// Export to CSV; without a path, a timestamped file in the current directory
    #[arg(long, value_name = "PATH")]
    csv: Option<Option<PathBuf>>,

    /// Print records as JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct QueuesArgs {
    /// Defaults to the last farm used
    #[arg(long)]
    farm_id: Option<String>,
}

#[derive(Args)]
struct ConfigArgs {
    /// Write the effective configuration to the config file
    #[arg(long)]
    write: bool,

    /// Overwrite an existing config file
    #[arg(long, requires = "write")]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let overrides = Overrides {
        global: &cli.global,
        run: match &cli.command {
            Commands::Run(args) => Some(args),
            _ => None,
        },
    };
    let config = AppConfig::new(Some(&overrides))?;

    logging::init(LogConfig::from(&config));
    let ctx = AppContext::new(config, SettingsStore::default_location());

    match cli.command {
        Commands::Run(args) => run_job(ctx, args)
            .await
            .context("Software listing job failed"),
        Commands::Parse(args) => parse_log(args).context("Failed to parse log file"),
        Commands::Farms => list_farms(&ctx).await.context("Failed to list farms"),
        Commands::Queues(args) => list_queues(&ctx, args)
            .await
            .context("Failed to list queues"),
        Commands::Check => run_check(&ctx).await,
        Commands::Config(args) => show_config(&ctx, args),
    }
}

async fn run_job(ctx: AppContext, args: RunArgs) -> Result<()> {
    let saved = ctx.settings.load();
    let farm_id = args
        .farm_id
        .or_else(|| saved.farm_id().map(str::to_string))
        .context("No farm ID given and none saved; pass --farm-id")?;
    let queue_id = args
        .queue_id
        .or_else(|| saved.queue_id().map(str::to_string))
        .context("No queue ID given and none saved; pass --queue-id")?;
    let channel = match args.conda_channel {
        Some(channel) => channel,
        None => saved
            .conda_channel
            .clone()
            .unwrap_or_else(|| ctx.config.conda_channel.clone()),
    };

    if ctx.config.backend == BackendType::Deadline && !ctx.config.bundle_path.is_dir() {
        bail!(
            "Bundle directory not found: {}",
            ctx.config.bundle_path.display()
        );
    }

    let request = JobRequest {
        template: ctx.config.template(&channel),
        farm_id: farm_id.clone(),
        queue_id: queue_id.clone(),
    };
    let controller = JobLifecycleController::new(
        ctx.backend.clone(),
        ControllerSettings::from_config(&ctx.config),
    );
    let (observer, events) = ChannelObserver::new();
    let handle = controller.run(request, Arc::new(observer))?;

    let remembered = Settings {
        farm_id,
        queue_id,
        conda_channel: Some(channel),
    };
    if let Err(e) = ctx.settings.save(&remembered) {
        warn!(error = %format!("{:#}", e), "Could not save settings");
    }

    let outcome = watch(handle, events, forward_interrupts()?, |event| match event {
        RunEvent::Submitted(job) => eprintln!("{}", report::submitted_line(job)),
        RunEvent::Progress(progress) => eprintln!("{}", report::progress_line(progress)),
        RunEvent::ValidationFailed(message) => warn!("{}", message),
        RunEvent::Terminal(_) => {}
    })
    .await?;

    match outcome {
        RunOutcome::Success(records) => present(&records, args.output),
        RunOutcome::Failure(reason) => Err(anyhow!(reason)),
        RunOutcome::Timeout => bail!("Job timeout - exceeded maximum wait time"),
        RunOutcome::Cancelled => bail!("Cancelled"),
    }
}

/// Forward every SIGINT into a channel. One listener lives for the whole
/// run, so a signal arriving while an event is printed is still delivered.
fn forward_interrupts() -> Result<mpsc::Receiver<()>> {
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to install the Ctrl-C handler")?;
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        while sigint.recv().await.is_some() {
            if tx.send(()).await.is_err() {
                break;
            }
        }
    });
    Ok(rx)
}

fn parse_log(args: ParseArgs) -> Result<()> {
    let content = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    let records = parser::parse(&content);
    if records.is_empty() {
        bail!("No software packages found in {}", args.file.display());
    }
    present(&records, args.output)
}

fn present(records: &[SoftwareRecord], output: OutputArgs) -> Result<()> {
    if output.json {
        let json = serde_json::to_string_pretty(records).context("Failed to serialize records")?;
        println!("{}", json);
    } else {
        print!("{}", report::software_table(records));
        println!();
        eprintln!("Found {} software packages", records.len());
    }

    if let Some(path) = output.csv {
        let path =
            path.unwrap_or_else(|| PathBuf::from(export::default_export_filename(&Local::now())));
        export::write_csv(&path, records)?;
        eprintln!("Exported to {}", path.display());
    }

    Ok(())
}

async fn list_farms(ctx: &AppContext) -> Result<()> {
    let cli = DeadlineCli::from_config(&ctx.config);
    let farms = cli.list_farms().await?;
    if farms.is_empty() {
        println!("No farms found");
    } else {
        print!("{}", report::resource_table(&farms));
    }
    Ok(())
}

async fn list_queues(ctx: &AppContext, args: QueuesArgs) -> Result<()> {
    let raw = args
        .farm_id
        .or_else(|| ctx.settings.load().farm_id().map(str::to_string))
        .context("No farm ID given and none saved; pass --farm-id")?;
    let farm_id = FarmId::parse(&raw)?;

    let cli = DeadlineCli::from_config(&ctx.config);
    let queues = cli.list_queues(&farm_id).await?;
    if queues.is_empty() {
        println!("No queues found in {}", farm_id);
    } else {
        print!("{}", report::resource_table(&queues));
    }
    Ok(())
}

async fn run_check(ctx: &AppContext) -> Result<()> {
    let cli = DeadlineCli::from_config(&ctx.config);
    let timeout = Duration::from_secs(ctx.config.connection_timeout_secs);
    let report = check_connection(&cli, timeout).await;

    if let Some(version) = &report.cli_version {
        println!("Deadline CLI: {}", version);
    }
    if let Some(warning) = &report.version_warning {
        println!("Warning: {}", warning);
    }
    println!("{}", report.status.describe());

    if !report.status.is_connected() {
        bail!("Not connected to AWS Deadline Cloud");
    }
    Ok(())
}

fn show_config(ctx: &AppContext, args: ConfigArgs) -> Result<()> {
    let content = ctx.config.to_toml()?;
    if !args.write {
        print!("{}", content);
        return Ok(());
    }

    let path = config::config_file_path().context("Cannot determine config file location")?;
    if path.exists() && !args.force {
        bail!(
            "{} already exists; pass --force to overwrite",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
    }
    std::fs::write(&path, content).context("Failed to write config file")?;
    println!("Wrote {}", path.display());
    Ok(())
}
