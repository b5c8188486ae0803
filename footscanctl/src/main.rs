//! # footscanctl
//!
//! Operator CLI for the FootScan pipeline: run a scan end-to-end against
//! the local COLMAP install, inspect results and pull meshes out of the
//! results directory.

mod config;

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use footscan_core::{Orchestrator, PipelineConfig, ScanEvent, ScanEventKind};
use footscan_model::{ScanId, ScanStatus, ScanStatusView};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "footscanctl")]
#[command(about = "Turn photographs of a foot into a 3D mesh")]
struct Cli {
    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
struct OverrideArgs {
    /// Directory holding `<id>.stl` and `<id>_preview.glb` (overrides config)
    #[arg(long, env = "FOOTSCAN_RESULTS_DIR", global = true)]
    results_dir: Option<PathBuf>,

    /// Parent directory for per-scan working sets (overrides config)
    #[arg(long, env = "FOOTSCAN_WORK_DIR", global = true)]
    work_dir: Option<PathBuf>,

    /// COLMAP binary to invoke (overrides config)
    #[arg(long, env = "FOOTSCAN_COLMAP", global = true)]
    colmap: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one scan to completion and print its final status as JSON
    Process {
        /// Scan identifier; a fresh one is generated when omitted
        #[arg(long)]
        scan_id: Option<String>,

        /// Source photographs
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Print the status of a scan from the results directory
    Status { scan_id: String },
    /// Write a completed scan's full mesh (STL) to a file or stdout
    Fetch {
        scan_id: String,

        /// Destination file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = config::load(config::Overrides {
        results_dir: cli.overrides.results_dir,
        work_dir: cli.overrides.work_dir,
        colmap: cli.overrides.colmap,
    })
    .context("failed to load configuration")?;

    match cli.command {
        Command::Process { scan_id, images } => {
            run_process(config, scan_id, images).await
        }
        Command::Status { scan_id } => run_status(config, &scan_id).await,
        Command::Fetch { scan_id, output } => {
            run_fetch(config, &scan_id, output).await
        }
    }
}

async fn run_process(
    config: PipelineConfig,
    scan_id: Option<String>,
    images: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let scan_id = match scan_id {
        Some(raw) => ScanId::parse(raw).context("invalid scan id")?,
        None => ScanId::generate(),
    };

    let orchestrator = Orchestrator::with_colmap(config);
    let events = orchestrator.subscribe();
    let reporter = tokio::spawn(report_progress(events, scan_id.clone()));

    let ack = orchestrator
        .submit(scan_id.clone(), images)
        .await
        .with_context(|| format!("failed to submit scan {scan_id}"))?;
    info!(scan_id = %ack.scan_id, images = ack.accepted_images, "scan submitted");

    let view = orchestrator
        .wait(&scan_id)
        .await
        .with_context(|| format!("failed waiting for scan {scan_id}"))?;
    reporter.abort();

    print_view(&view)?;
    if view.status == ScanStatus::Failed {
        let detail = view
            .error
            .map(|failure| failure.to_string())
            .unwrap_or_else(|| "unknown failure".to_string());
        bail!("scan {scan_id} failed: {detail}");
    }
    Ok(())
}

async fn run_status(config: PipelineConfig, raw: &str) -> anyhow::Result<()> {
    let scan_id = ScanId::parse(raw).context("invalid scan id")?;
    let orchestrator = Orchestrator::with_colmap(config);
    let view = orchestrator
        .status(&scan_id)
        .await
        .with_context(|| format!("no status for scan {scan_id}"))?;
    print_view(&view)
}

async fn run_fetch(
    config: PipelineConfig,
    raw: &str,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let scan_id = ScanId::parse(raw).context("invalid scan id")?;
    let orchestrator = Orchestrator::with_colmap(config);
    let mut stream = orchestrator
        .fetch(&scan_id)
        .await
        .with_context(|| format!("scan {scan_id} has no mesh to fetch"))?;

    let mut sink: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match &output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let mut written = 0usize;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("failed to read mesh")?;
        sink.write_all(&chunk).await.context("failed to write mesh")?;
        written += chunk.len();
    }
    sink.flush().await.context("failed to flush mesh")?;

    if let Some(path) = output {
        info!(scan_id = %scan_id, bytes = written, path = %path.display(), "mesh written");
    }
    Ok(())
}

async fn report_progress(
    mut events: broadcast::Receiver<ScanEvent>,
    scan_id: ScanId,
) {
    loop {
        match events.recv().await {
            Ok(event) if event.scan_id == scan_id => match event.kind {
                ScanEventKind::StatusChanged { status } => {
                    info!(scan_id = %scan_id, %status, "status changed");
                }
                ScanEventKind::StageStarted { stage } => {
                    info!(scan_id = %scan_id, %stage, "stage started");
                }
                ScanEventKind::StageFinished { stage, elapsed_ms } => {
                    info!(scan_id = %scan_id, %stage, elapsed_ms, "stage finished");
                }
            },
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "progress reporter fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_view(view: &ScanStatusView) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(view)
        .context("failed to serialize scan status")?;
    println!("{json}");
    Ok(())
}
