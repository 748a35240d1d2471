//! pc-backup - Main entry point
//!
//! Backs up personal folders to a destination volume and exits with
//! 0 (complete), 2 (complete with per-file failures) or 1 (failed).

use anyhow::Result;
use backup_engine::config::{parse_folder_arg, Config};
use backup_engine::executor::encrypt::EncryptionResult;
use backup_engine::executor::report::FolderOutcome;
use backup_engine::progress::{format_bytes, format_duration};
use backup_engine::shutdown::ShutdownCoordinator;
use backup_engine::{utils, BackupSession, ExitStatus, FolderSpec, Phase, RunReport, SessionEvent};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

/// Failures listed per folder in the summary
const MAX_LISTED_FAILURES: usize = 5;

#[derive(Parser, Debug)]
#[command(name = "pc-backup", author, version, about, long_about = None)]
struct Args {
    /// Destination volume root (e.g. a mounted USB drive)
    #[arg(value_name = "DESTINATION")]
    destination: PathBuf,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Password for sensitive folders (no password, no encryption)
    #[arg(short, long, env = "PC_BACKUP_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Folder to back up (repeatable, replaces configured folders)
    #[arg(long = "folder", value_name = "NAME=PATH", value_parser = parse_folder_arg)]
    folders: Vec<(String, PathBuf)>,

    /// Sensitive folder to back up and encrypt (repeatable)
    #[arg(long = "sensitive", value_name = "NAME=PATH", value_parser = parse_folder_arg)]
    sensitive: Vec<(String, PathBuf)>,

    /// Number of concurrent copy workers (overrides config)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };

    if let Some(workers) = args.workers {
        config.engine.max_workers = workers;
        config.validate()?;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting pc-backup v{}", env!("CARGO_PKG_VERSION"));

    let explicit_folders: Vec<FolderSpec> = args
        .folders
        .iter()
        .map(|(name, path)| FolderSpec::normal(name, path))
        .chain(
            args.sensitive
                .iter()
                .map(|(name, path)| FolderSpec::sensitive(name, path)),
        )
        .collect();
    let plan = config.to_plan(&args.destination, explicit_folders, args.password.clone());

    // First SIGINT/SIGTERM cancels the session between files
    let cancel_token = CancellationToken::new();
    let signals = ShutdownCoordinator::new(cancel_token.clone()).spawn();

    let session =
        BackupSession::new(config.session_settings()).with_cancel_token(cancel_token.clone());
    let printer = spawn_progress_printer(session.events().subscribe());

    let report = session.run(&plan).await;

    signals.abort();
    let _ = printer.await;

    print_summary(&report);

    let status = report.exit_status.unwrap_or(ExitStatus::Failed);
    Ok(ExitCode::from(status.code()))
}

fn spawn_progress_printer(
    mut events: tokio::sync::broadcast::Receiver<SessionEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Progress(progress)) => println!(
                    "  {}: {}/{} files ({:.0}%)",
                    progress.folder,
                    progress.files_done,
                    progress.total_files,
                    progress.percent_complete
                ),
                Ok(SessionEvent::FolderStarted { folder }) => println!("Copying {}...", folder),
                Ok(SessionEvent::FolderSkipped { folder, reason }) => {
                    println!("Skipping {}: {}", folder, reason)
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_summary(report: &RunReport) {
    let status = match &report.phase {
        Phase::Failed(reason) => format!("FAILED ({})", reason),
        _ if report.exit_status == Some(ExitStatus::CompletedWithFailures) => {
            "completed with failures".to_string()
        }
        _ => "complete".to_string(),
    };

    println!();
    println!("Backup session {}: {}", report.session_id, status);
    if let Some(path) = &report.session_path {
        println!("  Location: {}", path.display());
    }

    for folder in &report.folders {
        match &folder.outcome {
            FolderOutcome::Copied(result) => {
                println!(
                    "  {}: {} copied, {} skipped, {} failed ({})",
                    folder.name,
                    result.copied,
                    result.skipped,
                    result.failed,
                    format_bytes(result.bytes_copied)
                );
                for failure in result.failures.iter().take(MAX_LISTED_FAILURES) {
                    println!("    ! {}: {}", failure.path.display(), failure.reason);
                }
                if result.failures.len() > MAX_LISTED_FAILURES {
                    println!(
                        "    ... and {} more (see run report)",
                        result.failures.len() - MAX_LISTED_FAILURES
                    );
                }
            }
            FolderOutcome::Skipped { reason } => {
                println!("  {}: skipped ({})", folder.name, reason)
            }
        }
    }

    if let Some(inventory) = &report.inventory {
        println!(
            "  Inventory: {} files, {} ({} unreadable) -> {}",
            inventory.total_files,
            format_bytes(inventory.total_size_bytes),
            inventory.unreadable,
            inventory.manifest_path.display()
        );
    }

    match &report.encryption {
        Some(EncryptionResult::Completed {
            encrypted,
            already_encrypted,
            failures,
        }) => println!(
            "  Encryption: {} encrypted, {} already encrypted, {} failed",
            encrypted,
            already_encrypted,
            failures.len()
        ),
        Some(EncryptionResult::Unavailable { reason }) => {
            println!("  Encryption: unavailable ({})", reason)
        }
        Some(EncryptionResult::Skipped) | None => {}
    }

    if let Some(finished_at) = report.finished_at {
        let seconds = (finished_at - report.started_at).num_seconds().max(0) as u64;
        println!("  Duration: {}", format_duration(seconds));
    }
}
