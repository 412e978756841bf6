use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use incoming_to_library::batch::{BatchDriver, BatchSummary};
use incoming_to_library::cancellation::CancellationFlag;
use incoming_to_library::config::Config;
use incoming_to_library::error::ImportError;
use incoming_to_library::exif::ExifDateExtractor;
use incoming_to_library::external_tool::ProcessToolRunner;
use incoming_to_library::file_writer::RealFileSystemWriter;
use incoming_to_library::photo_filter::TempFileFilter;
use incoming_to_library::pipeline::ImportPipeline;
use incoming_to_library::processor::{FileMetadataTagger, TypeProcessor};
use incoming_to_library::source_reader::DirectorySourceReader;

const SETTINGS_FILE_NAME: &str = "appsettings.json";

/// Copy incoming photos and videos into a date-based library, once each
#[derive(Parser, Debug)]
#[command(name = "incoming-to-library")]
#[command(version, about, long_about = None)]
struct Args {
    /// Settings file [default: appsettings.json next to the executable]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Library root, overriding DestinationPath from the settings file
    #[arg(short, long)]
    destination: Option<PathBuf>,

    /// Log debug detail to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("incoming_to_library={}", default_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(args: Args) -> Result<ExitCode> {
    let settings_path = match args.config {
        Some(path) => path,
        None => default_settings_path()?,
    };
    let mut config = Config::load(&settings_path)?;
    if let Some(destination) = args.destination {
        config.destination_path = destination;
    }
    info!(settings = %settings_path.display(), sources = config.photo_sources.len(), "loaded settings");

    lower_priority();

    let cancel = CancellationFlag::new();
    tokio::spawn(watch_for_interrupt(cancel.clone()));

    let result = tokio::task::spawn_blocking(move || run_batch(&config, &cancel))
        .await
        .context("Import task panicked")?;

    match result {
        Ok(summary) => {
            print_summary(&summary);
            Ok(ExitCode::SUCCESS)
        }
        Err(ImportError::DestinationMissing(path)) => {
            println!("Destination path '{}' doesn't exist, nothing to do", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Err(e.into()),
    }
}

fn run_batch(config: &Config, cancel: &CancellationFlag) -> Result<BatchSummary, ImportError> {
    let date_extractor = ExifDateExtractor::new();
    let file_writer = RealFileSystemWriter::new();
    let tool_runner = ProcessToolRunner::new();
    let tagger = FileMetadataTagger::new();
    let processor = TypeProcessor::new(&file_writer, &tool_runner, &tagger);
    let source_reader = DirectorySourceReader::new();
    let filter = TempFileFilter::new();

    let pipeline = ImportPipeline::new(config, &date_extractor, &file_writer, &processor)?;
    let driver = BatchDriver::new(config, &source_reader, &filter, pipeline);
    driver.run(cancel)
}

/// First Ctrl-C finishes the current file and flushes ledgers, a second one exits.
async fn watch_for_interrupt(cancel: CancellationFlag) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    warn!("Interrupt received, finishing current file");
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Second interrupt, exiting without saving metadata");
        std::process::exit(130);
    }
}

fn default_settings_path() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Failed to locate executable")?;
    let dir = exe
        .parent()
        .context("Executable has no parent directory")?;
    Ok(dir.join(SETTINGS_FILE_NAME))
}

const NICENESS_STEP: i32 = 10;
const MAX_NICENESS: i32 = 19;

/// Raises niceness relative to what we were started with, capped at the lowest priority.
#[cfg_attr(not(unix), allow(dead_code))]
fn lowered_niceness(current: i32) -> i32 {
    current.saturating_add(NICENESS_STEP).min(MAX_NICENESS)
}

#[cfg(unix)]
fn lower_priority() {
    // External tools inherit the new niceness.
    // getpriority can legitimately return -1, so errors are only visible through errno.
    clear_errno();
    let current = unsafe { libc::getpriority(libc::PRIO_PROCESS, 0) };
    if current == -1 {
        if let Some(code) = std::io::Error::last_os_error().raw_os_error().filter(|c| *c != 0) {
            warn!(
                "Failed to read process priority: {}",
                std::io::Error::from_raw_os_error(code)
            );
            return;
        }
    }

    let target = lowered_niceness(current);
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, target) };
    if rc != 0 {
        warn!("Failed to lower process priority: {}", std::io::Error::last_os_error());
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn clear_errno() {
    unsafe { *libc::__errno_location() = 0 };
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn clear_errno() {
    unsafe { *libc::__error() = 0 };
}

#[cfg(all(
    unix,
    not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd"
    ))
))]
fn clear_errno() {}

#[cfg(not(unix))]
fn lower_priority() {}

fn print_summary(summary: &BatchSummary) {
    println!();
    if summary.cancelled {
        println!("✗ Import cancelled");
    } else {
        println!("✓ Import complete!");
    }
    println!("  Processed: {}", summary.processed);
    println!("  Reprocessed: {}", summary.reprocessed);
    println!("  Skipped: {}", summary.skipped);
    println!("  Before cutoff: {}", summary.before_cutoff);
    println!("  Failed: {}", summary.failed);
    println!("  Metadata files saved: {}", summary.ledgers_saved);
}
