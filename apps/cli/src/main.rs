//! ahnget CLI - Actueel Hoogtebestand Nederland downloader
//!
//! Downloads AHN raster sheets listed in a kaartblad index, verifies
//! them with GDAL, and resumes interrupted runs from the progress file.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// ahnget - AHN raster downloader
#[derive(Parser)]
#[command(name = "ahnget")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Kaartblad index file
    #[arg(long, env = "AHNGET_INDEX", default_value = "kaartbladindex.json")]
    pub index: PathBuf,

    /// Directory for downloaded sheets
    #[arg(long, default_value = "downloads")]
    pub download_dir: PathBuf,

    /// Directory for reprojected (WGS84) sheets
    #[arg(long, default_value = "downloads_wgs84")]
    pub output_dir: PathBuf,

    /// Progress tracking file
    #[arg(long, default_value = "download_progress.json")]
    pub progress_file: PathBuf,

    /// Error log file
    #[arg(long, default_value = "download_errors.log")]
    pub error_log: PathBuf,

    /// Answer yes to confirmation prompts
    #[arg(short, long)]
    pub yes: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start or resume the download/verification pipeline
    Download,

    /// Verify existing downloads without fetching anything
    Verify,

    /// Convert verified sheets to WGS84
    Convert {
        /// Number of parallel gdalwarp workers
        #[arg(long, default_value_t = ahnget_core::CONVERSION_WORKERS)]
        workers: usize,
    },

    /// Show progress statistics
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    match cli.command {
        Commands::Download => commands::download(&cli).await,
        Commands::Verify => commands::verify(&cli).await,
        Commands::Convert { workers } => commands::convert(&cli, workers).await,
        Commands::Status => commands::status(&cli),
    }
}

/// Log warnings and errors to the error-log file always; mirror to
/// stdout at a level controlled by --verbose / AHNGET_LOG.
fn init_tracing(cli: &Cli) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cli.error_log)?;

    let stdout_level = if cli.verbose { "info" } else { "warn" };
    let stdout_filter = EnvFilter::try_from_env("AHNGET_LOG")
        .unwrap_or_else(|_| EnvFilter::new(stdout_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Arc::new(file))
                .with_ansi(false)
                .with_filter(EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_filter(stdout_filter))
        .try_init()?;

    Ok(())
}
