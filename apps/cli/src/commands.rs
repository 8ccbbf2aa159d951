//! Subcommand implementations

use crate::output;
use crate::progress;
use crate::Cli;
use ahnget_core::{
    load_index, Converter, Fetcher, GdalTools, Pipeline, PreflightAuditor, ProgressStore,
};
use anyhow::{bail, Context, Result};
use console::style;
use dialoguer::Confirm;
use std::sync::Arc;
use tracing::warn;

/// Start or resume the download/verification pipeline.
pub async fn download(cli: &Cli) -> Result<()> {
    output::banner("AHN Downloader - Actueel Hoogtebestand Nederland");

    let gdal = Arc::new(GdalTools::detect().await);
    match gdal.version() {
        Some(version) => println!("{} {}", style("✓").green(), version),
        None => println!(
            "{} GDAL not available - integrity checks will be skipped",
            style("⚠").yellow()
        ),
    }

    if !cli.index.exists() {
        bail!("Index file not found: {:?}", cli.index);
    }

    tokio::fs::create_dir_all(&cli.download_dir)
        .await
        .with_context(|| format!("creating download directory {:?}", cli.download_dir))?;
    println!("{} Download directory: {:?}", style("✓").green(), cli.download_dir);

    let store = Arc::new(ProgressStore::load(&cli.progress_file));
    println!("{} Progress tracking: {:?}", style("✓").green(), cli.progress_file);
    println!();

    let items = load_index(&cli.index)?;
    store.set_total_items(items.len());

    // Re-check everything previously marked completed before new work.
    let auditor = PreflightAuditor::new(store.clone(), gdal.clone(), cli.download_dir.clone());
    let summary = auditor.run(&items).await;
    output::print_preflight(&summary);

    let record = store.snapshot();
    let remaining = items.len().saturating_sub(record.stats.completed_count);
    println!("Total files: {}", items.len());
    println!("Already completed: {}", record.stats.completed_count);
    println!("Previously failed: {}", record.stats.failed_count);
    println!("Remaining: {}", remaining);
    println!();

    if remaining == 0 {
        println!("All files have been processed!");
        return Ok(());
    }

    if !cli.yes
        && !Confirm::new()
            .with_prompt("Start download?")
            .default(true)
            .interact()?
    {
        return Ok(());
    }

    println!("Starting parallel download/verification pipeline...");
    println!();

    let pipeline = Pipeline::new(
        store.clone(),
        gdal,
        Fetcher::new()?,
        cli.download_dir.clone(),
    );

    let cancel = pipeline.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping pipeline");
            eprintln!("\n{} Interrupting download pipeline...", style("⚠").yellow());
            cancel.cancel();
        }
    });

    let ui = tokio::spawn(progress::drive(pipeline.subscribe()));
    let report = pipeline.run(&items).await;
    // Dropping the pipeline closes the event channel and ends the UI task.
    drop(pipeline);
    let _ = ui.await;

    output::print_run_summary(&report, &store.snapshot());
    println!("Progress saved to: {:?}", cli.progress_file);
    println!("Errors logged to: {:?}", cli.error_log);
    Ok(())
}

/// Run the preflight audit without downloading anything.
pub async fn verify(cli: &Cli) -> Result<()> {
    output::banner("Verification Only Mode");

    if !cli.index.exists() {
        bail!("Index file not found: {:?}", cli.index);
    }

    let gdal = Arc::new(GdalTools::detect().await);
    let store = Arc::new(ProgressStore::load(&cli.progress_file));
    let items = load_index(&cli.index)?;

    let auditor = PreflightAuditor::new(store, gdal, cli.download_dir.clone());
    let summary = auditor.run(&items).await;
    output::print_preflight(&summary);
    Ok(())
}

/// Reproject verified sheets to WGS84.
pub async fn convert(cli: &Cli, workers: usize) -> Result<()> {
    output::banner("GDAL TIF to WGS84 Converter");

    let gdal = Arc::new(GdalTools::detect().await);
    if !gdal.is_available() {
        bail!("GDAL tools are not available; install GDAL to use conversion");
    }

    let converter = Converter::new(gdal, cli.download_dir.clone(), cli.output_dir.clone())
        .with_workers(workers);

    let cancel = converter.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} Cancelling remaining conversions...", style("⚠").yellow());
            cancel.cancel();
        }
    });

    let report = converter.run().await?;
    output::print_convert_summary(&report);
    Ok(())
}

/// Print the progress-file statistics.
pub fn status(cli: &Cli) -> Result<()> {
    let store = ProgressStore::load(&cli.progress_file);
    let record = store.snapshot();

    output::banner("Download Status");
    println!("Total files: {}", record.stats.total_files);
    println!("Completed: {}", record.stats.completed_count);
    println!("Failed attempts: {}", record.stats.failed_count);
    println!(
        "Total downloaded: {}",
        output::format_bytes(record.stats.total_bytes_downloaded)
    );
    if let Some(updated) = record.last_updated {
        println!("Last updated: {}", updated);
    }
    Ok(())
}
