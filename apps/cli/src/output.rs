//! Output formatting utilities

use ahnget_types::{ConvertReport, PipelineReport, PreflightSummary, ProgressRecord};
use console::style;

/// Print a section banner.
pub fn banner(title: &str) {
    println!("{}", "=".repeat(70));
    println!("{}", style(title).bold());
    println!("{}", "=".repeat(70));
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

pub fn print_preflight(summary: &PreflightSummary) {
    if summary.checked == 0 {
        return;
    }
    println!(
        "Verified {} previously completed file(s): {} ok",
        summary.checked, summary.ok
    );
    if summary.demoted() > 0 {
        println!(
            "{} {} re-queued ({} missing, {} wrong size, {} corrupt)",
            style("⚠").yellow(),
            summary.demoted(),
            summary.missing,
            summary.size_mismatch,
            summary.corrupt
        );
    }
    println!();
}

pub fn print_run_summary(report: &PipelineReport, record: &ProgressRecord) {
    println!();
    banner(if report.cancelled {
        "Run interrupted"
    } else {
        "Run complete"
    });
    println!("Downloaded this run: {}", report.downloaded);
    println!("Reused local files: {}", report.reused_local);
    println!("Fetch failures: {}", report.fetch_failed);
    println!(
        "Completed: {}/{}",
        record.stats.completed_count, record.stats.total_files
    );
    println!("Failed attempts on record: {}", record.stats.failed_count);
    println!(
        "Total downloaded: {}",
        format_bytes(record.stats.total_bytes_downloaded)
    );
    if report.cancelled {
        println!();
        println!("Run the download command again to resume where you left off.");
    }
}

pub fn print_convert_summary(report: &ConvertReport) {
    println!();
    banner(if report.cancelled {
        "Conversion interrupted"
    } else {
        "Conversion complete"
    });
    println!("Source files: {}", report.total_sources);
    println!("Already converted: {}", report.valid_existing);
    println!("Converted this run: {}", report.converted);
    if report.failed > 0 {
        println!("{} Failed: {}", style("✗").red(), report.failed);
    }
}
