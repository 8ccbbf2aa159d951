//! Progress bar rendering for the download pipeline

use ahnget_core::PipelineEvent;
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use tokio::sync::broadcast;

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
        .unwrap()
        .progress_chars("█▓▒░  ")
}

/// Consume pipeline events until the sender side closes, rendering one
/// progress bar per in-flight sheet.
pub async fn drive(mut events: broadcast::Receiver<PipelineEvent>) {
    let multi = MultiProgress::new();
    let mut bars: HashMap<String, ProgressBar> = HashMap::new();

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            PipelineEvent::FetchStarted {
                id,
                filename,
                position,
                total,
                expected_size,
            } => {
                let pb = multi.add(ProgressBar::new(expected_size));
                pb.set_style(bar_style());
                pb.set_message(format!("[{position}/{total}] {filename}"));
                bars.insert(id, pb);
            }

            PipelineEvent::FetchProgress { id, bytes } => {
                if let Some(pb) = bars.get(&id) {
                    pb.inc(bytes);
                }
            }

            PipelineEvent::Queued { id, reused_local } => {
                if let Some(pb) = bars.get(&id) {
                    if reused_local {
                        pb.set_message(format!("{id} already on disk, verifying"));
                    } else {
                        pb.set_message(format!("{id} queued for verification"));
                    }
                }
            }

            PipelineEvent::FetchFailed { id, error } => {
                if let Some(pb) = bars.remove(&id) {
                    pb.abandon_with_message(format!(
                        "{} {} failed: {}",
                        style("✗").red().bold(),
                        id,
                        error
                    ));
                }
            }

            PipelineEvent::Validated { id } => {
                if let Some(pb) = bars.remove(&id) {
                    pb.finish_with_message(format!(
                        "{} {} verified",
                        style("✓").green().bold(),
                        id
                    ));
                }
            }

            PipelineEvent::ValidationFailed { id } => {
                if let Some(pb) = bars.remove(&id) {
                    pb.abandon_with_message(format!(
                        "{} {} failed integrity check",
                        style("✗").red().bold(),
                        id
                    ));
                }
            }
        }
    }

    for pb in bars.into_values() {
        pb.finish_and_clear();
    }
}
