//! WGS84 conversion of verified sheets
//!
//! Reprojects every downloaded `.tif` to EPSG:4326 with gdalwarp, a few
//! sheets at a time. Existing outputs are integrity-checked first and
//! corrupt ones re-queued. Each conversion is verified against its
//! source: nonzero dimensions, matching band count, a WGS84 CRS, and a
//! dimension ratio that reprojection alone can explain.

use crate::error::AhngetError;
use crate::gdal::GdalTools;
use ahnget_types::ConvertReport;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Number of gdalwarp subprocesses run in parallel.
pub const CONVERSION_WORKERS: usize = 4;

enum Outcome {
    Converted,
    Failed,
    Cancelled,
}

pub struct Converter {
    gdal: Arc<GdalTools>,
    source_dir: PathBuf,
    output_dir: PathBuf,
    workers: usize,
    cancel: CancellationToken,
}

impl Converter {
    pub fn new(gdal: Arc<GdalTools>, source_dir: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            gdal,
            source_dir,
            output_dir,
            workers: CONVERSION_WORKERS,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Convert everything in the source directory that does not already
    /// have a valid output. Conversion strictly requires the GDAL tools;
    /// there is no assume-valid fallback here.
    pub async fn run(&self) -> Result<ConvertReport, AhngetError> {
        if !self.gdal.is_available() {
            return Err(AhngetError::GdalUnavailable);
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;

        let sources = tif_files(&self.source_dir).await?;
        let existing = tif_files(&self.output_dir).await?;

        let invalid = self.check_existing(&existing).await;
        let valid_existing: HashSet<&String> = existing
            .iter()
            .filter(|name| !invalid.contains(*name))
            .collect();

        let to_process: Vec<String> = sources
            .iter()
            .filter(|name| !valid_existing.contains(name))
            .cloned()
            .collect();

        let mut report = ConvertReport {
            total_sources: sources.len(),
            valid_existing: valid_existing.len(),
            ..Default::default()
        };

        if to_process.is_empty() {
            info!("All files have already been converted and verified");
            return Ok(report);
        }

        info!(
            "Converting {} files with {} workers",
            to_process.len(),
            self.workers
        );

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join_set = JoinSet::new();

        for name in to_process {
            let gdal = self.gdal.clone();
            let cancel = self.cancel.clone();
            let semaphore = semaphore.clone();
            let input = self.source_dir.join(&name);
            let output = self.output_dir.join(&name);

            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (name, Outcome::Cancelled),
                };
                if cancel.is_cancelled() {
                    return (name, Outcome::Cancelled);
                }
                let outcome = convert_one(&gdal, &name, &input, &output).await;
                (name, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Outcome::Converted)) => report.converted += 1,
                Ok((_, Outcome::Failed)) => report.failed += 1,
                Ok((_, Outcome::Cancelled)) => report.cancelled = true,
                Err(e) => {
                    error!("Conversion task panicked: {}", e);
                    report.failed += 1;
                }
            }
        }

        if self.cancel.is_cancelled() {
            report.cancelled = true;
        }
        Ok(report)
    }

    /// Integrity-check existing outputs; returns the names that need
    /// re-conversion.
    async fn check_existing(&self, existing: &[String]) -> HashSet<String> {
        let mut invalid = HashSet::new();
        if existing.is_empty() {
            return invalid;
        }

        info!("Checking integrity of {} existing converted files", existing.len());
        for name in existing {
            if self.cancel.is_cancelled() {
                break;
            }
            let source = self.source_dir.join(name);
            let output = self.output_dir.join(name);

            // Without the source we can only check that the output is a
            // readable raster at all.
            if !source.exists() {
                let readable = self
                    .gdal
                    .inspect(&output)
                    .await
                    .map(|meta| meta.size_x > 0 && meta.size_y > 0)
                    .unwrap_or(false);
                if !readable {
                    warn!("Existing file {} is corrupt (source missing)", name);
                    invalid.insert(name.clone());
                }
                continue;
            }

            if let Err(message) = verify_conversion(&self.gdal, &source, &output).await {
                warn!("Existing file {} is invalid: {}", name, message);
                invalid.insert(name.clone());
            }
        }
        invalid
    }
}

async fn convert_one(gdal: &GdalTools, name: &str, input: &Path, output: &Path) -> Outcome {
    match gdal.inspect(input).await.and_then(|meta| detect_epsg(&meta.crs_wkt)) {
        Some(crs) => info!("Processing {} (Source CRS: {})", name, crs),
        None => info!("Processing {} (Source CRS: auto-detect)", name),
    }

    if let Err(e) = gdal.warp(input, output).await {
        error!("Failed to convert {}: {}", name, e);
        return Outcome::Failed;
    }

    match verify_conversion(gdal, input, output).await {
        Ok(()) => {
            info!("Successfully converted: {}", name);
            Outcome::Converted
        }
        Err(message) => {
            error!("Integrity check failed for {}: {}", name, message);
            Outcome::Failed
        }
    }
}

/// Compare a converted file against its source. Returns a reason string
/// when the output should not be trusted.
async fn verify_conversion(
    gdal: &GdalTools,
    source: &Path,
    output: &Path,
) -> Result<(), String> {
    let source_meta = gdal
        .inspect(source)
        .await
        .ok_or_else(|| "Could not read source file info".to_string())?;
    let output_meta = gdal
        .inspect(output)
        .await
        .ok_or_else(|| "Could not read output file info".to_string())?;

    if output_meta.size_x == 0 || output_meta.size_y == 0 {
        return Err("Output has zero dimensions".to_string());
    }

    if source_meta.bands != output_meta.bands {
        return Err(format!(
            "Band count mismatch: {} vs {}",
            source_meta.bands, output_meta.bands
        ));
    }

    if source_meta.datatype != output_meta.datatype {
        warn!(
            "Data type changed: {:?} -> {:?}",
            source_meta.datatype, output_meta.datatype
        );
    }

    if !output_meta.crs_wkt.contains("WGS 84") && !output_meta.crs_wkt.contains("4326") {
        return Err("Output CRS is not WGS84".to_string());
    }

    // Reprojection shifts dimensions, but not by more than ~2x.
    let ratio_x = output_meta.size_x as f64 / source_meta.size_x as f64;
    let ratio_y = output_meta.size_y as f64 / source_meta.size_y as f64;
    if !(0.5..=2.0).contains(&ratio_x) || !(0.5..=2.0).contains(&ratio_y) {
        return Err(format!(
            "Dimensions changed drastically: {}x{} -> {}x{}",
            source_meta.size_x, source_meta.size_y, output_meta.size_x, output_meta.size_y
        ));
    }

    Ok(())
}

/// Pull an EPSG code out of a CRS WKT, with the RD New fallback the
/// original AHN data needs.
fn detect_epsg(wkt: &str) -> Option<String> {
    if let Some(pos) = wkt.find("EPSG") {
        let rest = wkt[pos + 4..]
            .trim_start_matches(|c: char| matches!(c, '"' | '\'' | ',' | ':') || c.is_whitespace());
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            return Some(format!("EPSG:{}", digits));
        }
    }
    if wkt.contains("Amersfoort") || wkt.contains("28992") {
        return Some("EPSG:28992".to_string());
    }
    None
}

/// Sorted `.tif` filenames (not paths) in `dir`; an absent directory is
/// just empty.
async fn tif_files(dir: &Path) -> Result<Vec<String>, AhngetError> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map(|ext| ext == "tif").unwrap_or(false) {
            if let Some(name) = path.file_name() {
                names.push(name.to_string_lossy().into_owned());
            }
        }
    }

    names.sort();
    Ok(names)
}
