//! GDAL capability
//!
//! The external raster tools (`gdalinfo`, `gdalwarp`) are the integrity
//! oracle and the reprojection engine. Their availability is resolved
//! once at startup and carried in a [`GdalTools`] value injected wherever
//! it is needed; nothing re-probes the PATH mid-run. Validation is
//! best-effort by policy: when the tools are missing, files are assumed
//! valid and a warning is logged. Reprojection has no such fallback.

use crate::error::AhngetError;
use ahnget_types::RasterMeta;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for a single gdalinfo inspection.
pub const INSPECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for a reprojection-class operation on one (large) sheet.
pub const WARP_TIMEOUT: Duration = Duration::from_secs(600);

/// Reprojection target for converted sheets.
pub const TARGET_CRS: &str = "EPSG:4326";
const RESAMPLING_METHOD: &str = "bilinear";

/// Handle to the external GDAL tools, with availability resolved once.
#[derive(Debug, Clone)]
pub struct GdalTools {
    gdalinfo: PathBuf,
    gdalwarp: PathBuf,
    available: bool,
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GdalInfoJson {
    #[serde(default)]
    size: Vec<u64>,
    #[serde(default)]
    bands: Vec<GdalBand>,
    #[serde(default, rename = "coordinateSystem")]
    coordinate_system: CoordinateSystem,
}

#[derive(Debug, Deserialize)]
struct GdalBand {
    #[serde(rename = "type")]
    datatype: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CoordinateSystem {
    #[serde(default)]
    wkt: String,
}

impl GdalTools {
    /// Probe the PATH for gdalinfo and record whether the tools exist.
    pub async fn detect() -> Self {
        let mut tools = Self::with_binaries("gdalinfo", "gdalwarp");

        match run_with_timeout(&tools.gdalinfo, &["--version".as_ref()], PROBE_TIMEOUT).await {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
                info!("GDAL found: {}", version);
                tools.version = Some(version);
            }
            Ok(_) => {
                warn!("gdalinfo --version failed; integrity checks will be skipped");
                tools.available = false;
            }
            Err(e) => {
                warn!("gdalinfo not found ({}); integrity checks will be skipped", e);
                tools.available = false;
            }
        }

        tools
    }

    /// Build a handle pointing at explicit binaries, assumed available.
    /// Used by tests and by installs with GDAL outside the PATH.
    pub fn with_binaries(gdalinfo: impl Into<PathBuf>, gdalwarp: impl Into<PathBuf>) -> Self {
        Self {
            gdalinfo: gdalinfo.into(),
            gdalwarp: gdalwarp.into(),
            available: true,
            version: None,
        }
    }

    /// A handle that behaves as if GDAL were not installed.
    pub fn missing() -> Self {
        Self {
            gdalinfo: PathBuf::from("gdalinfo"),
            gdalwarp: PathBuf::from("gdalwarp"),
            available: false,
            version: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Check that `path` is a readable, structurally valid raster.
    ///
    /// Exit code zero from gdalinfo means valid. A non-zero exit or a
    /// timeout means invalid; a missing tool means "assume valid" with a
    /// warning. This call never fails the caller.
    pub async fn validate(&self, path: &Path) -> bool {
        if !self.available {
            warn!("gdalinfo not available, skipping integrity check for {:?}", path);
            return true;
        }

        match run_with_timeout(&self.gdalinfo, &[path.as_os_str()], INSPECT_TIMEOUT).await {
            Ok(output) => {
                if output.status.success() {
                    true
                } else {
                    error!(
                        "gdalinfo returned {:?} for {:?}",
                        output.status.code(),
                        path
                    );
                    false
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("gdalinfo command not found, skipping integrity check");
                true
            }
            Err(e) => {
                error!("gdalinfo failed for {:?}: {}", path, e);
                false
            }
        }
    }

    /// Read raster metadata via `gdalinfo -json`. Any failure (tool
    /// missing, non-zero exit, unparseable output) yields `None`.
    pub async fn inspect(&self, path: &Path) -> Option<RasterMeta> {
        if !self.available {
            return None;
        }

        let output = run_with_timeout(
            &self.gdalinfo,
            &["-json".as_ref(), path.as_os_str()],
            INSPECT_TIMEOUT,
        )
        .await
        .ok()?;

        if !output.status.success() {
            error!(
                "gdalinfo -json failed for {:?}: {}",
                path,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }

        let info: GdalInfoJson = match serde_json::from_slice(&output.stdout) {
            Ok(info) => info,
            Err(e) => {
                error!("Failed to parse gdalinfo JSON for {:?}: {}", path, e);
                return None;
            }
        };

        Some(RasterMeta {
            size_x: info.size.first().copied().unwrap_or(0),
            size_y: info.size.get(1).copied().unwrap_or(0),
            bands: info.bands.len(),
            datatype: info.bands.first().and_then(|b| b.datatype.clone()),
            crs_wkt: info.coordinate_system.wkt,
        })
    }

    /// Reproject `input` to [`TARGET_CRS`] via gdalwarp. Unlike plain
    /// validation, this strictly requires the tools.
    pub async fn warp(&self, input: &Path, output: &Path) -> Result<(), AhngetError> {
        if !self.available {
            return Err(AhngetError::GdalUnavailable);
        }

        let result = run_with_timeout(
            &self.gdalwarp,
            &[
                "-t_srs".as_ref(),
                TARGET_CRS.as_ref(),
                "-r".as_ref(),
                RESAMPLING_METHOD.as_ref(),
                "-overwrite".as_ref(),
                input.as_os_str(),
                output.as_os_str(),
            ],
            WARP_TIMEOUT,
        )
        .await?;

        if !result.status.success() {
            return Err(AhngetError::Gdal(format!(
                "gdalwarp failed for {:?}: {}",
                input,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }

        Ok(())
    }
}

/// Run a subprocess with output capture and a hard timeout. On timeout
/// the child is killed (`kill_on_drop`) and a TimedOut error returned.
async fn run_with_timeout(
    program: &Path,
    args: &[&std::ffi::OsStr],
    timeout: Duration,
) -> std::io::Result<Output> {
    let future = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("{:?} timed out after {:?}", program, timeout),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn fake_tool(dir: &tempfile::TempDir, name: &str, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn zero_exit_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(&dir, "gdalinfo", "exit 0");
        let gdal = GdalTools::with_binaries(&tool, "gdalwarp");

        assert!(gdal.validate(Path::new("/tmp/a.tif")).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(&dir, "gdalinfo", "exit 3");
        let gdal = GdalTools::with_binaries(&tool, "gdalwarp");

        assert!(!gdal.validate(Path::new("/tmp/a.tif")).await);
    }

    #[tokio::test]
    async fn missing_tool_assumes_valid() {
        let gdal = GdalTools::missing();
        assert!(gdal.validate(Path::new("/tmp/a.tif")).await);
        assert!(gdal.inspect(Path::new("/tmp/a.tif")).await.is_none());
    }

    #[tokio::test]
    async fn warp_requires_the_tools() {
        let gdal = GdalTools::missing();
        let result = gdal.warp(Path::new("/tmp/a.tif"), Path::new("/tmp/b.tif")).await;
        assert!(matches!(result, Err(AhngetError::GdalUnavailable)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn inspect_parses_gdalinfo_json() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{"size": [2500, 3125], "bands": [{"type": "Float32"}],
                       "coordinateSystem": {"wkt": "PROJCS[\"Amersfoort / RD New\"]"}}"#;
        let tool = fake_tool(&dir, "gdalinfo", &format!("cat <<'EOF'\n{}\nEOF", json));
        let gdal = GdalTools::with_binaries(&tool, "gdalwarp");

        let meta = gdal.inspect(Path::new("/tmp/a.tif")).await.unwrap();
        assert_eq!(meta.size_x, 2500);
        assert_eq!(meta.size_y, 3125);
        assert_eq!(meta.bands, 1);
        assert_eq!(meta.datatype.as_deref(), Some("Float32"));
        assert!(meta.crs_wkt.contains("Amersfoort"));
    }
}
