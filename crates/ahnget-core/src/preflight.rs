//! Preflight audit of completed downloads
//!
//! Before new work starts, every item the store marks completed is
//! re-checked: the file must exist, match the expected size, and pass
//! the GDAL check, in that order. The first failing check classifies
//! the item (missing / size_mismatch / corrupt), deletes the artifact
//! where there is one, and queues the id for a single batch demotion at
//! the end so the progress file is written once, not once per item.

use crate::gdal::GdalTools;
use crate::progress::ProgressStore;
use ahnget_types::{PreflightSummary, WorkItem};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct PreflightAuditor {
    store: Arc<ProgressStore>,
    gdal: Arc<GdalTools>,
    download_dir: PathBuf,
}

impl PreflightAuditor {
    pub fn new(store: Arc<ProgressStore>, gdal: Arc<GdalTools>, download_dir: PathBuf) -> Self {
        Self {
            store,
            gdal,
            download_dir,
        }
    }

    /// Audit all completed items against the current index and demote
    /// any that no longer hold up.
    pub async fn run(&self, items: &[WorkItem]) -> PreflightSummary {
        let completed = self.store.snapshot().completed;
        let mut summary = PreflightSummary {
            checked: completed.len(),
            ..Default::default()
        };

        if completed.is_empty() {
            return summary;
        }

        let by_id: HashMap<&str, &WorkItem> =
            items.iter().map(|item| (item.id.as_str(), item)).collect();

        info!("Verifying {} completed files", completed.len());
        let mut to_demote: Vec<String> = Vec::new();

        for id in &completed {
            // The index and the progress store may legitimately diverge
            // across runs; an unknown id is skipped, not failed.
            let Some(item) = by_id.get(id.as_str()) else {
                warn!("KaartbladNr {} not found in index, skipping", id);
                continue;
            };
            let path = self.download_dir.join(&item.filename);

            let meta = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta,
                Err(_) => {
                    warn!("Missing file: {} (kaartblad: {})", item.filename, id);
                    summary.missing += 1;
                    to_demote.push(id.clone());
                    continue;
                }
            };

            if meta.len() != item.expected_size {
                warn!(
                    "Size mismatch for {}: expected {}, got {}",
                    item.filename,
                    item.expected_size,
                    meta.len()
                );
                summary.size_mismatch += 1;
                to_demote.push(id.clone());
                delete_artifact(&path).await;
                continue;
            }

            if !self.gdal.validate(&path).await {
                warn!("GDAL integrity check failed for {}", item.filename);
                summary.corrupt += 1;
                to_demote.push(id.clone());
                delete_artifact(&path).await;
                continue;
            }

            summary.ok += 1;
        }

        if !to_demote.is_empty() {
            info!(
                "Removing {} files from completed list (will be re-downloaded)",
                to_demote.len()
            );
            self.store.demote(&to_demote);
        }

        summary
    }
}

async fn delete_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("Deleted corrupted file: {:?}", path),
        Err(e) => error!("Failed to delete {:?}: {}", path, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressStore;

    fn item(id: &str, filename: &str, size: u64) -> WorkItem {
        WorkItem {
            id: id.to_string(),
            url: format!("https://example.com/{filename}"),
            filename: filename.to_string(),
            expected_size: size,
        }
    }

    fn setup(dir: &tempfile::TempDir) -> Arc<ProgressStore> {
        Arc::new(ProgressStore::load(&dir.path().join("progress.json")))
    }

    #[cfg(unix)]
    fn fake_gdalinfo(dir: &tempfile::TempDir, script: &str) -> Arc<GdalTools> {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("gdalinfo");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Arc::new(GdalTools::with_binaries(path, "gdalwarp"))
    }

    #[tokio::test]
    async fn missing_file_is_demoted() {
        let dir = tempfile::tempdir().unwrap();
        let store = setup(&dir);
        store.mark_completed("31HN2", 100);

        let auditor = PreflightAuditor::new(
            store.clone(),
            Arc::new(GdalTools::missing()),
            dir.path().to_path_buf(),
        );
        let summary = auditor.run(&[item("31HN2", "a.tif", 100)]).await;

        assert_eq!(summary.missing, 1);
        assert_eq!(summary.demoted(), 1);
        assert!(!store.is_completed("31HN2"));
        assert_eq!(store.snapshot().stats.completed_count, 0);
    }

    #[tokio::test]
    async fn truncated_file_is_deleted_and_demoted() {
        let dir = tempfile::tempdir().unwrap();
        let store = setup(&dir);
        store.mark_completed("31HN2", 100);

        let path = dir.path().join("a.tif");
        std::fs::write(&path, vec![0u8; 40]).unwrap();

        let auditor = PreflightAuditor::new(
            store.clone(),
            Arc::new(GdalTools::missing()),
            dir.path().to_path_buf(),
        );
        let summary = auditor.run(&[item("31HN2", "a.tif", 100)]).await;

        assert_eq!(summary.size_mismatch, 1);
        assert!(!path.exists());
        assert!(!store.is_completed("31HN2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn corrupt_file_is_deleted_and_demoted() {
        let dir = tempfile::tempdir().unwrap();
        let store = setup(&dir);
        store.mark_completed("31HN2", 100);

        let path = dir.path().join("a.tif");
        std::fs::write(&path, vec![0u8; 100]).unwrap();

        let gdal = fake_gdalinfo(&dir, "exit 1");
        let auditor = PreflightAuditor::new(store.clone(), gdal, dir.path().to_path_buf());
        let summary = auditor.run(&[item("31HN2", "a.tif", 100)]).await;

        assert_eq!(summary.corrupt, 1);
        assert!(!path.exists());
        assert!(!store.is_completed("31HN2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn healthy_file_stays_completed() {
        let dir = tempfile::tempdir().unwrap();
        let store = setup(&dir);
        store.mark_completed("31HN2", 100);

        let path = dir.path().join("a.tif");
        std::fs::write(&path, vec![0u8; 100]).unwrap();

        let gdal = fake_gdalinfo(&dir, "exit 0");
        let auditor = PreflightAuditor::new(store.clone(), gdal, dir.path().to_path_buf());
        let summary = auditor.run(&[item("31HN2", "a.tif", 100)]).await;

        assert_eq!(summary.ok, 1);
        assert_eq!(summary.demoted(), 0);
        assert!(store.is_completed("31HN2"));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn id_missing_from_index_is_skipped_not_demoted() {
        let dir = tempfile::tempdir().unwrap();
        let store = setup(&dir);
        store.mark_completed("99ZZ9", 100);

        let auditor = PreflightAuditor::new(
            store.clone(),
            Arc::new(GdalTools::missing()),
            dir.path().to_path_buf(),
        );
        let summary = auditor.run(&[item("31HN2", "a.tif", 100)]).await;

        assert_eq!(summary.checked, 1);
        assert_eq!(summary.ok, 0);
        assert_eq!(summary.demoted(), 0);
        assert!(store.is_completed("99ZZ9"));
    }
}
