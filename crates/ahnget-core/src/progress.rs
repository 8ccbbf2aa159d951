//! Durable progress tracking
//!
//! [`ProgressStore`] is the single source of truth for resumability. It
//! wraps the persisted [`ProgressRecord`] behind a mutex so the fetch and
//! validate stages never race, and it writes the whole record back to
//! disk before any mutating call returns (write-through). A failed
//! persist is logged and the in-memory state stays authoritative for the
//! rest of the run; a transient disk error never aborts the pipeline.

use ahnget_types::ProgressRecord;
use chrono::Utc;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Thread-safe, write-through store for the progress record.
pub struct ProgressStore {
    path: PathBuf,
    record: Mutex<ProgressRecord>,
}

impl ProgressStore {
    /// Load the progress file, or start from a fresh zero-value record if
    /// it is absent or unreadable.
    pub fn load(path: &Path) -> Self {
        let record = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<ProgressRecord>(&raw) {
                Ok(record) => {
                    info!(
                        "Loaded progress: {} completed, {} failed",
                        record.completed.len(),
                        record.failed.len()
                    );
                    record
                }
                Err(e) => {
                    error!("Progress file {:?} is unreadable, starting fresh: {}", path, e);
                    ProgressRecord::default()
                }
            },
            Err(_) => ProgressRecord::default(),
        };

        Self {
            path: path.to_path_buf(),
            record: Mutex::new(record),
        }
    }

    pub fn is_completed(&self, id: &str) -> bool {
        self.record.lock().is_completed(id)
    }

    /// Mark an item as fetched and validated. Idempotent: a second call
    /// for the same id changes neither the count nor the byte total.
    pub fn mark_completed(&self, id: &str, size_bytes: u64) {
        let mut record = self.record.lock();
        if record.insert_completed(id) {
            record.stats.total_bytes_downloaded += size_bytes;
            self.persist(&mut record);
        }
    }

    /// Append a failure entry. Not idempotent: retried items accumulate
    /// one entry per attempt.
    pub fn mark_failed(&self, id: &str, error: &str) {
        let mut record = self.record.lock();
        record.push_failed(id, error);
        self.persist(&mut record);
    }

    /// Remove a batch of ids from the completed set with a single persist,
    /// used by the preflight audit to avoid one write per demoted item.
    pub fn demote(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let mut record = self.record.lock();
        record.remove_completed(ids);
        self.persist(&mut record);
    }

    pub fn set_total_items(&self, total: usize) {
        let mut record = self.record.lock();
        record.stats.total_files = total;
        self.persist(&mut record);
    }

    /// Point-in-time copy of the record, for summaries.
    pub fn snapshot(&self) -> ProgressRecord {
        self.record.lock().clone()
    }

    fn persist(&self, record: &mut ProgressRecord) {
        record.last_updated = Some(Utc::now());
        match serde_json::to_string_pretty(record) {
            Ok(content) => {
                if let Err(e) = std::fs::write(&self.path, content) {
                    error!("Error saving progress file {:?}: {}", self.path, e);
                }
            }
            Err(e) => error!("Error serializing progress record: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> ProgressStore {
        ProgressStore::load(&dir.path().join("download_progress.json"))
    }

    #[test]
    fn mark_completed_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.mark_completed("31HN2", 100);
        store.mark_completed("31HN2", 100);

        let record = store.snapshot();
        assert_eq!(record.stats.completed_count, 1);
        assert_eq!(record.stats.total_bytes_downloaded, 100);
    }

    #[test]
    fn failures_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.mark_failed("31HN2", "Download failed");
        store.mark_failed("31HN2", "Download failed");

        let record = store.snapshot();
        assert_eq!(record.failed.len(), 2);
        assert_eq!(record.stats.failed_count, 2);
    }

    #[test]
    fn mutations_are_persisted_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download_progress.json");

        let store = ProgressStore::load(&path);
        store.mark_completed("31HN2", 512);

        // A second store reading the same file must see the completion.
        let reloaded = ProgressStore::load(&path);
        assert!(reloaded.is_completed("31HN2"));
        assert_eq!(reloaded.snapshot().stats.total_bytes_downloaded, 512);
    }

    #[test]
    fn demote_recomputes_count_and_keeps_failures() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.mark_completed("31HN2", 100);
        store.mark_completed("31HZ1", 200);
        store.mark_failed("31HN2", "gdalinfo rejected file");

        store.demote(&["31HN2".to_string()]);

        let record = store.snapshot();
        assert!(!record.is_completed("31HN2"));
        assert!(record.is_completed("31HZ1"));
        assert_eq!(record.stats.completed_count, 1);
        assert_eq!(record.failed.len(), 1);
        // Byte total is never rolled back on demotion.
        assert_eq!(record.stats.total_bytes_downloaded, 300);
    }

    #[test]
    fn demoted_id_can_complete_again_without_double_counting() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.mark_completed("31HN2", 100);
        store.demote(&["31HN2".to_string()]);
        store.mark_completed("31HN2", 100);

        let record = store.snapshot();
        assert_eq!(record.stats.completed_count, 1);
        assert_eq!(record.completed.len(), 1);
    }

    #[test]
    fn corrupt_progress_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download_progress.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = ProgressStore::load(&path);
        let record = store.snapshot();
        assert!(record.completed.is_empty());
        assert_eq!(record.stats.completed_count, 0);
    }
}
