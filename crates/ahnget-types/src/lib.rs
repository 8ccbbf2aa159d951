//! Shared types for ahnget
//!
//! This crate contains the data structures shared between the core
//! library and the CLI: work items parsed from the kaartblad index,
//! the persisted progress record, and the summary types the engine
//! reports back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Work items
// ============================================================================

/// One unit of remote-file work: a single AHN map sheet to download
/// and verify. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable identifier (kaartbladNr from the index)
    pub id: String,
    /// Source URL for the raster file
    pub url: String,
    /// Destination filename, already sanitized to a bare name
    pub filename: String,
    /// Byte size declared by the index
    pub expected_size: u64,
}

impl WorkItem {
    pub fn size_mb(&self) -> f64 {
        self.expected_size as f64 / (1024.0 * 1024.0)
    }
}

// ============================================================================
// Progress record (persisted)
// ============================================================================

/// A single failed attempt. Append-only: a retried item may appear
/// multiple times, and demoting a completed item never erases these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedEntry {
    #[serde(rename = "kaartbladNr")]
    pub id: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Derived counters, kept consistent with `completed`/`failed` on every
/// mutation of the record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressStats {
    pub total_files: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub total_bytes_downloaded: u64,
}

/// The durable progress snapshot, written wholesale to the progress file
/// on every mutation. Field names are part of the on-disk format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Ids successfully fetched and validated. Set semantics: an id
    /// appears at most once.
    pub completed: Vec<String>,
    /// Append-only failure log.
    pub failed: Vec<FailedEntry>,
    pub last_updated: Option<DateTime<Utc>>,
    pub stats: ProgressStats,
}

impl ProgressRecord {
    pub fn is_completed(&self, id: &str) -> bool {
        self.completed.iter().any(|c| c == id)
    }

    /// Insert `id` into the completed set. Returns false if it was
    /// already present (the caller must not re-count bytes).
    pub fn insert_completed(&mut self, id: &str) -> bool {
        if self.is_completed(id) {
            return false;
        }
        self.completed.push(id.to_string());
        self.stats.completed_count = self.completed.len();
        true
    }

    /// Remove every id in `ids` from the completed set and recompute the
    /// count. Historical failure entries are left untouched.
    pub fn remove_completed(&mut self, ids: &[String]) {
        self.completed.retain(|c| !ids.iter().any(|id| id == c));
        self.stats.completed_count = self.completed.len();
    }

    pub fn push_failed(&mut self, id: &str, error: &str) {
        self.failed.push(FailedEntry {
            id: id.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
        self.stats.failed_count = self.failed.len();
    }
}

// ============================================================================
// Raster metadata
// ============================================================================

/// Key facts about a raster file, as reported by the external
/// inspection tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterMeta {
    pub size_x: u64,
    pub size_y: u64,
    pub bands: usize,
    pub datatype: Option<String>,
    pub crs_wkt: String,
}

// ============================================================================
// Run reports
// ============================================================================

/// Per-category outcome of a preflight pass over completed items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightSummary {
    pub checked: usize,
    pub ok: usize,
    pub missing: usize,
    pub size_mismatch: usize,
    pub corrupt: usize,
}

impl PreflightSummary {
    /// Number of items demoted back to pending.
    pub fn demoted(&self) -> usize {
        self.missing + self.size_mismatch + self.corrupt
    }
}

/// What the fetch stage did during one pipeline run. Validation results
/// land in the progress record, not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Items in the index.
    pub total: usize,
    /// Items skipped because the store already marked them completed.
    pub already_completed: usize,
    /// Items downloaded over the network.
    pub downloaded: usize,
    /// Items handed to validation from an exact-size local file.
    pub reused_local: usize,
    /// Items whose fetch failed.
    pub fetch_failed: usize,
    /// True if the run stopped on the shared cancellation signal.
    pub cancelled: bool,
}

/// Outcome of a WGS84 conversion run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvertReport {
    pub total_sources: usize,
    pub valid_existing: usize,
    pub converted: usize,
    pub failed: usize,
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_set_semantics() {
        let mut record = ProgressRecord::default();
        assert!(record.insert_completed("31HN2"));
        assert!(!record.insert_completed("31HN2"));
        assert_eq!(record.completed.len(), 1);
        assert_eq!(record.stats.completed_count, 1);
    }

    #[test]
    fn demotion_keeps_failure_history() {
        let mut record = ProgressRecord::default();
        record.insert_completed("31HN2");
        record.push_failed("31HN2", "gdalinfo rejected file");
        record.remove_completed(&["31HN2".to_string()]);

        assert!(!record.is_completed("31HN2"));
        assert_eq!(record.stats.completed_count, 0);
        assert_eq!(record.failed.len(), 1);
        assert_eq!(record.stats.failed_count, 1);
    }

    #[test]
    fn failed_entry_uses_index_field_name() {
        let mut record = ProgressRecord::default();
        record.push_failed("31HN2", "download failed");

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"kaartbladNr\":\"31HN2\""));

        let parsed: ProgressRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.failed[0].id, "31HN2");
    }
}
