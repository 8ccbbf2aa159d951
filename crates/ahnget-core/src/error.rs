//! Error types for the ahnget engine

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while fetching, verifying, or converting sheets
#[derive(Debug, Error)]
pub enum AhngetError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server returned {status} for {url}")]
    Server { status: u16, url: String },

    #[error("Size mismatch: wrote {actual} bytes but server declared {declared}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("Index file {path:?}: {message}")]
    Index { path: PathBuf, message: String },

    #[error("Invalid URL for sheet {id}: {url}")]
    InvalidUrl { id: String, url: String },

    #[error("GDAL tools are not available")]
    GdalUnavailable,

    #[error("GDAL operation failed: {0}")]
    Gdal(String),

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AhngetError {
    /// Item-level errors are recorded against the work item and the run
    /// continues; everything else is configuration-class and aborts the
    /// batch before pipeline work begins.
    pub fn is_item_level(&self) -> bool {
        matches!(
            self,
            AhngetError::Network(_)
                | AhngetError::Io(_)
                | AhngetError::Server { .. }
                | AhngetError::SizeMismatch { .. }
        )
    }
}
