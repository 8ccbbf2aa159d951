//! Kaartblad index loading
//!
//! The index is a JSON document with a `features` array; each feature
//! carries the sheet id, source URL, destination filename, and expected
//! byte size in its `properties`. It is parsed once at startup into
//! plain [`WorkItem`]s so the pipeline never touches dynamic JSON.

use crate::error::AhngetError;
use ahnget_types::WorkItem;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Sentinel id for index entries that carry no kaartbladNr.
pub const UNKNOWN_ID: &str = "unknown";

#[derive(Debug, Deserialize)]
struct KaartbladIndex {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Properties,
}

#[derive(Debug, Deserialize)]
struct Properties {
    #[serde(rename = "kaartbladNr", default = "unknown_id")]
    kaartblad_nr: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    length: u64,
}

fn unknown_id() -> String {
    UNKNOWN_ID.to_string()
}

impl Default for Properties {
    fn default() -> Self {
        Self {
            kaartblad_nr: unknown_id(),
            url: String::new(),
            name: String::new(),
            length: 0,
        }
    }
}

/// Strip any directory components so the destination is always a bare
/// filename inside the download directory.
pub fn sanitize_filename(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Load and parse the kaartblad index file.
///
/// Structurally malformed documents or entries (no `features` array,
/// unusable URL, empty filename) fail fast; a missing id degrades to the
/// [`UNKNOWN_ID`] sentinel like the rest of the tooling expects.
pub fn load_index(path: &Path) -> Result<Vec<WorkItem>, AhngetError> {
    let raw = std::fs::read_to_string(path).map_err(|e| AhngetError::Index {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let index: KaartbladIndex =
        serde_json::from_str(&raw).map_err(|e| AhngetError::Index {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let mut items = Vec::with_capacity(index.features.len());
    for feature in index.features {
        let props = feature.properties;

        if url::Url::parse(&props.url).is_err() {
            return Err(AhngetError::InvalidUrl {
                id: props.kaartblad_nr,
                url: props.url,
            });
        }

        let filename = sanitize_filename(&props.name);
        if filename.is_empty() {
            return Err(AhngetError::Index {
                path: path.to_path_buf(),
                message: format!("feature {} has no usable name", props.kaartblad_nr),
            });
        }

        items.push(WorkItem {
            id: props.kaartblad_nr,
            url: props.url,
            filename,
            expected_size: props.length,
        });
    }

    info!("Loaded {} features from {:?}", items.len(), path);
    Ok(items)
}
