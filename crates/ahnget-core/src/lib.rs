//! ahnget core - resumable download-and-verify engine
//!
//! This crate implements the producer/consumer pipeline that fetches AHN
//! raster sheets, verifies them against the external GDAL tools, and
//! persists progress so interrupted runs resume where they left off:
//! - Write-through JSON progress store
//! - Streaming HTTP fetcher
//! - Two-stage fetch/validate pipeline over a bounded channel
//! - Preflight audit of previously completed files
//! - WGS84 reprojection of verified sheets

mod convert;
mod error;
mod fetch;
mod gdal;
mod index;
mod pipeline;
mod preflight;
mod progress;

pub use convert::*;
pub use error::*;
pub use fetch::*;
pub use gdal::*;
pub use index::*;
pub use pipeline::*;
pub use preflight::*;
pub use progress::*;
