//! Streaming HTTP fetcher
//!
//! Streams one remote resource to a local path in chunks; sheets are
//! hundreds of megabytes, so the body is never buffered in memory. The
//! server-declared length is advisory against the index's expected size
//! (mismatch is a warning) but binding against the bytes actually
//! written (mismatch is a hard failure). The fetcher never deletes a
//! partial file; cleanup is the caller's job so this contract stays
//! single-purpose.

use crate::error::AhngetError;
use futures::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP downloader shared by the whole run.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> Result<Self, AhngetError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// Stream `url` to `destination`, reporting each chunk's size through
    /// `on_chunk`. Returns the number of bytes written.
    pub async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        expected_size: u64,
        mut on_chunk: impl FnMut(u64),
    ) -> Result<u64, AhngetError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AhngetError::Server {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        // The index's size is advisory; the server may legitimately know
        // better.
        let declared = response.content_length().unwrap_or(0);
        if expected_size > 0 && declared > 0 && declared != expected_size {
            warn!("Size mismatch: expected {}, got {}", expected_size, declared);
        }

        let mut file = File::create(destination).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            on_chunk(chunk.len() as u64);
        }

        file.flush().await?;
        file.sync_all().await?;
        debug!("Wrote {} bytes to {:?}", written, destination);

        if declared > 0 && written != declared {
            return Err(AhngetError::SizeMismatch {
                declared,
                actual: written,
            });
        }

        Ok(written)
    }
}
