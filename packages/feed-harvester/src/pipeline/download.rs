//! Image download workers.
//!
//! Workers share one HTTP client and one bounded queue. Each request names
//! its target file; bodies stream into a temporary file of their own in the
//! same directory and are renamed into place only once complete. A failure
//! is logged and the worker moves on.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::error::{DownloadError, HarvestError, Result};
use crate::types::record::{Attachment, Record};

/// One image to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Record the image belongs to
    pub record_id: String,
    /// File name under the images directory
    pub name: String,
    /// Source URL
    pub url: String,
}

impl DownloadRequest {
    pub fn new(record: &Record, attachment: &Attachment) -> Self {
        Self {
            record_id: record.id.clone(),
            name: attachment.name.clone(),
            url: attachment.url.clone(),
        }
    }
}

/// Queue shared by every worker in the pool.
pub type DownloadQueue = Arc<Mutex<mpsc::Receiver<DownloadRequest>>>;

/// Counters for one worker (or the whole pool, once merged).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    pub succeeded: usize,
    pub failed: usize,
    pub bytes: u64,
}

impl DownloadStats {
    /// Fold another worker's counters into these.
    pub fn merge(&mut self, other: DownloadStats) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.bytes += other.bytes;
    }

    /// Total download attempts.
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Build the HTTP client shared by the pool.
pub fn build_client(timeout: Duration, user_agent: &str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .map_err(HarvestError::HttpClient)
}

/// A single download worker.
#[derive(Debug, Clone)]
pub struct DownloadWorker {
    id: usize,
    client: reqwest::Client,
    dir: PathBuf,
}

impl DownloadWorker {
    pub fn new(id: usize, client: reqwest::Client, dir: impl Into<PathBuf>) -> Self {
        Self {
            id,
            client,
            dir: dir.into(),
        }
    }

    /// Final path of a downloaded image.
    pub fn target(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Take requests from `queue` until it is closed and empty.
    pub async fn run(self, queue: DownloadQueue) -> DownloadStats {
        let mut stats = DownloadStats::default();

        loop {
            let next = { queue.lock().await.recv().await };
            let Some(request) = next else {
                break;
            };

            match self.download(&request).await {
                Ok(bytes) => {
                    stats.succeeded += 1;
                    stats.bytes += bytes;
                    debug!(
                        worker = self.id,
                        record = %request.record_id,
                        image = %request.name,
                        bytes,
                        "Image saved"
                    );
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!(
                        worker = self.id,
                        record = %request.record_id,
                        url = %request.url,
                        error = %e,
                        "Image download failed, skipping"
                    );
                }
            }
        }

        debug!(
            worker = self.id,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "Download worker finished"
        );
        stats
    }

    /// Fetch one image and write it under its display name.
    ///
    /// Returns the number of bytes written. An existing file of the same name
    /// is overwritten.
    pub async fn download(
        &self,
        request: &DownloadRequest,
    ) -> std::result::Result<u64, DownloadError> {
        let name = request.name.clone();
        let mut response = self
            .client
            .get(&request.url)
            .send()
            .await
            .map_err(|source| DownloadError::Http {
                name: name.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status { name, status });
        }

        // Removed on drop unless persisted
        let (file, partial) = tempfile::Builder::new()
            .prefix(&format!(".{}.", request.name))
            .suffix(".part")
            .tempfile_in(&self.dir)
            .map_err(|source| DownloadError::Io {
                name: name.clone(),
                source,
            })?
            .into_parts();

        let bytes = stream_body(&mut response, fs::File::from_std(file), &name).await?;
        partial
            .persist(self.target(&request.name))
            .map_err(|e| DownloadError::Io {
                name,
                source: e.error,
            })?;
        Ok(bytes)
    }
}

async fn stream_body(
    response: &mut reqwest::Response,
    mut file: fs::File,
    name: &str,
) -> std::result::Result<u64, DownloadError> {
    let io_err = |source: std::io::Error| DownloadError::Io {
        name: name.to_string(),
        source,
    };

    let mut written = 0u64;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|source| DownloadError::Http {
            name: name.to_string(),
            source,
        })?
    {
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(io_err)?;
    Ok(written)
}
