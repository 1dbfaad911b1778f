//! Output fan-out: two CSV sinks and a pool of image downloaders.
//!
//! ```text
//!                      ┌─> records queue ─────> RowSink (records table)
//! controller ─ FanOut ─┼─> attachments queue ─> RowSink (attachments table)
//!                      └─> downloads queue ───> DownloadWorker x N
//! ```
//!
//! The queues are the only state shared between the control task and the
//! background workers. Dropping the [`FanOut`] closes them; [`Pipeline::finish`]
//! then waits for every worker to drain.

pub mod download;
pub mod fanout;
pub mod sink;

use std::fs::{self, File};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::HarvestConfig;
use crate::error::Result;
use crate::types::row::Table;

pub use download::{DownloadRequest, DownloadStats, DownloadWorker};
pub use fanout::FanOut;
pub use sink::{RowSink, SinkStats};

/// Counters from a drained pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub records: SinkStats,
    pub attachments: SinkStats,
    pub downloads: DownloadStats,
}

impl PipelineSummary {
    /// Rows written across both tables.
    pub fn rows_written(&self) -> usize {
        self.records.rows_written + self.attachments.rows_written
    }

    /// Rows skipped across both tables.
    pub fn rows_failed(&self) -> usize {
        self.records.rows_failed + self.attachments.rows_failed
    }
}

/// Running sinks and download workers for one harvest.
pub struct Pipeline {
    fanout: FanOut,
    records: JoinHandle<SinkStats>,
    attachments: JoinHandle<SinkStats>,
    downloads: Vec<JoinHandle<DownloadStats>>,
}

impl Pipeline {
    /// Create the output files and start every consumer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(config: &HarvestConfig) -> Result<Self> {
        fs::create_dir_all(&config.output_dir)?;
        fs::create_dir_all(config.images_path())?;

        let records_sink = RowSink::new(
            Table::Records,
            File::create(config.records_path())?,
        )?;
        let attachments_sink = RowSink::new(
            Table::Attachments {
                id_column: config.attachment_id_column.clone(),
            },
            File::create(config.attachments_path())?,
        )?;
        let client = download::build_client(config.http_timeout, &config.user_agent)?;

        let (records_tx, records_rx) = mpsc::channel(config.record_queue_capacity);
        let (attachments_tx, attachments_rx) = mpsc::channel(config.record_queue_capacity);
        let (downloads_tx, downloads_rx) = mpsc::channel(config.download_queue_capacity);

        let records = tokio::task::spawn_blocking(move || records_sink.run(records_rx));
        let attachments = tokio::task::spawn_blocking(move || attachments_sink.run(attachments_rx));

        let queue = Arc::new(Mutex::new(downloads_rx));
        let images = config.images_path();
        let downloads = (0..config.download_workers)
            .map(|id| {
                let worker = DownloadWorker::new(id, client.clone(), images.clone());
                tokio::spawn(worker.run(Arc::clone(&queue)))
            })
            .collect();

        info!(
            records = %config.records_path().display(),
            attachments = %config.attachments_path().display(),
            images = %images.display(),
            workers = config.download_workers,
            "Pipeline started"
        );

        Ok(Self {
            fanout: FanOut::new(records_tx, attachments_tx, downloads_tx),
            records,
            attachments,
            downloads,
        })
    }

    /// Entry point for extracted records.
    pub fn fanout(&self) -> &FanOut {
        &self.fanout
    }

    /// Close the queues and wait for every consumer to drain.
    pub async fn finish(self) -> PipelineSummary {
        let Self {
            fanout,
            records,
            attachments,
            downloads,
        } = self;
        drop(fanout);

        let mut summary = PipelineSummary {
            records: join_or_default(records, "records").await,
            attachments: join_or_default(attachments, "attachments").await,
            ..Default::default()
        };
        for handle in downloads {
            summary
                .downloads
                .merge(join_or_default(handle, "downloads").await);
        }

        info!(
            rows_written = summary.rows_written(),
            rows_failed = summary.rows_failed(),
            downloads_succeeded = summary.downloads.succeeded,
            downloads_failed = summary.downloads.failed,
            "Pipeline drained"
        );
        summary
    }
}

async fn join_or_default<T: Default>(handle: JoinHandle<T>, consumer: &str) -> T {
    match handle.await {
        Ok(stats) => stats,
        Err(e) => {
            warn!(consumer = %consumer, error = %e, "Pipeline worker did not finish");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::record::{Attachment, Record};

    #[tokio::test]
    async fn test_spawn_writes_headers_and_finish_drains() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarvestConfig::new("1")
            .with_output_dir(dir.path())
            .with_attachment_id_column("post_id")
            .with_download_workers(2);

        let pipeline = Pipeline::spawn(&config).unwrap();
        pipeline
            .fanout()
            .dispatch(Record::new("10", "first"))
            .await
            .unwrap();
        pipeline
            .fanout()
            .dispatch(Record::new("11", "second"))
            .await
            .unwrap();
        let summary = pipeline.finish().await;

        assert_eq!(summary.records.rows_written, 2);
        assert_eq!(summary.attachments.items, 2);
        assert_eq!(summary.attachments.rows_written, 0);
        assert_eq!(summary.downloads.attempted(), 0);

        let records = std::fs::read_to_string(config.records_path()).unwrap();
        assert_eq!(records, "id,location,content\n10,,first\n11,,second\n");
        let attachments = std::fs::read_to_string(config.attachments_path()).unwrap();
        assert_eq!(attachments, "post_id,image\n");
        assert!(config.images_path().is_dir());
    }

    #[tokio::test]
    async fn test_failed_downloads_do_not_block_tables() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarvestConfig::new("1")
            .with_output_dir(dir.path())
            .with_download_workers(1);

        let pipeline = Pipeline::spawn(&config).unwrap();
        let record = Record::new("5", "body").with_attachments(vec![
            Attachment::new("x.jpg", "http://127.0.0.1:1/x.jpg"),
            Attachment::new("y.jpg", "http://127.0.0.1:1/y.jpg"),
        ]);
        pipeline.fanout().dispatch(record).await.unwrap();
        let summary = pipeline.finish().await;

        assert_eq!(summary.attachments.rows_written, 2);
        assert_eq!(summary.downloads.failed, 2);
        assert_eq!(summary.downloads.attempted(), summary.attachments.rows_written);
    }
}
