//! The single point where an extracted record enters the pipeline.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::download::DownloadRequest;
use crate::error::{HarvestError, Result};
use crate::types::record::Record;
use crate::types::row::Row;

/// Senders for the three downstream queues.
///
/// Every send awaits queue capacity, so a slow sink or download pool
/// suspends the control task instead of dropping work.
#[derive(Debug, Clone)]
pub struct FanOut {
    records: mpsc::Sender<Row>,
    attachments: mpsc::Sender<Row>,
    downloads: mpsc::Sender<DownloadRequest>,
}

impl FanOut {
    pub fn new(
        records: mpsc::Sender<Row>,
        attachments: mpsc::Sender<Row>,
        downloads: mpsc::Sender<DownloadRequest>,
    ) -> Self {
        Self {
            records,
            attachments,
            downloads,
        }
    }

    /// Hand one record to every consumer.
    ///
    /// Emits exactly one records row, exactly one attachments item and one
    /// download request per attachment, in that order.
    pub async fn dispatch(&self, record: Record) -> Result<()> {
        let record = Arc::new(record);

        self.records
            .send(Row::Record(Arc::clone(&record)))
            .await
            .map_err(|_| HarvestError::PipelineClosed { queue: "records" })?;

        self.attachments
            .send(Row::Attachments(Arc::clone(&record)))
            .await
            .map_err(|_| HarvestError::PipelineClosed {
                queue: "attachments",
            })?;

        for attachment in &record.attachments {
            self.downloads
                .send(DownloadRequest::new(&record, attachment))
                .await
                .map_err(|_| HarvestError::PipelineClosed { queue: "downloads" })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::record::Attachment;

    fn record() -> Record {
        Record::new("7", "body").with_attachments(vec![
            Attachment::new("a.jpg", "https://cdn.example/a.jpg"),
            Attachment::new("b.jpg", "https://cdn.example/b.jpg"),
        ])
    }

    #[tokio::test]
    async fn test_dispatch_emits_one_item_per_consumer() {
        let (records_tx, mut records_rx) = mpsc::channel(8);
        let (attachments_tx, mut attachments_rx) = mpsc::channel(8);
        let (downloads_tx, mut downloads_rx) = mpsc::channel(8);
        let fanout = FanOut::new(records_tx, attachments_tx, downloads_tx);

        fanout.dispatch(record()).await.unwrap();
        drop(fanout);

        let mut records = Vec::new();
        while let Some(row) = records_rx.recv().await {
            records.push(row);
        }
        let mut attachments = Vec::new();
        while let Some(row) = attachments_rx.recv().await {
            attachments.push(row);
        }
        let mut downloads = Vec::new();
        while let Some(request) = downloads_rx.recv().await {
            downloads.push(request);
        }

        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], Row::Record(_)));
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].fields().len(), 2);
        assert_eq!(
            downloads.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            vec!["a.jpg", "b.jpg"]
        );
        assert!(downloads.iter().all(|d| d.record_id == "7"));
    }

    #[tokio::test]
    async fn test_record_without_attachments_requests_no_downloads() {
        let (records_tx, _records_rx) = mpsc::channel(8);
        let (attachments_tx, _attachments_rx) = mpsc::channel(8);
        let (downloads_tx, mut downloads_rx) = mpsc::channel(8);
        let fanout = FanOut::new(records_tx, attachments_tx, downloads_tx);

        fanout.dispatch(Record::new("1", "text")).await.unwrap();
        drop(fanout);

        assert!(downloads_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_queue_is_fatal() {
        let (records_tx, records_rx) = mpsc::channel(8);
        let (attachments_tx, _attachments_rx) = mpsc::channel(8);
        let (downloads_tx, _downloads_rx) = mpsc::channel(8);
        drop(records_rx);
        let fanout = FanOut::new(records_tx, attachments_tx, downloads_tx);

        let err = fanout.dispatch(record()).await.unwrap_err();
        assert!(matches!(
            err,
            HarvestError::PipelineClosed { queue: "records" }
        ));
    }
}
