//! CSV row sinks.
//!
//! One sink per table. A sink owns its writer, writes the header once when it
//! is created and then drains its queue in receive order until every sender
//! is gone. Sinks block on file I/O, so they run on the blocking pool.
//!
//! Each CSV record is encoded into its own buffer before it reaches the
//! writer, so a failed row leaves nothing behind to be flushed later.

use std::io::Write;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{HarvestError, Result, SinkError};
use crate::types::row::{Row, Table};

/// Counters for one sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Items received from the queue
    pub items: usize,
    /// CSV rows written
    pub rows_written: usize,
    /// CSV rows skipped because the write failed
    pub rows_failed: usize,
}

/// Writes rows of one table.
pub struct RowSink<W: Write> {
    table: Table,
    writer: W,
}

/// Encode one CSV record, terminator included.
fn encode(fields: &[String]) -> std::result::Result<Vec<u8>, SinkError> {
    let mut encoder = csv::Writer::from_writer(Vec::new());
    encoder.write_record(fields)?;
    encoder
        .into_inner()
        .map_err(|e| SinkError::Io(e.into_error()))
}

impl<W: Write> RowSink<W> {
    /// Wrap `writer` and emit the table header.
    pub fn new(table: Table, writer: W) -> Result<Self> {
        let mut sink = Self { table, writer };
        let header = sink.table.header();
        sink.write_fields(&header).map_err(|e| match e {
            SinkError::Csv(e) => HarvestError::Csv(e),
            SinkError::Io(e) => HarvestError::Io(e),
        })?;
        Ok(sink)
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Drain `queue` until it is closed and empty.
    ///
    /// Blocks the calling thread. A failed row is logged and skipped.
    pub fn run(mut self, mut queue: mpsc::Receiver<Row>) -> SinkStats {
        let mut stats = SinkStats::default();

        while let Some(row) = queue.blocking_recv() {
            stats.items += 1;
            self.write(&row, &mut stats);
        }

        if let Err(e) = self.writer.flush() {
            warn!(table = self.table.name(), error = %e, "Final flush failed");
        }
        debug!(
            table = self.table.name(),
            rows = stats.rows_written,
            failed = stats.rows_failed,
            "Sink drained"
        );
        stats
    }

    fn write(&mut self, row: &Row, stats: &mut SinkStats) {
        for fields in row.fields() {
            match self.write_fields(&fields) {
                Ok(()) => stats.rows_written += 1,
                Err(e) => {
                    stats.rows_failed += 1;
                    warn!(
                        table = self.table.name(),
                        record = %row.record().id,
                        error = %e,
                        "Failed to write row, skipping"
                    );
                }
            }
        }
    }

    fn write_fields(&mut self, fields: &[String]) -> std::result::Result<(), SinkError> {
        let line = encode(fields)?;
        self.writer.write_all(&line)?;
        self.writer.flush()?;
        Ok(())
    }
}
