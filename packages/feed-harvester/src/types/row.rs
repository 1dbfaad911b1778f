//! Row shapes written by the CSV sinks.
//!
//! The set is closed: a sink knows its [`Table`] and turns each [`Row`] it
//! receives into zero or more CSV records.

use std::sync::Arc;

use super::record::Record;

/// An output table and its fixed header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Table {
    /// `id, location, content`
    Records,
    /// `<id_column>, image`
    Attachments { id_column: String },
}

impl Table {
    /// Table name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Table::Records => "records",
            Table::Attachments { .. } => "attachments",
        }
    }

    /// Header written once when the sink starts.
    pub fn header(&self) -> Vec<String> {
        match self {
            Table::Records => vec!["id".into(), "location".into(), "content".into()],
            Table::Attachments { id_column } => vec![id_column.clone(), "image".into()],
        }
    }
}

/// A unit of work for a row sink.
///
/// Both variants share the record; neither sink mutates it.
#[derive(Debug, Clone)]
pub enum Row {
    /// One row in the records table
    Record(Arc<Record>),
    /// One row per attachment in the attachments table
    Attachments(Arc<Record>),
}

impl Row {
    /// The record this row was derived from.
    pub fn record(&self) -> &Record {
        match self {
            Row::Record(record) | Row::Attachments(record) => record,
        }
    }

    /// CSV records produced by this row.
    pub fn fields(&self) -> Vec<Vec<String>> {
        match self {
            Row::Record(record) => vec![vec![
                record.id.clone(),
                record.location_or_empty().to_string(),
                record.normalized_content(),
            ]],
            Row::Attachments(record) => record
                .attachments
                .iter()
                .map(|attachment| vec![record.id.clone(), attachment.name.clone()])
                .collect(),
        }
    }
}
