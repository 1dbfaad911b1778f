//! Typed errors for the harvester.
//!
//! Errors fall into three tiers:
//!
//! - [`HarvestError`] is fatal and ends the run.
//! - [`DriverError::Timeout`] is the only retryable failure, and only while
//!   polling for new records.
//! - [`ExtractError`], [`SinkError`] and [`DownloadError`] are per-item: they
//!   are logged and the unit of work is skipped.

use std::time::Duration;

use thiserror::Error;

/// Fatal errors that abort a harvesting run.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The page automation layer failed outside of the retry loop
    #[error("automation error: {0}")]
    Driver(#[from] DriverError),

    /// The feed container could not be found after bootstrap
    #[error("feed {group}: unable to retrieve feed container")]
    FeedNotFound { group: String },

    /// Navigation kept landing somewhere other than the target
    #[error("unable to bypass redirect to {url} after {attempts} attempts (landed on {landed})")]
    BypassFailed {
        url: String,
        landed: String,
        attempts: usize,
    },

    /// Polling timed out too many times in a row
    #[error("retry budget exhausted after {retries} consecutive timeouts: {source}")]
    RetriesExhausted {
        retries: usize,
        #[source]
        source: DriverError,
    },

    /// Removing processed records from the feed failed
    #[error("eviction failed: {0}")]
    Eviction(#[source] DriverError),

    /// A downstream queue was closed while the controller was still pushing
    #[error("pipeline closed: {queue} queue no longer accepts items")]
    PipelineClosed { queue: &'static str },

    /// Configuration rejected before the run started
    #[error("config error: {0}")]
    Config(String),

    /// HTTP client construction failed
    #[error("HTTP client error: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// Output files or directories could not be created
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Output table could not be initialised
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Errors surfaced by a [`PageDriver`](crate::traits::driver::PageDriver).
#[derive(Debug, Error)]
pub enum DriverError {
    /// An operation did not complete within its deadline
    #[error("timed out after {after:?} waiting for {operation}")]
    Timeout { operation: String, after: Duration },

    /// A script evaluated in the page threw or returned garbage
    #[error("script error: {0}")]
    Script(String),

    /// A required element was not present
    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    /// The underlying protocol or browser failed
    #[error("protocol error: {0}")]
    Protocol(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl DriverError {
    /// Create a timeout error for an operation.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Whether this is a deadline expiry rather than a hard failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors extracting a single record. Never fatal.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// No outbound album link, so no identifier can be derived
    #[error("record has no album link node")]
    MissingLinkNode,

    /// The album link has no usable `set` parameter
    #[error("album link {href} carries no record identifier")]
    MissingIdentifier { href: String },

    /// The album link could not be parsed as a URL
    #[error("invalid album link {href}: {source}")]
    InvalidLink {
        href: String,
        #[source]
        source: url::ParseError,
    },

    /// A page call failed while extracting
    #[error("automation error during extraction: {0}")]
    Driver(#[from] DriverError),
}

/// Errors writing a single row to an output table. Never fatal.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors downloading a single attachment. Never fatal.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Transport failure
    #[error("image {name}: {source}")]
    Http {
        name: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with something other than success
    #[error("image {name}: unable to download image (HTTP {status})")]
    Status {
        name: String,
        status: reqwest::StatusCode,
    },

    /// Writing the file failed
    #[error("image {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for run-level operations.
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for page automation calls.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Result type alias for record extraction.
pub type ExtractResult<T> = std::result::Result<T, ExtractError>;
