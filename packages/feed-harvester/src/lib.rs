//! Incremental Feed Harvester
//!
//! Walks an infinitely scrolling feed in a live page, turns each rendered
//! post into a record, and fans records out to two CSV tables and a pool of
//! image downloaders, evicting processed posts from the page as it goes.
//!
//! # Flow
//!
//! ```text
//! FeedLocator ─> StabilityTracker ─> PaginationController ─┬─> RecordExtractor ─> FanOut
//!                                        ^                 └─> EvictionPolicy
//!                                        └──── until min_records or retries exhausted
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use feed_harvester::{HarvestConfig, Harvester};
//! use feed_harvester::testing::{FakeDriver, FakePost};
//!
//! let driver = FakeDriver::new().with_batch(vec![
//!     FakePost::album("314", "Location: Cebu", &["a.jpg"]),
//! ]);
//! let config = HarvestConfig::new("42").with_min_records(1);
//!
//! let report = Harvester::new(driver, config).run().await?;
//! println!("scraped {}", report.progress.scraped);
//! ```
//!
//! # Modules
//!
//! - [`traits`] - The page automation capability ([`PageDriver`])
//! - [`locator`] - Feed bootstrap and redirect bypass
//! - [`stability`] - Mutation-quiet detection
//! - [`pagination`] - The retrying poll loop
//! - [`extractor`] - Record extraction and derivation helpers
//! - [`eviction`] - Bottom-anchored removal of processed posts
//! - [`pipeline`] - CSV sinks, download pool and fan-out
//! - [`testing`] - A scripted fake page for tests

pub mod cli;
pub mod config;
pub mod error;
pub mod eviction;
pub mod extractor;
pub mod harvester;
pub mod locator;
pub mod pagination;
pub mod pipeline;
pub mod scripts;
pub mod stability;
pub mod testing;
pub mod traits;
pub mod types;

#[cfg(feature = "chromium")]
pub mod drivers;

pub use config::{EvictionFailure, HarvestConfig, Selectors, FEED_LABEL};
pub use error::{
    DownloadError, DriverError, DriverResult, ExtractError, ExtractResult, HarvestError, Result,
    SinkError,
};
pub use eviction::{evictable_count, EvictionPolicy};
pub use extractor::{attachment_name, derive_identifier, derive_location, RecordExtractor};
pub use harvester::{HarvestReport, Harvester};
pub use locator::{FeedHandle, FeedLocator};
pub use pagination::{PaginationController, PollOutcome, Progress};
pub use pipeline::{FanOut, Pipeline, PipelineSummary};
pub use stability::{StabilityTracker, Subject};
pub use traits::driver::{with_timeout, PageDriver};
pub use types::record::{Attachment, Record};
pub use types::row::{Row, Table};

#[cfg(feature = "chromium")]
pub use drivers::ChromiumDriver;
