//! The polling loop that walks an infinite feed.
//!
//! Each cycle waits for the feed to go quiet, expands truncated posts and
//! queries for freshly rendered record nodes. A query timeout is the only
//! failure that gets another chance: the loop scrolls to nudge the page and
//! polls again, up to the retry budget. Everything else ends the run.
//!
//! A successful batch resets the retry counter, is extracted in document
//! order, handed to the pipeline, and then evicted from the page. Eviction
//! keeps a short trailing window attached, so every processed node is tagged
//! in the page and the record query only matches untagged nodes. Identifiers
//! already emitted in the run are skipped as well.

use std::collections::HashSet;

use tracing::{debug, error, info, warn};

use crate::config::{HarvestConfig, FEED_LABEL};
use crate::error::{DriverError, DriverResult, HarvestError, Result};
use crate::eviction::EvictionPolicy;
use crate::extractor::RecordExtractor;
use crate::locator::FeedHandle;
use crate::pipeline::FanOut;
use crate::scripts;
use crate::stability::StabilityTracker;
use crate::traits::driver::PageDriver;

/// Running totals for a pagination run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Nodes seen minus failed extractions and repeated identifiers
    pub scraped: usize,
    /// Records handed to the pipeline
    pub emitted: usize,
    /// Nodes that failed extraction
    pub extraction_failures: usize,
    /// Records skipped because their identifier was already emitted
    pub duplicates: usize,
    /// Successful polls
    pub batches: usize,
    /// Query timeouts across the whole run
    pub timeouts: usize,
    /// Feed children removed by eviction
    pub evicted: usize,
}

/// Classification of one poll.
#[derive(Debug)]
pub enum PollOutcome<N> {
    /// New record nodes rendered
    Batch(Vec<N>),
    /// Nothing rendered in time; worth another try
    TimedOut(DriverError),
    /// The page failed in a way retrying will not fix
    Failed(DriverError),
}

impl<N> From<DriverResult<Vec<N>>> for PollOutcome<N> {
    fn from(result: DriverResult<Vec<N>>) -> Self {
        match result {
            Ok(nodes) => PollOutcome::Batch(nodes),
            Err(e) if e.is_timeout() => PollOutcome::TimedOut(e),
            Err(e) => PollOutcome::Failed(e),
        }
    }
}

/// Drives the feed until enough records were scraped.
pub struct PaginationController<'a, D: PageDriver> {
    driver: &'a D,
    config: &'a HarvestConfig,
    tracker: &'a StabilityTracker,
    extractor: RecordExtractor,
    eviction: EvictionPolicy,
    record_query: String,
}

impl<'a, D: PageDriver> PaginationController<'a, D> {
    pub fn new(
        driver: &'a D,
        config: &'a HarvestConfig,
        tracker: &'a StabilityTracker,
    ) -> Result<Self> {
        Ok(Self {
            driver,
            config,
            tracker,
            extractor: RecordExtractor::from_config(config)?,
            eviction: EvictionPolicy::from_config(config),
            record_query: scripts::unharvested(&config.selectors.record),
        })
    }

    /// One polling cycle: settle, expand, query.
    pub async fn poll_batch(&self, feed: &FeedHandle<D::Node>) -> DriverResult<Vec<D::Node>> {
        let selectors = &self.config.selectors;

        self.tracker
            .wait_until_stable(
                self.driver,
                FEED_LABEL,
                self.config.stability_timeout,
                self.config.poll_interval,
            )
            .await?;

        let expanded = self
            .driver
            .evaluate(&scripts::click_all(&selectors.see_more))
            .await?;
        debug!(expanded = %expanded, "Expanded truncated records");

        self.driver
            .wait_for_nodes(
                &self.record_query,
                Some(feed.node()),
                self.config.query_timeout,
                self.config.poll_interval,
            )
            .await
    }

    /// Poll until at least `min_records` records were scraped.
    ///
    /// The final count may overshoot the minimum by up to one batch.
    pub async fn run(&self, feed: &FeedHandle<D::Node>, fanout: &FanOut) -> Result<Progress> {
        let mut progress = Progress::default();
        let mut retries = 0;
        let mut emitted_ids = HashSet::new();

        while progress.scraped < self.config.min_records {
            match PollOutcome::from(self.poll_batch(feed).await) {
                PollOutcome::Batch(nodes) => {
                    retries = 0;
                    progress.batches += 1;
                    progress.scraped += nodes.len();

                    for node in &nodes {
                        match self.extractor.extract(self.driver, node).await {
                            Ok(record) if emitted_ids.insert(record.id.clone()) => {
                                fanout.dispatch(record).await?;
                                progress.emitted += 1;
                            }
                            Ok(record) => {
                                progress.scraped = progress.scraped.saturating_sub(1);
                                progress.duplicates += 1;
                                debug!(record = %record.id, "Skipping record already emitted");
                            }
                            Err(e) => {
                                progress.scraped = progress.scraped.saturating_sub(1);
                                progress.extraction_failures += 1;
                                warn!(error = %e, "Skipping record that failed extraction");
                            }
                        }
                        self.mark_harvested(node).await;
                    }

                    progress.evicted += self.eviction.evict(self.driver, feed).await?;

                    info!(
                        scraped = progress.scraped,
                        batch = progress.batches,
                        batch_size = nodes.len(),
                        "Scraped posts"
                    );
                }
                PollOutcome::TimedOut(e) => {
                    retries += 1;
                    progress.timeouts += 1;

                    if retries >= self.config.max_retries {
                        error!(retries, error = %e, "Retry budget exhausted");
                        return Err(HarvestError::RetriesExhausted { retries, source: e });
                    }

                    warn!(
                        retries,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "No new records, scrolling and retrying"
                    );
                    self.driver.evaluate(scripts::SCROLL_TO_BOTTOM).await?;
                }
                PollOutcome::Failed(e) => {
                    error!(error = %e, "Polling failed");
                    return Err(HarvestError::Driver(e));
                }
            }
        }

        Ok(progress)
    }

    async fn mark_harvested(&self, node: &D::Node) {
        if let Err(e) = self.driver.call_on(node, scripts::MARK_HARVESTED).await {
            warn!(error = %e, "Failed to tag processed record");
        }
    }
}
