//! Run orchestration.
//!
//! A run spawns the output pipeline, bootstraps the feed, installs the
//! stability observer and hands control to the pagination loop. Whatever the
//! loop's outcome, the pipeline is closed and drained before `run` returns,
//! so every record handed to it is fully written.

use chrono::{DateTime, Utc};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::{HarvestConfig, FEED_LABEL};
use crate::error::Result;
use crate::locator::FeedLocator;
use crate::pagination::{PaginationController, Progress};
use crate::pipeline::{FanOut, Pipeline, PipelineSummary};
use crate::stability::StabilityTracker;
use crate::traits::driver::PageDriver;

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct HarvestReport {
    pub run_id: Uuid,
    pub group_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub progress: Progress,
    pub pipeline: PipelineSummary,
}

impl HarvestReport {
    /// Wall-clock duration of the run.
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Harvests one group's feed through a page driver.
pub struct Harvester<D: PageDriver> {
    driver: D,
    config: HarvestConfig,
}

impl<D: PageDriver> Harvester<D> {
    pub fn new(driver: D, config: HarvestConfig) -> Self {
        Self { driver, config }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Give back the driver, e.g. to shut the browser down.
    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Harvest until the minimum record count is reached.
    ///
    /// Fails on any fatal condition; the output tables still contain every
    /// record emitted before the failure.
    pub async fn run(&self) -> Result<HarvestReport> {
        self.config.validate()?;

        let run_id = Uuid::now_v7();
        let span = info_span!("harvest", run_id = %run_id, group = %self.config.group_id);
        self.execute(run_id).instrument(span).await
    }

    async fn execute(&self, run_id: Uuid) -> Result<HarvestReport> {
        let started_at = Utc::now();
        info!(
            min_records = self.config.min_records,
            max_retries = self.config.max_retries,
            output_dir = %self.config.output_dir.display(),
            "Starting harvest"
        );

        let pipeline = Pipeline::spawn(&self.config)?;
        let outcome = self.harvest(pipeline.fanout()).await;
        let summary = pipeline.finish().await;

        let progress = match outcome {
            Ok(progress) => progress,
            Err(e) => {
                error!(error = %e, rows_written = summary.rows_written(), "Harvest aborted");
                return Err(e);
            }
        };

        let report = HarvestReport {
            run_id,
            group_id: self.config.group_id.clone(),
            started_at,
            finished_at: Utc::now(),
            progress,
            pipeline: summary,
        };
        info!(
            scraped = report.progress.scraped,
            batches = report.progress.batches,
            downloads = report.pipeline.downloads.succeeded,
            elapsed_ms = report.elapsed().num_milliseconds(),
            "Harvest complete"
        );
        Ok(report)
    }

    async fn harvest(&self, fanout: &FanOut) -> Result<Progress> {
        let feed = FeedLocator::new(&self.driver, &self.config)
            .locate(&self.config.group_id)
            .await?;

        let mut tracker = StabilityTracker::new();
        tracker
            .track(&self.driver, feed.node(), FEED_LABEL, self.config.debounce)
            .await?;

        PaginationController::new(&self.driver, &self.config, &tracker)?
            .run(&feed, fanout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarvestError;
    use crate::testing::{FakeDriver, FakePost};

    fn text_posts(range: std::ops::Range<usize>) -> Vec<FakePost> {
        range
            .map(|i| FakePost::album(&i.to_string(), format!("post {i}"), &[]))
            .collect()
    }

    #[tokio::test]
    async fn test_run_writes_tables_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FakeDriver::new()
            .with_batch(text_posts(0..4))
            .with_batch(text_posts(4..8));
        let config = HarvestConfig::new("42")
            .with_output_dir(dir.path())
            .with_min_records(6);

        let report = Harvester::new(driver, config.clone()).run().await.unwrap();

        assert_eq!(report.group_id, "42");
        assert_eq!(report.progress.scraped, 8);
        assert_eq!(report.progress.batches, 2);
        assert_eq!(report.pipeline.records.rows_written, 8);
        assert!(report.finished_at >= report.started_at);

        let records = std::fs::read_to_string(config.records_path()).unwrap();
        assert_eq!(records.lines().count(), 9);
        assert!(records.starts_with("id,location,content\n0,,post 0\n"));
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarvestConfig::default().with_output_dir(dir.path());

        let err = Harvester::new(FakeDriver::new(), config.clone())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::Config(_)));
        assert!(!config.records_path().exists());
    }

    #[tokio::test]
    async fn test_fatal_error_still_drains_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FakeDriver::new()
            .with_batch(text_posts(0..3))
            .with_timeouts(5);
        let config = HarvestConfig::new("42")
            .with_output_dir(dir.path())
            .with_min_records(10)
            .with_max_retries(5);

        let err = Harvester::new(driver, config.clone())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::RetriesExhausted { .. }));

        let records = std::fs::read_to_string(config.records_path()).unwrap();
        assert_eq!(records.lines().count(), 4);
    }

    #[tokio::test]
    async fn test_missing_feed_aborts_with_headers_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarvestConfig::new("42").with_output_dir(dir.path());

        let err = Harvester::new(FakeDriver::new().without_feed(), config.clone())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::FeedNotFound { .. }));

        let records = std::fs::read_to_string(config.records_path()).unwrap();
        assert_eq!(records, "id,location,content\n");
    }
}
