//! Run configuration and site selectors.

use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Label under which the feed container is tracked for stability.
pub const FEED_LABEL: &str = "feed";

/// CSS selectors used to find things on the feed page.
///
/// These are site-specific and brittle; defaults target a Facebook group feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selectors {
    /// The feed container whose children are the rendered posts
    pub feed: String,

    /// Record nodes, queried from the feed: a fixed structural shape that
    /// contains at least one attachment-bearing image
    pub record: String,

    /// "See more" affordances that expand truncated post text
    pub see_more: String,

    /// Content region inside a record whose text is the post body
    pub message: String,

    /// Outbound links wrapping an image, the first of which carries the id
    pub album_link: String,

    /// Attachment-bearing images inside a record
    pub media: String,

    /// Interstitial prompt shown to anonymous visitors; empty skips dismissal
    pub login_prompt: String,

    /// Control that closes the interstitial
    pub login_dismiss: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            feed: r#"[data-pagelet="GroupFeed"] > [role="feed"]"#.to_string(),
            record: r#"[aria-posinset][role="article"] div:not([class]):nth-child(3):has(a img[src*="fna.fbcdn.net"])"#.to_string(),
            see_more: r#"[data-ad-preview="message"] div:last-child[role="button"]"#.to_string(),
            message: r#"[data-ad-preview="message"]"#.to_string(),
            album_link: r#"a[role="link"]:has(img)"#.to_string(),
            media: r#"img[src*="fna.fbcdn.net"]"#.to_string(),
            login_prompt: "#login_popup_cta_form".to_string(),
            login_dismiss: r#"[role="dialog"] > div > [role="button"]"#.to_string(),
        }
    }
}

/// What to do when removing processed records from the page fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EvictionFailure {
    /// Abort the run
    #[default]
    Fatal,
    /// Log and keep going while the feed keeps growing
    Ignore,
}

/// Configuration for a single harvesting run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Identifier of the group whose feed is harvested
    pub group_id: String,

    /// Base URL the group id is appended to
    pub endpoint: String,

    /// Directory receiving both tables and the image directory
    pub output_dir: PathBuf,

    /// File name of the records table
    pub records_file: String,

    /// File name of the attachments table
    pub attachments_file: String,

    /// Directory name (under `output_dir`) for downloaded images
    pub images_dir: String,

    /// Header of the identifier column in the attachments table (`id` or `post_id`)
    pub attachment_id_column: String,

    /// Run the browser without a window
    pub headless: bool,

    /// Strict deadline for the record query in each poll cycle
    pub query_timeout: Duration,

    /// Liveness ceiling while waiting for the feed to settle
    pub stability_timeout: Duration,

    /// Quiet period after the last mutation before the feed counts as stable
    pub debounce: Duration,

    /// Interval between condition checks while polling the page
    pub poll_interval: Duration,

    /// Consecutive query timeouts tolerated; the last one is fatal
    pub max_retries: usize,

    /// Stop once at least this many records were scraped (a lower bound)
    pub min_records: usize,

    /// Number of concurrent image download workers
    pub download_workers: usize,

    /// Capacity of each row sink's queue
    pub record_queue_capacity: usize,

    /// Capacity of the shared download queue
    pub download_queue_capacity: usize,

    /// Number of trailing feed children kept after eviction
    pub eviction_window: usize,

    /// What an eviction failure does to the run
    pub eviction_failure: EvictionFailure,

    /// How long to wait for the interstitial before giving up
    pub interstitial_timeout: Duration,

    /// Re-navigation attempts when the site redirects away from the feed
    pub bypass_attempts: usize,

    /// Pause before each re-navigation
    pub bypass_delay: Duration,

    /// Per-request timeout for image downloads
    pub http_timeout: Duration,

    /// User agent sent with image downloads
    pub user_agent: String,

    /// Site selectors
    pub selectors: Selectors,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            group_id: String::new(),
            endpoint: "https://www.facebook.com/groups".to_string(),
            output_dir: PathBuf::from("."),
            records_file: "posts.csv".to_string(),
            attachments_file: "attachments.csv".to_string(),
            images_dir: "images".to_string(),
            attachment_id_column: "id".to_string(),
            headless: true,
            query_timeout: Duration::from_secs(5),
            stability_timeout: Duration::from_secs(30),
            debounce: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            max_retries: 5,
            min_records: 30,
            download_workers: default_download_workers(),
            record_queue_capacity: 32,
            download_queue_capacity: 64,
            eviction_window: 3,
            eviction_failure: EvictionFailure::Fatal,
            interstitial_timeout: Duration::from_secs(10),
            bypass_attempts: 3,
            bypass_delay: Duration::from_secs(5),
            http_timeout: Duration::from_secs(30),
            user_agent: "FeedHarvester/0.1".to_string(),
            selectors: Selectors::default(),
        }
    }
}

/// One worker per available core, leaving one for the control task.
pub fn default_download_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

impl HarvestConfig {
    /// Create a config for a group with default settings.
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            ..Default::default()
        }
    }

    /// Set the output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the endpoint the group id is appended to.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the minimum record count.
    pub fn with_min_records(mut self, min: usize) -> Self {
        self.min_records = min;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the per-query timeout.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set the stability liveness timeout.
    pub fn with_stability_timeout(mut self, timeout: Duration) -> Self {
        self.stability_timeout = timeout;
        self
    }

    /// Set the number of download workers.
    pub fn with_download_workers(mut self, workers: usize) -> Self {
        self.download_workers = workers;
        self
    }

    /// Set the attachments table identifier column.
    pub fn with_attachment_id_column(mut self, column: impl Into<String>) -> Self {
        self.attachment_id_column = column.into();
        self
    }

    /// Set the eviction failure policy.
    pub fn with_eviction_failure(mut self, policy: EvictionFailure) -> Self {
        self.eviction_failure = policy;
        self
    }

    /// Set the redirect bypass attempts and delay.
    pub fn with_bypass(mut self, attempts: usize, delay: Duration) -> Self {
        self.bypass_attempts = attempts;
        self.bypass_delay = delay;
        self
    }

    /// Toggle headless mode.
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Replace the site selectors.
    pub fn with_selectors(mut self, selectors: Selectors) -> Self {
        self.selectors = selectors;
        self
    }

    /// URL of a group's feed page.
    pub fn group_url(&self, group_id: &str) -> String {
        format!("{}/{}/", self.endpoint.trim_end_matches('/'), group_id)
    }

    /// URL of the configured group's feed page.
    pub fn feed_url(&self) -> String {
        self.group_url(&self.group_id)
    }

    /// Path of the records table.
    pub fn records_path(&self) -> PathBuf {
        self.output_dir.join(&self.records_file)
    }

    /// Path of the attachments table.
    pub fn attachments_path(&self) -> PathBuf {
        self.output_dir.join(&self.attachments_file)
    }

    /// Directory receiving downloaded images.
    pub fn images_path(&self) -> PathBuf {
        self.output_dir.join(&self.images_dir)
    }

    /// Reject settings that would make the run meaningless or hang.
    pub fn validate(&self) -> Result<()> {
        if self.group_id.trim().is_empty() {
            return Err(HarvestError::Config("group id must not be empty".into()));
        }
        if self.download_workers == 0 {
            return Err(HarvestError::Config(
                "at least one download worker is required".into(),
            ));
        }
        if self.record_queue_capacity == 0 || self.download_queue_capacity == 0 {
            return Err(HarvestError::Config(
                "queue capacities must be greater than zero".into(),
            ));
        }
        if self.eviction_window == 0 {
            return Err(HarvestError::Config(
                "eviction window must keep at least one node".into(),
            ));
        }
        if self.attachment_id_column.trim().is_empty() {
            return Err(HarvestError::Config(
                "attachment id column must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_url_joins_endpoint_and_group() {
        let config = HarvestConfig::new("900072927547214");
        assert_eq!(
            config.feed_url(),
            "https://www.facebook.com/groups/900072927547214/"
        );

        let trailing = HarvestConfig::new("42").with_endpoint("http://localhost:8080/groups/");
        assert_eq!(trailing.feed_url(), "http://localhost:8080/groups/42/");
    }

    #[test]
    fn test_output_paths_live_under_output_dir() {
        let config = HarvestConfig::new("1").with_output_dir("/tmp/run");
        assert_eq!(config.records_path(), PathBuf::from("/tmp/run/posts.csv"));
        assert_eq!(
            config.attachments_path(),
            PathBuf::from("/tmp/run/attachments.csv")
        );
        assert_eq!(config.images_path(), PathBuf::from("/tmp/run/images"));
    }

    #[test]
    fn test_validate_rejects_empty_group() {
        let err = HarvestConfig::default().validate().unwrap_err();
        assert!(matches!(err, HarvestError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = HarvestConfig::new("1").with_download_workers(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = HarvestConfig::new("1");
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.min_records, 30);
        assert_eq!(config.eviction_window, 3);
        assert_eq!(config.eviction_failure, EvictionFailure::Fatal);
        assert!(config.download_workers >= 1);
    }
}
