//! Command-line arguments for the `feed-harvester` binary.
//!
//! Every option can also be set through a `HARVEST_*` environment variable,
//! including from a `.env` file.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::config::{default_download_workers, EvictionFailure, HarvestConfig};

#[derive(Debug, Parser)]
#[command(name = "feed-harvester")]
#[command(about = "Harvest posts and images from a group feed into CSV tables")]
pub struct Args {
    /// Identifier of the group to harvest
    #[arg(env = "HARVEST_GROUP_ID")]
    pub group_id: String,

    /// Directory receiving the tables and the image directory
    #[arg(long, short, env = "HARVEST_OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Base URL the group id is appended to
    #[arg(long, env = "HARVEST_ENDPOINT", default_value = "https://www.facebook.com/groups")]
    pub endpoint: String,

    /// Run the browser without a window (`--headless false` to watch it)
    #[arg(long, env = "HARVEST_HEADLESS", default_value_t = true, action = ArgAction::Set)]
    pub headless: bool,

    /// Seconds to wait for new records on each poll
    #[arg(long, env = "HARVEST_QUERY_TIMEOUT", default_value_t = 5)]
    pub query_timeout: u64,

    /// Consecutive poll timeouts tolerated before giving up
    #[arg(long, env = "HARVEST_MAX_RETRIES", default_value_t = 5)]
    pub max_retries: usize,

    /// Stop once at least this many posts were scraped
    #[arg(long, short = 'n', env = "HARVEST_MIN_RECORDS", default_value_t = 30)]
    pub min_records: usize,

    /// Concurrent image downloads (defaults to one less than the core count)
    #[arg(long, env = "HARVEST_WORKERS")]
    pub workers: Option<usize>,

    /// Header of the id column in the attachments table
    #[arg(
        long,
        env = "HARVEST_ID_COLUMN",
        default_value = "id",
        value_parser = ["id", "post_id"]
    )]
    pub id_column: String,

    /// What to do when removing processed posts from the page fails
    #[arg(
        long,
        env = "HARVEST_ON_EVICTION_FAILURE",
        value_enum,
        default_value_t = EvictionFailure::Fatal
    )]
    pub on_eviction_failure: EvictionFailure,
}

impl Args {
    /// Build the run configuration.
    pub fn into_config(self) -> HarvestConfig {
        HarvestConfig::new(self.group_id)
            .with_output_dir(self.output_dir)
            .with_endpoint(self.endpoint)
            .with_headless(self.headless)
            .with_query_timeout(Duration::from_secs(self.query_timeout))
            .with_max_retries(self.max_retries)
            .with_min_records(self.min_records)
            .with_download_workers(self.workers.unwrap_or_else(default_download_workers))
            .with_attachment_id_column(self.id_column)
            .with_eviction_failure(self.on_eviction_failure)
    }
}
