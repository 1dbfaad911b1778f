//! Feed Harvester
//!
//! Launches Chromium, harvests one group's feed and exits non-zero on any
//! fatal error.

use anyhow::{Context, Result};
use clap::Parser;
use feed_harvester::cli::Args;
use feed_harvester::{ChromiumDriver, Harvester};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables before clap reads them
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,feed_harvester=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let config = Args::parse().into_config();
    config.validate().context("Invalid configuration")?;

    let driver = ChromiumDriver::launch(&config)
        .await
        .context("Failed to launch browser")?;

    let harvester = Harvester::new(driver, config);
    let outcome = harvester.run().await;

    if let Err(e) = harvester.into_driver().close().await {
        tracing::warn!(error = %e, "Failed to close browser cleanly");
    }

    match outcome {
        Ok(report) => {
            tracing::info!(
                run_id = %report.run_id,
                scraped = report.progress.scraped,
                rows_written = report.pipeline.rows_written(),
                images = report.pipeline.downloads.succeeded,
                "Done"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Harvest failed");
            Err(e).context("Harvest failed")
        }
    }
}
