//! Removes processed records from the live feed.
//!
//! The feed only grows at the bottom, so everything above a short trailing
//! window has already been harvested. Dropping it bounds both the size of the
//! document and the cost of the next record query.

use tracing::{debug, warn};

use crate::config::{EvictionFailure, HarvestConfig};
use crate::error::{DriverError, DriverResult, HarvestError, Result};
use crate::locator::FeedHandle;
use crate::scripts;
use crate::traits::driver::PageDriver;

/// How many leading children to remove so that only `window` remain.
pub fn evictable_count(children: usize, window: usize) -> usize {
    children.saturating_sub(window)
}

/// Bottom-anchored eviction of feed children.
#[derive(Debug, Clone, Copy)]
pub struct EvictionPolicy {
    window: usize,
    on_failure: EvictionFailure,
}

impl EvictionPolicy {
    pub fn new(window: usize, on_failure: EvictionFailure) -> Self {
        Self { window, on_failure }
    }

    pub fn from_config(config: &HarvestConfig) -> Self {
        Self::new(config.eviction_window, config.eviction_failure)
    }

    /// Number of trailing children kept.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Remove every feed child except the last `window`. Returns how many
    /// were removed.
    pub async fn evict<D: PageDriver>(
        &self,
        driver: &D,
        feed: &FeedHandle<D::Node>,
    ) -> Result<usize> {
        match self.remove(driver, feed.node()).await {
            Ok(removed) => {
                debug!(removed, kept = self.window, "Evicted processed records");
                Ok(removed)
            }
            Err(e) => match self.on_failure {
                EvictionFailure::Fatal => Err(HarvestError::Eviction(e)),
                EvictionFailure::Ignore => {
                    warn!(error = %e, "Eviction failed, continuing");
                    Ok(0)
                }
            },
        }
    }

    async fn remove<D: PageDriver>(&self, driver: &D, feed: &D::Node) -> DriverResult<usize> {
        driver
            .call_on(feed, &scripts::evict_all_but(self.window))
            .await?
            .as_u64()
            .map(|removed| removed as usize)
            .ok_or_else(|| DriverError::Script("eviction did not report a count".into()))
    }
}
