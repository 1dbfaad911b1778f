//! One-time bootstrap that reaches the feed container.
//!
//! The sequence is linear: navigate (re-navigating past login redirects),
//! dismiss the interstitial, find the feed, drop its leading buffer node and
//! scroll once to arm pagination. Any failure aborts the run.

use tracing::{debug, info};

use crate::config::HarvestConfig;
use crate::error::{HarvestError, Result};
use crate::scripts;
use crate::traits::driver::PageDriver;

/// The located feed container.
#[derive(Debug, Clone)]
pub struct FeedHandle<N> {
    node: N,
    group: String,
    url: String,
}

impl<N> FeedHandle<N> {
    pub fn new(node: N, group: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            node,
            group: group.into(),
            url: url.into(),
        }
    }

    /// Page node of the feed container.
    pub fn node(&self) -> &N {
        &self.node
    }

    /// Group the feed belongs to.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// URL the feed was loaded from.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Locates a group's feed on the page.
pub struct FeedLocator<'a, D: PageDriver> {
    driver: &'a D,
    config: &'a HarvestConfig,
}

impl<'a, D: PageDriver> FeedLocator<'a, D> {
    pub fn new(driver: &'a D, config: &'a HarvestConfig) -> Self {
        Self { driver, config }
    }

    /// Navigate to `url`, re-navigating while the site redirects elsewhere.
    pub async fn navigate_with_bypass(&self, url: &str) -> Result<()> {
        self.driver.navigate(url).await?;
        let mut landed = self.driver.current_url().await?;

        let mut attempts = 0;
        while landed != url && attempts < self.config.bypass_attempts {
            attempts += 1;
            debug!(
                target_url = %url,
                landed = %landed,
                attempt = attempts,
                "Redirected away from feed, retrying"
            );
            tokio::time::sleep(self.config.bypass_delay).await;
            self.driver.navigate(url).await?;
            landed = self.driver.current_url().await?;
        }

        if landed != url {
            return Err(HarvestError::BypassFailed {
                url: url.to_string(),
                landed,
                attempts,
            });
        }
        Ok(())
    }

    /// Bootstrap the feed for `group_id`.
    pub async fn locate(&self, group_id: &str) -> Result<FeedHandle<D::Node>> {
        let url = self.config.group_url(group_id);
        let selectors = &self.config.selectors;
        info!(group = %group_id, url = %url, driver = self.driver.name(), "Locating feed");

        self.navigate_with_bypass(&url).await?;

        if !selectors.login_prompt.is_empty() {
            self.driver
                .wait_visible(
                    &selectors.login_prompt,
                    self.config.interstitial_timeout,
                    self.config.poll_interval,
                )
                .await?;
            self.driver.click(&selectors.login_dismiss).await?;
            debug!("Interstitial dismissed");
        }

        let node = self
            .driver
            .query_all(&selectors.feed, None)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| HarvestError::FeedNotFound {
                group: group_id.to_string(),
            })?;

        let stripped = self
            .driver
            .call_on(&node, scripts::REMOVE_LEADING_BUFFER)
            .await?;
        debug!(stripped = %stripped, "Leading buffer node handled");

        self.driver.evaluate(scripts::SCROLL_TO_BOTTOM).await?;

        info!(group = %group_id, "Feed located");
        Ok(FeedHandle::new(node, group_id, url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeDriver, FakeNode};
    use std::time::Duration;

    fn config() -> HarvestConfig {
        HarvestConfig::new("42").with_bypass(3, Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_locate_runs_bootstrap_in_order() {
        let driver = FakeDriver::new();
        let config = config();

        let feed = FeedLocator::new(&driver, &config).locate("42").await.unwrap();

        assert_eq!(feed.node(), &FakeNode::Feed);
        assert_eq!(feed.group(), "42");
        assert_eq!(feed.url(), "https://www.facebook.com/groups/42/");
        assert_eq!(driver.feed_children(), 0);

        let calls = driver.calls();
        let navigate = calls
            .iter()
            .position(|c| matches!(c, Call::Navigate(_)))
            .unwrap();
        let dismiss = calls
            .iter()
            .position(|c| matches!(c, Call::Click(_)))
            .unwrap();
        let strip = calls
            .iter()
            .position(|c| {
                matches!(c, Call::CallOn { function, .. } if function == scripts::REMOVE_LEADING_BUFFER)
            })
            .unwrap();
        let scroll = calls
            .iter()
            .position(|c| matches!(c, Call::Evaluate(s) if s == scripts::SCROLL_TO_BOTTOM))
            .unwrap();
        assert!(navigate < dismiss && dismiss < strip && strip < scroll);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locate_without_feed_fails() {
        let driver = FakeDriver::new().without_feed();
        let config = config();

        let err = FeedLocator::new(&driver, &config)
            .locate("42")
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::FeedNotFound { ref group } if group == "42"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bypass_renavigates_after_redirect() {
        let driver = FakeDriver::new().with_landings(&[
            "https://www.facebook.com/login/",
            "https://www.facebook.com/login/",
        ]);
        let config = config();

        FeedLocator::new(&driver, &config)
            .navigate_with_bypass("https://www.facebook.com/groups/42/")
            .await
            .unwrap();

        let navigations = driver
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Navigate(_)))
            .count();
        assert_eq!(navigations, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bypass_gives_up_after_attempts() {
        let login = "https://www.facebook.com/login/";
        let driver = FakeDriver::new().with_landings(&[login, login, login, login]);
        let config = config();

        let err = FeedLocator::new(&driver, &config)
            .navigate_with_bypass("https://www.facebook.com/groups/42/")
            .await
            .unwrap_err();

        match err {
            HarvestError::BypassFailed { attempts, landed, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(landed, login);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_dismissal_aborts() {
        let config = config();
        let driver = FakeDriver::new().with_failing_click(config.selectors.login_dismiss.clone());

        let err = FeedLocator::new(&driver, &config)
            .locate("42")
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Driver(_)));
    }
}
