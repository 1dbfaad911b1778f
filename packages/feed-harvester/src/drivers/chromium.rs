//! [`PageDriver`] over a real Chromium instance via the DevTools protocol.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::js_protocol::runtime::CallFunctionOnParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Element, Page};
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::HarvestConfig;
use crate::error::{DriverError, DriverResult};
use crate::traits::driver::{with_timeout, PageDriver};

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);

/// CDP failures, request timeouts included, are never retryable.
fn protocol(e: CdpError) -> DriverError {
    DriverError::Protocol(e.to_string().into())
}

/// A single Chromium tab driven over CDP.
pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromiumDriver {
    /// Launch a browser and open a blank tab.
    pub async fn launch(config: &HarvestConfig) -> DriverResult<Self> {
        let mut builder = BrowserConfig::builder();
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder
            .build()
            .map_err(|e| DriverError::Protocol(e.into()))?;

        let (browser, mut handler) = Browser::launch(browser_config).await.map_err(protocol)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "Browser handler stopped");
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(protocol)?;
        info!(headless = config.headless, "Browser launched");

        Ok(Self {
            browser,
            page,
            handler,
        })
    }

    /// Close the browser and wait for its event loop to stop.
    pub async fn close(mut self) -> DriverResult<()> {
        self.browser.close().await.map_err(protocol)?;
        if let Err(e) = self.handler.await {
            warn!(error = %e, "Browser handler task failed");
        }
        Ok(())
    }
}

#[async_trait]
impl PageDriver for ChromiumDriver {
    type Node = Element;

    async fn navigate(&self, url: &str) -> DriverResult<()> {
        with_timeout("navigation", NAVIGATION_TIMEOUT, async {
            self.page.goto(url).await.map_err(protocol)?;
            Ok(())
        })
        .await
    }

    async fn current_url(&self) -> DriverResult<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(protocol)?
            .unwrap_or_default())
    }

    async fn evaluate(&self, script: &str) -> DriverResult<Value> {
        let result = self.page.evaluate(script).await.map_err(protocol)?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn call_on(&self, node: &Element, function: &str) -> DriverResult<Value> {
        let params = CallFunctionOnParams::builder()
            .function_declaration(function)
            .object_id(node.remote_object_id.clone())
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(|e| DriverError::Script(e.to_string()))?;

        let response = self.page.execute(params).await.map_err(protocol)?;
        if let Some(exception) = &response.result.exception_details {
            return Err(DriverError::Script(exception.text.clone()));
        }
        Ok(response.result.result.value.clone().unwrap_or(Value::Null))
    }

    async fn query_all(
        &self,
        selector: &str,
        scope: Option<&Element>,
    ) -> DriverResult<Vec<Element>> {
        let found = match scope {
            Some(parent) => parent.find_elements(selector).await,
            None => self.page.find_elements(selector).await,
        };

        match found {
            Ok(elements) => Ok(elements),
            // CDP reports an empty match as a missing node
            Err(CdpError::NotFound) => Ok(Vec::new()),
            Err(e) => Err(protocol(e)),
        }
    }

    async fn attribute(&self, node: &Element, name: &str) -> DriverResult<Option<String>> {
        node.attribute(name).await.map_err(protocol)
    }

    async fn click(&self, selector: &str) -> DriverResult<()> {
        let element = self.page.find_element(selector).await.map_err(|e| match e {
            CdpError::NotFound => DriverError::ElementNotFound {
                selector: selector.to_string(),
            },
            other => protocol(other),
        })?;
        element.click().await.map_err(protocol)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "chromium"
    }
}
