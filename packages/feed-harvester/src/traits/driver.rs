//! Page automation capability.
//!
//! The harvester never talks to a browser directly. Everything it needs from
//! the hosted page goes through [`PageDriver`]: navigation, script
//! evaluation, element queries and polling. Calls against one driver are
//! always issued sequentially by a single control task.
//!
//! # Usage
//!
//! ```rust,ignore
//! use feed_harvester::traits::driver::PageDriver;
//!
//! driver.navigate("https://example.com/groups/1/").await?;
//! let feed = driver.query_all("[role=feed]", None).await?;
//! let posts = driver
//!     .wait_for_nodes("article", feed.first(), timeout, interval)
//!     .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{DriverError, DriverResult};
use crate::scripts;

/// Run a page operation under a deadline.
///
/// Expiry becomes [`DriverError::Timeout`], which is the only error kind the
/// pagination loop treats as retryable.
pub async fn with_timeout<T, F>(operation: &str, after: Duration, fut: F) -> DriverResult<T>
where
    F: Future<Output = DriverResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::timeout(operation, after)),
    }
}

/// JavaScript truthiness of an evaluated value.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Capabilities the harvester consumes from the page automation layer.
///
/// `Node` is an opaque handle to an element in the live document. Handles
/// may go stale once the element is removed.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Handle to an element in the page.
    type Node: Send + Sync;

    /// Navigate the page to `url` and wait for the load to settle.
    async fn navigate(&self, url: &str) -> DriverResult<()>;

    /// The URL the page actually ended up on.
    async fn current_url(&self) -> DriverResult<String>;

    /// Evaluate a script in the page and read back its value.
    async fn evaluate(&self, script: &str) -> DriverResult<Value>;

    /// Call a function declaration with `this` bound to `node`.
    async fn call_on(&self, node: &Self::Node, function: &str) -> DriverResult<Value>;

    /// Query all elements matching `selector`, scoped to `scope` when given.
    ///
    /// Returns immediately; an empty result is not an error.
    async fn query_all(
        &self,
        selector: &str,
        scope: Option<&Self::Node>,
    ) -> DriverResult<Vec<Self::Node>>;

    /// Read an attribute of an element.
    async fn attribute(&self, node: &Self::Node, name: &str) -> DriverResult<Option<String>>;

    /// Click the first element matching `selector`.
    async fn click(&self, selector: &str) -> DriverResult<()>;

    /// Poll `script` every `interval` until it evaluates truthy.
    ///
    /// `label` names the condition in timeout errors.
    async fn poll_condition(
        &self,
        label: &str,
        script: &str,
        timeout: Duration,
        interval: Duration,
    ) -> DriverResult<()> {
        with_timeout(label, timeout, async {
            loop {
                if is_truthy(&self.evaluate(script).await?) {
                    return Ok(());
                }
                tokio::time::sleep(interval).await;
            }
        })
        .await
    }

    /// Wait until the first element matching `selector` is rendered and visible.
    async fn wait_visible(
        &self,
        selector: &str,
        timeout: Duration,
        interval: Duration,
    ) -> DriverResult<()> {
        self.poll_condition(
            &format!("{selector} to be visible"),
            &scripts::is_visible(selector),
            timeout,
            interval,
        )
        .await
    }

    /// Query until at least one element matches, or time out.
    async fn wait_for_nodes(
        &self,
        selector: &str,
        scope: Option<&Self::Node>,
        timeout: Duration,
        interval: Duration,
    ) -> DriverResult<Vec<Self::Node>> {
        with_timeout(selector, timeout, async {
            loop {
                let nodes = self.query_all(selector, scope).await?;
                if !nodes.is_empty() {
                    return Ok(nodes);
                }
                tokio::time::sleep(interval).await;
            }
        })
        .await
    }

    /// Driver name (for logging).
    fn name(&self) -> &str {
        "unknown"
    }
}
