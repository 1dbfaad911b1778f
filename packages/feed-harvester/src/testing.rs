//! Testing utilities including a scripted fake page.
//!
//! [`FakeDriver`] implements [`PageDriver`] without a browser. Each poll for
//! record nodes consumes one scripted [`PollStep`], so tests decide exactly
//! when the feed yields a batch, times out, or fails outright. Every call is
//! recorded for assertions.
//!
//! Like a real feed, posts stay attached until evicted: a poll returns every
//! attached record node, minus those tagged harvested when the query asks
//! for untagged nodes only.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::Selectors;
use crate::error::{DriverError, DriverResult};
use crate::eviction::evictable_count;
use crate::scripts;
use crate::traits::driver::PageDriver;

/// Handle to an element of the fake page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FakeNode {
    Feed,
    Record(usize),
    Link { record: usize, index: usize },
    Media { record: usize, index: usize },
}

/// A post as the fake page renders it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakePost {
    pub text: String,
    pub links: Vec<String>,
    pub images: Vec<String>,
}

impl FakePost {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// A post whose album link carries `set=pcb.<id>` and one image per name.
    pub fn album(id: &str, text: impl Into<String>, images: &[&str]) -> Self {
        let mut post = Self::new(text)
            .with_link(format!("https://www.facebook.com/photo/?fbid=1&set=pcb.{id}"));
        for name in images {
            post = post.with_image(format!(
                "https://scontent.fna.fbcdn.net/v/t39.30808-6/{name}?stp=dst-jpg"
            ));
        }
        post
    }

    pub fn with_link(mut self, href: impl Into<String>) -> Self {
        self.links.push(href.into());
        self
    }

    pub fn with_image(mut self, src: impl Into<String>) -> Self {
        self.images.push(src.into());
        self
    }
}

/// Outcome of one poll for record nodes.
#[derive(Debug, Clone)]
pub enum PollStep {
    /// New record nodes render
    Batch(Vec<FakePost>),
    /// Nothing renders before the deadline
    Timeout,
    /// The automation layer fails with a non-timeout error
    Fail(String),
}

/// Record of a call made to the fake page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Navigate(String),
    Evaluate(String),
    CallOn { node: FakeNode, function: String },
    Query { selector: String, scope: Option<FakeNode> },
    WaitForNodes(String),
    Click(String),
}

#[derive(Debug)]
struct State {
    calls: Vec<Call>,
    posts: Vec<FakePost>,
    steps: VecDeque<PollStep>,
    stable: bool,
    feed_present: bool,
    /// Leading non-content children
    buffer: usize,
    /// Attached record nodes, in document order
    attached: Vec<usize>,
    harvested: HashSet<usize>,
    landings: VecDeque<String>,
    last_url: String,
    fail_click: Option<String>,
    fail_eviction: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            posts: Vec::new(),
            steps: VecDeque::new(),
            stable: true,
            feed_present: true,
            buffer: 1,
            attached: Vec::new(),
            harvested: HashSet::new(),
            landings: VecDeque::new(),
            last_url: "about:blank".to_string(),
            fail_click: None,
            fail_eviction: false,
        }
    }
}

/// A scripted in-memory page.
///
/// Clones share state, so a test can keep a handle while the harvester owns
/// another.
#[derive(Debug, Clone)]
pub struct FakeDriver {
    selectors: Selectors,
    state: Arc<Mutex<State>>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriver {
    /// A page with a present, stable feed and no scripted polls.
    pub fn new() -> Self {
        Self {
            selectors: Selectors::default(),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Use custom selectors (must match the harvester's config).
    pub fn with_selectors(mut self, selectors: Selectors) -> Self {
        self.selectors = selectors;
        self
    }

    /// Queue a poll outcome.
    pub fn push_step(&self, step: PollStep) {
        self.state.lock().unwrap().steps.push_back(step);
    }

    /// Queue a batch of posts (builder pattern).
    pub fn with_batch(self, posts: Vec<FakePost>) -> Self {
        self.push_step(PollStep::Batch(posts));
        self
    }

    /// Queue `count` consecutive timeouts (builder pattern).
    pub fn with_timeouts(self, count: usize) -> Self {
        for _ in 0..count {
            self.push_step(PollStep::Timeout);
        }
        self
    }

    /// Queue a hard failure (builder pattern).
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.push_step(PollStep::Fail(message.into()));
        self
    }

    /// Make the feed container missing.
    pub fn without_feed(self) -> Self {
        self.state.lock().unwrap().feed_present = false;
        self
    }

    /// URLs reported by successive `current_url` calls, e.g. login redirects.
    pub fn with_landings(self, urls: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .landings
            .extend(urls.iter().map(|u| u.to_string()));
        self
    }

    /// Make clicks on `selector` fail.
    pub fn with_failing_click(self, selector: impl Into<String>) -> Self {
        self.state.lock().unwrap().fail_click = Some(selector.into());
        self
    }

    /// Make eviction scripts fail.
    pub fn with_failing_eviction(self) -> Self {
        self.state.lock().unwrap().fail_eviction = true;
        self
    }

    /// Set the in-page stability signal.
    pub fn set_stable(&self, stable: bool) {
        self.state.lock().unwrap().stable = stable;
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of direct children currently in the feed.
    pub fn feed_children(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.buffer + state.attached.len()
    }

    /// Record nodes currently attached to the feed.
    pub fn attached(&self) -> Vec<FakeNode> {
        let state = self.state.lock().unwrap();
        state.attached.iter().copied().map(FakeNode::Record).collect()
    }

    /// Number of record polls made so far.
    pub fn poll_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::WaitForNodes(s) if self.is_record_query(s)))
            .count()
    }

    fn is_record_query(&self, selector: &str) -> bool {
        selector == self.selectors.record || selector == scripts::unharvested(&self.selectors.record)
    }

    /// Number of scroll-to-bottom evaluations made so far.
    pub fn scroll_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Evaluate(s) if s == scripts::SCROLL_TO_BOTTOM))
            .count()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

/// Parse the kept window out of an `evict_all_but` script.
fn eviction_window(function: &str) -> Option<usize> {
    let start = function.find(":nth-last-child(n+")? + ":nth-last-child(n+".len();
    let rest = &function[start..];
    let end = rest.find(')')?;
    let first_removed: usize = rest[..end].trim().parse().ok()?;
    first_removed.checked_sub(1)
}

#[async_trait]
impl PageDriver for FakeDriver {
    type Node = FakeNode;

    async fn navigate(&self, url: &str) -> DriverResult<()> {
        self.record(Call::Navigate(url.to_string()));
        self.state.lock().unwrap().last_url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        let mut state = self.state.lock().unwrap();
        Ok(state
            .landings
            .pop_front()
            .unwrap_or_else(|| state.last_url.clone()))
    }

    async fn evaluate(&self, script: &str) -> DriverResult<Value> {
        self.record(Call::Evaluate(script.to_string()));
        let state = self.state.lock().unwrap();

        if script.contains("__harvestStability") {
            return Ok(json!(state.stable));
        }
        if script.contains("getBoundingClientRect") {
            return Ok(json!(true));
        }
        if script.contains("querySelectorAll") {
            return Ok(json!(0));
        }
        Ok(Value::Null)
    }

    async fn call_on(&self, node: &FakeNode, function: &str) -> DriverResult<Value> {
        self.record(Call::CallOn {
            node: node.clone(),
            function: function.to_string(),
        });
        let mut state = self.state.lock().unwrap();

        match node {
            FakeNode::Feed if function.contains("MutationObserver") => Ok(json!(true)),
            FakeNode::Feed if function == scripts::REMOVE_LEADING_BUFFER => {
                if state.buffer > 0 {
                    state.buffer -= 1;
                    Ok(json!(true))
                } else if !state.attached.is_empty() {
                    state.attached.remove(0);
                    Ok(json!(true))
                } else {
                    Ok(json!(false))
                }
            }
            FakeNode::Feed => match eviction_window(function) {
                Some(_) if state.fail_eviction => {
                    Err(DriverError::Script("node is detached".into()))
                }
                Some(window) => {
                    let children = state.buffer + state.attached.len();
                    let removed = evictable_count(children, window);
                    let from_buffer = removed.min(state.buffer);
                    state.buffer -= from_buffer;
                    state.attached.drain(..removed - from_buffer);
                    Ok(json!(removed))
                }
                None => Ok(Value::Null),
            },
            FakeNode::Record(index) if function == scripts::MARK_HARVESTED => {
                state.harvested.insert(*index);
                Ok(json!(true))
            }
            FakeNode::Record(index) if function.contains("createTreeWalker") => state
                .posts
                .get(*index)
                .map(|post| json!(post.text))
                .ok_or_else(|| DriverError::Script(format!("record {index} is detached"))),
            _ => Ok(Value::Null),
        }
    }

    async fn query_all(
        &self,
        selector: &str,
        scope: Option<&FakeNode>,
    ) -> DriverResult<Vec<FakeNode>> {
        self.record(Call::Query {
            selector: selector.to_string(),
            scope: scope.cloned(),
        });
        let state = self.state.lock().unwrap();

        let nodes = match scope {
            None if selector == self.selectors.feed && state.feed_present => vec![FakeNode::Feed],
            Some(FakeNode::Record(record)) if selector == self.selectors.album_link => state
                .posts
                .get(*record)
                .map(|post| {
                    (0..post.links.len())
                        .map(|index| FakeNode::Link {
                            record: *record,
                            index,
                        })
                        .collect()
                })
                .unwrap_or_default(),
            Some(FakeNode::Record(record)) if selector == self.selectors.media => state
                .posts
                .get(*record)
                .map(|post| {
                    (0..post.images.len())
                        .map(|index| FakeNode::Media {
                            record: *record,
                            index,
                        })
                        .collect()
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        Ok(nodes)
    }

    async fn attribute(&self, node: &FakeNode, name: &str) -> DriverResult<Option<String>> {
        let state = self.state.lock().unwrap();
        let value = match (node, name) {
            (FakeNode::Link { record, index }, "href") => state
                .posts
                .get(*record)
                .and_then(|post| post.links.get(*index).cloned()),
            (FakeNode::Media { record, index }, "src") => state
                .posts
                .get(*record)
                .and_then(|post| post.images.get(*index).cloned()),
            _ => None,
        };
        Ok(value)
    }

    async fn click(&self, selector: &str) -> DriverResult<()> {
        self.record(Call::Click(selector.to_string()));
        let state = self.state.lock().unwrap();
        if state.fail_click.as_deref() == Some(selector) {
            return Err(DriverError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        Ok(())
    }

    async fn wait_for_nodes(
        &self,
        selector: &str,
        scope: Option<&FakeNode>,
        timeout: Duration,
        _interval: Duration,
    ) -> DriverResult<Vec<FakeNode>> {
        self.record(Call::WaitForNodes(selector.to_string()));

        if !self.is_record_query(selector) || scope != Some(&FakeNode::Feed) {
            return Err(DriverError::timeout(selector, timeout));
        }
        let untagged_only = selector != self.selectors.record;

        let mut state = self.state.lock().unwrap();
        match state.steps.pop_front() {
            Some(PollStep::Batch(posts)) => {
                let first = state.posts.len();
                state.posts.extend(posts);
                let rendered = first..state.posts.len();
                state.attached.extend(rendered);

                let nodes: Vec<FakeNode> = state
                    .attached
                    .iter()
                    .filter(|index| !(untagged_only && state.harvested.contains(*index)))
                    .copied()
                    .map(FakeNode::Record)
                    .collect();
                if nodes.is_empty() {
                    return Err(DriverError::timeout(selector, timeout));
                }
                Ok(nodes)
            }
            Some(PollStep::Fail(message)) => Err(DriverError::Protocol(message.into())),
            Some(PollStep::Timeout) | None => Err(DriverError::timeout(selector, timeout)),
        }
    }

    fn name(&self) -> &str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eviction_window_parses_script() {
        assert_eq!(eviction_window(&scripts::evict_all_but(3)), Some(3));
        assert_eq!(eviction_window(scripts::MARK_HARVESTED), None);
    }

    #[tokio::test]
    async fn test_retained_nodes_come_back_unless_tagged() {
        let driver = FakeDriver::new()
            .with_batch(vec![FakePost::new("a"), FakePost::new("b")])
            .with_batch(vec![FakePost::new("c")])
            .with_batch(vec![FakePost::new("d")]);
        let selectors = Selectors::default();
        let fresh = scripts::unharvested(&selectors.record);
        let timeout = Duration::from_secs(5);
        let interval = Duration::from_millis(100);

        driver
            .wait_for_nodes(&fresh, Some(&FakeNode::Feed), timeout, interval)
            .await
            .unwrap();
        driver
            .call_on(&FakeNode::Record(0), scripts::MARK_HARVESTED)
            .await
            .unwrap();

        let plain = driver
            .wait_for_nodes(&selectors.record, Some(&FakeNode::Feed), timeout, interval)
            .await
            .unwrap();
        assert_eq!(
            plain,
            vec![FakeNode::Record(0), FakeNode::Record(1), FakeNode::Record(2)]
        );

        let untagged = driver
            .wait_for_nodes(&fresh, Some(&FakeNode::Feed), timeout, interval)
            .await
            .unwrap();
        assert_eq!(
            untagged,
            vec![FakeNode::Record(1), FakeNode::Record(2), FakeNode::Record(3)]
        );
    }

    #[tokio::test]
    async fn test_eviction_drops_buffer_then_oldest_records() {
        let driver =
            FakeDriver::new().with_batch((0..5).map(|i| FakePost::new(i.to_string())).collect());
        let selectors = Selectors::default();
        driver
            .wait_for_nodes(
                &selectors.record,
                Some(&FakeNode::Feed),
                Duration::from_secs(5),
                Duration::from_millis(100),
            )
            .await
            .unwrap();

        let removed = driver
            .call_on(&FakeNode::Feed, &scripts::evict_all_but(3))
            .await
            .unwrap();
        assert_eq!(removed, json!(3));
        assert_eq!(
            driver.attached(),
            vec![FakeNode::Record(2), FakeNode::Record(3), FakeNode::Record(4)]
        );
    }

    #[tokio::test]
    async fn test_batches_are_consumed_in_order() {
        let driver = FakeDriver::new()
            .with_batch(vec![FakePost::new("a"), FakePost::new("b")])
            .with_timeouts(1);
        let selectors = Selectors::default();
        let timeout = Duration::from_secs(5);
        let interval = Duration::from_millis(100);

        let first = driver
            .wait_for_nodes(&selectors.record, Some(&FakeNode::Feed), timeout, interval)
            .await
            .unwrap();
        assert_eq!(first, vec![FakeNode::Record(0), FakeNode::Record(1)]);

        let second = driver
            .wait_for_nodes(&selectors.record, Some(&FakeNode::Feed), timeout, interval)
            .await;
        assert!(second.unwrap_err().is_timeout());
        assert_eq!(driver.poll_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_step_is_not_a_timeout() {
        let driver = FakeDriver::new().with_failure("websocket closed");
        let selectors = Selectors::default();

        let err = driver
            .wait_for_nodes(
                &selectors.record,
                Some(&FakeNode::Feed),
                Duration::from_secs(5),
                Duration::from_millis(100),
            )
            .await
            .unwrap_err();
        assert!(!err.is_timeout());
    }
}
