//! Mutation-quiet detection for live page subtrees.
//!
//! A tracked subject's signal lives in the page: an observer watching the
//! subject's child list flips it to `false` on every mutation and back to
//! `true` once the debounce window passes without another one. This module
//! only installs the observer and reads the signal.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::DriverResult;
use crate::scripts;
use crate::traits::driver::{is_truthy, PageDriver};

/// A named node tracked for stability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub label: String,
    pub debounce: Duration,
}

/// Registry of subjects tracked during one run.
#[derive(Debug, Default)]
pub struct StabilityTracker {
    subjects: HashMap<String, Subject>,
}

impl StabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a child-list observer on `node` under `label`.
    ///
    /// Tracking the same label again replaces the previous observer.
    pub async fn track<D: PageDriver>(
        &mut self,
        driver: &D,
        node: &D::Node,
        label: &str,
        debounce: Duration,
    ) -> DriverResult<()> {
        driver
            .call_on(node, &scripts::track_stability(label, debounce))
            .await?;

        debug!(label = %label, debounce_ms = debounce.as_millis() as u64, "Tracking subject");
        self.subjects.insert(
            label.to_string(),
            Subject {
                label: label.to_string(),
                debounce,
            },
        );
        Ok(())
    }

    /// Look up a tracked subject.
    pub fn subject(&self, label: &str) -> Option<&Subject> {
        self.subjects.get(label)
    }

    /// Current signal for `label`. False until the first quiet period.
    pub async fn is_stable<D: PageDriver>(&self, driver: &D, label: &str) -> DriverResult<bool> {
        let value = driver.evaluate(&scripts::is_stable(label)).await?;
        Ok(is_truthy(&value))
    }

    /// Block until `label` is stable, bounded by a liveness timeout.
    ///
    /// The liveness timeout is unrelated to the debounce window: it caps how
    /// long the caller is willing to wait for the page to go quiet at all.
    pub async fn wait_until_stable<D: PageDriver>(
        &self,
        driver: &D,
        label: &str,
        liveness: Duration,
        interval: Duration,
    ) -> DriverResult<()> {
        if !self.subjects.contains_key(label) {
            warn!(label = %label, "Waiting on a subject that was never tracked");
        }
        driver
            .poll_condition(
                &format!("{label} to settle"),
                &scripts::is_stable(label),
                liveness,
                interval,
            )
            .await
    }
}
