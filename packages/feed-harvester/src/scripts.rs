//! JavaScript evaluated inside the hosted page.
//!
//! Expressions are passed to [`PageDriver::evaluate`]; function declarations
//! are passed to [`PageDriver::call_on`] and run with `this` bound to a node.
//! Arguments are inlined as JSON literals since function calls carry none.
//!
//! [`PageDriver::evaluate`]: crate::traits::driver::PageDriver::evaluate
//! [`PageDriver::call_on`]: crate::traits::driver::PageDriver::call_on

use std::time::Duration;

const TRACK_STABILITY: &str = include_str!("scripts/track_stability.js");
const EXTRACT_TEXT: &str = include_str!("scripts/extract_text.js");

/// Scroll to the bottom of the document, arming the next page of content.
pub const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight);";

/// Attribute set on record nodes once they have been processed.
pub const HARVESTED_ATTR: &str = "data-harvested";

/// Tag `this` as processed so later record queries skip it.
pub const MARK_HARVESTED: &str =
    r#"function () { this.setAttribute("data-harvested", ""); return true; }"#;

/// Remove the leading non-content child of the feed, if any.
pub const REMOVE_LEADING_BUFFER: &str = r#"function () {
  const first = this.querySelector(":scope > div:first-child");
  if (!first) return false;
  first.remove();
  return true;
}"#;

fn literal(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Install (or reinstall) the mutation observer for `label` on `this`.
pub fn track_stability(label: &str, debounce: Duration) -> String {
    format!(
        "function () {{ return ({}).call(this, {}, {}); }}",
        TRACK_STABILITY.trim(),
        literal(label),
        debounce.as_millis()
    )
}

/// Read the stability signal for `label`; false until first observed.
pub fn is_stable(label: &str) -> String {
    format!(
        "!!(window.__harvestStability && window.__harvestStability.signals[{}] === true)",
        literal(label)
    )
}

/// Collect every text node under `this` (narrowed by `refine`), one per line.
pub fn extract_text(refine: &str) -> String {
    format!(
        "function () {{ return ({}).call(this, {}); }}",
        EXTRACT_TEXT.trim(),
        literal(refine)
    )
}

/// Click every element matching `selector`; evaluates to the click count.
pub fn click_all(selector: &str) -> String {
    format!(
        "(() => {{ const nodes = document.querySelectorAll({}); nodes.forEach((n) => n.click()); return nodes.length; }})()",
        literal(selector)
    )
}

/// Narrow a record selector to nodes not yet tagged by [`MARK_HARVESTED`].
pub fn unharvested(selector: &str) -> String {
    format!("{selector}:not([{HARVESTED_ATTR}])")
}

/// Remove every direct child of `this` except the last `window`; evaluates
/// to the number removed.
pub fn evict_all_but(window: usize) -> String {
    format!(
        "function () {{ const doomed = this.querySelectorAll(\":scope > :nth-last-child(n+{})\"); doomed.forEach((n) => n.remove()); return doomed.length; }}",
        window + 1
    )
}

/// Whether the first element matching `selector` is rendered and visible.
pub fn is_visible(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); if (!el) return false; const r = el.getBoundingClientRect(); return r.width > 0 && r.height > 0 && getComputedStyle(el).visibility !== 'hidden'; }})()",
        literal(selector)
    )
}
