//! Turns one rendered record node into a [`Record`].
//!
//! Extraction is a straight mapping with no retries. The only way a node is
//! rejected outright is when it has no album link to derive an identifier
//! from; a missing location or an unparsable image just narrows the record.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;
use url::Url;

use crate::config::{HarvestConfig, Selectors};
use crate::error::{ExtractError, ExtractResult, HarvestError, Result};
use crate::scripts;
use crate::traits::driver::PageDriver;
use crate::types::record::{Attachment, Record};

/// Prefixes carried by the two album link shapes (post galleries and group media).
pub const ID_PREFIXES: [&str; 2] = ["pcb.", "gm."];

/// Query parameter of the album link that holds the identifier.
pub const ID_PARAM: &str = "set";

lazy_static! {
    // A location-introducing token, then filler, then the place itself.
    static ref LOCATION_PATTERN: Regex = Regex::new(r"(?i)\bloc\w*\W+(\w[\w ,]*)").unwrap();
}

/// Strip the album prefixes from a raw `set` value.
///
/// Applying this to its own output changes nothing.
pub fn derive_identifier(raw: &str) -> &str {
    let mut id = raw;
    while let Some(rest) = ID_PREFIXES.iter().find_map(|prefix| id.strip_prefix(prefix)) {
        id = rest;
    }
    id
}

/// First location mentioned in `content`, or an empty string.
///
/// Only attempted when the body mentions "loc" at all; lines are tried in
/// order and the first match wins.
pub fn derive_location(content: &str) -> String {
    if !content.to_lowercase().contains("loc") {
        return String::new();
    }

    content
        .lines()
        .find_map(|line| {
            LOCATION_PATTERN
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
        })
        .unwrap_or_default()
}

/// Display name of an image: the final path segment of its source URL.
pub fn attachment_name(src: &str) -> Option<String> {
    let url = Url::parse(src).ok()?;
    let name = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    if name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

/// Derive a record identifier from an album link.
pub fn identifier_from_link(href: &str, base: &Url) -> ExtractResult<String> {
    let url = Url::options()
        .base_url(Some(base))
        .parse(href)
        .map_err(|source| ExtractError::InvalidLink {
            href: href.to_string(),
            source,
        })?;

    let raw = url
        .query_pairs()
        .find(|(key, _)| key == ID_PARAM)
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default();

    let id = derive_identifier(&raw);
    if id.is_empty() {
        return Err(ExtractError::MissingIdentifier {
            href: href.to_string(),
        });
    }
    Ok(id.to_string())
}

/// Extracts records from record nodes.
pub struct RecordExtractor {
    selectors: Selectors,
    base: Url,
}

impl RecordExtractor {
    /// Create an extractor; relative links resolve against `base`.
    pub fn new(selectors: Selectors, base: Url) -> Self {
        Self { selectors, base }
    }

    /// Create an extractor for a run.
    pub fn from_config(config: &HarvestConfig) -> Result<Self> {
        let base = Url::parse(&config.feed_url()).map_err(|e| {
            HarvestError::Config(format!("invalid endpoint {}: {}", config.endpoint, e))
        })?;
        Ok(Self::new(config.selectors.clone(), base))
    }

    /// Extract one record.
    pub async fn extract<D: PageDriver>(&self, driver: &D, node: &D::Node) -> ExtractResult<Record> {
        let content = driver
            .call_on(node, &scripts::extract_text(&self.selectors.message))
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string();

        let links = driver.query_all(&self.selectors.album_link, Some(node)).await?;
        let link = links.first().ok_or(ExtractError::MissingLinkNode)?;
        let href = driver
            .attribute(link, "href")
            .await?
            .ok_or(ExtractError::MissingLinkNode)?;
        let id = identifier_from_link(&href, &self.base)?;

        let media = driver.query_all(&self.selectors.media, Some(node)).await?;
        let mut attachments = Vec::with_capacity(media.len());
        for element in &media {
            let Some(src) = driver.attribute(element, "src").await? else {
                continue;
            };
            match attachment_name(&src) {
                Some(name) => attachments.push(Attachment::new(name, src)),
                None => debug!(record = %id, src = %src, "Skipping unparsable image source"),
            }
        }

        let location = derive_location(&content);
        Ok(Record::new(id, content)
            .with_location(location)
            .with_attachments(attachments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDriver, FakeNode, FakePost};
    use std::time::Duration;

    fn base() -> Url {
        Url::parse("https://www.facebook.com/groups/1/").unwrap()
    }

    async fn render(driver: &FakeDriver) -> Vec<FakeNode> {
        driver
            .wait_for_nodes(
                &Selectors::default().record,
                Some(&FakeNode::Feed),
                Duration::from_secs(5),
                Duration::from_millis(100),
            )
            .await
            .unwrap()
    }

    #[test]
    fn test_derive_identifier_strips_either_prefix() {
        assert_eq!(derive_identifier("pcb.1234"), "1234");
        assert_eq!(derive_identifier("gm.5678"), "5678");
        assert_eq!(derive_identifier("a.999"), "a.999");
    }

    #[test]
    fn test_derive_identifier_is_idempotent() {
        for raw in ["pcb.1234", "gm.5678", "a.999", "pcb.gm.42", "gm.pcb.42", ""] {
            let once = derive_identifier(raw);
            assert_eq!(derive_identifier(once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_derive_location_takes_first_matching_line() {
        let body = "Great snake!\nLocation: Quezon City, PH\nMore text";
        assert_eq!(derive_location(body), "Quezon City, PH");

        let two = "Loc - Davao\nLocation: Cebu";
        assert_eq!(derive_location(two), "Davao");
    }

    #[test]
    fn test_derive_location_requires_loc_substring() {
        assert_eq!(derive_location("Great snake!\nFound in Manila"), "");
        assert_eq!(derive_location(""), "");
    }

    #[test]
    fn test_derive_location_without_match_is_empty() {
        assert_eq!(derive_location("loc"), "");
    }

    #[test]
    fn test_attachment_name_is_final_path_segment() {
        assert_eq!(
            attachment_name("https://cdn.example/fna.fbcdn.net/a/b/photo123.jpg?x=1"),
            Some("photo123.jpg".to_string())
        );
        assert_eq!(
            attachment_name("https://cdn.example/a/b/"),
            Some("b".to_string())
        );
        assert_eq!(attachment_name("not a url"), None);
        assert_eq!(attachment_name("https://cdn.example/"), None);
    }

    #[test]
    fn test_identifier_from_link() {
        let id = identifier_from_link(
            "https://www.facebook.com/photo/?fbid=77&set=gm.900&idorvanity=1",
            &base(),
        )
        .unwrap();
        assert_eq!(id, "900");

        let relative = identifier_from_link("/photo/?set=pcb.55", &base()).unwrap();
        assert_eq!(relative, "55");
    }

    #[test]
    fn test_identifier_from_link_without_set_is_rejected() {
        let err = identifier_from_link("https://www.facebook.com/photo/?fbid=77", &base())
            .unwrap_err();
        assert!(matches!(err, ExtractError::MissingIdentifier { .. }));
    }

    #[tokio::test]
    async fn test_extract_full_record() {
        let driver = FakeDriver::new().with_batch(vec![FakePost::album(
            "314",
            "Great snake!\nLocation: Quezon City, PH\nMore text",
            &["one.jpg", "two.jpg"],
        )]);
        let nodes = render(&driver).await;
        let extractor = RecordExtractor::new(Selectors::default(), base());

        let record = extractor.extract(&driver, &nodes[0]).await.unwrap();

        assert_eq!(record.id, "314");
        assert_eq!(record.location.as_deref(), Some("Quezon City, PH"));
        assert_eq!(
            record
                .attachments
                .iter()
                .map(|a| a.name.as_str())
                .collect::<Vec<_>>(),
            vec!["one.jpg", "two.jpg"]
        );
    }

    #[tokio::test]
    async fn test_extract_without_link_is_rejected() {
        let driver = FakeDriver::new().with_batch(vec![FakePost::new("no album here")
            .with_image("https://scontent.fna.fbcdn.net/x.jpg")]);
        let nodes = render(&driver).await;
        let extractor = RecordExtractor::new(Selectors::default(), base());

        let err = extractor.extract(&driver, &nodes[0]).await.unwrap_err();
        assert!(matches!(err, ExtractError::MissingLinkNode));
    }

    #[tokio::test]
    async fn test_extract_skips_unparsable_images() {
        let driver = FakeDriver::new().with_batch(vec![FakePost::album("1", "text", &["ok.jpg"])
            .with_image("::garbage::")]);
        let nodes = render(&driver).await;
        let extractor = RecordExtractor::new(Selectors::default(), base());

        let record = extractor.extract(&driver, &nodes[0]).await.unwrap();
        assert_eq!(record.attachments.len(), 1);
        assert_eq!(record.attachments[0].name, "ok.jpg");
        assert_eq!(record.location, None);
    }

    #[tokio::test]
    async fn test_extract_record_without_images_is_valid() {
        let driver = FakeDriver::new().with_batch(vec![FakePost::album("8", "just words", &[])]);
        let nodes = render(&driver).await;
        let extractor = RecordExtractor::new(Selectors::default(), base());

        let record = extractor.extract(&driver, &nodes[0]).await.unwrap();
        assert_eq!(record.id, "8");
        assert!(record.attachments.is_empty());
    }
}
