//! Harvested records and their image attachments.

use serde::{Deserialize, Serialize};

/// An image attached to a record.
///
/// `name` is the final path segment of the source URL. It is both the file
/// name the image is downloaded to and the value joined against the record
/// in the attachments table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}

impl Attachment {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// One post harvested from the feed.
///
/// Built once by the extractor and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Identifier derived from the post's album link; never empty
    pub id: String,

    /// Location mentioned in the body, if one could be matched
    pub location: Option<String>,

    /// Raw body text, one text node per line
    pub content: String,

    /// Images in document order
    pub attachments: Vec<Attachment>,
}

impl Record {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location: None,
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    /// Set the location; blank values are treated as absent.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        let location = location.into();
        self.location = if location.trim().is_empty() {
            None
        } else {
            Some(location)
        };
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Location as written to the records table.
    pub fn location_or_empty(&self) -> &str {
        self.location.as_deref().unwrap_or("")
    }

    /// Body with double quotes swapped for single quotes.
    ///
    /// Lossy on purpose: the records table never contains a `"` in content.
    pub fn normalized_content(&self) -> String {
        self.content.replace('"', "'")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_location_is_absent() {
        let record = Record::new("1", "body").with_location("   ");
        assert_eq!(record.location, None);
        assert_eq!(record.location_or_empty(), "");
    }

    #[test]
    fn test_normalized_content_replaces_double_quotes() {
        let record = Record::new("1", r#"he said "hi" twice"#);
        assert_eq!(record.normalized_content(), "he said 'hi' twice");
    }
}
