//! Parsed feed types for feedrelay.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// A fetched and parsed syndication feed.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    /// Channel title.
    pub title: String,
    /// Channel description.
    pub description: Option<String>,
    /// Items in feed order (assumed newest first).
    pub items: Vec<ParsedItem>,
}

/// A single feed item.
#[derive(Debug, Clone)]
pub struct ParsedItem {
    /// Stable identifier from the feed (RSS guid / Atom id), if any.
    pub guid: Option<String>,
    /// Item title.
    pub title: String,
    /// Link to the original article, absolutized against the feed URL.
    pub link: Option<String>,
    /// Plain-text description (HTML stripped, untruncated).
    pub description: Option<String>,
    /// Author name.
    pub author: Option<String>,
    /// Category labels.
    pub categories: Vec<String>,
    /// Image URLs extracted from the item content HTML.
    pub images: Vec<String>,
    /// Publish timestamp.
    pub published_at: Option<DateTime<Utc>>,
}

impl ParsedItem {
    /// Dedup key for this item: the feed's stable identifier, falling
    /// back to the link, falling back to a hash of title and publish
    /// date.
    pub fn key(&self) -> String {
        if let Some(guid) = self.guid.as_deref().filter(|g| !g.is_empty()) {
            return guid.to_string();
        }
        if let Some(link) = self.link.as_deref().filter(|l| !l.is_empty()) {
            return link.to_string();
        }

        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        hasher.update(b"\n");
        if let Some(ts) = self.published_at {
            hasher.update(ts.to_rfc3339().as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}
