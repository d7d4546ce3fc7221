//! Feed fetching and parsing for feedrelay.
//!
//! Retrieves syndication documents over HTTP with bounded timeouts and
//! size limits, then normalizes them through feed-rs into [`ParsedFeed`].

use std::time::Duration;

use feed_rs::parser;
use reqwest::Client;
use url::Url;

use crate::config::FetchConfig;
use crate::feed::html::{extract_image_urls, strip_html};
use crate::feed::types::{ParsedFeed, ParsedItem};
use crate::{RelayError, Result};

/// User agent string for feed fetching.
const USER_AGENT: &str = "feedrelay/0.1 (RSS Relay)";

/// Feed fetcher with a reused HTTP client.
#[derive(Clone)]
pub struct FeedFetcher {
    client: Client,
    max_feed_size: u64,
}

impl FeedFetcher {
    /// Create a fetcher from the fetch configuration.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .timeout(Duration::from_secs(config.total_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RelayError::Fetch(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_feed_size: config.max_feed_size_bytes,
        })
    }

    /// Fetch and parse the feed at `url`.
    ///
    /// # Errors
    ///
    /// `RelayError::Fetch` for network failures, non-success statuses
    /// and oversized payloads; `RelayError::Parse` for payloads feed-rs
    /// cannot parse.
    pub async fn fetch(&self, url: &str) -> Result<ParsedFeed> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RelayError::Fetch(format!("request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(RelayError::Fetch(format!(
                "HTTP error from {url}: {}",
                response.status()
            )));
        }

        if let Some(content_length) = response.content_length() {
            if content_length > self.max_feed_size {
                return Err(RelayError::Fetch(format!(
                    "feed too large: {content_length} bytes (max {} bytes)",
                    self.max_feed_size
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RelayError::Fetch(format!("failed to read response from {url}: {e}")))?;

        if bytes.len() as u64 > self.max_feed_size {
            return Err(RelayError::Fetch(format!(
                "feed too large: {} bytes (max {} bytes)",
                bytes.len(),
                self.max_feed_size
            )));
        }

        parse_feed(&bytes, url)
    }
}

/// Parse feed bytes into a [`ParsedFeed`].
///
/// feed-rs normalizes RSS and Atom into one model; items come out in
/// document order, which syndication feeds keep newest-first.
pub fn parse_feed(bytes: &[u8], feed_url: &str) -> Result<ParsedFeed> {
    let feed = parser::parse(bytes)
        .map_err(|e| RelayError::Parse(format!("failed to parse feed from {feed_url}: {e}")))?;

    let title = feed
        .title
        .map(|t| t.content)
        .unwrap_or_else(|| "Untitled Feed".to_string());

    let description = feed.description.map(|d| strip_html(&d.content));

    let base = Url::parse(feed_url).ok();

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let guid = if entry.id.is_empty() {
                None
            } else {
                Some(entry.id)
            };
            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string());
            let link = entry
                .links
                .first()
                .map(|l| absolutize(&l.href, base.as_ref()));

            let content_html = entry
                .content
                .and_then(|c| c.body)
                .or(entry.summary.map(|t| t.content));
            let description = content_html
                .as_deref()
                .map(strip_html)
                .filter(|d| !d.is_empty());
            let images = content_html
                .as_deref()
                .map(extract_image_urls)
                .unwrap_or_default();

            let author = entry
                .authors
                .first()
                .map(|a| a.name.clone())
                .filter(|n| !n.is_empty());
            let categories = entry
                .categories
                .into_iter()
                .map(|c| c.label.unwrap_or(c.term))
                .filter(|c| !c.is_empty())
                .collect();
            let published_at = entry.published.or(entry.updated);

            ParsedItem {
                guid,
                title,
                link,
                description,
                author,
                categories,
                images,
                published_at,
            }
        })
        .collect();

    Ok(ParsedFeed {
        title,
        description,
        items,
    })
}

/// Absolutize a possibly-relative item link against the feed URL.
fn absolutize(link: &str, base: Option<&Url>) -> String {
    if link.starts_with("http://") || link.starts_with("https://") {
        return link.to_string();
    }
    match base.and_then(|b| b.join(link).ok()) {
        Some(joined) => joined.to_string(),
        None => link.to_string(),
    }
}
