//! Fetch pipeline for feedrelay.
//!
//! One poll = resolve the subscription's source to a URL, fetch and
//! parse the feed, filter against the dedup cursor, cap the result,
//! advance the cursor, return items oldest-first. Any failure abandons
//! the tick with no cursor movement and no partial delivery.

use crate::feed::{FeedFetcher, ParsedItem};
use crate::registry::EndpointRegistry;
use crate::store::{FeedSource, SubscriptionStore};
use crate::Result;

/// An item ready for transform and delivery, tagged with its channel
/// title.
#[derive(Debug, Clone)]
pub struct PolledItem {
    /// Feed channel title.
    pub channel: String,
    /// The parsed item.
    pub item: ParsedItem,
}

/// The per-tick fetch/dedup pipeline.
#[derive(Clone)]
pub struct FetchPipeline {
    registry: EndpointRegistry,
    store: SubscriptionStore,
    fetcher: FeedFetcher,
    max_items_per_poll: i64,
}

impl FetchPipeline {
    /// Create a pipeline. `max_items_per_poll` caps the number of items
    /// delivered per tick; negative means unbounded.
    pub fn new(
        registry: EndpointRegistry,
        store: SubscriptionStore,
        fetcher: FeedFetcher,
        max_items_per_poll: i64,
    ) -> Self {
        Self {
            registry,
            store,
            fetcher,
            max_items_per_poll,
        }
    }

    /// Resolve a feed source to a concrete URL.
    ///
    /// Route sources look the endpoint up at poll time, so an endpoint
    /// removed after subscription creation surfaces here as `NotFound`.
    pub async fn resolve_url(&self, source: &FeedSource) -> Result<String> {
        match source {
            FeedSource::Route { endpoint, route } => {
                let base = self.registry.get(*endpoint).await?;
                Ok(join_route(&base, route))
            }
            FeedSource::Direct { url } => Ok(url.clone()),
        }
    }

    /// Run one cursor-aware poll for a subscription.
    ///
    /// Returns the newly-seen items oldest-first. The cursor is
    /// advanced to the newest observed item even when zero items are
    /// returned (fresh subscriptions seed the cursor without emitting a
    /// backlog).
    pub async fn poll(&self, destination: &str, index: usize) -> Result<Vec<PolledItem>> {
        let sub = self.store.get(destination, index).await?;
        let url = self.resolve_url(&sub.source).await?;
        let feed = self.fetcher.fetch(&url).await?;

        let Some(newest) = feed.items.first() else {
            return Ok(Vec::new());
        };
        let newest_key = newest.key();
        let newest_at = newest.published_at;

        let fresh = sub.seen.is_fresh();
        let new_items: Vec<ParsedItem> = if fresh {
            Vec::new()
        } else {
            take_new(&feed.items, sub.seen.last_item_key.as_deref(), self.max_items_per_poll)
        };

        self.store
            .update_cursor(destination, index, &newest_key, newest_at)
            .await?;

        // Reverse the newest-first enumeration so delivery order matches
        // publication order.
        Ok(new_items
            .into_iter()
            .rev()
            .map(|item| PolledItem {
                channel: feed.title.clone(),
                item,
            })
            .collect())
    }

    /// One-shot poll of the newest item, bypassing the dedup cursor
    /// entirely (neither consulted nor advanced).
    pub async fn peek_latest(&self, destination: &str, index: usize) -> Result<Option<PolledItem>> {
        let sub = self.store.get(destination, index).await?;
        let url = self.resolve_url(&sub.source).await?;
        let feed = self.fetcher.fetch(&url).await?;

        Ok(feed.items.into_iter().next().map(|item| PolledItem {
            channel: feed.title,
            item,
        }))
    }
}

/// Collect items newer than `last_key` from a newest-first enumeration.
///
/// Enumeration stops at the first item whose key equals `last_key` or
/// at the cap, whichever comes first.
fn take_new(items: &[ParsedItem], last_key: Option<&str>, cap: i64) -> Vec<ParsedItem> {
    let mut new_items = Vec::new();
    for item in items {
        if last_key == Some(item.key().as_str()) {
            break;
        }
        if cap >= 0 && new_items.len() as i64 >= cap {
            break;
        }
        new_items.push(item.clone());
    }
    new_items
}

/// Join a gateway base URL and a route path with exactly one slash.
fn join_route(base: &str, route: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        route.trim_start_matches('/')
    )
}
