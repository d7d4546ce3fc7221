//! Subscription store types for feedrelay.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque host-platform session identifier a subscription delivers to
/// (e.g. `platform:group:12345`).
pub type DestinationId = String;

/// Where a subscription's feed comes from: a route on a registered
/// feed-gateway endpoint, or a direct feed URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedSource {
    /// A gateway endpoint (by registry index) plus a route path.
    Route {
        /// Index into the endpoint registry.
        endpoint: usize,
        /// Route path, starting with `/`.
        route: String,
    },
    /// A complete feed URL used verbatim.
    Direct {
        /// The feed URL.
        url: String,
    },
}

impl FeedSource {
    /// Human-readable descriptor for listings.
    pub fn describe(&self) -> String {
        match self {
            FeedSource::Route { endpoint, route } => format!("endpoint {endpoint} {route}"),
            FeedSource::Direct { url } => url.clone(),
        }
    }
}

/// Dedup cursor marking the newest item already seen for a subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenState {
    /// Key of the newest item observed (guid, link, or content hash).
    #[serde(default)]
    pub last_item_key: Option<String>,
    /// Publish timestamp of that item, when the feed provided one.
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl SeenState {
    /// A subscription that has never completed a poll.
    pub fn is_fresh(&self) -> bool {
        self.last_item_key.is_none()
    }
}

/// A single feed subscription owned by one destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Feed source (gateway route or direct URL).
    pub source: FeedSource,
    /// Five-field cron expression, validated at creation.
    pub cron: String,
    /// Dedup cursor, advanced by the fetch pipeline.
    #[serde(default)]
    pub seen: SeenState,
}

impl Subscription {
    /// Create a subscription with a fresh cursor.
    pub fn new(source: FeedSource, cron: impl Into<String>) -> Self {
        Self {
            source,
            cron: cron.into(),
            seen: SeenState::default(),
        }
    }
}

/// Listing view of a subscription (cursor hidden).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSummary {
    /// Position within the destination's list (valid for this snapshot).
    pub index: usize,
    /// Source descriptor.
    pub source: String,
    /// Cron expression string.
    pub cron: String,
}

/// The single durable record: endpoint registry plus per-destination
/// subscription lists. Loaded in full at startup, rewritten after each
/// mutating operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    /// Gateway endpoint base URLs, addressed by position.
    #[serde(default)]
    pub endpoints: Vec<String>,
    /// Subscriptions per destination, in insertion order.
    #[serde(default)]
    pub destinations: BTreeMap<DestinationId, Vec<Subscription>>,
}
