//! Subscription store for feedrelay.
//!
//! Per-destination ordered subscription lists with embedded dedup
//! cursors, persisted through the shared state handle after every
//! mutation.

pub mod types;

use chrono::{DateTime, Utc};

use crate::cron::CronExpression;
use crate::storage::StateHandle;
use crate::{RelayError, Result};

pub use types::{
    DestinationId, FeedSource, PersistedState, SeenState, Subscription, SubscriptionSummary,
};

/// Store of subscriptions, keyed by destination and list position.
#[derive(Clone)]
pub struct SubscriptionStore {
    state: StateHandle,
}

impl SubscriptionStore {
    /// Create a store over the shared state.
    pub fn new(state: StateHandle) -> Self {
        Self { state }
    }

    /// Add a subscription and return its index within the destination's
    /// list.
    ///
    /// Validates the cron expression and, for Route sources, that the
    /// endpoint index currently exists. Nothing is mutated on a
    /// validation failure.
    pub async fn add(
        &self,
        destination: &str,
        source: FeedSource,
        cron: &str,
    ) -> Result<usize> {
        let cron = CronExpression::parse(cron)?;

        self.state
            .mutate(|s| {
                if let FeedSource::Route { endpoint, .. } = &source {
                    if *endpoint >= s.endpoints.len() {
                        return Err(RelayError::Validation(format!(
                            "endpoint index {endpoint} out of range ({} registered)",
                            s.endpoints.len()
                        )));
                    }
                }

                let subs = s.destinations.entry(destination.to_string()).or_default();
                subs.push(Subscription::new(source.clone(), cron.as_str()));
                Ok(subs.len() - 1)
            })
            .await
    }

    /// List a destination's subscriptions (cursor hidden).
    pub async fn list(&self, destination: &str) -> Vec<SubscriptionSummary> {
        self.state
            .read(|s| {
                s.destinations
                    .get(destination)
                    .map(|subs| {
                        subs.iter()
                            .enumerate()
                            .map(|(index, sub)| SubscriptionSummary {
                                index,
                                source: sub.source.describe(),
                                cron: sub.cron.clone(),
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .await
    }

    /// Get a subscription by destination and index.
    pub async fn get(&self, destination: &str, index: usize) -> Result<Subscription> {
        self.state
            .read(|s| {
                s.destinations
                    .get(destination)
                    .and_then(|subs| subs.get(index))
                    .cloned()
                    .ok_or_else(|| subscription_not_found(destination, index))
            })
            .await
    }

    /// Remove a subscription, returning the removed record.
    ///
    /// Later indices in the same destination shift down by one. The
    /// caller must cancel the associated job before treating the
    /// removal as complete.
    pub async fn remove(&self, destination: &str, index: usize) -> Result<Subscription> {
        self.state
            .mutate(|s| {
                let subs = s
                    .destinations
                    .get_mut(destination)
                    .ok_or_else(|| subscription_not_found(destination, index))?;
                if index >= subs.len() {
                    return Err(subscription_not_found(destination, index));
                }
                let removed = subs.remove(index);
                if subs.is_empty() {
                    s.destinations.remove(destination);
                }
                Ok(removed)
            })
            .await
    }

    /// Number of subscriptions for a destination.
    pub async fn count(&self, destination: &str) -> usize {
        self.state
            .read(|s| s.destinations.get(destination).map_or(0, Vec::len))
            .await
    }

    /// Advance a subscription's dedup cursor.
    ///
    /// Idempotent: a key equal to the stored one, or a timestamp older
    /// than the stored one, leaves the cursor untouched. Called only by
    /// the fetch pipeline after a successful poll; a missing record
    /// (removed while the poll was in flight) is reported as `NotFound`
    /// for the caller to log and discard.
    pub async fn update_cursor(
        &self,
        destination: &str,
        index: usize,
        key: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        // Skip the write entirely when the cursor would not move.
        let unchanged = self
            .state
            .read(|s| {
                s.destinations
                    .get(destination)
                    .and_then(|subs| subs.get(index))
                    .map(|sub| cursor_is_stale(&sub.seen, key, timestamp))
            })
            .await;
        match unchanged {
            None => return Err(subscription_not_found(destination, index)),
            Some(true) => return Ok(()),
            Some(false) => {}
        }

        self.state
            .mutate(|s| {
                let sub = s
                    .destinations
                    .get_mut(destination)
                    .and_then(|subs| subs.get_mut(index))
                    .ok_or_else(|| subscription_not_found(destination, index))?;
                if cursor_is_stale(&sub.seen, key, timestamp) {
                    return Ok(());
                }
                sub.seen.last_item_key = Some(key.to_string());
                if timestamp.is_some() {
                    sub.seen.last_seen_at = timestamp;
                }
                Ok(())
            })
            .await
    }

    /// Snapshot of every persisted subscription as `(destination, index,
    /// cron)` triples, for job restoration at startup.
    pub async fn all_jobs(&self) -> Vec<(DestinationId, usize, String)> {
        self.state
            .read(|s| {
                s.destinations
                    .iter()
                    .flat_map(|(dest, subs)| {
                        subs.iter()
                            .enumerate()
                            .map(move |(index, sub)| (dest.clone(), index, sub.cron.clone()))
                    })
                    .collect()
            })
            .await
    }
}

/// Whether an incoming cursor value would move the cursor backwards or
/// not at all.
fn cursor_is_stale(seen: &SeenState, key: &str, timestamp: Option<DateTime<Utc>>) -> bool {
    if seen.last_item_key.as_deref() == Some(key) {
        return true;
    }
    match (seen.last_seen_at, timestamp) {
        (Some(current), Some(incoming)) => incoming < current,
        _ => false,
    }
}

fn subscription_not_found(destination: &str, index: usize) -> RelayError {
    RelayError::NotFound(format!("subscription {index} for {destination}"))
}
