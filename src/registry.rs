//! Feed-gateway endpoint registry for feedrelay.
//!
//! An ordered list of gateway base URLs (e.g. RSSHub instances),
//! addressed by position. Removal shifts later indices down; Route
//! subscriptions store indices by value and are not migrated, so
//! removing a referenced endpoint surfaces as a fetch error on that
//! subscription's next tick, not as a removal error.

use url::Url;

use crate::storage::StateHandle;
use crate::{RelayError, Result};

/// Registry of feed-gateway base URLs.
#[derive(Clone)]
pub struct EndpointRegistry {
    state: StateHandle,
}

impl EndpointRegistry {
    /// Create a registry over the shared state.
    pub fn new(state: StateHandle) -> Self {
        Self { state }
    }

    /// Append a gateway base URL and return its index.
    ///
    /// The URL must be absolute http(s); a single trailing slash is
    /// stripped. Duplicates are permitted.
    pub async fn add(&self, base_url: &str) -> Result<usize> {
        let normalized = validate_base_url(base_url)?;
        self.state
            .mutate(|s| {
                s.endpoints.push(normalized);
                Ok(s.endpoints.len() - 1)
            })
            .await
    }

    /// List all endpoints with their current indices.
    pub async fn list(&self) -> Vec<(usize, String)> {
        self.state
            .read(|s| s.endpoints.iter().cloned().enumerate().collect())
            .await
    }

    /// Remove the endpoint at `index`, returning its URL.
    ///
    /// Later indices shift down by one; callers must re-list before
    /// acting on another index.
    pub async fn remove(&self, index: usize) -> Result<String> {
        self.state
            .mutate(|s| {
                if index >= s.endpoints.len() {
                    return Err(RelayError::NotFound(format!("endpoint {index}")));
                }
                Ok(s.endpoints.remove(index))
            })
            .await
    }

    /// Get the base URL at `index`.
    pub async fn get(&self, index: usize) -> Result<String> {
        self.state
            .read(|s| {
                s.endpoints
                    .get(index)
                    .cloned()
                    .ok_or_else(|| RelayError::NotFound(format!("endpoint {index}")))
            })
            .await
    }

    /// Number of registered endpoints.
    pub async fn len(&self) -> usize {
        self.state.read(|s| s.endpoints.len()).await
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Validate a gateway base URL: absolute, http(s), with a host.
/// Returns the URL with a single trailing slash stripped.
fn validate_base_url(base_url: &str) -> Result<String> {
    let parsed = Url::parse(base_url)
        .map_err(|e| RelayError::Validation(format!("invalid endpoint URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(RelayError::Validation(format!(
                "unsupported URL scheme: {scheme}"
            )));
        }
    }

    if parsed.host().is_none() {
        return Err(RelayError::Validation("endpoint URL has no host".to_string()));
    }

    Ok(base_url.trim_end_matches('/').to_string())
}
