//! Durable state storage for feedrelay.
//!
//! The whole relay state (endpoint registry + subscriptions with their
//! dedup cursors) lives in one JSON document. It is loaded in full at
//! startup and rewritten after every mutating operation, so a crash
//! between operations never loses more than the in-flight tick.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::store::types::PersistedState;
use crate::{RelayError, Result};

/// Shared handle to the persisted relay state.
///
/// Cloning is cheap; all clones see the same state. Reads and mutations
/// take the inner lock only for the in-memory operation plus, for
/// mutations, the file flush - never across a network call.
#[derive(Clone)]
pub struct StateHandle {
    inner: Arc<StateInner>,
}

struct StateInner {
    data: RwLock<PersistedState>,
    path: Option<PathBuf>,
}

impl StateHandle {
    /// Load state from the given JSON file.
    ///
    /// A missing file yields empty state (the file is created on the
    /// first flush). A file that exists but does not deserialize is a
    /// fatal `Storage` error: the caller must refuse to start polling
    /// rather than run against inconsistent records.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let state = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(|e| {
                RelayError::Storage(format!("corrupt state file {}: {e}", path.display()))
            })?
        } else {
            PersistedState::default()
        };

        Ok(Self {
            inner: Arc::new(StateInner {
                data: RwLock::new(state),
                path: Some(path),
            }),
        })
    }

    /// An unbacked handle for tests and embedders that persist elsewhere.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(StateInner {
                data: RwLock::new(PersistedState::default()),
                path: None,
            }),
        }
    }

    /// Read the state through a closure.
    pub async fn read<R>(&self, f: impl FnOnce(&PersistedState) -> R) -> R {
        let data = self.inner.data.read().await;
        f(&data)
    }

    /// Mutate the state through a closure and flush the record to disk.
    ///
    /// The closure must leave the state untouched when it returns an
    /// error; nothing is flushed in that case.
    pub async fn mutate<R>(
        &self,
        f: impl FnOnce(&mut PersistedState) -> Result<R>,
    ) -> Result<R> {
        let mut data = self.inner.data.write().await;
        let result = f(&mut data)?;
        self.flush(&data)?;
        Ok(result)
    }

    fn flush(&self, state: &PersistedState) -> Result<()> {
        let Some(path) = &self.inner.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| RelayError::Storage(format!("state serialization failed: {e}")))?;

        // Write to a sibling temp file, then rename over the old record.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;

        Ok(())
    }
}
