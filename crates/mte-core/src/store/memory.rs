//! In-memory state store with sliding expiry.

use super::{StateKey, StateStore};
use crate::error::{MteError, Result};
use dashmap::DashMap;
use mte_crypto::SerializedState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

struct Entry {
    blob: SerializedState,
    expires_at: Instant,
}

/// Single-instance store backed by a concurrent map
///
/// Expiry uses `tokio::time::Instant`, so paused-clock tests can advance
/// past the TTL without sleeping.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    entries: Arc<DashMap<StateKey, Entry>>,
}

impl MemoryStateStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a live entry exists for `key`
    #[must_use]
    pub fn contains(&self, key: &StateKey) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }
}

impl StateStore for MemoryStateStore {
    fn put(&self, key: StateKey, blob: SerializedState, ttl: Duration) -> Result<()> {
        debug!(key = ?key, bytes = blob.len(), "state put");
        self.entries.insert(
            key,
            Entry {
                blob,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn take_and_clear(&self, key: &StateKey) -> Result<SerializedState> {
        match self.entries.remove(key) {
            Some((_, entry)) if entry.expires_at > Instant::now() => {
                debug!(key = ?key, "state taken");
                Ok(entry.blob)
            }
            Some(_) => {
                debug!(key = ?key, "state expired");
                Err(MteError::StateNotFound(
                    format!("{} expired", key.role()).into(),
                ))
            }
            None => Err(MteError::StateNotFound(
                format!("no {} state for conversation", key.role()).into(),
            )),
        }
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.expires_at > now)
            .count()
    }
}
