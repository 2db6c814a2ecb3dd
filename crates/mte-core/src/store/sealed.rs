//! Encrypted-at-rest store decorator.

use super::{StateKey, StateStore};
use crate::error::Result;
use mte_crypto::SerializedState;
use mte_crypto::sealed::StateSealer;
use std::sync::Arc;
use std::time::Duration;

/// Seals blobs before they reach the inner store
///
/// The sealing key is bound to the conversation identifier, so a blob copied
/// under another conversation's key fails to open with
/// [`MteError::StateCorrupt`](crate::MteError::StateCorrupt).
#[derive(Clone, Debug)]
pub struct SealedStateStore<S> {
    inner: S,
    sealer: Arc<StateSealer>,
}

impl<S: StateStore> SealedStateStore<S> {
    /// Wrap `inner`, sealing with `sealer`
    pub fn new(inner: S, sealer: StateSealer) -> Self {
        Self {
            inner,
            sealer: Arc::new(sealer),
        }
    }

    /// The wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: StateStore> StateStore for SealedStateStore<S> {
    fn put(&self, key: StateKey, blob: SerializedState, ttl: Duration) -> Result<()> {
        let sealed = self.sealer.seal(key.conversation().as_str(), &blob)?;
        self.inner.put(key, sealed, ttl)
    }

    /// Take and open an entry
    ///
    /// The entry is removed even when it fails to open: state that cannot be
    /// restored is never put back, so the next take reports
    /// [`MteError::StateNotFound`](crate::MteError::StateNotFound) and the
    /// client re-handshakes.
    fn take_and_clear(&self, key: &StateKey) -> Result<SerializedState> {
        let sealed = self.inner.take_and_clear(key)?;
        Ok(self.sealer.open(key.conversation().as_str(), &sealed)?)
    }

    fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MteError;
    use crate::conversation::ConversationId;
    use crate::store::MemoryStateStore;

    const TTL: Duration = Duration::from_secs(600);

    fn sealed_store() -> SealedStateStore<MemoryStateStore> {
        SealedStateStore::new(
            MemoryStateStore::new(),
            StateSealer::new(&[0x7E; 32]).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_roundtrip_and_ciphertext_at_rest() {
        let store = sealed_store();
        let id = ConversationId::new("conv-a").unwrap();
        let blob = SerializedState::from_string("cGxhaW4gc3RhdGU=".into());

        store.put(StateKey::encoder(&id), blob.clone(), TTL).unwrap();

        // Peek at what the inner store holds
        let raw = store.inner().take_and_clear(&StateKey::encoder(&id)).unwrap();
        assert_ne!(raw, blob);
        store.inner().put(StateKey::encoder(&id), raw, TTL).unwrap();

        assert_eq!(store.take_and_clear(&StateKey::encoder(&id)).unwrap(), blob);
    }

    #[tokio::test]
    async fn test_blob_moved_between_conversations_fails() {
        let store = sealed_store();
        let a = ConversationId::new("conv-a").unwrap();
        let b = ConversationId::new("conv-b").unwrap();
        let blob = SerializedState::from_string("c3RhdGU=".into());

        store.put(StateKey::decoder(&a), blob, TTL).unwrap();
        let raw = store.inner().take_and_clear(&StateKey::decoder(&a)).unwrap();
        store.inner().put(StateKey::decoder(&b), raw, TTL).unwrap();

        assert!(matches!(
            store.take_and_clear(&StateKey::decoder(&b)),
            Err(MteError::StateCorrupt(_))
        ));
        // Dropped, so the next use asks for a new handshake
        assert!(matches!(
            store.take_and_clear(&StateKey::decoder(&b)),
            Err(MteError::StateNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let store = sealed_store();
        let id = ConversationId::new("nobody").unwrap();
        assert!(matches!(
            store.take_and_clear(&StateKey::encoder(&id)),
            Err(MteError::StateNotFound(_))
        ));
    }
}
