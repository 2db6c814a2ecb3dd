//! Session state storage.
//!
//! Channel state lives only in the store between requests. Every use is
//! **take → restore → use → save → put**: taking removes the entry, so a
//! second concurrent request for the same channel finds nothing instead of
//! reusing already-consumed state.
//!
//! The trait is synchronous; implementations share their state via `Arc`, so
//! clones see the same entries.

mod memory;
mod sealed;

pub use memory::MemoryStateStore;
pub use sealed::SealedStateStore;

use crate::conversation::ConversationId;
use crate::error::Result;
use mte_crypto::{ChannelRole, SerializedState};
use std::fmt;
use std::time::Duration;

/// Cache key of one server channel: `E-{conversation}` or `D-{conversation}`
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    role: ChannelRole,
    conversation: ConversationId,
}

impl StateKey {
    /// Key of a server channel
    #[must_use]
    pub fn new(role: ChannelRole, conversation: ConversationId) -> Self {
        Self { role, conversation }
    }

    /// Key of the server encoder
    #[must_use]
    pub fn encoder(conversation: &ConversationId) -> Self {
        Self::new(ChannelRole::Encoder, conversation.clone())
    }

    /// Key of the server decoder
    #[must_use]
    pub fn decoder(conversation: &ConversationId) -> Self {
        Self::new(ChannelRole::Decoder, conversation.clone())
    }

    /// Channel role
    #[must_use]
    pub fn role(&self) -> ChannelRole {
        self.role
    }

    /// Owning conversation
    #[must_use]
    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    fn prefix(&self) -> char {
        match self.role {
            ChannelRole::Encoder => 'E',
            ChannelRole::Decoder => 'D',
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.prefix(), self.conversation)
    }
}

impl fmt::Debug for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateKey({}-{}..)", self.prefix(), self.conversation.short())
    }
}

/// Key-value store for serialized channel state
///
/// Must be Clone (shared by every request handler) and Send + Sync.
pub trait StateStore: Clone + Send + Sync + 'static {
    /// Store a blob, replacing any existing entry and restarting its
    /// sliding lifetime
    ///
    /// # Errors
    ///
    /// Implementation specific (sealing, backend failures).
    fn put(&self, key: StateKey, blob: SerializedState, ttl: Duration) -> Result<()>;

    /// Atomically read and delete an entry
    ///
    /// # Errors
    ///
    /// Returns [`MteError::StateNotFound`](crate::MteError::StateNotFound) if
    /// the entry is missing or has expired.
    fn take_and_clear(&self, key: &StateKey) -> Result<SerializedState>;

    /// Evict expired entries, returning how many were removed
    fn purge_expired(&self) -> usize;

    /// Number of live entries
    fn len(&self) -> usize;

    /// True if no live entries remain
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let id = ConversationId::new("abc").unwrap();
        assert_eq!(StateKey::encoder(&id).to_string(), "E-abc");
        assert_eq!(StateKey::decoder(&id).to_string(), "D-abc");
        assert_ne!(StateKey::encoder(&id), StateKey::decoder(&id));
    }

    #[test]
    fn test_keys_of_distinct_conversations_differ() {
        let a = ConversationId::new("A").unwrap();
        let b = ConversationId::new("B").unwrap();
        assert_ne!(StateKey::encoder(&a), StateKey::encoder(&b));
        assert_eq!(StateKey::encoder(&a).conversation(), &a);
    }
}
