//! Conversation identifiers.

use crate::error::{MteError, Result};
use mte_crypto::random::random_16;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest accepted conversation identifier, in bytes.
pub const MAX_CONVERSATION_ID_LEN: usize = 128;

/// Client-chosen identifier of one paired set of channels.
///
/// Doubles as the cipher personalization string, so it must be stable across
/// the reseeds of one conversation.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId(String);

impl ConversationId {
    /// Validate and wrap an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`MteError::Validation`] if the identifier is empty, longer than
    /// [`MAX_CONVERSATION_ID_LEN`] bytes, or contains control characters.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(MteError::validation("conversation identifier is empty"));
        }
        if id.len() > MAX_CONVERSATION_ID_LEN {
            return Err(MteError::Validation(
                format!(
                    "conversation identifier is {} bytes, limit is {MAX_CONVERSATION_ID_LEN}",
                    id.len()
                )
                .into(),
            ));
        }
        if id.chars().any(char::is_control) {
            return Err(MteError::validation(
                "conversation identifier contains control characters",
            ));
        }
        Ok(Self(id))
    }

    /// Generate a random identifier (hex of 16 random bytes).
    ///
    /// # Errors
    ///
    /// Returns [`MteError::Instantiate`] if the OS CSPRNG fails; that is how
    /// [`CryptoError::RandomFailed`](mte_crypto::CryptoError::RandomFailed)
    /// converts into [`MteError`].
    pub fn generate() -> Result<Self> {
        Ok(Self(hex::encode(random_16()?)))
    }

    /// Borrow the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Personalization bytes for cipher instantiation.
    #[must_use]
    pub fn personalization(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Truncated form for logs.
    #[must_use]
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl TryFrom<String> for ConversationId {
    type Error = MteError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ConversationId> for String {
    fn from(id: ConversationId) -> Self {
        id.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConversationId({}..)", self.short())
    }
}
