//! Symmetric chain ratcheting.
//!
//! Every cipher block draws a fresh one-time key from the channel's chain key,
//! so two parties holding the same chain key stay in lockstep only while they
//! consume blocks in the same order.

use zeroize::Zeroize;

/// Chain key for symmetric ratcheting
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct ChainKey([u8; 32]);

impl ChainKey {
    /// Create from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw chain key bytes, for state serialization only
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Ratchet forward and derive a block key
    pub fn ratchet(&mut self) -> BlockKey {
        let old_key = self.0;

        // chain_key[n+1] = BLAKE3(chain_key[n] || 0x01)
        let mut hasher = blake3::Hasher::new();
        hasher.update(&old_key);
        hasher.update(&[0x01]);
        self.0.copy_from_slice(&hasher.finalize().as_bytes()[..32]);

        // block_key[n] = BLAKE3(chain_key[n] || 0x02)
        let mut hasher = blake3::Hasher::new();
        hasher.update(&old_key);
        hasher.update(&[0x02]);
        let mut block_key = [0u8; 32];
        block_key.copy_from_slice(&hasher.finalize().as_bytes()[..32]);

        BlockKey(block_key)
    }
}

/// One-time block key derived from a chain key
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct BlockKey([u8; 32]);

impl BlockKey {
    /// Get the raw key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}
