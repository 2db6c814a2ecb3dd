//! Channel pairs held by one endpoint.
//!
//! Every endpoint runs two one-way channels. The client's encoder feeds the
//! server's decoder and the server's encoder feeds the client's decoder; the
//! two flows never share a secret.

use crate::error::Result;
use mte_crypto::{
    ChannelRole, CipherParams, MteDecoder, MteEncoder, SerializedState, SessionCipher,
};

/// Usage of one channel against its budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelUsage {
    /// Channel direction
    pub role: ChannelRole,
    /// Blocks processed
    pub counter: u64,
    /// Blocks allowed before reseed
    pub interval: u64,
}

impl ChannelUsage {
    /// Read usage off a live cipher
    pub fn of<C: SessionCipher>(cipher: &C) -> Self {
        Self {
            role: C::ROLE,
            counter: cipher.reseed_counter(),
            interval: cipher.reseed_interval(),
        }
    }
}

/// Live encoder and decoder of one endpoint
#[derive(Debug)]
pub struct ChannelPair {
    /// Outbound channel
    pub encoder: MteEncoder,
    /// Inbound channel
    pub decoder: MteDecoder,
}

impl ChannelPair {
    /// Snapshot both channels
    ///
    /// # Errors
    ///
    /// Fails if either channel is not instantiated.
    pub fn save(&self) -> Result<SavedChannels> {
        Ok(SavedChannels {
            encoder: self.encoder.save_state()?,
            decoder: self.decoder.save_state()?,
        })
    }

    /// Rebuild both channels from a snapshot
    ///
    /// # Errors
    ///
    /// Returns [`MteError::StateCorrupt`](crate::MteError::StateCorrupt) if
    /// either blob fails to restore.
    pub fn restore(params: CipherParams, saved: &SavedChannels) -> Result<Self> {
        Ok(Self {
            encoder: MteEncoder::from_state(params, &saved.encoder)?,
            decoder: MteDecoder::from_state(params, &saved.decoder)?,
        })
    }

    /// Usage of both channels, encoder first
    pub fn usage(&self) -> [ChannelUsage; 2] {
        [ChannelUsage::of(&self.encoder), ChannelUsage::of(&self.decoder)]
    }
}

/// Serialized form of a [`ChannelPair`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedChannels {
    /// Encoder blob
    pub encoder: SerializedState,
    /// Decoder blob
    pub decoder: SerializedState,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> ChannelPair {
        let mut encoder = MteEncoder::new(CipherParams::default());
        let mut decoder = MteDecoder::new(CipherParams::default());
        encoder.instantiate(b"conv", 7, &[1u8; 32]).unwrap();
        decoder.instantiate(b"conv", 7, &[2u8; 32]).unwrap();
        ChannelPair { encoder, decoder }
    }

    #[test]
    fn test_save_restore_pair() {
        let mut channels = pair();
        channels.encoder.encode(b"advance").unwrap();
        let saved = channels.save().unwrap();

        let restored = ChannelPair::restore(CipherParams::default(), &saved).unwrap();
        assert_eq!(restored.usage(), channels.usage());
        assert_eq!(restored.usage()[0].counter, 1);
        assert_eq!(restored.usage()[1].role, ChannelRole::Decoder);
    }

    #[test]
    fn test_restore_swapped_blobs_fails() {
        let saved = pair().save().unwrap();
        let swapped = SavedChannels {
            encoder: saved.decoder.clone(),
            decoder: saved.encoder.clone(),
        };
        assert!(ChannelPair::restore(CipherParams::default(), &swapped).is_err());
    }
}
