//! Stateful channel cipher.
//!
//! A channel is one directional keyed pipe. The client's encoder and the
//! server's decoder for the same flow are instantiated from identical
//! `(personalization, nonce, entropy)` and stay in lock-step as long as every
//! encode on one side is matched by exactly one decode on the other.
//!
//! ## Lifecycle
//!
//! ```text
//! new ──► instantiate ──► encode/decode* ──► save_state ──► (drop)
//!  │                                              ▲
//!  └──────► restore_state ────────────────────────┘
//! ```
//!
//! A saved blob is a snapshot of a sequential state machine. Restoring it
//! twice and using both copies forks the channel; callers must treat
//! restore, use and save as one serialized step per channel.
//!
//! ## Usage
//!
//! ```
//! use mte_crypto::{CipherParams, MteDecoder, MteEncoder, SessionCipher};
//!
//! let entropy = [7u8; 32];
//! let mut enc = MteEncoder::new(CipherParams::default());
//! let mut dec = MteDecoder::new(CipherParams::default());
//! enc.instantiate(b"conversation-1", 42, &entropy).unwrap();
//! dec.instantiate(b"conversation-1", 42, &entropy).unwrap();
//!
//! let wire = enc.encode(b"hello").unwrap();
//! assert_eq!(dec.decode(&wire).unwrap(), b"hello");
//! ```

mod state;
mod stream;

pub use stream::{
    BLOCK_SIZE, DecryptStream, ENCODED_BLOCK_SIZE, EncryptStream, block_count, decoded_len,
    encoded_len,
};

use crate::CryptoError;
use serde::{Deserialize, Serialize};
use state::ChannelState;
use std::fmt;

/// Default reseed interval, in cipher blocks.
pub const DEFAULT_RESEED_INTERVAL: u64 = 1 << 20;

/// Default minimum entropy length, in bytes.
pub const DEFAULT_MIN_ENTROPY_LEN: usize = 32;

/// Direction of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelRole {
    /// Outbound: turns cleartext into encoded bytes
    Encoder,
    /// Inbound: turns encoded bytes into cleartext
    Decoder,
}

impl ChannelRole {
    /// The role of the matching channel on the peer.
    #[must_use]
    pub fn peer(self) -> Self {
        match self {
            ChannelRole::Encoder => ChannelRole::Decoder,
            ChannelRole::Decoder => ChannelRole::Encoder,
        }
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRole::Encoder => write!(f, "encoder"),
            ChannelRole::Decoder => write!(f, "decoder"),
        }
    }
}

/// Cipher-defined constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CipherParams {
    /// Blocks a channel may process before it must be replaced
    pub reseed_interval: u64,
    /// Minimum entropy accepted by `instantiate`
    pub min_entropy_len: usize,
}

impl Default for CipherParams {
    fn default() -> Self {
        Self {
            reseed_interval: DEFAULT_RESEED_INTERVAL,
            min_entropy_len: DEFAULT_MIN_ENTROPY_LEN,
        }
    }
}

impl CipherParams {
    /// Check the parameters are usable.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidParameter`] for a zero interval or a zero
    /// minimum entropy length.
    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.reseed_interval == 0 {
            return Err(CryptoError::InvalidParameter(
                "reseed_interval must be non-zero".into(),
            ));
        }
        if self.min_entropy_len == 0 {
            return Err(CryptoError::InvalidParameter(
                "min_entropy_len must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Opaque, base64 text snapshot of a channel.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerializedState(String);

impl SerializedState {
    /// Wrap blob text received from storage or the wire.
    #[must_use]
    pub fn from_string(blob: String) -> Self {
        Self(blob)
    }

    /// Borrow the blob text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwrap the blob text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Length of the blob text in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the blob is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SerializedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerializedState({} bytes)", self.0.len())
    }
}

/// Contract shared by encoders and decoders.
pub trait SessionCipher: Sized {
    /// Role of channels of this type.
    const ROLE: ChannelRole;

    /// Create an uninstantiated cipher.
    fn new(params: CipherParams) -> Self;

    /// Bind personalization, nonce and entropy into a fresh state.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Instantiate`] if the entropy is shorter than
    /// [`SessionCipher::min_entropy_len`] or the parameters are unusable.
    fn instantiate(
        &mut self,
        personalization: &[u8],
        nonce: u64,
        entropy: &[u8],
    ) -> Result<(), CryptoError>;

    /// Snapshot the state.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidState`] if not instantiated.
    fn save_state(&self) -> Result<SerializedState, CryptoError>;

    /// Replace the state with a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::StateCorrupt`] for malformed, tampered or
    /// foreign blobs. The cipher is left unchanged on error.
    fn restore_state(&mut self, blob: &SerializedState) -> Result<(), CryptoError>;

    /// Blocks processed since instantiation.
    fn reseed_counter(&self) -> u64;

    /// Blocks allowed before reseeding.
    fn reseed_interval(&self) -> u64;

    /// Minimum entropy length accepted by `instantiate`.
    fn min_entropy_len(&self) -> usize;

    /// Whether the cipher holds a live state.
    fn is_instantiated(&self) -> bool;

    /// Drop the live state.
    fn uninstantiate(&mut self);

    /// Build a cipher directly from a blob.
    ///
    /// # Errors
    ///
    /// Same as [`SessionCipher::restore_state`].
    fn from_state(params: CipherParams, blob: &SerializedState) -> Result<Self, CryptoError> {
        let mut cipher = Self::new(params);
        cipher.restore_state(blob)?;
        Ok(cipher)
    }
}

/// Shared body of both channel types.
struct Channel {
    params: CipherParams,
    state: Option<ChannelState>,
}

impl Channel {
    fn new(params: CipherParams) -> Self {
        Self {
            params,
            state: None,
        }
    }

    fn instantiate(
        &mut self,
        personalization: &[u8],
        nonce: u64,
        entropy: &[u8],
    ) -> Result<(), CryptoError> {
        self.params
            .validate()
            .map_err(|e| CryptoError::Instantiate(e.to_string()))?;
        if entropy.len() < self.params.min_entropy_len {
            return Err(CryptoError::Instantiate(format!(
                "entropy is {} bytes, minimum is {}",
                entropy.len(),
                self.params.min_entropy_len
            )));
        }
        self.state = Some(ChannelState::instantiate(
            personalization,
            nonce,
            entropy,
            self.params.reseed_interval,
        ));
        Ok(())
    }

    fn live(&mut self) -> Result<&mut ChannelState, CryptoError> {
        self.state
            .as_mut()
            .ok_or(CryptoError::InvalidState("channel is not instantiated"))
    }

    fn save(&self, role: ChannelRole) -> Result<SerializedState, CryptoError> {
        self.state
            .as_ref()
            .ok_or(CryptoError::InvalidState("channel is not instantiated"))?
            .to_blob(role)
    }

    fn restore(&mut self, blob: &SerializedState, role: ChannelRole) -> Result<(), CryptoError> {
        self.state = Some(ChannelState::from_blob(blob, role)?);
        Ok(())
    }

    fn counter(&self) -> u64 {
        self.state.as_ref().map_or(0, ChannelState::counter)
    }

    fn interval(&self) -> u64 {
        self.state
            .as_ref()
            .map_or(self.params.reseed_interval, ChannelState::reseed_interval)
    }
}

macro_rules! session_cipher_impl {
    ($ty:ident, $role:expr) => {
        impl SessionCipher for $ty {
            const ROLE: ChannelRole = $role;

            fn new(params: CipherParams) -> Self {
                Self(Channel::new(params))
            }

            fn instantiate(
                &mut self,
                personalization: &[u8],
                nonce: u64,
                entropy: &[u8],
            ) -> Result<(), CryptoError> {
                self.0.instantiate(personalization, nonce, entropy)
            }

            fn save_state(&self) -> Result<SerializedState, CryptoError> {
                self.0.save(Self::ROLE)
            }

            fn restore_state(&mut self, blob: &SerializedState) -> Result<(), CryptoError> {
                self.0.restore(blob, Self::ROLE)
            }

            fn reseed_counter(&self) -> u64 {
                self.0.counter()
            }

            fn reseed_interval(&self) -> u64 {
                self.0.interval()
            }

            fn min_entropy_len(&self) -> usize {
                self.0.params.min_entropy_len
            }

            fn is_instantiated(&self) -> bool {
                self.0.state.is_some()
            }

            fn uninstantiate(&mut self) {
                self.0.state = None;
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("instantiated", &self.0.state.is_some())
                    .field("counter", &self.0.counter())
                    .field("interval", &self.0.interval())
                    .finish()
            }
        }
    };
}

/// Outbound channel cipher.
pub struct MteEncoder(Channel);

/// Inbound channel cipher.
pub struct MteDecoder(Channel);

session_cipher_impl!(MteEncoder, ChannelRole::Encoder);
session_cipher_impl!(MteDecoder, ChannelRole::Decoder);

impl MteEncoder {
    /// Encode a whole message.
    ///
    /// Identical to `start_encrypt`, one `chunk` with all of `clear`, then
    /// `finish`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidState`] if not instantiated,
    /// [`CryptoError::ReseedRequired`] once the interval is spent.
    pub fn encode(&mut self, clear: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut stream = self.start_encrypt()?;
        let mut out = stream.chunk(clear)?;
        out.extend(stream.finish()?);
        Ok(out)
    }

    /// Open a chunked encoding stream.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidState`] if not instantiated.
    pub fn start_encrypt(&mut self) -> Result<EncryptStream<'_>, CryptoError> {
        Ok(EncryptStream::new(self.0.live()?))
    }
}

impl MteDecoder {
    /// Decode a whole message.
    ///
    /// On error the decoder keeps its previous state.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidState`] if not instantiated,
    /// [`CryptoError::DecryptionFailed`] for corrupt, truncated or
    /// out-of-sequence input, [`CryptoError::ReseedRequired`] once the
    /// interval is spent.
    pub fn decode(&mut self, encoded: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut stream = self.start_decrypt()?;
        let mut out = stream.chunk(encoded)?;
        out.extend(stream.finish()?);
        Ok(out)
    }

    /// Open a chunked decoding stream.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidState`] if not instantiated.
    pub fn start_decrypt(&mut self) -> Result<DecryptStream<'_>, CryptoError> {
        Ok(DecryptStream::new(self.0.live()?))
    }
}
