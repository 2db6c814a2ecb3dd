//! Channel state and its serialized blob form.
//!
//! ## Blob Format
//!
//! ```text
//! base64( bincode(StateBody) || BLAKE3(bincode(StateBody)) )
//!
//! StateBody { magic "MTE1", version, role, chain_key, nonce_salt, counter, reseed_interval }
//! ```

use super::{ChannelRole, SerializedState};
use crate::CryptoError;
use crate::aead::{AeadKey, Nonce, TAG_SIZE};
use crate::hash::Kdf;
use crate::ratchet::ChainKey;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

const STATE_MAGIC: [u8; 4] = *b"MTE1";
const STATE_VERSION: u8 = 1;
const CHECKSUM_SIZE: usize = 32;

/// Flag byte in block associated data.
const BLOCK_MORE: u8 = 0x00;
const BLOCK_FINAL: u8 = 0x01;

/// Live DRBG-like state of one channel.
#[derive(Clone)]
pub(crate) struct ChannelState {
    chain: ChainKey,
    nonce_salt: [u8; 16],
    counter: u64,
    reseed_interval: u64,
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StateBody {
    magic: [u8; 4],
    version: u8,
    #[zeroize(skip)]
    role: ChannelRole,
    chain_key: [u8; 32],
    nonce_salt: [u8; 16],
    counter: u64,
    reseed_interval: u64,
}

impl ChannelState {
    /// Bind personalization, nonce and entropy into an initial chain key.
    pub(crate) fn instantiate(
        personalization: &[u8],
        nonce: u64,
        entropy: &[u8],
        reseed_interval: u64,
    ) -> Self {
        let nonce_bytes = nonce.to_le_bytes();
        let parts: [&[u8]; 3] = [entropy, &nonce_bytes, personalization];

        let mut seed = [0u8; 32];
        Kdf::new("mte channel seed").derive_parts(&parts, &mut seed);

        let mut nonce_salt = [0u8; 16];
        Kdf::new("mte channel salt").derive_parts(&parts, &mut nonce_salt);

        let state = Self {
            chain: ChainKey::from_bytes(seed),
            nonce_salt,
            counter: 0,
            reseed_interval,
        };
        seed.zeroize();
        state
    }

    pub(crate) fn counter(&self) -> u64 {
        self.counter
    }

    pub(crate) fn reseed_interval(&self) -> u64 {
        self.reseed_interval
    }

    /// Draw the next one-time block key, refusing once the interval is spent.
    fn next_block(&mut self) -> Result<(AeadKey, Nonce, [u8; 9]), CryptoError> {
        if self.counter >= self.reseed_interval {
            return Err(CryptoError::ReseedRequired {
                counter: self.counter,
                interval: self.reseed_interval,
            });
        }

        let block_key = self.chain.ratchet();
        let key = AeadKey::new(*block_key.as_bytes());
        let nonce = Nonce::from_counter(self.counter, &self.nonce_salt);

        let mut aad = [0u8; 9];
        aad[..8].copy_from_slice(&self.counter.to_le_bytes());
        self.counter += 1;

        Ok((key, nonce, aad))
    }

    /// Seal one block. Output is `ciphertext || tag`.
    pub(crate) fn seal_block(
        &mut self,
        plaintext: &[u8],
        final_block: bool,
    ) -> Result<Vec<u8>, CryptoError> {
        let (key, nonce, mut aad) = self.next_block()?;
        aad[8] = if final_block { BLOCK_FINAL } else { BLOCK_MORE };
        key.encrypt(&nonce, plaintext, &aad)
    }

    /// Open one sealed block.
    pub(crate) fn open_block(
        &mut self,
        sealed: &[u8],
        final_block: bool,
    ) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        let (key, nonce, mut aad) = self.next_block()?;
        aad[8] = if final_block { BLOCK_FINAL } else { BLOCK_MORE };
        key.decrypt(&nonce, sealed, &aad)
    }

    pub(crate) fn to_blob(&self, role: ChannelRole) -> Result<SerializedState, CryptoError> {
        let body = StateBody {
            magic: STATE_MAGIC,
            version: STATE_VERSION,
            role,
            chain_key: self.chain.to_bytes(),
            nonce_salt: self.nonce_salt,
            counter: self.counter,
            reseed_interval: self.reseed_interval,
        };

        let mut bytes = bincode::serialize(&body)
            .map_err(|e| CryptoError::InvalidParameter(format!("state encoding: {e}")))?;
        let checksum = blake3::hash(&bytes);
        bytes.extend_from_slice(checksum.as_bytes());

        let blob = SerializedState::from_string(STANDARD.encode(&bytes));
        bytes.zeroize();
        Ok(blob)
    }

    pub(crate) fn from_blob(
        blob: &SerializedState,
        role: ChannelRole,
    ) -> Result<Self, CryptoError> {
        let mut bytes = STANDARD
            .decode(blob.as_str())
            .map_err(|_| CryptoError::StateCorrupt("blob is not base64".into()))?;

        if bytes.len() <= CHECKSUM_SIZE {
            return Err(CryptoError::StateCorrupt(format!(
                "blob too short ({} bytes)",
                bytes.len()
            )));
        }

        let split = bytes.len() - CHECKSUM_SIZE;
        let mut expected = [0u8; CHECKSUM_SIZE];
        expected.copy_from_slice(&bytes[split..]);
        // blake3::Hash equality is constant time
        if blake3::hash(&bytes[..split]) != blake3::Hash::from(expected) {
            bytes.zeroize();
            return Err(CryptoError::StateCorrupt("checksum mismatch".into()));
        }

        let parsed = bincode::deserialize::<StateBody>(&bytes[..split]);
        bytes.zeroize();
        let body =
            parsed.map_err(|_| CryptoError::StateCorrupt("blob body is malformed".into()))?;

        if body.magic != STATE_MAGIC {
            return Err(CryptoError::StateCorrupt("foreign blob (bad magic)".into()));
        }
        if body.version != STATE_VERSION {
            return Err(CryptoError::StateCorrupt(format!(
                "unsupported blob version {}",
                body.version
            )));
        }
        if body.role != role {
            return Err(CryptoError::StateCorrupt(format!(
                "blob belongs to a {} channel, not a {role} channel",
                body.role
            )));
        }
        if body.reseed_interval == 0 {
            return Err(CryptoError::StateCorrupt("zero reseed interval".into()));
        }

        Ok(Self {
            chain: ChainKey::from_bytes(body.chain_key),
            nonce_salt: body.nonce_salt,
            counter: body.counter,
            reseed_interval: body.reseed_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> ChannelState {
        ChannelState::instantiate(b"conversation", 42, &[7u8; 32], 100)
    }

    #[test]
    fn test_instantiate_is_deterministic() {
        let mut a = fresh();
        let mut b = fresh();
        let sealed = a.seal_block(b"hello", true).unwrap();
        assert_eq!(b.open_block(&sealed, true).unwrap(), b"hello");
    }

    #[test]
    fn test_instantiate_inputs_diversify() {
        let mut base = fresh();
        let mut other_nonce = ChannelState::instantiate(b"conversation", 43, &[7u8; 32], 100);
        let mut other_pers = ChannelState::instantiate(b"other", 42, &[7u8; 32], 100);

        let sealed = base.seal_block(b"hello", true).unwrap();
        assert!(other_nonce.open_block(&sealed, true).is_err());
        assert!(other_pers.open_block(&sealed, true).is_err());
    }

    #[test]
    fn test_final_flag_is_authenticated() {
        let mut enc = fresh();
        let mut dec = fresh();
        let sealed = enc.seal_block(b"more follows", false).unwrap();
        assert_eq!(
            dec.open_block(&sealed, true),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_counter_exhaustion() {
        let mut state = ChannelState::instantiate(b"p", 1, &[1u8; 32], 2);
        state.seal_block(b"a", false).unwrap();
        state.seal_block(b"b", false).unwrap();
        assert_eq!(
            state.seal_block(b"c", true),
            Err(CryptoError::ReseedRequired {
                counter: 2,
                interval: 2
            })
        );
    }

    #[test]
    fn test_blob_roundtrip_preserves_position() {
        let mut enc = fresh();
        enc.seal_block(b"advance", false).unwrap();

        let blob = enc.to_blob(ChannelRole::Encoder).unwrap();
        let mut restored = ChannelState::from_blob(&blob, ChannelRole::Encoder).unwrap();
        assert_eq!(restored.counter(), 1);

        let mut dec = fresh();
        dec.open_block(&fresh().seal_block(b"advance", false).unwrap(), false)
            .unwrap();
        let sealed = restored.seal_block(b"next", true).unwrap();
        assert_eq!(dec.open_block(&sealed, true).unwrap(), b"next");
    }

    #[test]
    fn test_blob_rejects_other_role() {
        let blob = fresh().to_blob(ChannelRole::Encoder).unwrap();
        assert!(matches!(
            ChannelState::from_blob(&blob, ChannelRole::Decoder),
            Err(CryptoError::StateCorrupt(_))
        ));
    }

    #[test]
    fn test_blob_rejects_tampering() {
        let blob = fresh().to_blob(ChannelRole::Decoder).unwrap();
        let mut bytes = STANDARD.decode(blob.as_str()).unwrap();
        bytes[10] ^= 0x01;
        let tampered = SerializedState::from_string(STANDARD.encode(&bytes));

        assert!(matches!(
            ChannelState::from_blob(&tampered, ChannelRole::Decoder),
            Err(CryptoError::StateCorrupt(_))
        ));
    }

    #[test]
    fn test_blob_rejects_garbage() {
        for garbage in ["", "!!!", "AAAA", "aGVsbG8gd29ybGQ="] {
            let blob = SerializedState::from_string(garbage.to_string());
            assert!(
                matches!(
                    ChannelState::from_blob(&blob, ChannelRole::Encoder),
                    Err(CryptoError::StateCorrupt(_))
                ),
                "accepted {garbage:?}"
            );
        }
    }

    proptest::proptest! {
        #[test]
        fn test_blob_rejects_any_bit_flip(index in 0usize..512, bit in 0u8..8) {
            let blob = fresh().to_blob(ChannelRole::Encoder).unwrap();
            let mut bytes = STANDARD.decode(blob.as_str()).unwrap();
            let i = index % bytes.len();
            bytes[i] ^= 1 << bit;
            let tampered = SerializedState::from_string(STANDARD.encode(&bytes));

            proptest::prop_assert!(matches!(
                ChannelState::from_blob(&tampered, ChannelRole::Encoder),
                Err(CryptoError::StateCorrupt(_))
            ));
        }
    }
}
