//! At-rest sealing of state blobs.
//!
//! Server caches hold channel state for every live conversation. Blobs are
//! sealed under a key derived from a per-deployment secret and the
//! conversation identifier, so a dump of the cache alone reveals nothing and
//! a blob cannot be replayed under another conversation.
//!
//! ## Format
//!
//! ```text
//! base64( version(1) || nonce(24) || XChaCha20-Poly1305(blob) )
//! ```

use crate::CryptoError;
use crate::aead::{AeadKey, NONCE_SIZE, Nonce, TAG_SIZE};
use crate::cipher::SerializedState;
use crate::random::fill_random;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

const SEALED_VERSION: u8 = 1;
const HKDF_INFO: &[u8] = b"mte state at rest";

/// Minimum deployment secret length, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Seals and opens state blobs with per-conversation keys.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StateSealer {
    secret: Vec<u8>,
}

impl StateSealer {
    /// Create a sealer from the deployment secret.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidParameter`] if the secret is shorter than
    /// [`MIN_SECRET_LEN`].
    pub fn new(deployment_secret: &[u8]) -> Result<Self, CryptoError> {
        if deployment_secret.len() < MIN_SECRET_LEN {
            return Err(CryptoError::InvalidParameter(format!(
                "deployment secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        Ok(Self {
            secret: deployment_secret.to_vec(),
        })
    }

    fn conversation_key(&self, conversation: &str) -> Result<AeadKey, CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(conversation.as_bytes()), &self.secret);
        let mut okm = [0u8; 32];
        hk.expand(HKDF_INFO, &mut okm)
            .map_err(|_| CryptoError::Sealing("key derivation failed"))?;
        let key = AeadKey::new(okm);
        okm.zeroize();
        Ok(key)
    }

    /// Seal a blob for `conversation`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] or [`CryptoError::Sealing`].
    pub fn seal(
        &self,
        conversation: &str,
        blob: &SerializedState,
    ) -> Result<SerializedState, CryptoError> {
        let key = self.conversation_key(conversation)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        fill_random(&mut nonce_bytes)?;
        let nonce = Nonce::from_bytes(nonce_bytes);

        let ciphertext = key
            .encrypt(&nonce, blob.as_str().as_bytes(), &[SEALED_VERSION])
            .map_err(|_| CryptoError::Sealing("encryption failed"))?;

        let mut out = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
        out.push(SEALED_VERSION);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);

        Ok(SerializedState::from_string(STANDARD.encode(out)))
    }

    /// Open a blob sealed for `conversation`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::StateCorrupt`] if the sealed blob is malformed,
    /// was sealed for another conversation, or was modified.
    pub fn open(
        &self,
        conversation: &str,
        sealed: &SerializedState,
    ) -> Result<SerializedState, CryptoError> {
        let bytes = STANDARD
            .decode(sealed.as_str())
            .map_err(|_| CryptoError::StateCorrupt("sealed blob is not base64".into()))?;

        if bytes.len() < 1 + NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::StateCorrupt("sealed blob too short".into()));
        }
        if bytes[0] != SEALED_VERSION {
            return Err(CryptoError::StateCorrupt(format!(
                "unsupported sealed version {}",
                bytes[0]
            )));
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(&bytes[1..=NONCE_SIZE]);
        let key = self.conversation_key(conversation)?;

        let clear = key
            .decrypt(
                &Nonce::from_bytes(nonce_bytes),
                &bytes[1 + NONCE_SIZE..],
                &[SEALED_VERSION],
            )
            .map_err(|_| CryptoError::StateCorrupt("sealed blob failed authentication".into()))?;

        let text = String::from_utf8(clear)
            .map_err(|_| CryptoError::StateCorrupt("sealed blob is not text".into()))?;
        Ok(SerializedState::from_string(text))
    }
}

impl std::fmt::Debug for StateSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StateSealer([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealer() -> StateSealer {
        StateSealer::new(&[0x33; 32]).unwrap()
    }

    fn blob() -> SerializedState {
        SerializedState::from_string("c3RhdGUgYmxvYg==".to_string())
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let s = sealer();
        let sealed = s.seal("conv-a", &blob()).unwrap();
        assert_ne!(sealed, blob());
        assert_eq!(s.open("conv-a", &sealed).unwrap(), blob());
    }

    #[test]
    fn test_seal_is_randomized() {
        let s = sealer();
        assert_ne!(s.seal("c", &blob()).unwrap(), s.seal("c", &blob()).unwrap());
    }

    #[test]
    fn test_other_conversation_cannot_open() {
        let s = sealer();
        let sealed = s.seal("conv-a", &blob()).unwrap();
        assert!(matches!(
            s.open("conv-b", &sealed),
            Err(CryptoError::StateCorrupt(_))
        ));
    }

    #[test]
    fn test_other_deployment_cannot_open() {
        let sealed = sealer().seal("conv-a", &blob()).unwrap();
        let other = StateSealer::new(&[0x44; 32]).unwrap();
        assert!(other.open("conv-a", &sealed).is_err());
    }

    #[test]
    fn test_unsealed_blob_rejected() {
        assert!(matches!(
            sealer().open("conv-a", &blob()),
            Err(CryptoError::StateCorrupt(_))
        ));
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(StateSealer::new(&[0u8; 16]).is_err());
    }
}
