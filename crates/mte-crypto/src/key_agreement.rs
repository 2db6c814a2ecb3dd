//! P-256 Elliptic-Curve Diffie-Hellman key agreement.
//!
//! Each logical channel runs its own exchange: a fresh key pair is generated,
//! its SEC1 public key is sent to the peer, and the peer's public key is
//! consumed exactly once to derive the channel's shared secret.
//!
//! The shared secret is `SHA-256(raw ECDH x-coordinate)`. Both endpoints must
//! apply the identical hash to converge on the same entropy.

use crate::{CryptoError, SHARED_SECRET_SIZE};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use p256::ecdh::EphemeralSecret;
use p256::{EncodedPoint, PublicKey};
use rand_core::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Local key pair for one channel of one handshake.
///
/// The private half lives only in memory and is consumed by
/// [`KeyPair::derive_shared_secret`], so a key pair can never feed two
/// channels.
pub struct KeyPair {
    secret: EphemeralSecret,
    public: PublicKeyBytes,
}

impl KeyPair {
    /// Generate a fresh P-256 key pair from the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = PublicKeyBytes(EncodedPoint::from(secret.public_key()).as_bytes().to_vec());
        Self { secret, public }
    }

    /// Exported public key (uncompressed SEC1).
    #[must_use]
    pub fn public_key(&self) -> &PublicKeyBytes {
        &self.public
    }

    /// Import the peer's public key and derive the hashed shared secret.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyFormat`] if the peer key is empty or is not a
    /// valid P-256 point.
    pub fn derive_shared_secret(self, peer_public: &[u8]) -> Result<SharedSecret, CryptoError> {
        if peer_public.is_empty() {
            return Err(CryptoError::KeyFormat("empty peer public key".into()));
        }

        let peer = PublicKey::from_sec1_bytes(peer_public).map_err(|_| {
            CryptoError::KeyFormat(format!(
                "peer public key is not a P-256 point ({} bytes)",
                peer_public.len()
            ))
        })?;

        let shared = self.secret.diffie_hellman(&peer);
        let digest = Sha256::digest(shared.raw_secret_bytes());

        let mut bytes = [0u8; SHARED_SECRET_SIZE];
        bytes.copy_from_slice(&digest);
        Ok(SharedSecret(bytes))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Exported public key bytes, carried as base64 on the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKeyBytes(Vec<u8>);

impl PublicKeyBytes {
    /// Wrap raw bytes received from a peer. No validation happens until the
    /// key is consumed by [`KeyPair::derive_shared_secret`].
    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Base64 (standard alphabet) rendering.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    /// Parse a base64 rendering.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyFormat`] if the input is not valid base64.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        STANDARD
            .decode(encoded)
            .map(Self)
            .map_err(|e| CryptoError::KeyFormat(format!("public key is not base64: {e}")))
    }

    /// True if no key bytes are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyBytes({} bytes)", self.0.len())
    }
}

impl Serialize for PublicKeyBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKeyBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Hashed ECDH shared secret (32 bytes), used as channel entropy.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl SharedSecret {
    /// Get shared secret as bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}
