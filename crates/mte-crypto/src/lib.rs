//! # MTE Crypto
//!
//! Cryptographic primitives for paired MTE session channels.
//!
//! This crate provides:
//! - P-256 ECDH key agreement with SHA-256 secret hashing
//! - A stateful channel cipher (encoder / decoder) with save and restore
//! - Chunked stream framing for payloads larger than one buffer
//! - Versioned, checksummed state blobs
//! - At-rest sealing of state blobs for server-side caches
//! - Secure random number generation
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Key Agreement | ECDH P-256 | 128-bit |
//! | Shared Secret | SHA-256(raw ECDH output) | 128-bit |
//! | Channel Seed / Ratchet | BLAKE3 KDF | 128-bit |
//! | Block Cipher Mode | XChaCha20-Poly1305 | 256-bit key |
//! | At-rest Key | HKDF-SHA256 | 128-bit |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod aead;
pub mod cipher;
pub mod error;
pub mod hash;
pub mod key_agreement;
pub mod random;
pub mod ratchet;
pub mod sealed;

pub use cipher::{
    CipherParams, ChannelRole, DecryptStream, EncryptStream, MteDecoder, MteEncoder,
    SerializedState, SessionCipher,
};
pub use error::CryptoError;
pub use key_agreement::{KeyPair, PublicKeyBytes, SharedSecret};

/// Uncompressed SEC1 P-256 public key size
pub const P256_PUBLIC_KEY_SIZE: usize = 65;

/// Shared secret size (SHA-256 output)
pub const SHARED_SECRET_SIZE: usize = 32;

/// XChaCha20-Poly1305 key size
pub const XCHACHA_KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 nonce size
pub const XCHACHA_NONCE_SIZE: usize = 24;

/// BLAKE3 output size
pub const BLAKE3_OUTPUT_SIZE: usize = 32;
