//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Peer public key is empty, malformed, or not on the expected curve
    #[error("key format error: {0}")]
    KeyFormat(String),

    /// Cipher rejected instantiation input
    #[error("instantiate failed: {0}")]
    Instantiate(String),

    /// Serialized state could not be restored
    #[error("state corrupt: {0}")]
    StateCorrupt(String),

    /// Invalid state for operation
    #[error("invalid state for operation: {0}")]
    InvalidState(&'static str),

    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (authentication failure)
    #[error("decryption failed: authentication failure")]
    DecryptionFailed,

    /// Reseed counter reached the reseed interval
    #[error("reseed required: counter {counter} reached interval {interval}")]
    ReseedRequired {
        /// Current counter
        counter: u64,
        /// Reseed interval
        interval: u64,
    },

    /// Invalid parameter
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,

    /// At-rest sealing or unsealing failed
    #[error("sealing failed: {0}")]
    Sealing(&'static str),
}

impl CryptoError {
    /// Stable status name for the error, suitable for logs and envelopes.
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            CryptoError::KeyFormat(_) => "key_format",
            CryptoError::Instantiate(_) => "instantiate",
            CryptoError::StateCorrupt(_) => "state_corrupt",
            CryptoError::InvalidState(_) => "invalid_state",
            CryptoError::EncryptionFailed => "encryption_failed",
            CryptoError::DecryptionFailed => "decryption_failed",
            CryptoError::ReseedRequired { .. } => "reseed_required",
            CryptoError::InvalidParameter(_) => "invalid_parameter",
            CryptoError::RandomFailed => "random_failed",
            CryptoError::Sealing(_) => "sealing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names_are_distinct() {
        let errors = [
            CryptoError::KeyFormat(String::new()),
            CryptoError::Instantiate(String::new()),
            CryptoError::StateCorrupt(String::new()),
            CryptoError::InvalidState("x"),
            CryptoError::EncryptionFailed,
            CryptoError::DecryptionFailed,
            CryptoError::ReseedRequired {
                counter: 1,
                interval: 1,
            },
            CryptoError::InvalidParameter(String::new()),
            CryptoError::RandomFailed,
            CryptoError::Sealing("x"),
        ];

        let mut names: Vec<_> = errors.iter().map(CryptoError::status).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), errors.len());
    }

    #[test]
    fn test_display_carries_detail() {
        let err = CryptoError::ReseedRequired {
            counter: 10,
            interval: 10,
        };
        assert!(err.to_string().contains("interval 10"));
    }
}
