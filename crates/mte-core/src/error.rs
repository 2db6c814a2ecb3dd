//! Error types for the session protocol
//!
//! Every failure a client or server can observe maps onto one [`MteError`]
//! variant, and every variant has a stable wire [`ResultCode`] so that the
//! peer can decide whether to re-handshake.
//!
//! # Error Categories
//!
//! - **Recoverable by re-handshake**: [`MteError::StateNotFound`] only. The
//!   client re-runs the handshake once and retries the operation once.
//! - **Transient**: transport failures and timeouts. Reported, never retried
//!   automatically.
//! - **Fatal to the operation**: everything else.
//!
//! # Example
//!
//! ```
//! use mte_core::{MteError, ResultCode};
//!
//! let err = MteError::StateNotFound("E-abc".into());
//! assert!(err.triggers_rehandshake());
//! assert_eq!(err.result_code(), ResultCode::StateNotFound);
//! ```

use mte_crypto::CryptoError;
use mte_files::FileError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Errors that can occur in protocol operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MteError {
    // ============ Key Agreement & Cipher ============
    /// Peer public key is empty or not a P-256 point
    #[error("Key format error: {0}")]
    KeyFormat(String),

    /// Cipher refused instantiation
    #[error("Instantiate error: {0}")]
    Instantiate(String),

    /// Saved state could not be restored
    #[error("State corrupt: {0}")]
    StateCorrupt(String),

    /// No saved state for this conversation (missing or expired)
    #[error("State not found: {0}")]
    StateNotFound(Cow<'static, str>),

    /// Handshake nonce did not parse as an unsigned 64-bit integer
    #[error("Invalid nonce: {0:?}")]
    InvalidNonce(String),

    /// Encoder reported a non-success status
    #[error("Encode error: {0}")]
    Encode(String),

    /// Decoder reported a non-success status
    #[error("Decode error: {0}")]
    Decode(String),

    /// Channel budget exhausted before a reseed
    #[error("Reseed required: counter {counter} reached interval {interval}")]
    ReseedRequired {
        /// Current counter
        counter: u64,
        /// Reseed interval
        interval: u64,
    },

    // ============ Transport ============
    /// Request could not be delivered or answered
    #[error("Transport error: {0}")]
    Transport(Cow<'static, str>),

    /// Request exceeded the configured timeout
    #[error("Operation timed out: {0}")]
    Timeout(Cow<'static, str>),

    // ============ Request & Configuration ============
    /// Malformed request or missing required input
    #[error("Validation error: {0}")]
    Validation(Cow<'static, str>),

    /// Missing or foreign bearer credential
    #[error("Unauthorized: {0}")]
    Unauthorized(Cow<'static, str>),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// File I/O error
    #[error("File I/O error: {0}")]
    Io(String),
}

/// Stable, machine-readable result codes carried in every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    /// Operation succeeded
    #[serde(rename = "RC_SUCCESS")]
    Success,
    /// See [`MteError::KeyFormat`]
    #[serde(rename = "RC_KEY_FORMAT_ERROR")]
    KeyFormat,
    /// See [`MteError::Instantiate`]
    #[serde(rename = "RC_MTE_INSTANTIATE_ERROR")]
    Instantiate,
    /// See [`MteError::StateCorrupt`]
    #[serde(rename = "RC_MTE_STATE_CORRUPT")]
    StateCorrupt,
    /// See [`MteError::StateNotFound`]
    #[serde(rename = "RC_MTE_STATE_NOT_FOUND")]
    StateNotFound,
    /// See [`MteError::InvalidNonce`]
    #[serde(rename = "RC_INVALID_NONCE")]
    InvalidNonce,
    /// See [`MteError::Encode`]
    #[serde(rename = "RC_MTE_ENCODE_EXCEPTION")]
    Encode,
    /// See [`MteError::Decode`]
    #[serde(rename = "RC_MTE_DECODE_EXCEPTION")]
    Decode,
    /// See [`MteError::ReseedRequired`]
    #[serde(rename = "RC_MTE_RESEED_REQUIRED")]
    ReseedRequired,
    /// See [`MteError::Transport`]
    #[serde(rename = "RC_HTTP_ERROR")]
    Transport,
    /// See [`MteError::Timeout`]
    #[serde(rename = "RC_TIMEOUT")]
    Timeout,
    /// See [`MteError::Validation`]
    #[serde(rename = "RC_VALIDATION_ERROR")]
    Validation,
    /// See [`MteError::Unauthorized`]
    #[serde(rename = "RC_UNAUTHORIZED")]
    Unauthorized,
    /// See [`MteError::Serialization`]
    #[serde(rename = "RC_SERIALIZATION_ERROR")]
    Serialization,
    /// See [`MteError::InvalidConfig`]
    #[serde(rename = "RC_CONFIG_ERROR")]
    InvalidConfig,
    /// See [`MteError::Io`]
    #[serde(rename = "RC_IO_ERROR")]
    Io,
}

impl ResultCode {
    /// Wire text of the code
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::Success => "RC_SUCCESS",
            ResultCode::KeyFormat => "RC_KEY_FORMAT_ERROR",
            ResultCode::Instantiate => "RC_MTE_INSTANTIATE_ERROR",
            ResultCode::StateCorrupt => "RC_MTE_STATE_CORRUPT",
            ResultCode::StateNotFound => "RC_MTE_STATE_NOT_FOUND",
            ResultCode::InvalidNonce => "RC_INVALID_NONCE",
            ResultCode::Encode => "RC_MTE_ENCODE_EXCEPTION",
            ResultCode::Decode => "RC_MTE_DECODE_EXCEPTION",
            ResultCode::ReseedRequired => "RC_MTE_RESEED_REQUIRED",
            ResultCode::Transport => "RC_HTTP_ERROR",
            ResultCode::Timeout => "RC_TIMEOUT",
            ResultCode::Validation => "RC_VALIDATION_ERROR",
            ResultCode::Unauthorized => "RC_UNAUTHORIZED",
            ResultCode::Serialization => "RC_SERIALIZATION_ERROR",
            ResultCode::InvalidConfig => "RC_CONFIG_ERROR",
            ResultCode::Io => "RC_IO_ERROR",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MteError {
    /// Wire result code for this error
    #[must_use]
    pub fn result_code(&self) -> ResultCode {
        match self {
            MteError::KeyFormat(_) => ResultCode::KeyFormat,
            MteError::Instantiate(_) => ResultCode::Instantiate,
            MteError::StateCorrupt(_) => ResultCode::StateCorrupt,
            MteError::StateNotFound(_) => ResultCode::StateNotFound,
            MteError::InvalidNonce(_) => ResultCode::InvalidNonce,
            MteError::Encode(_) => ResultCode::Encode,
            MteError::Decode(_) => ResultCode::Decode,
            MteError::ReseedRequired { .. } => ResultCode::ReseedRequired,
            MteError::Transport(_) => ResultCode::Transport,
            MteError::Timeout(_) => ResultCode::Timeout,
            MteError::Validation(_) => ResultCode::Validation,
            MteError::Unauthorized(_) => ResultCode::Unauthorized,
            MteError::Serialization(_) => ResultCode::Serialization,
            MteError::InvalidConfig(_) => ResultCode::InvalidConfig,
            MteError::Io(_) => ResultCode::Io,
        }
    }

    /// HTTP-style status used when the error is answered by a server
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            MteError::Validation(_) | MteError::InvalidNonce(_) | MteError::KeyFormat(_) => 400,
            MteError::Unauthorized(_) => 401,
            MteError::StateNotFound(_) => 404,
            MteError::Timeout(_) => 504,
            MteError::Transport(_) => 502,
            _ => 500,
        }
    }

    /// Rebuild an error from a failed envelope
    ///
    /// Counter details of [`MteError::ReseedRequired`] do not travel over the
    /// wire and come back as zero.
    #[must_use]
    pub fn from_envelope(code: ResultCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ResultCode::KeyFormat => MteError::KeyFormat(message),
            ResultCode::Instantiate => MteError::Instantiate(message),
            ResultCode::StateCorrupt => MteError::StateCorrupt(message),
            ResultCode::StateNotFound => MteError::StateNotFound(message.into()),
            ResultCode::InvalidNonce => MteError::InvalidNonce(message),
            ResultCode::Encode => MteError::Encode(message),
            ResultCode::Decode => MteError::Decode(message),
            ResultCode::ReseedRequired => MteError::ReseedRequired {
                counter: 0,
                interval: 0,
            },
            ResultCode::Timeout => MteError::Timeout(message.into()),
            ResultCode::Validation => MteError::Validation(message.into()),
            ResultCode::Unauthorized => MteError::Unauthorized(message.into()),
            ResultCode::Serialization => MteError::Serialization(message),
            ResultCode::InvalidConfig => MteError::InvalidConfig(message.into()),
            ResultCode::Io => MteError::Io(message),
            // A failed envelope claiming success is itself a transport fault
            ResultCode::Success | ResultCode::Transport => MteError::Transport(message.into()),
        }
    }

    /// Returns true for failures that may succeed if the caller retries the
    /// whole operation
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MteError::Transport(_) | MteError::Timeout(_) | MteError::StateNotFound(_)
        )
    }

    /// Returns true if the client should re-handshake and retry once
    #[must_use]
    pub fn triggers_rehandshake(&self) -> bool {
        matches!(self, MteError::StateNotFound(_))
    }

    /// Returns true if the local channels can no longer be trusted to be in
    /// step with the peer
    #[must_use]
    pub fn desynchronizes(&self) -> bool {
        matches!(
            self,
            MteError::StateCorrupt(_)
                | MteError::Encode(_)
                | MteError::Decode(_)
                | MteError::ReseedRequired { .. }
                | MteError::Transport(_)
                | MteError::Timeout(_)
        )
    }

    /// Create a transport error with static context (zero allocation)
    #[must_use]
    pub const fn transport(context: &'static str) -> Self {
        MteError::Transport(Cow::Borrowed(context))
    }

    /// Create a validation error with static context (zero allocation)
    #[must_use]
    pub const fn validation(context: &'static str) -> Self {
        MteError::Validation(Cow::Borrowed(context))
    }

    /// Create an unauthorized error with static context (zero allocation)
    #[must_use]
    pub const fn unauthorized(context: &'static str) -> Self {
        MteError::Unauthorized(Cow::Borrowed(context))
    }

    /// Map a cipher failure met while encoding
    #[must_use]
    pub fn encode(err: CryptoError) -> Self {
        match err {
            CryptoError::EncryptionFailed | CryptoError::InvalidParameter(_) => {
                MteError::Encode(err.to_string())
            }
            other => other.into(),
        }
    }

    /// Map a cipher failure met while decoding
    #[must_use]
    pub fn decode(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed | CryptoError::InvalidParameter(_) => {
                MteError::Decode(err.to_string())
            }
            other => other.into(),
        }
    }
}

impl From<CryptoError> for MteError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeyFormat(msg) => MteError::KeyFormat(msg),
            CryptoError::Instantiate(msg) => MteError::Instantiate(msg),
            CryptoError::StateCorrupt(msg) => MteError::StateCorrupt(msg),
            CryptoError::InvalidState(msg) => MteError::StateNotFound(Cow::Borrowed(msg)),
            CryptoError::EncryptionFailed => MteError::Encode(err.to_string()),
            CryptoError::DecryptionFailed => MteError::Decode(err.to_string()),
            CryptoError::ReseedRequired { counter, interval } => {
                MteError::ReseedRequired { counter, interval }
            }
            CryptoError::InvalidParameter(msg) => MteError::InvalidConfig(msg.into()),
            CryptoError::RandomFailed => MteError::Instantiate(err.to_string()),
            CryptoError::Sealing(msg) => MteError::StateCorrupt(msg.to_string()),
        }
    }
}

impl From<FileError> for MteError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::Io(e) => MteError::Io(e.to_string()),
            FileError::Crypto(e) => e.into(),
            FileError::InvalidChunkSize(n) => {
                MteError::InvalidConfig(format!("invalid chunk size {n}").into())
            }
        }
    }
}

impl From<std::io::Error> for MteError {
    fn from(err: std::io::Error) -> Self {
        MteError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MteError {
    fn from(err: serde_json::Error) -> Self {
        MteError::Serialization(err.to_string())
    }
}

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, MteError>;
