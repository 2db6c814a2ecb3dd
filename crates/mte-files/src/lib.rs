//! # MTE Files
//!
//! Chunked file transfer over paired MTE channels.
//!
//! This crate provides:
//! - File chunking with a bounded chunk size
//! - Streamed encode/decode of payloads through a session cipher
//! - BLAKE3 digests for integrity reporting

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunker;
pub mod codec;
pub mod hasher;

pub use chunker::FileChunker;
pub use codec::{TransferSummary, decode_stream, encode_stream};

use mte_crypto::CryptoError;
use thiserror::Error;

/// Default chunk size (1 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// File metadata for transfers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// File name
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// BLAKE3 hash of entire file
    pub hash: [u8; 32],
    /// Number of chunks
    pub chunk_count: u64,
}

impl FileMetadata {
    /// Describe a file from its full contents.
    #[must_use]
    pub fn from_bytes(name: impl Into<String>, data: &[u8], chunk_size: usize) -> Self {
        Self {
            name: name.into(),
            size: data.len() as u64,
            hash: hasher::hash_file(data),
            chunk_count: FileChunker::with_chunk_size(chunk_size).chunk_count(data.len() as u64),
        }
    }

    /// Describe a file that was streamed through the codec.
    #[must_use]
    pub fn from_summary(name: impl Into<String>, summary: &TransferSummary, chunk_size: usize) -> Self {
        Self {
            name: name.into(),
            size: summary.clear_bytes,
            hash: summary.hash,
            chunk_count: FileChunker::with_chunk_size(chunk_size).chunk_count(summary.clear_bytes),
        }
    }

    /// Hex rendering of the digest.
    #[must_use]
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

/// File transfer errors
#[derive(Debug, Error)]
pub enum FileError {
    /// Underlying reader or writer failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cipher rejected a chunk
    #[error("cipher error: {0}")]
    Crypto(#[from] CryptoError),

    /// Chunk size of zero
    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(usize),
}
