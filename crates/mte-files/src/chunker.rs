//! File chunking.

use crate::{DEFAULT_CHUNK_SIZE, FileError};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Chunk a file into fixed-size pieces
#[derive(Debug, Clone, Copy)]
pub struct FileChunker {
    chunk_size: usize,
}

impl FileChunker {
    /// Create a new chunker with default chunk size
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Create a new chunker with custom chunk size
    pub fn with_chunk_size(size: usize) -> Self {
        Self { chunk_size: size }
    }

    /// Create a chunker, rejecting a zero chunk size
    ///
    /// # Errors
    ///
    /// Returns [`FileError::InvalidChunkSize`] for zero.
    pub fn checked(size: usize) -> Result<Self, FileError> {
        if size == 0 {
            return Err(FileError::InvalidChunkSize(size));
        }
        Ok(Self::with_chunk_size(size))
    }

    /// Get chunk size
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Calculate number of chunks for a file
    pub fn chunk_count(&self, file_size: u64) -> u64 {
        file_size.div_ceil(self.chunk_size as u64)
    }

    /// Read the next chunk, filling `buf` up to the chunk size.
    ///
    /// Short reads from the underlying reader are retried so that every chunk
    /// but the last is exactly `chunk_size` bytes. Returns the number of bytes
    /// read; zero means end of input.
    ///
    /// # Errors
    ///
    /// Propagates reader errors.
    pub async fn read_chunk<R>(&self, reader: &mut R, buf: &mut Vec<u8>) -> Result<usize, FileError>
    where
        R: AsyncRead + Unpin,
    {
        buf.resize(self.chunk_size, 0);
        let mut filled = 0;
        while filled < self.chunk_size {
            let n = reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(filled)
    }
}

impl Default for FileChunker {
    fn default() -> Self {
        Self::new()
    }
}
