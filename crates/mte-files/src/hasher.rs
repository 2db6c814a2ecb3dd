//! BLAKE3 digests for file integrity.

use crate::FileError;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Inputs above this size hash on the rayon pool when available.
#[cfg(feature = "rayon")]
const PARALLEL_THRESHOLD: usize = 128 * 1024;

/// Hash an entire file
pub fn hash_file(data: &[u8]) -> [u8; 32] {
    #[cfg(feature = "rayon")]
    {
        if data.len() >= PARALLEL_THRESHOLD {
            let mut hasher = blake3::Hasher::new();
            hasher.update_rayon(data);
            return *hasher.finalize().as_bytes();
        }
    }
    *blake3::hash(data).as_bytes()
}

/// Incremental digest fed chunk by chunk during a transfer.
#[derive(Default, Clone)]
pub struct StreamHasher {
    inner: blake3::Hasher,
    len: u64,
}

impl StreamHasher {
    /// Start a new digest
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb a chunk
    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Bytes absorbed so far
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True if nothing has been absorbed
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Final digest
    pub fn finalize(&self) -> [u8; 32] {
        *self.inner.finalize().as_bytes()
    }
}

/// Hash a file on disk without loading it whole.
///
/// # Errors
///
/// Propagates open and read errors.
pub async fn hash_path(path: impl AsRef<Path>) -> Result<[u8; 32], FileError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = StreamHasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_matches_one_shot() {
        let data: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        let mut hasher = StreamHasher::new();
        for chunk in data.chunks(1000) {
            hasher.update(chunk);
        }
        assert_eq!(hasher.len(), 10_000);
        assert_eq!(hasher.finalize(), hash_file(&data));
    }

    #[test]
    fn test_large_input_matches_blake3() {
        let data = vec![0x5Cu8; 512 * 1024];
        assert_eq!(hash_file(&data), *blake3::hash(&data).as_bytes());
    }

    #[tokio::test]
    async fn test_hash_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"hello file").unwrap();
        assert_eq!(hash_path(&path).await.unwrap(), hash_file(b"hello file"));
    }
}
