//! Chunked transfer codec.
//!
//! Streams a payload through a channel cipher in bounded memory. Input is
//! read in chunks of at most `chunk_size` bytes, each chunk is fed to the
//! cipher stream, and whatever the stream releases is written out. The
//! `finish` step runs exactly once at end of input and its residue is always
//! written, so the output is never silently truncated.
//!
//! Encoded output is larger than the cleartext by one tag per cipher block,
//! and the decoder recovers the final chunk length from the bytes it actually
//! received. See [`mte_crypto::cipher::encoded_len`].

use crate::chunker::FileChunker;
use crate::hasher::StreamHasher;
use crate::FileError;
use mte_crypto::{MteDecoder, MteEncoder};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Outcome of one streamed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    /// Cleartext bytes processed
    pub clear_bytes: u64,
    /// Bytes on the wire side (encoded, or equal to cleartext for plain copies)
    pub wire_bytes: u64,
    /// Input chunks read
    pub chunks: u64,
    /// BLAKE3 digest of the cleartext
    pub hash: [u8; 32],
}

impl TransferSummary {
    /// Hex rendering of the cleartext digest.
    #[must_use]
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

/// Encode everything from `reader` to `writer`.
///
/// `progress` receives the running count of cleartext bytes after each chunk.
///
/// # Errors
///
/// Returns [`FileError::Io`] for reader/writer failures and
/// [`FileError::Crypto`] if the encoder rejects a chunk. The encoder has
/// advanced past every block it sealed, even on error.
pub async fn encode_stream<R, W, F>(
    encoder: &mut MteEncoder,
    reader: &mut R,
    writer: &mut W,
    chunker: FileChunker,
    mut progress: F,
) -> Result<TransferSummary, FileError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(u64),
{
    let chunker = FileChunker::checked(chunker.chunk_size())?;
    let mut stream = encoder.start_encrypt()?;
    let mut hasher = StreamHasher::new();
    let mut buf = Vec::with_capacity(chunker.chunk_size());
    let mut wire_bytes = 0u64;
    let mut chunks = 0u64;

    loop {
        let n = chunker.read_chunk(reader, &mut buf).await?;
        if n == 0 {
            break;
        }
        chunks += 1;
        hasher.update(&buf);

        let out = stream.chunk(&buf)?;
        writer.write_all(&out).await?;
        wire_bytes += out.len() as u64;
        progress(hasher.len());
    }

    let residue = stream.finish()?;
    writer.write_all(&residue).await?;
    writer.flush().await?;
    wire_bytes += residue.len() as u64;

    debug!(
        clear_bytes = hasher.len(),
        wire_bytes, chunks, "encoded stream"
    );

    Ok(TransferSummary {
        clear_bytes: hasher.len(),
        wire_bytes,
        chunks,
        hash: hasher.finalize(),
    })
}

/// Decode everything from `reader` to `writer`.
///
/// Cleartext is written as soon as each block authenticates; the decoder
/// state is only committed once the final block does. Callers that must not
/// keep partial output should decode into a buffer.
///
/// # Errors
///
/// Returns [`FileError::Crypto`] with
/// [`DecryptionFailed`](mte_crypto::CryptoError::DecryptionFailed) for
/// corrupt or truncated input. The decoder keeps its previous state.
pub async fn decode_stream<R, W, F>(
    decoder: &mut MteDecoder,
    reader: &mut R,
    writer: &mut W,
    chunker: FileChunker,
    mut progress: F,
) -> Result<TransferSummary, FileError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(u64),
{
    let chunker = FileChunker::checked(chunker.chunk_size())?;
    let mut stream = decoder.start_decrypt()?;
    let mut hasher = StreamHasher::new();
    let mut buf = Vec::with_capacity(chunker.chunk_size());
    let mut wire_bytes = 0u64;
    let mut chunks = 0u64;

    loop {
        let n = chunker.read_chunk(reader, &mut buf).await?;
        if n == 0 {
            break;
        }
        chunks += 1;
        wire_bytes += n as u64;

        let clear = stream.chunk(&buf)?;
        hasher.update(&clear);
        writer.write_all(&clear).await?;
        progress(hasher.len());
    }

    // Final length is whatever remains minus one tag
    let residue = stream.finish()?;
    hasher.update(&residue);
    writer.write_all(&residue).await?;
    writer.flush().await?;
    progress(hasher.len());

    debug!(
        clear_bytes = hasher.len(),
        wire_bytes, chunks, "decoded stream"
    );

    Ok(TransferSummary {
        clear_bytes: hasher.len(),
        wire_bytes,
        chunks,
        hash: hasher.finalize(),
    })
}

/// Copy a payload without a cipher, in the same chunking as the codec.
///
/// # Errors
///
/// Returns [`FileError::Io`] for reader/writer failures.
pub async fn copy_plain<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    chunker: FileChunker,
    mut progress: F,
) -> Result<TransferSummary, FileError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(u64),
{
    let chunker = FileChunker::checked(chunker.chunk_size())?;
    let mut hasher = StreamHasher::new();
    let mut buf = Vec::with_capacity(chunker.chunk_size());
    let mut chunks = 0u64;

    loop {
        let n = chunker.read_chunk(reader, &mut buf).await?;
        if n == 0 {
            break;
        }
        chunks += 1;
        hasher.update(&buf);
        writer.write_all(&buf).await?;
        progress(hasher.len());
    }
    writer.flush().await?;

    Ok(TransferSummary {
        clear_bytes: hasher.len(),
        wire_bytes: hasher.len(),
        chunks,
        hash: hasher.finalize(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_CHUNK_SIZE;
    use crate::hasher::hash_file;
    use mte_crypto::cipher::encoded_len;
    use mte_crypto::{CipherParams, CryptoError, SessionCipher};

    fn pair() -> (MteEncoder, MteDecoder) {
        let mut enc = MteEncoder::new(CipherParams::default());
        let mut dec = MteDecoder::new(CipherParams::default());
        enc.instantiate(b"upload", 99, &[0x21; 32]).unwrap();
        dec.instantiate(b"upload", 99, &[0x21; 32]).unwrap();
        (enc, dec)
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 256) as u8).collect()
    }

    #[tokio::test]
    async fn test_5000_bytes_in_1024_chunks() {
        let (mut enc, mut dec) = pair();
        let data = sample(5000);

        let mut seen = Vec::new();
        let mut wire = Vec::new();
        let sent = encode_stream(
            &mut enc,
            &mut &data[..],
            &mut wire,
            FileChunker::new(),
            |n| seen.push(n),
        )
        .await
        .unwrap();

        assert_eq!(sent.chunks, 5);
        assert_eq!(seen, vec![1024, 2048, 3072, 4096, 5000]);
        assert_eq!(sent.wire_bytes as usize, wire.len());
        assert_eq!(wire.len(), encoded_len(5000));

        let mut out = Vec::new();
        let received = decode_stream(
            &mut dec,
            &mut &wire[..],
            &mut out,
            FileChunker::new(),
            |_| {},
        )
        .await
        .unwrap();

        assert_eq!(out, data);
        assert_eq!(received.clear_bytes, 5000);
        assert_eq!(received.hash, hash_file(&data));
        assert_eq!(received.hash, sent.hash);
    }

    #[tokio::test]
    async fn test_stream_matches_one_shot_decode() {
        let (mut enc, mut dec) = pair();
        let data = sample(3333);

        let mut wire = Vec::new();
        encode_stream(&mut enc, &mut &data[..], &mut wire, FileChunker::with_chunk_size(100), |_| {})
            .await
            .unwrap();

        assert_eq!(dec.decode(&wire).unwrap(), data);
    }

    #[tokio::test]
    async fn test_empty_payload() {
        let (mut enc, mut dec) = pair();
        let mut wire = Vec::new();
        let sent = encode_stream(&mut enc, &mut &[][..], &mut wire, FileChunker::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(sent.chunks, 0);
        assert_eq!(wire.len(), encoded_len(0));

        let mut out = Vec::new();
        decode_stream(&mut dec, &mut &wire[..], &mut out, FileChunker::new(), |_| {})
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_upload_fails_and_keeps_decoder() {
        let (mut enc, mut dec) = pair();
        let data = sample(2000);
        let mut wire = Vec::new();
        encode_stream(&mut enc, &mut &data[..], &mut wire, FileChunker::new(), |_| {})
            .await
            .unwrap();

        let cut = &wire[..wire.len() - 10];
        let mut out = Vec::new();
        let err = decode_stream(&mut dec, &mut &cut[..], &mut out, FileChunker::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, FileError::Crypto(CryptoError::DecryptionFailed)));
        assert_eq!(dec.reseed_counter(), 0);

        let mut out = Vec::new();
        decode_stream(&mut dec, &mut &wire[..], &mut out, FileChunker::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_copy_plain() {
        let data = sample(2500);
        let mut out = Vec::new();
        let summary = copy_plain(&mut &data[..], &mut out, FileChunker::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(out, data);
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.wire_bytes, 2500);
    }

    #[tokio::test]
    async fn test_zero_chunk_size_rejected() {
        let (mut enc, _) = pair();
        let mut wire = Vec::new();
        let err = encode_stream(
            &mut enc,
            &mut &b"x"[..],
            &mut wire,
            FileChunker::with_chunk_size(0),
            |_| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FileError::InvalidChunkSize(0)));
        assert_eq!(DEFAULT_CHUNK_SIZE, 1024);
    }
}
