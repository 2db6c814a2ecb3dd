//! Chunked stream framing.
//!
//! Cleartext is cut into [`BLOCK_SIZE`] blocks, each sealed into
//! [`ENCODED_BLOCK_SIZE`] bytes. The last block of every message is flagged
//! final and may be short (0..=256 bytes of cleartext), so encoded and
//! cleartext chunk boundaries drift apart; both sides therefore hold back
//! one block until more input arrives or `finish` is called.
//!
//! ```text
//! start ──► chunk* ──► finish (exactly once, output must be appended)
//! ```

use super::state::ChannelState;
use crate::CryptoError;
use crate::aead::TAG_SIZE;

/// Cleartext bytes per cipher block.
pub const BLOCK_SIZE: usize = 256;

/// Encoded bytes per full cipher block (cleartext + tag).
pub const ENCODED_BLOCK_SIZE: usize = BLOCK_SIZE + TAG_SIZE;

/// Encoded length of a message of `clear_len` bytes.
#[must_use]
pub fn encoded_len(clear_len: usize) -> usize {
    clear_len + block_count(clear_len) * TAG_SIZE
}

/// Number of cipher blocks (and thus reseed-counter steps) for a message.
#[must_use]
pub fn block_count(clear_len: usize) -> usize {
    if clear_len == 0 {
        1
    } else {
        clear_len.div_ceil(BLOCK_SIZE)
    }
}

/// Cleartext length of a well-formed encoded message, or `None` if no
/// message can have that encoded length.
#[must_use]
pub fn decoded_len(encoded_len: usize) -> Option<usize> {
    if encoded_len < TAG_SIZE {
        return None;
    }
    let full = (encoded_len - 1) / ENCODED_BLOCK_SIZE;
    let last = encoded_len - full * ENCODED_BLOCK_SIZE;
    if last < TAG_SIZE || (full > 0 && last == TAG_SIZE) {
        return None;
    }
    Some(full * BLOCK_SIZE + last - TAG_SIZE)
}

/// Streaming encoder bound to one encoder channel.
///
/// Every sealed block advances the channel immediately, so abandoning a
/// stream never lets key material be reused.
pub struct EncryptStream<'a> {
    state: &'a mut ChannelState,
    pending: Vec<u8>,
}

impl<'a> EncryptStream<'a> {
    pub(crate) fn new(state: &'a mut ChannelState) -> Self {
        Self {
            state,
            pending: Vec::with_capacity(BLOCK_SIZE * 2),
        }
    }

    /// Feed cleartext; returns the encoded bytes that are ready.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::ReseedRequired`] if the channel's budget runs
    /// out mid-stream, or [`CryptoError::EncryptionFailed`].
    pub fn chunk(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.pending.extend_from_slice(data);

        let mut out = Vec::with_capacity(encoded_len(self.pending.len()));
        let mut consumed = 0;
        // Keep at least one byte back unless the stream is finishing: the
        // final block is sealed with a different flag.
        while self.pending.len() - consumed > BLOCK_SIZE {
            let block = &self.pending[consumed..consumed + BLOCK_SIZE];
            out.extend_from_slice(&self.state.seal_block(block, false)?);
            consumed += BLOCK_SIZE;
        }
        self.pending.drain(..consumed);

        Ok(out)
    }

    /// Seal the held-back residue as the final block.
    ///
    /// # Errors
    ///
    /// Same as [`EncryptStream::chunk`].
    pub fn finish(mut self) -> Result<Vec<u8>, CryptoError> {
        let residue = std::mem::take(&mut self.pending);
        self.state.seal_block(&residue, true)
    }

    /// Cleartext bytes buffered and not yet emitted.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Streaming decoder bound to one decoder channel.
///
/// Works on a copy of the channel state and commits it only when `finish`
/// authenticates the final block; a failed or abandoned stream leaves the
/// channel at its last good position.
pub struct DecryptStream<'a> {
    target: &'a mut ChannelState,
    work: ChannelState,
    pending: Vec<u8>,
}

impl<'a> DecryptStream<'a> {
    pub(crate) fn new(target: &'a mut ChannelState) -> Self {
        let work = target.clone();
        Self {
            target,
            work,
            pending: Vec::with_capacity(ENCODED_BLOCK_SIZE * 2),
        }
    }

    /// Feed encoded bytes; returns the cleartext that is ready.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] on authentication failure or
    /// [`CryptoError::ReseedRequired`] if the budget is exhausted.
    pub fn chunk(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.pending.extend_from_slice(data);

        let mut out = Vec::with_capacity(self.pending.len());
        let mut consumed = 0;
        while self.pending.len() - consumed > ENCODED_BLOCK_SIZE {
            let block = &self.pending[consumed..consumed + ENCODED_BLOCK_SIZE];
            out.extend_from_slice(&self.work.open_block(block, false)?);
            consumed += ENCODED_BLOCK_SIZE;
        }
        self.pending.drain(..consumed);

        Ok(out)
    }

    /// Open the final block and commit the channel state.
    ///
    /// The final cleartext length is `remaining - TAG_SIZE`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] if the stream was truncated
    /// or the final block fails authentication.
    pub fn finish(mut self) -> Result<Vec<u8>, CryptoError> {
        let remaining = self.pending.len();
        if !(TAG_SIZE..=ENCODED_BLOCK_SIZE).contains(&remaining) {
            return Err(CryptoError::DecryptionFailed);
        }

        let residue = std::mem::take(&mut self.pending);
        let clear = self.work.open_block(&residue, true)?;
        debug_assert_eq!(clear.len(), remaining - TAG_SIZE);

        *self.target = self.work;
        Ok(clear)
    }

    /// Encoded bytes buffered and not yet opened.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
