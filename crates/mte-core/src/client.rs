//! Client side of a conversation.
//!
//! The client keeps its two channel blobs in memory, each behind its own
//! async mutex. An operation locks encoder then decoder, restores both,
//! talks to the server once and saves both back, so operations on one
//! client are serialized while separate clients run fully in parallel.
//!
//! ## Recovery
//!
//! - `StateNotFound` from the server: re-handshake once, retry once.
//! - An error that may have moved one side without the other (corrupt
//!   state, encode/decode failure, transport failure, timeout): the channels
//!   are discarded and the next operation handshakes first. The error
//!   itself is returned.
//! - Any other error leaves the pre-operation blobs in place. The server
//!   commits both of its channels or neither, so they still pair.
//!
//! After every successful operation the [`ReseedCoordinator`] is consulted
//! and a fresh handshake replaces both channels once either crosses its
//! threshold.

use crate::api::{
    ApiRequest, ECHO_PATH, HANDSHAKE_PATH, LOGIN_PATH, UPLOAD_LOGIN_PREFIX, UPLOAD_PREFIX,
    UploadMode, upload_summary_max_len,
};
use crate::channel::{ChannelPair, ChannelUsage, SavedChannels};
use crate::config::ClientConfig;
use crate::conversation::ConversationId;
use crate::error::{MteError, Result};
use crate::handshake::{HandshakeMessage, PendingHandshake};
use crate::reseed::ReseedCoordinator;
use crate::server::{Credentials, LOGIN_SUCCESS};
use crate::transport::Transport;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use mte_crypto::cipher::block_count;
use mte_crypto::{MteDecoder, SerializedState};
use mte_files::{FileChunker, TransferSummary, codec};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncRead;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Run a single attempt; on lost server state re-handshake and run it once more.
macro_rules! with_recovery {
    ($client:ident, $op:literal, $attempt:expr) => {{
        match $attempt.await {
            Err(e) if e.triggers_rehandshake() => {
                warn!(
                    conversation = $client.conversation.short(),
                    op = $op,
                    error = %e,
                    "server lost session state, re-handshaking"
                );
                $client.counters.recoveries.fetch_add(1, Ordering::Relaxed);
                $client.handshake().await?;
                $attempt.await
            }
            other => other,
        }
    }};
}

/// Client activity counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Completed handshakes, reseeds included
    pub handshakes: u64,
    /// Handshakes triggered by the reseed threshold
    pub reseeds: u64,
    /// Re-handshakes after the server lost state
    pub recoveries: u64,
}

#[derive(Default)]
struct Counters {
    handshakes: AtomicU64,
    reseeds: AtomicU64,
    recoveries: AtomicU64,
}

/// Both channels locked and restored for one operation
struct Session<'a> {
    encoder_slot: MutexGuard<'a, Option<SerializedState>>,
    decoder_slot: MutexGuard<'a, Option<SerializedState>>,
    channels: ChannelPair,
}

impl Session<'_> {
    fn commit(&mut self) -> Result<()> {
        let saved = self.channels.save()?;
        *self.encoder_slot = Some(saved.encoder);
        *self.decoder_slot = Some(saved.decoder);
        Ok(())
    }

    fn discard(&mut self) {
        *self.encoder_slot = None;
        *self.decoder_slot = None;
    }
}

/// One conversation with a server, over any [`Transport`]
pub struct SessionClient<T: Transport> {
    config: ClientConfig,
    transport: T,
    conversation: ConversationId,
    coordinator: ReseedCoordinator,
    encoder: Mutex<Option<SerializedState>>,
    decoder: Mutex<Option<SerializedState>>,
    token: Mutex<Option<String>>,
    counters: Counters,
}

impl<T: Transport> SessionClient<T> {
    /// Client with a freshly generated conversation identifier
    ///
    /// # Errors
    ///
    /// Returns [`MteError::InvalidConfig`] for an invalid configuration.
    pub fn new(config: ClientConfig, transport: T) -> Result<Self> {
        Self::with_conversation(config, transport, ConversationId::generate()?)
    }

    /// Client resuming a known conversation identifier
    ///
    /// # Errors
    ///
    /// Returns [`MteError::InvalidConfig`] for an invalid configuration.
    pub fn with_conversation(
        config: ClientConfig,
        transport: T,
        conversation: ConversationId,
    ) -> Result<Self> {
        config.validate()?;
        let coordinator = ReseedCoordinator::new(config.reseed_threshold)?;
        Ok(Self {
            config,
            transport,
            conversation,
            coordinator,
            encoder: Mutex::new(None),
            decoder: Mutex::new(None),
            token: Mutex::new(None),
            counters: Counters::default(),
        })
    }

    /// Conversation identifier
    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    /// Active configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Activity counters
    pub fn stats(&self) -> ClientStats {
        ClientStats {
            handshakes: self.counters.handshakes.load(Ordering::Relaxed),
            reseeds: self.counters.reseeds.load(Ordering::Relaxed),
            recoveries: self.counters.recoveries.load(Ordering::Relaxed),
        }
    }

    /// True if both channels are held
    pub async fn is_connected(&self) -> bool {
        let encoder = self.encoder.lock().await;
        let decoder = self.decoder.lock().await;
        encoder.is_some() && decoder.is_some()
    }

    /// Usage of both channels, encoder first, if connected
    pub async fn usage(&self) -> Option<[ChannelUsage; 2]> {
        let encoder = self.encoder.lock().await;
        let decoder = self.decoder.lock().await;
        let saved = SavedChannels {
            encoder: encoder.clone()?,
            decoder: decoder.clone()?,
        };
        ChannelPair::restore(self.config.cipher, &saved)
            .ok()
            .map(|channels| channels.usage())
    }

    /// Bearer token from the last login
    pub async fn access_token(&self) -> Option<String> {
        self.token.lock().await.clone()
    }

    /// Establish fresh channels, replacing any held ones
    ///
    /// # Errors
    ///
    /// Handshake errors from either side. The client holds no channels
    /// afterwards.
    pub async fn handshake(&self) -> Result<()> {
        let mut encoder_slot = self.encoder.lock().await;
        let mut decoder_slot = self.decoder.lock().await;
        self.handshake_locked(&mut encoder_slot, &mut decoder_slot)
            .await
            .map(|_| ())
    }

    /// Send `text` through the server and back
    ///
    /// # Errors
    ///
    /// Protocol errors after at most one recovery.
    pub async fn echo(&self, text: &str) -> Result<String> {
        with_recovery!(self, "echo", self.echo_once(text))
    }

    /// Log in and keep the issued bearer token
    ///
    /// Returns the server's confirmation text.
    ///
    /// # Errors
    ///
    /// [`MteError::Validation`] for rejected credentials, plus protocol
    /// errors after at most one recovery.
    pub async fn login(&self, user_name: &str, password: &str) -> Result<String> {
        let credentials = serde_json::to_string(&Credentials {
            user_name: user_name.to_string(),
            password: password.to_string(),
        })?;
        let (confirmation, token) =
            with_recovery!(self, "login", self.login_once(&credentials))?;

        let token = token.ok_or_else(|| {
            MteError::Serialization("login response carries no access_token".into())
        })?;
        *self.token.lock().await = Some(token);
        info!(conversation = self.conversation.short(), "logged in");
        Ok(confirmation)
    }

    /// Upload an in-memory payload as file `name`
    ///
    /// `progress` receives the cleartext byte count sent so far.
    ///
    /// # Errors
    ///
    /// [`MteError::Unauthorized`] for `login` without a prior
    /// [`SessionClient::login`], plus protocol errors after at most one
    /// recovery.
    pub async fn upload_bytes<F>(
        &self,
        name: &str,
        data: &[u8],
        mode: UploadMode,
        login: bool,
        mut progress: F,
    ) -> Result<String>
    where
        F: FnMut(u64) + Send,
    {
        with_recovery!(
            self,
            "upload",
            self.upload_once(name, &mut &data[..], data.len() as u64, mode, login, &mut progress)
        )
    }

    /// Upload a file from disk
    ///
    /// The file is streamed through the chunked codec, so it is never held
    /// in memory as cleartext all at once.
    ///
    /// # Errors
    ///
    /// [`MteError::Io`] if the file cannot be read, plus the errors of
    /// [`SessionClient::upload_bytes`].
    pub async fn upload_file<F>(
        &self,
        path: impl AsRef<Path>,
        mode: UploadMode,
        login: bool,
        mut progress: F,
    ) -> Result<String>
    where
        F: FnMut(u64) + Send,
    {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MteError::validation("path has no file name"))?;

        with_recovery!(
            self,
            "upload",
            self.upload_path_once(path, name, mode, login, &mut progress)
        )
    }

    async fn handshake_locked(
        &self,
        encoder_slot: &mut Option<SerializedState>,
        decoder_slot: &mut Option<SerializedState>,
    ) -> Result<ChannelPair> {
        // Whatever happens, the old channels are superseded on the server
        *encoder_slot = None;
        *decoder_slot = None;

        let pending = PendingHandshake::new(self.conversation.clone());
        let request = ApiRequest::post(HANDSHAKE_PATH)
            .with_client_id(&self.conversation)
            .with_json(&pending.request())?;
        let (response, _) = self.call::<HandshakeMessage>(request).await?;
        let channels = pending.complete(&response, self.config.cipher)?;

        let saved = channels.save()?;
        *encoder_slot = Some(saved.encoder);
        *decoder_slot = Some(saved.decoder);

        self.counters.handshakes.fetch_add(1, Ordering::Relaxed);
        info!(conversation = self.conversation.short(), "handshake complete");
        Ok(channels)
    }

    /// Lock and restore both channels, handshaking first if needed
    ///
    /// Reseeds first unless the encoder can still send `outgoing_blocks` and
    /// the decoder can still receive `incoming_blocks`.
    async fn open_session(&self, outgoing_blocks: u64, incoming_blocks: u64) -> Result<Session<'_>> {
        let mut encoder_slot = self.encoder.lock().await;
        let mut decoder_slot = self.decoder.lock().await;

        let restored = match (encoder_slot.as_ref(), decoder_slot.as_ref()) {
            (Some(encoder), Some(decoder)) => {
                let saved = SavedChannels {
                    encoder: encoder.clone(),
                    decoder: decoder.clone(),
                };
                match ChannelPair::restore(self.config.cipher, &saved) {
                    Ok(channels) => Some(channels),
                    Err(e) => {
                        warn!(
                            conversation = self.conversation.short(),
                            error = %e,
                            "held state failed to restore"
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        let channels = match restored {
            Some(channels) if self.has_room(&channels, outgoing_blocks, incoming_blocks) => {
                channels
            }
            Some(_) => {
                info!(
                    conversation = self.conversation.short(),
                    outgoing = outgoing_blocks,
                    incoming = incoming_blocks,
                    "reseeding before operation"
                );
                let channels = self
                    .handshake_locked(&mut encoder_slot, &mut decoder_slot)
                    .await?;
                self.counters.reseeds.fetch_add(1, Ordering::Relaxed);
                channels
            }
            None => {
                self.handshake_locked(&mut encoder_slot, &mut decoder_slot)
                    .await?
            }
        };

        Ok(Session {
            encoder_slot,
            decoder_slot,
            channels,
        })
    }

    fn has_room(&self, channels: &ChannelPair, outgoing_blocks: u64, incoming_blocks: u64) -> bool {
        let [encoder, decoder] = channels.usage();
        !self.coordinator.any_needs_reseed(&[encoder, decoder])
            && self.coordinator.admits(&encoder, outgoing_blocks)
            && self.coordinator.admits(&decoder, incoming_blocks)
    }

    /// Save or discard the session according to `result`, then reseed if due
    async fn finish<R>(&self, mut session: Session<'_>, result: Result<R>) -> Result<R> {
        match result {
            Ok(value) => {
                session.commit()?;
                if self.coordinator.any_needs_reseed(&session.channels.usage()) {
                    self.reseed(&mut session).await;
                }
                Ok(value)
            }
            Err(e) => {
                if e.desynchronizes() {
                    warn!(
                        conversation = self.conversation.short(),
                        error = %e,
                        "discarding channels"
                    );
                    session.discard();
                }
                Err(e)
            }
        }
    }

    async fn reseed(&self, session: &mut Session<'_>) {
        let [encoder, decoder] = session.channels.usage();
        info!(
            conversation = self.conversation.short(),
            encoder = encoder.counter,
            decoder = decoder.counter,
            interval = encoder.interval,
            "reseed threshold reached"
        );
        match self
            .handshake_locked(&mut session.encoder_slot, &mut session.decoder_slot)
            .await
        {
            Ok(channels) => {
                session.channels = channels;
                self.counters.reseeds.fetch_add(1, Ordering::Relaxed);
            }
            // Slots are empty now; the next operation handshakes first
            Err(e) => warn!(
                conversation = self.conversation.short(),
                error = %e,
                "reseed handshake failed"
            ),
        }
    }

    async fn call<D: DeserializeOwned>(&self, request: ApiRequest) -> Result<(D, Option<String>)> {
        debug!(path = %request.path, bytes = request.body.len(), "sending request");
        let timeout = self.config.request_timeout;
        let response = tokio::time::timeout(timeout, self.transport.send(request))
            .await
            .map_err(|_| MteError::Timeout(format!("no response within {timeout:?}").into()))??;

        let envelope = response
            .envelope::<D>()
            .map_err(|e| MteError::Transport(format!("malformed response: {e}").into()))?;
        envelope.into_result()
    }

    async fn echo_once(&self, text: &str) -> Result<String> {
        // The reply is the same text
        let blocks = block_count(text.len()) as u64;
        let mut session = self.open_session(blocks, blocks).await?;
        let result = self.echo_exchange(&mut session.channels, text).await;
        self.finish(session, result).await
    }

    async fn echo_exchange(&self, channels: &mut ChannelPair, text: &str) -> Result<String> {
        let encoded = channels
            .encoder
            .encode(text.as_bytes())
            .map_err(MteError::encode)?;
        let request = ApiRequest::post(ECHO_PATH)
            .with_client_id(&self.conversation)
            .with_body(STANDARD.encode(encoded));
        let (data, _) = self.call::<String>(request).await?;
        decode_text(&mut channels.decoder, &data)
    }

    async fn login_once(&self, credentials: &str) -> Result<(String, Option<String>)> {
        let mut session = self
            .open_session(
                block_count(credentials.len()) as u64,
                block_count(LOGIN_SUCCESS.len()) as u64,
            )
            .await?;
        let result = self.login_exchange(&mut session.channels, credentials).await;
        self.finish(session, result).await
    }

    async fn login_exchange(
        &self,
        channels: &mut ChannelPair,
        credentials: &str,
    ) -> Result<(String, Option<String>)> {
        let encoded = channels
            .encoder
            .encode(credentials.as_bytes())
            .map_err(MteError::encode)?;
        let request = ApiRequest::post(LOGIN_PATH)
            .with_client_id(&self.conversation)
            .with_body(STANDARD.encode(encoded));
        let (data, token) = self.call::<String>(request).await?;

        let confirmation = decode_text(&mut channels.decoder, &data)?;
        if confirmation != LOGIN_SUCCESS {
            debug!(confirmation = %confirmation, "unexpected login confirmation");
        }
        Ok((confirmation, token))
    }

    async fn upload_path_once<F>(
        &self,
        path: &Path,
        name: &str,
        mode: UploadMode,
        login: bool,
        progress: &mut F,
    ) -> Result<String>
    where
        F: FnMut(u64) + Send,
    {
        let mut file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        self.upload_once(name, &mut file, len, mode, login, progress)
            .await
    }

    async fn upload_once<R, F>(
        &self,
        name: &str,
        reader: &mut R,
        len: u64,
        mode: UploadMode,
        login: bool,
        progress: &mut F,
    ) -> Result<String>
    where
        R: AsyncRead + Unpin + Send,
        F: FnMut(u64) + Send,
    {
        let prefix = if login { UPLOAD_LOGIN_PREFIX } else { UPLOAD_PREFIX };
        let mut request = ApiRequest::post(format!("{prefix}{}", mode.segment()))
            .with_query("name", name)
            .with_client_id(&self.conversation);
        if login {
            let token = self
                .access_token()
                .await
                .ok_or_else(|| MteError::unauthorized("log in before an authenticated upload"))?;
            request = request.with_bearer(&token);
        }

        let chunker = FileChunker::with_chunk_size(self.config.chunk_size);
        match mode {
            UploadMode::Plain => {
                let mut body = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
                codec::copy_plain(reader, &mut body, chunker, &mut *progress).await?;
                let (summary, _) = self.call::<String>(request.with_body(body)).await?;
                Ok(summary)
            }
            UploadMode::Mte => {
                let blocks = block_count(usize::try_from(len).unwrap_or(usize::MAX)) as u64;
                let reply = block_count(upload_summary_max_len(name)) as u64;
                let mut session = self.open_session(blocks, reply).await?;
                let result = self
                    .upload_exchange(&mut session.channels, request, reader, chunker, progress)
                    .await;
                self.finish(session, result).await
            }
        }
    }

    async fn upload_exchange<R, F>(
        &self,
        channels: &mut ChannelPair,
        request: ApiRequest,
        reader: &mut R,
        chunker: FileChunker,
        progress: &mut F,
    ) -> Result<String>
    where
        R: AsyncRead + Unpin + Send,
        F: FnMut(u64) + Send,
    {
        let mut body = Vec::new();
        let summary: TransferSummary =
            codec::encode_stream(&mut channels.encoder, reader, &mut body, chunker, &mut *progress)
                .await?;
        debug!(
            clear = summary.clear_bytes,
            wire = summary.wire_bytes,
            chunks = summary.chunks,
            "upload encoded"
        );

        let (data, _) = self.call::<String>(request.with_body(body)).await?;
        decode_text(&mut channels.decoder, &data)
    }
}

impl<T: Transport> std::fmt::Debug for SessionClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("conversation", &self.conversation)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn decode_text(decoder: &mut MteDecoder, data: &str) -> Result<String> {
    let encoded = STANDARD
        .decode(data.trim())
        .map_err(|_| MteError::Decode("response is not base64".into()))?;
    let clear = decoder.decode(&encoded).map_err(MteError::decode)?;
    String::from_utf8(clear).map_err(|_| MteError::Decode("cleartext is not UTF-8".into()))
}
