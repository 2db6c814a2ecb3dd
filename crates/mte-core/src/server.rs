//! Server endpoints.
//!
//! The server holds no channel in memory between requests. Each request
//! checks both channels of its conversation out of the [`StateStore`]
//! (take), restores them, uses them and checks them back in (save + put).
//! If anything fails in between, the checkout puts the taken blobs back
//! untouched, so the last-known-good state survives for the client's next
//! attempt.
//!
//! Every handshake starts a new generation of its conversation. A checkout
//! remembers the generation it was taken under and writes nothing back once
//! a newer handshake has replaced it, so a request that outlives a
//! re-handshake cannot clobber the new channels.
//!
//! # Routes
//!
//! | Route | Body | `Data` |
//! |-------|------|--------|
//! | `POST /api/handshake` | [`HandshakeMessage`] | [`HandshakeMessage`] |
//! | `POST /api/echo` | encoded text (base64) | encoded text (base64) |
//! | `POST /api/login` | encoded credentials (base64) | encoded `"Login successful"` + `access_token` |
//! | `POST /FileUpload/{mte,nomte}?name=` | chunk-encoded or raw file | upload summary |
//! | `POST /FileUploadLogin/{mte,nomte}?name=` | as above, bearer required | upload summary |

use crate::api::{
    ApiRequest, ApiResponse, ECHO_PATH, HANDSHAKE_PATH, LOGIN_PATH, Method, UPLOAD_LOGIN_PREFIX,
    UPLOAD_PREFIX, UploadMode, upload_summary,
};
use crate::channel::{ChannelPair, SavedChannels};
use crate::config::ServerConfig;
use crate::conversation::ConversationId;
use crate::envelope::Envelope;
use crate::error::{MteError, Result};
use crate::handshake::{self, HandshakeMessage};
use crate::store::{MemoryStateStore, SealedStateStore, StateKey, StateStore};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use dashmap::DashMap;
use mte_crypto::random::{random_16, random_32};
use mte_crypto::sealed::StateSealer;
use mte_crypto::{MteDecoder, MteEncoder};
use mte_files::{FileChunker, FileMetadata, codec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Text returned by a successful login
pub const LOGIN_SUCCESS: &str = "Login successful";

/// Login request body, before encoding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Credentials {
    /// User name
    pub user_name: String,
    /// Password
    pub password: String,
}

/// What the server remembers about a conversation besides its channels
struct ConversationRecord {
    /// Handshake that produced the cached channels
    generation: u64,
    /// Bearer token of the last accepted login
    token: Option<String>,
    /// Slides with the channel state
    expires_at: Instant,
}

/// Both channels of a conversation, taken out of the store for one request
///
/// Dropping an uncommitted checkout puts the original blobs back.
struct Checkout<'a, S: StateStore> {
    server: &'a SessionServer<S>,
    conversation: ConversationId,
    generation: u64,
    original: Option<SavedChannels>,
    channels: ChannelPair,
}

impl<S: StateStore> Checkout<'_, S> {
    /// Save both channels and put them back
    ///
    /// # Errors
    ///
    /// [`MteError::StateNotFound`] if a newer handshake replaced the
    /// conversation while the request ran. Nothing is written then.
    fn commit(mut self) -> Result<()> {
        let saved = self.channels.save()?;
        self.original = None;
        if self
            .server
            .check_in(&self.conversation, self.generation, saved)?
        {
            Ok(())
        } else {
            Err(MteError::StateNotFound(
                "conversation was superseded by a newer handshake".into(),
            ))
        }
    }
}

impl<S: StateStore> Drop for Checkout<'_, S> {
    fn drop(&mut self) {
        if let Some(original) = self.original.take() {
            debug!(
                conversation = self.conversation.short(),
                "restoring last-known-good state"
            );
            if let Err(e) = self
                .server
                .check_in(&self.conversation, self.generation, original)
            {
                warn!(
                    conversation = self.conversation.short(),
                    error = %e,
                    "failed to restore state"
                );
            }
        }
    }
}

/// Deletes a partially received upload unless it was kept
struct PartialFile {
    path: PathBuf,
    keep: bool,
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "partial upload removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to remove partial upload");
            }
        }
    }
}

fn decode_text(decoder: &mut MteDecoder, body: &str) -> Result<String> {
    let encoded = STANDARD
        .decode(body.trim())
        .map_err(|_| MteError::validation("body is not base64"))?;
    let clear = decoder.decode(&encoded).map_err(MteError::decode)?;
    String::from_utf8(clear).map_err(|_| MteError::Decode("cleartext is not UTF-8".into()))
}

fn encode_text(encoder: &mut MteEncoder, text: &str) -> Result<String> {
    let encoded = encoder.encode(text.as_bytes()).map_err(MteError::encode)?;
    Ok(STANDARD.encode(encoded))
}

/// Stateless request handlers over a shared state store
pub struct SessionServer<S: StateStore> {
    config: ServerConfig,
    store: S,
    conversations: DashMap<ConversationId, ConversationRecord>,
    next_generation: AtomicU64,
}

impl SessionServer<SealedStateStore<MemoryStateStore>> {
    /// Server over an in-memory store sealed with the configured secret
    ///
    /// Without a configured secret an ephemeral one is generated, so cached
    /// state does not survive a restart.
    ///
    /// # Errors
    ///
    /// Returns [`MteError::InvalidConfig`] for an invalid configuration.
    pub fn in_memory(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let sealer = match &config.deployment_secret {
            Some(secret) => StateSealer::new(secret.as_bytes())?,
            None => StateSealer::new(&random_32()?)?,
        };
        let store = SealedStateStore::new(MemoryStateStore::new(), sealer);
        Self::new(config, store)
    }
}

impl<S: StateStore> SessionServer<S> {
    /// Server over `store`
    ///
    /// # Errors
    ///
    /// Returns [`MteError::InvalidConfig`] for an invalid configuration.
    pub fn new(config: ServerConfig, store: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            conversations: DashMap::new(),
            // 0 stands for "no handshake seen"
            next_generation: AtomicU64::new(1),
        })
    }

    /// Backing store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Active configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Conversations with live bookkeeping
    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    /// Issued bearer tokens still held
    pub fn token_count(&self) -> usize {
        self.conversations
            .iter()
            .filter(|record| record.token.is_some())
            .count()
    }

    /// Evict expired channel state and expired conversation records
    ///
    /// Runs on every handshake. A conversation's bearer token goes with its
    /// record. Returns the number of store entries removed.
    pub fn purge_expired(&self) -> usize {
        let removed = self.store.purge_expired();
        let now = Instant::now();
        let before = self.conversations.len();
        self.conversations.retain(|_, record| record.expires_at > now);
        let dropped = before.saturating_sub(self.conversations.len());
        if removed > 0 || dropped > 0 {
            debug!(entries = removed, conversations = dropped, "purged expired state");
        }
        removed
    }

    /// Check out both channels of a conversation
    ///
    /// Requests commit both or neither, so a failure leaves the peer's
    /// pre-request state valid.
    fn checkout(&self, conversation: &ConversationId) -> Result<Checkout<'_, S>> {
        let ttl = self.config.state_ttl;
        // Held while taking so both blobs come from the same handshake
        let record = self.conversations.get(conversation);
        let generation = record.as_ref().map_or(0, |record| record.generation);

        let decoder = self.store.take_and_clear(&StateKey::decoder(conversation))?;
        let encoder = match self.store.take_and_clear(&StateKey::encoder(conversation)) {
            Ok(blob) => blob,
            Err(e) => {
                self.store
                    .put(StateKey::decoder(conversation), decoder, ttl)?;
                return Err(e);
            }
        };
        drop(record);

        let saved = SavedChannels { encoder, decoder };
        // State that fails to restore is dropped, not put back
        let channels = ChannelPair::restore(self.config.cipher, &saved)?;
        Ok(Checkout {
            server: self,
            conversation: conversation.clone(),
            generation,
            original: Some(saved),
            channels,
        })
    }

    /// Put both blobs back unless a newer handshake replaced the conversation
    ///
    /// Returns false if the blobs were dropped as superseded.
    fn check_in(
        &self,
        conversation: &ConversationId,
        generation: u64,
        saved: SavedChannels,
    ) -> Result<bool> {
        let ttl = self.config.state_ttl;
        // Held across the puts so a handshake cannot slip in between
        let mut record = self.conversations.get_mut(conversation);
        let current = record.as_ref().map_or(0, |record| record.generation);
        if current != generation {
            debug!(
                conversation = conversation.short(),
                generation,
                current,
                "dropping superseded state"
            );
            return Ok(false);
        }

        self.store
            .put(StateKey::decoder(conversation), saved.decoder, ttl)?;
        self.store
            .put(StateKey::encoder(conversation), saved.encoder, ttl)?;
        if let Some(record) = record.as_mut() {
            record.expires_at = Instant::now() + ttl;
        }
        Ok(true)
    }

    fn authorize(&self, conversation: &ConversationId, token: Option<&str>) -> Result<()> {
        let token = token.ok_or_else(|| MteError::unauthorized("missing bearer token"))?;
        let record = self
            .conversations
            .get(conversation)
            .ok_or_else(|| MteError::unauthorized("conversation is not logged in"))?;
        match record.token.as_deref() {
            Some(issued) if issued == token => Ok(()),
            Some(_) => Err(MteError::unauthorized("token does not match conversation")),
            None => Err(MteError::unauthorized("conversation is not logged in")),
        }
    }

    /// Answer a handshake and cache both server channels
    ///
    /// A handshake under an existing conversation supersedes its cached
    /// channels; requests still running on the old channels write nothing
    /// back. A login survives the re-handshake. Expired state of every
    /// conversation is purged first.
    ///
    /// # Errors
    ///
    /// See [`handshake::respond`]. Nothing is cached on failure.
    pub fn handshake(&self, request: &HandshakeMessage) -> Result<HandshakeMessage> {
        let answered = handshake::respond(request, self.config.cipher, handshake::nonce_now())?;
        let saved = answered.channels.save()?;
        let conversation = &request.conversation_identifier;
        let ttl = self.config.state_ttl;

        self.purge_expired();

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut record = self
            .conversations
            .entry(conversation.clone())
            .or_insert_with(|| ConversationRecord {
                generation,
                token: None,
                expires_at: Instant::now() + ttl,
            });
        record.generation = generation;

        self.store
            .put(StateKey::encoder(conversation), saved.encoder, ttl)?;
        self.store
            .put(StateKey::decoder(conversation), saved.decoder, ttl)?;
        record.expires_at = Instant::now() + ttl;
        drop(record);

        debug!(conversation = conversation.short(), generation, "handshake answered");
        Ok(answered.response)
    }

    /// Decode a string and answer it re-encoded
    ///
    /// # Errors
    ///
    /// [`MteError::StateNotFound`] without a live conversation,
    /// [`MteError::Decode`] for a body that fails to decode.
    pub fn echo(&self, conversation: &ConversationId, body: &str) -> Result<String> {
        let mut checkout = self.checkout(conversation)?;
        let text = decode_text(&mut checkout.channels.decoder, body)?;
        debug!(conversation = conversation.short(), len = text.len(), "echo");
        let data = encode_text(&mut checkout.channels.encoder, &text)?;

        checkout.commit()?;
        Ok(data)
    }

    /// Check encoded credentials and issue a bearer token
    ///
    /// Returns the encoded confirmation and the token. A new login replaces
    /// the conversation's previous token.
    ///
    /// # Errors
    ///
    /// [`MteError::Validation`] for malformed or empty credentials, plus the
    /// errors of [`SessionServer::echo`].
    pub fn login(&self, conversation: &ConversationId, body: &str) -> Result<(String, String)> {
        let mut checkout = self.checkout(conversation)?;
        let json = decode_text(&mut checkout.channels.decoder, body)?;
        let credentials: Credentials = serde_json::from_str(&json)
            .map_err(|_| MteError::validation("credentials are not valid JSON"))?;
        if credentials.user_name.trim().is_empty() || credentials.password.is_empty() {
            return Err(MteError::validation("user name and password are required"));
        }
        let confirmation = encode_text(&mut checkout.channels.encoder, LOGIN_SUCCESS)?;
        let token = hex::encode(random_32()?);
        let generation = checkout.generation;

        checkout.commit()?;

        if let Some(mut record) = self.conversations.get_mut(conversation) {
            if record.generation == generation {
                record.token = Some(token.clone());
            }
        }
        info!(conversation = conversation.short(), "login accepted");
        Ok((confirmation, token))
    }

    /// Store an uploaded file
    ///
    /// The body is streamed into a temporary file under `upload_dir` that is
    /// renamed into place once the whole body was received; a failed upload
    /// leaves no file behind. Returns the summary text
    /// `"{name}: {bytes} bytes, blake3 {hex}"`, encoded for
    /// [`UploadMode::Mte`].
    ///
    /// # Errors
    ///
    /// [`MteError::Validation`] for a missing or unusable file name,
    /// [`MteError::Decode`] for a corrupt or truncated encoded body,
    /// [`MteError::Io`] if the file cannot be written.
    pub async fn upload(
        &self,
        conversation: Option<&ConversationId>,
        mode: UploadMode,
        name: &str,
        body: &[u8],
    ) -> Result<String> {
        let file_name = Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| MteError::validation("missing or invalid file name"))?
            .to_string();

        let mut checkout = match mode {
            UploadMode::Mte => {
                let conversation = conversation
                    .ok_or_else(|| MteError::validation("missing X-ClientId header"))?;
                Some(self.checkout(conversation)?)
            }
            UploadMode::Plain => None,
        };

        tokio::fs::create_dir_all(&self.config.upload_dir).await?;
        let path = self.config.upload_dir.join(&file_name);
        let mut partial = PartialFile {
            path: self
                .config
                .upload_dir
                .join(format!(".{file_name}.{}.part", hex::encode(random_16()?))),
            keep: false,
        };

        let mut reader = body;
        let chunker = FileChunker::new();
        let mut file = tokio::fs::File::create(&partial.path).await?;
        let summary = match checkout.as_mut() {
            Some(checkout) => {
                codec::decode_stream(
                    &mut checkout.channels.decoder,
                    &mut reader,
                    &mut file,
                    chunker,
                    |_| {},
                )
                .await?
            }
            None => codec::copy_plain(&mut reader, &mut file, chunker, |_| {}).await?,
        };
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&partial.path, &path).await?;
        partial.keep = true;

        let meta = FileMetadata::from_summary(file_name, &summary, chunker.chunk_size());
        info!(
            file = %meta.name,
            bytes = meta.size,
            mode = mode.segment(),
            "upload stored"
        );

        let text = upload_summary(&meta.name, meta.size, &meta.hash_hex());
        match checkout {
            Some(mut checkout) => {
                let data = encode_text(&mut checkout.channels.encoder, &text)?;
                checkout.commit()?;
                Ok(data)
            }
            None => Ok(text),
        }
    }
}

impl<S: StateStore> std::fmt::Debug for SessionServer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionServer")
            .field("live_entries", &self.store.len())
            .field("conversations", &self.conversations.len())
            .field("tokens", &self.token_count())
            .finish_non_exhaustive()
    }
}

/// Maps [`ApiRequest`]s onto a [`SessionServer`]
pub struct Router<S: StateStore> {
    server: Arc<SessionServer<S>>,
}

impl<S: StateStore> Clone for Router<S> {
    fn clone(&self) -> Self {
        Self {
            server: Arc::clone(&self.server),
        }
    }
}

impl<S: StateStore> Router<S> {
    /// Route requests to `server`
    pub fn new(server: Arc<SessionServer<S>>) -> Self {
        Self { server }
    }

    /// The routed server
    pub fn server(&self) -> &Arc<SessionServer<S>> {
        &self.server
    }

    /// Handle one request; failures become error envelopes
    pub async fn dispatch(&self, request: ApiRequest) -> ApiResponse {
        match self.route(&request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(
                    method = %request.method,
                    path = %request.path,
                    code = %e.result_code(),
                    "request failed"
                );
                ApiResponse::from_error(&e)
            }
        }
    }

    async fn route(&self, request: &ApiRequest) -> Result<ApiResponse> {
        if request.method != Method::Post {
            return Err(MteError::validation("method not allowed"));
        }

        let path = request.path.as_str();
        if path == HANDSHAKE_PATH {
            return self.handshake(request);
        }
        if path == ECHO_PATH {
            let conversation = request.client_id()?;
            let data = self.server.echo(&conversation, request.text()?)?;
            return ApiResponse::ok(&Envelope::success(data));
        }
        if path == LOGIN_PATH {
            let conversation = request.client_id()?;
            let (data, token) = self.server.login(&conversation, request.text()?)?;
            return ApiResponse::ok(&Envelope::success(data).with_token(token));
        }
        if let Some(segment) = path.strip_prefix(UPLOAD_LOGIN_PREFIX) {
            return self.upload(request, segment, true).await;
        }
        if let Some(segment) = path.strip_prefix(UPLOAD_PREFIX) {
            return self.upload(request, segment, false).await;
        }

        let err = MteError::Validation(format!("no route for {path}").into());
        Ok(ApiResponse {
            status: 404,
            ..ApiResponse::from_error(&err)
        })
    }

    fn handshake(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let message: HandshakeMessage = serde_json::from_slice(&request.body)
            .map_err(|e| MteError::Validation(format!("malformed handshake: {e}").into()))?;

        // Header, when sent, must agree with the body
        if request.header(crate::api::CLIENT_ID_HEADER).is_some()
            && request.client_id()? != message.conversation_identifier
        {
            return Err(MteError::validation(
                "X-ClientId does not match ConversationIdentifier",
            ));
        }

        let response = self.server.handshake(&message)?;
        ApiResponse::ok(&Envelope::success(response))
    }

    async fn upload(
        &self,
        request: &ApiRequest,
        segment: &str,
        requires_login: bool,
    ) -> Result<ApiResponse> {
        let mode = UploadMode::from_segment(segment)
            .ok_or_else(|| MteError::Validation(format!("unknown upload mode {segment:?}").into()))?;
        let name = request
            .query
            .get("name")
            .ok_or_else(|| MteError::validation("missing name query parameter"))?;

        let conversation = if mode == UploadMode::Mte || requires_login {
            Some(request.client_id()?)
        } else {
            request.client_id().ok()
        };
        if requires_login {
            let conversation = conversation
                .as_ref()
                .ok_or_else(|| MteError::validation("missing X-ClientId header"))?;
            self.server.authorize(conversation, request.bearer_token())?;
        }

        let data = self
            .server
            .upload(conversation.as_ref(), mode, name, &request.body)
            .await?;
        ApiResponse::ok(&Envelope::success(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::PendingHandshake;
    use mte_crypto::CipherParams;
    use std::time::Duration;

    fn config(dir: &Path) -> ServerConfig {
        ServerConfig {
            upload_dir: dir.to_path_buf(),
            ..ServerConfig::default()
        }
    }

    fn connect(server: &SessionServer<impl StateStore>, id: &str) -> (ConversationId, ChannelPair) {
        let conversation = ConversationId::new(id).unwrap();
        let pending = PendingHandshake::new(conversation.clone());
        let response = server.handshake(&pending.request()).unwrap();
        let channels = pending.complete(&response, CipherParams::default()).unwrap();
        (conversation, channels)
    }

    fn encode_b64(channels: &mut ChannelPair, text: &[u8]) -> String {
        STANDARD.encode(channels.encoder.encode(text).unwrap())
    }

    fn decode_b64(channels: &mut ChannelPair, data: &str) -> String {
        let bytes = STANDARD.decode(data).unwrap();
        String::from_utf8(channels.decoder.decode(&bytes).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_handshake_caches_both_channels() {
        let dir = tempfile::tempdir().unwrap();
        let server = SessionServer::in_memory(config(dir.path())).unwrap();
        let (conversation, _) = connect(&server, "cache");

        let inner = server.store().inner();
        assert!(inner.contains(&StateKey::encoder(&conversation)));
        assert!(inner.contains(&StateKey::decoder(&conversation)));
        assert_eq!(server.store().len(), 2);
    }

    #[tokio::test]
    async fn test_echo_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let server = SessionServer::in_memory(config(dir.path())).unwrap();
        let (conversation, mut channels) = connect(&server, "echo");

        for msg in ["hello", "", "second message"] {
            let body = encode_b64(&mut channels, msg.as_bytes());
            let data = server.echo(&conversation, &body).unwrap();
            assert_eq!(decode_b64(&mut channels, &data), msg);
        }
    }

    #[tokio::test]
    async fn test_failed_decode_keeps_last_good_state() {
        let dir = tempfile::tempdir().unwrap();
        let server = SessionServer::in_memory(config(dir.path())).unwrap();
        let (conversation, mut channels) = connect(&server, "lkg");

        let garbage = STANDARD.encode([0u8; 40]);
        assert!(matches!(
            server.echo(&conversation, &garbage),
            Err(MteError::Decode(_))
        ));
        assert_eq!(server.store().len(), 2);

        let body = encode_b64(&mut channels, b"still works");
        let data = server.echo(&conversation, &body).unwrap();
        assert_eq!(decode_b64(&mut channels, &data), "still works");
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_state_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let server = SessionServer::in_memory(config(dir.path())).unwrap();
        let stranger = ConversationId::new("stranger").unwrap();
        let err = server.echo(&stranger, &STANDARD.encode(b"x")).unwrap_err();
        assert!(err.triggers_rehandshake());
    }

    #[tokio::test]
    async fn test_login_issues_token() {
        let dir = tempfile::tempdir().unwrap();
        let server = SessionServer::in_memory(config(dir.path())).unwrap();
        let (conversation, mut channels) = connect(&server, "login");

        let creds = serde_json::to_vec(&Credentials {
            user_name: "alice".into(),
            password: "secret".into(),
        })
        .unwrap();
        let (data, token) = server
            .login(&conversation, &encode_b64(&mut channels, &creds))
            .unwrap();
        assert_eq!(decode_b64(&mut channels, &data), LOGIN_SUCCESS);
        assert_eq!(token.len(), 64);
        assert!(server.authorize(&conversation, Some(&token)).is_ok());

        let other = ConversationId::new("other").unwrap();
        assert!(matches!(
            server.authorize(&other, Some(&token)),
            Err(MteError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_login_rejects_empty_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let server = SessionServer::in_memory(config(dir.path())).unwrap();
        let (conversation, mut channels) = connect(&server, "empty-login");

        let before = channels.save().unwrap();
        let creds = br#"{"UserName":"","Password":""}"#;
        assert!(matches!(
            server.login(&conversation, &encode_b64(&mut channels, creds)),
            Err(MteError::Validation(_))
        ));

        // Neither server channel moved, so the pre-request state still pairs
        let mut channels = ChannelPair::restore(CipherParams::default(), &before).unwrap();
        let body = encode_b64(&mut channels, b"after");
        let data = server.echo(&conversation, &body).unwrap();
        assert_eq!(decode_b64(&mut channels, &data), "after");
    }

    #[tokio::test]
    async fn test_upload_sanitizes_name() {
        let dir = tempfile::tempdir().unwrap();
        let server = SessionServer::in_memory(config(dir.path())).unwrap();

        let summary = server
            .upload(None, UploadMode::Plain, "../../etc/evil.txt", b"plain bytes")
            .await
            .unwrap();
        assert!(summary.starts_with("evil.txt: 11 bytes"));
        assert_eq!(std::fs::read(dir.path().join("evil.txt")).unwrap(), b"plain bytes");

        assert!(matches!(
            server.upload(None, UploadMode::Plain, "..", b"x").await,
            Err(MteError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_commit_after_rehandshake_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let server = SessionServer::in_memory(config(dir.path())).unwrap();
        let (conversation, _) = connect(&server, "race");

        let checkout = server.checkout(&conversation).unwrap();
        let (_, mut fresh) = connect(&server, "race");
        assert!(matches!(checkout.commit(), Err(MteError::StateNotFound(_))));

        let body = encode_b64(&mut fresh, b"fresh channels");
        let data = server.echo(&conversation, &body).unwrap();
        assert_eq!(decode_b64(&mut fresh, &data), "fresh channels");
    }

    #[tokio::test]
    async fn test_abandoned_checkout_after_rehandshake_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let server = SessionServer::in_memory(config(dir.path())).unwrap();
        let (conversation, _) = connect(&server, "abandoned");

        let checkout = server.checkout(&conversation).unwrap();
        let (_, mut fresh) = connect(&server, "abandoned");
        drop(checkout);

        let body = encode_b64(&mut fresh, b"still fresh");
        let data = server.echo(&conversation, &body).unwrap();
        assert_eq!(decode_b64(&mut fresh, &data), "still fresh");
    }

    #[tokio::test]
    async fn test_login_replaces_previous_token() {
        let dir = tempfile::tempdir().unwrap();
        let server = SessionServer::in_memory(config(dir.path())).unwrap();
        let (conversation, mut channels) = connect(&server, "relogin");
        let creds = br#"{"UserName":"bob","Password":"pw"}"#;

        let mut tokens = Vec::new();
        for _ in 0..3 {
            let (data, token) = server
                .login(&conversation, &encode_b64(&mut channels, creds))
                .unwrap();
            decode_b64(&mut channels, &data);
            tokens.push(token);
        }

        assert_eq!(server.token_count(), 1);
        assert!(server.authorize(&conversation, Some(&tokens[2])).is_ok());
        assert!(matches!(
            server.authorize(&conversation, Some(&tokens[0])),
            Err(MteError::Unauthorized(_))
        ));

        // A reseed handshake keeps the login
        connect(&server, "relogin");
        assert!(server.authorize(&conversation, Some(&tokens[2])).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_purges_expired_conversations() {
        let dir = tempfile::tempdir().unwrap();
        let server = SessionServer::in_memory(ServerConfig {
            state_ttl: Duration::from_secs(1),
            ..config(dir.path())
        })
        .unwrap();

        let (conversation, mut channels) = connect(&server, "idle-0");
        let creds = br#"{"UserName":"carol","Password":"pw"}"#;
        server
            .login(&conversation, &encode_b64(&mut channels, creds))
            .unwrap();
        for i in 1..20 {
            connect(&server, &format!("idle-{i}"));
        }
        assert_eq!(server.conversation_count(), 20);

        tokio::time::advance(Duration::from_secs(5)).await;
        connect(&server, "fresh");

        // The handshake already swept everything stale
        assert_eq!(server.store().purge_expired(), 0);
        assert_eq!(server.store().len(), 2);
        assert_eq!(server.conversation_count(), 1);
        assert_eq!(server.token_count(), 0);
    }

    #[tokio::test]
    async fn test_truncated_upload_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let server = SessionServer::in_memory(config(dir.path())).unwrap();
        let (conversation, mut channels) = connect(&server, "partial");
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();

        let before = channels.save().unwrap();
        let mut wire = channels.encoder.encode(&data).unwrap();
        wire.truncate(wire.len() - 100);
        assert!(matches!(
            server
                .upload(Some(&conversation), UploadMode::Mte, "big.bin", &wire)
                .await,
            Err(MteError::Decode(_))
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let mut channels = ChannelPair::restore(CipherParams::default(), &before).unwrap();
        let wire = channels.encoder.encode(&data).unwrap();
        let summary = server
            .upload(Some(&conversation), UploadMode::Mte, "big.bin", &wire)
            .await
            .unwrap();
        assert!(decode_b64(&mut channels, &summary).starts_with("big.bin: 3000 bytes"));

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, ["big.bin"]);
        assert_eq!(std::fs::read(dir.path().join("big.bin")).unwrap(), data);
    }
}
