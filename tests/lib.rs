//! Shared harness for the integration tests.
//!
//! Builds an in-process server with its own upload directory and hands out
//! clients connected to it, plus transports that misbehave on purpose.

use async_trait::async_trait;
use mte_core::{
    ApiRequest, ApiResponse, ClientConfig, ConversationId, InMemoryStore, LoopbackTransport,
    MteError, Router, ServerConfig, SessionClient, SessionServer, StateKey, StateStore, Transport,
};
use mte_crypto::CipherParams;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Client connected to a [`TestServer`] over the loopback transport
pub type TestClient = SessionClient<LoopbackTransport<InMemoryStore>>;

/// In-process server with a scratch upload directory
pub struct TestServer {
    /// Upload directory, removed on drop
    pub dir: TempDir,
    /// The server itself
    pub server: Arc<SessionServer<InMemoryStore>>,
    /// Router in front of the server
    pub router: Router<InMemoryStore>,
}

impl TestServer {
    /// Server with default settings
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Server with settings adjusted by `adjust`
    pub fn with_config(adjust: impl FnOnce(&mut ServerConfig)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = ServerConfig {
            upload_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        adjust(&mut config);

        let server = Arc::new(SessionServer::in_memory(config).expect("server config"));
        let router = Router::new(Arc::clone(&server));
        Self {
            dir,
            server,
            router,
        }
    }

    /// Server whose channels use `params`
    pub fn with_cipher(params: CipherParams) -> Self {
        Self::with_config(|config| config.cipher = params)
    }

    /// New client with default settings and the server's cipher constants
    pub fn client(&self) -> TestClient {
        self.client_with(ClientConfig::default())
    }

    /// New client with `config`; the cipher constants are taken from the server
    pub fn client_with(&self, mut config: ClientConfig) -> TestClient {
        config.cipher = self.server.config().cipher;
        SessionClient::new(config, LoopbackTransport::new(self.router.clone()))
            .expect("client config")
    }

    /// Drop both cached channels of `conversation`, as a restart would
    pub fn forget(&self, conversation: &ConversationId) {
        let store = self.server.store();
        let _ = store.take_and_clear(&StateKey::encoder(conversation));
        let _ = store.take_and_clear(&StateKey::decoder(conversation));
    }
}

impl Default for TestServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Delays every request before delivering it
pub struct SlowTransport<T> {
    inner: T,
    delay: Duration,
}

impl<T: Transport> SlowTransport<T> {
    /// Wrap `inner`, sleeping `delay` before each request
    pub fn new(inner: T, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<T: Transport> Transport for SlowTransport<T> {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, MteError> {
        tokio::time::sleep(self.delay).await;
        self.inner.send(request).await
    }
}

/// Delivers requests but can lose the next response on the way back
pub struct LossyTransport<T> {
    inner: T,
    drop_next: AtomicBool,
}

impl<T: Transport> LossyTransport<T> {
    /// Wrap `inner`
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            drop_next: AtomicBool::new(false),
        }
    }

    /// Lose the response of the next request after the server handled it
    pub fn drop_next_response(&self) {
        self.drop_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl<T: Transport> Transport for LossyTransport<T> {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, MteError> {
        let response = self.inner.send(request).await?;
        if self.drop_next.swap(false, Ordering::SeqCst) {
            return Err(MteError::transport("connection reset"));
        }
        Ok(response)
    }
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
