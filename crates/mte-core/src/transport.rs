//! Transport abstraction between a [`SessionClient`](crate::client::SessionClient)
//! and the endpoints.
//!
//! The client only needs request/response exchange. An HTTP adapter maps
//! [`ApiRequest`] onto a real request; [`LoopbackTransport`] hands it
//! straight to a [`Router`] in the same process.

use crate::api::{ApiRequest, ApiResponse};
use crate::error::Result;
use crate::server::Router;
use crate::store::StateStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Request/response exchange with the endpoints.
///
/// Implementations report failures to reach the server as
/// [`MteError::Transport`](crate::MteError::Transport). A response with an
/// error envelope is a successful exchange.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and wait for its response.
    ///
    /// # Errors
    /// Returns `MteError::Transport` if the exchange fails
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;

    /// Get transport statistics (optional).
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        (**self).send(request).await
    }

    fn stats(&self) -> TransportStats {
        (**self).stats()
    }
}

/// Transport statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Requests sent
    pub requests: u64,
    /// Total request body bytes
    pub bytes_sent: u64,
    /// Total response body bytes
    pub bytes_received: u64,
}

/// In-process transport over a [`Router`]
pub struct LoopbackTransport<S: StateStore> {
    router: Router<S>,
    requests: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl<S: StateStore> LoopbackTransport<S> {
    /// Deliver requests to `router`
    pub fn new(router: Router<S>) -> Self {
        Self {
            router,
            requests: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    /// The router requests are delivered to
    pub fn router(&self) -> &Router<S> {
        &self.router
    }
}

#[async_trait]
impl<S: StateStore> Transport for LoopbackTransport<S> {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent
            .fetch_add(request.body.len() as u64, Ordering::Relaxed);

        let response = self.router.dispatch(request).await;

        self.bytes_received
            .fetch_add(response.body.len() as u64, Ordering::Relaxed);
        Ok(response)
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            requests: self.requests.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}
