//! # MTE Core
//!
//! Session protocol for paired MTE channels between a client and a
//! stateless server.
//!
//! This crate provides:
//! - The ECDH handshake establishing two one-way channels per conversation
//! - Server-side state storage with take-and-clear semantics and sliding expiry
//! - Threshold-driven reseeding
//! - Endpoints behind a JSON envelope router
//! - A client that recovers from lost server state
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────┐   ApiRequest / ApiResponse   ┌────────────────────┐
//! │   SessionClient    │ ───────── Transport ───────▶ │   Router           │
//! │  encoder  decoder  │                              │   SessionServer    │
//! │  (blobs, mutexed)  │                              │   StateStore       │
//! └────────────────────┘                              │  E-{id}   D-{id}   │
//!                                                     └────────────────────┘
//! ```
//!
//! The client's encoder pairs with the server's decoder and the server's
//! encoder with the client's decoder. Each pair shares one ECDH secret and
//! the handshake nonce.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod channel;
pub mod client;
pub mod config;
pub mod conversation;
pub mod envelope;
pub mod error;
pub mod handshake;
pub mod reseed;
pub mod server;
pub mod store;
pub mod transport;

pub use api::{ApiRequest, ApiResponse, Method, UploadMode};
pub use channel::{ChannelPair, ChannelUsage, SavedChannels};
pub use client::{ClientStats, SessionClient};
pub use config::{ClientConfig, ServerConfig};
pub use conversation::ConversationId;
pub use envelope::Envelope;
pub use error::{MteError, Result, ResultCode};
pub use handshake::{HandshakeMessage, PendingHandshake};
pub use reseed::ReseedCoordinator;
pub use server::{Router, SessionServer};
pub use store::{MemoryStateStore, SealedStateStore, StateKey, StateStore};
pub use transport::{LoopbackTransport, Transport, TransportStats};

/// Server store used by [`SessionServer::in_memory`]
pub type InMemoryStore = SealedStateStore<MemoryStateStore>;
