//! ECDH handshake pairing two one-way channels.
//!
//! # Handshake Flow
//!
//! ```text
//! Client                                            Server
//!   |  gen (CE, CD)                                   |
//!   |--- { id, ClientEncoderPK=CE, ClientDecoderPK=CD } ->|
//!   |                                   gen (SE, SD)  |
//!   |                    secret_SE = ECDH(SE, CD)     |
//!   |                    secret_SD = ECDH(SD, CE)     |
//!   |                    nonce = now (µs)             |
//!   |<-- { id, ClientEncoderPK=SD, ClientDecoderPK=SE, Timestamp=nonce } --|
//!   |  secret_CE = ECDH(CE, SD) == secret_SD          |
//!   |  secret_CD = ECDH(CD, SE) == secret_SE          |
//! ```
//!
//! In the response each key field carries the server key that the client
//! channel of the same name pairs with. Both sides then instantiate every
//! channel with `(personalization = id, nonce, entropy = secret)`.
//!
//! A handshake is all-or-nothing: channels are only returned once every step
//! has succeeded.

use crate::channel::ChannelPair;
use crate::conversation::ConversationId;
use crate::error::{MteError, Result};
use mte_crypto::{
    CipherParams, KeyPair, MteDecoder, MteEncoder, PublicKeyBytes, SessionCipher, SharedSecret,
};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Width of the rendered nonce
pub const NONCE_WIDTH: usize = 20;

/// Handshake request and response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HandshakeMessage {
    /// Client-chosen conversation identifier
    pub conversation_identifier: ConversationId,
    /// Request: client encoder key. Response: server decoder key.
    pub client_encoder_public_key: PublicKeyBytes,
    /// Request: client decoder key. Response: server encoder key.
    pub client_decoder_public_key: PublicKeyBytes,
    /// Response only: nonce as a fixed-width decimal string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Current time in microseconds since the Unix epoch
#[must_use]
pub fn nonce_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
}

/// Render a nonce for the wire
#[must_use]
pub fn format_nonce(nonce: u64) -> String {
    format!("{nonce:0width$}", width = NONCE_WIDTH)
}

/// Parse a nonce received from the wire
///
/// # Errors
///
/// Returns [`MteError::InvalidNonce`] unless the text is an unsigned 64-bit
/// decimal integer.
pub fn parse_nonce(text: &str) -> Result<u64> {
    text.parse::<u64>()
        .map_err(|_| MteError::InvalidNonce(text.to_string()))
}

fn instantiate_pair(
    conversation: &ConversationId,
    nonce: u64,
    params: CipherParams,
    encoder_secret: &SharedSecret,
    decoder_secret: &SharedSecret,
) -> Result<ChannelPair> {
    let mut encoder = MteEncoder::new(params);
    encoder.instantiate(conversation.personalization(), nonce, encoder_secret.as_bytes())?;

    let mut decoder = MteDecoder::new(params);
    decoder.instantiate(conversation.personalization(), nonce, decoder_secret.as_bytes())?;

    Ok(ChannelPair { encoder, decoder })
}

/// Client half of a handshake in flight
///
/// Holds the two private keys; they are consumed by [`PendingHandshake::complete`].
#[derive(Debug)]
pub struct PendingHandshake {
    conversation: ConversationId,
    encoder_keys: KeyPair,
    decoder_keys: KeyPair,
}

impl PendingHandshake {
    /// Generate one key pair per channel
    #[must_use]
    pub fn new(conversation: ConversationId) -> Self {
        Self {
            conversation,
            encoder_keys: KeyPair::generate(),
            decoder_keys: KeyPair::generate(),
        }
    }

    /// Conversation being established
    #[must_use]
    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    /// Request body to send to the server
    #[must_use]
    pub fn request(&self) -> HandshakeMessage {
        HandshakeMessage {
            conversation_identifier: self.conversation.clone(),
            client_encoder_public_key: self.encoder_keys.public_key().clone(),
            client_decoder_public_key: self.decoder_keys.public_key().clone(),
            timestamp: None,
        }
    }

    /// Finish with the server's response and instantiate both channels
    ///
    /// # Errors
    ///
    /// - [`MteError::Validation`] if the response echoes another conversation
    /// - [`MteError::InvalidNonce`] if the nonce is missing or non-numeric
    /// - [`MteError::KeyFormat`] if a server key is malformed
    /// - [`MteError::Instantiate`] if the cipher rejects the derived entropy
    pub fn complete(self, response: &HandshakeMessage, params: CipherParams) -> Result<ChannelPair> {
        if response.conversation_identifier != self.conversation {
            return Err(MteError::validation(
                "handshake response is for another conversation",
            ));
        }
        let nonce_text = response
            .timestamp
            .as_deref()
            .ok_or_else(|| MteError::InvalidNonce(String::new()))?;
        let nonce = parse_nonce(nonce_text)?;

        let encoder_secret = self
            .encoder_keys
            .derive_shared_secret(response.client_encoder_public_key.as_bytes())?;
        let decoder_secret = self
            .decoder_keys
            .derive_shared_secret(response.client_decoder_public_key.as_bytes())?;

        let channels = instantiate_pair(
            &self.conversation,
            nonce,
            params,
            &encoder_secret,
            &decoder_secret,
        )?;

        debug!(conversation = self.conversation.short(), nonce, "client channels instantiated");
        Ok(channels)
    }
}

/// Server result of answering a handshake
#[derive(Debug)]
pub struct ServerHandshake {
    /// Response body
    pub response: HandshakeMessage,
    /// Server channels, ready to be cached
    pub channels: ChannelPair,
    /// Nonce shared by both channels
    pub nonce: u64,
}

/// Answer a client handshake
///
/// # Errors
///
/// Returns [`MteError::KeyFormat`] if a client key is malformed and
/// [`MteError::Instantiate`] if the cipher rejects the derived entropy.
pub fn respond(
    request: &HandshakeMessage,
    params: CipherParams,
    nonce: u64,
) -> Result<ServerHandshake> {
    let encoder_keys = KeyPair::generate();
    let decoder_keys = KeyPair::generate();
    let encoder_public = encoder_keys.public_key().clone();
    let decoder_public = decoder_keys.public_key().clone();

    // Server encoder feeds the client decoder and vice versa
    let encoder_secret =
        encoder_keys.derive_shared_secret(request.client_decoder_public_key.as_bytes())?;
    let decoder_secret =
        decoder_keys.derive_shared_secret(request.client_encoder_public_key.as_bytes())?;

    let conversation = &request.conversation_identifier;
    let channels = instantiate_pair(conversation, nonce, params, &encoder_secret, &decoder_secret)?;

    info!(conversation = conversation.short(), nonce, "handshake answered");

    Ok(ServerHandshake {
        response: HandshakeMessage {
            conversation_identifier: conversation.clone(),
            client_encoder_public_key: decoder_public,
            client_decoder_public_key: encoder_public,
            timestamp: Some(format_nonce(nonce)),
        },
        channels,
        nonce,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv(id: &str) -> ConversationId {
        ConversationId::new(id).unwrap()
    }

    #[test]
    fn test_nonce_format_and_parse() {
        assert_eq!(format_nonce(42), "00000000000000000042");
        assert_eq!(format_nonce(u64::MAX).len(), NONCE_WIDTH);
        assert_eq!(parse_nonce("00000000000000000042").unwrap(), 42);
        assert_eq!(parse_nonce(&format_nonce(u64::MAX)).unwrap(), u64::MAX);
        for bad in ["", "abc", "-1", "12.5", "18446744073709551616"] {
            assert!(
                matches!(parse_nonce(bad), Err(MteError::InvalidNonce(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_nonce_now_is_microseconds() {
        // Later than 2020-01-01 in µs
        assert!(nonce_now() > 1_577_836_800_000_000);
    }

    #[test]
    fn test_cross_pairing_both_directions() {
        let pending = PendingHandshake::new(conv("pair-test"));
        let server = respond(&pending.request(), CipherParams::default(), 1234).unwrap();
        let mut client = pending
            .complete(&server.response, CipherParams::default())
            .unwrap();
        let mut server_channels = server.channels;

        let up = client.encoder.encode(b"client to server").unwrap();
        assert_eq!(server_channels.decoder.decode(&up).unwrap(), b"client to server");

        let down = server_channels.encoder.encode(b"server to client").unwrap();
        assert_eq!(client.decoder.decode(&down).unwrap(), b"server to client");
    }

    #[test]
    fn test_channels_are_independent() {
        let pending = PendingHandshake::new(conv("independent"));
        let server = respond(&pending.request(), CipherParams::default(), 1).unwrap();
        let mut client = pending
            .complete(&server.response, CipherParams::default())
            .unwrap();

        // Client encoder output must not open on the client's own decoder
        let up = client.encoder.encode(b"one way").unwrap();
        assert!(client.decoder.decode(&up).is_err());
    }

    #[test]
    fn test_response_wire_shape() {
        let pending = PendingHandshake::new(conv("wire"));
        let server = respond(&pending.request(), CipherParams::default(), 99).unwrap();
        let json = serde_json::to_value(&server.response).unwrap();

        assert_eq!(json["ConversationIdentifier"], "wire");
        assert_eq!(json["Timestamp"], "00000000000000000099");
        assert!(json["ClientEncoderPublicKey"].is_string());
        assert!(json["ClientDecoderPublicKey"].is_string());

        let request = serde_json::to_value(pending.request()).unwrap();
        assert!(request.get("Timestamp").is_none());
    }

    #[test]
    fn test_non_numeric_nonce_aborts() {
        let pending = PendingHandshake::new(conv("bad-nonce"));
        let mut server = respond(&pending.request(), CipherParams::default(), 5).unwrap();
        server.response.timestamp = Some("not-a-number".into());

        assert!(matches!(
            pending.complete(&server.response, CipherParams::default()),
            Err(MteError::InvalidNonce(_))
        ));
    }

    #[test]
    fn test_missing_nonce_aborts() {
        let pending = PendingHandshake::new(conv("no-nonce"));
        let mut server = respond(&pending.request(), CipherParams::default(), 5).unwrap();
        server.response.timestamp = None;
        assert!(matches!(
            pending.complete(&server.response, CipherParams::default()),
            Err(MteError::InvalidNonce(_))
        ));
    }

    #[test]
    fn test_bad_client_key_rejected() {
        let pending = PendingHandshake::new(conv("bad-key"));
        let mut request = pending.request();
        request.client_encoder_public_key = PublicKeyBytes::from_vec(vec![4u8; 65]);
        assert!(matches!(
            respond(&request, CipherParams::default(), 1),
            Err(MteError::KeyFormat(_))
        ));

        request.client_encoder_public_key = PublicKeyBytes::from_vec(Vec::new());
        assert!(matches!(
            respond(&request, CipherParams::default(), 1),
            Err(MteError::KeyFormat(_))
        ));
    }

    #[test]
    fn test_response_for_other_conversation_rejected() {
        let pending = PendingHandshake::new(conv("mine"));
        let other = PendingHandshake::new(conv("theirs"));
        let server = respond(&other.request(), CipherParams::default(), 1).unwrap();
        assert!(matches!(
            pending.complete(&server.response, CipherParams::default()),
            Err(MteError::Validation(_))
        ));
    }

    #[test]
    fn test_short_min_entropy_violation() {
        let pending = PendingHandshake::new(conv("entropy"));
        let params = CipherParams {
            min_entropy_len: 64,
            ..CipherParams::default()
        };
        assert!(matches!(
            respond(&pending.request(), params, 1),
            Err(MteError::Instantiate(_))
        ));
    }
}
