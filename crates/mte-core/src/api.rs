//! HTTP-shaped request and response values.
//!
//! The protocol is specified as JSON over HTTP; these types carry exactly
//! the parts of a request the endpoints read, so a real HTTP adapter is a
//! thin mapping and the in-process loopback needs no network.

use crate::conversation::ConversationId;
use crate::envelope::Envelope;
use crate::error::{MteError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;

/// Handshake endpoint
pub const HANDSHAKE_PATH: &str = "/api/handshake";
/// String echo endpoint
pub const ECHO_PATH: &str = "/api/echo";
/// Login endpoint
pub const LOGIN_PATH: &str = "/api/login";
/// Upload endpoint prefix, followed by `mte` or `nomte`
pub const UPLOAD_PREFIX: &str = "/FileUpload/";
/// Authenticated upload endpoint prefix, followed by `mte` or `nomte`
pub const UPLOAD_LOGIN_PREFIX: &str = "/FileUploadLogin/";

/// Header naming the conversation
pub const CLIENT_ID_HEADER: &str = "x-clientid";
/// Authorization header
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Request method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

/// Whether an upload body is cipher-encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// Chunk-encoded with the session encoder
    Mte,
    /// Raw bytes
    Plain,
}

impl UploadMode {
    /// Path segment of the mode
    #[must_use]
    pub fn segment(self) -> &'static str {
        match self {
            UploadMode::Mte => "mte",
            UploadMode::Plain => "nomte",
        }
    }

    /// Parse a path segment
    #[must_use]
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "mte" => Some(UploadMode::Mte),
            "nomte" => Some(UploadMode::Plain),
            _ => None,
        }
    }
}

/// Summary text answered for an upload
#[must_use]
pub fn upload_summary(name: &str, bytes: u64, hash_hex: &str) -> String {
    format!("{name}: {bytes} bytes, blake3 {hash_hex}")
}

/// Longest summary [`upload_summary`] can produce for `name`
#[must_use]
pub fn upload_summary_max_len(name: &str) -> usize {
    // ": " + u64 digits + " bytes, blake3 " + hex digest
    name.len() + 2 + 20 + 15 + 64
}

/// Incoming request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    /// Method
    pub method: Method,
    /// Path without query
    pub path: String,
    /// Decoded query parameters
    pub query: BTreeMap<String, String>,
    /// Headers, names lowercased
    pub headers: BTreeMap<String, String>,
    /// Raw body
    pub body: Vec<u8>,
}

impl ApiRequest {
    /// New request with an empty body
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    /// New POST request
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// Set a header (name is case-insensitive)
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Set a query parameter
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Set the body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a JSON body
    ///
    /// # Errors
    ///
    /// Returns [`MteError::Serialization`] if `value` fails to serialize.
    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.body = serde_json::to_vec(value)?;
        self.headers
            .insert("content-type".into(), "application/json".into());
        Ok(self)
    }

    /// Set the conversation header
    #[must_use]
    pub fn with_client_id(self, conversation: &ConversationId) -> Self {
        self.with_header(CLIENT_ID_HEADER, conversation.as_str())
    }

    /// Set a bearer credential
    #[must_use]
    pub fn with_bearer(self, token: &str) -> Self {
        self.with_header(AUTHORIZATION_HEADER, format!("Bearer {token}"))
    }

    /// Header value by case-insensitive name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Conversation named by the request
    ///
    /// # Errors
    ///
    /// Returns [`MteError::Validation`] if the header is missing or invalid.
    pub fn client_id(&self) -> Result<ConversationId> {
        let value = self
            .header(CLIENT_ID_HEADER)
            .ok_or_else(|| MteError::validation("missing X-ClientId header"))?;
        ConversationId::new(value)
    }

    /// Bearer credential, if present
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        self.header(AUTHORIZATION_HEADER)?
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// Body as UTF-8 text
    ///
    /// # Errors
    ///
    /// Returns [`MteError::Validation`] for non-UTF-8 bodies.
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.body).map_err(|_| MteError::validation("body is not UTF-8"))
    }
}

/// Outgoing response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP-style status
    pub status: u16,
    /// JSON envelope bytes
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// 200 response carrying a successful envelope
    ///
    /// # Errors
    ///
    /// Returns [`MteError::Serialization`] if the envelope fails to serialize.
    pub fn ok<T: Serialize>(envelope: &Envelope<T>) -> Result<Self> {
        Ok(Self {
            status: 200,
            body: envelope.to_json()?,
        })
    }

    /// Error response carrying a failed envelope
    #[must_use]
    pub fn from_error(err: &MteError) -> Self {
        // A unit envelope cannot fail to serialize
        let body = Envelope::<()>::failure(err).to_json().unwrap_or_default();
        Self {
            status: err.http_status(),
            body,
        }
    }

    /// Parse the envelope
    ///
    /// # Errors
    ///
    /// Returns [`MteError::Serialization`] for malformed JSON.
    pub fn envelope<T: DeserializeOwned>(&self) -> Result<Envelope<T>> {
        Envelope::from_json(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_are_case_insensitive() {
        let req = ApiRequest::post(ECHO_PATH).with_header("X-ClientId", "abc");
        assert_eq!(req.header("x-clientid"), Some("abc"));
        assert_eq!(req.header("X-CLIENTID"), Some("abc"));
        assert_eq!(req.client_id().unwrap().as_str(), "abc");
    }

    #[test]
    fn test_upload_summary_within_bound() {
        let text = upload_summary("report.pdf", u64::MAX, &"ab".repeat(32));
        assert_eq!(text.len(), upload_summary_max_len("report.pdf"));
        assert!(upload_summary("a", 0, &"0".repeat(64)).len() < upload_summary_max_len("a"));
    }

    #[test]
    fn test_missing_client_id() {
        let req = ApiRequest::post(ECHO_PATH);
        assert!(matches!(req.client_id(), Err(MteError::Validation(_))));
    }

    #[test]
    fn test_bearer_token() {
        let req = ApiRequest::post(LOGIN_PATH).with_bearer("tok123");
        assert_eq!(req.bearer_token(), Some("tok123"));

        let req = ApiRequest::post(LOGIN_PATH).with_header("Authorization", "Basic xyz");
        assert_eq!(req.bearer_token(), None);

        let req = ApiRequest::post(LOGIN_PATH).with_header("Authorization", "Bearer ");
        assert_eq!(req.bearer_token(), None);
    }

    #[test]
    fn test_upload_mode_segments() {
        assert_eq!(UploadMode::from_segment("mte"), Some(UploadMode::Mte));
        assert_eq!(UploadMode::from_segment("nomte"), Some(UploadMode::Plain));
        assert_eq!(UploadMode::from_segment("other"), None);
        assert_eq!(UploadMode::Plain.segment(), "nomte");
    }

    #[test]
    fn test_error_response() {
        let resp = ApiResponse::from_error(&MteError::unauthorized("no token"));
        assert_eq!(resp.status, 401);
        let env: Envelope<String> = resp.envelope().unwrap();
        assert!(!env.success);
    }
}
