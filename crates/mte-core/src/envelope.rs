//! Uniform JSON response envelope.
//!
//! ```json
//! { "Success": true, "Message": "", "ResultCode": "RC_SUCCESS", "Data": ..., "access_token": "..." }
//! ```

use crate::error::{MteError, Result, ResultCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Response envelope shared by every endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope<T> {
    /// Whether the operation succeeded
    pub success: bool,
    /// Human-readable status
    pub message: String,
    /// Machine-readable status
    pub result_code: ResultCode,
    /// Payload, absent on failure
    pub data: Option<T>,
    /// Bearer credential issued by login
    #[serde(
        rename = "access_token",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub access_token: Option<String>,
}

impl<T> Envelope<T> {
    /// Successful envelope carrying `data`
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            message: String::new(),
            result_code: ResultCode::Success,
            data: Some(data),
            access_token: None,
        }
    }

    /// Failed envelope describing `err`
    pub fn failure(err: &MteError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            result_code: err.result_code(),
            data: None,
            access_token: None,
        }
    }

    /// Attach a bearer credential
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Turn a received envelope back into a result
    ///
    /// # Errors
    ///
    /// Returns the error the envelope reports, or [`MteError::Serialization`]
    /// if a successful envelope carries no data.
    pub fn into_result(self) -> Result<(T, Option<String>)> {
        if !self.success {
            return Err(MteError::from_envelope(self.result_code, self.message));
        }
        let data = self
            .data
            .ok_or_else(|| MteError::Serialization("successful envelope without Data".into()))?;
        Ok((data, self.access_token))
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serialize to JSON bytes
    ///
    /// # Errors
    ///
    /// Returns [`MteError::Serialization`] if `T` fails to serialize.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Parse JSON bytes
    ///
    /// # Errors
    ///
    /// Returns [`MteError::Serialization`] for malformed JSON.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
