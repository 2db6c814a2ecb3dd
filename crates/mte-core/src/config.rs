//! Server and client configuration

use crate::error::{MteError, Result};
use mte_crypto::CipherParams;
use mte_crypto::sealed::MIN_SECRET_LEN;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default sliding lifetime of cached channel state (60 minutes)
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(60 * 60);

/// Default client request timeout (5 minutes)
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Default reseed threshold, as a fraction of the reseed interval
pub const DEFAULT_RESEED_THRESHOLD: f64 = 0.9;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Inactivity timeout of cached channel state
    #[serde(rename = "state_ttl_secs", with = "duration_secs")]
    pub state_ttl: Duration,

    /// Directory receiving uploaded files
    pub upload_dir: PathBuf,

    /// Secret used to seal cached state at rest. `None` generates an
    /// ephemeral secret at startup.
    pub deployment_secret: Option<String>,

    /// Cipher constants
    pub cipher: CipherParams,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            state_ttl: DEFAULT_STATE_TTL,
            upload_dir: std::env::temp_dir().join("mte-uploads"),
            deployment_secret: None,
            cipher: CipherParams::default(),
        }
    }
}

impl ServerConfig {
    /// Check the configuration is usable
    ///
    /// # Errors
    ///
    /// Returns [`MteError::InvalidConfig`] for a zero TTL, a short deployment
    /// secret or unusable cipher constants.
    pub fn validate(&self) -> Result<()> {
        if self.state_ttl.is_zero() {
            return Err(MteError::InvalidConfig("state_ttl must be non-zero".into()));
        }
        if let Some(secret) = &self.deployment_secret {
            if secret.len() < MIN_SECRET_LEN {
                return Err(MteError::InvalidConfig(
                    format!("deployment_secret must be at least {MIN_SECRET_LEN} bytes").into(),
                ));
            }
        }
        self.cipher.validate()?;
        Ok(())
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Upload chunk size in bytes
    pub chunk_size: usize,

    /// Per-request timeout
    #[serde(rename = "request_timeout_secs", with = "duration_secs")]
    pub request_timeout: Duration,

    /// Fraction of the reseed interval after which the client re-handshakes
    pub reseed_threshold: f64,

    /// Cipher constants
    pub cipher: CipherParams,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chunk_size: mte_files::DEFAULT_CHUNK_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reseed_threshold: DEFAULT_RESEED_THRESHOLD,
            cipher: CipherParams::default(),
        }
    }
}

impl ClientConfig {
    /// Check the configuration is usable
    ///
    /// # Errors
    ///
    /// Returns [`MteError::InvalidConfig`] for a zero chunk size or timeout, a
    /// threshold outside `(0, 1)` or unusable cipher constants.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(MteError::InvalidConfig("chunk_size must be non-zero".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(MteError::InvalidConfig(
                "request_timeout must be non-zero".into(),
            ));
        }
        if !(self.reseed_threshold > 0.0 && self.reseed_threshold < 1.0) {
            return Err(MteError::InvalidConfig(
                format!(
                    "reseed_threshold must be in (0, 1), got {}",
                    self.reseed_threshold
                )
                .into(),
            ));
        }
        self.cipher.validate()?;
        Ok(())
    }
}

/// Durations as whole seconds in config files
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let server = ServerConfig::default();
        assert_eq!(server.state_ttl, Duration::from_secs(3600));
        assert!(server.validate().is_ok());

        let client = ClientConfig::default();
        assert_eq!(client.chunk_size, 1024);
        assert_eq!(client.request_timeout, Duration::from_secs(300));
        assert!((client.reseed_threshold - 0.9).abs() < f64::EPSILON);
        assert!(client.validate().is_ok());
    }

    #[test]
    fn test_server_rejects_bad_values() {
        let zero_ttl = ServerConfig {
            state_ttl: Duration::ZERO,
            ..ServerConfig::default()
        };
        assert!(matches!(zero_ttl.validate(), Err(MteError::InvalidConfig(_))));

        let short_secret = ServerConfig {
            deployment_secret: Some("too short".into()),
            ..ServerConfig::default()
        };
        assert!(short_secret.validate().is_err());

        let zero_interval = ServerConfig {
            cipher: CipherParams {
                reseed_interval: 0,
                ..CipherParams::default()
            },
            ..ServerConfig::default()
        };
        assert!(zero_interval.validate().is_err());
    }

    #[test]
    fn test_client_rejects_bad_values() {
        for threshold in [0.0, 1.0, 1.5, -0.1, f64::NAN] {
            let config = ClientConfig {
                reseed_threshold: threshold,
                ..ClientConfig::default()
            };
            assert!(config.validate().is_err(), "accepted {threshold}");
        }

        let zero_chunk = ClientConfig {
            chunk_size: 0,
            ..ClientConfig::default()
        };
        assert!(zero_chunk.validate().is_err());
    }

    #[test]
    fn test_serde_uses_seconds() {
        let json = serde_json::to_value(ClientConfig::default()).unwrap();
        assert_eq!(json["request_timeout_secs"], 300);

        let parsed: ServerConfig =
            serde_json::from_str(r#"{ "state_ttl_secs": 120 }"#).unwrap();
        assert_eq!(parsed.state_ttl, Duration::from_secs(120));
        assert_eq!(parsed.cipher, CipherParams::default());
    }
}
