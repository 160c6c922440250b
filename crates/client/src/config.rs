//! Client configuration types.
//!
//! Everything the session needs at construction time is carried in
//! `ClientConfig`: connection settings for the gateway, the capability set
//! announced to the backend, and the caller's identity.

use crate::error::ClientError;
use serde::{Deserialize, Serialize};

/// Gateway endpoint the transport and scene loader talk to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayConfig {
    pub hostname: String,
    /// Use TLS (`wss`/`https`) when talking to the gateway.
    pub ssl: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            ssl: true,
        }
    }
}

/// Connection behavior of the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Reconnect (and lazily re-open on `send`) after a disconnect.
    pub auto_reconnect: bool,
    pub gateway: GatewayConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            gateway: GatewayConfig::default(),
        }
    }
}

/// Capability set announced to the backend on scene load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub audio: bool,
    pub interruptions: bool,
    pub emotions: bool,
    pub phonemes: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            audio: true,
            interruptions: true,
            emotions: false,
            phonemes: false,
        }
    }
}

/// Identity of the person driving the session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub full_name: String,
}

/// Top-level client configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    pub capabilities: Capabilities,
}

impl ClientConfig {
    /// Checks that the gateway is usable for the built-in collaborators.
    ///
    /// Only required when the default transport or scene loader is in play;
    /// injected collaborators may ignore the gateway entirely.
    pub fn validate_gateway(&self) -> Result<(), ClientError> {
        if self.connection.gateway.hostname.is_empty() {
            return Err(ClientError::Configuration(
                "Gateway hostname is not set".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_enable_audio_and_interruptions() {
        let config = ClientConfig::default();

        assert!(config.connection.auto_reconnect);
        assert!(config.capabilities.audio);
        assert!(config.capabilities.interruptions);
        assert!(!config.capabilities.emotions);
    }

    #[test]
    fn test_gateway_validation_rejects_empty_hostname() {
        let config = ClientConfig::default();

        let err = config.validate_gateway().unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[test]
    fn test_gateway_validation_accepts_hostname() {
        let mut config = ClientConfig::default();
        config.connection.gateway.hostname = "gateway.example.com".to_string();

        assert!(config.validate_gateway().is_ok());
    }

    #[test]
    fn test_capabilities_serialize_camel_case() {
        let json = serde_json::to_string(&Capabilities::default()).unwrap();

        assert!(json.contains("\"interruptions\":true"));
        assert!(json.contains("\"phonemes\":false"));
    }
}
