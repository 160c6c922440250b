//! Error taxonomy for the client.

/// Failures surfaced by the session client.
///
/// Configuration and state errors are produced locally without any network
/// attempt. Upstream errors (token generation, scene load, transport open)
/// carry the rendered cause so the error stays cloneable for callback
/// delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Connection is already open")]
    AlreadyActive,
    #[error("Unable to send data over an inactive connection")]
    Inactive,
    #[error("Session token request failed: {0}")]
    Token(String),
    #[error("Scene load failed: {0}")]
    SceneLoad(String),
    #[error("Transport failure: {0}")]
    Transport(String),
}
