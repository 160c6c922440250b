//! Session tokens and their acquisition.

use crate::error::ClientError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Deserialize;
use tracing::debug;

/// Short-lived credential authorizing one transport session.
///
/// A token is usable only while `now < expiration_time`; the session never
/// opens a transport with an expired token and will request a fresh one
/// instead.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionToken {
    pub session_id: String,
    pub token: SecretString,
    #[serde(rename = "type")]
    pub token_type: String,
    pub expiration_time: DateTime<Utc>,
}

impl SessionToken {
    /// True while the token has not expired.
    pub fn is_valid(&self) -> bool {
        Utc::now() < self.expiration_time
    }
}

/// Collaborator that mints session tokens.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenGenerator: Send + Sync {
    async fn generate(&self) -> Result<SessionToken, ClientError>;
}

/// Token generator backed by a caller-operated token endpoint.
///
/// The endpoint returns a JSON session token; keeping the signing key on the
/// caller's side means the client never sees long-lived credentials.
pub struct RemoteTokenGenerator {
    client: reqwest::Client,
    url: String,
}

impl RemoteTokenGenerator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl TokenGenerator for RemoteTokenGenerator {
    async fn generate(&self) -> Result<SessionToken, ClientError> {
        debug!(url = %self.url, "Requesting session token");
        let token = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| ClientError::Token(e.to_string()))?
            .json::<SessionToken>()
            .await
            .map_err(|e| ClientError::Token(e.to_string()))?;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token_expiring_in(minutes: i64) -> SessionToken {
        SessionToken {
            session_id: "session-1".to_string(),
            token: SecretString::from("opaque-token"),
            token_type: "Bearer".to_string(),
            expiration_time: Utc::now() + Duration::minutes(minutes),
        }
    }

    #[test]
    fn test_fresh_token_is_valid() {
        assert!(token_expiring_in(30).is_valid());
    }

    #[test]
    fn test_expired_token_is_invalid() {
        assert!(!token_expiring_in(-1).is_valid());
    }

    #[test]
    fn test_deserializes_wire_shape() {
        let json = r#"{
            "sessionId": "abc",
            "token": "secret-value",
            "type": "Bearer",
            "expirationTime": "2030-01-01T00:00:00Z"
        }"#;

        let token: SessionToken = serde_json::from_str(json).unwrap();
        assert_eq!(token.session_id, "abc");
        assert_eq!(token.token_type, "Bearer");
        assert!(token.is_valid());
    }
}
