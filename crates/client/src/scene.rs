//! Scene and character roster loading.

use crate::config::{Capabilities, UserProfile};
use crate::error::ClientError;
use crate::token::SessionToken;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// A character the player can converse with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Ordered roster of characters for one scene.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub characters: Vec<Character>,
}

/// Everything the catalog service needs to resolve a scene.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneRequest {
    pub name: String,
    pub capabilities: Capabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

/// Collaborator that fetches the character roster for a scene.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SceneLoader: Send + Sync {
    async fn load_scene(
        &self,
        request: SceneRequest,
        session: SessionToken,
    ) -> Result<Scene, ClientError>;
}

/// Scene loader backed by the gateway's catalog endpoint.
pub struct HttpSceneLoader {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSceneLoader {
    pub fn new(hostname: impl Into<String>, ssl: bool) -> Self {
        let scheme = if ssl { "https" } else { "http" };
        Self {
            client: reqwest::Client::new(),
            base_url: format!("{scheme}://{}", hostname.into()),
        }
    }
}

#[async_trait]
impl SceneLoader for HttpSceneLoader {
    async fn load_scene(
        &self,
        request: SceneRequest,
        session: SessionToken,
    ) -> Result<Scene, ClientError> {
        let url = format!("{}/v1/scenes/{}:load", self.base_url, request.name);
        let scene = self
            .client
            .post(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("{} {}", session.token_type, session.token.expose_secret()),
            )
            .header("X-Session-Id", &session.session_id)
            .json(&request)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| ClientError::SceneLoad(e.to_string()))?
            .json::<Scene>()
            .await
            .map_err(|e| ClientError::SceneLoad(e.to_string()))?;

        info!(
            scene = %request.name,
            characters = scene.characters.len(),
            "Scene loaded"
        );
        Ok(scene)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_deserializes_roster_in_order() {
        let json = r#"{
            "characters": [
                {"id": "c-1", "name": "Archivist", "attributes": {"mood": "stern"}},
                {"id": "c-2", "name": "Cartographer"}
            ]
        }"#;

        let scene: Scene = serde_json::from_str(json).unwrap();
        let ids: Vec<&str> = scene.characters.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c-1", "c-2"]);
        assert_eq!(
            scene.characters[0].attributes.get("mood").map(String::as_str),
            Some("stern")
        );
        assert!(scene.characters[1].attributes.is_empty());
    }

    #[test]
    fn test_scene_request_serializes_camel_case() {
        let request = SceneRequest {
            name: "atrium".to_string(),
            capabilities: Capabilities::default(),
            user: Some(UserProfile {
                id: None,
                full_name: "Quinn".to_string(),
            }),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["name"], "atrium");
        assert_eq!(json["user"]["fullName"], "Quinn");
        assert_eq!(json["capabilities"]["interruptions"], true);
    }
}
