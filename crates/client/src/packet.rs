//! Wire model for the dialogue protocol.
//!
//! Outbound messages are individually-addressed packets; inbound messages
//! arrive as an envelope wrapping a single result packet. The payload is an
//! externally-tagged variant flattened into the packet object, so the JSON
//! shape is `{"packetId": …, "routing": …, "text": {…}}` and so on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifiers carried by every packet.
///
/// `packet_id` is unique per packet, `interaction_id` groups one dialogue
/// turn, `utterance_id` identifies a sub-utterance within the turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketId {
    pub packet_id: String,
    pub interaction_id: String,
    pub utterance_id: String,
}

/// One side of a routing pair: the player or a character.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub is_player: bool,
    pub is_character: bool,
}

impl Actor {
    pub fn player() -> Self {
        Self {
            name: None,
            is_player: true,
            is_character: false,
        }
    }

    pub fn character(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            is_player: false,
            is_character: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Routing {
    pub source: Actor,
    pub target: Actor,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextPayload {
    pub text: String,
    /// Interim recognition results arrive with `final: false` and are later
    /// superseded by a final packet with the same utterance id.
    #[serde(rename = "final")]
    pub is_final: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioPayload {
    /// Base64-encoded audio chunk.
    pub chunk: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelPayload {
    pub interaction_id: String,
    pub utterance_ids: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlAction {
    InteractionEnd,
    Warning,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPayload {
    pub action: ControlAction,
}

/// The packet body: exactly one payload variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Payload {
    Text(TextPayload),
    DataChunk(AudioPayload),
    #[serde(rename = "cancelResponses")]
    Cancellation(CancelPayload),
    Control(ControlPayload),
}

/// A protocol packet, outbound event or inbound message alike.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    pub packet_id: PacketId,
    pub routing: Routing,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Packet {
    pub fn is_text(&self) -> bool {
        matches!(self.payload, Payload::Text(_))
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.payload, Payload::DataChunk(_))
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self.payload, Payload::Cancellation(_))
    }

    pub fn is_control(&self) -> bool {
        matches!(self.payload, Payload::Control(_))
    }

    /// Final player text, i.e. a completed user utterance.
    pub fn is_final_player_text(&self) -> bool {
        match &self.payload {
            Payload::Text(text) => text.is_final && self.routing.source.is_player,
            _ => false,
        }
    }

    pub fn interaction_id(&self) -> &str {
        &self.packet_id.interaction_id
    }

    pub fn utterance_id(&self) -> &str {
        &self.packet_id.utterance_id
    }
}

/// Envelope wrapping every inbound message.
#[derive(Clone, Debug, Deserialize)]
pub struct Envelope {
    pub result: Packet,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_id() -> PacketId {
        PacketId {
            packet_id: "p-1".to_string(),
            interaction_id: "i-1".to_string(),
            utterance_id: "u-1".to_string(),
        }
    }

    fn routing() -> Routing {
        Routing {
            source: Actor::player(),
            target: Actor::character("librarian"),
        }
    }

    #[test]
    fn test_text_packet_wire_shape() {
        let packet = Packet {
            packet_id: packet_id(),
            routing: routing(),
            timestamp: Utc::now(),
            payload: Payload::Text(TextPayload {
                text: "hello".to_string(),
                is_final: true,
            }),
        };

        let json = serde_json::to_value(&packet).unwrap();
        assert_eq!(json["text"]["text"], "hello");
        assert_eq!(json["text"]["final"], true);
        assert_eq!(json["packetId"]["interactionId"], "i-1");
        assert_eq!(json["routing"]["source"]["isPlayer"], true);
    }

    #[test]
    fn test_cancellation_packet_wire_shape() {
        let packet = Packet {
            packet_id: packet_id(),
            routing: routing(),
            timestamp: Utc::now(),
            payload: Payload::Cancellation(CancelPayload {
                interaction_id: "i-9".to_string(),
                utterance_ids: vec!["u-9".to_string()],
            }),
        };

        let json = serde_json::to_value(&packet).unwrap();
        assert_eq!(json["cancelResponses"]["interactionId"], "i-9");
    }

    #[test]
    fn test_envelope_deserializes_and_defaults_timestamp() {
        let json = r#"{
            "result": {
                "packetId": {"packetId": "p", "interactionId": "i", "utteranceId": "u"},
                "routing": {
                    "source": {"name": "librarian", "isPlayer": false, "isCharacter": true},
                    "target": {"isPlayer": true, "isCharacter": false}
                },
                "text": {"text": "well met", "final": false}
            }
        }"#;

        let envelope: Envelope = serde_json::from_str(json).unwrap();
        let packet = envelope.result;
        assert!(packet.is_text());
        assert!(!packet.is_final_player_text());
        assert_eq!(packet.routing.source.name.as_deref(), Some("librarian"));
    }

    #[test]
    fn test_control_action_round_trip() {
        let json = serde_json::to_string(&ControlAction::InteractionEnd).unwrap();
        assert_eq!(json, "\"INTERACTION_END\"");

        let parsed: ControlAction = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(parsed, ControlAction::Unknown);
    }
}
