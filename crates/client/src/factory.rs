//! Outbound packet construction.

use crate::packet::{
    Actor, AudioPayload, CancelPayload, Packet, PacketId, Payload, Routing, TextPayload,
};
use crate::scene::Character;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Utc;
use std::sync::Mutex;
use uuid::Uuid;

/// Builds outbound packets with fresh identifiers and the current routing
/// target. The target defaults to the first character of the loaded scene
/// and can be switched at any time.
#[derive(Default)]
pub struct EventFactory {
    current: Mutex<Option<Character>>,
}

impl EventFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_character(&self) -> Option<Character> {
        self.current.lock().unwrap().clone()
    }

    pub fn set_current_character(&self, character: Character) {
        *self.current.lock().unwrap() = Some(character);
    }

    /// A user text event, always final.
    pub fn text(&self, text: impl Into<String>) -> Packet {
        self.packet(Payload::Text(TextPayload {
            text: text.into(),
            is_final: true,
        }))
    }

    /// A user audio chunk event.
    pub fn audio_chunk(&self, chunk: &[u8]) -> Packet {
        self.packet(Payload::DataChunk(AudioPayload {
            chunk: STANDARD.encode(chunk),
            transcript: None,
        }))
    }

    /// A control packet requesting backend-side cancellation of generation
    /// for the given interaction.
    pub fn cancel_response(
        &self,
        interaction_id: impl Into<String>,
        utterance_ids: Vec<String>,
    ) -> Packet {
        self.packet(Payload::Cancellation(CancelPayload {
            interaction_id: interaction_id.into(),
            utterance_ids,
        }))
    }

    fn packet(&self, payload: Payload) -> Packet {
        Packet {
            packet_id: Self::fresh_packet_id(),
            routing: self.routing(),
            timestamp: Utc::now(),
            payload,
        }
    }

    fn fresh_packet_id() -> PacketId {
        PacketId {
            packet_id: Uuid::new_v4().to_string(),
            interaction_id: Uuid::new_v4().to_string(),
            utterance_id: Uuid::new_v4().to_string(),
        }
    }

    fn routing(&self) -> Routing {
        let target = match self.current_character() {
            Some(character) => Actor::character(character.id),
            None => Actor {
                name: None,
                is_player: false,
                is_character: true,
            },
        };
        Routing {
            source: Actor::player(),
            target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn character(id: &str) -> Character {
        Character {
            id: id.to_string(),
            name: id.to_string(),
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_text_packets_get_unique_ids() {
        let factory = EventFactory::new();

        let first = factory.text("one");
        let second = factory.text("two");

        assert_ne!(first.packet_id.packet_id, second.packet_id.packet_id);
        assert_ne!(first.packet_id.interaction_id, second.packet_id.interaction_id);
        assert!(first.is_final_player_text());
    }

    #[test]
    fn test_routing_targets_current_character() {
        let factory = EventFactory::new();
        factory.set_current_character(character("c-7"));

        let packet = factory.text("hello");

        assert_eq!(packet.routing.target.name.as_deref(), Some("c-7"));
        assert!(packet.routing.source.is_player);
    }

    #[test]
    fn test_audio_chunk_is_base64() {
        let factory = EventFactory::new();

        let packet = factory.audio_chunk(&[1, 2, 3]);

        match packet.payload {
            Payload::DataChunk(audio) => assert_eq!(audio.chunk, STANDARD.encode([1, 2, 3])),
            other => panic!("expected audio payload, got {other:?}"),
        }
    }

    #[test]
    fn test_cancellation_carries_interaction() {
        let factory = EventFactory::new();

        let packet = factory.cancel_response("i-3", vec!["u-1".to_string()]);

        match packet.payload {
            Payload::Cancellation(cancel) => {
                assert_eq!(cancel.interaction_id, "i-3");
                assert_eq!(cancel.utterance_ids, vec!["u-1".to_string()]);
            }
            other => panic!("expected cancellation payload, got {other:?}"),
        }
    }
}
