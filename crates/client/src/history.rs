//! Ordered, deduplicated dialogue transcript.

use crate::packet::{Actor, ControlAction, Packet, Payload};
use crate::scene::Character;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// Callback invoked with the full transcript snapshot on every mutation.
pub type HistoryCallback = Box<dyn Fn(Vec<HistoryItem>) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryKind {
    /// A spoken or typed utterance from the player or a character.
    Utterance,
    /// Marker row: the backend finished an interaction.
    InteractionEnd,
}

/// One transcript row, keyed by utterance id.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryItem {
    pub id: String,
    pub character: Option<Character>,
    pub date: DateTime<Utc>,
    pub interaction_id: String,
    /// Interim recognition entry, later replaced in place by the final
    /// entry carrying the same id.
    pub is_recognizing: bool,
    pub source: Actor,
    pub text: String,
    pub kind: HistoryKind,
}

/// Builds and maintains the transcript from outbound and inbound packets.
///
/// Update rule: upsert keyed by utterance id. An existing entry is replaced
/// in place, preserving its position, so interim recognition text morphs
/// into the final transcript without duplication; new entries append in
/// arrival order.
pub struct HistoryAggregator {
    items: Mutex<Vec<HistoryItem>>,
    on_change: Option<HistoryCallback>,
}

impl HistoryAggregator {
    pub fn new(on_change: Option<HistoryCallback>) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            on_change,
        }
    }

    /// Snapshot of the transcript in display order.
    pub fn get(&self) -> Vec<HistoryItem> {
        self.items.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.items.lock().unwrap().clear();
        self.notify(Vec::new());
    }

    /// Merges a display-worthy packet into the transcript. Returns false
    /// for packets that carry nothing to display.
    pub fn record_packet(&self, packet: &Packet, character: Option<Character>) -> bool {
        let item = match &packet.payload {
            Payload::Text(text) => HistoryItem {
                id: packet.utterance_id().to_string(),
                character,
                date: packet.timestamp,
                interaction_id: packet.interaction_id().to_string(),
                is_recognizing: !text.is_final,
                source: packet.routing.source.clone(),
                text: text.text.clone(),
                kind: HistoryKind::Utterance,
            },
            Payload::DataChunk(audio) => match &audio.transcript {
                Some(transcript) => HistoryItem {
                    id: packet.utterance_id().to_string(),
                    character,
                    date: packet.timestamp,
                    interaction_id: packet.interaction_id().to_string(),
                    is_recognizing: false,
                    source: packet.routing.source.clone(),
                    text: transcript.clone(),
                    kind: HistoryKind::Utterance,
                },
                None => return false,
            },
            Payload::Control(control) if control.action == ControlAction::InteractionEnd => {
                HistoryItem {
                    id: packet.utterance_id().to_string(),
                    character,
                    date: packet.timestamp,
                    interaction_id: packet.interaction_id().to_string(),
                    is_recognizing: false,
                    source: packet.routing.source.clone(),
                    text: String::new(),
                    kind: HistoryKind::InteractionEnd,
                }
            }
            _ => return false,
        };

        let snapshot = {
            let mut items = self.items.lock().unwrap();
            match items.iter_mut().find(|existing| existing.id == item.id) {
                Some(existing) => *existing = item,
                None => items.push(item),
            }
            items.clone()
        };
        self.notify(snapshot);
        true
    }

    fn notify(&self, snapshot: Vec<HistoryItem>) {
        if let Some(on_change) = &self.on_change {
            on_change(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{AudioPayload, PacketId, Routing, TextPayload};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn text_packet(utterance_id: &str, text: &str, is_final: bool, from_player: bool) -> Packet {
        let (source, target) = if from_player {
            (Actor::player(), Actor::character("c-1"))
        } else {
            (Actor::character("c-1"), Actor::player())
        };
        Packet {
            packet_id: PacketId {
                packet_id: format!("p-{utterance_id}"),
                interaction_id: "i-1".to_string(),
                utterance_id: utterance_id.to_string(),
            },
            routing: Routing { source, target },
            timestamp: Utc::now(),
            payload: Payload::Text(TextPayload {
                text: text.to_string(),
                is_final,
            }),
        }
    }

    #[test]
    fn test_appends_in_arrival_order() {
        let history = HistoryAggregator::new(None);

        history.record_packet(&text_packet("u-1", "first", true, true), None);
        history.record_packet(&text_packet("u-2", "second", true, false), None);

        let items = history.get();
        let texts: Vec<&str> = items.iter().map(|item| item.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_interim_entry_replaced_in_place() {
        let history = HistoryAggregator::new(None);

        history.record_packet(&text_packet("u-1", "hel", false, true), None);
        history.record_packet(&text_packet("u-2", "reply", true, false), None);
        history.record_packet(&text_packet("u-1", "hello there", true, true), None);

        let items = history.get();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].text, "hello there");
        assert!(!items[0].is_recognizing);
        assert_eq!(items[1].text, "reply");
    }

    #[test]
    fn test_repeated_get_is_order_stable() {
        let history = HistoryAggregator::new(None);
        history.record_packet(&text_packet("u-1", "one", true, true), None);
        history.record_packet(&text_packet("u-2", "two", true, false), None);

        assert_eq!(history.get(), history.get());
    }

    #[test]
    fn test_audio_without_transcript_is_not_displayed() {
        let history = HistoryAggregator::new(None);
        let mut packet = text_packet("u-1", "", true, false);
        packet.payload = Payload::DataChunk(AudioPayload {
            chunk: "AAAA".to_string(),
            transcript: None,
        });

        assert!(!history.record_packet(&packet, None));
        assert!(history.get().is_empty());
    }

    #[test]
    fn test_audio_with_transcript_merges_like_text() {
        let history = HistoryAggregator::new(None);
        let mut packet = text_packet("u-1", "", true, false);
        packet.payload = Payload::DataChunk(AudioPayload {
            chunk: "AAAA".to_string(),
            transcript: Some("spoken line".to_string()),
        });

        assert!(history.record_packet(&packet, None));
        assert_eq!(history.get()[0].text, "spoken line");
        assert_eq!(history.get()[0].kind, HistoryKind::Utterance);
    }

    #[test]
    fn test_change_callback_fires_per_mutation_with_snapshot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_callback = calls.clone();
        let history = HistoryAggregator::new(Some(Box::new(move |snapshot| {
            calls_in_callback.fetch_add(1, Ordering::SeqCst);
            assert!(snapshot.len() <= 2);
        })));

        history.record_packet(&text_packet("u-1", "one", true, true), None);
        history.record_packet(&text_packet("u-2", "two", true, false), None);
        history.clear();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(history.get().is_empty());
    }
}
