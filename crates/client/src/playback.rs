//! Playback-side collaborators.
//!
//! The session never renders audio itself; it only tracks which packets are
//! queued or rendering so the interruption protocol knows what to cancel.

use crate::error::ClientError;
use crate::packet::{Packet, PacketId};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::debug;

/// Bookkeeping interface between the session and the audio renderer.
pub trait AudioPlayback: Send + Sync {
    /// Registers an inbound packet as queued for rendering.
    fn enqueue(&self, packet: Packet);

    /// Marks a packet as fully rendered, removing it from the live set.
    fn complete(&self, packet_id: &PacketId);

    /// Returns the packets still live for the most recent unfinished
    /// interaction(s) and marks those interactions excluded, so a second
    /// interruption for the same turn yields nothing. Side effect: the
    /// returned packets leave the active-playback set.
    fn exclude_current_interaction_packets(&self) -> Vec<Packet>;
}

#[derive(Default)]
struct PlaybackState {
    queue: Vec<Packet>,
    excluded: HashSet<String>,
}

/// Default in-memory playback tracker.
#[derive(Default)]
pub struct AudioPlaybackCoordinator {
    state: Mutex<PlaybackState>,
}

impl AudioPlaybackCoordinator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioPlayback for AudioPlaybackCoordinator {
    fn enqueue(&self, packet: Packet) {
        let mut state = self.state.lock().unwrap();
        // Stragglers of an interrupted interaction never re-enter the queue.
        if state.excluded.contains(packet.interaction_id()) {
            debug!(
                interaction = packet.interaction_id(),
                "Dropping packet for excluded interaction"
            );
            return;
        }
        state.queue.push(packet);
    }

    fn complete(&self, packet_id: &PacketId) {
        let mut state = self.state.lock().unwrap();
        state
            .queue
            .retain(|queued| queued.packet_id.packet_id != packet_id.packet_id);
    }

    fn exclude_current_interaction_packets(&self) -> Vec<Packet> {
        let mut state = self.state.lock().unwrap();
        let live = std::mem::take(&mut state.queue);
        for packet in &live {
            state.excluded.insert(packet.interaction_id().to_string());
        }
        live
    }
}

/// Echo-loopback collaborator started during activation.
#[async_trait]
pub trait PlaybackLoopback: Send + Sync {
    async fn start(&self) -> Result<(), ClientError>;
    async fn stop(&self);
}

/// Loopback that routes playback straight through. Headless clients have no
/// echo path to cancel, so starting and stopping are bookkeeping only.
#[derive(Default)]
pub struct DirectLoopback;

#[async_trait]
impl PlaybackLoopback for DirectLoopback {
    async fn start(&self) -> Result<(), ClientError> {
        debug!("Direct playback loopback started");
        Ok(())
    }

    async fn stop(&self) {
        debug!("Direct playback loopback stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Actor, AudioPayload, Payload, Routing};
    use chrono::Utc;

    fn audio_packet(packet_id: &str, interaction_id: &str) -> Packet {
        Packet {
            packet_id: PacketId {
                packet_id: packet_id.to_string(),
                interaction_id: interaction_id.to_string(),
                utterance_id: format!("u-{packet_id}"),
            },
            routing: Routing {
                source: Actor::character("c-1"),
                target: Actor::player(),
            },
            timestamp: Utc::now(),
            payload: Payload::DataChunk(AudioPayload {
                chunk: "AAAA".to_string(),
                transcript: None,
            }),
        }
    }

    #[test]
    fn test_exclusion_drains_live_packets_once() {
        let coordinator = AudioPlaybackCoordinator::new();
        coordinator.enqueue(audio_packet("p-1", "i-1"));
        coordinator.enqueue(audio_packet("p-2", "i-1"));
        coordinator.enqueue(audio_packet("p-3", "i-2"));

        let excluded = coordinator.exclude_current_interaction_packets();
        assert_eq!(excluded.len(), 3);

        // Same turn cannot be double-cancelled.
        assert!(coordinator.exclude_current_interaction_packets().is_empty());
    }

    #[test]
    fn test_excluded_interactions_reject_stragglers() {
        let coordinator = AudioPlaybackCoordinator::new();
        coordinator.enqueue(audio_packet("p-1", "i-1"));
        coordinator.exclude_current_interaction_packets();

        coordinator.enqueue(audio_packet("p-2", "i-1"));

        assert!(coordinator.exclude_current_interaction_packets().is_empty());
    }

    #[test]
    fn test_completed_packets_leave_the_live_set() {
        let coordinator = AudioPlaybackCoordinator::new();
        let packet = audio_packet("p-1", "i-1");
        coordinator.enqueue(packet.clone());
        coordinator.enqueue(audio_packet("p-2", "i-1"));

        coordinator.complete(&packet.packet_id);

        let excluded = coordinator.exclude_current_interaction_packets();
        assert_eq!(excluded.len(), 1);
        assert_eq!(excluded[0].packet_id.packet_id, "p-2");
    }
}
