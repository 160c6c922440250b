//! Client-side session manager for a duplex, real-time dialogue protocol.
//!
//! The crate establishes an authenticated streaming session against a
//! conversational backend, sends user input events, routes generated
//! response events (text, audio, control), and reconciles interruptions
//! between user and AI turns: when the user speaks again while a previous
//! response is still rendering, the superseded interaction is cancelled on
//! the wire before the new input goes out.
//!
//! Entry point is [`session::Session`], built through
//! [`session::SessionBuilder`] with the caller's token generator, callbacks
//! and optional collaborator overrides.

pub mod config;
pub mod error;
pub mod factory;
pub mod history;
pub mod packet;
pub mod playback;
pub mod scene;
pub mod session;
pub mod token;
pub mod transport;

pub use config::{Capabilities, ClientConfig, ConnectionConfig, GatewayConfig, UserProfile};
pub use error::ClientError;
pub use factory::EventFactory;
pub use history::{HistoryAggregator, HistoryItem, HistoryKind};
pub use packet::{Actor, Packet, PacketId, Payload, Routing};
pub use playback::{AudioPlayback, AudioPlaybackCoordinator, DirectLoopback, PlaybackLoopback};
pub use scene::{Character, HttpSceneLoader, Scene, SceneLoader};
pub use session::{Session, SessionBuilder};
pub use token::{RemoteTokenGenerator, SessionToken, TokenGenerator};
pub use transport::{Transport, TransportEvent, WebSocketTransport};
