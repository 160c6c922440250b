//! Session orchestration.
//!
//! `Session` owns the connection lifecycle for one dialogue session:
//!
//! 1. Activation: token acquisition, scene load, transport open. Concurrent
//!    `open` calls collapse into a single in-flight activation that every
//!    caller awaits.
//! 2. Outbound dispatch: packets are built by the event factory; a user text
//!    event first runs the interruption protocol so cancellations for any
//!    superseded interaction reach the wire before the new packet.
//! 3. Inbound routing: transport events are processed one at a time, in
//!    arrival order, feeding the transcript, the playback coordinator and
//!    the caller's message callback.
//!
//! Failures of token generation, scene load or transport open are reported
//! through the error callback and leave the session inactive; nothing is
//! half-activated.

use crate::config::{ClientConfig, UserProfile};
use crate::error::ClientError;
use crate::factory::EventFactory;
use crate::history::{HistoryAggregator, HistoryCallback, HistoryItem};
use crate::packet::Packet;
use crate::playback::{AudioPlayback, AudioPlaybackCoordinator, DirectLoopback, PlaybackLoopback};
use crate::scene::{Character, HttpSceneLoader, Scene, SceneLoader, SceneRequest};
use crate::token::{SessionToken, TokenGenerator};
use crate::transport::{Transport, TransportEvent, WebSocketTransport};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub type ReadyCallback = Box<dyn Fn() + Send + Sync>;
pub type ErrorCallback = Box<dyn Fn(ClientError) + Send + Sync>;
pub type MessageCallback = Box<dyn Fn(Packet) + Send + Sync>;
pub type DisconnectCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnectionState {
    Inactive,
    Activating,
    Active,
    Closing,
}

/// The in-flight activation every concurrent `open` caller attaches to.
type Activation = Shared<BoxFuture<'static, ()>>;

struct Inner {
    scene_name: String,
    config: ClientConfig,
    user: Option<UserProfile>,
    on_ready: Option<ReadyCallback>,
    on_error: Option<ErrorCallback>,
    on_message: Option<MessageCallback>,
    on_disconnect: Option<DisconnectCallback>,
    token_generator: Arc<dyn TokenGenerator>,
    scene_loader: Arc<dyn SceneLoader>,
    transport: Arc<dyn Transport>,
    playback: Arc<dyn AudioPlayback>,
    loopback: Arc<dyn PlaybackLoopback>,
    factory: Arc<EventFactory>,
    history: Arc<HistoryAggregator>,
    state: Mutex<ConnectionState>,
    token: Mutex<Option<SessionToken>>,
    scene: Mutex<Option<Scene>>,
    activation: Mutex<Option<Activation>>,
    /// Interactions already cancelled by the interruption protocol.
    cancelled: Mutex<HashSet<String>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    fn report_error(&self, err: ClientError) {
        error!(error = %err, "Session error");
        if let Some(on_error) = &self.on_error {
            on_error(err);
        }
    }

    fn clear_activation(&self) {
        *self.activation.lock().unwrap() = None;
    }

    fn is_cancelled(&self, interaction_id: &str) -> bool {
        self.cancelled.lock().unwrap().contains(interaction_id)
    }

    fn character_for(&self, packet: &Packet) -> Option<Character> {
        if !packet.routing.source.is_character {
            return None;
        }
        let name = packet.routing.source.name.clone()?;
        let scene = self.scene.lock().unwrap();
        scene
            .as_ref()?
            .characters
            .iter()
            .find(|character| character.id == name)
            .cloned()
    }

    /// Joins the in-flight activation, starting one if none exists.
    async fn open(self: Arc<Self>) {
        if self.state() == ConnectionState::Active {
            return;
        }
        let activation = {
            let mut guard = self.activation.lock().unwrap();
            match guard.as_ref() {
                Some(in_flight) => in_flight.clone(),
                None => {
                    let inner = Arc::clone(&self);
                    let fresh: Activation = async move { inner.activate().await }.boxed().shared();
                    *guard = Some(fresh.clone());
                    fresh
                }
            }
        };
        activation.await;
    }

    async fn activate(self: Arc<Self>) {
        // A caller can land here after a finished activation already flipped
        // the state; there is nothing left to do.
        if self.state() == ConnectionState::Active {
            self.clear_activation();
            return;
        }
        self.set_state(ConnectionState::Activating);
        info!(scene = %self.scene_name, "Activating session");

        match self.try_activate().await {
            Ok(inbound) => {
                Arc::clone(&self).spawn_dispatch(inbound);
                self.set_state(ConnectionState::Active);
                self.clear_activation();
                info!("Session active");
                if let Some(on_ready) = &self.on_ready {
                    on_ready();
                }
            }
            Err(err) => {
                self.set_state(ConnectionState::Inactive);
                self.clear_activation();
                self.report_error(err);
            }
        }
    }

    async fn try_activate(&self) -> Result<mpsc::Receiver<TransportEvent>, ClientError> {
        let token = self.ensure_token().await?;
        self.ensure_scene(&token).await?;

        let inbound = self
            .transport
            .open(token, self.scene_name.clone())
            .await?;
        if let Err(err) = self.loopback.start().await {
            // The socket opened but activation fails as a whole; tear the
            // socket down so nothing half-activated survives.
            self.transport.close().await;
            return Err(err);
        }
        Ok(inbound)
    }

    /// Returns the cached token while it is still valid, minting a new one
    /// otherwise.
    async fn ensure_token(&self) -> Result<SessionToken, ClientError> {
        let cached = self.token.lock().unwrap().clone();
        if let Some(token) = cached {
            if token.is_valid() {
                return Ok(token);
            }
            info!("Cached session token expired, requesting a new one");
        }
        let token = self.token_generator.generate().await?;
        *self.token.lock().unwrap() = Some(token.clone());
        Ok(token)
    }

    /// Returns the cached scene, loading it on first use. Loading also
    /// establishes the default routing target when none is set.
    async fn ensure_scene(&self, token: &SessionToken) -> Result<Scene, ClientError> {
        let cached = self.scene.lock().unwrap().clone();
        if let Some(scene) = cached {
            return Ok(scene);
        }
        let request = SceneRequest {
            name: self.scene_name.clone(),
            capabilities: self.config.capabilities.clone(),
            user: self.user.clone(),
        };
        let scene = self.scene_loader.load_scene(request, token.clone()).await?;
        *self.scene.lock().unwrap() = Some(scene.clone());
        if self.factory.current_character().is_none() {
            if let Some(first) = scene.characters.first() {
                self.factory.set_current_character(first.clone());
            }
        }
        Ok(scene)
    }

    fn spawn_dispatch(self: Arc<Self>, mut inbound: mpsc::Receiver<TransportEvent>) {
        let inner = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            // Inbound events are handled one at a time, in arrival order.
            while let Some(event) = inbound.recv().await {
                match event {
                    TransportEvent::Packet(packet) => inner.handle_inbound(packet).await,
                    TransportEvent::Error(cause) => {
                        inner.report_error(ClientError::Transport(cause));
                    }
                    TransportEvent::Disconnected => {
                        Arc::clone(&inner).handle_disconnect();
                        break;
                    }
                }
            }
        });
        if let Some(previous) = self.dispatch.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }

    async fn handle_inbound(&self, packet: Packet) {
        let interaction_id = packet.interaction_id().to_string();

        if packet.is_final_player_text() {
            // Recognized speech supersedes the in-flight response exactly
            // like a typed message does.
            self.interrupt().await;
        } else if packet.routing.source.is_character && self.is_cancelled(&interaction_id) {
            // The backend kept streaming after the user interrupted.
            // Re-issue the cancellation and drop the packet; the turn was
            // abandoned.
            let cancel = self
                .factory
                .cancel_response(&interaction_id, vec![packet.utterance_id().to_string()]);
            if let Err(err) = self.transport.write(cancel).await {
                self.report_error(err);
            }
            return;
        }

        if packet.is_audio() && packet.routing.source.is_character {
            self.playback.enqueue(packet.clone());
        }

        let character = self.character_for(&packet);
        self.history.record_packet(&packet, character);
        if let Some(on_message) = &self.on_message {
            on_message(packet);
        }
    }

    /// The interruption protocol: one cancellation per distinct interaction
    /// still live in playback, written before anything else proceeds.
    async fn interrupt(&self) {
        if !self.config.capabilities.interruptions {
            return;
        }
        let live = self.playback.exclude_current_interaction_packets();
        if live.is_empty() {
            return;
        }

        let mut order: Vec<String> = Vec::new();
        let mut utterances: HashMap<String, Vec<String>> = HashMap::new();
        for packet in &live {
            let id = packet.interaction_id().to_string();
            if !utterances.contains_key(&id) {
                order.push(id.clone());
            }
            utterances
                .entry(id)
                .or_default()
                .push(packet.utterance_id().to_string());
        }

        for id in order {
            let utterance_ids = utterances.remove(&id).unwrap_or_default();
            info!(interaction = %id, "Cancelling superseded interaction");
            let cancel = self.factory.cancel_response(&id, utterance_ids);
            if let Err(err) = self.transport.write(cancel).await {
                self.report_error(err);
            }
            self.cancelled.lock().unwrap().insert(id);
        }
    }

    fn handle_disconnect(self: Arc<Self>) {
        warn!("Transport disconnected");
        self.set_state(ConnectionState::Inactive);
        self.clear_activation();
        if let Some(on_disconnect) = &self.on_disconnect {
            on_disconnect();
        }
        if self.config.connection.auto_reconnect {
            info!("Auto-reconnect enabled, re-activating");
            let inner = Arc::clone(&self);
            tokio::spawn(async move { inner.open().await });
        }
    }
}

/// Client-side manager for one authenticated streaming dialogue session.
pub struct Session {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    pub fn builder(scene_name: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(scene_name)
    }

    /// Activates the session: token, scene, transport. Concurrent calls
    /// join the same in-flight activation; failures go to the error
    /// callback and leave the session inactive.
    pub async fn open(&self) {
        Arc::clone(&self.inner).open().await;
    }

    /// Explicit activation for sessions driven without auto-reconnect.
    pub async fn open_manually(&self) {
        if self.inner.config.connection.auto_reconnect {
            self.inner.report_error(ClientError::Configuration(
                "Cannot open the connection manually with auto-reconnect enabled".to_string(),
            ));
            return;
        }
        if self.is_active() {
            self.inner.report_error(ClientError::AlreadyActive);
            return;
        }
        self.open().await;
    }

    /// Closes the transport and resets the session. Idempotent; observers
    /// see `is_active() == false` before any awaiting happens.
    pub async fn close(&self) {
        self.inner.set_state(ConnectionState::Closing);
        if let Some(dispatch) = self.inner.dispatch.lock().unwrap().take() {
            dispatch.abort();
        }
        self.inner.clear_activation();
        self.inner.transport.close().await;
        self.inner.loopback.stop().await;
        self.inner.cancelled.lock().unwrap().clear();
        self.inner.set_state(ConnectionState::Inactive);
        info!("Session closed");
    }

    pub fn is_active(&self) -> bool {
        self.inner.state() == ConnectionState::Active
    }

    /// Builds a packet with the event factory and sends it.
    ///
    /// With auto-reconnect disabled an inactive session refuses with an
    /// error before any network attempt. Otherwise the session is lazily
    /// (re-)opened first. A user text event runs the interruption protocol,
    /// so cancellations for superseded interactions hit the wire before the
    /// new packet.
    pub async fn send<F>(&self, build: F)
    where
        F: FnOnce(&EventFactory) -> Packet,
    {
        let inner = &self.inner;
        if !inner.config.connection.auto_reconnect && !self.is_active() {
            inner.report_error(ClientError::Inactive);
            return;
        }
        Arc::clone(inner).open().await;
        if !self.is_active() {
            // Activation failed; the error was already reported.
            return;
        }

        let packet = build(&inner.factory);
        if packet.is_text() && packet.routing.source.is_player {
            inner.interrupt().await;
        }
        if let Err(err) = inner.transport.write(packet.clone()).await {
            inner.report_error(err);
            return;
        }
        inner.history.record_packet(&packet, None);
    }

    /// Snapshot of the transcript.
    pub fn history(&self) -> Vec<HistoryItem> {
        self.inner.history.get()
    }

    pub fn clear_history(&self) {
        self.inner.history.clear();
    }

    /// The characters of the loaded scene, in roster order.
    ///
    /// Loads the scene (minting a token only if no valid one is cached) on
    /// first use; repeated calls serve the cached roster. Also establishes
    /// the default routing target when none is set yet.
    pub async fn characters(&self) -> Result<Vec<Character>, ClientError> {
        let inner = &self.inner;
        let cached = inner.scene.lock().unwrap().clone();
        let scene = match cached {
            Some(scene) => scene,
            None => {
                let token = inner.ensure_token().await?;
                inner.ensure_scene(&token).await?
            }
        };
        if inner.factory.current_character().is_none() {
            if let Some(first) = scene.characters.first() {
                inner.factory.set_current_character(first.clone());
            }
        }
        Ok(scene.characters)
    }

    pub fn event_factory(&self) -> Arc<EventFactory> {
        Arc::clone(&self.inner.factory)
    }
}

/// Builder wiring configuration, callbacks and collaborators together.
///
/// Every collaborator can be injected; production defaults exist for the
/// transport, scene loader, playback coordinator and loopback. The token
/// generator has no default, credentials always come from the caller.
pub struct SessionBuilder {
    scene_name: String,
    config: ClientConfig,
    user: Option<UserProfile>,
    on_ready: Option<ReadyCallback>,
    on_error: Option<ErrorCallback>,
    on_message: Option<MessageCallback>,
    on_disconnect: Option<DisconnectCallback>,
    on_history_change: Option<HistoryCallback>,
    token_generator: Option<Arc<dyn TokenGenerator>>,
    scene_loader: Option<Arc<dyn SceneLoader>>,
    transport: Option<Arc<dyn Transport>>,
    playback: Option<Arc<dyn AudioPlayback>>,
    loopback: Option<Arc<dyn PlaybackLoopback>>,
}

impl SessionBuilder {
    pub fn new(scene_name: impl Into<String>) -> Self {
        Self {
            scene_name: scene_name.into(),
            config: ClientConfig::default(),
            user: None,
            on_ready: None,
            on_error: None,
            on_message: None,
            on_disconnect: None,
            on_history_change: None,
            token_generator: None,
            scene_loader: None,
            transport: None,
            playback: None,
            loopback: None,
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn user(mut self, user: UserProfile) -> Self {
        self.user = Some(user);
        self
    }

    pub fn on_ready(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_ready = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(ClientError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn on_message(mut self, callback: impl Fn(Packet) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Box::new(callback));
        self
    }

    pub fn on_disconnect(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Box::new(callback));
        self
    }

    pub fn on_history_change(
        mut self,
        callback: impl Fn(Vec<HistoryItem>) + Send + Sync + 'static,
    ) -> Self {
        self.on_history_change = Some(Box::new(callback));
        self
    }

    pub fn token_generator(mut self, generator: Arc<dyn TokenGenerator>) -> Self {
        self.token_generator = Some(generator);
        self
    }

    pub fn scene_loader(mut self, loader: Arc<dyn SceneLoader>) -> Self {
        self.scene_loader = Some(loader);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn playback(mut self, playback: Arc<dyn AudioPlayback>) -> Self {
        self.playback = Some(playback);
        self
    }

    pub fn loopback(mut self, loopback: Arc<dyn PlaybackLoopback>) -> Self {
        self.loopback = Some(loopback);
        self
    }

    pub fn build(self) -> Result<Session, ClientError> {
        let token_generator = self.token_generator.ok_or_else(|| {
            ClientError::Configuration("A token generator is required".to_string())
        })?;
        let gateway = self.config.connection.gateway.clone();
        let scene_loader = match self.scene_loader {
            Some(loader) => loader,
            None => {
                self.config.validate_gateway()?;
                Arc::new(HttpSceneLoader::new(gateway.hostname.clone(), gateway.ssl))
            }
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => {
                self.config.validate_gateway()?;
                Arc::new(WebSocketTransport::new(gateway.hostname, gateway.ssl))
            }
        };
        let playback = self
            .playback
            .unwrap_or_else(|| Arc::new(AudioPlaybackCoordinator::new()));
        let loopback = self.loopback.unwrap_or_else(|| Arc::new(DirectLoopback));

        Ok(Session {
            inner: Arc::new(Inner {
                scene_name: self.scene_name,
                config: self.config,
                user: self.user,
                on_ready: self.on_ready,
                on_error: self.on_error,
                on_message: self.on_message,
                on_disconnect: self.on_disconnect,
                token_generator,
                scene_loader,
                transport,
                playback,
                loopback,
                factory: Arc::new(EventFactory::new()),
                history: Arc::new(HistoryAggregator::new(self.on_history_change)),
                state: Mutex::new(ConnectionState::Inactive),
                token: Mutex::new(None),
                scene: Mutex::new(None),
                activation: Mutex::new(None),
                cancelled: Mutex::new(HashSet::new()),
                dispatch: Mutex::new(None),
            }),
        })
    }
}
