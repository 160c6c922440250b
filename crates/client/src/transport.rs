//! Duplex transport to the session gateway.
//!
//! The default implementation speaks JSON over a websocket: outbound frames
//! are packets, inbound frames are envelopes wrapping a single result
//! packet, forwarded to the session in arrival order.

use crate::error::ClientError;
use crate::packet::{Envelope, Packet};
use crate::token::SessionToken;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{error, info, warn};

/// Inbound events delivered by the transport, in arrival order.
#[derive(Debug)]
pub enum TransportEvent {
    Packet(Packet),
    /// Read-side failure; a `Disconnected` event follows.
    Error(String),
    Disconnected,
}

/// The duplex channel carrying packets between client and backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connects to the session endpoint for `scene`. Resolves once connected
    /// with the inbound event stream, or rejects on failure.
    async fn open(
        &self,
        session: SessionToken,
        scene: String,
    ) -> Result<mpsc::Receiver<TransportEvent>, ClientError>;

    /// Sends one packet.
    async fn write(&self, packet: Packet) -> Result<(), ClientError>;

    /// Terminates the session. Idempotent.
    async fn close(&self);
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Websocket transport to `{ws,wss}://{hostname}/v1/session/{scene}`.
pub struct WebSocketTransport {
    hostname: String,
    ssl: bool,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    pub fn new(hostname: impl Into<String>, ssl: bool) -> Self {
        Self {
            hostname: hostname.into(),
            ssl,
            sink: tokio::sync::Mutex::new(None),
            reader: std::sync::Mutex::new(None),
        }
    }

    fn endpoint(&self, scene: &str) -> String {
        let scheme = if self.ssl { "wss" } else { "ws" };
        format!("{scheme}://{}/v1/session/{scene}", self.hostname)
    }

    fn stop_reader(&self) {
        if let Some(handle) = self.reader.lock().unwrap().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(
        &self,
        session: SessionToken,
        scene: String,
    ) -> Result<mpsc::Receiver<TransportEvent>, ClientError> {
        // A leftover connection from a previous activation is torn down
        // before the new one is attempted.
        self.close().await;

        let url = self.endpoint(&scene);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let authorization = format!("{} {}", session.token_type, session.token.expose_secret());
        request.headers_mut().insert(
            "Authorization",
            authorization
                .parse()
                .map_err(|_| ClientError::Transport("Invalid authorization header".to_string()))?,
        );
        request.headers_mut().insert(
            "X-Session-Id",
            session
                .session_id
                .parse()
                .map_err(|_| ClientError::Transport("Invalid session id header".to_string()))?,
        );

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        info!(%url, "Session transport connected");
        let (sink, mut read) = stream.split();

        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<Envelope>(&text) {
                        Ok(envelope) => {
                            if tx.send(TransportEvent::Packet(envelope.result)).await.is_err() {
                                // Receiver dropped; the session is gone.
                                return;
                            }
                        }
                        Err(e) => warn!(error = %e, "Discarding malformed inbound frame"),
                    },
                    Ok(WsMessage::Close(frame)) => {
                        info!(?frame, "Server closed the session");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "Transport read failed");
                        let _ = tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }
            let _ = tx.send(TransportEvent::Disconnected).await;
        });

        *self.sink.lock().await = Some(sink);
        *self.reader.lock().unwrap() = Some(handle);
        Ok(rx)
    }

    async fn write(&self, packet: Packet) -> Result<(), ClientError> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| ClientError::Transport("Transport is not open".to_string()))?;
        let frame =
            serde_json::to_string(&packet).map_err(|e| ClientError::Transport(e.to_string()))?;
        sink.send(WsMessage::Text(frame.into()))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn close(&self) {
        self.stop_reader();
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.send(WsMessage::Close(None)).await;
            let _ = sink.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_respects_tls_flag() {
        let secure = WebSocketTransport::new("gateway.example.com", true);
        let plain = WebSocketTransport::new("localhost:9000", false);

        assert_eq!(
            secure.endpoint("atrium"),
            "wss://gateway.example.com/v1/session/atrium"
        );
        assert_eq!(plain.endpoint("atrium"), "ws://localhost:9000/v1/session/atrium");
    }
}
