//! WebSocket Client für den Signaling-Relay
//!
//! Verwaltet die WebSocket-Verbindung zum Relay:
//! - Read-Task dekodiert Server-Nachrichten und verteilt sie als Events
//! - Write-Task leert die Sende-Queue
//! - Keep-Alive über WebSocket-Pings

use super::messages::*;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Maximale Wartezeit auf die `connected`-Nachricht des Relays
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximale Wartezeit, bis die Sende-Queue beim Trennen geleert ist
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),
}

// ============================================================================
// SIGNALING EVENTS
// ============================================================================

/// Events die vom SignalingClient ausgelöst werden
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    /// Verbunden, lokale ID vom Relay zugewiesen
    Connected { local_id: String },

    /// Verbindung getrennt
    Disconnected,

    /// Vollständige Online-Liste
    UserList(Vec<String>),

    /// Peer verbunden
    UserJoined(String),

    /// Peer getrennt
    UserLeft(String),

    /// Eingehender Anruf
    Offer {
        from: String,
        offer: SessionDescription,
    },

    /// SDP Answer erhalten
    Answer {
        from: String,
        answer: SessionDescription,
    },

    /// ICE Candidate erhalten
    IceCandidate {
        from: Option<String>,
        candidate: IceCandidate,
    },

    /// Anruf von der Gegenseite beendet
    CallEnded { from: Option<String> },

    /// Fehler vom Relay
    Error { message: String },
}

impl From<ServerMessage> for SignalingEvent {
    fn from(msg: ServerMessage) -> Self {
        match msg {
            ServerMessage::Connected { id } => Self::Connected { local_id: id },
            ServerMessage::UserList { users } => Self::UserList(users),
            ServerMessage::UserJoined { id } => Self::UserJoined(id),
            ServerMessage::UserLeft { id } => Self::UserLeft(id),
            ServerMessage::CallMade { from, offer } => Self::Offer { from, offer },
            ServerMessage::AnswerMade { from, answer } => Self::Answer { from, answer },
            ServerMessage::IceCandidate { from, candidate } => {
                Self::IceCandidate { from, candidate }
            }
            ServerMessage::CallEnded { from } => Self::CallEnded { from },
            ServerMessage::Error { message } => Self::Error { message },
        }
    }
}

// ============================================================================
// SIGNALING SINK
// ============================================================================

/// Ausgehende Seite des Signaling-Kanals
///
/// Senden blockiert nie; die Nachricht landet in einer Queue.
pub trait SignalingSink: Send + Sync {
    fn send(&self, message: ClientMessage) -> Result<(), SignalingError>;
}

// ============================================================================
// CLIENT STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ClientState {
    is_connected: bool,
    local_id: Option<String>,
}

// ============================================================================
// SIGNALING CLIENT
// ============================================================================

/// WebSocket Client für Signaling-Relay Kommunikation
pub struct SignalingClient {
    server_url: Url,
    keepalive: Duration,
    state: Arc<RwLock<ClientState>>,
    tx: Option<mpsc::Sender<Message>>,
    write_task: Option<JoinHandle<()>>,
    event_tx: broadcast::Sender<SignalingEvent>,
}

impl SignalingClient {
    /// Erstellt einen neuen SignalingClient
    pub fn new(server_url: Url, keepalive: Duration) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            server_url,
            keepalive,
            state: Arc::new(RwLock::new(ClientState::default())),
            tx: None,
            write_task: None,
            event_tx,
        }
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.event_tx.subscribe()
    }

    /// Vom Relay zugewiesene ID (falls verbunden)
    pub fn local_id(&self) -> Option<String> {
        self.state.read().local_id.clone()
    }

    /// Prüft ob verbunden
    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    /// Verbindet mit dem Relay und wartet auf die zugewiesene ID
    pub async fn connect(&mut self) -> Result<String, SignalingError> {
        tracing::info!("Connecting to signaling server: {}", self.server_url);

        let (ws_stream, _) = connect_async(self.server_url.as_str())
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::channel::<Message>(100);
        self.tx = Some(tx.clone());
        self.state.write().is_connected = true;

        // Channel für die zugewiesene ID
        let (id_tx, mut id_rx) = mpsc::channel::<String>(1);

        // Read-Task
        let state = Arc::clone(&self.state);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(server_msg) => {
                            Self::handle_server_message(server_msg, &state, &event_tx, &id_tx)
                                .await;
                        }
                        Err(e) => {
                            tracing::warn!("Ignoring undecodable signaling frame: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            {
                let mut s = state.write();
                s.is_connected = false;
                s.local_id = None;
            }
            let _ = event_tx.send(SignalingEvent::Disconnected);
        });

        // Write-Task
        self.write_task = Some(tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        }));

        // Keep-Alive
        self.start_keepalive(tx);

        tokio::select! {
            result = id_rx.recv() => {
                result.ok_or_else(|| {
                    SignalingError::ConnectionFailed(
                        "Connection closed before id was assigned".to_string(),
                    )
                })
            }
            _ = tokio::time::sleep(CONNECT_TIMEOUT) => {
                Err(SignalingError::ConnectionFailed("Timeout waiting for id".to_string()))
            }
        }
    }

    /// Schließt die Verbindung, nachdem alle wartenden Nachrichten gesendet sind
    pub async fn disconnect(&mut self) {
        if let Some(tx) = self.tx.take() {
            if let Err(e) = tx.send(Message::Close(None)).await {
                tracing::debug!("Write task already stopped: {}", e);
            }
        }
        self.state.write().is_connected = false;

        if let Some(task) = self.write_task.take() {
            if tokio::time::timeout(DISCONNECT_TIMEOUT, task).await.is_err() {
                tracing::warn!("Timed out flushing signaling messages");
            }
        }
    }

    /// Verarbeitet eingehende Server-Nachrichten
    async fn handle_server_message(
        msg: ServerMessage,
        state: &Arc<RwLock<ClientState>>,
        event_tx: &broadcast::Sender<SignalingEvent>,
        id_tx: &mpsc::Sender<String>,
    ) {
        match &msg {
            ServerMessage::Connected { id } => {
                tracing::info!("Connected with id {}", id);
                state.write().local_id = Some(id.clone());
                let _ = id_tx.send(id.clone()).await;
            }
            ServerMessage::Error { message } => {
                tracing::error!("Signaling server error: {}", message);
            }
            ServerMessage::IceCandidate { .. } => {
                tracing::debug!("Received remote ICE candidate");
            }
            other => {
                tracing::debug!("Received {:?}", other);
            }
        }

        let _ = event_tx.send(SignalingEvent::from(msg));
    }

    /// Sendet in festen Abständen einen WebSocket-Ping
    fn start_keepalive(&self, tx: mpsc::Sender<Message>) {
        let state = Arc::clone(&self.state);
        let period = self.keepalive;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !state.read().is_connected {
                    tracing::debug!("Keep-alive: client disconnected, stopping");
                    break;
                }
                if let Err(e) = tx.send(Message::Ping(Vec::new())).await {
                    tracing::warn!("Failed to send keep-alive ping: {}", e);
                    break;
                }
            }
        });
    }
}

impl SignalingSink for SignalingClient {
    fn send(&self, message: ClientMessage) -> Result<(), SignalingError> {
        let tx = self.tx.as_ref().ok_or(SignalingError::NotConnected)?;

        let text = serde_json::to_string(&message)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        tracing::debug!("Sending {} to {}", message_kind(&message), message.recipient());

        // try_send ist non-blocking
        tx.try_send(Message::Text(text))
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }
}

fn message_kind(message: &ClientMessage) -> &'static str {
    match message {
        ClientMessage::CallUser { .. } => "call-user",
        ClientMessage::MakeAnswer { .. } => "make-answer",
        ClientMessage::IceCandidate { .. } => "ice-candidate",
        ClientMessage::EndCall { .. } => "end-call",
    }
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("server_url", &self.server_url.as_str())
            .field("state", &*self.state.read())
            .finish()
    }
}
