//! Call Controller
//!
//! Zustandsmaschine der Call Session. Vermittelt zwischen Signaling-Kanal,
//! lokalem Transport und der Capture-Ressource. Alle Übergänge laufen über
//! `&mut self`, der Aufrufer serialisiert die Events (eine Event-Loop).

use super::media::{MediaCapture, MediaError, MediaSource};
use super::session::{CallSession, Phase};
use super::transport::{
    CallId, Transport, TransportError, TransportEvent, TransportEvents, TransportFactory,
};
use crate::signaling::{
    ClientMessage, IceCandidate, Roster, SessionDescription, SignalingEvent, SignalingSink,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// STATUS STRINGS
// ============================================================================

pub const STATUS_CONNECTING: &str = "Connecting...";
pub const STATUS_ONLINE: &str = "Online";
pub const STATUS_CALLING: &str = "Calling...";
pub const STATUS_MIC_DENIED: &str = "Mic Access Denied";
pub const STATUS_CALL_FAILED: &str = "Call failed";
pub const STATUS_CONNECTION_LOST: &str = "Connection lost";
pub const STATUS_DISCONNECTED: &str = "Disconnected";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Cannot {action} while {phase}")]
    InvalidPhase {
        action: &'static str,
        phase: &'static str,
    },

    #[error("Invalid call target: {0:?}")]
    InvalidTarget(String),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

// ============================================================================
// CALL CONTROLLER
// ============================================================================

/// Besitzt die Call Session und alle Ressourcen des laufenden Anrufs
pub struct CallController {
    session: CallSession,
    roster: Roster,
    status: String,
    signaling: Arc<dyn SignalingSink>,
    media_source: Arc<dyn MediaSource>,
    transports: Arc<dyn TransportFactory>,
    transport_tx: mpsc::UnboundedSender<(CallId, TransportEvent)>,
    next_call_id: CallId,
    /// Candidates des Anrufers, die vor der Annahme eintreffen
    pending_candidates: Vec<IceCandidate>,
}

impl CallController {
    /// Erstellt einen Controller; der Receiver liefert die Transport-Events
    pub fn new(
        signaling: Arc<dyn SignalingSink>,
        media_source: Arc<dyn MediaSource>,
        transports: Arc<dyn TransportFactory>,
    ) -> (Self, mpsc::UnboundedReceiver<(CallId, TransportEvent)>) {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        let controller = Self {
            session: CallSession::new(),
            roster: Roster::new(),
            status: STATUS_CONNECTING.to_string(),
            signaling,
            media_source,
            transports,
            transport_tx,
            next_call_id: 1,
            pending_candidates: Vec::new(),
        };

        (controller, transport_rx)
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Kurze Statuszeile für die Anzeige
    pub fn status(&self) -> &str {
        &self.status
    }

    // ========================================================================
    // USER ACTIONS
    // ========================================================================

    /// Startet einen ausgehenden Anruf
    ///
    /// Nur aus `Idle` möglich. Schlägt die Mikrofon-Freigabe fehl, bleibt die
    /// Session in `Idle` und die Statuszeile meldet den Fehler.
    pub async fn call(&mut self, peer_id: &str) -> Result<(), CallError> {
        if !self.session.is_idle() {
            tracing::debug!("Ignoring call to {} while {}", peer_id, self.session.phase().name());
            return Err(self.invalid_phase("call"));
        }
        if peer_id.is_empty() || self.session.local_id() == Some(peer_id) {
            return Err(CallError::InvalidTarget(peer_id.to_string()));
        }

        tracing::info!("Calling {}", peer_id);
        self.set_status(STATUS_CALLING);

        let transport = match self.acquire_resources().await {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!("Call setup to {} failed: {}", peer_id, e);
                self.set_failure_status(&e);
                return Err(e);
            }
        };

        self.session.phase = Phase::Calling {
            peer_id: peer_id.to_string(),
        };

        let offer = match transport.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                tracing::error!("Failed to create offer: {}", e);
                self.release().await;
                self.set_status(STATUS_CALL_FAILED);
                return Err(e.into());
            }
        };

        self.send(ClientMessage::CallUser {
            to: peer_id.to_string(),
            offer,
        });
        Ok(())
    }

    /// Nimmt den eingehenden Anruf an
    pub async fn accept(&mut self) -> Result<(), CallError> {
        let (peer_id, offer) = match &self.session.phase {
            Phase::RingingInbound {
                peer_id,
                pending_offer,
            } => (peer_id.clone(), pending_offer.clone()),
            _ => return Err(self.invalid_phase("accept")),
        };

        tracing::info!("Accepting call from {}", peer_id);

        let transport = match self.acquire_resources().await {
            Ok(transport) => transport,
            Err(e) => {
                self.abort_accept(&peer_id, &e).await;
                return Err(e);
            }
        };

        let answer = match self.negotiate_answer(&transport, offer).await {
            Ok(answer) => answer,
            Err(e) => {
                self.abort_accept(&peer_id, &e).await;
                return Err(e);
            }
        };

        self.session.phase = Phase::Active {
            peer_id: peer_id.clone(),
        };
        self.session.elapsed_seconds = 0;

        self.send(ClientMessage::MakeAnswer {
            to: peer_id.clone(),
            answer,
        });
        self.set_status(format!("On call with {peer_id}"));
        Ok(())
    }

    /// Lehnt den eingehenden Anruf ab
    pub fn reject(&mut self) -> Result<(), CallError> {
        let peer_id = match &self.session.phase {
            Phase::RingingInbound { peer_id, .. } => peer_id.clone(),
            _ => return Err(self.invalid_phase("reject")),
        };

        tracing::info!("Rejecting call from {}", peer_id);

        self.session.phase = Phase::Idle;
        self.pending_candidates.clear();
        self.send(ClientMessage::EndCall { to: peer_id });
        self.set_status(STATUS_ONLINE);
        Ok(())
    }

    /// Beendet oder bricht den aktuellen Anruf ab
    pub async fn hang_up(&mut self) -> Result<(), CallError> {
        let peer_id = match &self.session.phase {
            Phase::Calling { peer_id } | Phase::Active { peer_id } => peer_id.clone(),
            _ => return Err(self.invalid_phase("hang up")),
        };

        tracing::info!("Hanging up on {}", peer_id);

        self.send(ClientMessage::EndCall { to: peer_id });
        self.release().await;
        self.set_status(STATUS_ONLINE);
        Ok(())
    }

    /// Setzt Mute-Status, nur während eines aktiven Anrufs
    pub fn set_muted(&mut self, muted: bool) -> Result<(), CallError> {
        if !self.session.is_active() {
            return Err(self.invalid_phase("change mute"));
        }

        self.session.muted = muted;
        if let Some(media) = self.session.media.as_ref() {
            media.set_muted(muted);
        }
        tracing::debug!("Muted: {}", muted);
        Ok(())
    }

    /// Schaltet Mute um und gibt den neuen Status zurück
    pub fn toggle_mute(&mut self) -> Result<bool, CallError> {
        let muted = !self.session.muted;
        self.set_muted(muted)?;
        Ok(muted)
    }

    /// Sekundentakt für die Gesprächsdauer
    pub fn tick(&mut self) {
        if self.session.is_active() {
            self.session.elapsed_seconds += 1;
        }
    }

    /// Beendet einen laufenden Anruf vor dem Programmende
    pub async fn shutdown(&mut self) {
        let result = if matches!(self.session.phase, Phase::RingingInbound { .. }) {
            self.reject()
        } else if self.session.phase.holds_resources() {
            self.hang_up().await
        } else {
            Ok(())
        };
        if let Err(e) = result {
            tracing::warn!("Shutdown: {}", e);
        }
    }

    // ========================================================================
    // SIGNALING EVENTS
    // ========================================================================

    /// Verarbeitet ein Event des Signaling-Kanals
    pub async fn handle_signaling_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Connected { local_id } => {
                tracing::info!("Local id: {}", local_id);
                self.roster.remove(&local_id);
                self.session.local_id = Some(local_id);
                if self.session.is_idle() {
                    self.set_status(STATUS_ONLINE);
                }
            }

            SignalingEvent::Disconnected => {
                tracing::warn!("Signaling connection lost");
                self.release().await;
                self.session.local_id = None;
                self.roster.clear();
                self.set_status(STATUS_DISCONNECTED);
            }

            SignalingEvent::UserList(users) => {
                self.roster.replace(users, self.session.local_id.as_deref());
            }

            SignalingEvent::UserJoined(id) => {
                if self.session.local_id.as_deref() != Some(id.as_str()) {
                    self.roster.add(id);
                }
            }

            SignalingEvent::UserLeft(id) => {
                self.roster.remove(&id);
                if self.session.peer_id() == Some(id.as_str()) {
                    tracing::info!("Peer {} left during call", id);
                    self.release().await;
                    self.set_status(STATUS_ONLINE);
                }
            }

            SignalingEvent::Offer { from, offer } => self.on_offer(from, offer),

            SignalingEvent::Answer { from, answer } => self.on_answer(from, answer).await,

            SignalingEvent::IceCandidate { from, candidate } => {
                self.on_remote_candidate(from, candidate).await
            }

            SignalingEvent::CallEnded { from } => self.on_call_ended(from).await,

            SignalingEvent::Error { message } => {
                tracing::warn!("Signaling error: {}", message);
            }
        }
    }

    fn on_offer(&mut self, from: String, offer: SessionDescription) {
        if !self.session.is_idle() {
            // Kein Besetzt-Signal, das Offer verfällt
            tracing::warn!(
                "Dropping offer from {} while {}",
                from,
                self.session.phase().name()
            );
            return;
        }
        if from.is_empty() || self.session.local_id() == Some(from.as_str()) {
            tracing::warn!("Dropping offer with invalid sender {:?}", from);
            return;
        }

        tracing::info!("Incoming call from {}", from);
        self.pending_candidates.clear();
        self.set_status(format!("Incoming call from {from}"));
        self.session.phase = Phase::RingingInbound {
            peer_id: from,
            pending_offer: offer,
        };
    }

    async fn on_answer(&mut self, from: String, answer: SessionDescription) {
        let transport = match (&self.session.phase, &self.session.transport) {
            (Phase::Calling { peer_id }, Some(transport)) if *peer_id == from => {
                Arc::clone(transport)
            }
            _ => {
                tracing::debug!(
                    "Ignoring answer from {} while {}",
                    from,
                    self.session.phase().name()
                );
                return;
            }
        };

        if let Err(e) = transport.set_remote_description(answer).await {
            tracing::error!("Failed to apply answer from {}: {}", from, e);
            self.release().await;
            // Der Angerufene ist bereits aktiv
            self.send(ClientMessage::EndCall { to: from });
            self.set_status(STATUS_CALL_FAILED);
            return;
        }

        tracing::info!("Call with {} active", from);
        self.set_status(format!("On call with {from}"));
        self.session.phase = Phase::Active { peer_id: from };
        self.session.elapsed_seconds = 0;
    }

    async fn on_remote_candidate(&mut self, from: Option<String>, candidate: IceCandidate) {
        if let Some(sender) = from.as_deref() {
            if self.session.peer_id() != Some(sender) {
                tracing::debug!("Ignoring ICE candidate from {}", sender);
                return;
            }
        }

        if let Some(transport) = self.session.transport.as_ref().map(Arc::clone) {
            if let Err(e) = transport.add_ice_candidate(candidate).await {
                tracing::warn!("Failed to add ICE candidate: {}", e);
            }
        } else if matches!(self.session.phase, Phase::RingingInbound { .. }) {
            tracing::debug!("Queueing ICE candidate until call is accepted");
            self.pending_candidates.push(candidate);
        } else {
            tracing::debug!("Ignoring ICE candidate without transport");
        }
    }

    async fn on_call_ended(&mut self, from: Option<String>) {
        if self.session.is_idle() {
            return;
        }
        if let Some(sender) = from.as_deref() {
            if self.session.peer_id() != Some(sender) {
                tracing::debug!("Ignoring call end from {}", sender);
                return;
            }
        }

        tracing::info!("Call ended by remote peer");
        self.release().await;
        self.set_status(STATUS_ONLINE);
    }

    // ========================================================================
    // TRANSPORT EVENTS
    // ========================================================================

    /// Verarbeitet ein Event des Transports `call_id`
    pub async fn handle_transport_event(&mut self, call_id: CallId, event: TransportEvent) {
        if self.session.call_id != Some(call_id) {
            tracing::debug!("Ignoring event of stale transport {}: {:?}", call_id, event);
            return;
        }

        match event {
            TransportEvent::LocalCandidate(candidate) => {
                if let Some(peer_id) = self.session.peer_id().map(str::to_string) {
                    tracing::debug!("Sending ICE candidate to {}", peer_id);
                    self.send(ClientMessage::IceCandidate {
                        to: peer_id,
                        candidate,
                    });
                }
            }

            TransportEvent::RemoteTrack { codec } => {
                tracing::info!("Receiving remote audio ({})", codec);
            }

            TransportEvent::ConnectionState(state) if state.is_terminal() => {
                if self.session.phase().holds_resources() {
                    tracing::warn!("Transport {:?}, ending call", state);
                    self.release().await;
                    self.set_status(STATUS_CONNECTION_LOST);
                }
            }

            TransportEvent::ConnectionState(state) => {
                tracing::info!("Peer connection state: {:?}", state);
            }
        }
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    /// Holt Mikrofon und Transport und legt beide in der Session ab
    async fn acquire_resources(&mut self) -> Result<Arc<dyn Transport>, CallError> {
        let mut media: Box<dyn MediaCapture> = self.media_source.acquire().await?;
        media.set_muted(self.session.muted);

        let call_id = self.next_call_id;
        self.next_call_id += 1;
        let events = TransportEvents::new(call_id, self.transport_tx.clone());

        let transport = match self.transports.create(media.tap(), events).await {
            Ok(transport) => transport,
            Err(e) => {
                media.stop();
                return Err(e.into());
            }
        };

        self.session.media = Some(media);
        self.session.transport = Some(Arc::clone(&transport));
        self.session.call_id = Some(call_id);
        Ok(transport)
    }

    async fn negotiate_answer(
        &mut self,
        transport: &Arc<dyn Transport>,
        offer: SessionDescription,
    ) -> Result<SessionDescription, CallError> {
        transport.set_remote_description(offer).await?;

        for candidate in std::mem::take(&mut self.pending_candidates) {
            if let Err(e) = transport.add_ice_candidate(candidate).await {
                tracing::warn!("Failed to add queued ICE candidate: {}", e);
            }
        }

        Ok(transport.create_answer().await?)
    }

    /// Annahme fehlgeschlagen: aufräumen und den Anrufer freigeben
    async fn abort_accept(&mut self, peer_id: &str, error: &CallError) {
        tracing::warn!("Accepting call from {} failed: {}", peer_id, error);
        self.release().await;
        self.send(ClientMessage::EndCall {
            to: peer_id.to_string(),
        });
        self.set_failure_status(error);
    }

    /// Gibt alle Ressourcen frei und kehrt nach `Idle` zurück
    async fn release(&mut self) {
        let transport = self.session.transport.take();
        let media = self.session.media.take();

        self.session.call_id = None;
        self.session.phase = Phase::Idle;
        self.session.elapsed_seconds = 0;
        self.pending_candidates.clear();

        if let Some(transport) = transport {
            transport.close().await;
        }
        if let Some(mut media) = media {
            media.stop();
        }
    }

    fn send(&self, message: ClientMessage) {
        if let Err(e) = self.signaling.send(message) {
            tracing::warn!("Failed to send signaling message: {}", e);
        }
    }

    fn set_status(&mut self, status: impl Into<String>) {
        let status = status.into();
        if status != self.status {
            tracing::debug!("Status: {}", status);
            self.status = status;
        }
    }

    fn set_failure_status(&mut self, error: &CallError) {
        match error {
            CallError::Media(MediaError::AccessDenied(_)) => self.set_status(STATUS_MIC_DENIED),
            _ => self.set_status(STATUS_CALL_FAILED),
        }
    }

    fn invalid_phase(&self, action: &'static str) -> CallError {
        CallError::InvalidPhase {
            action,
            phase: self.session.phase().name(),
        }
    }
}

impl std::fmt::Debug for CallController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallController")
            .field("session", &self.session)
            .field("roster", &self.roster)
            .field("status", &self.status)
            .finish()
    }
}
