//! Transport-Handle eines Anrufs (Peer Connection)
//!
//! Abstraktion über die Peer Connection, damit der Controller ohne
//! echten WebRTC-Stack getestet werden kann.

use super::media::MediaTap;
use crate::signaling::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Generation eines Transports; Events alter Transports werden verworfen
pub type CallId = u64;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("WebRTC error: {0}")]
    WebRTC(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),
}

// ============================================================================
// TRANSPORT EVENTS
// ============================================================================

/// Verbindungsstatus der Peer Connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Nicht-explizites Ende des Transports
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

/// Events die vom Transport ausgelöst werden
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Lokaler ICE Candidate gefunden
    LocalCandidate(IceCandidate),
    /// Remote Audio-Track empfangen
    RemoteTrack { codec: String },
    ConnectionState(ConnectionState),
}

/// Sender für Transport-Events, mit der CallId des Transports markiert
#[derive(Debug, Clone)]
pub struct TransportEvents {
    call_id: CallId,
    tx: mpsc::UnboundedSender<(CallId, TransportEvent)>,
}

impl TransportEvents {
    pub fn new(call_id: CallId, tx: mpsc::UnboundedSender<(CallId, TransportEvent)>) -> Self {
        Self { call_id, tx }
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn emit(&self, event: TransportEvent) {
        if self.tx.send((self.call_id, event)).is_err() {
            tracing::debug!("Transport event dropped, controller gone");
        }
    }
}

// ============================================================================
// TRAITS
// ============================================================================

/// Eine Peer Connection für genau einen Anruf
#[async_trait]
pub trait Transport: Send + Sync {
    /// Erstellt ein Offer und setzt es als Local Description
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    /// Erstellt ein Answer und setzt es als Local Description
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    async fn close(&self);
}

/// Erstellt Transports für neue Anrufe
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        media: MediaTap,
        events: TransportEvents,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert!(!ConnectionState::Connecting.is_terminal());
    }

    #[test]
    fn events_are_tagged_with_call_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = TransportEvents::new(7, tx);

        events.emit(TransportEvent::ConnectionState(ConnectionState::Connected));

        assert_eq!(
            rx.try_recv().unwrap(),
            (7, TransportEvent::ConnectionState(ConnectionState::Connected))
        );
    }
}
