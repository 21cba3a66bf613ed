//! Call Session - der eine Anruf, den der Client gleichzeitig führen kann

use super::media::MediaCapture;
use super::transport::{CallId, Transport};
use crate::signaling::SessionDescription;
use std::sync::Arc;

// ============================================================================
// PHASE
// ============================================================================

/// Aktuelle Phase der Session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Kein Anruf
    Idle,
    /// Ausgehender Anruf, Offer gesendet, warte auf Answer
    Calling { peer_id: String },
    /// Eingehender Anruf wartet auf Annahme
    RingingInbound {
        peer_id: String,
        pending_offer: SessionDescription,
    },
    /// Anruf aktiv
    Active { peer_id: String },
}

impl Phase {
    /// Gegenseite des Anrufs (falls vorhanden)
    pub fn peer_id(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Calling { peer_id }
            | Self::RingingInbound { peer_id, .. }
            | Self::Active { peer_id } => Some(peer_id),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Calling { .. } => "calling",
            Self::RingingInbound { .. } => "ringing",
            Self::Active { .. } => "active",
        }
    }

    /// Phasen, in denen Media und Transport belegt sind
    pub fn holds_resources(&self) -> bool {
        matches!(self, Self::Calling { .. } | Self::Active { .. })
    }
}

// ============================================================================
// CALL SESSION
// ============================================================================

/// Zustand der Session, nur über den `CallController` veränderbar
pub struct CallSession {
    pub(super) local_id: Option<String>,
    pub(super) phase: Phase,
    pub(super) media: Option<Box<dyn MediaCapture>>,
    pub(super) transport: Option<Arc<dyn Transport>>,
    pub(super) call_id: Option<CallId>,
    pub(super) muted: bool,
    pub(super) elapsed_seconds: u64,
}

impl CallSession {
    pub(super) fn new() -> Self {
        Self {
            local_id: None,
            phase: Phase::Idle,
            media: None,
            transport: None,
            call_id: None,
            muted: false,
            elapsed_seconds: 0,
        }
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn peer_id(&self) -> Option<&str> {
        self.phase.peer_id()
    }

    pub fn pending_offer(&self) -> Option<&SessionDescription> {
        match &self.phase {
            Phase::RingingInbound { pending_offer, .. } => Some(pending_offer),
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    pub fn is_active(&self) -> bool {
        matches!(self.phase, Phase::Active { .. })
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    pub fn call_id(&self) -> Option<CallId> {
        self.call_id
    }

    /// Audio-Levels der Capture-Ressource (input, output)
    pub fn audio_levels(&self) -> (f32, f32) {
        self.media
            .as_ref()
            .map(|m| m.levels())
            .unwrap_or((0.0, 0.0))
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("local_id", &self.local_id)
            .field("phase", &self.phase)
            .field("has_media", &self.has_media())
            .field("has_transport", &self.has_transport())
            .field("call_id", &self.call_id)
            .field("muted", &self.muted)
            .field("elapsed_seconds", &self.elapsed_seconds)
            .finish()
    }
}

/// Formatiert Sekunden als `MM:SS`
pub fn format_elapsed(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_elapsed_time() {
        assert_eq!(format_elapsed(0), "00:00");
        assert_eq!(format_elapsed(59), "00:59");
        assert_eq!(format_elapsed(61), "01:01");
        assert_eq!(format_elapsed(3600), "60:00");
    }

    #[test]
    fn pending_offer_only_while_ringing() {
        let mut session = CallSession::new();
        assert!(session.pending_offer().is_none());

        session.phase = Phase::RingingInbound {
            peer_id: "a".into(),
            pending_offer: SessionDescription::offer("v=0"),
        };
        assert_eq!(session.pending_offer().map(|o| o.sdp.as_str()), Some("v=0"));
        assert_eq!(session.peer_id(), Some("a"));
        assert!(!session.phase().holds_resources());

        session.phase = Phase::Active {
            peer_id: "a".into(),
        };
        assert!(session.pending_offer().is_none());
        assert!(session.phase().holds_resources());
    }
}
