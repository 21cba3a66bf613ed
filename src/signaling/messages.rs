//! Message Types für das Signaling-Protokoll
//!
//! Diese Strukturen spiegeln die JSON-Nachrichten des Relay-Servers wider.
//! Jede Nachricht ist ein Text-Frame mit einem `type`-Feld als Tag.

use serde::{Deserialize, Serialize};

// ============================================================================
// SHARED PAYLOADS
// ============================================================================

/// Art einer Session Description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// SDP Offer oder Answer, wie es über das Relay transportiert wird
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE Candidate im Browser-kompatiblen JSON-Format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

// ============================================================================
// CLIENT → SERVER MESSAGES
// ============================================================================

/// Nachrichten, die der Client an einen bestimmten Peer adressiert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Ausgehender Anruf mit SDP Offer
    CallUser {
        to: String,
        offer: SessionDescription,
    },

    /// Antwort auf einen eingehenden Anruf
    MakeAnswer {
        to: String,
        answer: SessionDescription,
    },

    /// Lokal gefundener ICE Candidate
    IceCandidate { to: String, candidate: IceCandidate },

    /// Anruf beenden, abbrechen oder ablehnen
    EndCall { to: String },
}

impl ClientMessage {
    /// Peer-ID des Empfängers
    pub fn recipient(&self) -> &str {
        match self {
            Self::CallUser { to, .. }
            | Self::MakeAnswer { to, .. }
            | Self::IceCandidate { to, .. }
            | Self::EndCall { to } => to,
        }
    }
}

// ============================================================================
// SERVER → CLIENT MESSAGES
// ============================================================================

/// Alle möglichen Server-Nachrichten
///
/// Der Absender wird vom Relay im Feld `socket` mitgeliefert.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Verbindung steht, lokale ID zugewiesen
    Connected { id: String },

    /// Vollständige Liste aller verbundenen IDs
    UserList { users: Vec<String> },

    /// Neuer Benutzer verbunden
    UserJoined { id: String },

    /// Benutzer getrennt
    UserLeft { id: String },

    /// Eingehendes SDP Offer
    CallMade {
        #[serde(rename = "socket")]
        from: String,
        offer: SessionDescription,
    },

    /// Eingehendes SDP Answer
    AnswerMade {
        #[serde(rename = "socket")]
        from: String,
        answer: SessionDescription,
    },

    /// Eingehender ICE Candidate
    IceCandidate {
        #[serde(rename = "socket", default)]
        from: Option<String>,
        candidate: IceCandidate,
    },

    /// Gegenseite hat aufgelegt oder abgelehnt
    CallEnded {
        #[serde(rename = "socket", default)]
        from: Option<String>,
    },

    /// Fehler vom Relay
    Error { message: String },
}
