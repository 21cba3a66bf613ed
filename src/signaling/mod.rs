//! Signaling Module - WebSocket Client für den Relay-Server
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Signaling-Relay:
//! - WebSocket-Verbindung aufbauen und halten
//! - Nachrichten an Peers adressieren und senden
//! - Eingehende Nachrichten parsen und als Events weiterleiten
//! - Online-Liste der anderen Peers
//!

mod client;
mod messages;
mod presence;

pub use client::{SignalingClient, SignalingError, SignalingEvent, SignalingSink};
pub use messages::*;
pub use presence::Roster;
