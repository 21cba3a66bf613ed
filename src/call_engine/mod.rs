//! Call Engine Module - Call Session und Media
//!
//! Dieses Modul verwaltet:
//! - Die Zustandsmaschine eines Anrufs (Controller + Session)
//! - WebRTC Peer Connections (PCMU)
//! - Audio Capture (Mikrofon) und Playback (Lautsprecher)

mod audio;
mod codec;
mod controller;
mod media;
mod session;
mod transport;
mod webrtc_transport;

#[cfg(test)]
pub(crate) mod testing;

pub use audio::{
    list_devices, AudioDevice, AudioHandler, CpalMediaSource, FRAME_DURATION, FRAME_SIZE,
    SAMPLE_RATE,
};
pub use controller::{
    CallController, CallError, STATUS_CALLING, STATUS_CALL_FAILED, STATUS_CONNECTING,
    STATUS_CONNECTION_LOST, STATUS_DISCONNECTED, STATUS_MIC_DENIED, STATUS_ONLINE,
};
pub use media::{AudioBuffer, MediaCapture, MediaError, MediaSource, MediaTap};
pub use session::{format_elapsed, CallSession, Phase};
pub use transport::{
    CallId, ConnectionState, Transport, TransportError, TransportEvent, TransportEvents,
    TransportFactory,
};
pub use webrtc_transport::{ice_servers, WebRtcTransport, WebRtcTransportFactory};
