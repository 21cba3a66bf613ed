//! WebRTC Transport
//!
//! Peer Connection auf Basis von `webrtc`. Ein lokaler PCMU-Track wird alle
//! 20ms aus dem Capture-Buffer gefüllt, Remote-Audio landet dekodiert im
//! Playback-Buffer.

use super::audio::{FRAME_DURATION, FRAME_SIZE, SAMPLE_RATE};
use super::codec;
use super::media::{AudioBuffer, MediaTap};
use super::transport::{
    ConnectionState, Transport, TransportError, TransportEvent, TransportEvents,
    TransportFactory,
};
use crate::config::Config;
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_PCMU};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

// ============================================================================
// ICE SERVER CONFIGURATION
// ============================================================================

/// STUN/TURN Server aus der Konfiguration
pub fn ice_servers(config: &Config) -> Vec<RTCIceServer> {
    let mut servers = Vec::new();

    if !config.stun_urls.is_empty() {
        servers.push(RTCIceServer {
            urls: config.stun_urls.clone(),
            ..Default::default()
        });
    }

    if let Some(turn) = &config.turn {
        servers.push(RTCIceServer {
            urls: vec![turn.url.clone()],
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        });
    }

    servers
}

fn webrtc_error(e: webrtc::Error) -> TransportError {
    TransportError::WebRTC(e.to_string())
}

// ============================================================================
// TRANSPORT FACTORY
// ============================================================================

/// Erstellt eine Peer Connection pro Anruf
#[derive(Debug, Clone)]
pub struct WebRtcTransportFactory {
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcTransportFactory {
    pub fn new(ice_servers: Vec<RTCIceServer>) -> Self {
        Self { ice_servers }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(ice_servers(config))
    }

    /// Erstellt eine neue Peer Connection
    async fn new_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, TransportError> {
        // Media Engine mit den Standard-Codecs (enthält PCMU)
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(webrtc_error)?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(webrtc_error)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        Ok(Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(webrtc_error)?,
        ))
    }

    /// Registriert Event Handler für die Peer Connection
    fn register_handlers(pc: &RTCPeerConnection, events: &TransportEvents, playback: AudioBuffer) {
        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::debug!("Peer connection state: {:?}", s);
            if let Some(state) = map_state(s) {
                state_events.emit(TransportEvent::ConnectionState(state));
            }
            Box::pin(async {})
        }));

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(c) = candidate {
                match c.to_json() {
                    Ok(init) => {
                        candidate_events.emit(TransportEvent::LocalCandidate(from_init(init)))
                    }
                    Err(e) => tracing::warn!("Failed to serialize ICE candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        let track_events = events.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let codec = track.codec().capability.mime_type;
            tracing::info!("Received track: {}", codec);
            track_events.emit(TransportEvent::RemoteTrack {
                codec: codec.clone(),
            });
            tokio::spawn(pump_remote(track, codec, playback.clone()));
            Box::pin(async {})
        }));
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        media: MediaTap,
        events: TransportEvents,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let pc = self.new_peer_connection().await?;
        Self::register_handlers(&pc, &events, media.playback.clone());

        let audio_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_string(),
                clock_rate: SAMPLE_RATE,
                channels: 1,
                ..Default::default()
            },
            "audio".to_string(),
            "echolink".to_string(),
        ));

        let rtp_sender = match pc
            .add_track(Arc::clone(&audio_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
        {
            Ok(sender) => sender,
            Err(e) => {
                let _ = pc.close().await;
                return Err(webrtc_error(e));
            }
        };

        // RTCP lesen, sonst laufen die Interceptors nicht
        let rtcp_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtp_sender.read(&mut buf).await.is_ok() {}
        });
        let capture_task = tokio::spawn(pump_capture(audio_track, media.capture));

        tracing::debug!("Created peer connection for call {}", events.call_id());

        Ok(Arc::new(WebRtcTransport {
            pc,
            tasks: Mutex::new(vec![rtcp_task, capture_task]),
        }))
    }
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// Peer Connection eines Anrufs
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self.pc.create_offer(None).await.map_err(webrtc_error)?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(webrtc_error)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self.pc.create_answer(None).await.map_err(webrtc_error)?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(webrtc_error)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        let remote = match description.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(description.sdp),
            SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(|e| TransportError::InvalidSdp(e.to_string()))?;

        self.pc
            .set_remote_description(remote)
            .await
            .map_err(webrtc_error)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.pc
            .add_ice_candidate(to_init(candidate))
            .await
            .map_err(webrtc_error)
    }

    async fn close(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
        }
        if let Err(e) = self.pc.close().await {
            tracing::warn!("Failed to close peer connection: {}", e);
        }
    }
}

// ============================================================================
// MEDIA PUMPS
// ============================================================================

/// Schickt alle 20ms einen Frame aus dem Capture-Buffer
async fn pump_capture(track: Arc<TrackLocalStaticSample>, capture: AudioBuffer) {
    let mut interval = tokio::time::interval(FRAME_DURATION);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let Some(frame) = capture.read_frame(FRAME_SIZE) else {
            continue;
        };

        let sample = Sample {
            data: Bytes::from(codec::encode_frame(&frame)),
            duration: FRAME_DURATION,
            ..Default::default()
        };
        if let Err(e) = track.write_sample(&sample).await {
            tracing::debug!("Failed to write audio sample: {}", e);
        }
    }
}

/// Dekodiert Remote-RTP in den Playback-Buffer
async fn pump_remote(track: Arc<TrackRemote>, codec: String, playback: AudioBuffer) {
    if !codec.eq_ignore_ascii_case(MIME_TYPE_PCMU) {
        tracing::warn!("Remote codec {} not supported, audio will not play", codec);
        return;
    }

    loop {
        match track.read_rtp().await {
            Ok((packet, _)) => {
                if !packet.payload.is_empty() {
                    playback.push_slice(&codec::decode_frame(&packet.payload));
                }
            }
            Err(e) => {
                tracing::debug!("Remote track ended: {}", e);
                break;
            }
        }
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

fn from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnServer;
    use tokio::sync::mpsc;

    fn tap() -> MediaTap {
        MediaTap {
            capture: AudioBuffer::with_capacity(FRAME_SIZE * 4),
            playback: AudioBuffer::with_capacity(FRAME_SIZE * 4),
        }
    }

    #[test]
    fn ice_servers_include_turn_credentials() {
        let config = Config {
            turn: Some(TurnServer {
                url: "turn:turn.example.org:3478".into(),
                username: "user".into(),
                credential: "secret".into(),
            }),
            ..Config::default()
        };

        let servers = ice_servers(&config);

        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, config.stun_urls);
        assert_eq!(servers[1].urls, vec!["turn:turn.example.org:3478".to_string()]);
        assert_eq!(servers[1].username, "user");
        assert_eq!(servers[1].credential, "secret");
    }

    #[test]
    fn candidate_conversion_keeps_all_fields() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: Some("abcd".into()),
        };

        assert_eq!(from_init(to_init(candidate.clone())), candidate);
    }

    #[test]
    fn unspecified_state_is_not_reported() {
        assert_eq!(map_state(RTCPeerConnectionState::Unspecified), None);
        assert_eq!(
            map_state(RTCPeerConnectionState::Failed),
            Some(ConnectionState::Failed)
        );
    }

    #[tokio::test]
    async fn two_transports_negotiate_pcmu() {
        let factory = WebRtcTransportFactory::new(Vec::new());
        let (tx, _rx) = mpsc::unbounded_channel();

        let caller = factory
            .create(tap(), TransportEvents::new(1, tx.clone()))
            .await
            .unwrap();
        let callee = factory
            .create(tap(), TransportEvents::new(2, tx))
            .await
            .unwrap();

        let offer = caller.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("PCMU/8000"));

        callee.set_remote_description(offer).await.unwrap();
        let answer = callee.create_answer().await.unwrap();
        assert_eq!(answer.sdp_type, SdpType::Answer);
        assert!(answer.sdp.contains("PCMU/8000"));

        caller.set_remote_description(answer).await.unwrap();

        caller.close().await;
        callee.close().await;
    }

    #[tokio::test]
    async fn garbage_sdp_is_rejected() {
        let factory = WebRtcTransportFactory::new(Vec::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = factory
            .create(tap(), TransportEvents::new(1, tx))
            .await
            .unwrap();

        let result = transport
            .set_remote_description(SessionDescription::offer("not sdp"))
            .await;

        assert!(result.is_err());
        transport.close().await;
    }
}
