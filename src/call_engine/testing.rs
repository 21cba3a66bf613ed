//! Test-Doubles für Signaling, Media und Transport

use super::controller::CallController;
use super::media::{AudioBuffer, MediaCapture, MediaError, MediaSource, MediaTap};
use super::transport::{
    CallId, Transport, TransportError, TransportEvent, TransportEvents, TransportFactory,
};
use crate::signaling::{
    ClientMessage, IceCandidate, SessionDescription, SignalingError, SignalingEvent,
    SignalingSink,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================================================
// SIGNALING
// ============================================================================

/// Zeichnet alle ausgehenden Nachrichten auf
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<ClientMessage>>,
}

impl RecordingSink {
    /// Entnimmt alle bisher gesendeten Nachrichten
    pub fn take(&self) -> Vec<ClientMessage> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl SignalingSink for RecordingSink {
    fn send(&self, message: ClientMessage) -> Result<(), SignalingError> {
        self.sent.lock().push(message);
        Ok(())
    }
}

/// Übersetzt eine Nachricht von `from` so, wie das Relay sie zustellt
pub fn relay(from: &str, message: ClientMessage) -> SignalingEvent {
    let from = from.to_string();
    match message {
        ClientMessage::CallUser { offer, .. } => SignalingEvent::Offer { from, offer },
        ClientMessage::MakeAnswer { answer, .. } => SignalingEvent::Answer { from, answer },
        ClientMessage::IceCandidate { candidate, .. } => SignalingEvent::IceCandidate {
            from: Some(from),
            candidate,
        },
        ClientMessage::EndCall { .. } => SignalingEvent::CallEnded { from: Some(from) },
    }
}

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

// ============================================================================
// MEDIA
// ============================================================================

/// MediaSource, die auf Kommando verweigert
pub struct FakeMedia {
    deny: AtomicBool,
    acquired: AtomicUsize,
    live: Arc<AtomicUsize>,
    muted: Arc<AtomicBool>,
}

impl FakeMedia {
    pub fn new() -> Self {
        Self {
            deny: AtomicBool::new(false),
            acquired: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            muted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    /// Anzahl erfolgreicher Freigaben insgesamt
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Anzahl noch nicht gestoppter Captures
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Mute-Status, wie er zuletzt an eine Capture angelegt wurde
    pub fn capture_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }
}

struct FakeCapture {
    live: Arc<AtomicUsize>,
    muted: Arc<AtomicBool>,
    stopped: bool,
    tap: MediaTap,
}

impl MediaCapture for FakeCapture {
    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn tap(&self) -> MediaTap {
        self.tap.clone()
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl MediaSource for FakeMedia {
    async fn acquire(&self) -> Result<Box<dyn MediaCapture>, MediaError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(MediaError::AccessDenied("denied by test".into()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCapture {
            live: Arc::clone(&self.live),
            muted: Arc::clone(&self.muted),
            stopped: false,
            tap: MediaTap {
                capture: AudioBuffer::with_capacity(16),
                playback: AudioBuffer::with_capacity(16),
            },
        }))
    }
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// Transport, der alle Aufrufe aufzeichnet
pub struct FakeTransport {
    pub events: TransportEvents,
    remote: Mutex<Vec<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    closed: AtomicBool,
    fail_remote: bool,
}

impl FakeTransport {
    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::offer(format!(
            "offer-{}",
            self.events.call_id()
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::answer(format!(
            "answer-{}",
            self.events.call_id()
        )))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        if self.fail_remote {
            return Err(TransportError::InvalidSdp("rejected by test".into()));
        }
        self.remote.lock().push(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeTransportFactory {
    created: Mutex<Vec<Arc<FakeTransport>>>,
    fail_create: AtomicBool,
    fail_remote: AtomicBool,
}

impl FakeTransportFactory {
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_remote(&self, fail: bool) {
        self.fail_remote.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    pub fn last(&self) -> Option<Arc<FakeTransport>> {
        self.created.lock().last().cloned()
    }

    /// Anzahl noch nicht geschlossener Transports
    pub fn open(&self) -> usize {
        self.created.lock().iter().filter(|t| !t.is_closed()).count()
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create(
        &self,
        _media: MediaTap,
        events: TransportEvents,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TransportError::WebRTC("no transport in test".into()));
        }
        let transport = Arc::new(FakeTransport {
            events,
            remote: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_remote: self.fail_remote.load(Ordering::SeqCst),
        });
        self.created.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// Ein Controller mit Doubles, bereits mit `local_id` verbunden
pub struct Harness {
    pub controller: CallController,
    pub sink: Arc<RecordingSink>,
    pub media: Arc<FakeMedia>,
    pub transports: Arc<FakeTransportFactory>,
    pub events: mpsc::UnboundedReceiver<(CallId, TransportEvent)>,
}

impl Harness {
    pub async fn connected(local_id: &str) -> Self {
        let sink = Arc::new(RecordingSink::default());
        let media = Arc::new(FakeMedia::new());
        let transports = Arc::new(FakeTransportFactory::default());

        let (mut controller, events) = CallController::new(
            sink.clone(),
            media.clone(),
            transports.clone(),
        );
        controller
            .handle_signaling_event(SignalingEvent::Connected {
                local_id: local_id.to_string(),
            })
            .await;

        Self {
            controller,
            sink,
            media,
            transports,
            events,
        }
    }

    /// Media und Transport sind genau in `Calling`/`Active` belegt
    pub fn assert_resources_consistent(&self) {
        let session = self.controller.session();
        let holds = session.phase().holds_resources();

        assert_eq!(session.has_media(), holds, "media in {:?}", session.phase());
        assert_eq!(
            session.has_transport(),
            holds,
            "transport in {:?}",
            session.phase()
        );
        assert_eq!(self.media.live(), usize::from(holds));
        assert_eq!(self.transports.open(), usize::from(holds));
    }

    /// Stellt alle gesendeten Nachrichten dem Harness `to` zu
    pub async fn deliver_to(&self, to: &mut Harness) -> usize {
        let from = self
            .controller
            .session()
            .local_id()
            .unwrap_or_default()
            .to_string();
        let messages = self.sink.take();
        let count = messages.len();
        for message in messages {
            to.controller
                .handle_signaling_event(relay(&from, message))
                .await;
        }
        count
    }
}
