//! Peer Connection Controller
//!
//! Besitzt den kompletten Lebenszyklus einer Peer Connection: lokale Medien,
//! Offer/Answer/Candidate-Austausch über das Relay und den geordneten Abbau.
//! Fehler werden hier gefangen; asynchrone Callbacks geben nie einen Fehler
//! nach außen weiter.

use super::media::{LocalMedia, MediaAccessError, MediaDevices};
use super::transport::{PeerTransport, TransportError, TransportEvent, TransportFactory};
use crate::signaling::{IceCandidate, SessionDescription, SignalingMessage, SignalingSink};
use crate::EventCallback;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum PeerError {
    #[error("{0}")]
    Media(#[from] MediaAccessError),

    #[error("Failed to create peer connection: {0}")]
    Transport(#[from] TransportError),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Peer connection already initialized")]
    AlreadyInitialized,

    #[error("Peer connection setup cancelled")]
    Cancelled,
}

impl PeerError {
    /// Fehler, nach denen der Anruf nicht weitergehen kann
    pub fn is_fatal(&self) -> bool {
        matches!(self, PeerError::Media(_) | PeerError::Transport(_))
    }
}

// ============================================================================
// PEER STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Noch nichts passiert
    Unstarted,
    /// Kamera und Mikrofon werden angefordert
    Capturing,
    /// Transport steht, lokale Tracks sind angehängt
    Connected,
    /// Offer oder Answer ist unterwegs
    Negotiating,
    /// Remote-Track ist angekommen
    Active,
    Closed,
}

// ============================================================================
// PEER CONNECTION CONTROLLER
// ============================================================================

pub struct PeerConnectionController {
    state: PeerState,
    signaling: Arc<dyn SignalingSink>,
    devices: Arc<dyn MediaDevices>,
    transports: Arc<dyn TransportFactory>,
    liveness: CancellationToken,
    on_event: EventCallback<TransportEvent>,
    media: Option<LocalMedia>,
    transport: Option<Arc<dyn PeerTransport>>,
    offer_sent: bool,
    remote_description_set: bool,
    /// Candidates, die vor der Remote Description ankamen
    pending_candidates: Vec<IceCandidate>,
    remote_stream_present: bool,
}

impl PeerConnectionController {
    /// `on_event` erhält Remote-Tracks und Zustandswechsel des Transports.
    /// Lokale Candidates gehen direkt über `signaling` raus.
    pub fn new(
        signaling: Arc<dyn SignalingSink>,
        devices: Arc<dyn MediaDevices>,
        transports: Arc<dyn TransportFactory>,
        liveness: CancellationToken,
        on_event: EventCallback<TransportEvent>,
    ) -> Self {
        Self {
            state: PeerState::Unstarted,
            signaling,
            devices,
            transports,
            liveness,
            on_event,
            media: None,
            transport: None,
            offer_sent: false,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            remote_stream_present: false,
        }
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn remote_stream_present(&self) -> bool {
        self.remote_stream_present
    }

    #[cfg(test)]
    pub(crate) fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Fordert Medien an und baut den Transport
    ///
    /// Nur einmal pro Controller; ein zweiter Aufruf ist ein Fehler.
    pub async fn initialize(&mut self) -> Result<(), PeerError> {
        if self.state != PeerState::Unstarted {
            return Err(PeerError::AlreadyInitialized);
        }
        self.state = PeerState::Capturing;

        let media = tokio::select! {
            biased;
            _ = self.liveness.cancelled() => return Err(PeerError::Cancelled),
            media = self.devices.acquire(&self.liveness) => media?,
        };

        // Session endete während der Medienanfrage
        if self.liveness.is_cancelled() {
            media.stop();
            return Err(PeerError::Cancelled);
        }

        let signaling = Arc::clone(&self.signaling);
        let forward = Arc::clone(&self.on_event);
        let on_event: EventCallback<TransportEvent> = Arc::new(move |event| match event {
            TransportEvent::LocalCandidate(candidate) => {
                signaling.send(&SignalingMessage::Ice { candidate });
            }
            other => forward(other),
        });

        let transport = match self.transports.create(&media, on_event).await {
            Ok(transport) => transport,
            Err(e) => {
                media.stop();
                return Err(e.into());
            }
        };

        if self.liveness.is_cancelled() {
            media.stop();
            if let Err(e) = transport.close().await {
                tracing::debug!("Failed to close transport: {}", e);
            }
            return Err(PeerError::Cancelled);
        }

        self.media = Some(media);
        self.transport = Some(transport);
        self.state = PeerState::Connected;
        tracing::info!("Peer connection ready");
        Ok(())
    }

    /// Erstellt und sendet ein Offer
    ///
    /// `Ok(false)` wenn keine lokalen Medien hängen oder das Relay zu ist.
    pub async fn create_offer(&mut self) -> Result<bool, PeerError> {
        if !matches!(self.state, PeerState::Connected | PeerState::Negotiating) {
            tracing::debug!("Ignoring create_offer in state {:?}", self.state);
            return Ok(false);
        }
        if !self.signaling.is_open() {
            tracing::warn!("Cannot send offer, relay channel is not open");
            return Ok(false);
        }
        let Some(transport) = self.transport.clone() else {
            return Ok(false);
        };

        let offer = transport.create_offer().await.map_err(Self::negotiation)?;
        transport
            .set_local_description(offer.clone())
            .await
            .map_err(Self::negotiation)?;

        if self.liveness.is_cancelled() {
            return Ok(false);
        }

        self.signaling.send(&SignalingMessage::Offer { offer });
        self.offer_sent = true;
        self.state = PeerState::Negotiating;
        tracing::info!("Offer sent");
        Ok(true)
    }

    /// Beantwortet ein Offer der Gegenseite
    pub async fn handle_remote_offer(&mut self, offer: SessionDescription) -> Result<bool, PeerError> {
        if matches!(self.state, PeerState::Active | PeerState::Closed) {
            tracing::debug!("Ignoring remote offer in state {:?}", self.state);
            return Ok(false);
        }
        let Some(transport) = self.transport.clone() else {
            tracing::warn!("Ignoring remote offer, peer connection not ready");
            return Ok(false);
        };

        transport
            .set_remote_description(offer)
            .await
            .map_err(Self::negotiation)?;
        self.remote_description_set = true;
        self.flush_candidates(&transport).await;

        let answer = transport.create_answer().await.map_err(Self::negotiation)?;
        transport
            .set_local_description(answer.clone())
            .await
            .map_err(Self::negotiation)?;

        if self.liveness.is_cancelled() {
            return Ok(false);
        }

        self.signaling.send(&SignalingMessage::Answer { answer });
        self.state = PeerState::Negotiating;
        tracing::info!("Answer sent");
        Ok(true)
    }

    /// Übernimmt die Answer der Gegenseite (nur nach eigenem Offer)
    pub async fn handle_remote_answer(
        &mut self,
        answer: SessionDescription,
    ) -> Result<bool, PeerError> {
        if !self.offer_sent || self.remote_description_set || self.state == PeerState::Closed {
            tracing::debug!("Ignoring unexpected remote answer");
            return Ok(false);
        }
        let Some(transport) = self.transport.clone() else {
            return Ok(false);
        };

        transport
            .set_remote_description(answer)
            .await
            .map_err(Self::negotiation)?;
        self.remote_description_set = true;
        self.flush_candidates(&transport).await;

        tracing::info!("Remote answer applied");
        Ok(true)
    }

    /// Fügt einen Candidate hinzu oder reiht ihn ein
    pub async fn handle_remote_candidate(&mut self, candidate: IceCandidate) -> Result<(), PeerError> {
        if self.state == PeerState::Closed {
            return Ok(());
        }

        let transport = match &self.transport {
            Some(transport) if self.remote_description_set => Arc::clone(transport),
            _ => {
                tracing::debug!("Queueing early ICE candidate");
                self.pending_candidates.push(candidate);
                return Ok(());
            }
        };

        transport
            .add_ice_candidate(candidate)
            .await
            .map_err(Self::negotiation)
    }

    /// Markiert den Remote-Stream; `true` beim ersten Track
    pub fn on_remote_track(&mut self) -> bool {
        if self.state == PeerState::Closed {
            return false;
        }
        self.state = PeerState::Active;
        let first = !self.remote_stream_present;
        self.remote_stream_present = true;
        first
    }

    /// Baut alles ab: lokale Medien, Transport, Relay-Kanal
    ///
    /// Idempotent; `false` wenn bereits abgebaut.
    pub async fn terminate(&mut self) -> bool {
        if self.state == PeerState::Closed {
            return false;
        }
        self.state = PeerState::Closed;
        self.liveness.cancel();

        if let Some(media) = self.media.take() {
            media.stop();
        }

        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                tracing::warn!("Failed to close peer connection: {}", e);
            }
        }

        self.signaling.close();
        self.pending_candidates.clear();

        tracing::info!("Peer connection terminated");
        true
    }

    async fn flush_candidates(&mut self, transport: &Arc<dyn PeerTransport>) {
        if self.pending_candidates.is_empty() {
            return;
        }

        let pending = std::mem::take(&mut self.pending_candidates);
        tracing::debug!("Applying {} queued ICE candidates", pending.len());
        for candidate in pending {
            if let Err(e) = transport.add_ice_candidate(candidate).await {
                tracing::warn!("Failed to add queued ICE candidate: {}", e);
            }
        }
    }

    fn negotiation(e: TransportError) -> PeerError {
        PeerError::Negotiation(e.to_string())
    }
}

impl std::fmt::Debug for PeerConnectionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnectionController")
            .field("state", &self.state)
            .field("offer_sent", &self.offer_sent)
            .field("remote_description_set", &self.remote_description_set)
            .field("pending_candidates", &self.pending_candidates.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::MediaCapture;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    type Log = Arc<Mutex<Vec<String>>>;

    struct RecordingSink {
        open: AtomicBool,
        sent: Mutex<Vec<SignalingMessage>>,
        log: Log,
    }

    impl SignalingSink for RecordingSink {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn send(&self, message: &SignalingMessage) {
            if self.is_open() {
                self.sent.lock().push(message.clone());
            }
        }

        fn close(&self) {
            if self.open.swap(false, Ordering::SeqCst) {
                self.log.lock().push("signaling closed".into());
            }
        }
    }

    struct LoggingCapture(Log);

    impl MediaCapture for LoggingCapture {
        fn stop(&mut self) {
            self.0.lock().push("media stopped".into());
        }
    }

    struct FakeDevices {
        log: Log,
        fail: Option<MediaAccessError>,
    }

    #[async_trait]
    impl MediaDevices for FakeDevices {
        async fn acquire(&self, _cancel: &CancellationToken) -> Result<LocalMedia, MediaAccessError> {
            if let Some(e) = &self.fail {
                return Err(e.clone());
            }
            Ok(LocalMedia::new(
                vec![],
                vec![Box::new(LoggingCapture(Arc::clone(&self.log)))],
            ))
        }
    }

    struct FakeTransport {
        log: Log,
    }

    #[async_trait]
    impl PeerTransport for FakeTransport {
        async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
            Ok(SessionDescription::offer("local-offer"))
        }

        async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
            Ok(SessionDescription::answer("local-answer"))
        }

        async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
            self.log.lock().push(format!("local {}", desc.sdp));
            Ok(())
        }

        async fn set_remote_description(
            &self,
            desc: SessionDescription,
        ) -> Result<(), TransportError> {
            if desc.sdp == "broken" {
                return Err(TransportError::InvalidSdp("broken".into()));
            }
            self.log.lock().push(format!("remote {}", desc.sdp));
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
            self.log.lock().push(format!("candidate {}", candidate.candidate));
            Ok(())
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.log.lock().push("transport closed".into());
            Ok(())
        }
    }

    struct FakeFactory {
        log: Log,
        events: Mutex<Option<EventCallback<TransportEvent>>>,
    }

    #[async_trait]
    impl TransportFactory for FakeFactory {
        async fn create(
            &self,
            _media: &LocalMedia,
            on_event: EventCallback<TransportEvent>,
        ) -> Result<Arc<dyn PeerTransport>, TransportError> {
            *self.events.lock() = Some(on_event);
            Ok(Arc::new(FakeTransport {
                log: Arc::clone(&self.log),
            }))
        }
    }

    struct Harness {
        controller: PeerConnectionController,
        sink: Arc<RecordingSink>,
        factory: Arc<FakeFactory>,
        log: Log,
        forwarded: Arc<Mutex<Vec<TransportEvent>>>,
    }

    fn harness_with(fail: Option<MediaAccessError>) -> Harness {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::new(RecordingSink {
            open: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            log: Arc::clone(&log),
        });
        let factory = Arc::new(FakeFactory {
            log: Arc::clone(&log),
            events: Mutex::new(None),
        });
        let devices = Arc::new(FakeDevices {
            log: Arc::clone(&log),
            fail,
        });
        let forwarded = Arc::new(Mutex::new(Vec::new()));
        let forwarded_clone = Arc::clone(&forwarded);

        let controller = PeerConnectionController::new(
            sink.clone(),
            devices,
            factory.clone(),
            CancellationToken::new(),
            Arc::new(move |event| forwarded_clone.lock().push(event)),
        );

        Harness {
            controller,
            sink,
            factory,
            log,
            forwarded,
        }
    }

    fn harness() -> Harness {
        harness_with(None)
    }

    #[tokio::test]
    async fn initialize_twice_is_rejected() {
        let mut h = harness();
        h.controller.initialize().await.unwrap();
        assert_eq!(h.controller.state(), PeerState::Connected);

        let err = h.controller.initialize().await.unwrap_err();
        assert!(matches!(err, PeerError::AlreadyInitialized));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn media_failure_is_fatal() {
        let mut h = harness_with(Some(MediaAccessError::NoVideoDevice));
        let err = h.controller.initialize().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "No camera available");
    }

    #[tokio::test]
    async fn create_offer_requires_media_and_open_channel() {
        let mut h = harness();
        assert!(!h.controller.create_offer().await.unwrap());

        h.controller.initialize().await.unwrap();
        h.sink.open.store(false, Ordering::SeqCst);
        assert!(!h.controller.create_offer().await.unwrap());
        assert!(h.sink.sent.lock().is_empty());

        h.sink.open.store(true, Ordering::SeqCst);
        assert!(h.controller.create_offer().await.unwrap());
        assert_eq!(h.controller.state(), PeerState::Negotiating);
        assert_eq!(
            h.sink.sent.lock().as_slice(),
            &[SignalingMessage::Offer {
                offer: SessionDescription::offer("local-offer")
            }]
        );
    }

    #[tokio::test]
    async fn answer_is_only_applied_after_own_offer() {
        let mut h = harness();
        h.controller.initialize().await.unwrap();

        assert!(!h
            .controller
            .handle_remote_answer(SessionDescription::answer("early"))
            .await
            .unwrap());

        h.controller.create_offer().await.unwrap();
        assert!(h
            .controller
            .handle_remote_answer(SessionDescription::answer("remote-answer"))
            .await
            .unwrap());
        assert!(h.log.lock().contains(&"remote remote-answer".to_string()));
    }

    #[tokio::test]
    async fn remote_offer_is_answered() {
        let mut h = harness();
        h.controller.initialize().await.unwrap();

        assert!(h
            .controller
            .handle_remote_offer(SessionDescription::offer("remote-offer"))
            .await
            .unwrap());

        assert_eq!(
            h.log.lock().as_slice(),
            &["remote remote-offer".to_string(), "local local-answer".to_string()]
        );
        assert_eq!(
            h.sink.sent.lock().as_slice(),
            &[SignalingMessage::Answer {
                answer: SessionDescription::answer("local-answer")
            }]
        );
    }

    #[tokio::test]
    async fn remote_offer_is_ignored_once_active() {
        let mut h = harness();
        h.controller.initialize().await.unwrap();
        assert!(h.controller.on_remote_track());
        assert!(!h.controller.on_remote_track());
        assert_eq!(h.controller.state(), PeerState::Active);

        assert!(!h
            .controller
            .handle_remote_offer(SessionDescription::offer("late"))
            .await
            .unwrap());
        assert!(h.sink.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn early_candidates_are_applied_after_remote_description() {
        let mut h = harness();

        // Vor initialize und vor der Remote Description
        h.controller
            .handle_remote_candidate(IceCandidate::new("c1"))
            .await
            .unwrap();
        h.controller.initialize().await.unwrap();
        h.controller
            .handle_remote_candidate(IceCandidate::new("c2"))
            .await
            .unwrap();
        assert_eq!(h.controller.pending_candidates(), 2);
        assert!(h.log.lock().is_empty());

        h.controller
            .handle_remote_offer(SessionDescription::offer("remote-offer"))
            .await
            .unwrap();
        h.controller
            .handle_remote_candidate(IceCandidate::new("c3"))
            .await
            .unwrap();

        assert_eq!(h.controller.pending_candidates(), 0);
        assert_eq!(
            h.log.lock().as_slice(),
            &[
                "remote remote-offer".to_string(),
                "candidate c1".to_string(),
                "candidate c2".to_string(),
                "local local-answer".to_string(),
                "candidate c3".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn negotiation_failure_keeps_prior_state() {
        let mut h = harness();
        h.controller.initialize().await.unwrap();

        let err = h
            .controller
            .handle_remote_offer(SessionDescription::offer("broken"))
            .await
            .unwrap_err();
        assert!(matches!(err, PeerError::Negotiation(_)));
        assert!(!err.is_fatal());
        assert_eq!(h.controller.state(), PeerState::Connected);
        assert!(h.sink.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn local_candidates_go_straight_to_signaling() {
        let mut h = harness();
        h.controller.initialize().await.unwrap();

        let on_event = h.factory.events.lock().clone().unwrap();
        on_event(TransportEvent::LocalCandidate(IceCandidate::new("local-1")));
        on_event(TransportEvent::RemoteTrack {
            kind: crate::call_engine::TrackKind::Video,
            frames: None,
        });

        assert_eq!(
            h.sink.sent.lock().as_slice(),
            &[SignalingMessage::Ice {
                candidate: IceCandidate::new("local-1")
            }]
        );
        assert_eq!(h.forwarded.lock().len(), 1);
    }

    #[tokio::test]
    async fn terminate_tears_down_in_order_once() {
        let mut h = harness();
        h.controller.initialize().await.unwrap();

        assert!(h.controller.terminate().await);
        assert!(!h.controller.terminate().await);
        assert_eq!(h.controller.state(), PeerState::Closed);

        assert_eq!(
            h.log.lock().as_slice(),
            &[
                "media stopped".to_string(),
                "transport closed".to_string(),
                "signaling closed".to_string(),
            ]
        );

        // Nach dem Abbau passiert nichts mehr
        assert!(!h.controller.create_offer().await.unwrap());
        assert!(!h.controller.on_remote_track());
    }

    #[tokio::test]
    async fn terminate_before_initialize_closes_signaling() {
        let mut h = harness();
        assert!(h.controller.terminate().await);
        assert_eq!(h.log.lock().as_slice(), &["signaling closed".to_string()]);

        let err = h.controller.initialize().await.unwrap_err();
        assert!(matches!(err, PeerError::AlreadyInitialized));
    }
}
