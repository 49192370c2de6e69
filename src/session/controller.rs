//! Call Session Controller
//!
//! Ein Task besitzt den gesamten Zustand der Session und arbeitet eine
//! einzige Queue ab: Befehle der Oberfläche, Relay-Nachrichten,
//! Transport-Events und Detection-Samples. Die Oberfläche spricht nur mit
//! dem `CallSession` Handle.

use super::events::{
    CallNotification, CallSnapshot, CallState, EndCause, SessionCommand, SessionEvent,
};
use crate::call_engine::{
    ConnectionState, MediaDevices, PeerConnectionController, PeerError, TransportEvent,
    TransportFactory,
};
use crate::config::AppConfig;
use crate::database::SessionLedger;
use crate::detection::{DetectionLoop, DetectionSettings, EmotionClassifier, EmotionSample};
use crate::feedback::{AudioCueDispatcher, CueAssets, CuePlayer};
use crate::signaling::{
    SignalingClient, SignalingError, SignalingEvent, SignalingMessage, SignalingSink,
};
use crate::EventCallback;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Puffer für Notifications je Abonnent
const NOTIFICATION_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to reach relay: {0}")]
    Signaling(#[from] SignalingError),
}

/// Einstellungen einer einzelnen Session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub relay_url: String,
    /// Angemeldeter Benutzer; ohne ihn wird kein Ledger-Eintrag geschrieben
    pub local_user_id: Option<i64>,
    pub assets_dir: PathBuf,
    pub detection: DetectionSettings,
    pub audio_cues: bool,
}

impl SessionConfig {
    pub fn from_app(config: &AppConfig, local_user_id: Option<i64>) -> Self {
        Self {
            relay_url: config.relay_url.clone(),
            local_user_id,
            assets_dir: config.assets_dir.clone(),
            detection: config.detection,
            audio_cues: true,
        }
    }
}

/// Austauschbare Bausteine einer Session
#[derive(Clone)]
pub struct CallDependencies {
    pub devices: Arc<dyn MediaDevices>,
    pub transports: Arc<dyn TransportFactory>,
    pub classifier: Arc<dyn EmotionClassifier>,
    pub player: Arc<dyn CuePlayer>,
    pub ledger: Option<Arc<dyn SessionLedger>>,
}

// ============================================================================
// HANDLE
// ============================================================================

/// Handle auf eine laufende Session
pub struct CallSession {
    id: Uuid,
    events: mpsc::UnboundedSender<SessionEvent>,
    liveness: CancellationToken,
    snapshot: watch::Receiver<CallSnapshot>,
    notifications: broadcast::Sender<CallNotification>,
}

impl CallSession {
    /// Verbindet mit dem Relay und startet den Session-Task
    ///
    /// Medien werden sofort angefordert; ein Fehler dabei beendet die Session
    /// mit `EndCause::Error`.
    pub async fn start(config: SessionConfig, deps: CallDependencies) -> Result<Self, SessionError> {
        let id = Uuid::new_v4();
        let liveness = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let tx = events_tx.clone();
        let on_signaling: EventCallback<SignalingEvent> = Arc::new(move |event| {
            let _ = tx.send(SessionEvent::Signaling(event));
        });
        let signaling: Arc<dyn SignalingSink> =
            Arc::new(SignalingClient::connect(&config.relay_url, on_signaling).await?);

        let tx = events_tx.clone();
        let on_transport: EventCallback<TransportEvent> = Arc::new(move |event| {
            let _ = tx.send(SessionEvent::Transport(event));
        });
        let peer = PeerConnectionController::new(
            Arc::clone(&signaling),
            deps.devices,
            deps.transports,
            liveness.clone(),
            on_transport,
        );

        let detection = DetectionLoop::new(deps.classifier, config.detection, &liveness);

        let mut cues = AudioCueDispatcher::new(CueAssets::new(config.assets_dir), deps.player);
        cues.set_enabled(config.audio_cues);

        let (snapshot_tx, snapshot_rx) =
            watch::channel(CallSnapshot::new(id, config.local_user_id));
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let actor = SessionActor {
            state: CallState::Idle,
            local_user_id: config.local_user_id,
            signaling,
            peer,
            detection,
            cues,
            ledger: deps.ledger,
            ledger_session: None,
            events: events_tx.clone(),
            snapshot: snapshot_tx,
            notifications: notifications.clone(),
        };

        let span = tracing::info_span!(
            "call_session",
            session = %id,
            user = ?config.local_user_id
        );
        tokio::spawn(actor.run(events_rx).instrument(span));

        Ok(Self {
            id,
            events: events_tx,
            liveness,
            snapshot: snapshot_rx,
            notifications,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Startet den Anruf (Offer an die Gegenseite)
    pub fn start_call(&self) -> bool {
        self.command(SessionCommand::StartCall)
    }

    /// Legt auf; laufende Medien- und SDP-Arbeit wird sofort abgebrochen
    pub fn end_call(&self) -> bool {
        self.liveness.cancel();
        self.command(SessionCommand::EndCall)
    }

    /// Schaltet Audio-Cues ein oder stumm
    pub fn set_audio_cues(&self, enabled: bool) -> bool {
        self.command(SessionCommand::SetAudioCues(enabled))
    }

    pub fn state(&self) -> CallState {
        self.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallNotification> {
        self.notifications.subscribe()
    }

    /// Wartet bis die Session beendet ist
    pub async fn wait_ended(&self) -> EndCause {
        let mut snapshot = self.snapshot.clone();
        let cause = match snapshot.wait_for(|s| s.state.is_terminal()).await {
            Ok(s) => s
                .end_cause
                .clone()
                .unwrap_or_else(|| EndCause::Error("session ended without cause".to_string())),
            Err(_) => EndCause::Error("session task stopped".to_string()),
        };
        cause
    }

    fn command(&self, command: SessionCommand) -> bool {
        self.events.send(SessionEvent::Command(command)).is_ok()
    }
}

impl Drop for CallSession {
    /// Ein verworfenes Handle legt auf
    fn drop(&mut self) {
        self.liveness.cancel();
        let _ = self.events.send(SessionEvent::Command(SessionCommand::EndCall));
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// ACTOR
// ============================================================================

struct SessionActor {
    state: CallState,
    local_user_id: Option<i64>,
    signaling: Arc<dyn SignalingSink>,
    peer: PeerConnectionController,
    detection: DetectionLoop,
    cues: AudioCueDispatcher,
    ledger: Option<Arc<dyn SessionLedger>>,
    ledger_session: Option<i64>,
    events: mpsc::UnboundedSender<SessionEvent>,
    snapshot: watch::Sender<CallSnapshot>,
    notifications: broadcast::Sender<CallNotification>,
}

impl SessionActor {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        tracing::info!("Call session started");
        self.start_ledger();
        self.detection.preload();

        match self.peer.initialize().await {
            Ok(()) => {}
            // end_call kam während der Medienanfrage; der Befehl liegt in der Queue
            Err(PeerError::Cancelled) => {}
            Err(e) => self.finish(EndCause::Error(e.to_string())).await,
        }

        while !self.state.is_terminal() {
            let Some(event) = events.recv().await else {
                break;
            };
            self.handle(event).await;
        }

        tracing::info!("Call session finished");
    }

    async fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Command(command) => self.handle_command(command).await,
            SessionEvent::Signaling(event) => self.handle_signaling(event).await,
            SessionEvent::Transport(event) => self.handle_transport(event).await,
            SessionEvent::Detection(sample) => self.handle_sample(sample),
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::StartCall => {
                if !matches!(self.state, CallState::Idle | CallState::Negotiating) {
                    tracing::debug!("Ignoring start_call in state {:?}", self.state);
                    return;
                }
                match self.peer.create_offer().await {
                    Ok(true) => self.set_state(CallState::Negotiating),
                    Ok(false) => tracing::warn!("Call not started"),
                    Err(e) => self.on_peer_error(e).await,
                }
            }
            SessionCommand::EndCall => self.finish(EndCause::Local).await,
            SessionCommand::SetAudioCues(enabled) => self.cues.set_enabled(enabled),
        }
    }

    async fn handle_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Message(SignalingMessage::Offer { offer }) => {
                match self.peer.handle_remote_offer(offer).await {
                    Ok(true) if self.state == CallState::Idle => {
                        self.set_state(CallState::Negotiating)
                    }
                    Ok(_) => {}
                    Err(e) => self.on_peer_error(e).await,
                }
            }
            SignalingEvent::Message(SignalingMessage::Answer { answer }) => {
                if let Err(e) = self.peer.handle_remote_answer(answer).await {
                    self.on_peer_error(e).await;
                }
            }
            SignalingEvent::Message(SignalingMessage::Ice { candidate }) => {
                if let Err(e) = self.peer.handle_remote_candidate(candidate).await {
                    self.on_peer_error(e).await;
                }
            }
            SignalingEvent::Message(SignalingMessage::EndCall) => {
                tracing::info!("Remote side ended the call");
                self.finish(EndCause::Remote).await;
            }
            SignalingEvent::Closed => {
                self.finish(EndCause::Error("relay channel closed".to_string()))
                    .await
            }
            SignalingEvent::Failed(reason) => self.finish(EndCause::Error(reason)).await,
        }
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::RemoteTrack { kind, frames } => {
                if self.state.is_terminal() {
                    return;
                }
                tracing::info!("Remote {:?} track arrived", kind);
                if self.peer.on_remote_track() {
                    self.snapshot.send_modify(|s| s.remote_stream_present = true);
                    self.set_state(CallState::Active);
                }

                // Erkennung startet mit dem ersten Track, der Frames liefert
                if let Some(frames) = frames {
                    let events = self.events.clone();
                    let started = self.detection.start(
                        Arc::new(frames),
                        Arc::new(move |sample| {
                            let _ = events.send(SessionEvent::Detection(sample));
                        }),
                    );
                    if !started {
                        tracing::debug!("Emotion detection already running");
                    }
                }
            }
            TransportEvent::StateChanged(ConnectionState::Failed) => {
                self.finish(EndCause::Error("peer connection failed".to_string()))
                    .await
            }
            TransportEvent::StateChanged(state) => {
                tracing::debug!("Peer connection state: {:?}", state);
            }
            TransportEvent::LocalCandidate(_) => {
                tracing::debug!("Local candidate reached the session queue");
            }
        }
    }

    fn handle_sample(&mut self, sample: Option<EmotionSample>) {
        if self.state != CallState::Active {
            return;
        }

        let repeated_none = sample.is_none() && self.snapshot.borrow().emotion.is_none();
        self.cues.observe(sample.as_ref());
        if repeated_none {
            return;
        }

        self.snapshot.send_modify(|s| s.emotion = sample.clone());
        self.notify(CallNotification::Emotion(sample));
    }

    async fn on_peer_error(&mut self, e: PeerError) {
        if e.is_fatal() {
            self.finish(EndCause::Error(e.to_string())).await;
        } else {
            tracing::warn!("{}", e);
        }
    }

    /// Beendet die Session; nur der erste Aufruf wirkt
    async fn finish(&mut self, cause: EndCause) {
        if self.state.is_terminal() {
            return;
        }
        tracing::info!("Ending call ({})", cause);

        self.detection.stop();
        if cause != EndCause::Remote {
            self.signaling.send(&SignalingMessage::EndCall);
        }
        self.peer.terminate().await;
        self.end_ledger();

        self.snapshot.send_modify(|s| s.end_cause = Some(cause.clone()));
        self.set_state(CallState::Ended);
        self.notify(CallNotification::Ended(cause));
    }

    fn set_state(&mut self, state: CallState) {
        if self.state == state || self.state.is_terminal() {
            return;
        }
        tracing::info!("Call state: {:?} -> {:?}", self.state, state);
        self.state = state;
        self.snapshot.send_modify(|s| s.state = state);
        self.notify(CallNotification::StateChanged(state));
    }

    fn notify(&self, notification: CallNotification) {
        // Ohne Abonnenten ist das kein Fehler
        let _ = self.notifications.send(notification);
    }

    fn start_ledger(&mut self) {
        let (Some(ledger), Some(user_id)) = (&self.ledger, self.local_user_id) else {
            return;
        };
        match ledger.start_session(user_id) {
            Ok(entry) => {
                self.ledger_session = Some(entry.id);
                self.snapshot.send_modify(|s| s.ledger_session_id = Some(entry.id));
            }
            Err(e) => tracing::warn!("Failed to record session start: {}", e),
        }
    }

    fn end_ledger(&mut self) {
        let (Some(ledger), Some(session_id)) = (&self.ledger, self.ledger_session.take()) else {
            return;
        };
        if let Err(e) = ledger.end_session(session_id) {
            tracing::warn!("Failed to record session end: {}", e);
        }
    }
}
