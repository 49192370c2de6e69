//! Gemeinsame Test-Bausteine: In-Process Relay und Fakes

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use emotisound::call_engine::{
    ConnectionState, LocalMedia, MediaAccessError, MediaDevices, PeerTransport, TrackKind,
    TransportError, TransportEvent, TransportFactory,
};
use emotisound::detection::{
    ClassifierError, Detection, Emotion, EmotionClassifier, FrameSlot, VideoFrame,
};
use emotisound::feedback::{CuePlayer, PlaybackError};
use emotisound::session::{CallDependencies, CallSession, SessionConfig};
use emotisound::signaling::{IceCandidate, SessionDescription};
use emotisound::{config::AppConfig, EventCallback};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

pub const TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// RELAY
// ============================================================================

/// Relay: verteilt jede Text-Nachricht an alle anderen Verbindungen
pub struct TestRelay {
    pub url: String,
    connections: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<String>>>,
}

impl TestRelay {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let (hub, _) = broadcast::channel::<(usize, String)>(256);

        let counter = Arc::clone(&connections);
        let log = Arc::clone(&received);
        tokio::spawn(async move {
            let mut next_id = 0;
            while let Ok((stream, _)) = listener.accept().await {
                next_id += 1;
                let id = next_id;
                let hub = hub.clone();
                let mut inbox = hub.subscribe();
                let counter = Arc::clone(&counter);
                let log = Arc::clone(&log);

                tokio::spawn(async move {
                    let Ok(ws) = accept_async(stream).await else {
                        return;
                    };
                    let (mut write, mut read) = ws.split();
                    counter.fetch_add(1, Ordering::SeqCst);

                    let forward = tokio::spawn(async move {
                        while let Ok((from, text)) = inbox.recv().await {
                            if from != id && write.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                    });

                    while let Some(Ok(msg)) = read.next().await {
                        match msg {
                            Message::Text(text) => {
                                log.lock().push(text.clone());
                                let _ = hub.send((id, text));
                            }
                            Message::Close(_) => break,
                            _ => {}
                        }
                    }

                    forward.abort();
                    counter.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            url,
            connections,
            received,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub async fn wait_for_connections(&self, count: usize) {
        eventually(|| self.connections() == count).await;
    }

    /// Alle Nachrichten, die das Relay bisher erhalten hat
    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }
}

/// Pollt `check` bis es `true` liefert
pub async fn eventually(check: impl Fn() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ============================================================================
// MEDIA / TRANSPORT
// ============================================================================

/// Liefert leere lokale Medien ohne Hardware
pub struct FakeDevices;

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn acquire(&self, _cancel: &CancellationToken) -> Result<LocalMedia, MediaAccessError> {
        Ok(LocalMedia::new(vec![], vec![]))
    }
}

#[derive(Default)]
struct Negotiation {
    local: bool,
    remote: bool,
    connected: bool,
}

/// Transport, der sich verbindet sobald beide Descriptions gesetzt sind
pub struct FakeTransport {
    name: String,
    on_event: EventCallback<TransportEvent>,
    negotiation: Mutex<Negotiation>,
    candidates: Arc<Mutex<Vec<String>>>,
    audio_first: bool,
}

impl FakeTransport {
    fn connect_if_ready(&self) {
        let ready = {
            let mut n = self.negotiation.lock();
            let ready = n.local && n.remote && !n.connected;
            n.connected |= ready;
            ready
        };
        if !ready {
            return;
        }

        let frames = FrameSlot::new();
        frames.publish(Bytes::from_static(b"remote-frame"));
        (self.on_event)(TransportEvent::StateChanged(ConnectionState::Connected));
        if self.audio_first {
            (self.on_event)(TransportEvent::RemoteTrack {
                kind: TrackKind::Audio,
                frames: None,
            });
        }
        (self.on_event)(TransportEvent::RemoteTrack {
            kind: TrackKind::Video,
            frames: Some(frames),
        });
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::offer(format!("offer from {}", self.name)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::answer(format!("answer from {}", self.name)))
    }

    async fn set_local_description(&self, _desc: SessionDescription) -> Result<(), TransportError> {
        self.negotiation.lock().local = true;
        (self.on_event)(TransportEvent::LocalCandidate(IceCandidate::new(format!(
            "candidate:{}",
            self.name
        ))));
        self.connect_if_ready();
        Ok(())
    }

    async fn set_remote_description(&self, _desc: SessionDescription) -> Result<(), TransportError> {
        self.negotiation.lock().remote = true;
        self.connect_if_ready();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.candidates.lock().push(candidate.candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub struct FakeFactory {
    name: String,
    /// Candidates, die der Transport von der Gegenseite erhalten hat
    pub candidates: Arc<Mutex<Vec<String>>>,
    /// Remote-Audio vor dem Video melden, wie es webrtc meist tut
    audio_first: bool,
}

impl FakeFactory {
    pub fn new(name: &str, audio_first: bool) -> Self {
        Self {
            name: name.to_string(),
            candidates: Arc::new(Mutex::new(Vec::new())),
            audio_first,
        }
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create(
        &self,
        _media: &LocalMedia,
        on_event: EventCallback<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        Ok(Arc::new(FakeTransport {
            name: self.name.clone(),
            on_event,
            negotiation: Mutex::new(Negotiation::default()),
            candidates: Arc::clone(&self.candidates),
            audio_first: self.audio_first,
        }))
    }
}

// ============================================================================
// CLASSIFIER / PLAYER
// ============================================================================

/// Liefert die Ergebnisse in fester Reihenfolge, danach nichts mehr
pub struct ScriptedClassifier {
    script: Mutex<VecDeque<Option<Detection>>>,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new(script: Vec<Option<(Emotion, f32)>>) -> Self {
        Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|entry| entry.map(|(emotion, confidence)| Detection::new(emotion, confidence)))
                    .collect(),
            ),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn silent() -> Self {
        Self::new(vec![])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn exhausted(&self) -> bool {
        self.script.lock().is_empty()
    }
}

#[async_trait]
impl EmotionClassifier for ScriptedClassifier {
    async fn load_models(&self) -> Result<(), ClassifierError> {
        Ok(())
    }

    async fn detect(&self, _frame: &VideoFrame) -> Result<Option<Detection>, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.lock().pop_front().flatten())
    }
}

/// Merkt sich jede angeforderte Cue-Datei
#[derive(Default)]
pub struct RecordingPlayer {
    played: Mutex<Vec<PathBuf>>,
}

impl RecordingPlayer {
    pub fn played(&self) -> Vec<PathBuf> {
        self.played.lock().clone()
    }
}

impl CuePlayer for RecordingPlayer {
    fn play(&self, path: &Path) -> Result<(), PlaybackError> {
        self.played.lock().push(path.to_path_buf());
        Ok(())
    }
}

// ============================================================================
// PEERS
// ============================================================================

/// Eine Seite des Anrufs samt ihrer Fakes
pub struct Peer {
    pub session: CallSession,
    pub factory: Arc<FakeFactory>,
    pub classifier: Arc<ScriptedClassifier>,
    pub player: Arc<RecordingPlayer>,
}

pub struct PeerOptions {
    pub name: &'static str,
    pub classifier: ScriptedClassifier,
    pub local_user_id: Option<i64>,
    pub ledger: Option<Arc<dyn emotisound::database::SessionLedger>>,
    pub audio_first: bool,
}

impl PeerOptions {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            classifier: ScriptedClassifier::silent(),
            local_user_id: None,
            ledger: None,
            audio_first: false,
        }
    }
}

pub async fn join(relay: &TestRelay, options: PeerOptions) -> Peer {
    connect(&relay.url, options).await
}

pub async fn connect(relay_url: &str, options: PeerOptions) -> Peer {
    let factory = Arc::new(FakeFactory::new(options.name, options.audio_first));
    let classifier = Arc::new(options.classifier);
    let player = Arc::new(RecordingPlayer::default());

    let app = AppConfig {
        relay_url: relay_url.to_string(),
        assets_dir: PathBuf::from("cues"),
        ..AppConfig::default()
    };
    let config = SessionConfig::from_app(&app, options.local_user_id);
    let deps = CallDependencies {
        devices: Arc::new(FakeDevices),
        transports: factory.clone(),
        classifier: classifier.clone(),
        player: player.clone(),
        ledger: options.ledger,
    };

    let session = CallSession::start(config, deps).await.unwrap();
    Peer {
        session,
        factory,
        classifier,
        player,
    }
}
