//! Peer Transport - die eigentliche WebRTC Peer Connection
//!
//! Der Controller spricht nur mit `PeerTransport`. Die Produktions-Variante
//! basiert auf dem `webrtc`-Crate: Standard-Codecs, Standard-Interceptors,
//! STUN aus der Konfiguration.

use super::media::LocalMedia;
use crate::audio::{decode_pcmu, resample_linear, SpeakerOutput, PCMU_SAMPLE_RATE};
use crate::detection::FrameSlot;
use crate::signaling::{IceCandidate, SdpKind, SessionDescription};
use crate::EventCallback;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_PCMU, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::io::sample_builder::SampleBuilder;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::codecs::vp8::Vp8Packet;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Standard STUN Server
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Wie viele Pakete der VP8-Sample-Builder auf Nachzügler wartet
const VP8_MAX_LATE: u16 = 256;

/// Clock Rate von Video-RTP
const VIDEO_CLOCK_RATE: u32 = 90000;

/// Remote-Audio-Buffer (~1s bei 48kHz)
const PLAYBACK_BUFFER_SIZE: usize = 48000;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Transport is closed")]
    Closed,
}

// ============================================================================
// TRANSPORT EVENTS
// ============================================================================

/// Verbindungszustand der Peer Connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
            _ => ConnectionState::New,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Events die vom Transport ausgelöst werden
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Lokaler ICE Candidate, muss zur Gegenseite
    LocalCandidate(IceCandidate),

    /// Remote-Track ist angekommen; Video liefert seine Frames in `frames`
    RemoteTrack {
        kind: TrackKind,
        frames: Option<FrameSlot>,
    },

    StateChanged(ConnectionState),
}

// ============================================================================
// TRAITS
// ============================================================================

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    async fn set_remote_description(&self, desc: SessionDescription)
        -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Baut einen Transport mit angehängten lokalen Tracks
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        media: &LocalMedia,
        on_event: EventCallback<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>, TransportError>;
}

// ============================================================================
// ICE SERVER CONFIGURATION
// ============================================================================

/// Feste STUN-Konfiguration aus einer URL-Liste
pub fn ice_servers(urls: &[String]) -> Vec<RTCIceServer> {
    if urls.is_empty() {
        return Vec::new();
    }
    vec![RTCIceServer {
        urls: urls.to_vec(),
        ..Default::default()
    }]
}

// ============================================================================
// WEBRTC TRANSPORT
// ============================================================================

/// Factory für `webrtc`-basierte Transports
#[derive(Debug, Clone)]
pub struct WebRtcTransportFactory {
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcTransportFactory {
    pub fn new(stun_urls: &[String]) -> Self {
        Self {
            ice_servers: ice_servers(stun_urls),
        }
    }

    /// Registriert Event Handler für die Peer Connection
    fn setup_handlers(
        pc: &Arc<RTCPeerConnection>,
        on_event: EventCallback<TransportEvent>,
        remote_tasks: CancellationToken,
    ) {
        // Connection State Handler
        let on_event_clone = Arc::clone(&on_event);
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::info!("Peer connection state: {}", s);
            on_event_clone(TransportEvent::StateChanged(s.into()));
            Box::pin(async {})
        }));

        // ICE Candidate Handler
        let on_event_clone = Arc::clone(&on_event);
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(c) = candidate {
                match c.to_json() {
                    Ok(init) => on_event_clone(TransportEvent::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    })),
                    Err(e) => tracing::warn!("Failed to serialize local candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        // Track Handler
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let on_event = Arc::clone(&on_event);
            let token = remote_tasks.child_token();

            Box::pin(async move {
                let codec = track.codec();
                let mime_type = codec.capability.mime_type.to_lowercase();
                tracing::info!("Received {:?} track ({})", track.kind(), mime_type);

                match track.kind() {
                    RTPCodecType::Video => {
                        if mime_type != MIME_TYPE_VP8.to_lowercase() {
                            tracing::warn!("Unsupported remote video codec: {}", mime_type);
                            on_event(TransportEvent::RemoteTrack {
                                kind: TrackKind::Video,
                                frames: None,
                            });
                            return;
                        }

                        let frames = FrameSlot::new();
                        tokio::spawn(Self::read_video(track, frames.clone(), token));
                        on_event(TransportEvent::RemoteTrack {
                            kind: TrackKind::Video,
                            frames: Some(frames),
                        });
                    }
                    RTPCodecType::Audio => {
                        if mime_type == MIME_TYPE_PCMU.to_lowercase() {
                            tokio::spawn(Self::play_audio(track, token));
                        } else {
                            tracing::warn!("Unsupported remote audio codec: {}", mime_type);
                        }
                        on_event(TransportEvent::RemoteTrack {
                            kind: TrackKind::Audio,
                            frames: None,
                        });
                    }
                    _ => {}
                }
            })
        }));
    }

    /// Depacketiert VP8 und veröffentlicht ganze Frames
    async fn read_video(track: Arc<TrackRemote>, frames: FrameSlot, token: CancellationToken) {
        let mut builder = SampleBuilder::new(VP8_MAX_LATE, Vp8Packet::default(), VIDEO_CLOCK_RATE);

        loop {
            let packet = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = track.read_rtp() => match result {
                    Ok((packet, _)) => packet,
                    Err(e) => {
                        tracing::debug!("Remote video track ended: {}", e);
                        break;
                    }
                },
            };

            builder.push(packet);
            while let Some(sample) = builder.pop() {
                frames.publish(sample.data);
            }
        }
    }

    /// Spielt PCMU-Audio der Gegenseite auf dem Lautsprecher ab
    async fn play_audio(track: Arc<TrackRemote>, token: CancellationToken) {
        let speaker =
            match tokio::task::spawn_blocking(|| SpeakerOutput::open(PLAYBACK_BUFFER_SIZE)).await {
                Ok(Ok(speaker)) => speaker,
                Ok(Err(e)) => {
                    tracing::warn!("Remote audio muted, no playback: {}", e);
                    return;
                }
                Err(e) => {
                    tracing::warn!("Remote audio muted, no playback: {}", e);
                    return;
                }
            };

        loop {
            let packet = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = track.read_rtp() => match result {
                    Ok((packet, _)) => packet,
                    Err(e) => {
                        tracing::debug!("Remote audio track ended: {}", e);
                        break;
                    }
                },
            };

            if packet.payload.is_empty() {
                continue;
            }

            let samples = decode_pcmu(&packet.payload);
            let samples = resample_linear(&samples, PCMU_SAMPLE_RATE, speaker.sample_rate());
            speaker.write(&samples);
        }
    }
}

impl Default for WebRtcTransportFactory {
    fn default() -> Self {
        Self::new(&[DEFAULT_STUN_URL.to_string()])
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        media: &LocalMedia,
        on_event: EventCallback<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::WebRtc(e.to_string()))?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| TransportError::WebRtc(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| TransportError::WebRtc(e.to_string()))?,
        );

        let remote_tasks = CancellationToken::new();
        Self::setup_handlers(&pc, on_event, remote_tasks.clone());

        for track in media.tracks() {
            let sender = pc
                .add_track(Arc::clone(track) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| TransportError::WebRtc(e.to_string()))?;

            // RTCP lesen, sonst laufen die Interceptors nicht
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while sender.read(&mut rtcp_buf).await.is_ok() {}
            });
        }

        tracing::info!(
            "Peer connection created with {} local tracks",
            media.tracks().len()
        );

        Ok(Arc::new(WebRtcTransport { pc, remote_tasks }))
    }
}

/// `PeerTransport` auf Basis von `RTCPeerConnection`
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    remote_tasks: CancellationToken,
}

impl WebRtcTransport {
    fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
        let result = match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        };
        result.map_err(|e| TransportError::InvalidSdp(e.to_string()))
    }

    fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, TransportError> {
        match desc.sdp_type {
            RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
            RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
            other => Err(TransportError::InvalidSdp(format!(
                "unexpected description type {:?}",
                other
            ))),
        }
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| TransportError::WebRtc(e.to_string()))?;
        Self::from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::WebRtc(e.to_string()))?;
        Self::from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.pc
            .set_local_description(Self::to_rtc(desc)?)
            .await
            .map_err(|e| TransportError::WebRtc(e.to_string()))
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.pc
            .set_remote_description(Self::to_rtc(desc)?)
            .await
            .map_err(|e| TransportError::WebRtc(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| TransportError::WebRtc(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.remote_tasks.cancel();
        self.pc
            .close()
            .await
            .map_err(|e| TransportError::WebRtc(e.to_string()))
    }
}

impl Drop for WebRtcTransport {
    fn drop(&mut self) {
        self.remote_tasks.cancel();
    }
}
