//! Lokale Medien: Kamera und Mikrofon
//!
//! `LocalMedia` besitzt die lokalen Tracks und alle laufenden Captures. Es
//! wird auf jedem Beendigungspfad genau einmal gestoppt.

use crate::audio::{AudioError, MicrophoneCapture};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use webrtc::api::media_engine::{MIME_TYPE_PCMU, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Dauer eines Kamera-Frames (~30 fps)
const VIDEO_FRAME_DURATION: Duration = Duration::from_millis(33);

/// Stream-ID der lokalen Tracks
const STREAM_ID: &str = "emotisound";

#[derive(Error, Debug, Clone)]
pub enum MediaAccessError {
    #[error("Media access denied: {0}")]
    PermissionDenied(String),

    #[error("No microphone available")]
    NoAudioDevice,

    #[error("No camera available")]
    NoVideoDevice,

    #[error("Media capture failed: {0}")]
    Capture(String),

    #[error("Media acquisition cancelled")]
    Cancelled,
}

impl From<AudioError> for MediaAccessError {
    fn from(e: AudioError) -> Self {
        match e {
            AudioError::NoInputDevice => MediaAccessError::NoAudioDevice,
            other => MediaAccessError::Capture(other.to_string()),
        }
    }
}

/// Eine laufende Aufnahme, die einen lokalen Track speist
pub trait MediaCapture: Send {
    fn stop(&mut self);
}

/// Lokale Tracks samt ihrer Captures
pub struct LocalMedia {
    tracks: Vec<Arc<TrackLocalStaticSample>>,
    captures: Mutex<Vec<Box<dyn MediaCapture>>>,
    stopped: AtomicBool,
}

impl LocalMedia {
    pub fn new(
        tracks: Vec<Arc<TrackLocalStaticSample>>,
        captures: Vec<Box<dyn MediaCapture>>,
    ) -> Self {
        Self {
            tracks,
            captures: Mutex::new(captures),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn tracks(&self) -> &[Arc<TrackLocalStaticSample>] {
        &self.tracks
    }

    /// Stoppt alle Captures; `false` wenn bereits gestoppt
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }

        let mut captures = std::mem::take(&mut *self.captures.lock());
        for capture in captures.iter_mut() {
            capture.stop();
        }
        tracing::info!("Local media stopped ({} captures)", captures.len());
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMedia")
            .field("tracks", &self.tracks.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Beschafft Kamera und Mikrofon
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Liefert Audio und Video oder einen Fehler; kein Retry
    async fn acquire(&self, cancel: &CancellationToken) -> Result<LocalMedia, MediaAccessError>;
}

/// Kodierte VP8-Frames der lokalen Kamera
///
/// Die Quelle bestimmt das Tempo: `next_frame` liefert den nächsten Frame,
/// sobald er verfügbar ist, und `None` wenn die Kamera beendet wurde.
#[async_trait]
pub trait CameraSource: Send + Sync {
    async fn next_frame(&self) -> Option<Bytes>;
}

/// Standard-Mikrofon (cpal) plus eingespeiste Kamera
pub struct SystemMediaDevices {
    camera: Option<Arc<dyn CameraSource>>,
}

impl SystemMediaDevices {
    pub fn new(camera: Option<Arc<dyn CameraSource>>) -> Self {
        Self { camera }
    }
}

#[async_trait]
impl MediaDevices for SystemMediaDevices {
    async fn acquire(&self, cancel: &CancellationToken) -> Result<LocalMedia, MediaAccessError> {
        let camera = self
            .camera
            .as_ref()
            .map(Arc::clone)
            .ok_or(MediaAccessError::NoVideoDevice)?;

        let video_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
            "video".to_string(),
            STREAM_ID.to_string(),
        ));

        let audio_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_string(),
                clock_rate: 8000,
                channels: 1,
                ..Default::default()
            },
            "audio".to_string(),
            STREAM_ID.to_string(),
        ));

        let microphone = tokio::select! {
            _ = cancel.cancelled() => return Err(MediaAccessError::Cancelled),
            result = MicrophoneCapture::start(Arc::clone(&audio_track), cancel) => result?,
        };

        let camera_pump = CameraPump::start(camera, Arc::clone(&video_track), cancel);

        tracing::info!("Local media acquired (camera + microphone)");

        Ok(LocalMedia::new(
            vec![video_track, audio_track],
            vec![Box::new(camera_pump), Box::new(microphone)],
        ))
    }
}

/// Schreibt Kamera-Frames in den Video-Track
struct CameraPump {
    token: CancellationToken,
}

impl CameraPump {
    fn start(
        camera: Arc<dyn CameraSource>,
        track: Arc<TrackLocalStaticSample>,
        cancel: &CancellationToken,
    ) -> Self {
        let token = cancel.child_token();
        let pump_token = token.clone();

        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    biased;
                    _ = pump_token.cancelled() => break,
                    frame = camera.next_frame() => frame,
                };
                let Some(data) = frame else {
                    tracing::warn!("Camera source ended");
                    break;
                };

                let sample = Sample {
                    data,
                    duration: VIDEO_FRAME_DURATION,
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    tracing::debug!("Failed to write video sample: {}", e);
                }
            }
        });

        Self { token }
    }
}

impl MediaCapture for CameraPump {
    fn stop(&mut self) {
        self.token.cancel();
    }
}
