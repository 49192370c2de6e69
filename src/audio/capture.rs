//! Mikrofon-Capture
//!
//! Der cpal-Stream ist nicht `Send` und lebt deshalb auf einem eigenen Thread.
//! Der Callback resampelt auf 8kHz und schreibt in einen Ring-Buffer; ein
//! Pump-Task liest alle 20ms einen Frame und schreibt ihn als PCMU-Sample in
//! den lokalen Audio-Track.

use super::codec::{downmix, encode_pcmu, f32_to_i16, resample_linear};
use super::{best_input_config, default_input_device, AudioError};
use super::{PCMU_FRAME_SAMPLES, PCMU_SAMPLE_RATE};
use crate::call_engine::MediaCapture;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::Stream;
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Dauer eines Frames
const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Buffer Size für den Capture-Ring-Buffer (~200ms)
const RING_BUFFER_SIZE: usize = PCMU_FRAME_SAMPLES * 10;

type CaptureBuffer = Arc<Mutex<HeapRb<i16>>>;

/// Laufende Mikrofon-Aufnahme
pub struct MicrophoneCapture {
    stop_tx: Option<std_mpsc::Sender<()>>,
    pump: CancellationToken,
}

impl MicrophoneCapture {
    /// Öffnet das Standard-Mikrofon und speist `track`
    pub async fn start(
        track: Arc<TrackLocalStaticSample>,
        cancel: &CancellationToken,
    ) -> Result<Self, AudioError> {
        let buffer: CaptureBuffer = Arc::new(Mutex::new(HeapRb::new(RING_BUFFER_SIZE)));

        let buffer_clone = Arc::clone(&buffer);
        let stop_tx = tokio::task::spawn_blocking(move || Self::spawn_stream_thread(buffer_clone))
            .await
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))??;

        let pump = cancel.child_token();
        tokio::spawn(Self::pump(track, buffer, pump.clone()));

        Ok(Self {
            stop_tx: Some(stop_tx),
            pump,
        })
    }

    /// Startet den Stream-Thread und wartet bis der Stream läuft
    fn spawn_stream_thread(buffer: CaptureBuffer) -> Result<std_mpsc::Sender<()>, AudioError> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), AudioError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("emotisound-mic".to_string())
            .spawn(move || match Self::open_stream(buffer) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Blockiert bis stop() oder der Sender gedroppt wird
                    let _ = stop_rx.recv();
                    drop(stream);
                    tracing::info!("Microphone capture stopped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| AudioError::StreamBuildError("capture thread exited".to_string()))??;

        Ok(stop_tx)
    }

    /// Baut und startet den cpal Input-Stream
    fn open_stream(buffer: CaptureBuffer) -> Result<Stream, AudioError> {
        let device = default_input_device()?;
        let config = best_input_config(&device)?;

        tracing::info!(
            "Starting audio capture: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        let source_sample_rate = config.sample_rate.0;
        let channels = config.channels as usize;

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = downmix(data, channels);
                    let samples = resample_linear(&mono, source_sample_rate, PCMU_SAMPLE_RATE);

                    let mut buffer = buffer.lock();
                    for sample in samples {
                        let _ = buffer.try_push(f32_to_i16(sample));
                    }
                },
                |err| {
                    tracing::error!("Audio capture error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

        Ok(stream)
    }

    /// Liest 20ms-Frames aus dem Buffer und schreibt sie in den Track
    async fn pump(
        track: Arc<TrackLocalStaticSample>,
        buffer: CaptureBuffer,
        token: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(FRAME_DURATION);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let frame: Option<Vec<i16>> = {
                let mut buffer = buffer.lock();
                if buffer.occupied_len() >= PCMU_FRAME_SAMPLES {
                    Some((0..PCMU_FRAME_SAMPLES).filter_map(|_| buffer.try_pop()).collect())
                } else {
                    None
                }
            };

            let Some(frame) = frame else { continue };

            let sample = Sample {
                data: Bytes::from(encode_pcmu(&frame)),
                duration: FRAME_DURATION,
                ..Default::default()
            };

            if let Err(e) = track.write_sample(&sample).await {
                tracing::debug!("Failed to write audio sample: {}", e);
            }
        }
    }
}

impl MediaCapture for MicrophoneCapture {
    fn stop(&mut self) {
        self.pump.cancel();
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
