//! Lautsprecher-Ausgabe
//!
//! Ein Mono-Ring-Buffer (f32, Geräte-Rate) wird vom cpal-Callback geleert und
//! auf alle Kanäle verteilt. Der Stream lebt auf einem eigenen Thread, weil
//! `cpal::Stream` nicht `Send` ist.

use super::{best_output_config, default_output_device, AudioError};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::Stream;
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;

type PlaybackBuffer = Arc<Mutex<HeapRb<f32>>>;

/// Offener Output-Stream auf dem Standard-Lautsprecher
pub struct SpeakerOutput {
    buffer: PlaybackBuffer,
    sample_rate: u32,
    stop_tx: Option<std_mpsc::Sender<()>>,
}

impl SpeakerOutput {
    /// Öffnet das Standard-Ausgabegerät (blockierend)
    ///
    /// `capacity` ist die Größe des Buffers in Mono-Samples.
    pub fn open(capacity: usize) -> Result<Self, AudioError> {
        let buffer: PlaybackBuffer = Arc::new(Mutex::new(HeapRb::new(capacity.max(1))));
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32, AudioError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let buffer_clone = Arc::clone(&buffer);
        std::thread::Builder::new()
            .name("emotisound-speaker".to_string())
            .spawn(move || match Self::open_stream(buffer_clone) {
                Ok((stream, sample_rate)) => {
                    let _ = ready_tx.send(Ok(sample_rate));
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| AudioError::StreamBuildError("playback thread exited".to_string()))??;

        Ok(Self {
            buffer,
            sample_rate,
            stop_tx: Some(stop_tx),
        })
    }

    fn open_stream(buffer: PlaybackBuffer) -> Result<(Stream, u32), AudioError> {
        let device = default_output_device()?;
        let config = best_output_config(&device)?;

        tracing::debug!(
            "Starting audio playback: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        let channels = config.channels as usize;
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut buffer = buffer.lock();
                    for frame in data.chunks_mut(channels) {
                        let sample = buffer.try_pop().unwrap_or(0.0);
                        frame.fill(sample);
                    }
                },
                |err| {
                    tracing::error!("Audio playback error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

        Ok((stream, config.sample_rate.0))
    }

    /// Sample Rate des Geräts
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Schreibt Mono-Samples in der Geräte-Rate; gibt die Anzahl übernommener Samples zurück
    pub fn write(&self, samples: &[f32]) -> usize {
        let mut buffer = self.buffer.lock();
        samples
            .iter()
            .take_while(|&&sample| buffer.try_push(sample).is_ok())
            .count()
    }

    /// Noch nicht abgespielte Samples
    pub fn buffered(&self) -> usize {
        self.buffer.lock().occupied_len()
    }

    pub fn close(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        self.close();
    }
}
