//! Cue-Wiedergabe
//!
//! `CuePlayer::play` blockiert nicht: der cpal-Player prüft nur, ob die Datei
//! existiert, und dekodiert und spielt sie auf einem eigenen Thread.

use crate::audio::{
    best_output_config, default_output_device, downmix, resample_linear, AudioError, SpeakerOutput,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Standard-Lautstärke der Cues
pub const DEFAULT_CUE_VOLUME: f32 = 0.5;

/// Nachlauf, damit der Buffer ganz ausgespielt wird
const DRAIN_MARGIN: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Cue asset not found: {0}")]
    MissingAsset(PathBuf),

    #[error("Failed to decode cue: {0}")]
    Decode(String),

    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// "Spiel diese Datei ab"
pub trait CuePlayer: Send + Sync {
    fn play(&self, path: &Path) -> Result<(), PlaybackError>;
}

/// Dekodierter Cue (mono)
#[derive(Debug, Clone)]
pub struct DecodedCue {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedCue {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Liest eine WAV-Datei (16-bit Integer oder Float) und mischt auf Mono
pub fn decode_wav(path: &Path) -> Result<DecodedCue, PlaybackError> {
    let mut reader = hound::WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
            PlaybackError::MissingAsset(path.to_path_buf())
        }
        other => PlaybackError::Decode(other.to_string()),
    })?;

    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| PlaybackError::Decode(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| PlaybackError::Decode(e.to_string()))?
        }
    };

    Ok(DecodedCue {
        samples: downmix(&interleaved, spec.channels as usize),
        sample_rate: spec.sample_rate,
    })
}

/// Spielt Cues auf dem Standard-Lautsprecher
#[derive(Debug, Clone)]
pub struct CpalCuePlayer {
    volume: f32,
}

impl CpalCuePlayer {
    pub fn new(volume: f32) -> Self {
        Self {
            volume: volume.clamp(0.0, 1.0),
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    fn play_blocking(path: &Path, volume: f32) -> Result<(), PlaybackError> {
        let cue = decode_wav(path)?;

        let device_rate = best_output_config(&default_output_device()?)?.sample_rate.0;
        let samples: Vec<f32> = resample_linear(&cue.samples, cue.sample_rate, device_rate)
            .into_iter()
            .map(|s| s * volume)
            .collect();

        let mut speaker = SpeakerOutput::open(samples.len())?;
        let written = speaker.write(&samples);

        let duration = Duration::from_secs_f64(written as f64 / speaker.sample_rate() as f64);
        std::thread::sleep(duration + DRAIN_MARGIN);
        speaker.close();
        Ok(())
    }
}

impl Default for CpalCuePlayer {
    fn default() -> Self {
        Self::new(DEFAULT_CUE_VOLUME)
    }
}

impl CuePlayer for CpalCuePlayer {
    fn play(&self, path: &Path) -> Result<(), PlaybackError> {
        if !path.is_file() {
            return Err(PlaybackError::MissingAsset(path.to_path_buf()));
        }

        let path = path.to_path_buf();
        let volume = self.volume;
        std::thread::Builder::new()
            .name("emotisound-cue".to_string())
            .spawn(move || {
                if let Err(e) = Self::play_blocking(&path, volume) {
                    tracing::warn!("Cue playback failed for {}: {}", path.display(), e);
                }
            })
            .map_err(|e| PlaybackError::Audio(AudioError::StreamBuildError(e.to_string())))?;

        Ok(())
    }
}
