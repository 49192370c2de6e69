//! Audio Module - Mikrofon-Capture, PCM-Hilfen und Geräteauswahl
//!
//! Dieses Modul verwaltet:
//! - Geräte- und Konfigurationsauswahl (cpal)
//! - Mikrofon-Capture als PCMU-Track
//! - Lautsprecher-Ausgabe für Remote-Audio und Cues
//! - Resampling und G.711 µ-law Encoding

mod capture;
mod codec;
mod device;
mod playback;

pub use capture::MicrophoneCapture;
pub use codec::{
    decode_pcmu, downmix, encode_pcmu, f32_to_i16, linear16_to_mulaw, mulaw_to_linear16, resample_linear,
    PCMU_FRAME_SAMPLES, PCMU_SAMPLE_RATE,
};
pub use device::{
    best_input_config, best_output_config, default_input_device, default_output_device,
    PREFERRED_SAMPLE_RATE,
};
pub use playback::SpeakerOutput;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio input device found")]
    NoInputDevice,

    #[error("No audio output device found")]
    NoOutputDevice,

    #[error("Unsupported audio configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),
}
