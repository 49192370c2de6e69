//! Audio-Geräte und Stream-Konfiguration
//!
//! Verwendet cpal für Cross-Platform Audio I/O.

use super::AudioError;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, SampleFormat, StreamConfig, SupportedStreamConfigRange};

/// Bevorzugte Sample Rate (48kHz ist der Standard für beste Qualität)
pub const PREFERRED_SAMPLE_RATE: u32 = 48000;

/// Standard-Mikrofon
pub fn default_input_device() -> Result<Device, AudioError> {
    cpal::default_host()
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)
}

/// Standard-Lautsprecher
pub fn default_output_device() -> Result<Device, AudioError> {
    cpal::default_host()
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)
}

/// Findet die beste Input-Konfiguration
pub fn best_input_config(device: &Device) -> Result<StreamConfig, AudioError> {
    let configs = device
        .supported_input_configs()
        .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;

    select_best_config(configs.collect())
}

/// Findet die beste Output-Konfiguration
pub fn best_output_config(device: &Device) -> Result<StreamConfig, AudioError> {
    let configs = device
        .supported_output_configs()
        .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;

    select_best_config(configs.collect())
}

/// Wählt die beste Konfiguration aus einer Liste
///
/// Die Streams arbeiten ausschließlich mit F32-Samples.
fn select_best_config(configs: Vec<SupportedStreamConfigRange>) -> Result<StreamConfig, AudioError> {
    let target_rate = cpal::SampleRate(PREFERRED_SAMPLE_RATE);

    // Versuche exakt 48kHz zu finden
    for config in &configs {
        if config.min_sample_rate() <= target_rate
            && config.max_sample_rate() >= target_rate
            && config.sample_format() == SampleFormat::F32
        {
            return Ok(config.with_sample_rate(target_rate).into());
        }
    }

    // Fallback auf höchste F32-Rate
    configs
        .iter()
        .find(|config| config.sample_format() == SampleFormat::F32)
        .map(|config| config.with_max_sample_rate().into())
        .ok_or_else(|| AudioError::UnsupportedConfig("No F32 stream configuration found".to_string()))
}
