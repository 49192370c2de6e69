//! Detection Module - Emotionserkennung auf dem Remote-Video
//!
//! Dieses Modul verwaltet:
//! - Latest-Frame-Slot des Remote-Tracks
//! - Klassifizierer-Schnittstelle und Emotion-Typen
//! - EMA-Glättung der Konfidenz
//! - Die Polling-Loop (single-flight, skip-if-busy)

mod classifier;
mod detector;
mod frames;
mod smoothing;

pub use classifier::{ClassifierError, Detection, Emotion, EmotionClassifier, EmotionSample};
pub use detector::{
    DetectionLoop, DetectionSettings, SampleCallback, DEFAULT_INTERVAL, DEFAULT_THRESHOLD,
};
pub use frames::{FrameSlot, FrameSource, VideoFrame};
pub use smoothing::{smooth_confidence, ConfidenceSmoother, DEFAULT_ALPHA};
