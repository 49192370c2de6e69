//! Klassifizierer-Schnittstelle
//!
//! Das Modell selbst ist eine Black Box: ein Frame rein, eine Emotion mit
//! Konfidenz (oder nichts) raus.

use super::frames::VideoFrame;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ClassifierError {
    #[error("Failed to load models: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Gesichtsausdrücke, die der Klassifizierer unterscheidet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Neutral,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Fearful,
        Emotion::Disgusted,
        Emotion::Surprised,
    ];

    /// Label wie auf dem Draht und in den Asset-Namen
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Fearful => "fearful",
            Emotion::Disgusted => "disgusted",
            Emotion::Surprised => "surprised",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rohes Ergebnis des Klassifizierers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub emotion: Emotion,
    pub confidence: f32,
}

impl Detection {
    pub fn new(emotion: Emotion, confidence: f32) -> Self {
        Self {
            emotion,
            confidence,
        }
    }
}

/// Geglättetes Ergebnis eines Polling-Intervalls
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmotionSample {
    pub emotion: Emotion,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait EmotionClassifier: Send + Sync {
    /// Lädt die Modelle; wird pro Session höchstens einmal abgewartet
    async fn load_models(&self) -> Result<(), ClassifierError>;

    /// `Ok(None)` wenn kein Gesicht erkannt wurde
    async fn detect(&self, frame: &VideoFrame) -> Result<Option<Detection>, ClassifierError>;
}
