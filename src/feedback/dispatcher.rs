//! Audio Cue Dispatcher
//!
//! Spielt genau einen Cue pro Wechsel in eine (neue) Emotion. Verglichen wird
//! mit der Emotion, für die zuletzt ein Cue gespielt wurde; `None` spielt nie
//! und setzt diese Erinnerung nicht zurück.

use super::player::CuePlayer;
use crate::detection::{Emotion, EmotionSample};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Standard-Verzeichnis der Cue-Dateien
pub const DEFAULT_ASSETS_DIR: &str = "assets/sounds";

/// Löst Emotionen zu `<dir>/<emotion>.wav` auf
#[derive(Debug, Clone)]
pub struct CueAssets {
    dir: PathBuf,
}

impl CueAssets {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, emotion: Emotion) -> PathBuf {
        self.dir.join(format!("{}.wav", emotion.as_str()))
    }
}

impl Default for CueAssets {
    fn default() -> Self {
        Self::new(DEFAULT_ASSETS_DIR)
    }
}

pub struct AudioCueDispatcher {
    assets: CueAssets,
    player: Arc<dyn CuePlayer>,
    last_played: Option<Emotion>,
    enabled: bool,
}

impl AudioCueDispatcher {
    pub fn new(assets: CueAssets, player: Arc<dyn CuePlayer>) -> Self {
        Self {
            assets,
            player,
            last_played: None,
            enabled: true,
        }
    }

    /// Verarbeitet ein Sample; gibt die gespielte Emotion zurück
    pub fn observe(&mut self, sample: Option<&EmotionSample>) -> Option<Emotion> {
        let emotion = sample?.emotion;
        if !self.enabled || self.last_played == Some(emotion) {
            return None;
        }

        // Auch ein fehlgeschlagener Cue zählt als gespielt
        self.last_played = Some(emotion);

        let path = self.assets.path_for(emotion);
        match self.player.play(&path) {
            Ok(()) => tracing::debug!("Playing cue for {}", emotion),
            Err(e) => tracing::warn!("Cue for {} not played: {}", emotion, e),
        }

        Some(emotion)
    }

    /// Schaltet Cues ein oder aus (Mute)
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            tracing::info!("Audio cues {}", if enabled { "enabled" } else { "muted" });
        }
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn last_played(&self) -> Option<Emotion> {
        self.last_played
    }
}
