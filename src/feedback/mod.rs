//! Feedback Module - Audio-Cues für erkannte Emotionen
//!
//! Dieses Modul verwaltet:
//! - Den Dispatcher (ein Cue pro Emotionswechsel, Mute)
//! - Die Auflösung der Cue-Dateien
//! - Die Wiedergabe über cpal

mod dispatcher;
mod player;

pub use dispatcher::{AudioCueDispatcher, CueAssets, DEFAULT_ASSETS_DIR};
pub use player::{decode_wav, CpalCuePlayer, CuePlayer, DecodedCue, PlaybackError, DEFAULT_CUE_VOLUME};
