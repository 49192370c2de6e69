//! Frame-Quelle für die Detection Loop
//!
//! Der Remote-Video-Track schreibt jeden fertig depacketierten Frame in einen
//! `FrameSlot`. Die Detection Loop liest immer nur den neuesten Frame; ältere
//! werden überschrieben.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Ein kodierter Video-Frame der Gegenseite
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: Bytes,
    pub sequence: u64,
    pub received_at: Instant,
}

/// Liefert den aktuellen Frame (oder keinen)
pub trait FrameSource: Send + Sync {
    fn latest_frame(&self) -> Option<VideoFrame>;
}

/// Latest-Frame-Slot, geteilt zwischen Track-Reader und Detection Loop
#[derive(Debug, Clone, Default)]
pub struct FrameSlot {
    frame: Arc<Mutex<Option<VideoFrame>>>,
    sequence: Arc<AtomicU64>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ersetzt den aktuellen Frame
    pub fn publish(&self, data: Bytes) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        *self.frame.lock() = Some(VideoFrame {
            data,
            sequence,
            received_at: Instant::now(),
        });
        sequence
    }

    /// Anzahl bisher veröffentlichter Frames
    #[cfg(test)]
    pub(crate) fn frames_published(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

impl FrameSource for FrameSlot {
    fn latest_frame(&self) -> Option<VideoFrame> {
        self.frame.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest_frame() {
        let slot = FrameSlot::new();
        assert!(slot.latest_frame().is_none());

        slot.publish(Bytes::from_static(b"one"));
        let reader = slot.clone();
        slot.publish(Bytes::from_static(b"two"));

        let frame = reader.latest_frame().unwrap();
        assert_eq!(frame.data, Bytes::from_static(b"two"));
        assert_eq!(frame.sequence, 2);
        assert_eq!(reader.frames_published(), 2);
    }
}
