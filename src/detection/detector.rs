//! Detection Loop
//!
//! Pollt den Remote-Frame in festen Intervallen, klassifiziert ihn und
//! veröffentlicht pro Intervall höchstens ein Sample. Es ist immer nur eine
//! Klassifizierung gleichzeitig aktiv; verpasste Ticks werden übersprungen.

use super::classifier::{EmotionClassifier, EmotionSample};
use super::frames::FrameSource;
use super::smoothing::{ConfidenceSmoother, DEFAULT_ALPHA};
use crate::EventCallback;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Standard Polling-Intervall (~30 Hz)
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(33);

/// Mindest-Konfidenz eines Rohergebnisses
pub const DEFAULT_THRESHOLD: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionSettings {
    pub interval: Duration,
    pub threshold: f32,
    pub alpha: f32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            threshold: DEFAULT_THRESHOLD,
            alpha: DEFAULT_ALPHA,
        }
    }
}

/// Callback für Samples (`None` = keine Emotion über dem Schwellwert)
pub type SampleCallback = EventCallback<Option<EmotionSample>>;

pub struct DetectionLoop {
    classifier: Arc<dyn EmotionClassifier>,
    settings: DetectionSettings,
    /// `true` sobald die Modelle geladen sind, `false` nach einem Ladefehler
    models: Arc<OnceCell<bool>>,
    liveness: CancellationToken,
    running: Mutex<Option<CancellationToken>>,
}

impl DetectionLoop {
    /// `liveness` ist das Token der Session; die Loop endet spätestens mit ihm
    pub fn new(
        classifier: Arc<dyn EmotionClassifier>,
        settings: DetectionSettings,
        liveness: &CancellationToken,
    ) -> Self {
        Self {
            classifier,
            settings,
            models: Arc::new(OnceCell::new()),
            liveness: liveness.clone(),
            running: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &DetectionSettings {
        &self.settings
    }

    /// Startet das Laden der Modelle im Hintergrund
    pub fn preload(&self) {
        let classifier = Arc::clone(&self.classifier);
        let models = Arc::clone(&self.models);
        let liveness = self.liveness.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = liveness.cancelled() => {}
                _ = Self::ensure_models(&classifier, &models) => {}
            }
        });
    }

    /// Startet die Loop gegen `frames`
    ///
    /// Gibt `false` zurück wenn sie bereits läuft oder die Session beendet ist.
    pub fn start(&self, frames: Arc<dyn FrameSource>, on_sample: SampleCallback) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return false;
        }
        if self.liveness.is_cancelled() {
            return false;
        }

        let token = self.liveness.child_token();
        *running = Some(token.clone());

        let classifier = Arc::clone(&self.classifier);
        let models = Arc::clone(&self.models);
        let settings = self.settings;

        tokio::spawn(async move {
            let loaded = tokio::select! {
                _ = token.cancelled() => return,
                loaded = Self::ensure_models(&classifier, &models) => loaded,
            };

            if !loaded {
                tracing::warn!("Emotion detection disabled, models unavailable");
                token.cancel();
                return;
            }

            tracing::info!(
                "Emotion detection started ({} ms interval)",
                settings.interval.as_millis()
            );
            Self::run(classifier, settings, frames, on_sample, token).await;
            tracing::info!("Emotion detection stopped");
        });

        true
    }

    /// Hält die Loop sofort an; ein laufender Aufruf wird verworfen
    pub fn stop(&self) -> bool {
        match self.running.lock().take() {
            Some(token) => {
                let was_running = !token.is_cancelled();
                token.cancel();
                was_running
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    async fn ensure_models(classifier: &Arc<dyn EmotionClassifier>, models: &OnceCell<bool>) -> bool {
        *models
            .get_or_init(|| async {
                match classifier.load_models().await {
                    Ok(()) => {
                        tracing::info!("Emotion models loaded");
                        true
                    }
                    Err(e) => {
                        tracing::error!("{}", e);
                        false
                    }
                }
            })
            .await
    }

    async fn run(
        classifier: Arc<dyn EmotionClassifier>,
        settings: DetectionSettings,
        frames: Arc<dyn FrameSource>,
        on_sample: SampleCallback,
        token: CancellationToken,
    ) {
        let mut smoother = ConfidenceSmoother::new(settings.alpha);
        let mut ticker = tokio::time::interval(settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let detection = match frames.latest_frame() {
                Some(frame) => {
                    let result = tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        result = classifier.detect(&frame) => result,
                    };
                    match result {
                        Ok(detection) => detection,
                        Err(e) => {
                            tracing::warn!("Skipping frame {}: {}", frame.sequence, e);
                            continue;
                        }
                    }
                }
                None => None,
            };

            // Späte Ergebnisse nach stop() verwerfen
            if token.is_cancelled() {
                break;
            }

            let sample = match detection {
                Some(d) if d.confidence >= settings.threshold => Some(EmotionSample {
                    emotion: d.emotion,
                    confidence: smoother.update(d.confidence),
                    timestamp: Utc::now(),
                }),
                _ => {
                    smoother.reset();
                    None
                }
            };

            on_sample(sample);
        }
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
