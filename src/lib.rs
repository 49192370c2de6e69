//! emotisound - P2P Videoanrufe mit Emotionserkennung
//!
//! Zwei Peers verbinden sich über ein WebSocket-Relay und WebRTC. Auf dem
//! Remote-Video läuft eine Emotionserkennung; Wechsel der erkannten Emotion
//! werden lokal als kurze Audio-Cues ausgegeben.
//! - Relay als reiner Nachrichten-Verteiler (Offer/Answer/ICE/End-Call)
//! - WebRTC für Audio (PCMU) und Video (VP8)
//! - SQLite für Benutzer und Session-Ledger

pub mod audio;
pub mod call_engine;
pub mod config;
pub mod database;
pub mod detection;
pub mod feedback;
pub mod logging;
pub mod session;
pub mod signaling;

use call_engine::{CameraSource, SystemMediaDevices, WebRtcTransportFactory};
use config::{AppConfig, ConfigError};
use database::{DatabaseError, IdentityService, LocalStore, SessionLedger, User};
use detection::EmotionClassifier;
use feedback::CpalCuePlayer;
use session::{CallDependencies, CallSession, SessionConfig, SessionError};
use std::sync::Arc;
use thiserror::Error;

pub use session::{CallNotification, CallSnapshot, CallState, EndCause};

/// Callback für asynchron ausgelöste Events
pub type EventCallback<T> = Arc<dyn Fn(T) + Send + Sync>;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Gemeinsame Ressourcen aller Sessions eines Prozesses
pub struct AppState {
    config: AppConfig,
    store: Arc<LocalStore>,
    devices: Arc<SystemMediaDevices>,
    transports: Arc<WebRtcTransportFactory>,
    player: Arc<CpalCuePlayer>,
}

impl AppState {
    /// Initialisiert Logging, Datenbank und die Geräte-Fabriken
    pub fn init(
        config: AppConfig,
        camera: Option<Arc<dyn CameraSource>>,
    ) -> Result<Self, AppError> {
        logging::init_logging();
        tracing::info!("Initializing emotisound...");

        let store = match &config.db_path {
            Some(path) => LocalStore::open(path)?,
            None => LocalStore::open_default()?,
        };

        // Sessions ohne Ende stammen aus einem abgebrochenen Lauf
        store.cleanup_open_sessions()?;

        Ok(Self {
            devices: Arc::new(SystemMediaDevices::new(camera)),
            transports: Arc::new(WebRtcTransportFactory::new(&config.stun_urls)),
            player: Arc::new(CpalCuePlayer::new(config.cue_volume)),
            store: Arc::new(store),
            config,
        })
    }

    /// Wie `init`, Konfiguration aus der Umgebung
    pub fn from_env(camera: Option<Arc<dyn CameraSource>>) -> Result<Self, AppError> {
        Self::init(AppConfig::from_env()?, camera)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn identity(&self) -> &dyn IdentityService {
        self.store.as_ref()
    }

    pub fn ledger(&self) -> Arc<dyn SessionLedger> {
        self.store.clone()
    }

    /// Produktive Bausteine einer Session mit dem gegebenen Klassifizierer
    pub fn dependencies(&self, classifier: Arc<dyn EmotionClassifier>) -> CallDependencies {
        CallDependencies {
            devices: self.devices.clone(),
            transports: self.transports.clone(),
            classifier,
            player: self.player.clone(),
            ledger: Some(self.ledger()),
        }
    }

    /// Startet eine Session für den angemeldeten Benutzer
    pub async fn start_session(
        &self,
        user: &User,
        classifier: Arc<dyn EmotionClassifier>,
    ) -> Result<CallSession, AppError> {
        tracing::info!("Starting call session for user {}", user.id);
        let config = SessionConfig::from_app(&self.config, Some(user.id));
        Ok(CallSession::start(config, self.dependencies(classifier)).await?)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("relay_url", &self.config.relay_url)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_cleans_up_stale_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            db_path: Some(dir.path().join("app.db")),
            ..AppConfig::default()
        };

        let user_id = {
            let state = AppState::init(config.clone(), None).unwrap();
            let user = state
                .identity()
                .register("Mia", "mia@example.com", "secret")
                .unwrap();
            state.ledger().start_session(user.id).unwrap();
            user.id
        };

        let state = AppState::init(config, None).unwrap();
        let user = state.identity().login("mia@example.com", "secret").unwrap();
        assert_eq!(user.id, user_id);
        assert_eq!(state.ledger().cleanup_open_sessions().unwrap(), 0);
    }
}
