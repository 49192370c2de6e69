//! App-Konfiguration
//!
//! Wird aus Umgebungsvariablen gelesen. Alle Felder haben Standardwerte,
//! sodass die App ohne Konfiguration lauffähig ist.

use crate::call_engine::DEFAULT_STUN_URL;
use crate::detection::{DetectionSettings, DEFAULT_ALPHA, DEFAULT_THRESHOLD};
use crate::feedback::{DEFAULT_ASSETS_DIR, DEFAULT_CUE_VOLUME};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Standard-Relay
pub const DEFAULT_RELAY_URL: &str = "wss://testnw.onrender.com/";

/// Standard Detection-Rate
pub const DEFAULT_DETECTION_FPS: u32 = 30;

pub const ENV_RELAY_URL: &str = "EMOTISOUND_RELAY_URL";
pub const ENV_STUN_URLS: &str = "EMOTISOUND_STUN_URLS";
pub const ENV_ASSETS_DIR: &str = "EMOTISOUND_ASSETS_DIR";
pub const ENV_DB_PATH: &str = "EMOTISOUND_DB_PATH";
pub const ENV_DETECTION_FPS: &str = "EMOTISOUND_DETECTION_FPS";
pub const ENV_CONFIDENCE_THRESHOLD: &str = "EMOTISOUND_CONFIDENCE_THRESHOLD";
pub const ENV_CUE_VOLUME: &str = "EMOTISOUND_CUE_VOLUME";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Vollständige App-Konfiguration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// WebSocket-URL des Relays (`ws://` oder `wss://`)
    pub relay_url: String,
    /// STUN-Server für ICE
    pub stun_urls: Vec<String>,
    /// Verzeichnis mit `<emotion>.wav`
    pub assets_dir: PathBuf,
    /// Datenbank-Datei; `None` = App-Datenverzeichnis
    pub db_path: Option<PathBuf>,
    pub detection: DetectionSettings,
    /// Lautstärke der Cues (0..=1)
    pub cue_volume: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            stun_urls: vec![DEFAULT_STUN_URL.to_string()],
            assets_dir: PathBuf::from(DEFAULT_ASSETS_DIR),
            db_path: None,
            detection: DetectionSettings {
                interval: fps_to_interval(DEFAULT_DETECTION_FPS),
                threshold: DEFAULT_THRESHOLD,
                alpha: DEFAULT_ALPHA,
            },
            cue_volume: DEFAULT_CUE_VOLUME,
        }
    }
}

impl AppConfig {
    /// Liest die Konfiguration aus der Prozess-Umgebung
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Liest die Konfiguration über eine beliebige Lookup-Funktion
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(relay_url) = get(ENV_RELAY_URL) {
            config.relay_url = relay_url.trim().to_string();
        }
        validate_relay_url(&config.relay_url)?;

        if let Some(stun_urls) = get(ENV_STUN_URLS) {
            config.stun_urls = stun_urls
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(dir) = get(ENV_ASSETS_DIR) {
            config.assets_dir = PathBuf::from(dir);
        }

        if let Some(path) = get(ENV_DB_PATH) {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(fps) = get(ENV_DETECTION_FPS) {
            let parsed: u32 = fps
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid(ENV_DETECTION_FPS, &fps, "not an integer"))?;
            if !(1..=120).contains(&parsed) {
                return Err(ConfigError::invalid(
                    ENV_DETECTION_FPS,
                    &fps,
                    "must be between 1 and 120",
                ));
            }
            config.detection.interval = fps_to_interval(parsed);
        }

        if let Some(threshold) = get(ENV_CONFIDENCE_THRESHOLD) {
            config.detection.threshold = parse_unit(ENV_CONFIDENCE_THRESHOLD, &threshold)?;
        }

        if let Some(volume) = get(ENV_CUE_VOLUME) {
            config.cue_volume = parse_unit(ENV_CUE_VOLUME, &volume)?;
        }

        Ok(config)
    }
}

/// Prüft, dass die Relay-URL eine WebSocket-URL ist
pub fn validate_relay_url(relay_url: &str) -> Result<(), ConfigError> {
    let url = Url::parse(relay_url)
        .map_err(|e| ConfigError::invalid(ENV_RELAY_URL, relay_url, e.to_string()))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ConfigError::invalid(
            ENV_RELAY_URL,
            relay_url,
            "expected ws:// or wss://",
        ));
    }
    Ok(())
}

fn fps_to_interval(fps: u32) -> Duration {
    Duration::from_millis(1000 / u64::from(fps.max(1)))
}

fn parse_unit(key: &'static str, value: &str) -> Result<f32, ConfigError> {
    let parsed: f32 = value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, value, "not a number"))?;
    if !(0.0..=1.0).contains(&parsed) {
        return Err(ConfigError::invalid(key, value, "must be between 0 and 1"));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.relay_url, "wss://testnw.onrender.com/");
        assert_eq!(config.stun_urls, vec!["stun:stun.l.google.com:19302"]);
        assert_eq!(config.detection.interval, Duration::from_millis(33));
        assert_eq!(config.detection.threshold, 0.9);
        assert_eq!(config.cue_volume, 0.5);
        assert!(config.db_path.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = AppConfig::from_lookup(lookup(&[
            (ENV_RELAY_URL, "ws://127.0.0.1:9000"),
            (ENV_STUN_URLS, "stun:a:1, stun:b:2,"),
            (ENV_ASSETS_DIR, "/opt/cues"),
            (ENV_DB_PATH, "/tmp/e.db"),
            (ENV_DETECTION_FPS, "10"),
            (ENV_CONFIDENCE_THRESHOLD, "0.75"),
            (ENV_CUE_VOLUME, "1"),
        ]))
        .unwrap();

        assert_eq!(config.relay_url, "ws://127.0.0.1:9000");
        assert_eq!(config.stun_urls, vec!["stun:a:1", "stun:b:2"]);
        assert_eq!(config.assets_dir, PathBuf::from("/opt/cues"));
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/e.db")));
        assert_eq!(config.detection.interval, Duration::from_millis(100));
        assert_eq!(config.detection.threshold, 0.75);
        assert_eq!(config.cue_volume, 1.0);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for (key, value) in [
            (ENV_RELAY_URL, "https://relay.example.com"),
            (ENV_RELAY_URL, "not a url"),
            (ENV_DETECTION_FPS, "0"),
            (ENV_DETECTION_FPS, "fast"),
            (ENV_CONFIDENCE_THRESHOLD, "1.5"),
            (ENV_CUE_VOLUME, "loud"),
        ] {
            let err = AppConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
            let ConfigError::InvalidValue { key: failed, .. } = err;
            assert_eq!(failed, key);
        }
    }
}
