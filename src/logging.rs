//! Logging Setup via tracing-subscriber
//!
//! Filter kommt aus `RUST_LOG`; ohne Angabe gilt `DEFAULT_FILTER`.

use tracing_subscriber::EnvFilter;

/// Standard-Filter: eigene Logs ausführlich, WebRTC nur Warnungen
pub const DEFAULT_FILTER: &str = "emotisound=debug,webrtc=warn";

/// Baut den Filter aus `RUST_LOG` oder dem Standard
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialisiert das Logging
///
/// Gibt `false` zurück, wenn bereits ein Subscriber installiert ist.
pub fn init_logging() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_harmless() {
        init_logging();
        assert!(!init_logging());
    }
}
