//! WebSocket Client für das Relay
//!
//! Verwaltet genau einen WebSocket-Kanal zum Relay:
//! - Nachrichten serialisieren und senden (best effort)
//! - Eingehende Nachrichten parsen und in Empfangsreihenfolge weiterleiten
//! - Schließen / Abbruch als terminales Event melden (keine Reconnects)

use super::messages::SignalingMessage;
use crate::EventCallback;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Kapazität der Ausgangs-Queue
const OUTBOUND_QUEUE_SIZE: usize = 100;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum SignalingError {
    #[error("Invalid relay URL: {0}")]
    InvalidUrl(String),

    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),
}

// ============================================================================
// SIGNALING EVENTS
// ============================================================================

/// Zustand des Relay-Kanals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Events die vom SignalingClient ausgelöst werden
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// Nachricht vom Relay
    Message(SignalingMessage),

    /// Kanal wurde geschlossen (lokal oder vom Relay)
    Closed,

    /// Kanal ist mit einem Fehler abgebrochen
    Failed(String),
}

// ============================================================================
// SIGNALING SINK
// ============================================================================

/// Ausgehende Seite des Relay-Kanals
///
/// Der Peer Connection Controller kennt nur diese Schnittstelle.
pub trait SignalingSink: Send + Sync {
    /// Prüft ob der Kanal offen ist
    fn is_open(&self) -> bool;

    /// Sendet eine Nachricht; No-op wenn der Kanal nicht offen ist
    fn send(&self, message: &SignalingMessage);

    /// Schließt den Kanal; idempotent
    fn close(&self);
}

// ============================================================================
// SIGNALING CLIENT
// ============================================================================

/// WebSocket Client für die Relay-Kommunikation
pub struct SignalingClient {
    relay_url: String,
    state: Arc<RwLock<ChannelState>>,
    tx: mpsc::Sender<String>,
    shutdown: CancellationToken,
}

impl SignalingClient {
    /// Verbindet mit dem Relay
    ///
    /// `on_event` wird für jede eingehende Nachricht genau einmal aufgerufen,
    /// in Empfangsreihenfolge, und zum Schluss genau einmal mit `Closed` oder
    /// `Failed`.
    pub async fn connect(
        relay_url: &str,
        on_event: EventCallback<SignalingEvent>,
    ) -> Result<Self, SignalingError> {
        let url = Url::parse(relay_url).map_err(|e| SignalingError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(SignalingError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }

        let state = Arc::new(RwLock::new(ChannelState::Connecting));

        tracing::info!("Connecting to relay: {}", url);

        let (ws_stream, _) = connect_async(url.as_str()).await.map_err(|e| {
            *state.write() = ChannelState::Closed;
            SignalingError::ConnectionFailed(e.to_string())
        })?;

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_QUEUE_SIZE);
        let shutdown = CancellationToken::new();

        *state.write() = ChannelState::Open;
        tracing::info!("Relay channel open");

        // Read-Task starten
        let state_clone = Arc::clone(&state);
        tokio::spawn(async move {
            let mut failure = None;

            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => Self::dispatch_text(&text, &on_event),
                    Ok(Message::Close(_)) => {
                        tracing::info!("Relay channel closed by peer");
                        break;
                    }
                    Err(e) => {
                        failure = Some(e.to_string());
                        break;
                    }
                    _ => {}
                }
            }

            // Lokales Schließen ist kein Fehler, auch wenn der Handshake abreißt
            let closed_locally = {
                let mut state = state_clone.write();
                let local = matches!(*state, ChannelState::Closing | ChannelState::Closed);
                *state = ChannelState::Closed;
                local
            };

            match failure {
                Some(reason) if !closed_locally => {
                    tracing::error!("Relay channel failed: {}", reason);
                    on_event(SignalingEvent::Failed(reason));
                }
                _ => on_event(SignalingEvent::Closed),
            }
        });

        // Write-Task starten
        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_clone.cancelled() => {
                        // Vor dem Schließen eingereihte Nachrichten noch senden
                        while let Ok(msg) = rx.try_recv() {
                            if write.send(Message::Text(msg)).await.is_err() {
                                break;
                            }
                        }
                        break;
                    }
                    msg = rx.recv() => {
                        let Some(msg) = msg else { break };
                        if let Err(e) = write.send(Message::Text(msg)).await {
                            tracing::error!("Failed to send WebSocket message: {}", e);
                            break;
                        }
                    }
                }
            }

            if let Err(e) = write.close().await {
                tracing::debug!("WebSocket close handshake failed: {}", e);
            }
        });

        Ok(Self {
            relay_url: relay_url.to_string(),
            state,
            tx,
            shutdown,
        })
    }

    /// Gibt den aktuellen Kanal-Zustand zurück
    pub fn state(&self) -> ChannelState {
        *self.state.read()
    }

    /// Leitet eine Text-Nachricht an den Handler weiter
    fn dispatch_text(text: &str, on_event: &EventCallback<SignalingEvent>) {
        match SignalingMessage::decode(text) {
            Ok(Some(message)) => {
                tracing::debug!("Received '{}' from relay", message.kind());
                on_event(SignalingEvent::Message(message));
            }
            Ok(None) => {
                tracing::debug!("Ignoring relay message of unknown type");
            }
            Err(e) => {
                tracing::warn!("Dropping malformed relay message: {}", e);
            }
        }
    }
}

impl SignalingSink for SignalingClient {
    fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    fn send(&self, message: &SignalingMessage) {
        let state = self.state();
        if state != ChannelState::Open {
            tracing::debug!(
                "Dropping '{}' message, relay channel is {:?}",
                message.kind(),
                state
            );
            return;
        }

        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to encode '{}' message: {}", message.kind(), e);
                return;
            }
        };

        // try_send ist non-blocking
        if let Err(e) = self.tx.try_send(text) {
            tracing::warn!("Failed to queue '{}' message: {}", message.kind(), e);
        }
    }

    fn close(&self) {
        {
            let mut state = self.state.write();
            match *state {
                ChannelState::Closing | ChannelState::Closed => return,
                ChannelState::Connecting | ChannelState::Open => *state = ChannelState::Closing,
            }
        }

        tracing::info!("Closing relay channel");
        self.shutdown.cancel();
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("relay_url", &self.relay_url)
            .field("state", &self.state())
            .finish()
    }
}
