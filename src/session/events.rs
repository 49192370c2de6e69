//! Zustände, Notifications und die interne Event-Queue der Session

use crate::call_engine::TransportEvent;
use crate::detection::EmotionSample;
use crate::signaling::SignalingEvent;
use serde::Serialize;
use uuid::Uuid;

/// Zustand eines Anrufs aus Sicht der Oberfläche
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Idle,
    Negotiating,
    Active,
    Ended,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        *self == CallState::Ended
    }
}

/// Warum ein Anruf endete
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", content = "reason", rename_all = "lowercase")]
pub enum EndCause {
    /// Lokal aufgelegt
    Local,
    /// Gegenseite hat aufgelegt
    Remote,
    /// Relay, Transport oder Medien sind ausgefallen
    Error(String),
}

impl std::fmt::Display for EndCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndCause::Local => write!(f, "local"),
            EndCause::Remote => write!(f, "remote"),
            EndCause::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

/// Momentaufnahme der Session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSnapshot {
    pub session_id: Uuid,
    pub state: CallState,
    pub local_user_id: Option<i64>,
    pub remote_stream_present: bool,
    /// Letztes Detection-Sample
    pub emotion: Option<EmotionSample>,
    pub ledger_session_id: Option<i64>,
    pub end_cause: Option<EndCause>,
}

impl CallSnapshot {
    pub(crate) fn new(session_id: Uuid, local_user_id: Option<i64>) -> Self {
        Self {
            session_id,
            state: CallState::Idle,
            local_user_id,
            remote_stream_present: false,
            emotion: None,
            ledger_session_id: None,
            end_cause: None,
        }
    }
}

/// Broadcast an die Oberfläche
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CallNotification {
    StateChanged(CallState),
    Emotion(Option<EmotionSample>),
    Ended(EndCause),
}

/// Befehle der Oberfläche
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    StartCall,
    EndCall,
    SetAudioCues(bool),
}

/// Alles, was der Session-Task verarbeitet, läuft durch diese eine Queue
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Command(SessionCommand),
    Signaling(SignalingEvent),
    Transport(TransportEvent),
    Detection(Option<EmotionSample>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_cause_reads_well() {
        assert_eq!(EndCause::Local.to_string(), "local");
        assert_eq!(
            EndCause::Error("relay channel closed".into()).to_string(),
            "error: relay channel closed"
        );
    }

    #[test]
    fn notifications_serialize_for_the_ui() {
        let json = serde_json::to_value(CallNotification::Ended(EndCause::Remote)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "ended", "payload": {"cause": "remote"}})
        );

        let json = serde_json::to_value(CallNotification::StateChanged(CallState::Active)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "state_changed", "payload": "active"}));
    }
}
