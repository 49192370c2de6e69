//! Message Types für das Relay-Protokoll
//!
//! Das Relay ist ein reiner Nachrichten-Vermittler: jede Nachricht ist ein
//! JSON-Objekt mit einem `type`-Feld. Die Payload-Formate entsprechen den
//! Browser-Typen `RTCSessionDescriptionInit` und `RTCIceCandidateInit`,
//! damit Browser- und Rust-Clients miteinander sprechen können.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// PAYLOADS
// ============================================================================

/// Art einer Session Description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// SDP Payload (`{ "type": "offer", "sdp": "v=0..." }`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE Candidate Payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

// ============================================================================
// SIGNALING MESSAGE
// ============================================================================

/// Alle Nachrichten, die über das Relay ausgetauscht werden
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    /// SDP Offer des Anrufers
    Offer { offer: SessionDescription },

    /// SDP Answer des Angerufenen
    Answer { answer: SessionDescription },

    /// Trickle ICE Candidate
    Ice { candidate: IceCandidate },

    /// Gegenseite hat aufgelegt
    EndCall,
}

/// Alle `type`-Werte, die dieser Client versteht
const KNOWN_TYPES: [&str; 4] = ["offer", "answer", "ice", "end-call"];

impl SignalingMessage {
    /// Kurzname für Logs
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::Ice { .. } => "ice",
            SignalingMessage::EndCall => "end-call",
        }
    }

    /// Serialisiert die Nachricht für den Versand
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parst eine eingehende Nachricht
    ///
    /// Unbekannte oder fehlende `type`-Werte ergeben `Ok(None)` und werden vom
    /// Aufrufer ignoriert. Ein bekannter Typ mit kaputter Payload ist ein Fehler.
    pub fn decode(text: &str) -> Result<Option<Self>, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;

        let known = value
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|kind| KNOWN_TYPES.contains(&kind));

        if !known {
            return Ok(None);
        }

        serde_json::from_value(value).map(Some)
    }
}
