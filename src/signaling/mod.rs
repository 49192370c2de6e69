//! Signaling Module - WebSocket Client für das Relay
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Relay:
//! - WebSocket-Verbindung aufbauen und schließen
//! - Offer / Answer / ICE / End-Call serialisieren und senden
//! - Eingehende Nachrichten parsen und geordnet weiterleiten
//!

mod client;
mod messages;

pub use client::{ChannelState, SignalingClient, SignalingError, SignalingEvent, SignalingSink};
pub use messages::*;
