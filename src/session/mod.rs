//! Session Module - Ein Anruf als Actor
//!
//! Dieses Modul verwaltet:
//! - Den Zustandsautomaten idle -> negotiating -> active -> ended
//! - Die Event-Queue (Relay, Transport, Detection, Befehle)
//! - Snapshots und Notifications für die Oberfläche

mod controller;
mod events;

pub use controller::{CallDependencies, CallSession, SessionConfig, SessionError};
pub use events::{CallNotification, CallSnapshot, CallState, EndCause, SessionCommand};
