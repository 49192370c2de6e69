//! Call Engine Module - Peer Connection und lokale Medien
//!
//! Dieses Modul verwaltet:
//! - Lokale Medien (Kamera-Frames, Mikrofon als PCMU)
//! - Den WebRTC Transport hinter `PeerTransport`
//! - Den Peer Connection Controller (Offer/Answer/ICE, Abbau)

mod engine;
mod media;
mod transport;

pub use engine::{PeerConnectionController, PeerError, PeerState};
pub use media::{
    CameraSource, LocalMedia, MediaAccessError, MediaCapture, MediaDevices, SystemMediaDevices,
};
pub use transport::{
    ice_servers, ConnectionState, PeerTransport, TrackKind, TransportError, TransportEvent,
    TransportFactory, WebRtcTransport, WebRtcTransportFactory, DEFAULT_STUN_URL,
};
