//! Call Engine Module - Call-Session und Medien
//!
//! Dieses Modul verwaltet:
//! - Den Lebenszyklus einer ausgehenden Call-Session
//! - Lokale und entfernte Media Streams
//! - WebRTC Peer Connections

mod engine;
mod media;
mod peer;
mod state;

pub use engine::{CallEndHandler, CallSessionController};
#[cfg(feature = "audio-devices")]
pub use media::SystemDevices;
pub use media::{
    MediaAccessError, MediaDevices, MediaError, MediaStream, MediaTrack, StreamSummary,
    SyntheticDevices, Track, TrackKind, TrackSummary,
};
pub use peer::{
    PeerConnection, PeerConnector, PeerError, PeerEvent, PeerEventSender, PeerEvents, PeerLink,
    PeerOptions, WebRtcConnector, WebRtcPeer,
};
pub use state::{
    CallEnd, CallError, CallEvent, CallSnapshot, CallStatus, EndReason, SessionToken, ToggleState,
};
