//! Videochat - Call-Session Controller für P2P Videoanrufe
//!
//! Der Kern eines Eins-zu-eins-Videoanrufs:
//! - Zustandsautomat für eine ausgehende Call-Session
//! - Lokale/entfernte Media Streams mit garantiertem Aufräumen
//! - WebRTC Peer Connections (non-trickle ICE, STUN)
//! - Injizierbares Signaling (simuliert oder Offer/Answer über Transport)

pub mod call_engine;
pub mod config;
pub mod signaling;

pub use call_engine::{
    CallEnd, CallError, CallEvent, CallSessionController, CallSnapshot, CallStatus, EndReason,
    MediaStream, SessionToken,
};
pub use config::CallConfig;

/// Initialisiert das Logging
///
/// Filter kommen aus `RUST_LOG`, ergänzt um Defaults für dieses Crate und
/// `webrtc`. Mehrfacher Aufruf ist erlaubt.
pub fn init_logging() {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in ["videochat=debug", "webrtc=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
        tracing::debug!("Logging already initialized");
    }
}
