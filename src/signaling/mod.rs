//! Signaling Module - Austausch zwischen den Peers
//!
//! Dieses Modul definiert die Schnittstelle, über die der Controller
//! erfährt, wann die Verhandlung abgeschlossen ist:
//! - `Signaling::negotiate` liefert einen Stream von `SignalEvent`s
//! - `SimulatedSignaling` simuliert die Gegenseite mit einem Timer
//! - `ExchangeSignaling` führt Offer/Answer über einen `SignalTransport` aus
//!

mod exchange;
mod messages;
mod simulated;

pub use exchange::{ChannelTransport, ExchangeSignaling, SignalTransport, SignalingError};
pub use messages::*;
pub use simulated::SimulatedSignaling;

use crate::call_engine::{MediaStream, PeerConnection};
use futures::stream::BoxStream;
use std::sync::Arc;

/// Events der Signaling-Schicht für eine Session
#[derive(Debug, Clone)]
pub enum SignalEvent {
    /// Stream-Austausch erfolgreich, Remote-Stream liegt vor
    RemoteStream(MediaStream),

    /// Verhandlung fehlgeschlagen
    Failed(String),

    /// Gegenseite hat aufgelegt oder der Kanal ist weg
    Closed,
}

/// Verhandelt eine Verbindung mit dem Ziel
pub trait Signaling: Send + Sync {
    fn negotiate(&self, target: &str, peer: Arc<dyn PeerConnection>)
        -> BoxStream<'static, SignalEvent>;
}
