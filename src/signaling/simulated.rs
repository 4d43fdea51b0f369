//! Simuliertes Signaling
//!
//! Es gibt keinen Signaling-Server: nach einer festen Verzögerung wird ein
//! leerer Remote-Stream gemeldet, als wäre die Verhandlung gelungen.

use super::{SignalEvent, Signaling};
use crate::call_engine::{MediaStream, PeerConnection};
use crate::config::CallConfig;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SimulatedSignaling {
    delay: Duration,
}

impl SimulatedSignaling {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_config(config: &CallConfig) -> Self {
        Self::new(config.simulated_connect_delay())
    }
}

impl Default for SimulatedSignaling {
    fn default() -> Self {
        Self::from_config(&CallConfig::default())
    }
}

impl Signaling for SimulatedSignaling {
    fn negotiate(
        &self,
        target: &str,
        peer: Arc<dyn PeerConnection>,
    ) -> BoxStream<'static, SignalEvent> {
        let delay = self.delay;
        tracing::info!(
            "Simulating negotiation with {} via peer {} ({:?})",
            target,
            peer.id(),
            delay
        );

        stream::once(async move {
            tokio::time::sleep(delay).await;
            SignalEvent::RemoteStream(MediaStream::empty())
        })
        .boxed()
    }
}

// ============================================================================
// TESTS
// ============================================================================
