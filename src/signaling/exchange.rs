//! Offer/Answer-Austausch über einen beliebigen Transport
//!
//! Der Transport selbst (WebSocket, HTTP, ...) wird injiziert. Die
//! Verhandlung sendet das vollständige Offer der Peer Connection, wendet
//! die Antwort an und meldet Auflegen oder Ablehnung der Gegenseite.
//! Den Remote-Stream liefert danach die Peer Connection selbst.

use super::messages::{SignalMessage, SignalPayload};
use super::{SignalEvent, Signaling};
use crate::call_engine::PeerConnection;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("Not connected to signaling transport")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// Nachrichtenkanal zur Gegenseite
#[async_trait]
pub trait SignalTransport: Send + Sync {
    async fn send(&self, message: SignalMessage) -> Result<(), SignalingError>;

    /// Nächste eingehende Nachricht; `None` wenn der Kanal geschlossen ist
    async fn recv(&self) -> Option<SignalMessage>;
}

/// In-Process Transport über tokio-Channels
pub struct ChannelTransport {
    tx: mpsc::Sender<SignalMessage>,
    rx: Mutex<mpsc::Receiver<SignalMessage>>,
}

impl ChannelTransport {
    /// Zwei miteinander verbundene Enden
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);

        (
            Self {
                tx: a_tx,
                rx: Mutex::new(b_rx),
            },
            Self {
                tx: b_tx,
                rx: Mutex::new(a_rx),
            },
        )
    }
}

#[async_trait]
impl SignalTransport for ChannelTransport {
    async fn send(&self, message: SignalMessage) -> Result<(), SignalingError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| SignalingError::NotConnected)
    }

    async fn recv(&self) -> Option<SignalMessage> {
        self.rx.lock().await.recv().await
    }
}

// ============================================================================
// EXCHANGE SIGNALING
// ============================================================================

pub struct ExchangeSignaling<T> {
    local_id: String,
    transport: Arc<T>,
}

impl<T: SignalTransport + 'static> ExchangeSignaling<T> {
    pub fn new(local_id: impl Into<String>, transport: Arc<T>) -> Self {
        Self {
            local_id: local_id.into(),
            transport,
        }
    }
}

impl<T: SignalTransport + 'static> Signaling for ExchangeSignaling<T> {
    fn negotiate(
        &self,
        target: &str,
        peer: Arc<dyn PeerConnection>,
    ) -> BoxStream<'static, SignalEvent> {
        let exchange = Exchange {
            transport: Arc::clone(&self.transport),
            peer,
            local_id: self.local_id.clone(),
            target: target.to_string(),
            offered: false,
            finished: false,
        };

        stream::unfold(exchange, |mut exchange| async move {
            exchange
                .next_event()
                .await
                .map(|event| (event, exchange))
        })
        .boxed()
    }
}

/// Zustand einer laufenden Verhandlung
struct Exchange<T> {
    transport: Arc<T>,
    peer: Arc<dyn PeerConnection>,
    local_id: String,
    target: String,
    offered: bool,
    finished: bool,
}

impl<T: SignalTransport> Exchange<T> {
    async fn next_event(&mut self) -> Option<SignalEvent> {
        if self.finished {
            return None;
        }

        if !self.offered {
            self.offered = true;
            if let Err(e) = self.send_offer().await {
                return Some(self.finish(SignalEvent::Failed(e.to_string())));
            }
        }

        loop {
            let Some(message) = self.transport.recv().await else {
                tracing::info!("Signaling transport closed");
                return Some(self.finish(SignalEvent::Closed));
            };

            if message.from != self.target {
                tracing::debug!("Ignoring signal from {}", message.from);
                continue;
            }

            match message.payload {
                SignalPayload::Signal { data } => {
                    tracing::debug!("Applying {:?} from {}", data.kind, message.from);
                    if let Err(e) = self.peer.signal(data).await {
                        return Some(self.finish(SignalEvent::Failed(e.to_string())));
                    }
                }
                SignalPayload::Hangup => {
                    tracing::info!("{} hung up", message.from);
                    return Some(self.finish(SignalEvent::Closed));
                }
                SignalPayload::RejectCall { reason } => {
                    let reason = reason.unwrap_or_else(|| "Call rejected".to_string());
                    tracing::info!("{} rejected the call: {}", message.from, reason);
                    return Some(self.finish(SignalEvent::Failed(reason)));
                }
            }
        }
    }

    async fn send_offer(&self) -> Result<(), SignalingError> {
        let offer = self.peer.local_description().await.ok_or_else(|| {
            SignalingError::SendFailed("peer has no local description".to_string())
        })?;

        tracing::info!("Sending offer to {}", self.target);
        self.transport
            .send(SignalMessage::new(
                self.local_id.clone(),
                self.target.clone(),
                SignalPayload::Signal { data: offer },
            ))
            .await
    }

    fn finish(&mut self, event: SignalEvent) -> SignalEvent {
        self.finished = true;
        event
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::PeerError;
    use crate::signaling::{SdpKind, SignalData};
    use parking_lot::Mutex as SyncMutex;

    #[derive(Default)]
    struct RecordingPeer {
        applied: SyncMutex<Vec<SignalData>>,
    }

    #[async_trait]
    impl PeerConnection for RecordingPeer {
        fn id(&self) -> &str {
            "recording"
        }
        async fn local_description(&self) -> Option<SignalData> {
            Some(SignalData::offer("v=0 offer"))
        }
        async fn signal(&self, data: SignalData) -> Result<(), PeerError> {
            self.applied.lock().push(data);
            Ok(())
        }
        async fn destroy(&self) -> Result<(), PeerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_offer_answer_then_hangup() {
        let (local, remote) = ChannelTransport::pair(8);
        let signaling = ExchangeSignaling::new("me", Arc::new(local));
        let peer = Arc::new(RecordingPeer::default());

        let mut events = signaling.negotiate("42", peer.clone());

        let remote_side = tokio::spawn(async move {
            let offer = remote.recv().await.unwrap();
            assert_eq!(offer.to, "42");
            assert!(matches!(
                offer.payload,
                SignalPayload::Signal { ref data } if data.kind == SdpKind::Offer
            ));

            // Fremde Nachricht wird ignoriert
            remote
                .send(SignalMessage::new("stranger", "me", SignalPayload::Hangup))
                .await
                .unwrap();
            remote
                .send(SignalMessage::new(
                    "42",
                    "me",
                    SignalPayload::Signal {
                        data: SignalData::answer("v=0 answer"),
                    },
                ))
                .await
                .unwrap();
            remote
                .send(SignalMessage::new("42", "me", SignalPayload::Hangup))
                .await
                .unwrap();
            remote
        });

        assert!(matches!(events.next().await, Some(SignalEvent::Closed)));
        assert!(events.next().await.is_none());

        let applied = peer.applied.lock().clone();
        assert_eq!(applied, vec![SignalData::answer("v=0 answer")]);
        drop(remote_side.await.unwrap());
    }

    #[tokio::test]
    async fn test_reject_is_failure() {
        let (local, remote) = ChannelTransport::pair(8);
        let signaling = ExchangeSignaling::new("me", Arc::new(local));

        remote
            .send(SignalMessage::new(
                "42",
                "me",
                SignalPayload::RejectCall {
                    reason: Some("busy".to_string()),
                },
            ))
            .await
            .unwrap();

        let mut events = signaling.negotiate("42", Arc::new(RecordingPeer::default()));
        match events.next().await {
            Some(SignalEvent::Failed(reason)) => assert_eq!(reason, "busy"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_transport() {
        let (local, remote) = ChannelTransport::pair(8);
        drop(remote);
        let signaling = ExchangeSignaling::new("me", Arc::new(local));

        let mut events = signaling.negotiate("42", Arc::new(RecordingPeer::default()));
        assert!(matches!(events.next().await, Some(SignalEvent::Failed(_))));
        assert!(events.next().await.is_none());
    }
}
