//! Peer Connection - Schnittstelle und WebRTC-Implementierung
//!
//! Der Controller spricht nur mit `PeerConnector`/`PeerConnection`.
//! `WebRtcConnector` ist die Produktiv-Implementierung auf Basis von
//! `webrtc-rs`; Tests injizieren eigene Implementierungen.

use super::media::{MediaStream, MediaTrack, Track, TrackKind};
use crate::config::IceServer;
use crate::signaling::{SdpKind, SignalData};
use async_trait::async_trait;
use futures::channel::mpsc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Peer connection already closed")]
    Closed,
}

// ============================================================================
// EVENTS & OPTIONS
// ============================================================================

/// Asynchrone Events einer Peer Connection
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Remote-Stream empfangen
    Stream(MediaStream),
    /// Verbindungsfehler
    Error(String),
    /// Verbindung geschlossen (lokal oder remote)
    Close,
}

/// Empfangsseite der Peer-Events
pub type PeerEvents = mpsc::UnboundedReceiver<PeerEvent>;

/// Sendeseite der Peer-Events
pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// Parameter für eine neue Peer Connection
#[derive(Debug, Clone)]
pub struct PeerOptions {
    pub initiator: bool,
    pub trickle_ice: bool,
    pub local_stream: MediaStream,
    pub ice_servers: Vec<IceServer>,
}

impl PeerOptions {
    /// Ausgehender Anruf: Initiator, alle Candidates vor dem ersten Signal
    pub fn initiator(local_stream: MediaStream, ice_servers: Vec<IceServer>) -> Self {
        Self {
            initiator: true,
            trickle_ice: false,
            local_stream,
            ice_servers,
        }
    }
}

/// Frisch erzeugte Peer Connection samt Event-Receiver
pub struct PeerLink {
    pub connection: Arc<dyn PeerConnection>,
    pub events: PeerEvents,
}

// ============================================================================
// TRAITS
// ============================================================================

#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn id(&self) -> &str;

    /// Lokale Session Description, sobald verfügbar
    async fn local_description(&self) -> Option<SignalData>;

    /// Wendet ein Signal der Gegenseite an
    async fn signal(&self, data: SignalData) -> Result<(), PeerError>;

    /// Schließt die Verbindung; ein zweiter Aufruf ist ein No-op
    async fn destroy(&self) -> Result<(), PeerError>;
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, options: PeerOptions) -> Result<PeerLink, PeerError>;
}

// ============================================================================
// WEBRTC IMPLEMENTATION
// ============================================================================

/// Erzeugt Peer Connections über `webrtc-rs`
#[derive(Debug, Clone, Default)]
pub struct WebRtcConnector;

impl WebRtcConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(&self, options: PeerOptions) -> Result<PeerLink, PeerError> {
        let pc = create_peer_connection(&options.ice_servers).await?;
        let (events_tx, events) = mpsc::unbounded();

        setup_peer_connection_handlers(&pc, events_tx);

        // Lokale Tracks anhängen
        let stream_id = options.local_stream.id().to_string();
        for track in options.local_stream.tracks() {
            let local = local_rtp_track(track.as_ref(), &stream_id);
            if let Err(e) = pc.add_track(local as Arc<dyn TrackLocal + Send + Sync>).await {
                let _ = pc.close().await;
                return Err(PeerError::WebRtc(e.to_string()));
            }
        }

        let peer = Arc::new(WebRtcPeer {
            id: uuid::Uuid::new_v4().to_string(),
            pc,
            trickle_ice: options.trickle_ice,
            destroyed: AtomicBool::new(false),
        });

        if options.initiator {
            if let Err(e) = peer.create_offer().await {
                let _ = peer.destroy().await;
                return Err(e);
            }
        }

        tracing::info!(
            "Created peer connection {} (initiator: {}, trickle: {})",
            peer.id,
            options.initiator,
            options.trickle_ice
        );

        Ok(PeerLink {
            connection: peer,
            events,
        })
    }
}

/// Peer Connection auf Basis von `RTCPeerConnection`
pub struct WebRtcPeer {
    id: String,
    pc: Arc<RTCPeerConnection>,
    trickle_ice: bool,
    destroyed: AtomicBool,
}

impl WebRtcPeer {
    /// Erstellt das Offer und setzt es als Local Description
    ///
    /// Ohne Trickle ICE wird gewartet, bis alle Candidates gesammelt sind.
    async fn create_offer(&self) -> Result<(), PeerError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| PeerError::WebRtc(e.to_string()))?;

        self.apply_local_description(offer).await
    }

    async fn create_answer(&self) -> Result<(), PeerError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| PeerError::WebRtc(e.to_string()))?;

        self.apply_local_description(answer).await
    }

    async fn apply_local_description(
        &self,
        description: RTCSessionDescription,
    ) -> Result<(), PeerError> {
        let mut gather_complete = self.pc.gathering_complete_promise().await;

        self.pc
            .set_local_description(description)
            .await
            .map_err(|e| PeerError::WebRtc(e.to_string()))?;

        if !self.trickle_ice {
            let _ = gather_complete.recv().await;
            tracing::debug!("ICE gathering complete for {}", self.id);
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn local_description(&self) -> Option<SignalData> {
        let description = self.pc.local_description().await?;
        let data = match description.sdp_type {
            webrtc::peer_connection::sdp::sdp_type::RTCSdpType::Offer => {
                SignalData::offer(description.sdp)
            }
            webrtc::peer_connection::sdp::sdp_type::RTCSdpType::Answer => {
                SignalData::answer(description.sdp)
            }
            _ => return None,
        };
        Some(data)
    }

    async fn signal(&self, data: SignalData) -> Result<(), PeerError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(PeerError::Closed);
        }

        match data.kind {
            SdpKind::Answer => {
                let answer = RTCSessionDescription::answer(data.sdp)
                    .map_err(|e| PeerError::InvalidSdp(e.to_string()))?;
                self.pc
                    .set_remote_description(answer)
                    .await
                    .map_err(|e| PeerError::WebRtc(e.to_string()))?;
            }
            SdpKind::Offer => {
                let offer = RTCSessionDescription::offer(data.sdp)
                    .map_err(|e| PeerError::InvalidSdp(e.to_string()))?;
                self.pc
                    .set_remote_description(offer)
                    .await
                    .map_err(|e| PeerError::WebRtc(e.to_string()))?;
                self.create_answer().await?;
            }
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), PeerError> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("Closing peer connection {}", self.id);
        self.pc
            .close()
            .await
            .map_err(|e| PeerError::WebRtc(e.to_string()))
    }
}

/// Erstellt eine neue Peer Connection
async fn create_peer_connection(
    ice_servers: &[IceServer],
) -> Result<Arc<RTCPeerConnection>, PeerError> {
    // Media Engine mit Opus/VP8 konfigurieren
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| PeerError::WebRtc(e.to_string()))?;

    // Interceptors für RTCP, NACK etc.
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| PeerError::WebRtc(e.to_string()))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let config = RTCConfiguration {
        ice_servers: ice_servers.iter().map(rtc_ice_server).collect(),
        ..Default::default()
    };

    let pc = api
        .new_peer_connection(config)
        .await
        .map_err(|e| PeerError::WebRtc(e.to_string()))?;

    Ok(Arc::new(pc))
}

fn rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

/// RTP-Track für einen lokalen Track
fn local_rtp_track(track: &dyn MediaTrack, stream_id: &str) -> Arc<TrackLocalStaticRTP> {
    let codec = match track.kind() {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_string(),
            clock_rate: 90000,
            ..Default::default()
        },
    };

    Arc::new(TrackLocalStaticRTP::new(
        codec,
        track.id().to_string(),
        stream_id.to_string(),
    ))
}

/// Übersetzt einen Verbindungszustand in ein `PeerEvent`
///
/// `Disconnected` kann sich wieder erholen und beendet den Anruf nicht.
fn peer_event_for(state: RTCPeerConnectionState) -> Option<PeerEvent> {
    match state {
        RTCPeerConnectionState::Failed => {
            Some(PeerEvent::Error("Peer connection failed".to_string()))
        }
        RTCPeerConnectionState::Closed => Some(PeerEvent::Close),
        RTCPeerConnectionState::Disconnected => {
            tracing::debug!("Peer connection disconnected, waiting for recovery");
            None
        }
        _ => None,
    }
}

/// Registriert Event Handler, die in `PeerEvent`s übersetzt werden
fn setup_peer_connection_handlers(pc: &Arc<RTCPeerConnection>, events_tx: PeerEventSender) {
    // Connection State Handler
    let state_tx = events_tx.clone();
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        tracing::info!("Peer connection state: {:?}", s);

        if let Some(event) = peer_event_for(s) {
            let _ = state_tx.unbounded_send(event);
        }

        Box::pin(async {})
    }));

    // Track Handler: Tracks werden pro Remote-Stream gesammelt
    let streams: Arc<Mutex<HashMap<String, MediaStream>>> = Arc::new(Mutex::new(HashMap::new()));
    pc.on_track(Box::new(move |track, _, _| {
        let kind = match track.kind() {
            RTPCodecType::Video => TrackKind::Video,
            _ => TrackKind::Audio,
        };
        let remote: Arc<dyn MediaTrack> =
            Arc::new(Track::with_id(track.id(), kind, "remote"));

        let mut streams = streams.lock();
        match streams.get(&track.stream_id()) {
            Some(stream) => stream.add_track(remote),
            None => {
                let stream = MediaStream::with_id(track.stream_id(), vec![remote]);
                tracing::info!("Received remote stream {}", stream.id());
                streams.insert(stream.id().to_string(), stream.clone());
                let _ = events_tx.unbounded_send(PeerEvent::Stream(stream));
            }
        }

        Box::pin(async {})
    }));
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn local_stream() -> MediaStream {
        let tracks: Vec<Arc<dyn MediaTrack>> = vec![Track::audio("mic"), Track::video("camera")];
        MediaStream::new(tracks)
    }

    #[test]
    fn test_initiator_options() {
        let options = PeerOptions::initiator(local_stream(), crate::config::default_ice_servers());
        assert!(options.initiator);
        assert!(!options.trickle_ice);
        assert_eq!(options.ice_servers.len(), 2);
    }

    #[test]
    fn test_turn_credentials_are_mapped() {
        let server = IceServer::turn("turn:turn.example.org:3478", "user", "secret");
        let rtc = rtc_ice_server(&server);
        assert_eq!(rtc.urls, vec!["turn:turn.example.org:3478".to_string()]);
        assert_eq!(rtc.username, "user");
        assert_eq!(rtc.credential, "secret");
    }

    #[test]
    fn test_connection_state_to_event() {
        assert!(matches!(
            peer_event_for(RTCPeerConnectionState::Failed),
            Some(PeerEvent::Error(_))
        ));
        assert!(matches!(
            peer_event_for(RTCPeerConnectionState::Closed),
            Some(PeerEvent::Close)
        ));
        assert!(peer_event_for(RTCPeerConnectionState::Disconnected).is_none());
        assert!(peer_event_for(RTCPeerConnectionState::Connected).is_none());
        assert!(peer_event_for(RTCPeerConnectionState::Connecting).is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_initiator_produces_complete_offer() {
        let connector = WebRtcConnector::new();
        // Ohne ICE-Server: nur Host-Candidates, kein Netzwerkzugriff nötig
        let options = PeerOptions::initiator(local_stream(), Vec::new());

        let link = connector.connect(options).await.unwrap();
        let offer = link.connection.local_description().await.unwrap();

        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.contains("m=audio"));
        assert!(offer.sdp.contains("m=video"));

        link.connection.destroy().await.unwrap();
        // Zweites destroy ist ein No-op
        link.connection.destroy().await.unwrap();
        assert_eq!(
            link.connection.signal(SignalData::answer("v=0")).await,
            Err(PeerError::Closed)
        );
    }
}
