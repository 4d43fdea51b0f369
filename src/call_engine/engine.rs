//! Call Session Controller
//!
//! Verwaltet genau eine ausgehende Call-Session: lokale Medien, die Peer
//! Connection, Signaling-Events, Remote-Stream, Mute/Kamera und das
//! Aufräumen auf jedem Ausgangspfad.
//!
//! Jeder Anrufversuch bekommt ein `SessionToken`. Asynchrone Ergebnisse
//! (Medienzugriff, Peer-Erzeugung, Events) werden nur angewendet, solange
//! ihr Token noch das aktuelle ist; verspätete Ressourcen werden sofort
//! freigegeben.

use super::media::{MediaDevices, MediaStream, TrackKind};
use super::peer::{PeerConnection, PeerConnector, PeerEvent, PeerEvents, PeerLink, PeerOptions};
use super::state::{
    CallEnd, CallError, CallEvent, CallSnapshot, CallStatus, EndReason, SessionToken, ToggleState,
};
use crate::config::CallConfig;
use crate::signaling::{SignalEvent, Signaling};
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, oneshot};

/// Completion-Callback der UI (z.B. Navigation zurück zur Kontaktliste)
pub type CallEndHandler = Arc<dyn Fn(CallEnd) + Send + Sync>;

// ============================================================================
// SESSION STATE
// ============================================================================

/// Ressourcen einer Session, die beim Aufräumen freigegeben werden
#[derive(Default)]
struct SessionResources {
    local_stream: Option<MediaStream>,
    remote_stream: Option<MediaStream>,
    peer: Option<Arc<dyn PeerConnection>>,
    /// Droppen beendet die Event-Pumpe
    pump_stop: Option<oneshot::Sender<()>>,
}

impl SessionResources {
    /// Gibt alles frei (best effort): Peer schließen, dann alle Tracks stoppen
    async fn release(self) {
        let SessionResources {
            local_stream,
            remote_stream,
            peer,
            pump_stop,
        } = self;
        drop(pump_stop);

        if let Some(peer) = peer {
            if let Err(e) = peer.destroy().await {
                tracing::warn!("Failed to destroy peer connection {}: {}", peer.id(), e);
            }
        }
        if let Some(local) = local_stream {
            local.stop_all();
        }
        if let Some(remote) = remote_stream {
            remote.stop_all();
        }
    }

    /// Freigabe ohne await (aus `Drop`)
    fn release_detached(self) {
        let SessionResources {
            local_stream,
            remote_stream,
            peer,
            pump_stop,
        } = self;
        drop(pump_stop);

        if let Some(local) = local_stream {
            local.stop_all();
        }
        if let Some(remote) = remote_stream {
            remote.stop_all();
        }
        if let Some(peer) = peer {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = peer.destroy().await {
                            tracing::warn!(
                                "Failed to destroy peer connection {}: {}",
                                peer.id(),
                                e
                            );
                        }
                    });
                }
                Err(_) => {
                    tracing::warn!("No runtime to close peer connection {}", peer.id());
                }
            }
        }
    }
}

/// Der aktuell laufende Anrufversuch
struct ActiveSession {
    token: SessionToken,
    target: String,
    resources: SessionResources,
    connected_at: Option<DateTime<Utc>>,
}

impl ActiveSession {
    fn new(token: SessionToken, target: String) -> Self {
        Self {
            token,
            target,
            resources: SessionResources::default(),
            connected_at: None,
        }
    }
}

#[derive(Default)]
struct SessionState {
    last_token: u64,
    active: Option<ActiveSession>,
    status: CallStatus,
    toggles: ToggleState,
    last_error: Option<CallError>,
}

impl SessionState {
    /// Aktive Session mit passendem Token, die noch nicht fehlgeschlagen ist
    fn live_session(&mut self, token: SessionToken) -> Option<&mut ActiveSession> {
        if self.status.is_error() {
            return None;
        }
        self.active.as_mut().filter(|session| session.token == token)
    }

    fn snapshot(&self) -> CallSnapshot {
        let session = self.active.as_ref();
        CallSnapshot {
            session: session.map(|s| s.token),
            target: session.map(|s| s.target.clone()),
            status: self.status.clone(),
            local_stream: session.and_then(|s| s.resources.local_stream.clone()),
            remote_stream: session.and_then(|s| s.resources.remote_stream.clone()),
            muted: self.toggles.muted,
            camera_off: self.toggles.camera_off,
            connected_at: session.and_then(|s| s.connected_at),
            last_error: self.last_error.clone(),
        }
    }
}

/// Ein Event aus Peer Connection oder Signaling
enum SessionEvent {
    Peer(PeerEvent),
    Signal(SignalEvent),
}

// ============================================================================
// CONTROLLER
// ============================================================================

struct Shared {
    config: CallConfig,
    media: Arc<dyn MediaDevices>,
    peers: Arc<dyn PeerConnector>,
    signaling: Arc<dyn Signaling>,
    on_call_end: CallEndHandler,
    state: Mutex<SessionState>,
    event_tx: broadcast::Sender<CallEvent>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(session) = self.state.get_mut().active.take() {
            tracing::info!("Controller dropped, releasing session {}", session.token);
            session.resources.release_detached();
        }
    }
}

/// Steuert eine ausgehende Call-Session
///
/// Klone teilen sich denselben Zustand.
#[derive(Clone)]
pub struct CallSessionController {
    shared: Arc<Shared>,
}

impl CallSessionController {
    /// Erstellt einen neuen Controller im Zustand `Idle`
    pub fn new(
        config: CallConfig,
        media: Arc<dyn MediaDevices>,
        peers: Arc<dyn PeerConnector>,
        signaling: Arc<dyn Signaling>,
        on_call_end: impl Fn(CallEnd) + Send + Sync + 'static,
    ) -> Result<Self, CallError> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                media,
                peers,
                signaling,
                on_call_end: Arc::new(on_call_end),
                state: Mutex::new(SessionState::default()),
                event_tx,
            }),
        })
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.shared.state.lock().snapshot()
    }

    pub fn status(&self) -> CallStatus {
        self.shared.state.lock().status.clone()
    }

    pub fn config(&self) -> &CallConfig {
        &self.shared.config
    }

    /// Startet einen Anruf zu `target`
    ///
    /// Ein leeres Ziel wird ignoriert. Eine noch laufende Session wird
    /// vorher vollständig beendet. Gibt das Token der neuen Session zurück,
    /// oder `None` wenn das Ziel leer war oder die Session während des
    /// Aufbaus beendet wurde.
    pub async fn start_call(&self, target: impl Into<String>) -> Option<SessionToken> {
        let target = target.into();
        if target.trim().is_empty() {
            tracing::debug!("Ignoring call request without target");
            return None;
        }

        // Der Slot wird erst belegt, wenn er unter dem Lock leer ist; eine
        // während des Aufräumens installierte Session wird ebenfalls ersetzt.
        let token = loop {
            let previous = {
                let mut state = self.shared.state.lock();
                match state.active.take() {
                    Some(previous) => {
                        state.status = CallStatus::Idle;
                        state.toggles = ToggleState::default();
                        previous
                    }
                    None => {
                        state.last_token += 1;
                        let token = SessionToken(state.last_token);
                        state.active = Some(ActiveSession::new(token, target.clone()));
                        state.status =
                            CallStatus::Connecting(self.shared.config.messages.connecting.clone());
                        state.last_error = None;
                        break token;
                    }
                }
            };

            tracing::info!("Replacing session {} to {}", previous.token, previous.target);
            self.finish_session(previous, EndReason::Replaced).await;
        };
        tracing::info!("Starting call {} to {}", token, target);
        self.publish();

        // Lokale Medien anfordern
        let local = match self
            .shared
            .media
            .request_local_media(self.shared.config.constraints)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Failed to get local stream: {}", e);
                let message = self.shared.config.messages.media_unavailable.clone();
                self.fail_session(token, CallError::MediaAccess(e), message)
                    .await;
                return Some(token);
            }
        };

        let adopted = match self.shared.state.lock().live_session(token) {
            Some(session) => {
                session.resources.local_stream = Some(local.clone());
                true
            }
            None => false,
        };
        if !adopted {
            tracing::info!("Session {} ended during media access, stopping late stream", token);
            local.stop_all();
            return None;
        }
        self.publish();

        // Peer Connection erstellen
        let options = PeerOptions::initiator(local, self.shared.config.ice_servers.clone());
        let PeerLink { connection, events } = match self.shared.peers.connect(options).await {
            Ok(link) => link,
            Err(e) => {
                tracing::error!("Failed to create peer connection: {}", e);
                self.fail_session(token, CallError::PeerConnection(e.to_string()), e.to_string())
                    .await;
                return Some(token);
            }
        };

        let (pump_stop, pump_stopped) = oneshot::channel();
        let adopted = match self.shared.state.lock().live_session(token) {
            Some(session) => {
                session.resources.peer = Some(Arc::clone(&connection));
                session.resources.pump_stop = Some(pump_stop);
                true
            }
            None => false,
        };
        if !adopted {
            tracing::info!("Session {} ended during peer setup, closing late peer", token);
            if let Err(e) = connection.destroy().await {
                tracing::warn!("Failed to destroy late peer connection: {}", e);
            }
            return None;
        }
        self.publish();

        let signals = self.shared.signaling.negotiate(&target, Arc::clone(&connection));
        tokio::spawn(Self::pump_events(
            Arc::downgrade(&self.shared),
            token,
            events,
            signals,
            pump_stopped,
        ));

        Some(token)
    }

    /// Beendet den aktuellen Anruf
    ///
    /// Schließt die Peer Connection, stoppt alle Tracks und ruft den
    /// Completion-Callback auf. Ohne Session wird der Callback trotzdem
    /// aufgerufen, damit die UI zurück navigiert.
    pub async fn end_call(&self) {
        match self.detach_session(None) {
            Some(session) => {
                tracing::info!("Ending call {}", session.token);
                self.finish_session(session, EndReason::Hangup).await;
            }
            None => {
                tracing::debug!("end_call without active session, navigating back");
                self.notify_end(CallEnd {
                    session: None,
                    target: None,
                    reason: EndReason::NoSession,
                    return_to: self.shared.config.return_route.clone(),
                });
            }
        }
    }

    /// Beendet eine laufende Session, weil die UI den Controller verwirft
    pub async fn dispose(&self) {
        if let Some(session) = self.detach_session(None) {
            tracing::info!("Disposing call {}", session.token);
            self.finish_session(session, EndReason::Disposed).await;
        }
    }

    /// Schaltet das Mikrofon stumm bzw. wieder an
    ///
    /// Ohne lokalen Stream ändert sich nichts. Gibt den neuen Mute-Status zurück.
    pub fn toggle_mute(&self) -> bool {
        self.toggle(TrackKind::Audio)
    }

    /// Schaltet die Kamera aus bzw. wieder an
    pub fn toggle_camera(&self) -> bool {
        self.toggle(TrackKind::Video)
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    fn toggle(&self, kind: TrackKind) -> bool {
        let value = {
            let mut state = self.shared.state.lock();
            let SessionState {
                active, toggles, ..
            } = &mut *state;

            let flag = match kind {
                TrackKind::Audio => &mut toggles.muted,
                TrackKind::Video => &mut toggles.camera_off,
            };

            let Some(local) = active
                .as_ref()
                .and_then(|session| session.resources.local_stream.as_ref())
            else {
                tracing::debug!("Ignoring {:?} toggle without local stream", kind);
                return *flag;
            };

            // Vorheriger Zustand "aus" heißt: Tracks wieder aktivieren
            let tracks = match kind {
                TrackKind::Audio => local.audio_tracks(),
                TrackKind::Video => local.video_tracks(),
            };
            for track in tracks {
                track.set_enabled(*flag);
            }
            *flag = !*flag;
            *flag
        };

        tracing::debug!("{:?} disabled: {}", kind, value);
        self.publish();
        value
    }

    /// Nimmt die Session aus dem Zustand und setzt `Idle`
    ///
    /// Nur der erste Aufrufer bekommt die Session; damit läuft das
    /// Aufräumen pro Session genau einmal.
    fn detach_session(&self, token: Option<SessionToken>) -> Option<ActiveSession> {
        let mut state = self.shared.state.lock();
        let matches = match (&state.active, token) {
            (Some(session), Some(token)) => session.token == token,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return None;
        }

        state.status = CallStatus::Idle;
        state.toggles = ToggleState::default();
        state.active.take()
    }

    /// Gibt die Ressourcen einer abgelösten Session frei und meldet das Ende
    async fn finish_session(&self, session: ActiveSession, reason: EndReason) {
        let ActiveSession {
            token,
            target,
            resources,
            ..
        } = session;

        resources.release().await;
        self.publish();

        tracing::info!("Call {} ended ({:?})", token, reason);
        self.notify_end(CallEnd {
            session: Some(token),
            target: Some(target),
            reason,
            return_to: self.shared.config.return_route.clone(),
        });
    }

    /// Meldet das Ende an Subscriber und Completion-Callback
    fn notify_end(&self, end: CallEnd) {
        let _ = self.shared.event_tx.send(CallEvent::Ended(end.clone()));
        (self.shared.on_call_end)(end);
    }

    /// Setzt `Error` und gibt alle Ressourcen der Session frei
    ///
    /// Die Session bleibt bis zum expliziten Teardown im Zustand `Error`.
    async fn fail_session(&self, token: SessionToken, error: CallError, message: String) {
        let resources = {
            let mut state = self.shared.state.lock();
            let SessionState {
                active,
                status,
                toggles,
                last_error,
                ..
            } = &mut *state;

            let Some(session) = active.as_mut().filter(|s| s.token == token) else {
                tracing::debug!("Ignoring error for stale session {}: {}", token, message);
                return;
            };
            if status.is_error() {
                return;
            }

            tracing::warn!("Call {} failed: {}", token, message);
            *status = CallStatus::Error(message);
            *toggles = ToggleState::default();
            *last_error = Some(error);
            std::mem::take(&mut session.resources)
        };

        resources.release().await;
        self.publish();
    }

    /// Bindet einen Remote-Stream und wechselt nach `Connected`
    fn bind_remote_stream(&self, token: SessionToken, stream: MediaStream) -> bool {
        let replaced = {
            let mut state = self.shared.state.lock();
            let connected_message = self.shared.config.messages.connected.clone();
            let already_connected = state.status.is_connected();

            let Some(session) = state.live_session(token) else {
                tracing::debug!("Ignoring remote stream for stale session {}", token);
                stream.stop_all();
                return false;
            };

            let replaced = session.resources.remote_stream.replace(stream.clone());
            if !already_connected {
                session.connected_at = Some(Utc::now());
                state.status = CallStatus::Connected(connected_message);
                tracing::info!("Call {} connected", token);
            }
            replaced.filter(|old| !old.same_stream(&stream))
        };

        if let Some(old) = replaced {
            tracing::debug!("Replacing remote stream {}", old.id());
            old.stop_all();
        }
        self.publish();
        true
    }

    /// Wendet ein Event an; `false` beendet die Event-Pumpe
    async fn handle_event(&self, token: SessionToken, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Peer(PeerEvent::Stream(stream))
            | SessionEvent::Signal(SignalEvent::RemoteStream(stream)) => {
                self.bind_remote_stream(token, stream)
            }
            SessionEvent::Peer(PeerEvent::Error(message))
            | SessionEvent::Signal(SignalEvent::Failed(message)) => {
                tracing::error!("Peer error: {}", message);
                self.fail_session(token, CallError::PeerConnection(message.clone()), message)
                    .await;
                false
            }
            SessionEvent::Peer(PeerEvent::Close) | SessionEvent::Signal(SignalEvent::Closed) => {
                match self.detach_session(Some(token)) {
                    Some(session) => {
                        tracing::info!("Call {} closed by peer", token);
                        self.finish_session(session, EndReason::RemoteClosed).await;
                    }
                    None => tracing::debug!("Ignoring close for stale session {}", token),
                }
                false
            }
        }
    }

    /// Führt Peer- und Signaling-Events einer Session nacheinander aus
    async fn pump_events(
        shared: Weak<Shared>,
        token: SessionToken,
        events: PeerEvents,
        signals: BoxStream<'static, SignalEvent>,
        mut stopped: oneshot::Receiver<()>,
    ) {
        let mut incoming = stream::select(
            events.map(SessionEvent::Peer),
            signals.map(SessionEvent::Signal),
        );

        loop {
            let event = tokio::select! {
                _ = &mut stopped => break,
                event = incoming.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let Some(shared) = shared.upgrade() else {
                break;
            };
            let controller = CallSessionController { shared };
            if !controller.handle_event(token, event).await {
                break;
            }
        }

        tracing::debug!("Event pump for session {} finished", token);
    }

    /// Sendet den aktuellen Zustand an alle Subscriber
    fn publish(&self) {
        let snapshot = self.shared.state.lock().snapshot();
        let _ = self.shared.event_tx.send(CallEvent::StateChanged(snapshot));
    }
}

impl std::fmt::Debug for CallSessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("CallSessionController")
            .field("status", &state.status)
            .field("session", &state.active.as_ref().map(|s| s.token))
            .field("toggles", &state.toggles)
            .finish()
    }
}
