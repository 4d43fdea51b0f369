//! Media Handles - lokale und entfernte Streams
//!
//! Ein `MediaStream` ist ein billig klonbarer Handle auf eine Menge von
//! Tracks. Der Controller besitzt die Streams exklusiv; die UI darf sie nur
//! lesen. Tracks werden nur über die Toggle-Operationen verändert.

use crate::config::MediaConstraints;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Fehler beim Zugriff auf Kamera/Mikrofon
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaAccessError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("No device found: {0}")]
    NoDevice(String),

    #[error("Media device unavailable: {0}")]
    Unavailable(String),
}

/// Fehler bei einer Operation auf einem einzelnen Track
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Failed to stop track {track}: {reason}")]
    StopFailed { track: String, reason: String },
}

// ============================================================================
// TRACKS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Ein einzelner Audio- oder Video-Track
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    /// Stoppt den Track; wiederholtes Stoppen ist erlaubt
    fn stop(&self) -> Result<(), MediaError>;

    fn is_stopped(&self) -> bool;
}

/// In-Memory Track mit atomaren Flags
#[derive(Debug)]
pub struct Track {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
    stop_calls: AtomicUsize,
}

impl Track {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), kind, label)
    }

    pub fn with_id(id: impl Into<String>, kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
        }
    }

    pub fn audio(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(TrackKind::Audio, label))
    }

    pub fn video(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(TrackKind::Video, label))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wie oft `stop()` aufgerufen wurde
    pub fn stop_count(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

impl MediaTrack for Track {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) -> Result<(), MediaError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if !self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!("Track {} ({}) stopped", self.id, self.label);
        }
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

// ============================================================================
// MEDIA STREAM
// ============================================================================

struct StreamInner {
    id: String,
    tracks: RwLock<Vec<Arc<dyn MediaTrack>>>,
}

/// Handle auf einen lokalen oder entfernten Stream
#[derive(Clone)]
pub struct MediaStream {
    inner: Arc<StreamInner>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), tracks)
    }

    pub fn with_id(id: impl Into<String>, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id: id.into(),
                tracks: RwLock::new(tracks),
            }),
        }
    }

    /// Stream ohne Tracks (z.B. simulierter Remote-Stream)
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.inner.tracks.read().clone()
    }

    pub fn audio_tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks_of(TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks_of(TrackKind::Video)
    }

    fn tracks_of(&self, kind: TrackKind) -> Vec<Arc<dyn MediaTrack>> {
        self.inner
            .tracks
            .read()
            .iter()
            .filter(|track| track.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn add_track(&self, track: Arc<dyn MediaTrack>) {
        self.inner.tracks.write().push(track);
    }

    /// Prüft, ob beide Handles auf denselben Stream zeigen
    pub fn same_stream(&self, other: &MediaStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stoppt alle Tracks (best effort)
    ///
    /// Fehler einzelner Tracks werden geloggt und übersprungen.
    /// Gibt die Anzahl fehlgeschlagener Tracks zurück.
    pub fn stop_all(&self) -> usize {
        let mut failed = 0;
        for track in self.tracks() {
            if let Err(e) = track.stop() {
                tracing::warn!("Ignoring track stop failure: {}", e);
                failed += 1;
            }
        }
        failed
    }

    /// Zusammenfassung für die UI
    pub fn summary(&self) -> StreamSummary {
        StreamSummary {
            id: self.id().to_string(),
            tracks: self
                .tracks()
                .iter()
                .map(|track| TrackSummary {
                    id: track.id().to_string(),
                    kind: track.kind(),
                    enabled: track.is_enabled(),
                    stopped: track.is_stopped(),
                })
                .collect(),
        }
    }
}

impl PartialEq for MediaStream {
    fn eq(&self, other: &Self) -> bool {
        self.same_stream(other)
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id())
            .field("tracks", &self.inner.tracks.read().len())
            .finish()
    }
}

impl Serialize for MediaStream {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.summary().serialize(serializer)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamSummary {
    pub id: String,
    pub tracks: Vec<TrackSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackSummary {
    pub id: String,
    pub kind: TrackKind,
    pub enabled: bool,
    pub stopped: bool,
}

// ============================================================================
// MEDIA DEVICES
// ============================================================================

/// Quelle für lokale Medien (Kamera + Mikrofon)
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn request_local_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<MediaStream, MediaAccessError>;
}

/// Erzeugt synthetische Tracks ohne echte Hardware
#[derive(Debug, Clone, Default)]
pub struct SyntheticDevices;

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn request_local_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<MediaStream, MediaAccessError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaAccessError::Unavailable(
                "neither audio nor video requested".to_string(),
            ));
        }

        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();
        if constraints.audio {
            tracks.push(Track::audio("synthetic microphone"));
        }
        if constraints.video {
            tracks.push(Track::video("synthetic camera"));
        }

        let stream = MediaStream::new(tracks);
        tracing::info!("Created synthetic local stream {}", stream.id());
        Ok(stream)
    }
}

/// Prüft über cpal, ob ein Mikrofon vorhanden ist
///
/// Video wird synthetisch bereitgestellt, da cpal nur Audio kennt.
#[cfg(feature = "audio-devices")]
#[derive(Debug, Clone, Default)]
pub struct SystemDevices;

#[cfg(feature = "audio-devices")]
#[async_trait]
impl MediaDevices for SystemDevices {
    async fn request_local_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<MediaStream, MediaAccessError> {
        use cpal::traits::{DeviceTrait, HostTrait};

        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();

        if constraints.audio {
            let host = cpal::default_host();
            let device = host.default_input_device().ok_or_else(|| {
                tracing::warn!("No audio input device found");
                MediaAccessError::NoDevice("no audio input device".to_string())
            })?;
            let name = device
                .name()
                .map_err(|e| MediaAccessError::Unavailable(e.to_string()))?;
            tracing::info!("Using audio input device: {}", name);
            tracks.push(Track::audio(name));
        }
        if constraints.video {
            tracks.push(Track::video("synthetic camera"));
        }

        if tracks.is_empty() {
            return Err(MediaAccessError::Unavailable(
                "neither audio nor video requested".to_string(),
            ));
        }
        Ok(MediaStream::new(tracks))
    }
}

// ============================================================================
// TESTS
// ============================================================================
