//! Call-Status, Snapshots und Events für die UI

use super::media::{MediaAccessError, MediaStream};
use crate::config::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum CallError {
    #[error("Media access error: {0}")]
    MediaAccess(#[serde(serialize_with = "display")] MediaAccessError),

    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<ConfigError> for CallError {
    fn from(e: ConfigError) -> Self {
        CallError::Config(e.to_string())
    }
}

fn display<T: fmt::Display, S: serde::Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

// ============================================================================
// CALL STATUS
// ============================================================================

/// Aktueller Status der Call-Session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum CallStatus {
    /// Kein aktiver Anruf
    #[default]
    Idle,
    /// Lokale Medien / Peer Connection werden aufgebaut
    Connecting(String),
    /// Remote-Stream liegt vor
    Connected(String),
    /// Anruf fehlgeschlagen, wartet auf Teardown
    Error(String),
}

impl CallStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, CallStatus::Idle)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, CallStatus::Connected(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CallStatus::Error(_))
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            CallStatus::Idle => None,
            CallStatus::Connecting(m) | CallStatus::Connected(m) | CallStatus::Error(m) => Some(m),
        }
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// Monoton steigende Kennung eines Anrufversuchs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SessionToken(pub u64);

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Mute- und Kamera-Zustand der lokalen Tracks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleState {
    pub muted: bool,
    pub camera_off: bool,
}

/// Lesbarer Zustand für die UI
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSnapshot {
    pub session: Option<SessionToken>,
    pub target: Option<String>,
    pub status: CallStatus,
    pub local_stream: Option<MediaStream>,
    pub remote_stream: Option<MediaStream>,
    pub muted: bool,
    pub camera_off: bool,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<CallError>,
}

// ============================================================================
// CALL END
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Benutzer hat aufgelegt
    Hangup,
    /// Verbindung von der Gegenseite geschlossen
    RemoteClosed,
    /// Durch einen neuen Anruf ersetzt
    Replaced,
    /// Controller wurde entsorgt
    Disposed,
    /// Auflegen ohne laufende Session, nur Navigation
    NoSession,
}

/// Wird an den Completion-Callback übergeben
///
/// Pro Session genau einmal; `end_call` ohne Session liefert zusätzlich ein
/// `CallEnd` ohne Token mit `EndReason::NoSession`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnd {
    pub session: Option<SessionToken>,
    pub target: Option<String>,
    pub reason: EndReason,
    /// Route, zu der die UI zurückkehren soll
    pub return_to: String,
}

/// Events die vom Controller ausgelöst werden
#[derive(Debug, Clone)]
pub enum CallEvent {
    StateChanged(CallSnapshot),
    Ended(CallEnd),
}
