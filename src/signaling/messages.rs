//! Message Types für den Offer/Answer-Austausch
//!
//! Das Format entspricht dem `signal`-Payload üblicher Browser-Peers:
//! `{ "type": "offer", "sdp": "..." }`.

use serde::{Deserialize, Serialize};

// ============================================================================
// SDP PAYLOAD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Vollständige Session Description (non-trickle, enthält alle Candidates)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalData {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SignalData {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

// ============================================================================
// TRANSPORT MESSAGES
// ============================================================================

/// Inhalt einer Signaling-Nachricht
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalPayload {
    /// SDP Offer oder Answer
    Signal { data: SignalData },

    /// Anruf beendet
    Hangup,

    /// Anruf abgelehnt
    RejectCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Adressierte Nachricht zwischen zwei Peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
    #[serde(rename = "fromPeerId")]
    pub from: String,
    #[serde(rename = "toPeerId")]
    pub to: String,
    #[serde(flatten)]
    pub payload: SignalPayload,
}

impl SignalMessage {
    pub fn new(from: impl Into<String>, to: impl Into<String>, payload: SignalPayload) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            payload,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ============================================================================
// TESTS
// ============================================================================
