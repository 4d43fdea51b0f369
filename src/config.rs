//! Konfiguration für den Call-Controller
//!
//! Enthält ICE-Server, Media-Constraints, lokalisierte Status-Texte
//! und die Route, zu der die UI nach einem Anruf zurückkehrt.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Umgebungsvariable mit Pfad zu einer JSON-Konfigurationsdatei
pub const CONFIG_PATH_ENV: &str = "VIDEOCHAT_CONFIG";

/// Umgebungsvariable mit komma-separierten ICE-Server-URLs
pub const ICE_SERVERS_ENV: &str = "VIDEOCHAT_ICE_SERVERS";

/// Mindestanzahl an STUN-Servern für NAT-Traversal
pub const MIN_STUN_SERVERS: usize = 2;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("At least 2 STUN servers required, got {0}")]
    NotEnoughStunServers(usize),
}

// ============================================================================
// ICE SERVER CONFIGURATION
// ============================================================================

/// Ein STUN- oder TURN-Server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Server ohne Credentials (STUN)
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// TURN-Server mit Credentials
    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

/// Standard STUN Server Konfiguration
pub fn default_ice_servers() -> Vec<IceServer> {
    vec![
        IceServer::stun("stun:stun.l.google.com:19302"),
        IceServer::stun("stun:stun1.l.google.com:19302"),
    ]
}

// ============================================================================
// MEDIA CONSTRAINTS
// ============================================================================

/// Welche lokalen Geräte angefordert werden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

// ============================================================================
// STATUS MESSAGES
// ============================================================================

/// Lokalisierte Texte, die mit dem Call-Status an die UI gehen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StatusMessages {
    pub connecting: String,
    pub connected: String,
    pub media_unavailable: String,
}

impl Default for StatusMessages {
    fn default() -> Self {
        Self {
            connecting: "正在连接...".to_string(),
            connected: "通话已连接".to_string(),
            media_unavailable: "无法访问摄像头或麦克风。请确保已授予权限。".to_string(),
        }
    }
}

// ============================================================================
// CALL CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CallConfig {
    pub ice_servers: Vec<IceServer>,
    pub constraints: MediaConstraints,
    pub messages: StatusMessages,
    /// Route, zu der die UI nach Ende des Anrufs navigiert
    pub return_route: String,
    /// Verzögerung der simulierten Verbindung (Demo-Signaling)
    pub simulated_connect_delay_ms: u64,
    /// Kapazität des Event-Channels
    pub event_capacity: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            constraints: MediaConstraints::default(),
            messages: StatusMessages::default(),
            return_route: "/contacts".to_string(),
            simulated_connect_delay_ms: 2000,
            event_capacity: 100,
        }
    }
}

impl CallConfig {
    /// Parst eine Konfiguration aus JSON; fehlende Felder bekommen Defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Lädt eine Konfiguration aus einer JSON-Datei
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    /// Lädt die Konfiguration aus der Umgebung
    ///
    /// `VIDEOCHAT_CONFIG` zeigt auf eine JSON-Datei, `VIDEOCHAT_ICE_SERVERS`
    /// überschreibt die ICE-Server mit einer komma-separierten Liste.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => {
                tracing::info!("Loading call config from {}", path);
                Self::load(path)?
            }
            Err(_) => Self::default(),
        };

        if let Ok(list) = std::env::var(ICE_SERVERS_ENV) {
            let servers = parse_ice_server_list(&list);
            if !servers.is_empty() {
                config.ice_servers = servers;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Prüft, ob genug STUN-Server für NAT-Traversal konfiguriert sind
    pub fn validate(&self) -> Result<(), ConfigError> {
        let stun = self
            .ice_servers
            .iter()
            .flat_map(|server| server.urls.iter())
            .filter(|url| url.starts_with("stun:") || url.starts_with("stuns:"))
            .count();

        if stun < MIN_STUN_SERVERS {
            return Err(ConfigError::NotEnoughStunServers(stun));
        }
        Ok(())
    }

    /// Verzögerung des simulierten Signalings
    pub fn simulated_connect_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.simulated_connect_delay_ms)
    }
}

/// Zerlegt `stun:a,stun:b` in einzelne Server-Einträge
pub fn parse_ice_server_list(list: &str) -> Vec<IceServer> {
    list.split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(IceServer::stun)
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
