//! Konfiguration
//!
//! Defaults zeigen auf die Simli-Endpunkte. Umgebungsvariablen
//! überschreiben einzelne Werte, eine JSON-Datei kann alles setzen.

use crate::bootstrap::AudioStreamFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SIGNALING_URL: &str = "wss://api.simli.ai/StartWebRTCSession";
pub const DEFAULT_SESSION_URL: &str = "https://api.simli.ai/startE2ESession";
pub const DEFAULT_AUDIO_STREAM_URL: &str = "https://api.simli.ai/audioToVideoStream";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

// ============================================================================
// DIAL MODE
// ============================================================================

/// Wie ein Anruf Medien bekommt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialMode {
    /// Peer-Offer über WebSocket, danach Audio-Stream-Bootstrap
    Signaling,
    /// Ein REST-Aufruf liefert Stream oder Raum
    #[default]
    Bootstrap,
}

impl FromStr for DialMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "signaling" | "webrtc" => Ok(DialMode::Signaling),
            "bootstrap" | "rest" => Ok(DialMode::Bootstrap),
            _ => Err(ConfigError::InvalidValue {
                key: "AVATAR_CALL_MODE",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// CALL CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub mode: DialMode,
    pub signaling_url: String,
    pub session_url: String,
    pub audio_stream_url: String,
    pub audio_format: AudioStreamFormat,
    pub ice_servers: Vec<String>,

    pub bootstrap_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub negotiation_timeout_ms: u64,
    pub playable_timeout_ms: u64,
    pub download_timeout_ms: u64,
    /// Wie lange Teardown auf den Session-Task wartet
    pub teardown_timeout_ms: u64,

    /// `None` → Cache-Verzeichnis des Benutzers
    pub cache_dir: Option<PathBuf>,
    pub derive_asset_from_stream: bool,
    pub prefetch_fallback: bool,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            mode: DialMode::default(),
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            session_url: DEFAULT_SESSION_URL.to_string(),
            audio_stream_url: DEFAULT_AUDIO_STREAM_URL.to_string(),
            audio_format: AudioStreamFormat::default(),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            bootstrap_timeout_ms: 15_000,
            connect_timeout_ms: 10_000,
            negotiation_timeout_ms: 15_000,
            playable_timeout_ms: 8_000,
            download_timeout_ms: 60_000,
            teardown_timeout_ms: 2_000,
            cache_dir: None,
            derive_asset_from_stream: false,
            prefetch_fallback: true,
        }
    }
}

impl CallConfig {
    /// Defaults plus Umgebungsvariablen
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Lädt eine JSON-Datei, fehlende Felder bekommen Defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&raw)?;
        tracing::debug!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Überschreibt Felder mit Werten aus `lookup`
    pub fn overlay(
        mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(mode) = lookup("AVATAR_CALL_MODE") {
            self.mode = mode.parse()?;
        }
        if let Some(url) = lookup("SIGNALING_URL") {
            self.signaling_url = url;
        }
        if let Some(url) = lookup("SESSION_URL") {
            self.session_url = url;
        }
        if let Some(url) = lookup("AUDIO_STREAM_URL") {
            self.audio_stream_url = url;
        }
        if let Some(dir) = lookup("AVATAR_CALL_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(servers) = lookup("AVATAR_CALL_ICE_SERVERS") {
            self.ice_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = lookup("AVATAR_CALL_DERIVE_ASSET") {
            self.derive_asset_from_stream = parse_flag("AVATAR_CALL_DERIVE_ASSET", &value)?;
        }
        if let Some(value) = lookup("AVATAR_CALL_BOOTSTRAP_TIMEOUT_MS") {
            self.bootstrap_timeout_ms = parse_millis("AVATAR_CALL_BOOTSTRAP_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("AVATAR_CALL_PLAYABLE_TIMEOUT_MS") {
            self.playable_timeout_ms = parse_millis("AVATAR_CALL_PLAYABLE_TIMEOUT_MS", &value)?;
        }
        Ok(self)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn playable_timeout(&self) -> Duration {
        Duration::from_millis(self.playable_timeout_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    /// Ermittelt das Cache-Verzeichnis für heruntergeladene Assets
    pub fn resolved_cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.cache_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("ai", "simli", "avatar-call")
            .map(|dirs| dirs.cache_dir().join("assets"))
            .unwrap_or_else(|| std::env::temp_dir().join("avatar-call"))
    }
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_millis(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}
