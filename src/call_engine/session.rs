//! Call Session - Daten eines einzelnen Anrufs

use crate::media::MediaReference;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// CALL PARAMETERS
// ============================================================================

/// Verbindungsparameter eines Kontakts, pro Wählversuch unveränderlich
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallParameters {
    pub display_name: String,
    pub face_id: String,
    pub voice_id: String,
    pub first_message: String,
    pub system_prompt: String,
    #[serde(skip_serializing, default)]
    pub api_key: String,
}

impl fmt::Debug for CallParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallParameters")
            .field("display_name", &self.display_name)
            .field("face_id", &self.face_id)
            .field("voice_id", &self.voice_id)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SESSION ID
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

// ============================================================================
// CALL STATE
// ============================================================================

/// Lebenszyklus eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Kein aktiver Anruf
    Idle,
    /// Signaling oder Bootstrap läuft
    Dialing,
    /// Referenz liegt vor, Pipeline lädt
    AwaitingMedia,
    /// Medien laufen
    Active,
    /// Ressourcen werden freigegeben
    Ending,
    /// Fehlgeschlagen, räumt auf wie `Ending`
    Failed,
}

impl CallState {
    /// Gehört der Zustand zu einer laufenden Session?
    pub fn is_live(self) -> bool {
        matches!(
            self,
            CallState::Dialing | CallState::AwaitingMedia | CallState::Active
        )
    }

    pub fn can_transition_to(self, next: CallState) -> bool {
        use CallState::*;
        matches!(
            (self, next),
            (Idle, Dialing)
                | (Dialing, AwaitingMedia)
                | (AwaitingMedia, Active)
                | (Dialing | AwaitingMedia | Active, Ending)
                | (Dialing | AwaitingMedia | Active, Failed)
                | (Ending | Failed, Idle)
        )
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "idle",
            CallState::Dialing => "dialing",
            CallState::AwaitingMedia => "awaiting_media",
            CallState::Active => "active",
            CallState::Ending => "ending",
            CallState::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// CALL SESSION
// ============================================================================

/// Ein Anruf von `dial()` bis zurück zu `Idle`
#[derive(Debug, Clone)]
pub struct CallSession {
    pub id: SessionId,
    pub state: CallState,
    pub params: Arc<CallParameters>,
    pub media: Option<MediaReference>,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn new(id: SessionId, params: Arc<CallParameters>) -> Self {
        Self {
            id,
            state: CallState::Idle,
            params,
            media: None,
            created_at: Utc::now(),
            connected_at: None,
            ended_at: None,
        }
    }

    /// Dauer seit Verbindungsaufbau
    pub fn duration(&self) -> Option<chrono::Duration> {
        let connected = self.connected_at?;
        Some(self.ended_at.unwrap_or_else(Utc::now) - connected)
    }
}
