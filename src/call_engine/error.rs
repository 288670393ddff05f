use super::peer::PeerError;
use crate::bootstrap::BootstrapError;
use crate::media::PlaybackError;
use crate::signaling::SignalingError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    #[error("Signaling failed: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Session bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("Playback failed: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Peer connection failed: {0}")]
    Peer(#[from] PeerError),

    #[error("Call was cancelled")]
    Cancelled,

    #[error("No active call")]
    NoActiveCall,

    #[error("Orchestrator is shut down")]
    OrchestratorClosed,
}

/// Flache Fehlerklasse für Observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    ChannelClosed,
    Timeout,
    Network,
    HttpStatus,
    Decode,
    MalformedResponse,
    Unplayable,
    DownloadFailed,
    Peer,
    Cancelled,
    Internal,
}

impl CallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::Signaling(e) => match e {
                SignalingError::Connection(_) | SignalingError::SendFailed(_) => {
                    ErrorKind::Connection
                }
                SignalingError::ChannelClosed => ErrorKind::ChannelClosed,
                SignalingError::Timeout(_) => ErrorKind::Timeout,
                SignalingError::Cancelled => ErrorKind::Cancelled,
                SignalingError::NegotiationPending => ErrorKind::Internal,
            },
            CallError::Bootstrap(e) => match e {
                BootstrapError::Network { .. } => ErrorKind::Network,
                BootstrapError::HttpStatus { .. } => ErrorKind::HttpStatus,
                BootstrapError::Decode(_) => ErrorKind::Decode,
                BootstrapError::MalformedResponse => ErrorKind::MalformedResponse,
            },
            CallError::Playback(e) => match e {
                PlaybackError::Unplayable(_) => ErrorKind::Unplayable,
                PlaybackError::DownloadFailed(_) => ErrorKind::DownloadFailed,
                PlaybackError::Cancelled => ErrorKind::Cancelled,
            },
            CallError::Peer(_) => ErrorKind::Peer,
            CallError::Cancelled => ErrorKind::Cancelled,
            CallError::NoActiveCall | CallError::OrchestratorClosed => ErrorKind::Internal,
        }
    }

    /// Abbruch ist kein Fehler und wird dem Observer nicht gemeldet
    pub fn is_cancellation(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}
