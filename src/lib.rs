//! Avatar Call - Echtzeit-Anrufe mit sprechenden Avataren
//!
//! Verwandelt "ruf diesen Kontakt an" in einen laufenden Audio/Video-Stream:
//! - Signaling über WebSocket (SDP Offer/Answer)
//! - Session-Bootstrap über REST
//! - Media Pipeline mit Fallback von Stream auf Download
//! - ein Orchestrator, der genau eine Session besitzt

pub mod bootstrap;
pub mod call_engine;
pub mod config;
pub mod directory;
pub mod media;
pub mod signaling;

pub use call_engine::{
    observe, CallCollaborators, CallError, CallEvent, CallObserver, CallOrchestrator,
    CallParameters, CallSession, CallState, DialHandle, ErrorKind, SessionId,
};
pub use config::{CallConfig, ConfigError, DialMode};
pub use media::MediaReference;

use tracing_subscriber::EnvFilter;

// ============================================================================
// LOGGING
// ============================================================================

/// Installiert den globalen tracing-Subscriber.
///
/// `RUST_LOG` hat Vorrang vor den Defaults. Ein zweiter Aufruf ist wirkungslos.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("avatar_call=debug,avatar_call_lib=debug,webrtc=warn"));

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
    {
        tracing::debug!("Logging initialized");
    }
}
