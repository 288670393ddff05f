//! Call Engine Module - Orchestrierung eines Avatar-Anrufs
//!
//! Dieses Modul verwaltet:
//! - den Lebenszyklus einer Call Session
//! - die WebRTC Peer Connection auf dem Signaling-Pfad
//! - Lifecycle-Events für Observer

mod engine;
mod error;
mod events;
mod peer;
mod session;

pub use engine::{CallCollaborators, CallOrchestrator, DialHandle};
pub use error::{CallError, ErrorKind};
pub use events::{observe, CallEvent, CallObserver};
pub use peer::{PeerConnector, PeerError, PeerEvent, PeerSession, TrackKind, WebRtcConnector};
pub use session::{CallParameters, CallSession, CallState, SessionId};
