//! Signaling Module - WebSocket Kanal zum Avatar-Endpunkt
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Signaling-Endpunkt:
//! - WebSocket-Verbindung aufbauen und halten
//! - SDP Offer senden und auf die Answer warten
//! - Eingehende Nachrichten dekodieren und weiterleiten
//!

mod channel;
mod messages;

pub use channel::{SignalingChannel, SignalingError, SignalingEvent, DEFAULT_CONNECT_TIMEOUT};
pub use messages::*;
