//! Bootstrap Module - REST-Endpunkte zum Start einer Avatar-Session

mod client;
mod payloads;

pub use client::{BootstrapError, SessionBootstrapper};
pub use payloads::{AudioStreamFormat, AudioStreamRequest, SessionRequest, SessionResponse};
