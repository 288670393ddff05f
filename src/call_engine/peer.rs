//! Peer Connection - lokales Offer für den Signaling-Pfad
//!
//! Der Orchestrator kennt nur [`PeerConnector`] und [`PeerSession`].
//! [`WebRtcConnector`] ist die Implementierung mit dem `webrtc`-Crate.

use crate::signaling::IceCandidate;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

/// Opus-Takt des lokalen Audio-Tracks
const OPUS_CLOCK_RATE: u32 = 48_000;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("WebRTC error: {0}")]
    WebRTC(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),
}

// ============================================================================
// EVENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Änderungen an den Remote-Tracks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    TrackAdded { id: String, kind: TrackKind },
    TrackRemoved { id: String },
}

// ============================================================================
// TRAITS
// ============================================================================

#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Baut eine neue Peer Connection auf. Track-Änderungen gehen an `events`.
    async fn connect(
        &self,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerSession>, PeerError>;
}

#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Erstellt das lokale Offer inklusive gesammelter ICE-Kandidaten
    async fn create_offer(&self) -> Result<String, PeerError>;

    async fn apply_answer(&self, sdp: String) -> Result<(), PeerError>;

    /// Kandidat aus dem Signaling-Kanal, nach der Answer
    async fn add_ice_candidate(&self, _candidate: &IceCandidate) -> Result<(), PeerError> {
        Ok(())
    }

    /// Schließt die Verbindung. Mehrfach aufrufbar.
    async fn close(&self);
}

// ============================================================================
// WEBRTC IMPLEMENTATION
// ============================================================================

/// Erzeugt Peer Connections: ein lokaler Audio-Track, Audio und Video empfangen
#[derive(Debug, Clone)]
pub struct WebRtcConnector {
    ice_servers: Vec<String>,
}

impl WebRtcConnector {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }

    async fn create_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| PeerError::WebRTC(e.to_string()))?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| PeerError::WebRTC(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = api
            .new_peer_connection(config)
            .await
            .map_err(|e| PeerError::WebRTC(e.to_string()))?;
        Ok(Arc::new(pc))
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(
        &self,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerSession>, PeerError> {
        let pc = self.create_peer_connection().await?;

        // Lokaler Audio-Track, damit der Avatar uns hören kann
        let audio_track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: 1,
                ..Default::default()
            },
            "audio".to_string(),
            "avatar-call".to_string(),
        ));
        pc.add_track(Arc::clone(&audio_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| PeerError::WebRTC(e.to_string()))?;

        // Video nur empfangen
        pc.add_transceiver_from_kind(
            RTPCodecType::Video,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await
        .map_err(|e| PeerError::WebRTC(e.to_string()))?;

        let session = WebRtcSession {
            pc,
            remote_tracks: Arc::new(Mutex::new(Vec::new())),
        };
        session.register_handlers(events);
        Ok(Box::new(session))
    }
}

struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
    remote_tracks: Arc<Mutex<Vec<String>>>,
}

impl WebRtcSession {
    fn register_handlers(&self, events: mpsc::UnboundedSender<PeerEvent>) {
        let tracks = Arc::clone(&self.remote_tracks);
        let track_events = events.clone();
        self.pc.on_track(Box::new(move |track, _, _| {
            let id = track.id();
            let kind = match track.kind() {
                RTPCodecType::Video => TrackKind::Video,
                _ => TrackKind::Audio,
            };
            tracing::info!("Remote {:?} track added: {}", kind, id);
            tracks.lock().push(id.clone());
            let _ = track_events.send(PeerEvent::TrackAdded { id, kind });
            Box::pin(async {})
        }));

        // webrtc-rs meldet entfernte Tracks nicht einzeln
        let tracks = Arc::clone(&self.remote_tracks);
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                tracing::info!("Peer connection state: {:?}", s);
                if matches!(
                    s,
                    RTCPeerConnectionState::Disconnected
                        | RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Closed
                ) {
                    for id in tracks.lock().drain(..) {
                        let _ = events.send(PeerEvent::TrackRemoved { id });
                    }
                }
                Box::pin(async {})
            }));
    }
}

#[async_trait]
impl PeerSession for WebRtcSession {
    async fn create_offer(&self) -> Result<String, PeerError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| PeerError::WebRTC(e.to_string()))?;

        // Kein Trickle ICE: Kandidaten stehen direkt im Offer
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| PeerError::WebRTC(e.to_string()))?;
        let _ = gathered.recv().await;

        self.pc
            .local_description()
            .await
            .map(|description| description.sdp)
            .ok_or_else(|| PeerError::WebRTC("local description missing".to_string()))
    }

    async fn apply_answer(&self, sdp: String) -> Result<(), PeerError> {
        let answer =
            RTCSessionDescription::answer(sdp).map_err(|e| PeerError::InvalidSdp(e.to_string()))?;

        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| PeerError::WebRTC(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), PeerError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| PeerError::WebRTC(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            tracing::debug!("Peer connection close failed: {}", e);
        }
    }
}
