#![allow(dead_code)]

use async_trait::async_trait;
use avatar_call_lib::call_engine::{PeerConnector, PeerError, PeerEvent, PeerSession, TrackKind};
use avatar_call_lib::media::{
    AudioCue, ItemId, MediaRenderer, PlaybackSource, PreparedItem, RenderError, RendererSignal,
};
use avatar_call_lib::signaling::{IceCandidate, SignalingMessage};
use avatar_call_lib::{
    CallCollaborators, CallConfig, CallEvent, CallOrchestrator, CallParameters, CallState,
    DialMode, SessionId,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// SCRIPTED RENDERER
// ============================================================================

/// Entscheidet nach Quelle: "fail" → nicht abspielbar, "hang" → hängt, sonst ok
#[derive(Default)]
pub struct ScriptedRenderer {
    next_id: AtomicU64,
    pub prepared: Mutex<Vec<PlaybackSource>>,
    pub shown: Mutex<Vec<ItemId>>,
    pub released: Mutex<Vec<ItemId>>,
    signals: Mutex<Vec<mpsc::UnboundedSender<RendererSignal>>>,
}

impl ScriptedRenderer {
    /// Schickt `signal` an alle vorbereiteten Elemente
    pub fn signal_all(&self, signal: RendererSignal) {
        for tx in self.signals.lock().iter() {
            let _ = tx.send(signal.clone());
        }
    }
}

#[async_trait]
impl MediaRenderer for ScriptedRenderer {
    async fn prepare(&self, source: &PlaybackSource) -> Result<PreparedItem, RenderError> {
        self.prepared.lock().push(source.clone());
        let label = match source {
            PlaybackSource::Stream(url) | PlaybackSource::Room(url) => url.clone(),
            PlaybackSource::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        if label.contains("hang") {
            std::future::pending::<()>().await;
        }
        if label.contains("fail") {
            return Err(RenderError::Unplayable(label));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, signals) = mpsc::unbounded_channel();
        self.signals.lock().push(tx);
        Ok(PreparedItem { id, signals })
    }

    fn show(&self, id: ItemId) {
        self.shown.lock().push(id);
    }

    fn release(&self, id: ItemId) {
        self.released.lock().push(id);
    }
}

// ============================================================================
// SCRIPTED PEER
// ============================================================================

#[derive(Default)]
pub struct PeerLog {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub answers: Mutex<Vec<String>>,
    pub candidates: AtomicUsize,
    /// Remote-Kandidaten bleiben für immer hängen
    pub stall_candidates: AtomicBool,
}

/// Peer ohne Netzwerk. Meldet nach der Answer einen Video-Track.
pub struct ScriptedPeer {
    pub log: Arc<PeerLog>,
}

struct ScriptedPeerSession {
    log: Arc<PeerLog>,
    events: mpsc::UnboundedSender<PeerEvent>,
    closed: AtomicBool,
}

pub const AVATAR_TRACK: &str = "avatar-video";

#[async_trait]
impl PeerConnector for ScriptedPeer {
    async fn connect(
        &self,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerSession>, PeerError> {
        self.log.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedPeerSession {
            log: Arc::clone(&self.log),
            events,
            closed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl PeerSession for ScriptedPeerSession {
    async fn create_offer(&self) -> Result<String, PeerError> {
        Ok("v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\n".to_string())
    }

    async fn apply_answer(&self, sdp: String) -> Result<(), PeerError> {
        self.log.answers.lock().push(sdp);
        let _ = self.events.send(PeerEvent::TrackAdded {
            id: AVATAR_TRACK.to_string(),
            kind: TrackKind::Video,
        });
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: &IceCandidate) -> Result<(), PeerError> {
        self.log.candidates.fetch_add(1, Ordering::SeqCst);
        if self.log.stall_candidates.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.log.closes.fetch_add(1, Ordering::SeqCst);
            if !self.log.answers.lock().is_empty() {
                let _ = self.events.send(PeerEvent::TrackRemoved {
                    id: AVATAR_TRACK.to_string(),
                });
            }
        }
    }
}

// ============================================================================
// RECORDING CUE
// ============================================================================

#[derive(Default)]
pub struct RecordingCue {
    playing: AtomicBool,
    pub starts: AtomicUsize,
}

impl AudioCue for RecordingCue {
    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.playing.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

// ============================================================================
// SIGNALING SERVER
// ============================================================================

pub struct SignalingServer {
    pub url: String,
    /// Index der Verbindung, deren Offer angekommen ist
    pub offers: mpsc::UnboundedReceiver<usize>,
}

/// WebSocket-Server, der auf die ersten `silent` Verbindungen nie antwortet
pub async fn signaling_server(silent: usize) -> SignalingServer {
    serve_signaling(silent, None).await
}

/// Wie [`signaling_server`], schickt nach der Answer noch einen Kandidaten
pub async fn trickling_signaling_server(candidate: IceCandidate) -> SignalingServer {
    serve_signaling(0, Some(candidate)).await
}

async fn serve_signaling(silent: usize, trailing: Option<IceCandidate>) -> SignalingServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (offer_tx, offers) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut index = 0;
        while let Ok((stream, _)) = listener.accept().await {
            let connection = index;
            index += 1;
            let offer_tx = offer_tx.clone();
            let trailing = trailing.clone();

            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    let Message::Text(text) = message else {
                        continue;
                    };
                    if let Ok(SignalingMessage::Offer { .. }) = SignalingMessage::decode(&text) {
                        let _ = offer_tx.send(connection);
                        if connection >= silent {
                            let answer = SignalingMessage::Answer {
                                sdp: "v=0\r\no=- 2 2 IN IP4 127.0.0.1\r\n".to_string(),
                            };
                            let _ = ws.send(Message::Text(answer.encode())).await;
                            if let Some(candidate) = trailing.clone() {
                                let candidate = SignalingMessage::IceCandidate(candidate);
                                let _ = ws.send(Message::Text(candidate.encode())).await;
                            }
                        }
                    }
                }
            });
        }
    });

    SignalingServer {
        url: format!("ws://{}", addr),
        offers,
    }
}

// ============================================================================
// HARNESS
// ============================================================================

pub struct Harness {
    pub orchestrator: CallOrchestrator,
    pub renderer: Arc<ScriptedRenderer>,
    pub peer: Arc<PeerLog>,
    pub cue: Arc<RecordingCue>,
    pub events: mpsc::UnboundedReceiver<CallEvent>,
    pub cache: tempfile::TempDir,
}

impl Harness {
    pub fn start(mut config: CallConfig) -> Self {
        let cache = tempfile::tempdir().unwrap();
        config.cache_dir = Some(cache.path().to_path_buf());

        let renderer = Arc::new(ScriptedRenderer::default());
        let peer = Arc::new(PeerLog::default());
        let cue = Arc::new(RecordingCue::default());

        let orchestrator = CallOrchestrator::spawn(
            config,
            CallCollaborators {
                renderer: renderer.clone(),
                cue: cue.clone(),
                peer: Arc::new(ScriptedPeer {
                    log: Arc::clone(&peer),
                }),
                http: reqwest::Client::new(),
            },
        );
        let events = orchestrator.subscribe();

        Self {
            orchestrator,
            renderer,
            peer,
            cue,
            events,
            cache,
        }
    }

    /// Sammelt Events bis einschließlich dem ersten, auf das `stop` passt
    pub async fn collect_until(&mut self, stop: impl Fn(&CallEvent) -> bool) -> Vec<CallEvent> {
        let events = &mut self.events;
        tokio::time::timeout(Duration::from_secs(10), async move {
            let mut seen = Vec::new();
            loop {
                let event = events.recv().await.expect("event stream closed");
                let done = stop(&event);
                seen.push(event);
                if done {
                    return seen;
                }
            }
        })
        .await
        .expect("timed out waiting for call events")
    }

    /// Sammelt bis `session_id` wieder `Idle` ist
    pub async fn collect_until_idle(&mut self, session_id: SessionId) -> Vec<CallEvent> {
        self.collect_until(|event| is_state(event, session_id, CallState::Idle))
            .await
    }

    /// Dateien im Cache-Verzeichnis
    pub fn cached_files(&self) -> Vec<std::path::PathBuf> {
        std::fs::read_dir(self.cache.path())
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    }

    /// Wartet bis `check` erfüllt ist, höchstens fünf Sekunden
    pub async fn wait_for(&self, check: impl Fn(&Self) -> bool) -> bool {
        for _ in 0..100 {
            if check(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        check(self)
    }
}

pub fn config(mode: DialMode, http_base: &str, signaling_url: &str) -> CallConfig {
    CallConfig {
        mode,
        signaling_url: signaling_url.to_string(),
        session_url: format!("{}/startE2ESession", http_base),
        audio_stream_url: format!("{}/audioToVideoStream", http_base),
        ice_servers: Vec::new(),
        bootstrap_timeout_ms: 2_000,
        connect_timeout_ms: 2_000,
        negotiation_timeout_ms: 5_000,
        playable_timeout_ms: 1_000,
        download_timeout_ms: 5_000,
        teardown_timeout_ms: 1_000,
        ..CallConfig::default()
    }
}

pub fn params(name: &str) -> CallParameters {
    CallParameters {
        display_name: name.to_string(),
        face_id: format!("face-{}", name.to_lowercase()),
        voice_id: "voice".to_string(),
        first_message: "Hi!".to_string(),
        system_prompt: "Be kind".to_string(),
        api_key: "test-key".to_string(),
    }
}

pub fn is_state(event: &CallEvent, session_id: SessionId, state: CallState) -> bool {
    matches!(
        event,
        CallEvent::StateChanged { session_id: id, state: s } if *id == session_id && *s == state
    )
}

/// Zustandsfolge einer Session
pub fn states_of(events: &[CallEvent], session_id: SessionId) -> Vec<CallState> {
    events
        .iter()
        .filter_map(|event| match event {
            CallEvent::StateChanged {
                session_id: id,
                state,
            } if *id == session_id => Some(*state),
            _ => None,
        })
        .collect()
}
