//! Call Orchestrator
//!
//! Ein Actor besitzt die laufende Session. Alle Zustandsänderungen laufen
//! über seine Command-Queue. Netzwerk und Wiedergabe erledigt ein
//! Session-Task, der nur Schritte an den Actor zurückmeldet.
//!
//! Abbau-Reihenfolge einer Session:
//! 1. Session-Futures abbrechen, Signaling-Kanal schließen
//! 2. Peer Connection freigeben
//! 3. Media Pipeline stoppen
//! 4. Audio Cue stoppen

use super::error::CallError;
use super::events::{CallEvent, EventBus};
use super::peer::{PeerConnector, PeerEvent, PeerSession, WebRtcConnector};
use super::session::{CallParameters, CallSession, CallState, SessionId};
use crate::bootstrap::SessionBootstrapper;
use crate::config::{CallConfig, DialMode};
use crate::media::{
    AssetDownloader, AudioCue, HeadlessRenderer, MediaEvent, MediaPipelineController, MediaPlan,
    MediaReference, MediaRenderer, PipelineConfig, PlaybackError, PlaybackHandle,
};
#[cfg(feature = "native-audio")]
use crate::media::RingbackTone;
#[cfg(not(feature = "native-audio"))]
use crate::media::SilentCue;
use crate::signaling::{SignalingChannel, SignalingError, SignalingEvent};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type Outcome = oneshot::Sender<Result<MediaReference, CallError>>;

/// Peer Connection einer Session. Der Actor schließt sie, falls der Task abgebrochen wird.
type PeerSlot = Arc<Mutex<Option<Arc<dyn PeerSession>>>>;

// ============================================================================
// COLLABORATORS
// ============================================================================

/// Externe Abhängigkeiten des Orchestrators
pub struct CallCollaborators {
    pub renderer: Arc<dyn MediaRenderer>,
    pub cue: Arc<dyn AudioCue>,
    pub peer: Arc<dyn PeerConnector>,
    pub http: reqwest::Client,
}

impl CallCollaborators {
    /// Ohne Anzeige, mit echter WebRTC-Verbindung und [`Self::default_cue`]
    pub fn headless(config: &CallConfig) -> Self {
        let http = reqwest::Client::new();
        Self {
            renderer: Arc::new(HeadlessRenderer::new(http.clone(), config.playable_timeout())),
            cue: Self::default_cue(),
            peer: Arc::new(WebRtcConnector::new(config.ice_servers.clone())),
            http,
        }
    }

    /// Freiton über cpal mit `native-audio`, sonst still
    pub fn default_cue() -> Arc<dyn AudioCue> {
        #[cfg(feature = "native-audio")]
        {
            Arc::new(RingbackTone::new())
        }
        #[cfg(not(feature = "native-audio"))]
        {
            Arc::new(SilentCue::new())
        }
    }
}

// ============================================================================
// DIAL HANDLE
// ============================================================================

/// Ergebnis eines `dial()`
#[derive(Debug)]
pub struct DialHandle {
    session_id: SessionId,
    outcome: oneshot::Receiver<Result<MediaReference, CallError>>,
}

impl DialHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Wartet bis Medien laufen.
    ///
    /// Wird die Session vorher beendet oder ersetzt, kommt
    /// [`CallError::Cancelled`] zurück.
    pub async fn established(self) -> Result<MediaReference, CallError> {
        self.outcome.await.unwrap_or(Err(CallError::Cancelled))
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

enum Command {
    Dial {
        session_id: SessionId,
        params: CallParameters,
        outcome: Outcome,
    },
    EndCall {
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Rückmeldungen des Session-Tasks
#[derive(Debug)]
enum Step {
    MediaResolved(MediaReference),
    Presented(PlaybackHandle),
    Failed(CallError),
    Peer(PeerEvent),
}

struct Snapshot {
    state: CallState,
    session: Option<CallSession>,
}

impl Snapshot {
    fn idle() -> Self {
        Self {
            state: CallState::Idle,
            session: None,
        }
    }
}

// ============================================================================
// CALL ORCHESTRATOR
// ============================================================================

/// Handle auf den Orchestrator-Actor
pub struct CallOrchestrator {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: Arc<RwLock<Snapshot>>,
    events: EventBus,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl CallOrchestrator {
    /// Startet den Actor. Muss innerhalb einer Tokio-Runtime laufen.
    pub fn spawn(config: CallConfig, collaborators: CallCollaborators) -> Self {
        let events = EventBus::default();
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (steps_tx, steps_rx) = mpsc::unbounded_channel();
        let snapshot = Arc::new(RwLock::new(Snapshot::idle()));
        let config = Arc::new(config);

        let CallCollaborators {
            renderer,
            cue,
            peer,
            http,
        } = collaborators;

        let downloader = AssetDownloader::new(
            http.clone(),
            config.resolved_cache_dir(),
            config.download_timeout(),
        );
        let pipeline = Arc::new(MediaPipelineController::new(
            renderer,
            downloader,
            Arc::clone(&cue),
            PipelineConfig {
                playable_timeout: config.playable_timeout(),
                derive_asset_from_stream: config.derive_asset_from_stream,
                prefetch_fallback: config.prefetch_fallback,
            },
        ));
        let bootstrapper =
            SessionBootstrapper::new(http, config.session_url.clone(), config.audio_stream_url.clone())
                .with_format(config.audio_format.clone());

        let actor = Actor {
            media_rx: pipeline.subscribe(),
            config,
            bootstrapper,
            pipeline,
            cue,
            peer,
            snapshot: Arc::clone(&snapshot),
            events: events.clone(),
            steps_tx,
            steps_rx,
            live: None,
        };
        let actor = tokio::spawn(actor.run(commands_rx));

        Self {
            commands,
            snapshot,
            events,
            actor: Mutex::new(Some(actor)),
        }
    }

    /// Startet einen Anruf. Ein laufender Anruf wird vorher beendet.
    pub fn dial(&self, params: CallParameters) -> Result<DialHandle, CallError> {
        let session_id = SessionId::new();
        let (outcome, outcome_rx) = oneshot::channel();

        self.commands
            .send(Command::Dial {
                session_id,
                params,
                outcome,
            })
            .map_err(|_| CallError::OrchestratorClosed)?;

        Ok(DialHandle {
            session_id,
            outcome: outcome_rx,
        })
    }

    /// Beendet den aktuellen Anruf und wartet bis alles freigegeben ist
    pub async fn end_call(&self) -> Result<(), CallError> {
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::EndCall { reply })
            .map_err(|_| CallError::OrchestratorClosed)?;
        reply_rx.await.map_err(|_| CallError::OrchestratorClosed)?
    }

    /// Gibt den aktuellen Call-Status zurück
    pub fn state(&self) -> CallState {
        self.snapshot.read().state
    }

    /// Kopie der laufenden Session
    pub fn session(&self) -> Option<CallSession> {
        self.snapshot.read().session.clone()
    }

    /// Neuer Event-Receiver. Sieht alle Events ab jetzt, in Reihenfolge.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CallEvent> {
        self.events.subscribe()
    }

    /// Beendet einen laufenden Anruf und stoppt den Actor
    pub async fn shutdown(&self) {
        let (reply, reply_rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).is_ok() {
            let _ = reply_rx.await;
        }
        let actor = self.actor.lock().take();
        if let Some(actor) = actor {
            let _ = actor.await;
        }
    }
}

impl std::fmt::Debug for CallOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot.read();
        f.debug_struct("CallOrchestrator")
            .field("state", &snapshot.state)
            .field("session", &snapshot.session.as_ref().map(|s| s.id))
            .finish()
    }
}

// ============================================================================
// ACTOR
// ============================================================================

struct LiveSession {
    session: CallSession,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
    peer: PeerSlot,
    outcome: Option<Outcome>,
    /// Pipeline-Generation der übernommenen Wiedergabe
    generation: Option<u64>,
    /// Ende der Wiedergabe, bevor `Presented` ankam
    early_end: Option<MediaEvent>,
}

struct Actor {
    config: Arc<CallConfig>,
    bootstrapper: SessionBootstrapper,
    pipeline: Arc<MediaPipelineController>,
    cue: Arc<dyn AudioCue>,
    peer: Arc<dyn PeerConnector>,
    snapshot: Arc<RwLock<Snapshot>>,
    events: EventBus,
    steps_tx: mpsc::UnboundedSender<(SessionId, Step)>,
    steps_rx: mpsc::UnboundedReceiver<(SessionId, Step)>,
    media_rx: broadcast::Receiver<MediaEvent>,
    live: Option<LiveSession>,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::info!("Call orchestrator started ({:?} mode)", self.config.mode);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Dial { session_id, params, outcome }) => {
                        self.dial(session_id, params, outcome).await;
                    }
                    Some(Command::EndCall { reply }) => {
                        let result = if self.live.is_some() {
                            self.finish(CallState::Ending, None).await;
                            Ok(())
                        } else {
                            Err(CallError::NoActiveCall)
                        };
                        let _ = reply.send(result);
                    }
                    Some(Command::Shutdown { reply }) => {
                        self.finish(CallState::Ending, None).await;
                        let _ = reply.send(());
                        break;
                    }
                    // Alle Handles verworfen
                    None => {
                        self.finish(CallState::Ending, None).await;
                        break;
                    }
                },
                Some((session_id, step)) = self.steps_rx.recv() => {
                    self.on_step(session_id, step).await;
                }
                event = self.media_rx.recv() => match event {
                    Ok(event) => self.on_media_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Missed {} media event(s)", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        tracing::info!("Call orchestrator stopped");
    }

    async fn dial(&mut self, session_id: SessionId, params: CallParameters, outcome: Outcome) {
        if let Some(previous) = &self.live {
            tracing::info!(
                session_id = %previous.session.id,
                "New dial supersedes the current session"
            );
            self.finish(CallState::Ending, None).await;
        }

        let params = Arc::new(params);
        let token = CancellationToken::new();
        let peer_slot = PeerSlot::default();
        let mut live = LiveSession {
            session: CallSession::new(session_id, Arc::clone(&params)),
            token: token.clone(),
            task: None,
            peer: Arc::clone(&peer_slot),
            outcome: Some(outcome),
            generation: None,
            early_end: None,
        };

        tracing::info!(%session_id, "Dialing {}", params.display_name);
        self.transition(&mut live, CallState::Dialing);
        self.cue.start();

        let task = SessionTask {
            session_id,
            params,
            config: Arc::clone(&self.config),
            bootstrapper: self.bootstrapper.clone(),
            pipeline: Arc::clone(&self.pipeline),
            peer: Arc::clone(&self.peer),
            peer_slot,
            steps: self.steps_tx.clone(),
        };
        live.task = Some(tokio::spawn(task.run(token)));
        self.live = Some(live);
    }

    async fn on_step(&mut self, session_id: SessionId, step: Step) {
        let mut live = match self.live.take() {
            Some(live) if live.session.id == session_id => live,
            other => {
                self.live = other;
                tracing::debug!(%session_id, "Ignoring {:?} of a finished session", step);
                return;
            }
        };

        match step {
            Step::MediaResolved(reference) => {
                tracing::info!(%session_id, "Media resolved: {}", reference);
                live.session.media = Some(reference);
                self.transition(&mut live, CallState::AwaitingMedia);
                self.live = Some(live);
            }
            Step::Presented(handle) => {
                let reference = handle.reference.clone();
                live.generation = Some(handle.generation);
                live.session.media = Some(reference.clone());
                live.session.connected_at = Some(Utc::now());
                self.transition(&mut live, CallState::Active);
                self.emit(CallEvent::MediaReady {
                    session_id,
                    reference: reference.clone(),
                });
                if let Some(outcome) = live.outcome.take() {
                    let _ = outcome.send(Ok(reference));
                }

                let early_end = live
                    .early_end
                    .take()
                    .filter(|event| event.generation() == handle.generation);
                self.live = Some(live);
                if let Some(event) = early_end {
                    self.on_media_event(event).await;
                }
            }
            Step::Failed(error) => {
                self.live = Some(live);
                self.finish(CallState::Failed, Some(error)).await;
            }
            Step::Peer(event) => {
                self.emit_peer(session_id, event);
                self.live = Some(live);
            }
        }
    }

    async fn on_media_event(&mut self, event: MediaEvent) {
        let Some(live) = self.live.as_mut() else {
            return;
        };
        let session_id = live.session.id;

        if live.generation != Some(event.generation()) {
            if live.generation.is_none()
                && matches!(event, MediaEvent::Stopped { .. } | MediaEvent::Errored { .. })
            {
                live.early_end = Some(event);
            }
            return;
        }

        match event {
            MediaEvent::Ready { .. } => {}
            MediaEvent::Stalled { .. } => self.emit(CallEvent::MediaStalled { session_id }),
            MediaEvent::Stopped { .. } => {
                tracing::info!(%session_id, "Media stopped");
                self.finish(CallState::Ending, None).await;
            }
            MediaEvent::Errored { detail, .. } => {
                let error = CallError::Playback(PlaybackError::Unplayable(detail));
                self.finish(CallState::Failed, Some(error)).await;
            }
        }
    }

    /// Baut die laufende Session ab und kehrt nach `Idle` zurück
    async fn finish(&mut self, terminal: CallState, error: Option<CallError>) {
        let Some(mut live) = self.live.take() else {
            return;
        };
        let session_id = live.session.id;

        self.transition(&mut live, terminal);
        if let Some(error) = &error {
            tracing::error!(%session_id, "Call failed: {}", error);
            self.emit(CallEvent::Error {
                session_id,
                kind: error.kind(),
                detail: error.to_string(),
            });
        }

        // 1. + 2. Der Task schließt Signaling-Kanal und Peer selbst
        live.token.cancel();
        if let Some(mut task) = live.task.take() {
            let timeout = self.config.teardown_timeout();
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                tracing::warn!(%session_id, "Session task did not stop within {:?}", timeout);
                task.abort();
                // Der abgebrochene Task kommt nicht mehr zu `release`
                let peer = live.peer.lock().take();
                if let Some(peer) = peer {
                    if tokio::time::timeout(timeout, peer.close()).await.is_err() {
                        tracing::warn!(%session_id, "Peer connection did not close within {:?}", timeout);
                    }
                }
            }
        }
        // Track-Änderungen vom Schließen noch zustellen
        while let Ok((id, step)) = self.steps_rx.try_recv() {
            match step {
                Step::Peer(event) if id == session_id => self.emit_peer(session_id, event),
                _ => {}
            }
        }

        // 3.
        self.pipeline.stop();
        // 4.
        self.cue.stop();

        live.session.ended_at = Some(Utc::now());
        if terminal == CallState::Ending {
            self.emit(CallEvent::Stopped { session_id });
        }
        if let Some(outcome) = live.outcome.take() {
            let _ = outcome.send(Err(error.unwrap_or(CallError::Cancelled)));
        }

        self.transition(&mut live, CallState::Idle);
        *self.snapshot.write() = Snapshot::idle();
        tracing::info!(
            %session_id,
            "Call finished after {:?}",
            live.session.duration().map(|d| d.num_seconds())
        );
    }

    /// Aktualisiert den State und sendet Event
    fn transition(&self, live: &mut LiveSession, next: CallState) {
        let current = live.session.state;
        if !current.can_transition_to(next) {
            tracing::warn!(
                session_id = %live.session.id,
                "Rejected transition {} -> {}",
                current,
                next
            );
            return;
        }

        live.session.state = next;
        tracing::debug!(session_id = %live.session.id, "{} -> {}", current, next);
        {
            let mut snapshot = self.snapshot.write();
            snapshot.state = next;
            snapshot.session = Some(live.session.clone());
        }
        self.emit(CallEvent::StateChanged {
            session_id: live.session.id,
            state: next,
        });
    }

    fn emit_peer(&self, session_id: SessionId, event: PeerEvent) {
        let event = match event {
            PeerEvent::TrackAdded { id, kind } => CallEvent::RemoteTrackAdded {
                session_id,
                track_id: id,
                kind,
            },
            PeerEvent::TrackRemoved { id } => CallEvent::RemoteTrackRemoved {
                session_id,
                track_id: id,
            },
        };
        self.emit(event);
    }

    fn emit(&self, event: CallEvent) {
        self.events.emit(event);
    }
}

// ============================================================================
// SESSION TASK
// ============================================================================

/// Ressourcen, die bis zum Abbau gehalten werden
#[derive(Default)]
struct Leases {
    channel: Option<SignalingChannel>,
    signaling_events: Option<broadcast::Receiver<SignalingEvent>>,
    peer_events: Option<mpsc::UnboundedReceiver<PeerEvent>>,
}

struct SessionTask {
    session_id: SessionId,
    params: Arc<CallParameters>,
    config: Arc<CallConfig>,
    bootstrapper: SessionBootstrapper,
    pipeline: Arc<MediaPipelineController>,
    peer: Arc<dyn PeerConnector>,
    peer_slot: PeerSlot,
    steps: mpsc::UnboundedSender<(SessionId, Step)>,
}

impl SessionTask {
    async fn run(self, token: CancellationToken) {
        let mut leases = Leases::default();

        let outcome = tokio::select! {
            _ = token.cancelled() => Err(CallError::Cancelled),
            result = self.establish(&mut leases, &token) => result,
        };

        match outcome {
            Ok(()) => self.hold(&mut leases, &token).await,
            Err(e) if e.is_cancellation() || token.is_cancelled() => {
                tracing::debug!(session_id = %self.session_id, "Session cancelled");
            }
            Err(e) => self.post(Step::Failed(e)),
        }

        self.release(leases).await;
    }

    async fn establish(
        &self,
        leases: &mut Leases,
        token: &CancellationToken,
    ) -> Result<(), CallError> {
        let plan = match self.config.mode {
            DialMode::Bootstrap => {
                self.bootstrapper
                    .start_session(&self.params, self.config.bootstrap_timeout())
                    .await?
            }
            DialMode::Signaling => self.negotiate(leases, token).await?,
        };

        self.post(Step::MediaResolved(plan.primary.clone()));
        let handle = self.pipeline.present(plan).await?;
        self.post(Step::Presented(handle));
        Ok(())
    }

    /// Offer → Answer über den Signaling-Kanal, danach den Audio-Stream starten
    async fn negotiate(
        &self,
        leases: &mut Leases,
        token: &CancellationToken,
    ) -> Result<MediaPlan, CallError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        leases.peer_events = Some(events_rx);
        let peer: Arc<dyn PeerSession> = Arc::from(self.peer.connect(events_tx).await?);
        *self.peer_slot.lock() = Some(Arc::clone(&peer));
        let offer = peer.create_offer().await?;

        let channel = SignalingChannel::open_with(
            &self.config.signaling_url,
            self.config.connect_timeout(),
            token,
        )
        .await?;
        // Kandidaten können direkt nach der Answer eintreffen
        leases.signaling_events = Some(channel.subscribe());
        let channel = leases.channel.insert(channel);

        let timeout = self.config.negotiation_timeout();
        let answer = tokio::time::timeout(timeout, channel.negotiate(offer))
            .await
            .map_err(|_| SignalingError::Timeout(timeout))??;
        peer.apply_answer(answer).await?;

        tracing::info!(session_id = %self.session_id, "Peer session negotiated");
        let plan = self
            .bootstrapper
            .start_audio_stream(&self.params, &[], self.config.bootstrap_timeout())
            .await?;
        Ok(plan)
    }

    /// Hält die Ressourcen bis zum Abbau und reicht Peer-Events weiter
    async fn hold(&self, leases: &mut Leases, token: &CancellationToken) {
        let peer = self.peer_slot.lock().clone();
        let mut signaling = leases.signaling_events.take();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = next_peer_event(&mut leases.peer_events) => {
                    self.post(Step::Peer(event));
                }
                event = next_signaling_event(&mut signaling) => match event {
                    SignalingEvent::RemoteCandidate(candidate) => {
                        if let Some(peer) = &peer {
                            if let Err(e) = peer.add_ice_candidate(&candidate).await {
                                tracing::warn!("Failed to add remote candidate: {}", e);
                            }
                        }
                    }
                    SignalingEvent::Disconnected => {
                        tracing::debug!(session_id = %self.session_id, "Signaling channel disconnected");
                        signaling = None;
                    }
                },
            }
        }
    }

    async fn release(&self, mut leases: Leases) {
        if let Some(channel) = leases.channel.take() {
            channel.close();
        }
        let peer = self.peer_slot.lock().take();
        if let Some(peer) = peer {
            peer.close().await;
        }
        // Track-Änderungen vom Schließen weiterreichen
        if let Some(mut events) = leases.peer_events.take() {
            while let Ok(event) = events.try_recv() {
                self.post(Step::Peer(event));
            }
        }
    }

    fn post(&self, step: Step) {
        let _ = self.steps.send((self.session_id, step));
    }
}

async fn next_peer_event(rx: &mut Option<mpsc::UnboundedReceiver<PeerEvent>>) -> PeerEvent {
    if let Some(inner) = rx.as_mut() {
        if let Some(event) = inner.recv().await {
            return event;
        }
        *rx = None;
    }
    std::future::pending().await
}

async fn next_signaling_event(
    rx: &mut Option<broadcast::Receiver<SignalingEvent>>,
) -> SignalingEvent {
    while let Some(inner) = rx.as_mut() {
        match inner.recv().await {
            Ok(event) => return event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => *rx = None,
        }
    }
    std::future::pending().await
}
