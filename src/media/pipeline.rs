//! Media Pipeline - bringt eine Medien-Referenz auf den Bildschirm
//!
//! Fallback-Reihenfolge (erster Erfolg gewinnt):
//! 1. `StreamUrl` direkt streamen, begrenzt durch `playable_timeout`
//! 2. `DownloadableAsset` (mitgeliefert oder abgeleitet) herunterladen
//!    und von der Platte abspielen
//!
//! Jeder Versuch läuft genau einmal. Ob nach einem Fehlschlag erneut
//! gewählt wird, entscheidet der Aufrufer.

use super::cue::AudioCue;
use super::download::AssetDownloader;
use super::reference::{MediaPlan, MediaReference, PlaybackHandle, PlaybackSource};
use super::renderer::{ItemId, MediaRenderer, PreparedItem, RenderError, RendererSignal};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("Media not playable: {0}")]
    Unplayable(String),

    #[error("Asset download failed: {0}")]
    DownloadFailed(String),

    #[error("Playback cancelled")]
    Cancelled,
}

impl From<RenderError> for PlaybackError {
    fn from(e: RenderError) -> Self {
        PlaybackError::Unplayable(e.to_string())
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Fortschritts-Events der Pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    Ready {
        generation: u64,
        reference: MediaReference,
    },
    Stalled {
        generation: u64,
    },
    Stopped {
        generation: u64,
    },
    Errored {
        generation: u64,
        detail: String,
    },
}

impl MediaEvent {
    pub fn generation(&self) -> u64 {
        match self {
            MediaEvent::Ready { generation, .. }
            | MediaEvent::Stalled { generation }
            | MediaEvent::Stopped { generation }
            | MediaEvent::Errored { generation, .. } => *generation,
        }
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Wie lange ein Versuch bis "abspielbar" brauchen darf
    pub playable_timeout: Duration,
    /// `.m3u8` → `.mp4` ableiten, wenn kein Asset mitgeliefert wurde
    pub derive_asset_from_stream: bool,
    /// Asset schon während des Stream-Versuchs laden
    pub prefetch_fallback: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            playable_timeout: Duration::from_secs(8),
            derive_asset_from_stream: false,
            prefetch_fallback: true,
        }
    }
}

// ============================================================================
// INTERNAL STATE
// ============================================================================

/// Aktuell sichtbarer Inhalt
struct Presentation {
    handle: PlaybackHandle,
    item: ItemId,
    watcher: CancellationToken,
    downloaded: Option<PathBuf>,
}

/// Ressource eines noch nicht übernommenen Versuchs
enum Staged {
    Item(ItemId),
    File(PathBuf),
}

#[derive(Default)]
struct PipelineState {
    generation: u64,
    attempt: Option<CancellationToken>,
    current: Option<Presentation>,
    staged: Vec<(u64, Staged)>,
}

/// Erfolgreich vorbereitete Quelle, noch nicht sichtbar
struct Candidate {
    prepared: PreparedItem,
    reference: MediaReference,
    source: PlaybackSource,
    downloaded: Option<PathBuf>,
}

// ============================================================================
// MEDIA PIPELINE CONTROLLER
// ============================================================================

pub struct MediaPipelineController {
    renderer: Arc<dyn MediaRenderer>,
    downloader: AssetDownloader,
    cue: Arc<dyn AudioCue>,
    config: PipelineConfig,
    state: Arc<Mutex<PipelineState>>,
    event_tx: broadcast::Sender<MediaEvent>,
}

impl MediaPipelineController {
    pub fn new(
        renderer: Arc<dyn MediaRenderer>,
        downloader: AssetDownloader,
        cue: Arc<dyn AudioCue>,
        config: PipelineConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            renderer,
            downloader,
            cue,
            config,
            state: Arc::new(Mutex::new(PipelineState::default())),
            event_tx,
        }
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.event_tx.subscribe()
    }

    /// Handle des aktuell sichtbaren Inhalts
    pub fn current(&self) -> Option<PlaybackHandle> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|presentation| presentation.handle.clone())
    }

    /// Bringt `plan` auf den Bildschirm und ersetzt den bisherigen Inhalt.
    ///
    /// Ein laufender `present()` wird dabei abgebrochen.
    pub async fn present(&self, plan: impl Into<MediaPlan>) -> Result<PlaybackHandle, PlaybackError> {
        let plan = plan.into();
        let (generation, token) = {
            let mut state = self.state.lock();
            if let Some(previous) = state.attempt.take() {
                previous.cancel();
            }
            state.generation += 1;
            let token = CancellationToken::new();
            state.attempt = Some(token.clone());
            (state.generation, token)
        };

        let attempts = plan.attempts(self.config.derive_asset_from_stream);
        tracing::info!(
            generation,
            "Presenting {} ({} attempt(s))",
            plan.primary,
            attempts.len()
        );

        let outcome = tokio::select! {
            _ = token.cancelled() => Err(PlaybackError::Cancelled),
            result = self.run_attempts(&attempts, generation, &token) => result,
        };

        match outcome {
            Ok(candidate) => self.commit(generation, &token, candidate),
            Err(e) => {
                self.discard_staged(generation);
                let mut state = self.state.lock();
                if state.generation == generation {
                    state.attempt = None;
                }
                Err(e)
            }
        }
    }

    /// Stoppt die Wiedergabe und gibt alles frei. Mehrfach aufrufbar.
    pub fn stop(&self) {
        let (current, staged) = {
            let mut state = self.state.lock();
            if let Some(attempt) = state.attempt.take() {
                attempt.cancel();
            }
            let current = state.current.take();
            let staged: Vec<Staged> = state.staged.drain(..).map(|(_, s)| s).collect();

            if let Some(ref presentation) = current {
                let _ = self.event_tx.send(MediaEvent::Stopped {
                    generation: presentation.handle.generation,
                });
            }
            (current, staged)
        };

        if let Some(presentation) = current {
            tracing::info!(
                generation = presentation.handle.generation,
                "Stopping playback of {}",
                presentation.handle.reference
            );
            Self::release_presentation(self.renderer.as_ref(), presentation);
        }
        for resource in staged {
            self.release_staged(resource);
        }
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    /// Probiert die Referenzen der Reihe nach
    async fn run_attempts(
        &self,
        attempts: &[MediaReference],
        generation: u64,
        token: &CancellationToken,
    ) -> Result<Candidate, PlaybackError> {
        let mut last_error = None;
        let mut prefetch: Option<(CancellationToken, JoinHandle<Result<PathBuf, PlaybackError>>)> =
            None;

        for (index, reference) in attempts.iter().enumerate() {
            let attempt = match reference {
                MediaReference::StreamUrl(url) => {
                    if self.config.prefetch_fallback {
                        if let Some(MediaReference::DownloadableAsset(asset)) = attempts.get(index + 1) {
                            tracing::debug!(generation, "Prefetching fallback asset {}", asset);
                            prefetch = Some(self.spawn_download(asset.clone(), generation, token));
                        }
                    }
                    self.prepare(generation, token, PlaybackSource::Stream(url.clone()))
                        .await
                        .map(|prepared| (prepared, PlaybackSource::Stream(url.clone()), None))
                }
                MediaReference::DownloadableAsset(url) => {
                    let (_, download) = match prefetch.take() {
                        Some(prefetched) => prefetched,
                        None => self.spawn_download(url.clone(), generation, token),
                    };
                    let downloaded = download
                        .await
                        .unwrap_or_else(|e| Err(PlaybackError::DownloadFailed(e.to_string())));
                    match downloaded {
                        Ok(path) => {
                            let source = PlaybackSource::File(path.clone());
                            self.prepare(generation, token, source.clone())
                                .await
                                .map(|prepared| (prepared, source, Some(path)))
                        }
                        Err(e) => Err(e),
                    }
                }
                MediaReference::ExternalRoom(url) => {
                    let source = PlaybackSource::Room(url.clone());
                    self.prepare(generation, token, source.clone())
                        .await
                        .map(|prepared| (prepared, source, None))
                }
            };

            match attempt {
                Ok((prepared, source, downloaded)) => {
                    if let Some((prefetch_token, download)) = prefetch.take() {
                        prefetch_token.cancel();
                        if let Ok(Ok(unused)) = download.await {
                            self.unstage_file(&unused);
                            let _ = tokio::fs::remove_file(unused).await;
                        }
                    }
                    return Ok(Candidate {
                        prepared,
                        reference: reference.clone(),
                        source,
                        downloaded,
                    });
                }
                Err(PlaybackError::Cancelled) => return Err(PlaybackError::Cancelled),
                Err(e) => {
                    tracing::warn!(generation, "Attempt {} failed: {}", reference, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| PlaybackError::Unplayable("no playable source".to_string())))
    }

    /// Lädt ein Asset in einem eigenen Task.
    ///
    /// Die fertige Datei wird unter dem State-Lock für `generation` vorgemerkt.
    /// Ist der Versuch bis dahin abgebrochen, löscht der Task sie selbst.
    /// So bleibt keine Datei liegen, auch wenn niemand mehr auf den Task wartet.
    fn spawn_download(
        &self,
        url: String,
        generation: u64,
        token: &CancellationToken,
    ) -> (CancellationToken, JoinHandle<Result<PathBuf, PlaybackError>>) {
        let download_token = token.child_token();
        let cancel = download_token.clone();
        let downloader = self.downloader.clone();
        let state = Arc::clone(&self.state);

        let handle = tokio::spawn(async move {
            let path = downloader.download(&url, &cancel).await?;
            {
                let mut state = state.lock();
                if !cancel.is_cancelled() {
                    state.staged.push((generation, Staged::File(path.clone())));
                    return Ok(path);
                }
            }
            tracing::debug!(generation, "Discarding asset of a cancelled attempt: {}", path.display());
            let _ = tokio::fs::remove_file(&path).await;
            Err(PlaybackError::Cancelled)
        });
        (download_token, handle)
    }

    /// Ein einzelner, zeitlich begrenzter Versuch beim Renderer
    async fn prepare(
        &self,
        generation: u64,
        token: &CancellationToken,
        source: PlaybackSource,
    ) -> Result<PreparedItem, PlaybackError> {
        let timeout = self.config.playable_timeout;
        let prepared = match tokio::time::timeout(timeout, self.renderer.prepare(&source)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(PlaybackError::Unplayable(format!(
                    "not playable within {:?}",
                    timeout
                )))
            }
        };

        if token.is_cancelled() {
            self.renderer.release(prepared.id);
            return Err(PlaybackError::Cancelled);
        }
        self.stage(generation, Staged::Item(prepared.id));
        Ok(prepared)
    }

    fn stage(&self, generation: u64, resource: Staged) {
        self.state.lock().staged.push((generation, resource));
    }

    fn unstage_file(&self, path: &Path) {
        self.state
            .lock()
            .staged
            .retain(|(_, resource)| !matches!(resource, Staged::File(p) if p == path));
    }

    /// Tauscht den sichtbaren Inhalt atomar aus
    fn commit(
        &self,
        generation: u64,
        token: &CancellationToken,
        candidate: Candidate,
    ) -> Result<PlaybackHandle, PlaybackError> {
        let Candidate {
            prepared,
            reference,
            source,
            downloaded,
        } = candidate;

        let handle = PlaybackHandle {
            generation,
            reference: reference.clone(),
            source,
        };
        let watcher = CancellationToken::new();

        let previous = {
            let mut state = self.state.lock();
            if token.is_cancelled() || state.generation != generation {
                drop(state);
                self.discard_staged(generation);
                return Err(PlaybackError::Cancelled);
            }

            state.attempt = None;
            state.staged.retain(|(g, _)| *g != generation);

            // Platzhalter-Ton endet bevor das Bild erscheint
            self.cue.stop();
            self.renderer.show(prepared.id);

            let previous = state.current.replace(Presentation {
                handle: handle.clone(),
                item: prepared.id,
                watcher: watcher.clone(),
                downloaded,
            });
            let _ = self.event_tx.send(MediaEvent::Ready {
                generation,
                reference,
            });
            previous
        };

        if let Some(previous) = previous {
            tracing::debug!(
                "Replaced generation {} with {}",
                previous.handle.generation,
                generation
            );
            Self::release_presentation(self.renderer.as_ref(), previous);
        }

        self.spawn_watcher(generation, prepared.signals, watcher);
        tracing::info!(generation, "Playback ready: {}", handle.reference);
        Ok(handle)
    }

    /// Übersetzt Renderer-Signale in Pipeline-Events
    fn spawn_watcher(
        &self,
        generation: u64,
        mut signals: mpsc::UnboundedReceiver<RendererSignal>,
        watcher: CancellationToken,
    ) {
        let state = Arc::clone(&self.state);
        let renderer = Arc::clone(&self.renderer);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            loop {
                let signal = tokio::select! {
                    _ = watcher.cancelled() => break,
                    signal = signals.recv() => match signal {
                        Some(signal) => signal,
                        None => break,
                    },
                };

                match signal {
                    RendererSignal::Stalled => {
                        tracing::warn!(generation, "Playback stalled");
                        let _ = event_tx.send(MediaEvent::Stalled { generation });
                    }
                    RendererSignal::Ended | RendererSignal::Failed(_) => {
                        let finished = {
                            let mut state = state.lock();
                            let is_current = state
                                .current
                                .as_ref()
                                .is_some_and(|p| p.handle.generation == generation);
                            if !is_current {
                                None
                            } else {
                                let event = match &signal {
                                    RendererSignal::Failed(detail) => MediaEvent::Errored {
                                        generation,
                                        detail: detail.clone(),
                                    },
                                    _ => MediaEvent::Stopped { generation },
                                };
                                let _ = event_tx.send(event);
                                state.current.take()
                            }
                        };
                        if let Some(presentation) = finished {
                            tracing::info!(generation, "Playback finished: {:?}", signal);
                            Self::release_presentation(renderer.as_ref(), presentation);
                        }
                        break;
                    }
                }
            }
        });
    }

    fn release_presentation(renderer: &dyn MediaRenderer, presentation: Presentation) {
        presentation.watcher.cancel();
        renderer.release(presentation.item);
        if let Some(path) = presentation.downloaded {
            let _ = std::fs::remove_file(path);
        }
    }

    fn release_staged(&self, resource: Staged) {
        match resource {
            Staged::Item(id) => self.renderer.release(id),
            Staged::File(path) => {
                let _ = std::fs::remove_file(path);
            }
        }
    }

    /// Gibt alles frei, was ein nicht übernommener Versuch angelegt hat
    fn discard_staged(&self, generation: u64) {
        let staged: Vec<Staged> = {
            let mut state = self.state.lock();
            let (mine, rest): (Vec<_>, Vec<_>) = state
                .staged
                .drain(..)
                .partition(|(g, _)| *g == generation);
            state.staged = rest;
            mine.into_iter().map(|(_, s)| s).collect()
        };
        for resource in staged {
            self.release_staged(resource);
        }
    }
}

impl std::fmt::Debug for MediaPipelineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaPipelineController")
            .field("current", &self.current())
            .field("config", &self.config)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::cue::SilentCue;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Renderer, der nach URL-Inhalt entscheidet:
    /// "fail" → nicht abspielbar, "hang" → wartet ewig, sonst ok
    #[derive(Default)]
    struct ScriptedRenderer {
        next_id: AtomicU64,
        shown: Mutex<Vec<ItemId>>,
        released: Mutex<Vec<ItemId>>,
        prepared: Mutex<Vec<PlaybackSource>>,
        signal_senders: Mutex<Vec<(ItemId, mpsc::UnboundedSender<RendererSignal>)>>,
    }

    #[async_trait]
    impl MediaRenderer for ScriptedRenderer {
        async fn prepare(&self, source: &PlaybackSource) -> Result<PreparedItem, RenderError> {
            self.prepared.lock().push(source.clone());
            let label = match source {
                PlaybackSource::Stream(url) | PlaybackSource::Room(url) => url.clone(),
                PlaybackSource::File(path) => path.display().to_string(),
            };
            if label.contains("hang") {
                std::future::pending::<()>().await;
            }
            if label.contains("fail") {
                return Err(RenderError::Unplayable(label));
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let (tx, signals) = mpsc::unbounded_channel();
            self.signal_senders.lock().push((id, tx));
            Ok(PreparedItem { id, signals })
        }

        fn show(&self, id: ItemId) {
            self.shown.lock().push(id);
        }

        fn release(&self, id: ItemId) {
            self.released.lock().push(id);
        }
    }

    impl ScriptedRenderer {
        fn signal(&self, id: ItemId, signal: RendererSignal) {
            let senders = self.signal_senders.lock();
            let (_, tx) = senders.iter().find(|(i, _)| *i == id).unwrap();
            tx.send(signal).unwrap();
        }
    }

    struct Fixture {
        renderer: Arc<ScriptedRenderer>,
        cue: Arc<SilentCue>,
        pipeline: Arc<MediaPipelineController>,
        _dir: tempfile::TempDir,
    }

    fn fixture(config: PipelineConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Arc::new(ScriptedRenderer::default());
        let cue = Arc::new(SilentCue::new());
        let downloader = AssetDownloader::new(
            reqwest::Client::new(),
            dir.path().to_path_buf(),
            Duration::from_secs(5),
        );
        let pipeline = Arc::new(MediaPipelineController::new(
            renderer.clone(),
            downloader,
            cue.clone(),
            config,
        ));
        Fixture {
            renderer,
            cue,
            pipeline,
            _dir: dir,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<MediaEvent>) -> Vec<MediaEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn asset_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/asset/call.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp4".to_vec()))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_failing_stream_falls_back_to_asset_with_single_ready() {
        let server = asset_server().await;
        let f = fixture(PipelineConfig::default());
        let mut events = f.pipeline.subscribe();
        f.cue.start();

        let asset = MediaReference::DownloadableAsset(format!("{}/asset/call.mp4", server.uri()));
        let plan = MediaPlan::new(MediaReference::StreamUrl("https://cdn.test/fail.m3u8".into()))
            .with_fallback(asset.clone());

        let handle = f.pipeline.present(plan).await.unwrap();

        assert_eq!(handle.reference, asset);
        let PlaybackSource::File(ref local) = handle.source else {
            panic!("expected file playback, got {:?}", handle.source);
        };
        assert!(local.exists());
        assert!(!f.cue.is_playing());

        let events = drain(&mut events);
        assert_eq!(
            events,
            vec![MediaEvent::Ready {
                generation: handle.generation,
                reference: asset
            }]
        );
    }

    #[tokio::test]
    async fn test_hanging_stream_times_out_into_derived_asset() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hang/playlist.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp4".to_vec()))
            .mount(&server)
            .await;

        let f = fixture(PipelineConfig {
            playable_timeout: Duration::from_millis(200),
            derive_asset_from_stream: true,
            prefetch_fallback: true,
        });

        let stream = MediaReference::StreamUrl(format!("{}/hang/playlist.m3u8", server.uri()));
        let handle = f.pipeline.present(stream).await.unwrap();

        assert_eq!(
            handle.reference,
            MediaReference::DownloadableAsset(format!("{}/hang/playlist.mp4", server.uri()))
        );
    }

    #[tokio::test]
    async fn test_stream_success_discards_prefetched_asset() {
        let server = asset_server().await;
        let f = fixture(PipelineConfig::default());

        let plan = MediaPlan::new(MediaReference::StreamUrl("https://cdn.test/live.m3u8".into()))
            .with_fallback(MediaReference::DownloadableAsset(format!(
                "{}/asset/call.mp4",
                server.uri()
            )));

        let handle = f.pipeline.present(plan).await.unwrap();

        assert_eq!(
            handle.source,
            PlaybackSource::Stream("https://cdn.test/live.m3u8".into())
        );
        let leftovers: Vec<_> = std::fs::read_dir(f._dir.path())
            .map(|entries| entries.filter_map(|e| e.ok()).collect())
            .unwrap_or_default();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_all_attempts_failing_is_playback_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let f = fixture(PipelineConfig::default());
        let mut events = f.pipeline.subscribe();
        let plan = MediaPlan::new(MediaReference::StreamUrl("https://cdn.test/fail.m3u8".into()))
            .with_fallback(MediaReference::DownloadableAsset(format!("{}/gone.mp4", server.uri())));

        let result = f.pipeline.present(plan).await;

        assert!(matches!(result, Err(PlaybackError::DownloadFailed(_))));
        assert!(f.pipeline.current().is_none());
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let f = fixture(PipelineConfig::default());
        let mut events = f.pipeline.subscribe();

        // Vor jedem present()
        f.pipeline.stop();
        assert!(drain(&mut events).is_empty());

        let handle = f
            .pipeline
            .present(MediaReference::ExternalRoom("https://example/room/42".into()))
            .await
            .unwrap();
        drain(&mut events);

        f.pipeline.stop();
        f.pipeline.stop();

        assert_eq!(
            drain(&mut events),
            vec![MediaEvent::Stopped {
                generation: handle.generation
            }]
        );
        assert_eq!(f.renderer.released.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_during_present_cancels_without_events() {
        let f = fixture(PipelineConfig {
            playable_timeout: Duration::from_secs(30),
            ..PipelineConfig::default()
        });
        let mut events = f.pipeline.subscribe();

        let pending = {
            let pipeline = Arc::clone(&f.pipeline);
            tokio::spawn(async move {
                pipeline
                    .present(MediaReference::StreamUrl("https://cdn.test/hang.m3u8".into()))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.pipeline.stop();

        assert_eq!(pending.await.unwrap(), Err(PlaybackError::Cancelled));
        assert!(drain(&mut events).is_empty());
        assert!(f.renderer.shown.lock().is_empty());
    }

    fn cached_files(dir: &std::path::Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    }

    /// Wartet bis `dir` leer ist, höchstens zwei Sekunden
    async fn wait_until_empty(dir: &std::path::Path) -> Vec<PathBuf> {
        for _ in 0..40 {
            if cached_files(dir).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        cached_files(dir)
    }

    /// Hängender Stream, das Fallback-Asset ist schon fertig geladen
    fn hanging_stream_with_asset(server: &MockServer) -> MediaPlan {
        MediaPlan::new(MediaReference::StreamUrl("https://cdn.test/hang.m3u8".into()))
            .with_fallback(MediaReference::DownloadableAsset(format!(
                "{}/asset/call.mp4",
                server.uri()
            )))
    }

    #[tokio::test]
    async fn test_stop_during_stream_attempt_removes_prefetched_asset() {
        let server = asset_server().await;
        let f = fixture(PipelineConfig {
            playable_timeout: Duration::from_secs(30),
            ..PipelineConfig::default()
        });

        let pending = {
            let pipeline = Arc::clone(&f.pipeline);
            let plan = hanging_stream_with_asset(&server);
            tokio::spawn(async move { pipeline.present(plan).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!cached_files(f._dir.path()).is_empty());

        f.pipeline.stop();

        assert_eq!(pending.await.unwrap(), Err(PlaybackError::Cancelled));
        assert_eq!(wait_until_empty(f._dir.path()).await, Vec::<PathBuf>::new());
    }

    #[tokio::test]
    async fn test_superseded_present_removes_prefetched_asset() {
        let server = asset_server().await;
        let f = fixture(PipelineConfig {
            playable_timeout: Duration::from_secs(30),
            ..PipelineConfig::default()
        });

        let first = {
            let pipeline = Arc::clone(&f.pipeline);
            let plan = hanging_stream_with_asset(&server);
            tokio::spawn(async move { pipeline.present(plan).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;

        let second = f
            .pipeline
            .present(MediaReference::ExternalRoom("https://example/room/3".into()))
            .await
            .unwrap();

        assert_eq!(first.await.unwrap(), Err(PlaybackError::Cancelled));
        assert_eq!(f.pipeline.current(), Some(second));
        assert_eq!(wait_until_empty(f._dir.path()).await, Vec::<PathBuf>::new());
    }

    #[tokio::test]
    async fn test_new_present_replaces_current_content() {
        let f = fixture(PipelineConfig::default());

        let first = f
            .pipeline
            .present(MediaReference::ExternalRoom("https://example/room/1".into()))
            .await
            .unwrap();
        let second = f
            .pipeline
            .present(MediaReference::ExternalRoom("https://example/room/2".into()))
            .await
            .unwrap();

        assert!(second.generation > first.generation);
        assert_eq!(*f.renderer.shown.lock(), vec![1, 2]);
        assert_eq!(*f.renderer.released.lock(), vec![1]);
        assert_eq!(f.pipeline.current(), Some(second));
    }

    #[tokio::test]
    async fn test_renderer_end_emits_stopped() {
        let f = fixture(PipelineConfig::default());
        let mut events = f.pipeline.subscribe();

        let handle = f
            .pipeline
            .present(MediaReference::ExternalRoom("https://example/room/9".into()))
            .await
            .unwrap();
        f.renderer.signal(1, RendererSignal::Stalled);
        f.renderer.signal(1, RendererSignal::Ended);

        let generation = handle.generation;
        let mut seen = Vec::new();
        while seen.len() < 3 {
            seen.push(events.recv().await.unwrap());
        }
        assert_eq!(
            seen[1..],
            [
                MediaEvent::Stalled { generation },
                MediaEvent::Stopped { generation }
            ]
        );
        assert!(f.pipeline.current().is_none());

        // Kein zweites Stopped
        f.pipeline.stop();
        assert!(drain(&mut events).is_empty());
    }
}
