//! Renderer-Schnittstelle zur UI
//!
//! Die eigentliche Darstellung gehört der UI. Die Pipeline spricht nur
//! über [`MediaRenderer`] mit ihr: vorbereiten, sichtbar machen, freigeben.

use super::reference::PlaybackSource;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub type ItemId = u64;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Source not playable: {0}")]
    Unplayable(String),

    #[error("Renderer unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// RENDERER TRAIT
// ============================================================================

/// Signale eines vorbereiteten Elements nach dem Start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RendererSignal {
    Stalled,
    Ended,
    Failed(String),
}

/// Ein geladenes, abspielbereites, aber noch nicht sichtbares Element
#[derive(Debug)]
pub struct PreparedItem {
    pub id: ItemId,
    pub signals: mpsc::UnboundedReceiver<RendererSignal>,
}

#[async_trait]
pub trait MediaRenderer: Send + Sync {
    /// Lädt eine Quelle und kehrt zurück, sobald sie abspielbar ist.
    ///
    /// Wird der Future verworfen, muss die Implementierung alles
    /// freigeben, was sie bis dahin angelegt hat.
    async fn prepare(&self, source: &PlaybackSource) -> Result<PreparedItem, RenderError>;

    /// Ersetzt den sichtbaren Inhalt durch `id`
    fn show(&self, id: ItemId);

    /// Gibt Decoder und Renderer von `id` frei
    fn release(&self, id: ItemId);
}

// ============================================================================
// HEADLESS RENDERER
// ============================================================================

/// Renderer ohne Anzeige.
///
/// Prüft nur, ob eine Quelle abspielbar wäre: HLS-Playlist mit
/// `#EXTM3U`-Header, nicht-leere lokale Datei, erreichbarer Raum.
pub struct HeadlessRenderer {
    client: reqwest::Client,
    probe_timeout: Duration,
    next_id: AtomicU64,
    items: Mutex<HashMap<ItemId, mpsc::UnboundedSender<RendererSignal>>>,
    visible: Mutex<Option<ItemId>>,
}

impl HeadlessRenderer {
    pub fn new(client: reqwest::Client, probe_timeout: Duration) -> Self {
        Self {
            client,
            probe_timeout,
            next_id: AtomicU64::new(1),
            items: Mutex::new(HashMap::new()),
            visible: Mutex::new(None),
        }
    }

    /// Aktuell sichtbares Element
    pub fn visible(&self) -> Option<ItemId> {
        *self.visible.lock()
    }

    async fn probe(&self, source: &PlaybackSource) -> Result<(), RenderError> {
        match source {
            PlaybackSource::Stream(url) => {
                let body = self.fetch(url).await?;
                if body.trim_start().starts_with("#EXTM3U") {
                    Ok(())
                } else {
                    Err(RenderError::Unplayable(format!(
                        "{} is not an HLS playlist",
                        url
                    )))
                }
            }
            PlaybackSource::Room(url) => self.fetch(url).await.map(|_| ()),
            PlaybackSource::File(path) => {
                let metadata = tokio::fs::metadata(path)
                    .await
                    .map_err(|e| RenderError::Unplayable(format!("{}: {}", path.display(), e)))?;
                if metadata.len() == 0 {
                    return Err(RenderError::Unplayable(format!(
                        "{} is empty",
                        path.display()
                    )));
                }
                Ok(())
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, RenderError> {
        let response = self
            .client
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| RenderError::Unplayable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RenderError::Unplayable(format!(
                "{} answered with status {}",
                url,
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| RenderError::Unplayable(e.to_string()))
    }
}

#[async_trait]
impl MediaRenderer for HeadlessRenderer {
    async fn prepare(&self, source: &PlaybackSource) -> Result<PreparedItem, RenderError> {
        self.probe(source).await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (signal_tx, signals) = mpsc::unbounded_channel();
        self.items.lock().insert(id, signal_tx);

        tracing::debug!("Prepared item {} for {:?}", id, source);
        Ok(PreparedItem { id, signals })
    }

    fn show(&self, id: ItemId) {
        let previous = self.visible.lock().replace(id);
        tracing::info!("Now showing item {} (replacing {:?})", id, previous);
    }

    fn release(&self, id: ItemId) {
        self.items.lock().remove(&id);
        let mut visible = self.visible.lock();
        if *visible == Some(id) {
            *visible = None;
        }
        tracing::debug!("Released item {}", id);
    }
}

impl std::fmt::Debug for HeadlessRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessRenderer")
            .field("visible", &self.visible())
            .field("items", &self.items.lock().len())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
