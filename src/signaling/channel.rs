//! WebSocket Kanal zum Signaling-Endpunkt
//!
//! Verwaltet eine persistente WebSocket-Verbindung:
//! - Lese-Schleife, die an die Lebensdauer des Kanals gebunden ist
//! - Schreib-Task mit eigener Queue
//! - Genau eine offene Offer/Answer-Verhandlung gleichzeitig
//!
//! Das Protokoll kennt keine Korrelations-IDs. Eine eingehende `answer`
//! gehört immer zur aktuell offenen Verhandlung; deshalb lehnt
//! [`SignalingChannel::negotiate`] eine zweite parallele Verhandlung ab.

use super::messages::{IceCandidate, SignalingMessage};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

/// Standard-Timeout für den Verbindungsaufbau
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Wie lange der Schreib-Task beim Schließen auf den Close-Frame wartet
const CLOSE_GRACE: Duration = Duration::from_millis(500);

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("Signaling connection failed: {0}")]
    Connection(String),

    #[error("Signaling channel closed")]
    ChannelClosed,

    #[error("Negotiation cancelled")]
    Cancelled,

    #[error("A negotiation is already outstanding on this channel")]
    NegotiationPending,

    #[error("No answer within {0:?}")]
    Timeout(Duration),

    #[error("Failed to send message: {0}")]
    SendFailed(String),
}

// ============================================================================
// SIGNALING EVENTS
// ============================================================================

/// Events, die der Kanal neben der Verhandlung ausliefert
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// ICE Candidate vom Peer
    RemoteCandidate(IceCandidate),

    /// Verbindung getrennt (Server oder lokal)
    Disconnected,
}

type PendingAnswer = oneshot::Sender<Result<String, SignalingError>>;

// ============================================================================
// SIGNALING CHANNEL
// ============================================================================

/// Persistenter Signaling-Kanal
pub struct SignalingChannel {
    endpoint: String,
    tx: mpsc::Sender<Message>,
    pending: Arc<Mutex<Option<PendingAnswer>>>,
    closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
    event_tx: broadcast::Sender<SignalingEvent>,
}

impl SignalingChannel {
    /// Öffnet einen Kanal mit Standard-Timeout
    pub async fn open(endpoint: &str) -> Result<Self, SignalingError> {
        Self::open_with(endpoint, DEFAULT_CONNECT_TIMEOUT, &CancellationToken::new()).await
    }

    /// Öffnet einen Kanal, dessen Lebensdauer an `parent` gebunden ist.
    ///
    /// Wird `parent` abgebrochen, schließt sich der Kanal und eine offene
    /// Verhandlung endet mit [`SignalingError::Cancelled`].
    pub async fn open_with(
        endpoint: &str,
        connect_timeout: Duration,
        parent: &CancellationToken,
    ) -> Result<Self, SignalingError> {
        url::Url::parse(endpoint)
            .map_err(|e| SignalingError::Connection(format!("invalid endpoint: {}", e)))?;

        tracing::info!("Connecting to signaling endpoint: {}", endpoint);

        let connect = tokio::time::timeout(connect_timeout, connect_async(endpoint));
        let (ws_stream, _) = tokio::select! {
            _ = parent.cancelled() => return Err(SignalingError::Cancelled),
            result = connect => match result {
                Ok(Ok(connected)) => connected,
                Ok(Err(e)) => return Err(SignalingError::Connection(e.to_string())),
                Err(_) => {
                    return Err(SignalingError::Connection(format!(
                        "handshake timed out after {:?}",
                        connect_timeout
                    )))
                }
            },
        };

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<Message>(100);
        let (event_tx, _) = broadcast::channel(100);

        let pending: Arc<Mutex<Option<PendingAnswer>>> = Arc::new(Mutex::new(None));
        let closed = Arc::new(AtomicBool::new(false));
        let shutdown = parent.child_token();

        // Lese-Schleife
        {
            let pending = Arc::clone(&pending);
            let closed = Arc::clone(&closed);
            let shutdown = shutdown.clone();
            let event_tx = event_tx.clone();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        frame = read.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                Self::handle_inbound(&text, &pending, &event_tx);
                            }
                            Some(Ok(Message::Binary(data))) => {
                                tracing::debug!("Ignoring binary signaling frame ({} bytes)", data.len());
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::info!("Signaling channel closed by server");
                                break;
                            }
                            Some(Err(e)) => {
                                tracing::error!("Signaling receive error: {}", e);
                                break;
                            }
                            Some(Ok(_)) => {}
                        },
                    }
                }

                closed.store(true, Ordering::SeqCst);
                let reason = if shutdown.is_cancelled() {
                    SignalingError::Cancelled
                } else {
                    SignalingError::ChannelClosed
                };
                if let Some(waiter) = pending.lock().take() {
                    let _ = waiter.send(Err(reason));
                }
                let _ = event_tx.send(SignalingEvent::Disconnected);
            });
        }

        // Schreib-Task
        {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            let _ = tokio::time::timeout(CLOSE_GRACE, write.send(Message::Close(None))).await;
                            break;
                        }
                        msg = rx.recv() => match msg {
                            Some(msg) => {
                                if let Err(e) = write.send(msg).await {
                                    tracing::error!("Failed to send signaling message: {}", e);
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
            });
        }

        tracing::info!("Signaling channel open: {}", endpoint);

        Ok(Self {
            endpoint: endpoint.to_string(),
            tx,
            pending,
            closed,
            shutdown,
            event_tx,
        })
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.event_tx.subscribe()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Prüft ob der Kanal geschlossen ist
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.closed.load(Ordering::SeqCst)
    }

    /// Sendet eine beliebige Signaling-Nachricht
    pub async fn send(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        if self.is_closed() {
            return Err(self.closed_reason());
        }
        tracing::debug!("Sending '{}' message", message.type_name());
        self.tx
            .send(Message::Text(message.encode()))
            .await
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    /// Sendet ein Offer und wartet auf genau eine Answer.
    ///
    /// Nachrichten, die keine gültige Answer sind, werden geloggt und
    /// ignoriert. Schließt sich der Kanal, endet die Verhandlung mit
    /// [`SignalingError::ChannelClosed`], bei `close()` mit
    /// [`SignalingError::Cancelled`].
    pub async fn negotiate(&self, offer_sdp: String) -> Result<String, SignalingError> {
        if self.is_closed() {
            return Err(self.closed_reason());
        }

        let (answer_tx, answer_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            // Ein verworfener Future hinterlässt einen Sender ohne Empfänger
            if pending.as_ref().is_some_and(|waiter| !waiter.is_closed()) {
                return Err(SignalingError::NegotiationPending);
            }
            *pending = Some(answer_tx);
        }

        // Die Lese-Schleife kann zwischen Prüfung und Eintragen beendet worden sein
        if self.is_closed() {
            self.pending.lock().take();
        } else if let Err(e) = self
            .send(SignalingMessage::Offer { sdp: offer_sdp })
            .await
        {
            self.pending.lock().take();
            return Err(e);
        }

        match answer_rx.await {
            Ok(result) => result,
            Err(_) => Err(self.closed_reason()),
        }
    }

    /// Schließt den Kanal. Mehrfache Aufrufe sind erlaubt.
    pub fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        tracing::info!("Closing signaling channel: {}", self.endpoint);
        self.shutdown.cancel();
        if let Some(waiter) = self.pending.lock().take() {
            let _ = waiter.send(Err(SignalingError::Cancelled));
        }
    }

    fn closed_reason(&self) -> SignalingError {
        if self.shutdown.is_cancelled() {
            SignalingError::Cancelled
        } else {
            SignalingError::ChannelClosed
        }
    }

    /// Verarbeitet eine eingehende Text-Nachricht
    fn handle_inbound(
        text: &str,
        pending: &Arc<Mutex<Option<PendingAnswer>>>,
        event_tx: &broadcast::Sender<SignalingEvent>,
    ) {
        match SignalingMessage::decode(text) {
            Ok(SignalingMessage::Answer { sdp }) => match pending.lock().take() {
                Some(waiter) => {
                    tracing::info!("Received SDP answer");
                    let _ = waiter.send(Ok(sdp));
                }
                None => tracing::warn!("Ignoring answer without outstanding negotiation"),
            },
            Ok(SignalingMessage::IceCandidate(candidate)) => {
                tracing::debug!("Received remote ICE candidate");
                let _ = event_tx.send(SignalingEvent::RemoteCandidate(candidate));
            }
            Ok(SignalingMessage::Offer { .. }) => {
                tracing::warn!("Ignoring unexpected offer from signaling endpoint");
            }
            Err(e) => {
                tracing::warn!("Ignoring signaling message: {}", e);
            }
        }
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SignalingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingChannel")
            .field("endpoint", &self.endpoint)
            .field("is_closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
