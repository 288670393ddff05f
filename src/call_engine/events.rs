//! Lifecycle-Events und Observer

use super::error::ErrorKind;
use super::peer::TrackKind;
use super::session::{CallState, SessionId};
use crate::media::MediaReference;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Events die vom CallOrchestrator ausgelöst werden
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    StateChanged {
        session_id: SessionId,
        state: CallState,
    },
    MediaReady {
        session_id: SessionId,
        reference: MediaReference,
    },
    RemoteTrackAdded {
        session_id: SessionId,
        track_id: String,
        kind: TrackKind,
    },
    RemoteTrackRemoved {
        session_id: SessionId,
        track_id: String,
    },
    MediaStalled {
        session_id: SessionId,
    },
    Stopped {
        session_id: SessionId,
    },
    Error {
        session_id: SessionId,
        kind: ErrorKind,
        detail: String,
    },
}

impl CallEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            CallEvent::StateChanged { session_id, .. }
            | CallEvent::MediaReady { session_id, .. }
            | CallEvent::RemoteTrackAdded { session_id, .. }
            | CallEvent::RemoteTrackRemoved { session_id, .. }
            | CallEvent::MediaStalled { session_id }
            | CallEvent::Stopped { session_id }
            | CallEvent::Error { session_id, .. } => *session_id,
        }
    }
}

// ============================================================================
// EVENT BUS
// ============================================================================

/// Verteilt Events an alle Abonnenten.
///
/// Jeder Abonnent hat eine eigene, ungebundene Queue. Ein langsamer
/// Observer verliert so keine Events und bremst den Actor nicht.
/// Der Stream endet, wenn der Bus verworfen wird.
#[derive(Clone, Default)]
pub(crate) struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<CallEvent>>>>,
}

impl EventBus {
    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<CallEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Verworfene Receiver werden dabei ausgetragen
    pub(crate) fn emit(&self, event: CallEvent) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

/// Empfänger für Lifecycle-Events. Alle Methoden sind optional.
pub trait CallObserver: Send + 'static {
    fn on_state_changed(&mut self, _session_id: SessionId, _state: CallState) {}
    fn on_media_ready(&mut self, _session_id: SessionId, _reference: &MediaReference) {}
    fn on_remote_track_added(&mut self, _session_id: SessionId, _track_id: &str, _kind: TrackKind) {}
    fn on_remote_track_removed(&mut self, _session_id: SessionId, _track_id: &str) {}
    fn on_stalled(&mut self, _session_id: SessionId) {}
    fn on_stopped(&mut self, _session_id: SessionId) {}
    fn on_error(&mut self, _session_id: SessionId, _kind: ErrorKind, _detail: &str) {}
}

fn dispatch<O: CallObserver + ?Sized>(observer: &mut O, event: &CallEvent) {
    match event {
        CallEvent::StateChanged { session_id, state } => {
            observer.on_state_changed(*session_id, *state)
        }
        CallEvent::MediaReady {
            session_id,
            reference,
        } => observer.on_media_ready(*session_id, reference),
        CallEvent::RemoteTrackAdded {
            session_id,
            track_id,
            kind,
        } => observer.on_remote_track_added(*session_id, track_id, *kind),
        CallEvent::RemoteTrackRemoved {
            session_id,
            track_id,
        } => observer.on_remote_track_removed(*session_id, track_id),
        CallEvent::MediaStalled { session_id } => observer.on_stalled(*session_id),
        CallEvent::Stopped { session_id } => observer.on_stopped(*session_id),
        CallEvent::Error {
            session_id,
            kind,
            detail,
        } => observer.on_error(*session_id, *kind, detail),
    }
}

/// Leitet Events aus `rx` an `observer` weiter, bis der Orchestrator endet
pub fn observe<O: CallObserver>(
    mut rx: mpsc::UnboundedReceiver<CallEvent>,
    mut observer: O,
) -> JoinHandle<O> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            dispatch(&mut observer, &event);
        }
        observer
    })
}
