//! Backend → adapter event bridge.
//!
//! Every backend gets one [`EventSink`] stamped with the generation of the
//! connection attempt it serves. The adapter detaches the sink before it
//! tears the backend down, after which nothing the backend emits reaches
//! the adapter.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::trace;

use crate::error::Error;
use crate::identifiers::{Generation, WriteId};

// ============================================================================
// BackendEvent
// ============================================================================

/// Event emitted by a backend.
#[derive(Debug)]
pub enum BackendEvent {
    /// Handshake finished; frames may flow.
    Opened,
    /// Connection ended. `None` for an orderly close.
    Closed(Option<Error>),
    /// Text frame received.
    Text(String),
    /// Binary frame received.
    Binary(Vec<u8>),
    /// Frame written to the socket.
    WriteComplete(WriteId),
    /// Frame could not be written.
    WriteFailed(WriteId, Error),
}

/// Event stamped with the generation of the backend that produced it.
#[derive(Debug)]
pub struct BackendMessage {
    /// Producer generation.
    pub generation: Generation,
    /// The event.
    pub event: BackendEvent,
}

// ============================================================================
// EventSink
// ============================================================================

/// Listener registration handed to a backend.
///
/// Cheap to clone; all clones share the attachment flag.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: Generation,
    attached: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<BackendMessage>,
}

impl EventSink {
    /// Creates an attached sink forwarding into `tx`.
    #[must_use]
    pub fn new(generation: Generation, tx: mpsc::UnboundedSender<BackendMessage>) -> Self {
        Self {
            generation,
            attached: Arc::new(AtomicBool::new(true)),
            tx,
        }
    }

    /// Generation this sink was created for.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Returns `true` while the adapter still listens.
    #[inline]
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Stops forwarding. Irreversible.
    #[inline]
    pub fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }

    /// Forwards an event. Returns `false` if it was dropped.
    pub fn emit(&self, event: BackendEvent) -> bool {
        if !self.is_attached() {
            trace!(generation = %self.generation, ?event, "Dropping event from detached backend");
            return false;
        }

        self.tx
            .send(BackendMessage {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    /// Emits [`BackendEvent::Opened`].
    #[inline]
    pub fn opened(&self) -> bool {
        self.emit(BackendEvent::Opened)
    }

    /// Emits [`BackendEvent::Closed`].
    #[inline]
    pub fn closed(&self, error: Option<Error>) -> bool {
        self.emit(BackendEvent::Closed(error))
    }

    /// Emits [`BackendEvent::Text`].
    #[inline]
    pub fn received_text(&self, text: String) -> bool {
        self.emit(BackendEvent::Text(text))
    }

    /// Emits [`BackendEvent::Binary`].
    #[inline]
    pub fn received_binary(&self, data: Vec<u8>) -> bool {
        self.emit(BackendEvent::Binary(data))
    }

    /// Emits [`BackendEvent::WriteComplete`].
    #[inline]
    pub fn write_complete(&self, write_id: WriteId) -> bool {
        self.emit(BackendEvent::WriteComplete(write_id))
    }

    /// Emits [`BackendEvent::WriteFailed`].
    #[inline]
    pub fn write_failed(&self, write_id: WriteId, error: Error) -> bool {
        self.emit(BackendEvent::WriteFailed(write_id, error))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_stamps_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(Generation::new(4), tx);

        assert!(sink.received_binary(vec![1, 2, 3]));

        let message = rx.try_recv().expect("event forwarded");
        assert_eq!(message.generation, Generation::new(4));
        assert!(matches!(message.event, BackendEvent::Binary(ref b) if b == &[1, 2, 3]));
    }

    #[test]
    fn test_detach_is_shared_across_clones() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(Generation::new(1), tx);
        let backend_copy = sink.clone();

        sink.detach();

        assert!(!backend_copy.is_attached());
        assert!(!backend_copy.opened());
        assert!(!backend_copy.closed(None));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(Generation::new(1), tx);
        drop(rx);

        assert!(!sink.opened());
    }
}
