//! Adapter task: the single owner of all stream state.
//!
//! Public operations and backend events are both funnelled into this task
//! before any buffer, queue or phase mutation. Delegate notifications are
//! queued only after the state change that caused them is complete.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::backend::{
    BackendBuilder, BackendEvent, BackendKind, BackendMessage, BackendRequest, BackendSelection,
    EventSink, Frame, WebSocketBackend,
};
use crate::config::ResolvedTarget;
use crate::delegate::{Notifier, SocketEvent};
use crate::error::Error;
use crate::identifiers::{Generation, WriteId};
use crate::tls::TrustEvaluator;

use super::stream::StreamState;

// ============================================================================
// ConnectionPhase
// ============================================================================

/// Adapter connection phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionPhase {
    /// No backend.
    #[default]
    Disconnected,
    /// Backend created, handshake in flight.
    Connecting,
    /// Frames flow.
    Open,
    /// Teardown in progress.
    Closing,
}

// ============================================================================
// StreamSnapshot
// ============================================================================

/// Adapter state as seen by the adapter task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSnapshot {
    /// Current phase.
    pub phase: ConnectionPhase,
    /// Generation of the current (or last) attempt.
    pub generation: Generation,
    /// Variant of the live backend.
    pub backend: Option<BackendKind>,
    /// Bytes waiting for a read.
    pub buffered: usize,
    /// Reads waiting for bytes.
    pub pending_reads: usize,
    /// Writes waiting for completion.
    pub pending_writes: usize,
}

// ============================================================================
// AdapterCommand
// ============================================================================

/// Commands from the adapter handle.
pub(crate) enum AdapterCommand {
    Connect {
        target: ResolvedTarget,
        connect_timeout: Duration,
    },
    Disconnect,
    Read {
        length: usize,
        tag: i64,
    },
    Write {
        frame: Frame,
        tag: i64,
    },
    Snapshot(oneshot::Sender<StreamSnapshot>),
    Shutdown,
}

// ============================================================================
// AdapterTask
// ============================================================================

/// State owned by the adapter task.
pub(crate) struct AdapterTask {
    selection: BackendSelection,
    builder: Arc<dyn BackendBuilder>,
    trust: Arc<dyn TrustEvaluator>,
    notifier: Notifier,
    /// Mirror read by `TransportAdapter::phase`.
    shared_phase: Arc<RwLock<ConnectionPhase>>,
    phase: ConnectionPhase,
    generation: Generation,
    backend: Option<Box<dyn WebSocketBackend>>,
    listener: Option<EventSink>,
    stream: StreamState,
    writes: FxHashMap<WriteId, i64>,
    next_write_id: u64,
    event_tx: mpsc::UnboundedSender<BackendMessage>,
}

impl AdapterTask {
    pub(crate) fn new(
        selection: BackendSelection,
        builder: Arc<dyn BackendBuilder>,
        trust: Arc<dyn TrustEvaluator>,
        notifier: Notifier,
        shared_phase: Arc<RwLock<ConnectionPhase>>,
        event_tx: mpsc::UnboundedSender<BackendMessage>,
    ) -> Self {
        Self {
            selection,
            builder,
            trust,
            notifier,
            shared_phase,
            phase: ConnectionPhase::Disconnected,
            generation: Generation::default(),
            backend: None,
            listener: None,
            stream: StreamState::new(),
            writes: FxHashMap::default(),
            next_write_id: 0,
            event_tx,
        }
    }

    /// Serial event loop.
    pub(crate) async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<AdapterCommand>,
        mut event_rx: mpsc::UnboundedReceiver<BackendMessage>,
    ) {
        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(AdapterCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command),
                    }
                }

                // The task holds a sender, so this never yields `None`.
                Some(message) = event_rx.recv() => {
                    self.handle_backend_message(message);
                }
            }
        }

        self.teardown_backend("adapter shut down");
        self.stream.clear();
        self.set_phase(ConnectionPhase::Disconnected);

        debug!("Adapter task terminated");
    }

    pub(crate) fn handle_command(&mut self, command: AdapterCommand) {
        match command {
            AdapterCommand::Connect {
                target,
                connect_timeout,
            } => self.handle_connect(target, connect_timeout),

            AdapterCommand::Disconnect => self.handle_disconnect(),

            AdapterCommand::Read { length, tag } => {
                let sequence = self.stream.schedule_read(length, tag);
                trace!(length, tag, sequence, "Read scheduled");
                self.deliver_ready_reads();
            }

            AdapterCommand::Write { frame, tag } => self.handle_write(frame, tag),

            AdapterCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }

            AdapterCommand::Shutdown => {}
        }
    }

    pub(crate) fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            phase: self.phase,
            generation: self.generation,
            backend: self.backend.as_ref().map(|b| b.descriptor().kind),
            buffered: self.stream.buffered_len(),
            pending_reads: self.stream.pending_reads(),
            pending_writes: self.writes.len(),
        }
    }
}

// ============================================================================
// AdapterTask - Commands
// ============================================================================

impl AdapterTask {
    fn handle_connect(&mut self, target: ResolvedTarget, connect_timeout: Duration) {
        if self.backend.is_some() {
            self.teardown_backend("replaced by new connect");
        }
        self.stream.clear();

        self.generation = self.generation.next();
        let sink = EventSink::new(self.generation, self.event_tx.clone());
        let request = BackendRequest {
            target,
            generation: self.generation,
            connect_timeout,
            selection: self.selection,
            trust: Arc::clone(&self.trust),
        };

        match self.builder.build(request, sink.clone()) {
            Ok(mut backend) => {
                let descriptor = backend.descriptor();
                info!(
                    generation = %self.generation,
                    kind = %descriptor.kind,
                    url = %descriptor.url,
                    "Connecting"
                );

                self.listener = Some(sink);
                self.set_phase(ConnectionPhase::Connecting);
                backend.connect();
                self.backend = Some(backend);
            }
            Err(e) => {
                warn!(generation = %self.generation, error = %e, "Backend construction failed");
                self.set_phase(ConnectionPhase::Disconnected);
                self.notifier
                    .notify(SocketEvent::Disconnected { error: Some(e) });
            }
        }
    }

    fn handle_disconnect(&mut self) {
        if self.phase == ConnectionPhase::Disconnected && self.backend.is_none() {
            trace!("Disconnect while already disconnected");
            return;
        }

        self.set_phase(ConnectionPhase::Closing);
        self.teardown_backend("disconnect requested");
        self.stream.clear();
        self.set_phase(ConnectionPhase::Disconnected);

        self.notifier.notify(SocketEvent::Disconnected { error: None });
    }

    fn handle_write(&mut self, frame: Frame, tag: i64) {
        let backend = match (self.phase, self.backend.as_mut()) {
            (ConnectionPhase::Open, Some(backend)) => backend,
            (phase, _) => {
                debug!(tag, ?phase, "Write while not open");
                self.notifier.notify(SocketEvent::WriteFailed {
                    tag,
                    error: Error::NotConnected,
                });
                return;
            }
        };

        let write_id = WriteId::new(self.next_write_id);
        self.next_write_id += 1;
        self.writes.insert(write_id, tag);

        trace!(%write_id, tag, len = frame.len(), "Write queued");
        backend.write(frame, write_id);
    }
}

// ============================================================================
// AdapterTask - Backend Events
// ============================================================================

impl AdapterTask {
    pub(crate) fn handle_backend_message(&mut self, message: BackendMessage) {
        let BackendMessage { generation, event } = message;

        if generation != self.generation || self.listener.is_none() {
            trace!(%generation, current = %self.generation, ?event, "Discarding stale backend event");
            return;
        }

        match event {
            BackendEvent::Opened => {
                if self.phase == ConnectionPhase::Connecting {
                    info!(%generation, "Connected");
                    self.set_phase(ConnectionPhase::Open);
                    self.notifier.notify(SocketEvent::Connected);
                } else {
                    warn!(%generation, phase = ?self.phase, "Unexpected open event");
                }
            }

            BackendEvent::Text(text) => self.receive(&text.into_bytes()),

            BackendEvent::Binary(data) => self.receive(&data),

            BackendEvent::WriteComplete(write_id) => match self.writes.remove(&write_id) {
                Some(tag) => self.notifier.notify(SocketEvent::WriteComplete { tag }),
                None => warn!(%write_id, "Completion for unknown write"),
            },

            BackendEvent::WriteFailed(write_id, error) => {
                debug!(%write_id, %error, "Write failed, closing");
                self.writes.remove(&write_id);
                self.close_with(Some(error));
            }

            BackendEvent::Closed(error) => {
                match &error {
                    Some(e) => warn!(%generation, error = %e, "Connection closed with error"),
                    None => info!(%generation, "Connection closed"),
                }
                self.close_with(error);
            }
        }
    }

    fn receive(&mut self, data: &[u8]) {
        trace!(len = data.len(), buffered = self.stream.buffered_len(), "Frame received");
        self.stream.append(data);
        self.deliver_ready_reads();
    }

    fn deliver_ready_reads(&mut self) {
        for read in self.stream.drain_ready() {
            trace!(tag = read.request.tag, len = read.data.len(), "Read satisfied");
            self.notifier.notify(SocketEvent::Read {
                data: read.data,
                tag: read.request.tag,
            });
        }
    }

    fn close_with(&mut self, error: Option<Error>) {
        self.teardown_backend("backend closed");
        self.stream.clear();
        self.set_phase(ConnectionPhase::Disconnected);
        self.notifier.notify(SocketEvent::Disconnected { error });
    }

    /// Detaches the listener first, then asks the backend to close.
    fn teardown_backend(&mut self, reason: &str) {
        if let Some(listener) = self.listener.take() {
            listener.detach();
        }

        if let Some(mut backend) = self.backend.take() {
            debug!(generation = %backend.descriptor().generation, reason, "Tearing down backend");
            backend.disconnect();
        }

        if !self.writes.is_empty() {
            debug!(count = self.writes.len(), "Dropping in-flight writes");
            self.writes.clear();
        }
    }

    fn set_phase(&mut self, phase: ConnectionPhase) {
        self.phase = phase;
        *self.shared_phase.write() = phase;
    }
}

// ============================================================================
// Tests
// ============================================================================
