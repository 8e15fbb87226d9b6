//! Blocking backend on `tungstenite`, driven by a dedicated OS thread.
//!
//! Used when no tokio runtime is reachable. The thread alternates between
//! draining queued commands and a socket read bounded by
//! [`POLL_INTERVAL`], so writes wait at most one interval.

// ============================================================================
// Imports
// ============================================================================

use std::io::ErrorKind;
use std::net::TcpStream;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::Duration;

use tokio_tungstenite::tungstenite::stream::MaybeTlsStream;
use tokio_tungstenite::tungstenite::{
    self, Connector, Error as WsError, HandshakeError, Message, WebSocket,
};
use tracing::{debug, trace, warn};

use crate::config;
use crate::error::{Error, Result};
use crate::identifiers::WriteId;
use crate::tls::{self, TrustEvaluator, TrustOutcome};

use super::{BackendCommand, BackendDescriptor, EventSink, Frame, WebSocketBackend};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on one blocking read.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

// ============================================================================
// Types
// ============================================================================

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

// ============================================================================
// PortableBackend
// ============================================================================

/// Backend driven by its own thread.
pub struct PortableBackend {
    descriptor: BackendDescriptor,
    sink: EventSink,
    trust: Arc<dyn TrustEvaluator>,
    command_tx: Option<Sender<BackendCommand>>,
    closed: bool,
}

impl std::fmt::Debug for PortableBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortableBackend")
            .field("descriptor", &self.descriptor)
            .field("started", &self.command_tx.is_some())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl PortableBackend {
    /// Creates an idle backend. Nothing happens until `connect()`.
    #[must_use]
    pub fn new(
        descriptor: BackendDescriptor,
        sink: EventSink,
        trust: Arc<dyn TrustEvaluator>,
    ) -> Self {
        Self {
            descriptor,
            sink,
            trust,
            command_tx: None,
            closed: false,
        }
    }
}

impl WebSocketBackend for PortableBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn connect(&mut self) {
        if self.command_tx.is_some() || self.closed {
            warn!(generation = %self.descriptor.generation, "Portable backend already started");
            return;
        }

        let (command_tx, command_rx) = mpsc::channel();
        let descriptor = self.descriptor.clone();
        let sink = self.sink.clone();
        let trust = Arc::clone(&self.trust);

        let spawned = thread::Builder::new()
            .name(format!("ws-portable-{}", descriptor.generation.get()))
            .spawn(move || Self::run(descriptor, sink, trust, command_rx));

        match spawned {
            Ok(_) => self.command_tx = Some(command_tx),
            Err(e) => {
                warn!(error = %e, "Failed to spawn portable backend thread");
                self.closed = true;
                self.sink.closed(Some(Error::Io(e)));
            }
        }
    }

    fn disconnect(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(BackendCommand::Close);
        }
    }

    fn write(&mut self, frame: Frame, write_id: WriteId) {
        let sent = self
            .command_tx
            .as_ref()
            .is_some_and(|tx| tx.send(BackendCommand::Write { frame, write_id }).is_ok());

        if !sent {
            self.sink.write_failed(write_id, Error::NotConnected);
        }
    }
}

// ============================================================================
// Driver
// ============================================================================

impl PortableBackend {
    fn run(
        descriptor: BackendDescriptor,
        sink: EventSink,
        trust: Arc<dyn TrustEvaluator>,
        command_rx: Receiver<BackendCommand>,
    ) {
        debug!(
            generation = %descriptor.generation,
            url = %descriptor.url,
            "Portable backend connecting"
        );

        let outcome = TrustOutcome::default();
        let mut socket = match Self::handshake(&descriptor, trust, &outcome) {
            Ok(socket) => socket,
            Err(e) => {
                debug!(generation = %descriptor.generation, error = %e, "Handshake failed");
                sink.closed(Some(e));
                return;
            }
        };

        if Self::close_requested_before_open(&command_rx, &sink) {
            debug!(generation = %descriptor.generation, "Closed during handshake");
            let _ = socket.close(None);
            let _ = socket.flush();
            return;
        }

        sink.opened();
        Self::run_event_loop(&mut socket, &command_rx, &sink);

        debug!(generation = %descriptor.generation, "Portable backend terminated");
    }

    fn handshake(
        descriptor: &BackendDescriptor,
        trust: Arc<dyn TrustEvaluator>,
        outcome: &TrustOutcome,
    ) -> Result<Socket> {
        let limit = descriptor.connect_timeout;
        let stream = Self::open_tcp(descriptor, limit)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(limit))?;
        stream.set_write_timeout(Some(limit))?;

        let request = descriptor.client_request()?;
        let connector = if descriptor.is_secure() {
            Connector::Rustls(tls::client_config(trust, outcome.clone())?)
        } else {
            Connector::Plain
        };

        let (mut socket, response) =
            tungstenite::client_tls_with_config(request, stream, None, Some(connector)).map_err(
                |e| match e {
                    HandshakeError::Failure(err) => outcome.classify(err),
                    HandshakeError::Interrupted(_) => {
                        Error::connection_timeout(config::millis(limit))
                    }
                },
            )?;

        trace!(status = %response.status(), "WebSocket handshake completed");

        Self::tcp_mut(&mut socket)
            .map(|tcp| tcp.set_read_timeout(Some(POLL_INTERVAL)))
            .transpose()?;

        Ok(socket)
    }

    fn open_tcp(descriptor: &BackendDescriptor, limit: Duration) -> Result<TcpStream> {
        let addrs = descriptor.url.socket_addrs(|| None)?;
        let mut last_error = None;

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, limit) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    trace!(%addr, error = %e, "TCP connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) if e.kind() == ErrorKind::TimedOut => {
                Error::connection_timeout(config::millis(limit))
            }
            Some(e) => Error::transport(format!("connect failed: {e}")),
            None => Error::transport(format!("no address for {}", descriptor.url)),
        })
    }

    fn tcp_mut(socket: &mut Socket) -> Option<&mut TcpStream> {
        match socket.get_mut() {
            MaybeTlsStream::Plain(stream) => Some(stream),
            MaybeTlsStream::Rustls(stream) => Some(stream.get_mut()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Drains commands queued during the handshake.
    fn close_requested_before_open(command_rx: &Receiver<BackendCommand>, sink: &EventSink) -> bool {
        loop {
            match command_rx.try_recv() {
                Ok(BackendCommand::Write { write_id, .. }) => {
                    sink.write_failed(write_id, Error::NotConnected);
                }
                Ok(BackendCommand::Close) | Err(TryRecvError::Disconnected) => return true,
                Err(TryRecvError::Empty) => return false,
            }
        }
    }

    fn run_event_loop(socket: &mut Socket, command_rx: &Receiver<BackendCommand>, sink: &EventSink) {
        loop {
            if Self::drain_commands(socket, command_rx, sink).is_break() {
                return;
            }

            match socket.read() {
                Ok(Message::Text(text)) => {
                    sink.received_text(text.as_str().to_owned());
                }

                Ok(Message::Binary(data)) => {
                    sink.received_binary(data.to_vec());
                }

                Ok(Message::Close(frame)) => {
                    debug!(?frame, "WebSocket closed by remote");
                    let _ = socket.flush();
                    sink.closed(None);
                    return;
                }

                // Ping/Pong are answered by tungstenite
                Ok(_) => {}

                Err(WsError::Io(e))
                    if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}

                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                    debug!("WebSocket stream ended");
                    sink.closed(Some(Error::ConnectionClosed));
                    return;
                }

                Err(e) => {
                    warn!(error = %e, "WebSocket error");
                    sink.closed(Some(Error::transport(e.to_string())));
                    return;
                }
            }
        }
    }

    fn drain_commands(
        socket: &mut Socket,
        command_rx: &Receiver<BackendCommand>,
        sink: &EventSink,
    ) -> ControlFlow<()> {
        loop {
            match command_rx.try_recv() {
                Ok(BackendCommand::Write { frame, write_id }) => {
                    let len = frame.len();
                    if let Err(e) = socket.send(frame.into_message()) {
                        warn!(%write_id, error = %e, "Write failed");
                        sink.write_failed(write_id, Error::transport(e.to_string()));
                        return ControlFlow::Break(());
                    }
                    trace!(%write_id, len, "Frame written");
                    sink.write_complete(write_id);
                }

                Ok(BackendCommand::Close) | Err(TryRecvError::Disconnected) => {
                    debug!("Close requested");
                    let _ = socket.close(None);
                    let _ = socket.flush();
                    sink.closed(None);
                    return ControlFlow::Break(());
                }

                Err(TryRecvError::Empty) => return ControlFlow::Continue(()),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::TcpListener;

    use tokio::sync::mpsc as tokio_mpsc;

    use crate::backend::{BackendEvent, BackendKind, BackendRequest, BackendSelection};
    use crate::config::TransportConfig;
    use crate::identifiers::Generation;
    use crate::tls::SystemTrust;

    fn descriptor(port: u16, limit: Duration) -> BackendDescriptor {
        BackendRequest {
            target: TransportConfig::new().resolve("127.0.0.1", port).unwrap(),
            generation: Generation::new(1),
            connect_timeout: limit,
            selection: BackendSelection::Portable,
            trust: Arc::new(SystemTrust),
        }
        .descriptor(BackendKind::Portable)
    }

    #[test]
    fn test_refused_connection_reports_closed_with_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (tx, mut rx) = tokio_mpsc::unbounded_channel();
        let sink = EventSink::new(Generation::new(1), tx);
        let mut backend = PortableBackend::new(
            descriptor(port, Duration::from_secs(2)),
            sink,
            Arc::new(SystemTrust),
        );

        backend.connect();

        let message = rx.blocking_recv().expect("closed event");
        assert!(matches!(message.event, BackendEvent::Closed(Some(_))));
    }

    #[test]
    fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let (tx, mut rx) = tokio_mpsc::unbounded_channel();
        let sink = EventSink::new(Generation::new(1), tx);
        let mut backend = PortableBackend::new(
            descriptor(port, Duration::from_millis(300)),
            sink,
            Arc::new(SystemTrust),
        );

        backend.connect();

        let message = rx.blocking_recv().expect("closed event");
        assert!(matches!(
            message.event,
            BackendEvent::Closed(Some(Error::ConnectionTimeout { .. }))
        ));
        drop(listener);
    }

    #[test]
    fn test_write_before_connect_fails() {
        let (tx, mut rx) = tokio_mpsc::unbounded_channel();
        let sink = EventSink::new(Generation::new(1), tx);
        let mut backend =
            PortableBackend::new(descriptor(1, Duration::from_secs(1)), sink, Arc::new(SystemTrust));

        backend.write(Frame::Text("x".into()), WriteId::new(8));

        let message = rx.blocking_recv().unwrap();
        assert!(matches!(
            message.event,
            BackendEvent::WriteFailed(id, Error::NotConnected) if id == WriteId::new(8)
        ));
    }
}
