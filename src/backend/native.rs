//! Async backend on `tokio-tungstenite`.
//!
//! # Event Loop
//!
//! `connect()` spawns one tokio task per attempt that:
//!
//! - performs the (optionally TLS) handshake under the connect timeout
//! - forwards text and binary frames to the sink in arrival order
//! - writes queued frames and reports each completion
//! - closes the socket on request

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{
    Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config,
};
use tracing::{debug, trace, warn};

use crate::config;
use crate::error::{Error, Result};
use crate::identifiers::WriteId;
use crate::tls::{self, TrustEvaluator, TrustOutcome};

use super::{BackendCommand, BackendDescriptor, EventSink, Frame, WebSocketBackend};

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// NativeBackend
// ============================================================================

/// Backend driven by a tokio task.
pub struct NativeBackend {
    descriptor: BackendDescriptor,
    sink: EventSink,
    trust: Arc<dyn TrustEvaluator>,
    runtime: Handle,
    /// Present once `connect()` spawned the driver.
    command_tx: Option<mpsc::UnboundedSender<BackendCommand>>,
    closed: bool,
}

impl std::fmt::Debug for NativeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBackend")
            .field("descriptor", &self.descriptor)
            .field("started", &self.command_tx.is_some())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl NativeBackend {
    /// Creates an idle backend. Nothing happens until `connect()`.
    #[must_use]
    pub fn new(
        descriptor: BackendDescriptor,
        sink: EventSink,
        trust: Arc<dyn TrustEvaluator>,
        runtime: Handle,
    ) -> Self {
        Self {
            descriptor,
            sink,
            trust,
            runtime,
            command_tx: None,
            closed: false,
        }
    }
}

impl WebSocketBackend for NativeBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn connect(&mut self) {
        if self.command_tx.is_some() || self.closed {
            warn!(generation = %self.descriptor.generation, "Native backend already started");
            return;
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        self.command_tx = Some(command_tx);

        debug!(
            generation = %self.descriptor.generation,
            url = %self.descriptor.url,
            "Native backend connecting"
        );

        self.runtime.spawn(Self::run(
            self.descriptor.clone(),
            self.sink.clone(),
            Arc::clone(&self.trust),
            command_rx,
        ));
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

impl NativeBackend {
    async fn run(
        descriptor: BackendDescriptor,
        sink: EventSink,
        trust: Arc<dyn TrustEvaluator>,
        mut command_rx: mpsc::UnboundedReceiver<BackendCommand>,
    ) {
        let outcome = TrustOutcome::default();
        let limit = descriptor.connect_timeout;

        let ws_stream = tokio::select! {
            result = timeout(limit, Self::handshake(&descriptor, trust, &outcome)) => {
                match result {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => {
                        debug!(generation = %descriptor.generation, error = %e, "Handshake failed");
                        sink.closed(Some(e));
                        return;
                    }
                    Err(_) => {
                        sink.closed(Some(Error::connection_timeout(config::millis(limit))));
                        return;
                    }
                }
            }

            () = Self::wait_for_close(&mut command_rx, &sink) => {
                debug!(generation = %descriptor.generation, "Closed during handshake");
                return;
            }
        };

        sink.opened();
        Self::run_event_loop(ws_stream, command_rx, &sink).await;

        debug!(generation = %descriptor.generation, "Native backend terminated");
    }

    async fn handshake(
        descriptor: &BackendDescriptor,
        trust: Arc<dyn TrustEvaluator>,
        outcome: &TrustOutcome,
    ) -> Result<WsStream> {
        let request = descriptor.client_request()?;

        let connector = if descriptor.is_secure() {
            Some(Connector::Rustls(tls::client_config(trust, outcome.clone())?))
        } else {
            None
        };

        let (ws_stream, response) = connect_async_tls_with_config(request, None, true, connector)
            .await
            .map_err(|e| outcome.classify(e))?;

        trace!(status = %response.status(), "WebSocket handshake completed");
        Ok(ws_stream)
    }

    /// Resolves on `Close` or when the handle is dropped.
    async fn wait_for_close(
        command_rx: &mut mpsc::UnboundedReceiver<BackendCommand>,
        sink: &EventSink,
    ) {
        while let Some(command) = command_rx.recv().await {
            match command {
                BackendCommand::Close => return,
                BackendCommand::Write { write_id, .. } => {
                    sink.write_failed(write_id, Error::NotConnected);
                }
            }
        }
    }

    async fn run_event_loop(
        ws_stream: WsStream,
        mut command_rx: mpsc::UnboundedReceiver<BackendCommand>,
        sink: &EventSink,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            sink.received_text(text.as_str().to_owned());
                        }

                        Some(Ok(Message::Binary(data))) => {
                            sink.received_binary(data.to_vec());
                        }

                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "WebSocket closed by remote");
                            sink.closed(None);
                            break;
                        }

                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            sink.closed(Some(Error::transport(e.to_string())));
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            sink.closed(Some(Error::ConnectionClosed));
                            break;
                        }

                        // Ping/Pong are answered by tungstenite
                        Some(Ok(_)) => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(BackendCommand::Write { frame, write_id }) => {
                            let len = frame.len();
                            if let Err(e) = ws_write.send(frame.into_message()).await {
                                warn!(%write_id, error = %e, "Write failed");
                                sink.write_failed(write_id, Error::transport(e.to_string()));
                                break;
                            }
                            trace!(%write_id, len, "Frame written");
                            sink.write_complete(write_id);
                        }

                        Some(BackendCommand::Close) | None => {
                            debug!("Close requested");
                            let _ = ws_write.close().await;
                            sink.closed(None);
                            break;
                        }
                    }
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
