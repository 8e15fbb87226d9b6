//! Public adapter handle.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::backend::Frame;
use crate::config::TransportConfig;
use crate::delegate::SocketDelegate;
use crate::error::{Error, Result};

use super::builder::AdapterBuilder;
use super::core::{AdapterCommand, ConnectionPhase, StreamSnapshot};

// ============================================================================
// TransportAdapter
// ============================================================================

/// Byte-stream socket over a WebSocket.
///
/// Every operation returns immediately; outcomes are reported to the
/// [`SocketDelegate`]. The handle is reused across reconnects. Dropping it
/// stops the adapter task and closes any live backend without notifying
/// the delegate.
///
/// # Example
///
/// ```no_run
/// use mqtt_ws_socket::{ChannelDelegate, SocketEvent, TransportAdapter, TransportConfig};
///
/// # async fn example() -> mqtt_ws_socket::Result<()> {
/// let (delegate, mut events) = ChannelDelegate::new();
/// let adapter = TransportAdapter::new(TransportConfig::new(), delegate)?;
///
/// adapter.connect("broker.local", 8083, None)?;
/// if let Some(SocketEvent::Connected) = events.recv().await {
///     adapter.read(2, 1)?;
///     adapter.write(vec![0xC0, 0x00], 2)?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TransportAdapter {
    config: Arc<TransportConfig>,
    command_tx: mpsc::UnboundedSender<AdapterCommand>,
    phase: Arc<RwLock<ConnectionPhase>>,
}

impl TransportAdapter {
    /// Creates an adapter on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if called outside a tokio runtime.
    pub fn new(config: TransportConfig, delegate: impl SocketDelegate + 'static) -> Result<Self> {
        AdapterBuilder::new()
            .config(config)
            .delegate(delegate)
            .spawn()
    }

    /// Creates a builder for full control over the adapter.
    #[inline]
    #[must_use]
    pub fn builder() -> AdapterBuilder {
        AdapterBuilder::new()
    }

    pub(crate) fn from_parts(
        config: Arc<TransportConfig>,
        command_tx: mpsc::UnboundedSender<AdapterCommand>,
        phase: Arc<RwLock<ConnectionPhase>>,
    ) -> Self {
        Self {
            config,
            command_tx,
            phase,
        }
    }

    /// Returns the configuration the adapter was built with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Returns the last phase published by the adapter task.
    #[inline]
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        *self.phase.read()
    }

    /// Returns `true` if frames can currently flow.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.phase() == ConnectionPhase::Open
    }
}

// ============================================================================
// TransportAdapter - Socket Operations
// ============================================================================

impl TransportAdapter {
    /// Opens a connection to `host:port`, replacing any existing one.
    ///
    /// The target URL and handshake headers are built before anything else
    /// happens. `timeout` falls back to the configured connect timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`] if no usable URL can be built
    /// - [`Error::InvalidHeader`] if a configured header is unusable
    /// - [`Error::ConnectionClosed`] if the adapter task has stopped
    pub fn connect(&self, host: &str, port: u16, timeout: Option<Duration>) -> Result<()> {
        let target = self.config.resolve(host, port)?;
        let connect_timeout = timeout.unwrap_or_else(|| self.config.connect_timeout());

        debug!(url = %target.url, ?connect_timeout, "Connect requested");

        self.send(AdapterCommand::Connect {
            target,
            connect_timeout,
        })
    }

    /// Closes the connection and drops buffered bytes and pending reads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the adapter task has stopped.
    pub fn disconnect(&self) -> Result<()> {
        self.send(AdapterCommand::Disconnect)
    }

    /// Requests exactly `length` next bytes, delivered with `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the adapter task has stopped.
    pub fn read(&self, length: usize, tag: i64) -> Result<()> {
        self.send(AdapterCommand::Read { length, tag })
    }

    /// Sends `data` as one binary frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the adapter task has stopped.
    pub fn write(&self, data: impl Into<Vec<u8>>, tag: i64) -> Result<()> {
        self.send(AdapterCommand::Write {
            frame: Frame::Binary(data.into()),
            tag,
        })
    }

    /// Sends `text` as one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the adapter task has stopped.
    pub fn write_text(&self, text: impl Into<String>, tag: i64) -> Result<()> {
        self.send(AdapterCommand::Write {
            frame: Frame::Text(text.into()),
            tag,
        })
    }

    /// Returns the adapter state as seen by the adapter task.
    ///
    /// Commands issued earlier from this handle are reflected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the adapter task has stopped.
    pub async fn snapshot(&self) -> Result<StreamSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(AdapterCommand::Snapshot(tx))?;
        rx.await.map_err(|_| Error::ConnectionClosed)
    }

    fn send(&self, command: AdapterCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| Error::ConnectionClosed)
    }
}

// ============================================================================
// Drop
// ============================================================================

impl Drop for TransportAdapter {
    fn drop(&mut self) {
        trace!("Adapter handle dropped");
        let _ = self.command_tx.send(AdapterCommand::Shutdown);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::timeout;

    use crate::adapter::core::tests::{MockBuilder, MockCall};
    use crate::delegate::{ChannelDelegate, SocketEvent};
    use crate::identifiers::Generation;

    const WAIT: Duration = Duration::from_secs(2);

    fn spawn(config: TransportConfig) -> (TransportAdapter, MockBuilder, UnboundedReceiver<SocketEvent>) {
        let builder = MockBuilder::default();
        let (delegate, events) = ChannelDelegate::new();
        let adapter = TransportAdapter::builder()
            .config(config)
            .delegate(delegate)
            .backend_builder(builder.clone())
            .spawn()
            .expect("adapter spawns");
        (adapter, builder, events)
    }

    async fn next(events: &mut UnboundedReceiver<SocketEvent>) -> SocketEvent {
        timeout(WAIT, events.recv())
            .await
            .expect("event within timeout")
            .expect("delegate channel open")
    }

    #[tokio::test]
    async fn test_invalid_url_fails_synchronously() {
        let (adapter, builder, _events) =
            spawn(TransportConfig::new().with_uri("definitely not a url"));

        let err = adapter.connect("ignored", 1, None).unwrap_err();
        assert!(matches!(err, Error::InvalidUrl { .. }));

        adapter.snapshot().await.unwrap();
        assert_eq!(builder.state.lock().built, 0);
        assert_eq!(adapter.phase(), ConnectionPhase::Disconnected);
    }

    #[tokio::test]
    async fn test_invalid_header_fails_synchronously() {
        let (adapter, builder, _events) =
            spawn(TransportConfig::new().with_header("bad header", "x"));

        let err = adapter.connect("127.0.0.1", 8083, None).unwrap_err();
        assert!(matches!(err, Error::InvalidHeader { .. }));

        adapter.snapshot().await.unwrap();
        assert_eq!(builder.state.lock().built, 0);
    }

    #[tokio::test]
    async fn test_round_trip_through_handle() {
        let (adapter, builder, mut events) = spawn(TransportConfig::new());

        adapter.connect("127.0.0.1", 8083, None).unwrap();
        let snapshot = adapter.snapshot().await.unwrap();
        assert_eq!(snapshot.phase, ConnectionPhase::Connecting);
        assert_eq!(snapshot.generation, Generation::new(1));

        builder.sink(0).opened();
        assert!(matches!(next(&mut events).await, SocketEvent::Connected));
        assert!(adapter.is_open());

        adapter.read(3, 11).unwrap();
        builder.sink(0).received_binary(vec![0x20, 0x02, 0x00]);
        match next(&mut events).await {
            SocketEvent::Read { data, tag } => {
                assert_eq!(tag, 11);
                assert_eq!(data, vec![0x20, 0x02, 0x00]);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        adapter.write_text("ping", 12).unwrap();
        adapter.snapshot().await.unwrap();
        assert!(builder.calls().contains(&MockCall::Write(
            Generation::new(1),
            Frame::Text("ping".into()),
            builder.last_write_id(),
        )));

        builder.sink(0).write_complete(builder.last_write_id());
        assert!(matches!(
            next(&mut events).await,
            SocketEvent::WriteComplete { tag: 12 }
        ));
    }

    #[tokio::test]
    async fn test_callback_may_reenter_adapter() {
        let (adapter, builder, mut events) = spawn(TransportConfig::new());

        adapter.connect("127.0.0.1", 8083, None).unwrap();
        adapter.snapshot().await.unwrap();
        builder.sink(0).opened();

        if let SocketEvent::Connected = next(&mut events).await {
            adapter.disconnect().unwrap();
        }

        assert!(matches!(
            next(&mut events).await,
            SocketEvent::Disconnected { error: None }
        ));
        assert_eq!(adapter.phase(), ConnectionPhase::Disconnected);
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_config() {
        let config = TransportConfig::new().with_connect_timeout(Duration::from_millis(1500));
        let (adapter, _builder, _events) = spawn(config);
        assert_eq!(adapter.config().connect_timeout(), Duration::from_millis(1500));

        adapter.connect("127.0.0.1", 8083, None).unwrap();
        adapter
            .connect("127.0.0.1", 8083, Some(Duration::from_millis(10)))
            .unwrap();
        let snapshot = adapter.snapshot().await.unwrap();
        assert_eq!(snapshot.generation, Generation::new(2));
    }

    #[tokio::test]
    async fn test_drop_closes_backend_silently() {
        let (adapter, builder, mut events) = spawn(TransportConfig::new());

        adapter.connect("127.0.0.1", 8083, None).unwrap();
        adapter.snapshot().await.unwrap();
        let sink = builder.sink(0);
        drop(adapter);

        // The delegate channel closes once the notifier task ends.
        let end = timeout(WAIT, events.recv()).await.expect("notifier ends");
        assert!(end.is_none());
        assert!(!sink.is_attached());
        assert!(builder.calls().contains(&MockCall::Disconnect(Generation::new(1))));
    }
}
