//! Adapter → protocol engine callbacks.
//!
//! The protocol engine implements [`SocketDelegate`]. Callbacks run on the
//! adapter's notification task, strictly in order and only after the
//! adapter has finished updating its own state, so a callback may call
//! straight back into the adapter (for example `disconnect()`).
//!
//! [`ChannelDelegate`] bridges the callbacks into an async stream of
//! [`SocketEvent`]s for engines that prefer to `await`.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::Error;

// ============================================================================
// SocketDelegate
// ============================================================================

/// Byte-stream socket callbacks consumed by the protocol engine.
pub trait SocketDelegate: Send + Sync {
    /// The WebSocket is open; reads and writes may flow.
    fn on_connected(&self);

    /// A scheduled read completed with exactly the requested length.
    fn on_read(&self, data: Vec<u8>, tag: i64);

    /// The write with `tag` reached the socket.
    fn on_write_complete(&self, tag: i64);

    /// The write with `tag` was refused without touching the connection.
    fn on_write_failed(&self, tag: i64, error: Error) {
        warn!(tag, %error, "Write failed");
    }

    /// The connection ended. `None` for an orderly close.
    fn on_disconnected(&self, error: Option<Error>);
}

// ============================================================================
// SocketEvent
// ============================================================================

/// One delegate callback as a value.
#[derive(Debug)]
pub enum SocketEvent {
    /// See [`SocketDelegate::on_connected`].
    Connected,
    /// See [`SocketDelegate::on_read`].
    Read {
        /// Delivered bytes.
        data: Vec<u8>,
        /// Caller tag.
        tag: i64,
    },
    /// See [`SocketDelegate::on_write_complete`].
    WriteComplete {
        /// Caller tag.
        tag: i64,
    },
    /// See [`SocketDelegate::on_write_failed`].
    WriteFailed {
        /// Caller tag.
        tag: i64,
        /// Why it failed.
        error: Error,
    },
    /// See [`SocketDelegate::on_disconnected`].
    Disconnected {
        /// Failure, if any.
        error: Option<Error>,
    },
}

impl SocketEvent {
    /// Invokes the matching delegate method.
    pub fn dispatch(self, delegate: &dyn SocketDelegate) {
        match self {
            Self::Connected => delegate.on_connected(),
            Self::Read { data, tag } => delegate.on_read(data, tag),
            Self::WriteComplete { tag } => delegate.on_write_complete(tag),
            Self::WriteFailed { tag, error } => delegate.on_write_failed(tag, error),
            Self::Disconnected { error } => delegate.on_disconnected(error),
        }
    }
}

// ============================================================================
// ChannelDelegate
// ============================================================================

/// Delegate forwarding every callback into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelDelegate {
    tx: mpsc::UnboundedSender<SocketEvent>,
}

impl ChannelDelegate {
    /// Creates the delegate and the receiving end.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SocketEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: SocketEvent) {
        if self.tx.send(event).is_err() {
            trace!("Socket event receiver dropped");
        }
    }
}

impl SocketDelegate for ChannelDelegate {
    fn on_connected(&self) {
        self.forward(SocketEvent::Connected);
    }

    fn on_read(&self, data: Vec<u8>, tag: i64) {
        self.forward(SocketEvent::Read { data, tag });
    }

    fn on_write_complete(&self, tag: i64) {
        self.forward(SocketEvent::WriteComplete { tag });
    }

    fn on_write_failed(&self, tag: i64, error: Error) {
        self.forward(SocketEvent::WriteFailed { tag, error });
    }

    fn on_disconnected(&self, error: Option<Error>) {
        self.forward(SocketEvent::Disconnected { error });
    }
}

// ============================================================================
// Notifier
// ============================================================================

/// Queue feeding the notification task.
#[derive(Debug, Clone)]
pub(crate) struct Notifier {
    tx: mpsc::UnboundedSender<SocketEvent>,
}

impl Notifier {
    /// Spawns the notification task on `runtime`.
    pub(crate) fn spawn(delegate: Arc<dyn SocketDelegate>, runtime: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SocketEvent>();

        runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                event.dispatch(delegate.as_ref());
            }
            trace!("Notification task terminated");
        });

        Self { tx }
    }

    /// Wraps an existing queue.
    #[cfg(test)]
    pub(crate) fn from_sender(tx: mpsc::UnboundedSender<SocketEvent>) -> Self {
        Self { tx }
    }

    pub(crate) fn notify(&self, event: SocketEvent) {
        if self.tx.send(event).is_err() {
            trace!("Notification task gone");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::time::timeout;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl SocketDelegate for Recorder {
        fn on_connected(&self) {
            self.calls.lock().push("connected".into());
        }

        fn on_read(&self, data: Vec<u8>, tag: i64) {
            self.calls.lock().push(format!("read:{tag}:{}", data.len()));
        }

        fn on_write_complete(&self, tag: i64) {
            self.calls.lock().push(format!("written:{tag}"));
        }

        fn on_disconnected(&self, error: Option<Error>) {
            self.calls.lock().push(format!("disconnected:{}", error.is_some()));
        }
    }

    #[test]
    fn test_dispatch_routes_to_methods() {
        let recorder = Recorder::default();

        SocketEvent::Connected.dispatch(&recorder);
        SocketEvent::Read {
            data: vec![1, 2],
            tag: 7,
        }
        .dispatch(&recorder);
        SocketEvent::WriteComplete { tag: 3 }.dispatch(&recorder);
        SocketEvent::WriteFailed {
            tag: 4,
            error: Error::NotConnected,
        }
        .dispatch(&recorder);
        SocketEvent::Disconnected { error: None }.dispatch(&recorder);

        assert_eq!(
            *recorder.calls.lock(),
            vec!["connected", "read:7:2", "written:3", "disconnected:false"]
        );
    }

    #[tokio::test]
    async fn test_channel_delegate_forwards() {
        let (delegate, mut rx) = ChannelDelegate::new();

        delegate.on_read(vec![5], 1);
        delegate.on_write_failed(2, Error::NotConnected);

        assert!(matches!(rx.recv().await, Some(SocketEvent::Read { tag: 1, .. })));
        assert!(matches!(
            rx.recv().await,
            Some(SocketEvent::WriteFailed { tag: 2, error: Error::NotConnected })
        ));
    }

    #[tokio::test]
    async fn test_notifier_preserves_order() {
        let (delegate, mut rx) = ChannelDelegate::new();
        let notifier = Notifier::spawn(Arc::new(delegate), &Handle::current());

        for tag in 0..16 {
            notifier.notify(SocketEvent::WriteComplete { tag });
        }

        for expected in 0..16 {
            let event = timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("event within timeout");
            assert!(matches!(event, Some(SocketEvent::WriteComplete { tag }) if tag == expected));
        }
    }
}
