//! WebSocket backends.
//!
//! A backend performs the handshake and moves discrete frames. The adapter
//! only ever talks to the [`WebSocketBackend`] command surface and listens
//! through an [`EventSink`].
//!
//! # Variants
//!
//! | Variant | Driver | Used when |
//! |---------|--------|-----------|
//! | [`NativeBackend`] | async `tokio-tungstenite` task | a tokio runtime is reachable (default) |
//! | [`PortableBackend`] | blocking `tungstenite` on an OS thread | no runtime, or selected explicitly |
//!
//! Both variants deliver the same events in the same order and are
//! indistinguishable to the adapter.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Variant selection and construction |
//! | `event` | Event sink and event types |
//! | `native` | Async backend |
//! | `portable` | Thread backend |

// ============================================================================
// Submodules
// ============================================================================

/// Variant selection and construction.
pub mod builder;

/// Backend → adapter events.
pub mod event;

/// Async tokio-tungstenite backend.
pub mod native;

/// Blocking tungstenite backend.
pub mod portable;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderMap;
use url::Url;

use crate::config::ResolvedTarget;
use crate::error::Result;
use crate::identifiers::{Generation, WriteId};
use crate::tls::TrustEvaluator;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{BackendBuilder, ConnectionBuilder};
pub use event::{BackendEvent, BackendMessage, EventSink};
pub use native::NativeBackend;
pub use portable::PortableBackend;

// ============================================================================
// BackendSelection / BackendKind
// ============================================================================

/// Configured backend preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSelection {
    /// Native when a tokio runtime is reachable, portable otherwise.
    #[default]
    Auto,
    /// Always the async backend.
    Native,
    /// Always the thread backend.
    Portable,
}

/// Variant actually chosen for a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// [`NativeBackend`].
    Native,
    /// [`PortableBackend`].
    Portable,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => f.write_str("native"),
            Self::Portable => f.write_str("portable"),
        }
    }
}

// ============================================================================
// BackendDescriptor
// ============================================================================

/// Immutable description of one connection attempt.
#[derive(Debug, Clone)]
pub struct BackendDescriptor {
    /// Chosen variant.
    pub kind: BackendKind,
    /// Attempt generation.
    pub generation: Generation,
    /// Resolved URL.
    pub url: Url,
    /// Handshake headers.
    pub headers: HeaderMap,
    /// Handshake timeout.
    pub connect_timeout: Duration,
}

impl BackendDescriptor {
    /// Returns `true` for `wss` targets.
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }

    /// Builds the HTTP upgrade request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebSocket`](crate::Error::WebSocket) if the URL is not
    /// a valid request target.
    pub fn client_request(&self) -> Result<Request> {
        let mut request = self.url.as_str().into_client_request()?;
        request.headers_mut().extend(self.headers.clone());
        Ok(request)
    }
}

// ============================================================================
// BackendRequest
// ============================================================================

/// Everything a [`BackendBuilder`] needs for one attempt.
#[derive(Clone)]
pub struct BackendRequest {
    /// URL and headers.
    pub target: ResolvedTarget,
    /// Attempt generation.
    pub generation: Generation,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Configured preference.
    pub selection: BackendSelection,
    /// Server trust decision.
    pub trust: Arc<dyn TrustEvaluator>,
}

impl fmt::Debug for BackendRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRequest")
            .field("target", &self.target)
            .field("generation", &self.generation)
            .field("connect_timeout", &self.connect_timeout)
            .field("selection", &self.selection)
            .finish_non_exhaustive()
    }
}

impl BackendRequest {
    /// Freezes the request into a descriptor for `kind`.
    #[must_use]
    pub fn descriptor(&self, kind: BackendKind) -> BackendDescriptor {
        BackendDescriptor {
            kind,
            generation: self.generation,
            url: self.target.url.clone(),
            headers: self.target.headers.clone(),
            connect_timeout: self.connect_timeout,
        }
    }
}

// ============================================================================
// Frame
// ============================================================================

/// Outbound WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl Frame {
    /// Payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Returns `true` for an empty payload.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text.into()),
            Self::Binary(data) => Message::Binary(data.into()),
        }
    }
}

// ============================================================================
// WebSocketBackend
// ============================================================================

/// Command surface shared by every backend.
///
/// None of the methods block. Outcomes are reported through the backend's
/// [`EventSink`].
pub trait WebSocketBackend: Send + fmt::Debug {
    /// Describes the attempt this backend serves.
    fn descriptor(&self) -> &BackendDescriptor;

    /// Starts the handshake. Emits `Opened` or `Closed(Some(_))`.
    fn connect(&mut self);

    /// Requests close. Safe to call more than once.
    fn disconnect(&mut self);

    /// Queues one frame. Emits `WriteComplete` or `WriteFailed`.
    fn write(&mut self, frame: Frame, write_id: WriteId);
}

/// The two production backends.
#[derive(Debug)]
pub enum ConnectionBackend {
    /// Async tokio-tungstenite backend.
    Native(NativeBackend),
    /// Blocking tungstenite backend.
    Portable(PortableBackend),
}

impl ConnectionBackend {
    /// Chosen variant.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Native(_) => BackendKind::Native,
            Self::Portable(_) => BackendKind::Portable,
        }
    }
}

impl WebSocketBackend for ConnectionBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        match self {
            Self::Native(backend) => backend.descriptor(),
            Self::Portable(backend) => backend.descriptor(),
        }
    }

    fn connect(&mut self) {
        match self {
            Self::Native(backend) => backend.connect(),
            Self::Portable(backend) => backend.connect(),
        }
    }

    fn disconnect(&mut self) {
        match self {
            Self::Native(backend) => backend.disconnect(),
            Self::Portable(backend) => backend.disconnect(),
        }
    }

    fn write(&mut self, frame: Frame, write_id: WriteId) {
        match self {
            Self::Native(backend) => backend.write(frame, write_id),
            Self::Portable(backend) => backend.write(frame, write_id),
        }
    }
}

/// Command sent from a backend handle to its driver.
#[derive(Debug)]
pub(crate) enum BackendCommand {
    Write { frame: Frame, write_id: WriteId },
    Close,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::TransportConfig;
    use crate::tls::SystemTrust;

    fn request() -> BackendRequest {
        let target = TransportConfig::new()
            .with_header("X-Room", "hall")
            .resolve("127.0.0.1", 9001)
            .unwrap();
        BackendRequest {
            target,
            generation: Generation::new(2),
            connect_timeout: Duration::from_secs(5),
            selection: BackendSelection::Auto,
            trust: Arc::new(SystemTrust),
        }
    }

    #[test]
    fn test_descriptor_from_request() {
        let descriptor = request().descriptor(BackendKind::Portable);

        assert_eq!(descriptor.kind, BackendKind::Portable);
        assert_eq!(descriptor.generation, Generation::new(2));
        assert!(!descriptor.is_secure());
        assert_eq!(descriptor.url.as_str(), "ws://127.0.0.1:9001/mqtt");
    }

    #[test]
    fn test_client_request_carries_headers() {
        let descriptor = request().descriptor(BackendKind::Native);
        let request = descriptor.client_request().unwrap();

        assert_eq!(request.uri().to_string(), "ws://127.0.0.1:9001/mqtt");
        assert_eq!(request.headers().get("x-room").unwrap(), "hall");
        assert_eq!(request.headers().get("sec-websocket-protocol").unwrap(), "mqtt");
    }

    #[test]
    fn test_frame_into_message() {
        assert_eq!(Frame::Binary(vec![1, 2]).len(), 2);
        assert!(Frame::Text(String::new()).is_empty());
        assert!(matches!(
            Frame::Binary(vec![9]).into_message(),
            Message::Binary(ref b) if b.to_vec() == vec![9]
        ));
        assert!(matches!(
            Frame::Text("hi".into()).into_message(),
            Message::Text(ref t) if t.as_str() == "hi"
        ));
    }

    #[test]
    fn test_selection_serde() {
        let parsed: BackendSelection = serde_json::from_str("\"native\"").unwrap();
        assert_eq!(parsed, BackendSelection::Native);
        assert_eq!(BackendKind::Portable.to_string(), "portable");
    }
}
