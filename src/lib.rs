//! MQTT over WebSocket - byte-stream socket emulation.
//!
//! MQTT engines speak a byte stream: read exactly N bytes, write a buffer.
//! Brokers reachable only through HTTP infrastructure speak WebSocket
//! frames. This crate sits in between and makes a WebSocket connection
//! look like a socket.
//!
//! # Architecture
//!
//! - **Adapter**: a single task owns the receive buffer, the FIFO of
//!   pending reads and the connection phase
//! - **Backends**: a native async client (tokio-tungstenite) or a portable
//!   blocking client on its own thread, behind one trait
//! - **Delegate**: results come back as callbacks, dispatched after the
//!   adapter has finished updating its state
//!
//! Every `connect()` tears the previous backend down first. Events from a
//! backend that has been torn down never reach the delegate.
//!
//! # Quick Start
//!
//! ```no_run
//! use mqtt_ws_socket::{ChannelDelegate, Result, SocketEvent, TransportAdapter, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (delegate, mut events) = ChannelDelegate::new();
//!     let adapter = TransportAdapter::new(TransportConfig::new().with_tls(), delegate)?;
//!
//!     // wss://broker.example.com:443/mqtt with Sec-WebSocket-Protocol: mqtt
//!     adapter.connect("broker.example.com", 443, None)?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             SocketEvent::Connected => {
//!                 adapter.write(vec![0x10, 0x00], 1)?;
//!                 adapter.read(2, 2)?;
//!             }
//!             SocketEvent::Read { data, tag } => println!("read {tag}: {data:?}"),
//!             SocketEvent::Disconnected { error } => {
//!                 println!("disconnected: {error:?}");
//!                 break;
//!             }
//!             _ => {}
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapter`] | [`TransportAdapter`] and its builder |
//! | [`backend`] | WebSocket backends and their factory |
//! | [`config`] | [`TransportConfig`] and URL synthesis |
//! | [`delegate`] | [`SocketDelegate`] callbacks |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Generation and write counters |
//! | [`tls`] | Server trust evaluation |

// ============================================================================
// Modules
// ============================================================================

/// Socket emulation: adapter handle, task and read queue.
pub mod adapter;

/// WebSocket backends.
///
/// Two interchangeable clients behind [`WebSocketBackend`], built by a
/// [`BackendBuilder`].
pub mod backend;

/// Transport configuration.
pub mod config;

/// Callbacks towards the protocol engine.
pub mod delegate;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe counters.
pub mod identifiers;

/// TLS server trust.
pub mod tls;

// ============================================================================
// Re-exports
// ============================================================================

// Adapter types
pub use adapter::{
    AdapterBuilder, ConnectionPhase, ReadRequest, StreamSnapshot, StreamState, TransportAdapter,
};

// Backend types
pub use backend::{
    BackendBuilder, BackendDescriptor, BackendEvent, BackendKind, BackendRequest,
    BackendSelection, ConnectionBackend, ConnectionBuilder, EventSink, Frame, WebSocketBackend,
};

// Configuration types
pub use config::{ResolvedTarget, TransportConfig};

// Delegate types
pub use delegate::{ChannelDelegate, SocketDelegate, SocketEvent};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{Generation, WriteId};

// Trust types
pub use tls::{AcceptAnyCertificate, SystemTrust, TrustChallenge, TrustDecision, TrustEvaluator};
