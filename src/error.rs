//! Error types for the WebSocket socket adapter.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! Synchronous failures (URL synthesis, header validation) are returned
//! directly from [`TransportAdapter::connect`]. Every asynchronous failure
//! is delivered exactly once through
//! [`SocketDelegate::on_disconnected`] or
//! [`SocketDelegate::on_write_failed`].
//!
//! ```ignore
//! use mqtt_ws_socket::{Error, Result};
//!
//! fn example(adapter: &TransportAdapter) -> Result<()> {
//!     adapter.connect("broker.local", 8083, None)?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidUrl`], [`Error::InvalidHeader`] |
//! | Connection | [`Error::Transport`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::NotConnected`] |
//! | Trust | [`Error::TrustEvaluation`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |
//!
//! [`TransportAdapter::connect`]: crate::TransportAdapter::connect
//! [`SocketDelegate::on_disconnected`]: crate::SocketDelegate::on_disconnected
//! [`SocketDelegate::on_write_failed`]: crate::SocketDelegate::on_write_failed

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when adapter configuration is incomplete or inconsistent.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Target URL could not be synthesized.
    ///
    /// Reported synchronously by `connect()`; no backend is constructed.
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl {
        /// The URL (or URL fragments) that failed to parse.
        url: String,
        /// Parser diagnostic.
        message: String,
    },

    /// Handshake header cannot be sent.
    #[error("Invalid header '{name}': {message}")]
    InvalidHeader {
        /// Header name as configured.
        name: String,
        /// Why the header was rejected.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Backend open, write or close failure.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// Handshake did not finish within the connect timeout.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection closed by the remote end or the adapter shut down.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation requires an open connection.
    #[error("Not connected")]
    NotConnected,

    // ========================================================================
    // Trust Errors
    // ========================================================================
    /// TLS server trust was rejected.
    ///
    /// The connection never reaches `Open`.
    #[error("TLS trust evaluation failed for {server}: {reason}")]
    TrustEvaluation {
        /// Server name presented in the handshake.
        server: String,
        /// Why the evaluator rejected the chain.
        reason: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON (configuration) error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid URL error.
    #[inline]
    pub fn invalid_url(url: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Creates an invalid header error.
    #[inline]
    pub fn invalid_header(name: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidHeader {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a trust evaluation error.
    #[inline]
    pub fn trust_evaluation(server: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TrustEvaluation {
            server: server.into(),
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection-level error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::NotConnected
                | Self::TrustEvaluation { .. }
                | Self::WebSocket(_)
                | Self::Io(_)
        )
    }

    /// Returns `true` if this error came from the TLS trust decision.
    #[inline]
    #[must_use]
    pub fn is_trust_failure(&self) -> bool {
        matches!(self, Self::TrustEvaluation { .. })
    }

    /// Returns `true` if reconnecting may succeed.
    ///
    /// The adapter never retries by itself; this only informs the owner.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::NotConnected
                | Self::WebSocket(_)
                | Self::Io(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
