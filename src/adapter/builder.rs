//! Builder pattern for adapter configuration.
//!
//! # Example
//!
//! ```no_run
//! use mqtt_ws_socket::{BackendSelection, ChannelDelegate, TransportAdapter, TransportConfig};
//!
//! # fn example() -> mqtt_ws_socket::Result<()> {
//! let (delegate, _events) = ChannelDelegate::new();
//! let adapter = TransportAdapter::builder()
//!     .config(
//!         TransportConfig::new()
//!             .with_tls()
//!             .with_backend(BackendSelection::Portable),
//!     )
//!     .delegate(delegate)
//!     .spawn()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::{BackendBuilder, ConnectionBuilder};
use crate::config::TransportConfig;
use crate::delegate::{Notifier, SocketDelegate};
use crate::error::{Error, Result};
use crate::tls::{AcceptAnyCertificate, SystemTrust, TrustEvaluator};

use super::core::{AdapterTask, ConnectionPhase};
use super::handle::TransportAdapter;

// ============================================================================
// AdapterBuilder
// ============================================================================

/// Builder for a [`TransportAdapter`].
///
/// Use [`TransportAdapter::builder()`] to create one.
#[derive(Default)]
pub struct AdapterBuilder {
    /// Transport configuration.
    config: TransportConfig,
    /// Callback receiver. Required.
    delegate: Option<Arc<dyn SocketDelegate>>,
    /// Backend factory. [`ConnectionBuilder`] when unset.
    backend_builder: Option<Arc<dyn BackendBuilder>>,
    /// TLS trust policy. Derived from the config when unset.
    trust: Option<Arc<dyn TrustEvaluator>>,
    /// Runtime for the adapter task and native backends.
    runtime: Option<Handle>,
    /// Runtime delegate callbacks run on.
    notify_runtime: Option<Handle>,
}

impl fmt::Debug for AdapterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterBuilder")
            .field("config", &self.config)
            .field("delegate", &self.delegate.is_some())
            .field("backend_builder", &self.backend_builder.is_some())
            .field("trust", &self.trust.is_some())
            .field("runtime", &self.runtime.is_some())
            .field("notify_runtime", &self.notify_runtime.is_some())
            .finish()
    }
}

// ============================================================================
// AdapterBuilder Implementation
// ============================================================================

impl AdapterBuilder {
    /// Creates a builder with default configuration and no delegate.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transport configuration.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the callback receiver.
    #[inline]
    #[must_use]
    pub fn delegate(mut self, delegate: impl SocketDelegate + 'static) -> Self {
        self.delegate = Some(Arc::new(delegate));
        self
    }

    /// Sets an already shared callback receiver.
    #[inline]
    #[must_use]
    pub fn shared_delegate(mut self, delegate: Arc<dyn SocketDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Replaces the backend factory.
    #[inline]
    #[must_use]
    pub fn backend_builder(mut self, builder: impl BackendBuilder + 'static) -> Self {
        self.backend_builder = Some(Arc::new(builder));
        self
    }

    /// Sets the TLS trust policy, overriding the configuration.
    #[inline]
    #[must_use]
    pub fn trust_evaluator(mut self, evaluator: impl TrustEvaluator + 'static) -> Self {
        self.trust = Some(Arc::new(evaluator));
        self
    }

    /// Runs the adapter task on `runtime` instead of the current one.
    #[inline]
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Runs delegate callbacks on `runtime`.
    ///
    /// Defaults to the adapter runtime.
    #[inline]
    #[must_use]
    pub fn notify_on(mut self, runtime: Handle) -> Self {
        self.notify_runtime = Some(runtime);
        self
    }

    /// Spawns the adapter task and returns its handle.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no delegate is set
    /// - [`Error::Config`] if no runtime is set and none is current
    pub fn spawn(self) -> Result<TransportAdapter> {
        let delegate = self.delegate.ok_or_else(|| {
            Error::config(
                "A socket delegate is required. Use .delegate() to set it.\n\
                 Example: TransportAdapter::builder().delegate(ChannelDelegate::new().0)",
            )
        })?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| {
                Error::config(
                    "No tokio runtime available. Call spawn() inside a runtime or use .runtime().",
                )
            })?,
        };
        let notify_runtime = self.notify_runtime.unwrap_or_else(|| runtime.clone());

        let trust: Arc<dyn TrustEvaluator> = match self.trust {
            Some(trust) => trust,
            None if self.config.allow_untrusted_certificates => {
                warn!("Certificate validation disabled; any server certificate is accepted");
                Arc::new(AcceptAnyCertificate)
            }
            None => Arc::new(SystemTrust),
        };

        let backend_builder: Arc<dyn BackendBuilder> = self
            .backend_builder
            .unwrap_or_else(|| Arc::new(ConnectionBuilder::with_runtime(runtime.clone())));

        let config = Arc::new(self.config);
        let phase = Arc::new(RwLock::new(ConnectionPhase::Disconnected));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let notifier = Notifier::spawn(delegate, &notify_runtime);
        let task = AdapterTask::new(
            config.backend,
            backend_builder,
            trust,
            notifier,
            Arc::clone(&phase),
            event_tx,
        );
        runtime.spawn(task.run(command_rx, event_rx));

        debug!(backend = ?config.backend, tls = config.enable_tls, "Adapter spawned");

        Ok(TransportAdapter::from_parts(config, command_tx, phase))
    }
}

// ============================================================================
// Tests
// ============================================================================
