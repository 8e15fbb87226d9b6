//! Backend selection and construction.
//!
//! [`BackendBuilder`] is the seam the adapter builds backends through;
//! [`ConnectionBuilder`] is the production implementation. Tests replace
//! it with a builder returning mock backends.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::debug;

use crate::error::{Error, Result};

use super::{
    BackendKind, BackendRequest, BackendSelection, ConnectionBackend, EventSink, NativeBackend,
    PortableBackend, WebSocketBackend,
};

// ============================================================================
// BackendBuilder
// ============================================================================

/// Creates one backend per connection attempt.
pub trait BackendBuilder: Send + Sync {
    /// Builds an idle backend bound to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the requested variant is unavailable.
    fn build(&self, request: BackendRequest, sink: EventSink) -> Result<Box<dyn WebSocketBackend>>;
}

// ============================================================================
// ConnectionBuilder
// ============================================================================

/// Production builder choosing between the two variants.
#[derive(Debug, Default, Clone)]
pub struct ConnectionBuilder {
    /// Runtime for native backends; the caller's runtime when `None`.
    runtime: Option<Handle>,
}

impl ConnectionBuilder {
    /// Creates a builder using the ambient tokio runtime.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder spawning native backends on `runtime`.
    #[inline]
    #[must_use]
    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            runtime: Some(runtime),
        }
    }

    /// Resolves a preference to a concrete variant.
    #[must_use]
    pub fn select(&self, selection: BackendSelection) -> BackendKind {
        match selection {
            BackendSelection::Native => BackendKind::Native,
            BackendSelection::Portable => BackendKind::Portable,
            BackendSelection::Auto => {
                if self.runtime_handle().is_some() {
                    BackendKind::Native
                } else {
                    BackendKind::Portable
                }
            }
        }
    }

    /// Builds the concrete backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the native variant is requested without
    /// a reachable tokio runtime.
    pub fn build_backend(
        &self,
        request: BackendRequest,
        sink: EventSink,
    ) -> Result<ConnectionBackend> {
        let kind = self.select(request.selection);
        let descriptor = request.descriptor(kind);
        let trust = Arc::clone(&request.trust);

        debug!(
            generation = %descriptor.generation,
            %kind,
            url = %descriptor.url,
            "Building backend"
        );

        match kind {
            BackendKind::Native => {
                let runtime = self.runtime_handle().ok_or_else(|| {
                    Error::config("native backend requires a tokio runtime")
                })?;
                Ok(ConnectionBackend::Native(NativeBackend::new(
                    descriptor, sink, trust, runtime,
                )))
            }
            BackendKind::Portable => Ok(ConnectionBackend::Portable(PortableBackend::new(
                descriptor, sink, trust,
            ))),
        }
    }

    fn runtime_handle(&self) -> Option<Handle> {
        self.runtime.clone().or_else(|| Handle::try_current().ok())
    }
}

impl BackendBuilder for ConnectionBuilder {
    fn build(&self, request: BackendRequest, sink: EventSink) -> Result<Box<dyn WebSocketBackend>> {
        Ok(Box::new(self.build_backend(request, sink)?))
    }
}

// ============================================================================
// Tests
// ============================================================================
