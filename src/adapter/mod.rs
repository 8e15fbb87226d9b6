//! Socket emulation over a WebSocket backend.
//!
//! The protocol engine sees a byte stream: it schedules reads of an exact
//! length and writes opaque buffers. The adapter turns that contract into
//! WebSocket frames and back.
//!
//! ```text
//! ┌──────────────────┐ commands ┌──────────────┐  BackendEvent  ┌─────────────┐
//! │ TransportAdapter │─────────►│ AdapterTask  │◄───────────────│   Backend   │
//! │     (handle)     │          │ buffer, read │   (EventSink)  │ Native or   │
//! └──────────────────┘          │ queue, phase │───────────────►│ Portable    │
//!          ▲                    └──────┬───────┘  write/close   └─────────────┘
//!          │   SocketDelegate          │ SocketEvent
//!          └────────────────────── Notifier task
//! ```
//!
//! | Phase | Left by |
//! |-------|---------|
//! | `Disconnected` | `connect()` |
//! | `Connecting` | open event, close event, `disconnect()`, `connect()` |
//! | `Open` | close event, write failure, `disconnect()`, `connect()` |
//! | `Closing` | teardown finishing |

// ============================================================================
// Submodules
// ============================================================================

/// Adapter builder.
pub mod builder;

/// Adapter task.
mod core;

/// Public handle.
mod handle;

/// Receive buffer and read queue.
pub mod stream;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::AdapterBuilder;
pub use core::{ConnectionPhase, StreamSnapshot};
pub use handle::TransportAdapter;
pub use stream::{CompletedRead, ReadRequest, ReceiveBuffer, StreamState};
