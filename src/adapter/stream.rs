//! Stream emulation state: receive buffer and read queue.
//!
//! Frames are appended to the tail of the [`ReceiveBuffer`]; the oldest
//! [`ReadRequest`] is satisfied from the head as soon as enough bytes are
//! buffered. Resolution stops at the first request that cannot be
//! satisfied, so a short request queued behind a long one waits.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

// ============================================================================
// ReadRequest
// ============================================================================

/// Demand for exactly `length` next bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    /// Caller tag, echoed on delivery.
    pub tag: i64,
    /// Exact number of bytes to deliver.
    pub length: usize,
    /// Enqueue order.
    pub sequence: u64,
}

/// A satisfied read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRead {
    /// The request that was satisfied.
    pub request: ReadRequest,
    /// Exactly `request.length` bytes.
    pub data: Vec<u8>,
}

// ============================================================================
// ReceiveBuffer
// ============================================================================

/// Append-at-tail, consume-at-head byte buffer.
///
/// Taking `n` bytes from the head costs O(n) regardless of how much is
/// buffered behind them.
#[derive(Debug, Default)]
pub struct ReceiveBuffer {
    bytes: VecDeque<u8>,
}

impl ReceiveBuffer {
    /// Appends bytes in arrival order.
    #[inline]
    pub fn append(&mut self, data: &[u8]) {
        self.bytes.extend(data);
    }

    /// Number of buffered bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if nothing is buffered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Removes and returns the first `n` bytes, or `None` if fewer are
    /// buffered.
    pub fn take_front(&mut self, n: usize) -> Option<Vec<u8>> {
        if n > self.bytes.len() {
            return None;
        }
        Some(self.bytes.drain(..n).collect())
    }

    /// Drops everything.
    #[inline]
    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

// ============================================================================
// StreamState
// ============================================================================

/// Buffer plus FIFO of pending reads for one connection attempt.
#[derive(Debug, Default)]
pub struct StreamState {
    buffer: ReceiveBuffer,
    reads: VecDeque<ReadRequest>,
    next_sequence: u64,
}

impl StreamState {
    /// Creates empty state.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a read and returns its sequence number.
    pub fn schedule_read(&mut self, length: usize, tag: i64) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.reads.push_back(ReadRequest {
            tag,
            length,
            sequence,
        });
        sequence
    }

    /// Appends an inbound payload.
    #[inline]
    pub fn append(&mut self, data: &[u8]) {
        self.buffer.append(data);
    }

    /// Resolves pending reads oldest first, stopping at the first one the
    /// buffer cannot satisfy.
    pub fn drain_ready(&mut self) -> Vec<CompletedRead> {
        let mut completed = Vec::new();

        while let Some(front) = self.reads.front() {
            let Some(data) = self.buffer.take_front(front.length) else {
                break;
            };
            if let Some(request) = self.reads.pop_front() {
                completed.push(CompletedRead { request, data });
            }
        }

        completed
    }

    /// Drops buffered bytes and pending reads.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.reads.clear();
    }

    /// Number of buffered bytes.
    #[inline]
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of pending reads.
    #[inline]
    #[must_use]
    pub fn pending_reads(&self) -> usize {
        self.reads.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
