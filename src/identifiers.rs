//! Type-safe identifiers used inside the adapter.
//!
//! Newtype wrappers keep backend generations and write correlation ids
//! from being mixed up with caller-supplied tags.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// Generation
// ============================================================================

/// Connection attempt counter.
///
/// Incremented by the adapter for every backend it creates. Events from a
/// backend whose generation is no longer current are discarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    /// Creates a generation from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the following generation.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

// ============================================================================
// WriteId
// ============================================================================

/// Correlates a backend write completion with the caller's tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WriteId(u64);

impl WriteId {
    /// Creates a write id from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WriteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "write-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
