//! Error types for the sequencer and the push-protocol surfaces.
//!
//! The three conditions callers need to branch on are deliberately
//! *separate types*, so `match` is enough to tell them apart:
//!
//! - [`InsufficientCapacity`]: a non-blocking claim found no room. Expected,
//!   non-fatal; callers retry or back off.
//! - [`Alerted`]: a cooperative cancellation unwound a wait. Not an error;
//!   callers stop cleanly without touching any error sink.
//! - [`QueueError`] / [`SharedError`]: real failures, delivered at most once
//!   through the terminal `on_error` channel.
//!
//! Configuration mistakes (zero or non-power-of-two buffer sizes, calling a
//! read-mode operation on a write-mode queue) are programmer errors and
//! panic at the call site instead of returning one of these.

use std::sync::Arc;

use thiserror::Error;

/// Cloneable error payload carried by the push protocol.
///
/// Terminal causes are multicast to every fan-out child, so the payload has
/// to be shareable; an `Arc` keeps delivery an O(1) refcount bump.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// A non-blocking claim or offer found the ring full.
///
/// This is an expected condition, distinct from any data error: the caller
/// decides whether to retry, back off, or drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("insufficient capacity")]
pub struct InsufficientCapacity;

/// A blocked wait was unwound by a cooperative cancellation signal.
///
/// Alerts are checked on every wait-loop iteration; once asserted, waiting
/// operations return this promptly so callers can release upstream resources
/// without treating shutdown as failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("alerted")]
pub struct Alerted;

/// Failures surfaced by the blocking-queue bridge.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// The upstream terminated with an error; the cause is latched and
    /// returned to every subsequent blocking read.
    #[error("queue terminated with error: {0}")]
    Errored(SharedError),

    /// The upstream completed and the staging store is drained.
    #[error("queue completed")]
    Completed,

    /// An element arrived beyond the demand this queue granted upstream.
    #[error("capacity exceeded: element arrived without outstanding demand")]
    CapacityExceeded,
}

impl QueueError {
    /// Returns true if this is the clean-completion case.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns the latched terminal cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&SharedError> {
        match self {
            Self::Errored(e) => Some(e),
            _ => None,
        }
    }
}
