//! Padded monotonic sequence counters.
//!
//! A [`Sequence`] tracks a position in an unbounded virtual stream of slots.
//! Each counter occupies its own cache line so independently-updated
//! sequences (the producer cursor, each consumer's gating sequence) never
//! false-share.
//!
//! Ownership discipline: a sequence is mutated by exactly one conceptual
//! owner at a time (the producer side for the cursor, a single consumer for
//! a gating sequence) but read concurrently by many. Values are
//! non-decreasing over the sequence's lifetime.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam_utils::CachePadded;

/// Starting point for every cursor and gating sequence: nothing produced or
/// consumed yet.
pub const INITIAL_CURSOR_VALUE: i64 = -1;

/// A cache-line-padded monotonic counter.
#[derive(Debug)]
pub struct Sequence {
    value: CachePadded<AtomicI64>,
}

impl Sequence {
    /// Creates a sequence with the given initial value.
    #[must_use]
    pub fn new(initial: i64) -> Self {
        Self {
            value: CachePadded::new(AtomicI64::new(initial)),
        }
    }

    /// Reads the current value (Acquire).
    #[inline]
    #[must_use]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Stores a new value (Release).
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Atomically replaces `expected` with `new`.
    ///
    /// Returns true if the exchange happened.
    #[inline]
    pub fn compare_and_set(&self, expected: i64, new: i64) -> bool {
        self.value
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Atomically increments and returns the new value.
    #[inline]
    pub fn increment_and_get(&self) -> i64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(INITIAL_CURSOR_VALUE)
    }
}

/// Returns the minimum value across `sequences`, capped by `default`.
///
/// With an empty slice this is just `default` — the convention used for
/// gating: no registered consumers means producers are gated by the cursor
/// itself.
#[must_use]
pub fn minimum_sequence(sequences: &[Arc<Sequence>], default: i64) -> i64 {
    sequences.iter().fold(default, |min, s| min.min(s.get()))
}

/// Copy-on-write set of gating sequences.
///
/// Producers read the set on every capacity check, so reads must be
/// wait-free and never observe a partially-updated set; attach/detach are
/// rare and pay the copy.
#[derive(Debug, Default)]
pub struct GatingSequences {
    inner: ArcSwap<Vec<Arc<Sequence>>>,
}

impl GatingSequences {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Atomically appends `sequences` to the set.
    pub fn add(&self, sequences: &[Arc<Sequence>]) {
        self.inner.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + sequences.len());
            next.extend(current.iter().cloned());
            next.extend(sequences.iter().cloned());
            next
        });
    }

    /// Atomically removes `sequence` (identity, not value).
    ///
    /// Returns whether the sequence was present.
    pub fn remove(&self, sequence: &Arc<Sequence>) -> bool {
        loop {
            let current = self.inner.load_full();
            let Some(pos) = current.iter().position(|s| Arc::ptr_eq(s, sequence)) else {
                return false;
            };
            let mut next = (*current).clone();
            next.remove(pos);
            let prev = self.inner.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&prev, &current) {
                return true;
            }
        }
    }

    /// Minimum over the set, or `default` when empty.
    #[must_use]
    pub fn minimum(&self, default: i64) -> i64 {
        let guard = self.inner.load();
        minimum_sequence(guard.as_slice(), default)
    }

    /// Number of registered sequences.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    /// Returns true if no sequences are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.load().is_empty()
    }
}
