//! Claim/publish coordination over a fixed-capacity ring of slots.
//!
//! A [`Sequencer`] grants producers exclusive, non-overlapping slot indices
//! and publishes them for consumers to observe, without overrunning the
//! slowest registered gating sequence. Two variants share one contract:
//!
//! - [`SingleProducerSequencer`]: claims are already ordered, so no CAS is
//!   needed and publishing is a single cursor store.
//! - [`MultiProducerSequencer`]: slots are claimed with a CAS on the cursor;
//!   producers may *complete* out of order, so each slot carries an
//!   independent availability marker and consumers only ever observe a
//!   contiguous published prefix.
//!
//! Capacity invariant upheld by every claim:
//! `claimed - min(gating sequences) < buffer_size`, i.e. no slot a consumer
//! has not yet read is ever overwritten.
//!
//! Blocking claims wait through the configured [`WaitStrategy`] and observe
//! a cooperative shutdown flag, returning [`Alerted`] rather than an error
//! when it trips.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use crate::error::{Alerted, InsufficientCapacity};
use crate::sequence::{GatingSequences, Sequence, INITIAL_CURSOR_VALUE};
use crate::wait::WaitStrategy;

/// Producer coordination variant, selected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProducerMode {
    /// Exactly one producer thread; claims need no CAS.
    #[default]
    Single,
    /// Any number of producer threads; claims CAS the cursor and publishes
    /// may complete out of order.
    Multi,
}

/// The claim/publish contract shared by both producer variants.
pub trait Sequencer: Send + Sync {
    /// Ring capacity in slots (a power of two, fixed at construction).
    fn buffer_size(&self) -> usize;

    /// The cursor sequence owned by this sequencer.
    fn cursor(&self) -> Arc<Sequence>;

    /// The wait strategy shared with barriers built on this sequencer.
    fn wait_strategy(&self) -> Arc<dyn WaitStrategy>;

    /// Claims a specific sequence. Only for initialising a ring to a known
    /// position before any normal claims are made.
    fn claim(&self, sequence: i64);

    /// Claims the next slot, blocking (via the wait strategy) until capacity
    /// is available.
    ///
    /// # Errors
    ///
    /// Returns [`Alerted`] if the shutdown flag trips while waiting.
    fn next(&self) -> Result<i64, Alerted> {
        self.next_n(1)
    }

    /// Claims the next `n` slots, blocking until capacity is available.
    /// Returns the highest claimed sequence; the batch spans
    /// `returned - (n - 1) ..= returned`.
    ///
    /// # Errors
    ///
    /// Returns [`Alerted`] if the shutdown flag trips while waiting.
    fn next_n(&self, n: i64) -> Result<i64, Alerted>;

    /// Non-blocking claim of the next slot.
    ///
    /// # Errors
    ///
    /// Returns [`InsufficientCapacity`] immediately if the ring is full.
    fn try_next(&self) -> Result<i64, InsufficientCapacity> {
        self.try_next_n(1)
    }

    /// Non-blocking claim of the next `n` slots.
    ///
    /// # Errors
    ///
    /// Returns [`InsufficientCapacity`] immediately if fewer than `n` slots
    /// are free.
    fn try_next_n(&self, n: i64) -> Result<i64, InsufficientCapacity>;

    /// Makes a claimed, written slot visible to consumers.
    fn publish(&self, sequence: i64);

    /// Makes the claimed batch `lo..=hi` visible to consumers.
    fn publish_range(&self, lo: i64, hi: i64);

    /// Whether `sequence` has been published; non-blocking.
    fn is_available(&self, sequence: i64) -> bool;

    /// Highest sequence in `next_sequence..=available_sequence` such that
    /// every sequence up to it is published. Returns `next_sequence - 1`
    /// when nothing at or above `next_sequence` is ready.
    fn highest_published_sequence(&self, next_sequence: i64, available_sequence: i64) -> i64;

    /// Atomically adds consumer gating sequences producers must not overrun.
    fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]);

    /// Atomically removes a gating sequence; returns whether it was present.
    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool;

    /// Minimum over all gating sequences, or the cursor value if none are
    /// registered (no consumers yet: producers are not gated).
    fn minimum_sequence(&self) -> i64;

    /// Free slots right now. Advisory: valid only at the instant of the
    /// call under concurrent modification.
    fn remaining_capacity(&self) -> i64;

    /// Free slots according to the cached gating view, without re-reading
    /// every gating sequence. Advisory.
    fn cached_remaining_capacity(&self) -> i64;

    /// Whether `required` slots could be claimed right now. Advisory.
    fn has_available_capacity(&self, required: usize) -> bool;
}

/// Builds the sequencer variant for `mode`.
///
/// # Panics
///
/// Panics if `buffer_size` is zero or not a power of two.
#[must_use]
pub fn sequencer(
    mode: ProducerMode,
    buffer_size: usize,
    wait_strategy: Arc<dyn WaitStrategy>,
) -> Arc<dyn Sequencer> {
    match mode {
        ProducerMode::Single => Arc::new(SingleProducerSequencer::new(buffer_size, wait_strategy)),
        ProducerMode::Multi => Arc::new(MultiProducerSequencer::new(buffer_size, wait_strategy)),
    }
}

#[allow(clippy::cast_possible_wrap)]
fn checked_buffer_size(buffer_size: usize) -> i64 {
    assert!(buffer_size >= 1, "buffer size must be at least 1");
    assert!(
        buffer_size.is_power_of_two(),
        "buffer size must be a power of two, got {buffer_size}"
    );
    buffer_size as i64
}

fn alert_when(flag: &AtomicBool) -> Result<(), Alerted> {
    if flag.load(Ordering::Acquire) {
        Err(Alerted)
    } else {
        Ok(())
    }
}

/// Sequencer for exactly one producer thread.
///
/// Claim bookkeeping (`next_value`, `cached_gate`) is owned by that one
/// producer; the fields are relaxed atomics only so the type stays `Sync`
/// for the consumer-facing surface.
pub struct SingleProducerSequencer {
    buffer_size: i64,
    cursor: Arc<Sequence>,
    gating: GatingSequences,
    wait_strategy: Arc<dyn WaitStrategy>,
    next_value: AtomicI64,
    cached_gate: AtomicI64,
    shutdown: Arc<AtomicBool>,
}

impl SingleProducerSequencer {
    /// Creates a single-producer sequencer.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is zero or not a power of two.
    #[must_use]
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Self {
        Self {
            buffer_size: checked_buffer_size(buffer_size),
            cursor: Arc::new(Sequence::default()),
            gating: GatingSequences::new(),
            wait_strategy,
            next_value: AtomicI64::new(INITIAL_CURSOR_VALUE),
            cached_gate: AtomicI64::new(INITIAL_CURSOR_VALUE),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replaces the shutdown flag with a caller-owned one, so an external
    /// lifecycle can unwind blocked claims.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    /// Handle to the cooperative shutdown flag observed by blocking claims.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Trips the shutdown flag and wakes any parked waiters.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wait_strategy.signal_all_when_blocking();
        tracing::debug!("single-producer sequencer shut down");
    }

    fn check_capacity(&self, required: i64) -> bool {
        let next_value = self.next_value.load(Ordering::Relaxed);
        let wrap_point = (next_value + required) - self.buffer_size;
        let cached = self.cached_gate.load(Ordering::Relaxed);
        if wrap_point > cached || cached > next_value {
            let min = self.gating.minimum(next_value);
            self.cached_gate.store(min, Ordering::Relaxed);
            if wrap_point > min {
                return false;
            }
        }
        true
    }
}

impl Sequencer for SingleProducerSequencer {
    #[allow(clippy::cast_sign_loss)]
    fn buffer_size(&self) -> usize {
        self.buffer_size as usize
    }

    fn cursor(&self) -> Arc<Sequence> {
        Arc::clone(&self.cursor)
    }

    fn wait_strategy(&self) -> Arc<dyn WaitStrategy> {
        Arc::clone(&self.wait_strategy)
    }

    fn claim(&self, sequence: i64) {
        self.next_value.store(sequence, Ordering::Relaxed);
    }

    fn next_n(&self, n: i64) -> Result<i64, Alerted> {
        assert!(n >= 1, "claim batch must be at least 1");
        assert!(
            n <= self.buffer_size,
            "claim batch exceeds the buffer size"
        );

        let next_value = self.next_value.load(Ordering::Relaxed);
        let next = next_value + n;
        let wrap_point = next - self.buffer_size;
        let cached = self.cached_gate.load(Ordering::Relaxed);

        if wrap_point > cached || cached > next_value {
            let gating = &self.gating;
            let shutdown = &self.shutdown;
            let min = self.wait_strategy.wait_for(
                wrap_point,
                &|| gating.minimum(next_value),
                &|| alert_when(shutdown),
            )?;
            self.cached_gate.store(min, Ordering::Relaxed);
        }

        self.next_value.store(next, Ordering::Relaxed);
        Ok(next)
    }

    fn try_next_n(&self, n: i64) -> Result<i64, InsufficientCapacity> {
        assert!(n >= 1, "claim batch must be at least 1");
        if !self.check_capacity(n) {
            return Err(InsufficientCapacity);
        }
        let next = self.next_value.load(Ordering::Relaxed) + n;
        self.next_value.store(next, Ordering::Relaxed);
        Ok(next)
    }

    fn publish(&self, sequence: i64) {
        self.cursor.set(sequence);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn publish_range(&self, _lo: i64, hi: i64) {
        // Claims are ordered, so publishing the batch is publishing its end.
        self.publish(hi);
    }

    fn is_available(&self, sequence: i64) -> bool {
        sequence <= self.cursor.get()
    }

    fn highest_published_sequence(&self, _next_sequence: i64, available_sequence: i64) -> i64 {
        // Everything at or below the cursor is published.
        available_sequence
    }

    fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]) {
        self.gating.add(sequences);
    }

    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        self.gating.remove(sequence)
    }

    fn minimum_sequence(&self) -> i64 {
        self.gating.minimum(self.cursor.get())
    }

    fn remaining_capacity(&self) -> i64 {
        let consumed = self.gating.minimum(self.cursor.get());
        let produced = self.next_value.load(Ordering::Relaxed);
        self.buffer_size - (produced - consumed)
    }

    fn cached_remaining_capacity(&self) -> i64 {
        let consumed = self.cached_gate.load(Ordering::Relaxed);
        let produced = self.next_value.load(Ordering::Relaxed);
        self.buffer_size - (produced - consumed)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn has_available_capacity(&self, required: usize) -> bool {
        self.check_capacity(required as i64)
    }
}

impl std::fmt::Debug for SingleProducerSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleProducerSequencer")
            .field("buffer_size", &self.buffer_size)
            .field("cursor", &self.cursor.get())
            .field("next_value", &self.next_value.load(Ordering::Relaxed))
            .field("gating_sequences", &self.gating.len())
            .finish_non_exhaustive()
    }
}

/// Sequencer for any number of producer threads.
///
/// The cursor doubles as the claim counter: a CAS on it reserves slots, and
/// a per-slot availability buffer marks completion. Each slot stores the
/// publish round (`sequence >> log2(buffer_size)`), so a stale round from an
/// earlier ring lap reads as "not yet available" — this is what lets
/// consumers see only a contiguous published prefix even when producers
/// finish out of order.
pub struct MultiProducerSequencer {
    buffer_size: i64,
    cursor: Arc<Sequence>,
    gating: GatingSequences,
    gating_cache: Sequence,
    wait_strategy: Arc<dyn WaitStrategy>,
    available: Box<[AtomicI64]>,
    index_mask: i64,
    index_shift: u32,
    shutdown: Arc<AtomicBool>,
}

impl MultiProducerSequencer {
    /// Creates a multi-producer sequencer.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is zero or not a power of two.
    #[must_use]
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Self {
        let size = checked_buffer_size(buffer_size);
        let available: Vec<AtomicI64> = (0..buffer_size)
            .map(|_| AtomicI64::new(INITIAL_CURSOR_VALUE))
            .collect();
        Self {
            buffer_size: size,
            cursor: Arc::new(Sequence::default()),
            gating: GatingSequences::new(),
            gating_cache: Sequence::default(),
            wait_strategy,
            available: available.into_boxed_slice(),
            index_mask: size - 1,
            index_shift: buffer_size.trailing_zeros(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replaces the shutdown flag with a caller-owned one.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    /// Handle to the cooperative shutdown flag observed by blocking claims.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Trips the shutdown flag and wakes any parked waiters.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wait_strategy.signal_all_when_blocking();
        tracing::debug!("multi-producer sequencer shut down");
    }

    #[allow(clippy::cast_sign_loss)]
    fn set_available(&self, sequence: i64) {
        let index = (sequence & self.index_mask) as usize;
        self.available[index].store(sequence >> self.index_shift, Ordering::Release);
    }

    fn has_capacity(&self, required: i64, current: i64) -> bool {
        let wrap_point = (current + required) - self.buffer_size;
        let cached = self.gating_cache.get();
        if wrap_point > cached || cached > current {
            let min = self.gating.minimum(current);
            self.gating_cache.set(min);
            if wrap_point > min {
                return false;
            }
        }
        true
    }
}

impl Sequencer for MultiProducerSequencer {
    #[allow(clippy::cast_sign_loss)]
    fn buffer_size(&self) -> usize {
        self.buffer_size as usize
    }

    fn cursor(&self) -> Arc<Sequence> {
        Arc::clone(&self.cursor)
    }

    fn wait_strategy(&self) -> Arc<dyn WaitStrategy> {
        Arc::clone(&self.wait_strategy)
    }

    fn claim(&self, sequence: i64) {
        self.cursor.set(sequence);
    }

    fn next_n(&self, n: i64) -> Result<i64, Alerted> {
        assert!(n >= 1, "claim batch must be at least 1");
        assert!(
            n <= self.buffer_size,
            "claim batch exceeds the buffer size"
        );

        loop {
            let current = self.cursor.get();
            let next = current + n;
            let wrap_point = next - self.buffer_size;
            let cached = self.gating_cache.get();

            if wrap_point > cached || cached > current {
                let gating = &self.gating;
                let shutdown = &self.shutdown;
                let min = self.wait_strategy.wait_for(
                    wrap_point,
                    &|| gating.minimum(current),
                    &|| alert_when(shutdown),
                )?;
                self.gating_cache.set(min);
                // Another producer may have claimed meanwhile; re-read.
                continue;
            }

            if self.cursor.compare_and_set(current, next) {
                return Ok(next);
            }
        }
    }

    fn try_next_n(&self, n: i64) -> Result<i64, InsufficientCapacity> {
        assert!(n >= 1, "claim batch must be at least 1");
        loop {
            let current = self.cursor.get();
            let next = current + n;
            if !self.has_capacity(n, current) {
                return Err(InsufficientCapacity);
            }
            if self.cursor.compare_and_set(current, next) {
                return Ok(next);
            }
        }
    }

    fn publish(&self, sequence: i64) {
        self.set_available(sequence);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn publish_range(&self, lo: i64, hi: i64) {
        for sequence in lo..=hi {
            self.set_available(sequence);
        }
        self.wait_strategy.signal_all_when_blocking();
    }

    #[allow(clippy::cast_sign_loss)]
    fn is_available(&self, sequence: i64) -> bool {
        let index = (sequence & self.index_mask) as usize;
        self.available[index].load(Ordering::Acquire) == (sequence >> self.index_shift)
    }

    fn highest_published_sequence(&self, next_sequence: i64, available_sequence: i64) -> i64 {
        for sequence in next_sequence..=available_sequence {
            if !self.is_available(sequence) {
                return sequence - 1;
            }
        }
        available_sequence
    }

    fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]) {
        self.gating.add(sequences);
    }

    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        self.gating.remove(sequence)
    }

    fn minimum_sequence(&self) -> i64 {
        self.gating.minimum(self.cursor.get())
    }

    fn remaining_capacity(&self) -> i64 {
        let produced = self.cursor.get();
        let consumed = self.gating.minimum(produced);
        self.buffer_size - (produced - consumed)
    }

    fn cached_remaining_capacity(&self) -> i64 {
        let produced = self.cursor.get();
        let consumed = self.gating_cache.get().min(produced);
        self.buffer_size - (produced - consumed)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn has_available_capacity(&self, required: usize) -> bool {
        self.has_capacity(required as i64, self.cursor.get())
    }
}

impl std::fmt::Debug for MultiProducerSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiProducerSequencer")
            .field("buffer_size", &self.buffer_size)
            .field("cursor", &self.cursor.get())
            .field("gating_sequences", &self.gating.len())
            .finish_non_exhaustive()
    }
}
