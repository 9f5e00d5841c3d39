//! Ring construction parameters.
//!
//! A [`RingConfig`] gathers the knobs a sequencer is built from: slot
//! capacity, producer variant and wait policy. Out-of-range sizes are
//! clamped and rounded up to the next power of two rather than rejected, so
//! a config from an external source can always be built; the effective size
//! is logged when it differs from the requested one.

use std::sync::Arc;

use crate::sequencer::{sequencer, ProducerMode, Sequencer};
use crate::wait::{BlockingWait, BusySpinWait, SleepingWait, WaitStrategy};

/// Default ring capacity in slots.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Smallest permitted ring capacity.
pub const MIN_BUFFER_SIZE: usize = 1;

/// Largest permitted ring capacity.
pub const MAX_BUFFER_SIZE: usize = 1 << 20;

/// Default prefetch batch for demand pumps.
pub const DEFAULT_PREFETCH: i64 = 32;

/// Wait policy selector, decoupled from the strategy types so it can sit in
/// serializable or CLI-facing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitKind {
    /// Busy spin: lowest latency, one core pinned.
    Spin,
    /// Spin, then yield, then park. The default.
    #[default]
    SpinYield,
    /// Park on a condition variable: CPU-frugal, higher latency.
    Block,
}

impl WaitKind {
    /// Instantiates the strategy this kind selects.
    #[must_use]
    pub fn strategy(self) -> Arc<dyn WaitStrategy> {
        match self {
            Self::Spin => Arc::new(BusySpinWait),
            Self::SpinYield => Arc::new(SleepingWait::new()),
            Self::Block => Arc::new(BlockingWait::new()),
        }
    }
}

/// Construction parameters for a sequenced ring.
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Requested capacity in slots; normalized by
    /// [`effective_buffer_size`](Self::effective_buffer_size).
    pub buffer_size: usize,
    /// Producer coordination variant.
    pub producer_mode: ProducerMode,
    /// Wait policy for consumers and blocked producers.
    pub wait: WaitKind,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            producer_mode: ProducerMode::default(),
            wait: WaitKind::default(),
        }
    }
}

impl RingConfig {
    /// Starts from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the requested capacity.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Sets the producer variant.
    #[must_use]
    pub fn with_producer_mode(mut self, mode: ProducerMode) -> Self {
        self.producer_mode = mode;
        self
    }

    /// Sets the wait policy.
    #[must_use]
    pub fn with_wait(mut self, wait: WaitKind) -> Self {
        self.wait = wait;
        self
    }

    /// The capacity actually used: clamped to
    /// [`MIN_BUFFER_SIZE`]..=[`MAX_BUFFER_SIZE`] and rounded up to the next
    /// power of two.
    #[must_use]
    pub fn effective_buffer_size(&self) -> usize {
        self.buffer_size
            .clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE)
            .next_power_of_two()
    }

    /// Builds the sequencer this config describes.
    #[must_use]
    pub fn build_sequencer(&self) -> Arc<dyn Sequencer> {
        let size = self.effective_buffer_size();
        if size != self.buffer_size {
            tracing::info!(
                requested = self.buffer_size,
                effective = size,
                "ring capacity normalized"
            );
        }
        sequencer(self.producer_mode, size, self.wait.strategy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RingConfig::default();
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.producer_mode, ProducerMode::Single);
        assert_eq!(config.wait, WaitKind::SpinYield);
    }

    #[test]
    fn test_effective_size_rounds_up_to_power_of_two() {
        let config = RingConfig::new().with_buffer_size(1000);
        assert_eq!(config.effective_buffer_size(), 1024);

        let config = RingConfig::new().with_buffer_size(64);
        assert_eq!(config.effective_buffer_size(), 64);
    }

    #[test]
    fn test_effective_size_clamps_extremes() {
        let config = RingConfig::new().with_buffer_size(0);
        assert_eq!(config.effective_buffer_size(), MIN_BUFFER_SIZE);

        let config = RingConfig::new().with_buffer_size(usize::MAX);
        assert_eq!(config.effective_buffer_size(), MAX_BUFFER_SIZE);
    }

    #[test]
    fn test_build_sequencer_uses_effective_size() {
        let s = RingConfig::new()
            .with_buffer_size(100)
            .with_producer_mode(ProducerMode::Multi)
            .with_wait(WaitKind::Spin)
            .build_sequencer();
        assert_eq!(s.buffer_size(), 128);
    }
}
