//! Consumer-side coordination point over a sequencer.
//!
//! A [`SequenceBarrier`] is what a consumer waits on: it combines the
//! producer cursor, the sequences of any upstream consumers this one must
//! stay behind, and an alert flag for cooperative shutdown. `wait_for`
//! never returns a sequence past the slowest dependency, and on a
//! multi-producer ring it additionally truncates to the highest
//! *contiguously published* sequence, so a consumer never reads a slot a
//! producer has claimed but not finished writing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Alerted;
use crate::sequence::{minimum_sequence, Sequence};
use crate::sequencer::Sequencer;
use crate::wait::WaitStrategy;

/// Barrier a consumer waits on before reading slots.
pub struct SequenceBarrier {
    sequencer: Arc<dyn Sequencer>,
    wait_strategy: Arc<dyn WaitStrategy>,
    cursor: Arc<Sequence>,
    dependents: Vec<Arc<Sequence>>,
    alerted: AtomicBool,
}

impl SequenceBarrier {
    /// Creates a barrier over `sequencer`, additionally gated by
    /// `dependents` (the sequences of upstream consumers in the same
    /// pipeline; empty for a first-stage consumer).
    #[must_use]
    pub fn new(sequencer: Arc<dyn Sequencer>, dependents: Vec<Arc<Sequence>>) -> Self {
        let wait_strategy = sequencer.wait_strategy();
        let cursor = sequencer.cursor();
        Self {
            sequencer,
            wait_strategy,
            cursor,
            dependents,
            alerted: AtomicBool::new(false),
        }
    }

    /// Waits until `sequence` is safely readable.
    ///
    /// Returns the highest readable sequence, which may exceed `sequence`
    /// (batch pickup) but never exceeds the slowest dependency or the
    /// contiguous published prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Alerted`] if the barrier is alerted before or during the
    /// wait.
    pub fn wait_for(&self, sequence: i64) -> Result<i64, Alerted> {
        self.check_alert()?;

        let cursor = &self.cursor;
        let dependents = &self.dependents;
        let available = self.wait_strategy.wait_for(
            sequence,
            &|| minimum_sequence(dependents, cursor.get()),
            &|| self.check_alert(),
        )?;

        if available < sequence {
            return Ok(available);
        }
        Ok(self.sequencer.highest_published_sequence(sequence, available))
    }

    /// Highest sequence readable right now, without waiting.
    #[must_use]
    pub fn cursor(&self) -> i64 {
        minimum_sequence(&self.dependents, self.cursor.get())
    }

    /// Alerts the barrier: pending and future waits return [`Alerted`]
    /// until [`clear_alert`](Self::clear_alert) is called.
    pub fn alert(&self) {
        self.alerted.store(true, Ordering::Release);
        self.wait_strategy.signal_all_when_blocking();
        tracing::debug!("sequence barrier alerted");
    }

    /// Clears the alert so the barrier can be waited on again.
    pub fn clear_alert(&self) {
        self.alerted.store(false, Ordering::Release);
    }

    /// Whether the barrier is currently alerted.
    #[must_use]
    pub fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }

    fn check_alert(&self) -> Result<(), Alerted> {
        if self.is_alerted() {
            Err(Alerted)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for SequenceBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceBarrier")
            .field("cursor", &self.cursor.get())
            .field("dependents", &self.dependents.len())
            .field("alerted", &self.is_alerted())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::{sequencer, ProducerMode};
    use crate::wait::{BusySpinWait, SleepingWait};
    use std::thread;
    use std::time::Duration;

    fn single_sequencer() -> Arc<dyn Sequencer> {
        sequencer(ProducerMode::Single, 8, Arc::new(BusySpinWait))
    }

    #[test]
    fn test_wait_for_returns_published_prefix() {
        let s = single_sequencer();
        let barrier = SequenceBarrier::new(Arc::clone(&s), Vec::new());

        let hi = s.next_n(3).unwrap();
        s.publish_range(0, hi);
        assert_eq!(barrier.wait_for(0), Ok(2));
        assert_eq!(barrier.wait_for(2), Ok(2));
    }

    #[test]
    fn test_wait_for_blocks_until_publish() {
        let s: Arc<dyn Sequencer> =
            sequencer(ProducerMode::Single, 8, Arc::new(SleepingWait::new()));
        let barrier = Arc::new(SequenceBarrier::new(Arc::clone(&s), Vec::new()));

        let waiter = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait_for(0))
        };

        thread::sleep(Duration::from_millis(5));
        let seq = s.next().unwrap();
        s.publish(seq);
        assert_eq!(waiter.join().unwrap(), Ok(0));
    }

    #[test]
    fn test_dependents_cap_the_result() {
        let s = single_sequencer();
        let upstream = Arc::new(Sequence::new(1));
        let barrier = SequenceBarrier::new(Arc::clone(&s), vec![upstream.clone()]);

        let hi = s.next_n(5).unwrap();
        s.publish_range(0, hi);

        // The cursor is at 4 but the upstream consumer has only reached 1.
        assert_eq!(barrier.wait_for(0), Ok(1));
        assert_eq!(barrier.cursor(), 1);

        upstream.set(4);
        assert_eq!(barrier.wait_for(2), Ok(4));
    }

    #[test]
    fn test_multi_producer_gap_truncates_wait_result() {
        let s = sequencer(ProducerMode::Multi, 8, Arc::new(BusySpinWait));
        let barrier = SequenceBarrier::new(Arc::clone(&s), Vec::new());

        s.try_next().unwrap();
        s.try_next().unwrap();
        s.try_next().unwrap();
        s.publish(0);
        s.publish(2);

        // The cursor reads 2 but only sequence 0 is contiguously published.
        assert_eq!(barrier.wait_for(0), Ok(0));

        s.publish(1);
        assert_eq!(barrier.wait_for(1), Ok(2));
    }

    #[test]
    fn test_alert_unwinds_wait() {
        let s: Arc<dyn Sequencer> =
            sequencer(ProducerMode::Single, 8, Arc::new(SleepingWait::new()));
        let barrier = Arc::new(SequenceBarrier::new(s, Vec::new()));

        let waiter = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait_for(0))
        };

        thread::sleep(Duration::from_millis(5));
        barrier.alert();
        assert_eq!(waiter.join().unwrap(), Err(Alerted));
        assert!(barrier.is_alerted());

        // A fresh wait fails fast until the alert is cleared.
        assert_eq!(barrier.wait_for(0), Err(Alerted));
        barrier.clear_alert();
        assert!(!barrier.is_alerted());
    }
}
