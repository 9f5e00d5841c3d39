//! Blocking-queue bridge between the push protocol and pull-style callers.
//!
//! A [`BlockingQueueSubscriber`] runs in one of two modes, fixed at
//! construction:
//!
//! - **Read mode** subscribes to an upstream and stages pushed elements in a
//!   bounded store; threads pull them out with [`poll`], [`take`] and
//!   friends. Demand accounting keeps the store bounded: `capacity` is
//!   requested up front and one element is re-requested for every element
//!   removed, so `remaining + size == capacity` always holds.
//! - **Write mode** wraps a downstream [`Subscriber`] and exposes queue-style
//!   insertion ([`offer`], [`put`], [`add`]); the downstream's `request`
//!   calls grant permits that insertion consumes.
//!
//! Calling a read-mode operation on a write-mode queue (or vice versa) is a
//! programmer error and panics. Terminal signals latch first-wins: after one
//! of `on_error`/`on_complete` lands, later terminal signals are ignored
//! with a warning, and blocking reads unblock with the latched outcome once
//! the store drains.
//!
//! [`poll`]: BlockingQueueSubscriber::poll
//! [`take`]: BlockingQueueSubscriber::take
//! [`offer`]: BlockingQueueSubscriber::offer
//! [`put`]: BlockingQueueSubscriber::put
//! [`add`]: BlockingQueueSubscriber::add

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::Duration;

use crate::error::{QueueError, SharedError};
use crate::protocol::{Subscriber, Subscription};

/// Which side of the bridge this queue implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Stage pushed elements for pull-style readers.
    Read,
    /// Expose queue-style insertion over a downstream subscriber.
    Write,
}

#[derive(Debug, Clone)]
enum Terminal {
    Errored(SharedError),
    Completed,
}

struct QueueInner<T> {
    mode: QueueMode,
    target: Option<Arc<dyn Subscriber<T>>>,
    store: Mutex<VecDeque<T>>,
    available: Condvar,
    space: Condvar,
    remaining: AtomicUsize,
    capacity: usize,
    terminal: OnceLock<Terminal>,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    cancelled: AtomicBool,
}

/// Bounded blocking queue bridging push and pull. Cheap to clone; clones
/// share the same store and demand accounting.
pub struct BlockingQueueSubscriber<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for BlockingQueueSubscriber<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> BlockingQueueSubscriber<T> {
    /// Creates a read-mode queue staging up to `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn read(capacity: usize) -> Self {
        Self::with_mode(QueueMode::Read, None, capacity)
    }

    /// Creates a write-mode queue forwarding to `target`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn write(target: Arc<dyn Subscriber<T>>, capacity: usize) -> Self {
        Self::with_mode(QueueMode::Write, Some(target), capacity)
    }

    fn with_mode(mode: QueueMode, target: Option<Arc<dyn Subscriber<T>>>, capacity: usize) -> Self {
        assert!(capacity >= 1, "queue capacity must be at least 1");
        Self {
            inner: Arc::new(QueueInner {
                mode,
                target,
                store: Mutex::new(VecDeque::with_capacity(capacity)),
                available: Condvar::new(),
                space: Condvar::new(),
                // Write mode starts with no permits; the downstream grants
                // them through request(). Read mode starts with the full
                // staging budget.
                remaining: AtomicUsize::new(match mode {
                    QueueMode::Read => capacity,
                    QueueMode::Write => 0,
                }),
                capacity,
                terminal: OnceLock::new(),
                subscription: Mutex::new(None),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// The mode fixed at construction.
    #[must_use]
    pub fn mode(&self) -> QueueMode {
        self.inner.mode
    }

    /// The fixed capacity (staging budget in read mode, maximum outstanding
    /// permits in write mode).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Elements currently held: staged elements in read mode, forwarded-but
    /// -unconsumed demand in write mode.
    #[must_use]
    pub fn size(&self) -> usize {
        match self.inner.mode {
            QueueMode::Read => self.inner.store.lock().unwrap().len(),
            QueueMode::Write => self.inner.capacity - self.inner.remaining.load(Ordering::Acquire),
        }
    }

    /// Free slots (read mode) or unconsumed permits (write mode).
    #[must_use]
    pub fn remaining_capacity(&self) -> usize {
        self.inner.remaining.load(Ordering::Acquire)
    }

    /// Returns true if [`size`](Self::size) is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Whether a terminal signal has latched.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.terminal.get().is_some()
    }

    /// Whether [`cancel`](Subscription::cancel) was called on this queue.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    fn require_mode(&self, required: QueueMode, op: &str) {
        assert!(
            self.inner.mode == required,
            "unsupported operation: {op} requires a {required:?}-mode queue"
        );
    }

    fn request_upstream(&self, n: u64) {
        if self.is_cancelled() || self.is_terminated() {
            return;
        }
        let subscription = self.inner.subscription.lock().unwrap();
        if let Some(s) = subscription.as_ref() {
            s.request(n);
        }
    }

    fn terminal_outcome(&self) -> Option<QueueError> {
        match self.inner.terminal.get() {
            Some(Terminal::Errored(e)) => Some(QueueError::Errored(Arc::clone(e))),
            Some(Terminal::Completed) => Some(QueueError::Completed),
            None => {
                if self.is_cancelled() {
                    Some(QueueError::Completed)
                } else {
                    None
                }
            }
        }
    }

    fn latch_terminal(&self, terminal: Terminal) -> bool {
        if self.inner.terminal.set(terminal).is_err() {
            tracing::warn!("duplicate terminal signal ignored");
            return false;
        }
        // Unblock every parked reader and writer so they observe it.
        let _guard = self.inner.store.lock().unwrap();
        self.inner.available.notify_all();
        self.inner.space.notify_all();
        true
    }

    // --- Read-mode operations ---

    /// Removes and returns the head element, or `None` if the store is
    /// empty right now.
    ///
    /// # Panics
    ///
    /// Panics on a write-mode queue.
    #[must_use]
    pub fn poll(&self) -> Option<T> {
        self.require_mode(QueueMode::Read, "poll");
        let value = self.inner.store.lock().unwrap().pop_front()?;
        self.element_removed(1);
        Some(value)
    }

    /// Removes and returns the head element, blocking until one arrives or
    /// the queue terminates.
    ///
    /// # Errors
    ///
    /// Returns the latched terminal outcome once the store is drained.
    ///
    /// # Panics
    ///
    /// Panics on a write-mode queue.
    pub fn take(&self) -> Result<T, QueueError> {
        self.require_mode(QueueMode::Read, "take");
        let mut store = self.inner.store.lock().unwrap();
        loop {
            if let Some(value) = store.pop_front() {
                drop(store);
                self.element_removed(1);
                return Ok(value);
            }
            if let Some(outcome) = self.terminal_outcome() {
                return Err(outcome);
            }
            store = self.inner.available.wait(store).unwrap();
        }
    }

    /// Like [`take`](Self::take) but gives up after `timeout`, returning
    /// `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns the latched terminal outcome once the store is drained.
    ///
    /// # Panics
    ///
    /// Panics on a write-mode queue.
    pub fn poll_timeout(&self, timeout: Duration) -> Result<Option<T>, QueueError> {
        self.require_mode(QueueMode::Read, "poll_timeout");
        let deadline = std::time::Instant::now() + timeout;
        let mut store = self.inner.store.lock().unwrap();
        loop {
            if let Some(value) = store.pop_front() {
                drop(store);
                self.element_removed(1);
                return Ok(Some(value));
            }
            if let Some(outcome) = self.terminal_outcome() {
                return Err(outcome);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let left = deadline - now;
            let (guard, timed_out) = self.inner.available.wait_timeout(store, left).unwrap();
            store = guard;
            if timed_out.timed_out() && store.is_empty() {
                if let Some(outcome) = self.terminal_outcome() {
                    return Err(outcome);
                }
                return Ok(None);
            }
        }
    }

    /// Drains every staged element into `sink`, returning how many moved.
    ///
    /// # Panics
    ///
    /// Panics on a write-mode queue.
    pub fn drain_to(&self, sink: &mut Vec<T>) -> usize {
        self.require_mode(QueueMode::Read, "drain_to");
        let drained: Vec<T> = self.inner.store.lock().unwrap().drain(..).collect();
        let n = drained.len();
        sink.extend(drained);
        if n > 0 {
            self.element_removed(n);
        }
        n
    }

    fn element_removed(&self, n: usize) {
        self.inner.remaining.fetch_add(n, Ordering::AcqRel);
        self.request_upstream(n as u64);
    }
}

impl<T: Clone + Send + 'static> BlockingQueueSubscriber<T> {
    /// Returns a copy of the head element without removing it.
    ///
    /// # Panics
    ///
    /// Panics on a write-mode queue.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        self.require_mode(QueueMode::Read, "peek");
        self.inner.store.lock().unwrap().front().cloned()
    }

    /// Iterates over a snapshot of the staged elements, head first. Does
    /// not consume them or affect demand accounting.
    ///
    /// # Panics
    ///
    /// Panics on a write-mode queue.
    pub fn iter(&self) -> impl Iterator<Item = T> {
        self.require_mode(QueueMode::Read, "iter");
        let snapshot: Vec<T> = self.inner.store.lock().unwrap().iter().cloned().collect();
        snapshot.into_iter()
    }
}

impl<T: PartialEq + Send + 'static> BlockingQueueSubscriber<T> {
    /// Whether a staged element equal to `value` is present.
    ///
    /// # Panics
    ///
    /// Panics on a write-mode queue.
    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        self.require_mode(QueueMode::Read, "contains");
        self.inner.store.lock().unwrap().iter().any(|v| v == value)
    }

    /// Removes the first staged element equal to `value`.
    ///
    /// Returns whether an element was removed.
    ///
    /// # Panics
    ///
    /// Panics on a write-mode queue.
    pub fn remove_item(&self, value: &T) -> bool {
        self.require_mode(QueueMode::Read, "remove_item");
        let removed = {
            let mut store = self.inner.store.lock().unwrap();
            match store.iter().position(|v| v == value) {
                Some(pos) => {
                    store.remove(pos);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.element_removed(1);
        }
        removed
    }
}

impl<T: Send + 'static> BlockingQueueSubscriber<T> {
    // --- Write-mode operations ---

    /// Forwards `value` downstream if a permit is available.
    ///
    /// Returns `Ok(false)` without consuming the value's permit when no
    /// demand is outstanding.
    ///
    /// # Errors
    ///
    /// Propagates the downstream's rejection of the element.
    ///
    /// # Panics
    ///
    /// Panics on a read-mode queue.
    pub fn offer(&self, value: T) -> Result<bool, SharedError> {
        self.require_mode(QueueMode::Write, "offer");
        if !self.try_acquire_permit() {
            return Ok(false);
        }
        self.forward(value)?;
        Ok(true)
    }

    /// Forwards `value` downstream, blocking until a permit is granted.
    ///
    /// # Errors
    ///
    /// Returns the latched terminal outcome if the queue terminates while
    /// blocked, or wraps the downstream's rejection.
    ///
    /// # Panics
    ///
    /// Panics on a read-mode queue.
    pub fn put(&self, value: T) -> Result<(), QueueError> {
        self.require_mode(QueueMode::Write, "put");
        let mut guard = self.inner.store.lock().unwrap();
        loop {
            if let Some(outcome) = self.terminal_outcome() {
                return Err(outcome);
            }
            if self.try_acquire_permit() {
                drop(guard);
                return self.forward(value).map_err(QueueError::Errored);
            }
            guard = self.inner.space.wait(guard).unwrap();
        }
    }

    /// Forwards `value` downstream, panicking when no permit is available.
    ///
    /// # Panics
    ///
    /// Panics on a read-mode queue, when the queue is full, or when the
    /// downstream rejects the element.
    pub fn add(&self, value: T) {
        self.require_mode(QueueMode::Write, "add");
        match self.offer(value) {
            Ok(true) => {}
            Ok(false) => panic!("queue full: no outstanding downstream demand"),
            Err(e) => panic!("downstream rejected element: {e}"),
        }
    }

    fn try_acquire_permit(&self) -> bool {
        self.inner
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| r.checked_sub(1))
            .is_ok()
    }

    fn forward(&self, value: T) -> Result<(), SharedError> {
        // Only write-mode queues carry a target.
        match self.inner.target.as_ref() {
            Some(target) => target.on_next(value),
            None => Ok(()),
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for BlockingQueueSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        {
            let mut slot = self.inner.subscription.lock().unwrap();
            *slot = Some(subscription);
        }
        if self.inner.mode == QueueMode::Read {
            // Prime the upstream with the full staging budget.
            self.request_upstream(self.inner.capacity as u64);
        }
    }

    fn on_next(&self, value: T) -> Result<(), SharedError> {
        match self.inner.mode {
            QueueMode::Write => self.forward(value),
            QueueMode::Read => {
                let mut store = self.inner.store.lock().unwrap();
                let granted = self
                    .inner
                    .remaining
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| r.checked_sub(1))
                    .is_ok();
                if !granted {
                    return Err(Arc::new(QueueError::CapacityExceeded));
                }
                store.push_back(value);
                self.inner.available.notify_one();
                Ok(())
            }
        }
    }

    fn on_error(&self, error: SharedError) {
        if self.latch_terminal(Terminal::Errored(Arc::clone(&error))) {
            if let Some(target) = self.inner.target.as_ref() {
                target.on_error(error);
            }
        }
    }

    fn on_complete(&self) {
        if self.latch_terminal(Terminal::Completed) {
            if let Some(target) = self.inner.target.as_ref() {
                target.on_complete();
            }
        }
    }
}

impl<T: Send + 'static> Subscription for BlockingQueueSubscriber<T> {
    fn request(&self, n: u64) {
        match self.inner.mode {
            // Pull-side demand flows straight through to the upstream.
            QueueMode::Read => self.request_upstream(n),
            // Downstream demand becomes insertion permits, clamped so the
            // outstanding window never exceeds the fixed capacity.
            QueueMode::Write => {
                let n = usize::try_from(n).unwrap_or(usize::MAX);
                let capacity = self.inner.capacity;
                let _ = self.inner.remaining.fetch_update(
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    |r| Some(r.saturating_add(n).min(capacity)),
                );
                let _guard = self.inner.store.lock().unwrap();
                self.inner.space.notify_all();
            }
        }
    }

    fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(mode = ?self.inner.mode, "queue cancelled");
        let upstream = self.inner.subscription.lock().unwrap().take();
        if let Some(s) = upstream {
            s.cancel();
        }
        let _guard = self.inner.store.lock().unwrap();
        self.inner.available.notify_all();
        self.inner.space.notify_all();
    }
}

impl<T> std::fmt::Debug for BlockingQueueSubscriber<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingQueueSubscriber")
            .field("mode", &self.inner.mode)
            .field("capacity", &self.inner.capacity)
            .field("remaining", &self.inner.remaining.load(Ordering::Relaxed))
            .field("terminated", &self.inner.terminal.get().is_some())
            .field("cancelled", &self.inner.cancelled.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
