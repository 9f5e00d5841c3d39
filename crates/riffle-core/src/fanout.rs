//! Multicast subscription fanning one upstream out to many children.
//!
//! A [`FanOutSubscription`] presents a single [`Subscription`] to the
//! upstream while delivering every element, in registration order, to each
//! registered child leg. Two rules shape the implementation:
//!
//! - Per-child error isolation: a child that rejects an element gets its own
//!   `on_error` and is removed; its siblings still receive that element and
//!   all later ones.
//! - No structural mutation during a delivery sweep: removals requested
//!   mid-sweep (including self-removal from inside a callback) go on a
//!   deferred-removal queue and take effect when the sweep finishes.
//!
//! Lock order is always `pending_removal` before `children`. Delivery
//! itself happens outside both locks, over a snapshot, so a slow child
//! callback never blocks registration.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use smallvec::SmallVec;

use crate::error::SharedError;
use crate::protocol::{PushSubscription, Subscription};

type Child<T> = Arc<dyn PushSubscription<T>>;

/// One upstream subscription multiplexed over many child legs.
pub struct FanOutSubscription<T> {
    children: Mutex<Vec<Child<T>>>,
    pending_removal: Mutex<Vec<Child<T>>>,
    demand: AtomicU64,
    cancelled: AtomicBool,
}

impl<T: Clone> FanOutSubscription<T> {
    /// Creates an empty fan-out.
    #[must_use]
    pub fn new() -> Self {
        Self {
            children: Mutex::new(Vec::new()),
            pending_removal: Mutex::new(Vec::new()),
            demand: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Registers a child leg. Elements delivered after this call reach it
    /// in registration order relative to its siblings.
    pub fn add(&self, child: Child<T>) {
        self.children.lock().unwrap().push(child);
    }

    /// Removes a child leg. Safe to call from inside a delivery callback:
    /// the removal is deferred until the current sweep finishes.
    ///
    /// Returns whether the child was registered (and not already pending
    /// removal).
    pub fn remove(&self, child: &Child<T>) -> bool {
        let mut pending = self.pending_removal.lock().unwrap();
        let children = self.children.lock().unwrap();
        let registered = children.iter().any(|c| Arc::ptr_eq(c, child));
        let already_pending = pending.iter().any(|c| Arc::ptr_eq(c, child));
        if registered && !already_pending {
            pending.push(Arc::clone(child));
            true
        } else {
            false
        }
    }

    /// Whether `child` is currently registered and not pending removal.
    #[must_use]
    pub fn contains(&self, child: &Child<T>) -> bool {
        let pending = self.pending_removal.lock().unwrap();
        let children = self.children.lock().unwrap();
        children.iter().any(|c| Arc::ptr_eq(c, child))
            && !pending.iter().any(|c| Arc::ptr_eq(c, child))
    }

    /// Number of registered children, counting those pending removal.
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.lock().unwrap().len()
    }

    /// Returns true if no children are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.lock().unwrap().is_empty()
    }

    /// Demand accumulated from child `request` calls and not yet consumed
    /// by the upstream.
    #[must_use]
    pub fn pending_requests(&self) -> u64 {
        self.demand.load(Ordering::Acquire)
    }

    /// Whether the upstream has been cancelled through this fan-out.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether every registered child has finished. Empty fan-outs report
    /// false: nothing has completed, there is just nothing there.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        let children = self.children.lock().unwrap();
        if children.is_empty() {
            return false;
        }
        children.iter().all(|c| c.is_complete())
    }

    /// Delivers one element to every live child, isolating failures.
    ///
    /// A child whose `on_next` fails receives that error as its own
    /// `on_error` and is queued for removal; delivery to the remaining
    /// children continues.
    pub fn on_next(&self, value: T) {
        let live = self.snapshot();
        for child in &live {
            if let Err(e) = child.on_next(value.clone()) {
                tracing::warn!(error = %e, "fan-out child rejected element, isolating");
                child.on_error(e);
                self.remove(child);
            }
        }
        self.drain_removals();
    }

    /// Propagates a terminal error to every live child.
    pub fn on_error(&self, error: SharedError) {
        let live = self.snapshot();
        for child in &live {
            child.on_error(Arc::clone(&error));
        }
        self.drain_removals();
    }

    /// Propagates completion to every live child. A child whose completion
    /// handling fails gets that error as its own `on_error`.
    pub fn on_complete(&self) {
        let live = self.snapshot();
        for child in &live {
            if let Err(e) = child.on_complete() {
                tracing::warn!(error = %e, "fan-out child failed during completion");
                child.on_error(e);
            }
        }
        self.drain_removals();
    }

    /// Live children at this instant: registered minus pending removal.
    fn snapshot(&self) -> SmallVec<[Child<T>; 4]> {
        let pending = self.pending_removal.lock().unwrap();
        let children = self.children.lock().unwrap();
        children
            .iter()
            .filter(|c| !pending.iter().any(|p| Arc::ptr_eq(p, c)))
            .cloned()
            .collect()
    }

    /// Applies deferred removals once no sweep is touching the list.
    fn drain_removals(&self) {
        let mut pending = self.pending_removal.lock().unwrap();
        if pending.is_empty() {
            return;
        }
        let mut children = self.children.lock().unwrap();
        for gone in pending.drain(..) {
            children.retain(|c| !Arc::ptr_eq(c, &gone));
        }
    }
}

impl<T: Clone> Default for FanOutSubscription<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Subscription for FanOutSubscription<T> {
    fn request(&self, n: u64) {
        self.demand.fetch_add(n, Ordering::AcqRel);
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("fan-out cancelled, cancelling children");
        let live = self.snapshot();
        for child in &live {
            child.cancel();
        }
        self.drain_removals();
    }
}

// A fan-out is itself a valid child leg, so trees of fan-outs compose.
impl<T: Clone> PushSubscription<T> for FanOutSubscription<T> {
    fn on_next(&self, value: T) -> Result<(), SharedError> {
        FanOutSubscription::on_next(self, value);
        Ok(())
    }

    fn on_error(&self, error: SharedError) {
        FanOutSubscription::on_error(self, error);
    }

    fn on_complete(&self) -> Result<(), SharedError> {
        FanOutSubscription::on_complete(self);
        Ok(())
    }

    fn is_complete(&self) -> bool {
        FanOutSubscription::is_complete(self)
    }
}

impl<T> std::fmt::Debug for FanOutSubscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutSubscription")
            .field("children", &self.children.lock().unwrap().len())
            .field(
                "pending_removal",
                &self.pending_removal.lock().unwrap().len(),
            )
            .field("demand", &self.demand.load(Ordering::Relaxed))
            .field("cancelled", &self.cancelled.load(Ordering::Relaxed))
            .finish()
    }
}
