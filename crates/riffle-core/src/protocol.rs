//! Demand-driven push protocol traits.
//!
//! The contract mirrors the reactive push model: a source hands a
//! [`Subscriber`] a [`Subscription`] exactly once, then pushes at most as
//! many elements as the subscriber has requested, and finishes with exactly
//! one terminal signal (`on_error` or `on_complete`). Cancellation flows the
//! other way through [`Subscription::cancel`] and is not a terminal signal;
//! a cancelled party simply stops receiving.
//!
//! Departure from the classic callback shape: `on_next` returns a `Result`,
//! so a receiver can reject an element synchronously (downstream failed,
//! demand accounting violated) and the caller decides what that means for
//! the rest of the fan-out.

use std::sync::Arc;

use crate::error::SharedError;

/// Upstream handle held by a subscriber: demand and cancellation flow
/// through it.
pub trait Subscription: Send + Sync {
    /// Requests `n` more elements. Demand accumulates; it is never a window
    /// reset.
    fn request(&self, n: u64);

    /// Tells the upstream to stop pushing. Idempotent; no terminal signal
    /// follows on behalf of the cancel.
    fn cancel(&self);
}

/// Receiver of pushed elements.
pub trait Subscriber<T>: Send + Sync {
    /// Called exactly once, before any element. The subscriber must keep
    /// the subscription to request demand.
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);

    /// Delivers one element, within previously requested demand.
    ///
    /// # Errors
    ///
    /// An error tells the caller this receiver cannot accept the element;
    /// the receiver itself is then considered failed.
    fn on_next(&self, value: T) -> Result<(), SharedError>;

    /// Terminal failure signal. At most one terminal signal is ever
    /// delivered.
    fn on_error(&self, error: SharedError);

    /// Terminal completion signal. At most one terminal signal is ever
    /// delivered.
    fn on_complete(&self);
}

/// A downstream leg of a fan-out: a subscription the parent can also push
/// through.
///
/// The fan-out delivers to children through this trait; `request` and
/// `cancel` calls from the child side flow back to the shared parent.
pub trait PushSubscription<T>: Subscription {
    /// Pushes one element to this leg.
    ///
    /// # Errors
    ///
    /// An error marks this leg as failed; the parent isolates it and keeps
    /// delivering to its siblings.
    fn on_next(&self, value: T) -> Result<(), SharedError>;

    /// Propagates a terminal failure to this leg.
    fn on_error(&self, error: SharedError);

    /// Propagates completion to this leg.
    ///
    /// # Errors
    ///
    /// An error here is routed back to this same leg's `on_error`.
    fn on_complete(&self) -> Result<(), SharedError>;

    /// Whether this leg has finished (terminated or cancelled).
    fn is_complete(&self) -> bool;
}
