//! Demand pump translating ring consumption into upstream `request` calls.
//!
//! A [`RequestTask`] runs on its own thread and keeps a bounded upstream fed
//! without ever over-requesting: it primes the upstream with
//! `prefetch * 2 - 1` elements, then waits (via the shared wait strategy)
//! for the consumer's read sequence to advance a full prefetch batch before
//! requesting the next `prefetch`. Outstanding demand therefore never
//! exceeds `2 * prefetch - 1`, which is what lets the ring stay
//! fixed-capacity with a pushy upstream.
//!
//! Termination paths:
//! - stop flag tripped: the wait unwinds with [`Alerted`] and the pump
//!   cancels the upstream.
//! - `post_wait` hook fails: the error goes to the error sink once and the
//!   pump stops without cancelling (the failure owns the terminal signal).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::{Alerted, SharedError};
use crate::protocol::Subscription;
use crate::sequence::{Sequence, INITIAL_CURSOR_VALUE};
use crate::wait::WaitStrategy;

/// Hook run after each wait cycle with the newly reached read sequence.
pub type PostWaitFn = Box<dyn Fn(i64) -> Result<(), SharedError> + Send + Sync>;

/// Sink for the error a failing post-wait hook produces.
pub type ErrorSinkFn = Box<dyn Fn(SharedError) + Send + Sync>;

/// Periodic demand requester bridging a consumer's read progress to an
/// upstream [`Subscription`].
pub struct RequestTask {
    upstream: Arc<dyn Subscription>,
    read_count: Arc<Sequence>,
    wait_strategy: Arc<dyn WaitStrategy>,
    stop: Arc<AtomicBool>,
    post_wait: Option<PostWaitFn>,
    error_sink: ErrorSinkFn,
    prefetch: i64,
}

impl RequestTask {
    /// Creates a pump over `upstream`, watching `read_count` for consumer
    /// progress.
    ///
    /// # Panics
    ///
    /// Panics if `prefetch` is not positive.
    #[must_use]
    pub fn new(
        upstream: Arc<dyn Subscription>,
        read_count: Arc<Sequence>,
        wait_strategy: Arc<dyn WaitStrategy>,
        prefetch: i64,
        error_sink: ErrorSinkFn,
    ) -> Self {
        assert!(prefetch > 0, "prefetch must be positive");
        Self {
            upstream,
            read_count,
            wait_strategy,
            stop: Arc::new(AtomicBool::new(false)),
            post_wait: None,
            error_sink,
            prefetch,
        }
    }

    /// Installs a hook invoked after each completed wait cycle, before the
    /// next demand request.
    #[must_use]
    pub fn with_post_wait(mut self, hook: PostWaitFn) -> Self {
        self.post_wait = Some(hook);
        self
    }

    /// Handle that stops the pump when set. The pump notices on its next
    /// wait iteration.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Runs the pump until stopped or failed. Usually called via
    /// [`spawn`](Self::spawn).
    #[allow(clippy::cast_sign_loss)]
    pub fn run(self) {
        tracing::debug!(prefetch = self.prefetch, "request pump started");

        // Prime the upstream so the first batch and its successor overlap.
        self.upstream.request((self.prefetch * 2 - 1) as u64);

        let read_count = &self.read_count;
        let stop = &self.stop;
        let mut cursor = INITIAL_CURSOR_VALUE;

        loop {
            let waited = self.wait_strategy.wait_for(
                cursor + self.prefetch,
                &|| read_count.get(),
                &|| {
                    if stop.load(Ordering::Acquire) {
                        Err(Alerted)
                    } else {
                        Ok(())
                    }
                },
            );

            match waited {
                Ok(reached) => {
                    cursor = reached;
                    if let Some(hook) = &self.post_wait {
                        if let Err(e) = hook(cursor) {
                            tracing::warn!(error = %e, "request pump post-wait hook failed");
                            (self.error_sink)(e);
                            return;
                        }
                    }
                    self.upstream.request(self.prefetch as u64);
                }
                Err(Alerted) => {
                    tracing::debug!("request pump stopped, cancelling upstream");
                    self.upstream.cancel();
                    return;
                }
            }
        }
    }

    /// Spawns the pump on a dedicated thread.
    ///
    /// # Panics
    ///
    /// Panics if the thread cannot be spawned.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        thread::Builder::new()
            .name("riffle-request-pump".into())
            .spawn(move || self.run())
            .unwrap_or_else(|e| panic!("failed to spawn request pump thread: {e}"))
    }
}

impl std::fmt::Debug for RequestTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTask")
            .field("prefetch", &self.prefetch)
            .field("read_count", &self.read_count.get())
            .field("stopped", &self.stop.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::SleepingWait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSubscription {
        requests: Mutex<Vec<u64>>,
        cancelled: AtomicBool,
    }

    impl Subscription for RecordingSubscription {
        fn request(&self, n: u64) {
            self.requests.lock().unwrap().push(n);
        }

        fn cancel(&self) {
            self.cancelled.store(true, Ordering::Release);
        }
    }

    fn pump(
        upstream: Arc<RecordingSubscription>,
        read_count: Arc<Sequence>,
        prefetch: i64,
    ) -> RequestTask {
        RequestTask::new(
            upstream,
            read_count,
            Arc::new(SleepingWait::new()),
            prefetch,
            Box::new(|_| {}),
        )
    }

    #[test]
    #[should_panic(expected = "prefetch must be positive")]
    fn test_zero_prefetch_panics() {
        let upstream = Arc::new(RecordingSubscription::default());
        let _ = pump(upstream, Arc::new(Sequence::default()), 0);
    }

    #[test]
    fn test_initial_request_then_prefetch_per_cycle() {
        let upstream = Arc::new(RecordingSubscription::default());
        let read_count = Arc::new(Sequence::default());
        let task = pump(Arc::clone(&upstream), Arc::clone(&read_count), 10);
        let stop = task.stop_handle();
        let handle = task.spawn();

        // Wait for the priming request.
        while upstream.requests.lock().unwrap().is_empty() {
            thread::yield_now();
        }
        assert_eq!(upstream.requests.lock().unwrap()[0], 19);

        // Two full consumption cycles: -1 -> 9 -> 19.
        read_count.set(9);
        while upstream.requests.lock().unwrap().len() < 2 {
            thread::yield_now();
        }
        read_count.set(19);
        while upstream.requests.lock().unwrap().len() < 3 {
            thread::yield_now();
        }

        stop.store(true, Ordering::Release);
        handle.join().unwrap();

        let requests = upstream.requests.lock().unwrap();
        assert_eq!(&requests[..3], &[19, 10, 10]);
    }

    #[test]
    fn test_stop_cancels_upstream() {
        let upstream = Arc::new(RecordingSubscription::default());
        let task = pump(Arc::clone(&upstream), Arc::new(Sequence::default()), 4);
        let stop = task.stop_handle();
        let handle = task.spawn();

        thread::sleep(Duration::from_millis(5));
        stop.store(true, Ordering::Release);
        handle.join().unwrap();

        assert!(upstream.cancelled.load(Ordering::Acquire));
    }

    #[test]
    fn test_post_wait_failure_hits_sink_once_and_stops() {
        #[derive(Debug, thiserror::Error)]
        #[error("downstream rejected")]
        struct Rejected;

        let upstream = Arc::new(RecordingSubscription::default());
        let read_count = Arc::new(Sequence::default());
        let sink_hits = Arc::new(Mutex::new(Vec::<String>::new()));

        let task = RequestTask::new(
            Arc::clone(&upstream) as Arc<dyn Subscription>,
            Arc::clone(&read_count),
            Arc::new(SleepingWait::new()),
            2,
            {
                let sink_hits = Arc::clone(&sink_hits);
                Box::new(move |e| sink_hits.lock().unwrap().push(e.to_string()))
            },
        )
        .with_post_wait(Box::new(|_| Err(Arc::new(Rejected) as SharedError)));

        let handle = task.spawn();
        read_count.set(1);
        handle.join().unwrap();

        let hits = sink_hits.lock().unwrap();
        assert_eq!(hits.as_slice(), &["downstream rejected".to_string()]);
        // Failure owns the terminal signal; the upstream is not cancelled.
        assert!(!upstream.cancelled.load(Ordering::Acquire));
    }
}
