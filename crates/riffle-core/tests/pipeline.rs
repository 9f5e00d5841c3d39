//! End-to-end pipeline tests: producers, ring, barrier, consumers, and the
//! push/pull bridges wired together the way an application would.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use riffle_core::{
    Alerted, BlockingQueueSubscriber, FanOutSubscription, ProducerMode, PushSubscription,
    QueueError, RequestTask, RingConfig, Sequence, SequenceBarrier, Sequencer, SharedError,
    SleepingWait, Subscriber, Subscription, WaitKind,
};

/// Payload slots sized to the ring; indexed by `sequence & (size - 1)`.
fn slots(size: usize) -> Arc<Vec<AtomicI64>> {
    Arc::new((0..size).map(|_| AtomicI64::new(0)).collect())
}

#[test]
fn single_producer_single_consumer_preserves_order() {
    const TOTAL: i64 = 10_000;
    const SIZE: usize = 64;

    let sequencer = RingConfig::new()
        .with_buffer_size(SIZE)
        .with_wait(WaitKind::SpinYield)
        .build_sequencer();
    let consumed = Arc::new(Sequence::default());
    sequencer.add_gating_sequences(&[Arc::clone(&consumed)]);
    let barrier = Arc::new(SequenceBarrier::new(Arc::clone(&sequencer), Vec::new()));
    let ring = slots(SIZE);
    let mask = SIZE as i64 - 1;

    let producer = {
        let sequencer = Arc::clone(&sequencer);
        let ring = Arc::clone(&ring);
        thread::spawn(move || {
            for value in 0..TOTAL {
                let seq = sequencer.next().unwrap();
                ring[(seq & mask) as usize].store(value, Ordering::Release);
                sequencer.publish(seq);
            }
        })
    };

    let consumer = {
        let ring = Arc::clone(&ring);
        let consumed = Arc::clone(&consumed);
        thread::spawn(move || {
            let mut next = 0i64;
            let mut seen = Vec::with_capacity(TOTAL as usize);
            while next < TOTAL {
                let available = barrier.wait_for(next).unwrap();
                while next <= available {
                    seen.push(ring[(next & mask) as usize].load(Ordering::Acquire));
                    next += 1;
                }
                consumed.set(available);
            }
            seen
        })
    };

    producer.join().unwrap();
    let seen = consumer.join().unwrap();
    assert_eq!(seen.len(), TOTAL as usize);
    // Order and content both preserved.
    for (i, v) in seen.iter().enumerate() {
        assert_eq!(*v, i as i64);
    }
}

#[test]
fn multi_producer_consumer_sees_contiguous_prefix_only() {
    const PRODUCERS: i64 = 3;
    const PER_PRODUCER: i64 = 3_000;
    const SIZE: usize = 128;

    let sequencer = RingConfig::new()
        .with_buffer_size(SIZE)
        .with_producer_mode(ProducerMode::Multi)
        .build_sequencer();
    let consumed = Arc::new(Sequence::default());
    sequencer.add_gating_sequences(&[Arc::clone(&consumed)]);
    let barrier = Arc::new(SequenceBarrier::new(Arc::clone(&sequencer), Vec::new()));
    let ring = slots(SIZE);
    let mask = SIZE as i64 - 1;

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let sequencer = Arc::clone(&sequencer);
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let seq = sequencer.next().unwrap();
                    ring[(seq & mask) as usize].store(p * PER_PRODUCER + i, Ordering::Release);
                    sequencer.publish(seq);
                }
            })
        })
        .collect();

    let total = PRODUCERS * PER_PRODUCER;
    let consumer = {
        let ring = Arc::clone(&ring);
        let consumed = Arc::clone(&consumed);
        thread::spawn(move || {
            let mut sum = 0i64;
            let mut next = 0i64;
            while next < total {
                let available = barrier.wait_for(next).unwrap();
                // A multi-producer barrier never exposes a gap.
                while next <= available {
                    sum += ring[(next & mask) as usize].load(Ordering::Acquire);
                    next += 1;
                }
                consumed.set(available);
            }
            sum
        })
    };

    for p in producers {
        p.join().unwrap();
    }
    let sum = consumer.join().unwrap();
    assert_eq!(sum, total * (total - 1) / 2);
}

#[test]
fn dependent_consumers_form_ordered_stages() {
    const TOTAL: i64 = 2_000;
    const SIZE: usize = 32;

    let sequencer = RingConfig::new().with_buffer_size(SIZE).build_sequencer();
    let stage_one = Arc::new(Sequence::default());
    let stage_two = Arc::new(Sequence::default());
    // Producers are gated by the last stage only.
    sequencer.add_gating_sequences(&[Arc::clone(&stage_two)]);

    let first_barrier = Arc::new(SequenceBarrier::new(Arc::clone(&sequencer), Vec::new()));
    let second_barrier = Arc::new(SequenceBarrier::new(
        Arc::clone(&sequencer),
        vec![Arc::clone(&stage_one)],
    ));

    let violations = Arc::new(AtomicU64::new(0));

    let first = {
        let stage_one = Arc::clone(&stage_one);
        thread::spawn(move || {
            let mut next = 0i64;
            while next < TOTAL {
                let available = first_barrier.wait_for(next).unwrap();
                stage_one.set(available);
                next = available + 1;
            }
        })
    };

    let second = {
        let stage_one = Arc::clone(&stage_one);
        let stage_two = Arc::clone(&stage_two);
        let violations = Arc::clone(&violations);
        thread::spawn(move || {
            let mut next = 0i64;
            while next < TOTAL {
                let available = second_barrier.wait_for(next).unwrap();
                // The second stage must never run ahead of the first.
                if available > stage_one.get() {
                    violations.fetch_add(1, Ordering::Relaxed);
                }
                stage_two.set(available);
                next = available + 1;
            }
        })
    };

    for _ in 0..TOTAL {
        let seq = sequencer.next().unwrap();
        sequencer.publish(seq);
    }

    first.join().unwrap();
    second.join().unwrap();
    assert_eq!(violations.load(Ordering::Relaxed), 0);
    assert_eq!(stage_two.get(), TOTAL - 1);
}

#[test]
fn producer_blocked_on_full_ring_unwinds_on_shutdown() {
    use riffle_core::SingleProducerSequencer;

    let sequencer = Arc::new(SingleProducerSequencer::new(
        8,
        Arc::new(SleepingWait::new()),
    ));
    let consumed = Arc::new(Sequence::default());
    sequencer.add_gating_sequences(&[consumed]);

    for _ in 0..8 {
        let seq = sequencer.next().unwrap();
        sequencer.publish(seq);
    }

    let blocked = {
        let sequencer = Arc::clone(&sequencer);
        thread::spawn(move || sequencer.next())
    };

    thread::sleep(Duration::from_millis(10));
    sequencer.shutdown();
    assert_eq!(blocked.join().unwrap(), Err(Alerted));
}

// --- Push/pull bridge scenarios ---

#[derive(Debug, thiserror::Error)]
#[error("synthetic failure")]
struct SyntheticFailure;

#[derive(Default)]
struct CountingSubscription {
    requested: AtomicU64,
    cancelled: AtomicBool,
}

impl Subscription for CountingSubscription {
    fn request(&self, n: u64) {
        self.requested.fetch_add(n, Ordering::AcqRel);
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

#[test]
fn request_pump_keeps_outstanding_demand_bounded() {
    const PREFETCH: i64 = 16;

    let upstream = Arc::new(CountingSubscription::default());
    let read_count = Arc::new(Sequence::default());
    let task = RequestTask::new(
        Arc::clone(&upstream) as Arc<dyn Subscription>,
        Arc::clone(&read_count),
        Arc::new(SleepingWait::new()),
        PREFETCH,
        Box::new(|_| {}),
    );
    let stop = task.stop_handle();
    let handle = task.spawn();

    // Simulate a consumer working through three prefetch batches.
    for batch in 1..=3i64 {
        let target = batch * PREFETCH - 1;
        read_count.set(target);
        let expected = (PREFETCH * 2 - 1 + batch * PREFETCH) as u64;
        while upstream.requested.load(Ordering::Acquire) < expected {
            thread::yield_now();
        }
        // Demand never exceeds consumption by more than the priming window.
        let outstanding =
            upstream.requested.load(Ordering::Acquire) as i64 - (read_count.get() + 1);
        assert!(outstanding <= PREFETCH * 2 - 1);
    }

    stop.store(true, Ordering::Release);
    handle.join().unwrap();
    assert!(upstream.cancelled.load(Ordering::Acquire));
}

/// A child leg collecting into a shared vector; fails on a configured value.
struct CollectingChild {
    seen: Mutex<Vec<i64>>,
    errors: Mutex<Vec<String>>,
    fail_on: Option<i64>,
    done: AtomicBool,
}

impl CollectingChild {
    fn new(fail_on: Option<i64>) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            fail_on,
            done: AtomicBool::new(false),
        })
    }
}

impl Subscription for CollectingChild {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {
        self.done.store(true, Ordering::Release);
    }
}

impl PushSubscription<i64> for CollectingChild {
    fn on_next(&self, value: i64) -> Result<(), SharedError> {
        if self.fail_on == Some(value) {
            return Err(Arc::new(SyntheticFailure));
        }
        self.seen.lock().unwrap().push(value);
        Ok(())
    }

    fn on_error(&self, error: SharedError) {
        self.errors.lock().unwrap().push(error.to_string());
        self.done.store(true, Ordering::Release);
    }

    fn on_complete(&self) -> Result<(), SharedError> {
        self.done.store(true, Ordering::Release);
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

#[test]
fn ring_consumer_fans_out_with_isolated_failures() {
    const TOTAL: i64 = 200;
    const SIZE: usize = 16;

    let sequencer = RingConfig::new().with_buffer_size(SIZE).build_sequencer();
    let consumed = Arc::new(Sequence::default());
    sequencer.add_gating_sequences(&[Arc::clone(&consumed)]);
    let barrier = Arc::new(SequenceBarrier::new(Arc::clone(&sequencer), Vec::new()));
    let ring = slots(SIZE);
    let mask = SIZE as i64 - 1;

    let fanout = Arc::new(FanOutSubscription::new());
    let steady = CollectingChild::new(None);
    let flaky = CollectingChild::new(Some(50));
    fanout.add(Arc::clone(&steady) as Arc<dyn PushSubscription<i64>>);
    fanout.add(Arc::clone(&flaky) as Arc<dyn PushSubscription<i64>>);

    let delivery = {
        let ring = Arc::clone(&ring);
        let fanout = Arc::clone(&fanout);
        let consumed = Arc::clone(&consumed);
        thread::spawn(move || {
            let mut next = 0i64;
            while next < TOTAL {
                let available = barrier.wait_for(next).unwrap();
                while next <= available {
                    fanout.on_next(ring[(next & mask) as usize].load(Ordering::Acquire));
                    next += 1;
                }
                consumed.set(available);
            }
            fanout.on_complete();
        })
    };

    for value in 0..TOTAL {
        let seq = sequencer.next().unwrap();
        ring[(seq & mask) as usize].store(value, Ordering::Release);
        sequencer.publish(seq);
    }
    delivery.join().unwrap();

    // The steady child saw everything, in order.
    let steady_seen = steady.seen.lock().unwrap();
    assert_eq!(steady_seen.len(), TOTAL as usize);
    assert!(steady_seen.windows(2).all(|w| w[0] < w[1]));

    // The flaky child stopped at its failure and got its own error.
    let flaky_seen = flaky.seen.lock().unwrap();
    assert_eq!(flaky_seen.last(), Some(&49));
    assert_eq!(flaky.errors.lock().unwrap().len(), 1);
    assert_eq!(fanout.len(), 1);
}

#[test]
fn blocking_queue_bridges_push_to_pulling_threads() {
    const TOTAL: i64 = 500;

    let queue = BlockingQueueSubscriber::<i64>::read(32);
    let upstream = Arc::new(CountingSubscription::default());
    queue.on_subscribe(Arc::clone(&upstream) as Arc<dyn Subscription>);

    let puller = {
        let queue = queue.clone();
        thread::spawn(move || {
            let mut seen = Vec::new();
            loop {
                match queue.take() {
                    Ok(v) => seen.push(v),
                    Err(QueueError::Completed) => return Ok(seen),
                    Err(e) => return Err(e),
                }
            }
        })
    };

    // Push respecting granted demand, as a well-behaved upstream would.
    let mut sent = 0i64;
    while sent < TOTAL {
        let granted = upstream.requested.load(Ordering::Acquire) as i64;
        if sent < granted {
            queue.on_next(sent).unwrap();
            sent += 1;
        } else {
            thread::yield_now();
        }
    }
    queue.on_complete();

    let seen = puller.join().unwrap().unwrap();
    assert_eq!(seen.len(), TOTAL as usize);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    // Demand accounting: everything pushed was covered by granted demand,
    // and the grants never exceed consumption plus the staging budget.
    let granted = upstream.requested.load(Ordering::Acquire);
    assert!(granted >= TOTAL as u64);
    assert!(granted <= TOTAL as u64 + 32);
}

#[test]
fn write_queue_feeds_a_fanout_downstream() {
    struct FanoutAdapter {
        fanout: Arc<FanOutSubscription<i64>>,
    }

    impl Subscriber<i64> for FanoutAdapter {
        fn on_subscribe(&self, _subscription: Arc<dyn Subscription>) {}

        fn on_next(&self, value: i64) -> Result<(), SharedError> {
            self.fanout.on_next(value);
            Ok(())
        }

        fn on_error(&self, error: SharedError) {
            self.fanout.on_error(error);
        }

        fn on_complete(&self) {
            self.fanout.on_complete();
        }
    }

    let fanout = Arc::new(FanOutSubscription::new());
    let a = CollectingChild::new(None);
    let b = CollectingChild::new(None);
    fanout.add(Arc::clone(&a) as Arc<dyn PushSubscription<i64>>);
    fanout.add(Arc::clone(&b) as Arc<dyn PushSubscription<i64>>);

    let queue = BlockingQueueSubscriber::write(
        Arc::new(FanoutAdapter {
            fanout: Arc::clone(&fanout),
        }) as Arc<dyn Subscriber<i64>>,
        16,
    );

    queue.request(16);
    for v in 0..10 {
        assert!(queue.offer(v).unwrap());
    }
    queue.on_complete();

    assert_eq!(*a.seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    assert_eq!(*b.seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    assert!(fanout.is_complete());
}
