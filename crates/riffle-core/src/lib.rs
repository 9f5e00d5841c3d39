//! Lock-free slot sequencing and demand-driven push/pull plumbing.
//!
//! The core of the crate is a fixed-capacity circular sequencer in the
//! single-writer / multi-reader mold: producers claim slot indices from a
//! [`Sequencer`], write their payloads, and publish; consumers wait on a
//! [`SequenceBarrier`] and track their progress with gating [`Sequence`]
//! counters that producers must never overrun. Around that core sit the
//! pieces that connect a ring to demand-driven pipelines:
//!
//! - [`RequestTask`]: a pump thread translating consumer progress into
//!   bounded upstream `request` calls.
//! - [`FanOutSubscription`]: one upstream multicast to many child legs with
//!   per-child error isolation.
//! - [`BlockingQueueSubscriber`]: a bounded blocking queue bridging the push
//!   protocol to pull-style threads.
//!
//! # Data flow
//!
//! ```text
//!                    claim/publish            wait_for
//!   producers ----> Sequencer(ring) ----> SequenceBarrier ----> consumers
//!        ^                                                          |
//!        |            gating sequences (never overrun)              |
//!        +----------------------------------------------------------+
//! ```
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//! use riffle_core::{RingConfig, Sequence, SequenceBarrier, Sequencer};
//!
//! let sequencer = RingConfig::new().with_buffer_size(8).build_sequencer();
//! let consumed = Arc::new(Sequence::default());
//! sequencer.add_gating_sequences(&[Arc::clone(&consumed)]);
//! let barrier = SequenceBarrier::new(Arc::clone(&sequencer), Vec::new());
//!
//! let seq = sequencer.next().unwrap();
//! // ... write the slot payload for `seq` ...
//! sequencer.publish(seq);
//!
//! let readable = barrier.wait_for(seq).unwrap();
//! assert_eq!(readable, seq);
//! consumed.set(readable);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod barrier;
pub mod config;
pub mod error;
pub mod fanout;
pub mod protocol;
pub mod queue;
pub mod request;
pub mod sequence;
pub mod sequencer;
pub mod wait;

pub use barrier::SequenceBarrier;
pub use config::{RingConfig, WaitKind, DEFAULT_BUFFER_SIZE, DEFAULT_PREFETCH};
pub use error::{Alerted, InsufficientCapacity, QueueError, SharedError};
pub use fanout::FanOutSubscription;
pub use protocol::{PushSubscription, Subscriber, Subscription};
pub use queue::{BlockingQueueSubscriber, QueueMode};
pub use request::RequestTask;
pub use sequence::{Sequence, INITIAL_CURSOR_VALUE};
pub use sequencer::{
    sequencer, MultiProducerSequencer, ProducerMode, Sequencer, SingleProducerSequencer,
};
pub use wait::{BlockingWait, BusySpinWait, SleepingWait, WaitStrategy};
