//! # conflating-queue
//!
//! A FIFO message queue that opportunistically **conflates** keyed updates:
//! while a keyed message is still queued, a newer push under the same key
//! replaces its payload in place, so a slow consumer only ever sees the
//! latest value per key. Unkeyed ("vanilla") messages are preserved
//! individually and in order.
//!
//! Built for producer/consumer pipelines where producers emit high-frequency
//! keyed updates (price ticks, state snapshots) and consumers care about the
//! most recent value per key plus every non-keyed event, in arrival order.
//!
//! ## Guarantees
//!
//! - **Latest value wins**: the delivered payload for a live key is the most
//!   recent push; no intermediate payload is ever observed.
//! - **Order anchored at first push**: a key's delivery position is fixed by
//!   its first outstanding push; conflation never moves it.
//! - **Vanilla isolation**: unkeyed messages never conflate; every push is
//!   delivered exactly once, in order.
//! - **No stale conflation**: once delivered, a slot can never be mutated by
//!   a later push; the key gets a fresh slot instead.
//!
//! ## Design
//!
//! Two lock domains, deliberately asymmetric:
//!
//! - vanilla pushes and the blocking wait touch only the FIFO lane's own
//!   mutex/condvar pair;
//! - everything touching the key index (keyed push, delivery cleanup, drain,
//!   sweep) serializes on a single conflation mutex.
//!
//! Keeping vanilla traffic off the conflation lock is a latency goal, not an
//! accident. The blocking [`take`](ConflatingQueue::take) uses the usual
//! three-phase wait: immediate attempt, bounded `Backoff` spin, condvar park.
//!
//! ## Example
//!
//! ```
//! use conflating_queue::{ConflatingQueue, Message};
//!
//! let q = ConflatingQueue::new();
//!
//! q.push(Message::vanilla("trading session open"));
//! q.push(Message::conflatable("EURUSD", "1.0931").unwrap());
//! q.push(Message::conflatable("EURUSD", "1.0934").unwrap());
//!
//! // The vanilla event first, then the fused latest tick.
//! assert_eq!(q.take().unwrap().into_payload(), "trading session open");
//! let tick = q.take().unwrap();
//! assert_eq!(tick.key(), Some("EURUSD"));
//! assert_eq!(tick.into_payload(), "1.0934");
//! ```
//!
//! ## Maintenance
//!
//! [`sweep`](ConflatingQueue::sweep) reclaims orphaned duplicate slots from a
//! periodic timer. Under this crate's locking the public API cannot create
//! orphans, so sweeping is a memory-bound safety net for slow consumers, not
//! a correctness requirement.
//!
//! ## Observability
//!
//! The core carries no instrumentation. Wrap the queue in
//! [`Instrumented`] with any [`MetricsSink`] to time every operation off the
//! correctness path; [`CountingSink`] is the in-tree reference sink.
//!
//! ## When to Use This
//!
//! Use `conflating-queue` when:
//! - consumers can fall behind producers and only the newest value per key
//!   matters
//! - unkeyed control events must still arrive exactly once, in order
//! - you need a blocking dequeue with many producers and many consumers
//!
//! Consider alternatives when:
//! - every update must be delivered → use a plain channel
//! - you have exactly one producer and one consumer and a single key →
//!   a single-value conflation slot is cheaper
//! - you need backpressure → this queue is unbounded by design

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod message;
pub mod metrics;
pub mod queue;

pub use message::{InvalidKey, Message};
pub use metrics::{CountingSink, Instrumented, MetricsSink, Outcome, QueueOp};
pub use queue::{ConflatingQueue, Interrupted};
