//! Observability collaborator for the queue.
//!
//! The core queue carries no instrumentation of its own. Callers that want
//! per-operation timings wrap the queue in [`Instrumented`], which reports
//! each operation's elapsed time and outcome to a [`MetricsSink`]. This is a
//! pure side-channel: it has no effect on queue semantics and the core never
//! depends on it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::message::Message;
use crate::queue::{ConflatingQueue, Interrupted};

/// The queue operation a metrics record refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOp {
    /// Unkeyed push.
    PushVanilla,
    /// Keyed push (conflating or appending).
    PushConflatable,
    /// Blocking dequeue.
    Take,
    /// Non-blocking dequeue.
    TryTake,
    /// Bulk removal.
    Drain,
    /// Maintenance pass.
    Sweep,
}

impl QueueOp {
    const COUNT: usize = 6;

    fn index(self) -> usize {
        match self {
            QueueOp::PushVanilla => 0,
            QueueOp::PushConflatable => 1,
            QueueOp::Take => 2,
            QueueOp::TryTake => 3,
            QueueOp::Drain => 4,
            QueueOp::Sweep => 5,
        }
    }
}

/// How a recorded operation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The operation completed and produced its normal effect.
    Completed,
    /// A blocking take was interrupted while waiting.
    Interrupted,
    /// A non-blocking take found the queue empty.
    Empty,
}

/// Sink receiving one record per instrumented queue operation.
///
/// Implementations must be cheap and non-blocking; they run on the caller's
/// thread right after the operation returns.
pub trait MetricsSink: Send + Sync {
    /// Records one completed operation.
    fn record(&self, op: QueueOp, outcome: Outcome, elapsed: Duration);
}

/// A queue wrapper that times every operation and reports it to a sink.
///
/// Semantics are identical to the wrapped [`ConflatingQueue`]; the sink only
/// ever observes, it never influences delivery.
///
/// # Example
///
/// ```
/// use conflating_queue::{CountingSink, Instrumented, Message, QueueOp};
///
/// let q = Instrumented::new(CountingSink::new());
///
/// q.push(Message::vanilla(1u64));
/// q.push(Message::conflatable("k", 2u64).unwrap());
/// q.take().unwrap();
///
/// assert_eq!(q.sink().operations(QueueOp::PushVanilla), 1);
/// assert_eq!(q.sink().operations(QueueOp::PushConflatable), 1);
/// assert_eq!(q.sink().operations(QueueOp::Take), 1);
/// ```
pub struct Instrumented<T, S> {
    queue: ConflatingQueue<T>,
    sink: S,
}

impl<T, S: MetricsSink> Instrumented<T, S> {
    /// Wraps a fresh queue with `sink`.
    pub fn new(sink: S) -> Self {
        Self::wrap(ConflatingQueue::new(), sink)
    }

    /// Wraps an existing queue with `sink`.
    pub fn wrap(queue: ConflatingQueue<T>, sink: S) -> Self {
        Instrumented { queue, sink }
    }

    /// Returns the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Returns the wrapped queue.
    pub fn queue(&self) -> &ConflatingQueue<T> {
        &self.queue
    }

    /// Unwraps into the queue and the sink.
    pub fn into_parts(self) -> (ConflatingQueue<T>, S) {
        (self.queue, self.sink)
    }

    /// Timed [`ConflatingQueue::push`].
    pub fn push(&self, message: Message<T>) {
        let op = if message.is_conflatable() {
            QueueOp::PushConflatable
        } else {
            QueueOp::PushVanilla
        };
        let start = Instant::now();
        self.queue.push(message);
        self.sink.record(op, Outcome::Completed, start.elapsed());
    }

    /// Timed [`ConflatingQueue::take`].
    ///
    /// The recorded duration includes time spent blocked waiting.
    pub fn take(&self) -> Result<Message<T>, Interrupted> {
        let start = Instant::now();
        let result = self.queue.take();
        let outcome = match &result {
            Ok(_) => Outcome::Completed,
            Err(Interrupted) => Outcome::Interrupted,
        };
        self.sink.record(QueueOp::Take, outcome, start.elapsed());
        result
    }

    /// Timed [`ConflatingQueue::try_take`].
    pub fn try_take(&self) -> Option<Message<T>> {
        let start = Instant::now();
        let result = self.queue.try_take();
        let outcome = match &result {
            Some(_) => Outcome::Completed,
            None => Outcome::Empty,
        };
        self.sink.record(QueueOp::TryTake, outcome, start.elapsed());
        result
    }

    /// Timed [`ConflatingQueue::drain`].
    pub fn drain(&self) -> Vec<Message<T>> {
        let start = Instant::now();
        let batch = self.queue.drain();
        self.sink
            .record(QueueOp::Drain, Outcome::Completed, start.elapsed());
        batch
    }

    /// Timed [`ConflatingQueue::sweep`].
    pub fn sweep(&self) {
        let start = Instant::now();
        self.queue.sweep();
        self.sink
            .record(QueueOp::Sweep, Outcome::Completed, start.elapsed());
    }

    /// Untimed [`ConflatingQueue::is_empty`].
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Untimed [`ConflatingQueue::len`].
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Untimed [`ConflatingQueue::interrupt`].
    pub fn interrupt(&self) {
        self.queue.interrupt()
    }
}

/// A lock-free reference sink: per-operation call counts and cumulative
/// elapsed time, plus an interruption counter.
///
/// Suitable as-is for tests and coarse production counters; latency
/// distributions belong in a histogram-backed sink built on the same trait.
#[derive(Debug, Default)]
pub struct CountingSink {
    counts: [AtomicU64; QueueOp::COUNT],
    nanos: [AtomicU64; QueueOp::COUNT],
    interruptions: AtomicU64,
}

impl CountingSink {
    /// Creates a sink with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded calls for `op`, regardless of outcome.
    pub fn operations(&self, op: QueueOp) -> u64 {
        self.counts[op.index()].load(Ordering::Relaxed)
    }

    /// Cumulative elapsed time recorded for `op`.
    pub fn total_elapsed(&self, op: QueueOp) -> Duration {
        Duration::from_nanos(self.nanos[op.index()].load(Ordering::Relaxed))
    }

    /// Number of takes that ended in [`Outcome::Interrupted`].
    pub fn interruptions(&self) -> u64 {
        self.interruptions.load(Ordering::Relaxed)
    }
}

impl MetricsSink for CountingSink {
    fn record(&self, op: QueueOp, outcome: Outcome, elapsed: Duration) {
        self.counts[op.index()].fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.nanos[op.index()].fetch_add(nanos, Ordering::Relaxed);
        if outcome == Outcome::Interrupted {
            self.interruptions.fetch_add(1, Ordering::Relaxed);
        }
    }
}
