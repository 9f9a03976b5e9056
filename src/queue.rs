//! Conflating queue core.
//!
//! The queue owns two coordinated structures:
//!
//! - the **lane**: an ordered sequence of slots, FIFO in slot creation order,
//!   guarded by its own mutex + condvar pair. Vanilla pushes and the blocking
//!   wait in [`take`](ConflatingQueue::take) touch only the lane.
//! - the **conflation domain**: a key → slot index guarded by a second mutex.
//!   Every operation that touches the index (conflatable push, take's index
//!   cleanup, drain, sweep) serializes here.
//!
//! The asymmetry is deliberate: vanilla pushes must stay cheap and must not
//! contend with conflation traffic. Lock order is conflation domain before
//! lane, never the reverse; no operation locks two queue instances.
//!
//! Conflation works by in-place update: a keyed slot's payload is replaced
//! while the slot keeps the queue position established by its first
//! outstanding push. The index holds the slot `Arc` purely as a lookup
//! handle; identity checks use `Arc::ptr_eq` and the slot's `linked` flag,
//! so a delivered slot can never satisfy a later conflation lookup.

use core::fmt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crossbeam_utils::{Backoff, CachePadded};

use crate::message::Message;

/// Default number of backoff snooze iterations before a blocked `take`
/// parks on the condvar.
///
/// Each snooze uses `crossbeam_utils::Backoff::snooze()` which starts with
/// spinning and eventually yields to the OS scheduler.
const DEFAULT_SNOOZE_ITERS: usize = 8;

/// A queue-internal holder for one message.
///
/// Exclusively owned by the lane while queued; the index may also hold a
/// clone of the `Arc`, but only as a lookup handle. `linked` is true while
/// the slot is in the lane and flips to false exactly once, when the slot is
/// delivered or swept.
struct Slot<T> {
    key: Option<Arc<str>>,
    payload: Mutex<Option<T>>,
    linked: AtomicBool,
}

impl<T> Slot<T> {
    fn new(key: Option<Arc<str>>, payload: T) -> Self {
        Slot {
            key,
            payload: Mutex::new(Some(payload)),
            linked: AtomicBool::new(true),
        }
    }
}

/// Lane state: the ordered slot sequence plus the interrupt generation.
///
/// `interrupts` is bumped by [`ConflatingQueue::interrupt`]; a taker that
/// started waiting under an older generation fails with [`Interrupted`].
struct Lane<T> {
    slots: VecDeque<Arc<Slot<T>>>,
    interrupts: u64,
}

/// A FIFO queue that conflates keyed messages to their latest payload.
///
/// Producers push [`Message`]s; consumers block on [`take`](Self::take) or
/// bulk-remove with [`drain`](Self::drain). While a keyed message is still
/// queued, a later push under the same key replaces its payload in place, so
/// a slow consumer sees only the latest value per key. Unkeyed messages are
/// never conflated.
///
/// The queue is unbounded and safe to share across threads behind an `Arc`:
/// all operations take `&self`.
///
/// # Ordering
///
/// - Vanilla messages are delivered in push order.
/// - A key's delivery position is fixed by its *first outstanding* push;
///   later conflating pushes update the payload but never move the slot.
/// - Across keys and vanilla messages, order follows slot creation order.
///
/// # Example
///
/// ```
/// use conflating_queue::{ConflatingQueue, Message};
///
/// let q = ConflatingQueue::new();
/// q.push(Message::vanilla(1));
/// q.push(Message::conflatable("a", 10).unwrap());
/// q.push(Message::conflatable("a", 20).unwrap());
/// q.push(Message::vanilla(2));
///
/// // Three deliveries, not four: "a" fused to its latest payload at the
/// // position of its first push.
/// assert_eq!(q.take().unwrap().into_payload(), 1);
/// assert_eq!(q.take().unwrap().into_payload(), 20);
/// assert_eq!(q.take().unwrap().into_payload(), 2);
/// assert!(q.is_empty());
/// ```
pub struct ConflatingQueue<T> {
    lane: CachePadded<Mutex<Lane<T>>>,
    available: Condvar,
    conflation: CachePadded<Mutex<HashMap<Arc<str>, Arc<Slot<T>>>>>,
    snooze_iters: usize,
}

/// Recovers the guard from a poisoned lock.
///
/// No critical section in this module runs caller code, so the guarded state
/// is consistent even if a thread panicked while holding the lock.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> ConflatingQueue<T> {
    /// Creates an empty queue with default backoff settings.
    pub fn new() -> Self {
        Self::with_config(DEFAULT_SNOOZE_ITERS)
    }

    /// Creates an empty queue with a custom number of backoff snooze
    /// iterations before a blocked [`take`](Self::take) parks.
    ///
    /// Higher values burn more CPU but reduce wakeup latency for bursty
    /// producers; `0` parks immediately.
    pub fn with_config(snooze_iters: usize) -> Self {
        ConflatingQueue {
            lane: CachePadded::new(Mutex::new(Lane {
                slots: VecDeque::new(),
                interrupts: 0,
            })),
            available: Condvar::new(),
            conflation: CachePadded::new(Mutex::new(HashMap::new())),
            snooze_iters,
        }
    }

    /// Pushes a message, conflating keyed messages opportunistically.
    ///
    /// Vanilla messages append a fresh slot at the tail and touch only the
    /// lane lock. Keyed messages enter the conflation domain: if the key has
    /// a live, undelivered slot, its payload is replaced in place and the
    /// slot keeps its position; otherwise a fresh slot is appended and the
    /// index repointed at it.
    ///
    /// After `push` returns, the next `take`/`drain` that reaches this key
    /// observes this payload unless a later push supersedes it first.
    ///
    /// # Example
    ///
    /// ```
    /// use conflating_queue::{ConflatingQueue, Message};
    ///
    /// let q = ConflatingQueue::new();
    /// q.push(Message::conflatable("k", 1).unwrap());
    /// q.push(Message::conflatable("k", 2).unwrap());
    ///
    /// assert_eq!(q.take().unwrap().into_payload(), 2);
    /// assert!(q.is_empty());
    /// ```
    pub fn push(&self, message: Message<T>) {
        let (key, payload) = message.into_parts();
        match key {
            None => self.append(Arc::new(Slot::new(None, payload))),
            Some(key) => {
                let mut index = lock(&self.conflation);
                if let Some(slot) = index.get(key.as_ref()) {
                    // Live slot for this key: conflate in place. A slot that
                    // was already unlinked (delivered or swept) must not be
                    // mutated; fall through and create a fresh one.
                    if slot.linked.load(Ordering::Acquire) {
                        *lock(&slot.payload) = Some(payload);
                        return;
                    }
                }
                let slot = Arc::new(Slot::new(Some(Arc::clone(&key)), payload));
                self.append(Arc::clone(&slot));
                index.insert(key, slot);
            }
        }
    }

    /// Appends a slot to the lane tail and wakes one waiter.
    fn append(&self, slot: Arc<Slot<T>>) {
        let mut lane = lock(&self.lane);
        lane.slots.push_back(slot);
        drop(lane);
        self.available.notify_one();
    }

    /// Blocking dequeue of the head slot.
    ///
    /// Suspends until the queue is non-empty. Each arriving slot satisfies
    /// exactly one waiter; two concurrent takers never receive the same
    /// slot. The wait has three phases: an immediate attempt, a bounded
    /// backoff spin, then a condvar park.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if [`interrupt`](Self::interrupt) is called
    /// after this taker started waiting, whichever phase of the wait it is
    /// in. No slot is consumed and the queue state is unchanged; the caller
    /// may retry.
    ///
    /// # Example
    ///
    /// ```
    /// use conflating_queue::{ConflatingQueue, Message};
    /// use std::sync::Arc;
    /// use std::thread;
    ///
    /// let q = Arc::new(ConflatingQueue::new());
    /// let producer = Arc::clone(&q);
    ///
    /// thread::spawn(move || producer.push(Message::vanilla(42)));
    ///
    /// assert_eq!(q.take().unwrap().into_payload(), 42);
    /// ```
    pub fn take(&self) -> Result<Message<T>, Interrupted> {
        // Fast path. The interrupt generation is snapshotted here, under the
        // lane lock, so a bump during any later phase is observed: comparing
        // against a snapshot taken only at park time would lose an interrupt
        // that fires while this taker is still spinning.
        let generation = {
            let mut lane = lock(&self.lane);
            if let Some(slot) = lane.slots.pop_front() {
                drop(lane);
                return Ok(self.deliver(slot));
            }
            lane.interrupts
        };

        // Backoff phase
        let backoff = Backoff::new();
        for _ in 0..self.snooze_iters {
            backoff.snooze();

            let mut lane = lock(&self.lane);
            if let Some(slot) = lane.slots.pop_front() {
                drop(lane);
                return Ok(self.deliver(slot));
            }
            if lane.interrupts != generation {
                return Err(Interrupted);
            }
        }

        // Park phase
        let mut lane = lock(&self.lane);
        loop {
            if let Some(slot) = lane.slots.pop_front() {
                drop(lane);
                return Ok(self.deliver(slot));
            }

            if lane.interrupts != generation {
                return Err(Interrupted);
            }

            lane = self
                .available
                .wait(lane)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Non-blocking dequeue of the head slot.
    ///
    /// Returns `None` if the queue is currently empty.
    ///
    /// # Example
    ///
    /// ```
    /// use conflating_queue::{ConflatingQueue, Message};
    ///
    /// let q = ConflatingQueue::new();
    /// assert!(q.try_take().is_none());
    ///
    /// q.push(Message::vanilla(1));
    /// assert_eq!(q.try_take().unwrap().into_payload(), 1);
    /// ```
    pub fn try_take(&self) -> Option<Message<T>> {
        self.try_pop().map(|slot| self.deliver(slot))
    }

    fn try_pop(&self) -> Option<Arc<Slot<T>>> {
        lock(&self.lane).slots.pop_front()
    }

    /// Turns a popped slot into a delivered message.
    ///
    /// For keyed slots this enters the conflation domain so that unlinking,
    /// payload extraction, and index cleanup are one atomic step with respect
    /// to conflating pushes: a push that lands before this step is observed
    /// here (latest value wins), a push that lands after it creates a fresh
    /// slot.
    fn deliver(&self, slot: Arc<Slot<T>>) -> Message<T> {
        if let Some(key) = &slot.key {
            let mut index = lock(&self.conflation);
            slot.linked.store(false, Ordering::Release);
            let payload = take_payload(&slot);
            if index
                .get(key.as_ref())
                .is_some_and(|current| Arc::ptr_eq(current, &slot))
            {
                index.remove(key.as_ref());
            }
            Message::from_parts(Some(Arc::clone(key)), payload)
        } else {
            // Vanilla slots never appear in the index; no lock needed.
            slot.linked.store(false, Ordering::Release);
            Message::from_parts(None, take_payload(&slot))
        }
    }

    /// Removes and returns every queued message in FIFO order.
    ///
    /// Atomic with respect to pushes: the lane and the conflation domain are
    /// held together while the sequence is detached, so no concurrent push
    /// can interleave a slot into the middle of the drained collection or be
    /// lost between the collection and the post-drain queue.
    ///
    /// Returns an empty vec if the queue was empty; never blocks waiting for
    /// messages.
    ///
    /// # Example
    ///
    /// ```
    /// use conflating_queue::{ConflatingQueue, Message};
    ///
    /// let q = ConflatingQueue::new();
    /// q.push(Message::vanilla(1));
    /// q.push(Message::conflatable("k", 2).unwrap());
    ///
    /// let batch = q.drain();
    /// assert_eq!(batch.len(), 2);
    /// assert!(q.is_empty());
    /// assert!(q.drain().is_empty());
    /// ```
    pub fn drain(&self) -> Vec<Message<T>> {
        let mut index = lock(&self.conflation);
        let detached: Vec<Arc<Slot<T>>> = {
            let mut lane = lock(&self.lane);
            lane.slots.drain(..).collect()
        };

        detached
            .into_iter()
            .map(|slot| {
                slot.linked.store(false, Ordering::Release);
                let payload = take_payload(&slot);
                if let Some(key) = &slot.key {
                    if index
                        .get(key.as_ref())
                        .is_some_and(|current| Arc::ptr_eq(current, &slot))
                    {
                        index.remove(key.as_ref());
                    }
                }
                Message::from_parts(slot.key.clone(), payload)
            })
            .collect()
    }

    /// Reclaims orphaned slots left behind by races between conflation and
    /// delivery.
    ///
    /// Intended to run from a periodic timer, off the push/take hot path, to
    /// bound memory when consumers are slow. If the queue is empty the index
    /// is cleared unconditionally; otherwise any keyed slot whose index entry
    /// points at a *different* slot is removed. Survivors keep their relative
    /// order and their latest payloads.
    ///
    /// Under this module's locking this is a safety net, not a correctness
    /// requirement: the public API cannot create orphans.
    pub fn sweep(&self) {
        let mut index = lock(&self.conflation);
        let mut lane = lock(&self.lane);

        if lane.slots.is_empty() {
            if !index.is_empty() {
                index.clear();
                log::debug!("sweep: cleared index of empty queue");
            }
            return;
        }

        let before = lane.slots.len();
        lane.slots.retain(|slot| {
            let Some(key) = &slot.key else {
                return true;
            };
            // A missing entry means the key is not superseded; only a slot
            // whose entry points elsewhere is an orphaned duplicate.
            let live = match index.get(key.as_ref()) {
                Some(current) => Arc::ptr_eq(current, slot),
                None => true,
            };
            if !live {
                slot.linked.store(false, Ordering::Release);
            }
            live
        });

        let swept = before - lane.slots.len();
        if swept > 0 {
            log::debug!("sweep: reclaimed {swept} orphaned slot(s)");
        }
    }

    /// Fails every currently waiting [`take`](Self::take) with
    /// [`Interrupted`].
    ///
    /// Queued messages are untouched and subsequent calls to any operation
    /// behave normally; interrupted takers may simply retry. Takers that can
    /// be satisfied by an available slot are handed the slot instead of the
    /// error.
    pub fn interrupt(&self) {
        let mut lane = lock(&self.lane);
        lane.interrupts += 1;
        drop(lane);
        self.available.notify_all();
    }

    /// Returns `true` if the queue currently holds no slots.
    ///
    /// Advisory only under concurrent pushes: the answer may be stale the
    /// instant it returns.
    pub fn is_empty(&self) -> bool {
        lock(&self.lane).slots.is_empty()
    }

    /// Returns the current number of queued slots.
    ///
    /// Advisory only, same caveat as [`is_empty`](Self::is_empty).
    pub fn len(&self) -> usize {
        lock(&self.lane).slots.len()
    }
}

/// Moves the payload out of a slot being delivered.
///
/// Every slot is popped exactly once and conflation only ever replaces
/// `Some` with `Some`, so the payload is present by construction.
fn take_payload<T>(slot: &Slot<T>) -> T {
    lock(&slot.payload)
        .take()
        .expect("slot payload taken twice")
}

impl<T> Default for ConflatingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ConflatingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflatingQueue")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error returned when [`ConflatingQueue::take`] is interrupted while
/// waiting.
///
/// The queue state is unchanged: no slot was consumed. The caller may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "take interrupted while waiting")
    }
}

impl std::error::Error for Interrupted {}
