//! A blocking layer over [`torus_queue`]'s unbounded SPSC queue.
//!
//! The queue itself never blocks: the producer grows the ring instead of
//! waiting, and a consumer that finds the queue empty simply gets `None`.
//! This crate adds the missing piece for consumers that want to *sleep*
//! until data arrives: a counting semaphore whose permit count always equals
//! the number of items pushed but not yet claimed.
//!
//! # Design
//!
//! ```text
//! send() ──► push ──► permits += 1 ──► receiver parked? ── yes ─► unpark (syscall)
//!                                           │
//!                                           no ─► done (just a load)
//!
//! recv() ──► claim permit ──► spin + snooze ──► park until signalled
//! ```
//!
//! Waking a sleeping thread costs a syscall; checking a flag costs a load.
//! The receiver raises a cache-padded `parked` flag just before it goes to
//! sleep, so the sender only pays for the unpark when the receiver is
//! actually sleeping. Before parking, the receiver spins briefly and backs
//! off with [`Backoff::snooze`], which catches data that arrives "soon"
//! without ever touching the OS.
//!
//! Because a permit is posted only after its item is published, a successful
//! claim is always followed by a successful pop: [`Receiver::recv`] never
//! observes a spurious empty queue.
//!
//! # Disconnection
//!
//! Dropping the [`Sender`] wakes the receiver; once the remaining items are
//! drained, [`Receiver::recv`] returns [`RecvError`] instead of sleeping
//! forever. Dropping the [`Receiver`] is observable through
//! [`Sender::is_disconnected`]; sends continue to succeed (the queue is
//! unbounded) and their items are dropped with the queue.
//!
//! # Example
//!
//! ```
//! use std::thread;
//!
//! let (mut tx, mut rx) = torus_channel::channel::<u64>(16);
//!
//! thread::spawn(move || {
//!     tx.send(42);
//! });
//!
//! assert_eq!(rx.recv(), Ok(42));
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, missing_debug_implementations)]

use core::fmt;
use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_utils::sync::{Parker, Unparker};
use crossbeam_utils::{Backoff, CachePadded};
use torus_queue::{queue, Consumer, Full, Producer};

/// Number of backoff snoozes the receiver burns through before parking.
const SNOOZE_ITERS: usize = 8;

/// Counting semaphore tracking pushed-but-unclaimed items.
///
/// Only the receiver ever decrements, so a nonzero observation cannot be
/// stolen by another claimant. The permit is posted with `Release` after the
/// queue's own publication and claimed with `Acquire`, so a claimed permit
/// implies a visible, poppable item.
struct Semaphore {
    count: CachePadded<AtomicUsize>,
    /// Raised by the receiver just before parking; checked by the sender
    /// after every signal.
    receiver_parked: CachePadded<AtomicBool>,
}

impl Semaphore {
    fn new() -> Self {
        Self {
            count: CachePadded::new(AtomicUsize::new(0)),
            receiver_parked: CachePadded::new(AtomicBool::new(false)),
        }
    }

    /// Claims one permit if any are available.
    #[inline]
    fn try_acquire(&self) -> bool {
        if self.count.load(Ordering::Acquire) == 0 {
            return false;
        }
        self.count.fetch_sub(1, Ordering::AcqRel);
        true
    }

    /// Posts one permit; returns `true` if the receiver needs an unpark.
    ///
    /// The fence pairs with the one in the receiver's park sequence: either
    /// this load sees the raised `receiver_parked` flag, or the receiver's
    /// post-flag claim sees this permit. Both cannot miss.
    #[inline]
    fn signal(&self) -> bool {
        self.count.fetch_add(1, Ordering::Release);
        fence(Ordering::SeqCst);
        self.receiver_parked.load(Ordering::Relaxed)
    }
}

struct Shared {
    sem: Semaphore,
    sender_dropped: AtomicBool,
    receiver_dropped: AtomicBool,
}

/// Creates an unbounded blocking SPSC channel.
///
/// `max_size` is the number of elements the underlying queue holds before
/// its first growth allocation; see [`torus_queue::queue`].
///
/// # Panics
///
/// Panics if `max_size` is zero.
///
/// # Example
///
/// ```
/// let (mut tx, mut rx) = torus_channel::channel::<String>(16);
///
/// tx.send("hello".to_string());
/// assert_eq!(rx.recv().as_deref(), Ok("hello"));
/// ```
pub fn channel<T>(max_size: usize) -> (Sender<T>, Receiver<T>) {
    let (producer, consumer) = queue(max_size);

    let shared = Arc::new(Shared {
        sem: Semaphore::new(),
        sender_dropped: AtomicBool::new(false),
        receiver_dropped: AtomicBool::new(false),
    });

    let parker = Parker::new();
    let receiver_unparker = parker.unparker().clone();

    (
        Sender {
            producer,
            shared: Arc::clone(&shared),
            receiver_unparker,
        },
        Receiver {
            consumer,
            shared,
            parker,
        },
    )
}

/// The sending half of the channel.
///
/// Sends never block: the underlying queue grows instead. Every successful
/// send posts one semaphore permit and wakes the receiver if it is parked.
pub struct Sender<T> {
    producer: Producer<T>,
    shared: Arc<Shared>,
    receiver_unparker: Unparker,
}

impl<T> Sender<T> {
    /// Sends a value, growing the underlying queue if it is full.
    pub fn send(&mut self, value: T) {
        self.producer.push(value);
        self.notify();
    }

    /// Sends a value only if the queue already has room, without allocating.
    ///
    /// On success the receiver is signalled exactly as for
    /// [`send`](Self::send).
    pub fn try_send(&mut self, value: T) -> Result<(), Full<T>> {
        self.producer.try_push(value)?;
        self.notify();
        Ok(())
    }

    #[inline]
    fn notify(&self) {
        if self.shared.sem.signal() {
            self.receiver_unparker.unpark();
        }
    }

    /// Approximate number of queued elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.producer.len()
    }

    /// Returns `true` if the queue appears empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.producer.is_empty()
    }

    /// Number of elements the queue can hold without a growth allocation.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.producer.capacity()
    }

    /// Returns `true` if the receiver has been dropped.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        self.shared.receiver_dropped.load(Ordering::SeqCst)
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.shared.sender_dropped.store(true, Ordering::SeqCst);
        // Wake the receiver so it observes the disconnect instead of
        // parking forever.
        self.receiver_unparker.unpark();
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("capacity", &self.capacity())
            .field("disconnected", &self.is_disconnected())
            .finish_non_exhaustive()
    }
}

/// The receiving half of the channel.
pub struct Receiver<T> {
    consumer: Consumer<T>,
    shared: Arc<Shared>,
    parker: Parker,
}

impl<T> Receiver<T> {
    /// Receives a value, blocking until one is available.
    ///
    /// Waits in three phases: an immediate claim, a bounded
    /// [`Backoff::snooze`] loop, then parking until the sender signals.
    /// Returns `Err(RecvError)` only once the sender has been dropped *and*
    /// every remaining item has been drained.
    pub fn recv(&mut self) -> Result<T, RecvError> {
        if self.shared.sem.try_acquire() {
            return Ok(self.take());
        }

        let backoff = Backoff::new();
        for _ in 0..SNOOZE_ITERS {
            backoff.snooze();
            if self.shared.sem.try_acquire() {
                return Ok(self.take());
            }
        }

        loop {
            self.shared.sem.receiver_parked.store(true, Ordering::Relaxed);
            fence(Ordering::SeqCst);

            // Re-check after raising the flag: the sender re-reads the flag
            // after every signal, so one of the two sides must observe the
            // other.
            if self.shared.sem.try_acquire() {
                self.shared
                    .sem
                    .receiver_parked
                    .store(false, Ordering::Relaxed);
                return Ok(self.take());
            }

            if self.shared.sender_dropped.load(Ordering::SeqCst) {
                self.shared
                    .sem
                    .receiver_parked
                    .store(false, Ordering::Relaxed);
                // A final permit may have been posted between the claim
                // above and the disconnect check.
                if self.shared.sem.try_acquire() {
                    return Ok(self.take());
                }
                return Err(RecvError);
            }

            self.parker.park();
            self.shared
                .sem
                .receiver_parked
                .store(false, Ordering::Relaxed);

            if self.shared.sem.try_acquire() {
                return Ok(self.take());
            }
        }
    }

    /// Receives a value, giving up once `timeout` has elapsed.
    ///
    /// Identical to [`recv`](Self::recv) except that the park phase honours
    /// a deadline; on expiry a final claim is attempted before reporting
    /// [`RecvTimeoutError::Timeout`].
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        if self.shared.sem.try_acquire() {
            return Ok(self.take());
        }

        let deadline = Instant::now() + timeout;

        let backoff = Backoff::new();
        for _ in 0..SNOOZE_ITERS {
            backoff.snooze();
            if self.shared.sem.try_acquire() {
                return Ok(self.take());
            }
        }

        loop {
            self.shared.sem.receiver_parked.store(true, Ordering::Relaxed);
            fence(Ordering::SeqCst);

            if self.shared.sem.try_acquire() {
                self.shared
                    .sem
                    .receiver_parked
                    .store(false, Ordering::Relaxed);
                return Ok(self.take());
            }

            if self.shared.sender_dropped.load(Ordering::SeqCst) {
                self.shared
                    .sem
                    .receiver_parked
                    .store(false, Ordering::Relaxed);
                if self.shared.sem.try_acquire() {
                    return Ok(self.take());
                }
                return Err(RecvTimeoutError::Disconnected);
            }

            let now = Instant::now();
            if now >= deadline {
                self.shared
                    .sem
                    .receiver_parked
                    .store(false, Ordering::Relaxed);
                if self.shared.sem.try_acquire() {
                    return Ok(self.take());
                }
                return Err(RecvTimeoutError::Timeout);
            }

            self.parker.park_timeout(deadline - now);
            self.shared
                .sem
                .receiver_parked
                .store(false, Ordering::Relaxed);

            if self.shared.sem.try_acquire() {
                return Ok(self.take());
            }
        }
    }

    /// Receives a value if one is immediately available.
    ///
    /// The semaphore is consulted first; a claimed permit guarantees the
    /// subsequent dequeue succeeds.
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        if self.shared.sem.try_acquire() {
            return Ok(self.take());
        }
        if self.shared.sender_dropped.load(Ordering::SeqCst) {
            if self.shared.sem.try_acquire() {
                return Ok(self.take());
            }
            return Err(TryRecvError::Disconnected);
        }
        Err(TryRecvError::Empty)
    }

    /// Returns a reference to the oldest element without claiming a permit.
    ///
    /// A later `recv`/`try_recv` still sees (and consumes) the element.
    #[inline]
    pub fn peek(&self) -> Option<&T> {
        self.consumer.peek()
    }

    /// Drops the oldest element in place, claiming its permit.
    ///
    /// Returns `false` if no permit was available.
    pub fn discard(&mut self) -> bool {
        if !self.shared.sem.try_acquire() {
            return false;
        }
        if !self.consumer.discard() {
            unreachable!("semaphore permit held but the queue was empty");
        }
        true
    }

    fn take(&mut self) -> T {
        match self.consumer.pop() {
            Some(value) => value,
            None => unreachable!("semaphore permit held but the queue was empty"),
        }
    }

    /// Approximate number of queued elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.consumer.len()
    }

    /// Returns `true` if the queue appears empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    /// Returns `true` if the sender has been dropped.
    ///
    /// Items already queued remain receivable after disconnection.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        self.shared.sender_dropped.load(Ordering::SeqCst)
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.shared.receiver_dropped.store(true, Ordering::SeqCst);
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("len", &self.len())
            .field("disconnected", &self.is_disconnected())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error returned by [`Receiver::recv`] when the sender has been dropped and
/// no items remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvError;

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel disconnected")
    }
}

impl std::error::Error for RecvError {}

/// Error returned by [`Receiver::recv_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    /// No item arrived within the timeout.
    Timeout,
    /// The sender has been dropped and no items remain.
    Disconnected,
}

impl RecvTimeoutError {
    /// Returns `true` if this error is the `Timeout` variant.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Returns `true` if this error is the `Disconnected` variant.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for RecvTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out waiting on channel"),
            Self::Disconnected => write!(f, "channel disconnected"),
        }
    }
}

impl std::error::Error for RecvTimeoutError {}

/// Error returned by [`Receiver::try_recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// The channel is empty but still connected.
    Empty,
    /// The sender has been dropped and no items remain.
    Disconnected,
}

impl TryRecvError {
    /// Returns `true` if this error is the `Empty` variant.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns `true` if this error is the `Disconnected` variant.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "channel empty"),
            Self::Disconnected => write!(f, "channel disconnected"),
        }
    }
}

impl std::error::Error for TryRecvError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    // ============================================================================
    // Basic Operations
    // ============================================================================

    #[test]
    fn basic_send_recv() {
        let (mut tx, mut rx) = channel::<u64>(4);

        tx.send(1);
        tx.send(2);
        tx.send(3);

        assert_eq!(rx.recv(), Ok(1));
        assert_eq!(rx.recv(), Ok(2));
        assert_eq!(rx.recv(), Ok(3));
    }

    #[test]
    fn try_send_try_recv() {
        let (mut tx, mut rx) = channel::<u64>(2);

        assert!(tx.try_send(1).is_ok());
        assert!(tx.try_send(2).is_ok());
        assert!(tx.try_send(3).is_err());

        assert_eq!(rx.try_recv(), Ok(1));
        assert_eq!(rx.try_recv(), Ok(2));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn send_grows_past_capacity() {
        let (mut tx, mut rx) = channel::<u64>(2);

        for i in 0..100 {
            tx.send(i);
        }
        for i in 0..100 {
            assert_eq!(rx.recv(), Ok(i));
        }
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    // ============================================================================
    // Semaphore Accounting
    // ============================================================================

    #[test]
    fn permits_match_items_exactly() {
        let (mut tx, mut rx) = channel::<u64>(8);

        for i in 0..3 {
            tx.send(i);
        }
        for i in 0..3 {
            assert_eq!(rx.try_recv(), Ok(i));
        }
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn peek_does_not_claim_a_permit() {
        let (mut tx, mut rx) = channel::<u64>(4);

        tx.send(7);

        assert_eq!(rx.peek(), Some(&7));
        assert_eq!(rx.peek(), Some(&7));
        assert_eq!(rx.try_recv(), Ok(7));
        assert_eq!(rx.peek(), None);
    }

    #[test]
    fn discard_claims_a_permit() {
        let (mut tx, mut rx) = channel::<u64>(4);

        tx.send(1);
        tx.send(2);
        tx.send(3);

        assert!(rx.discard());
        assert_eq!(rx.recv(), Ok(2));
        assert!(rx.discard());
        assert!(!rx.discard());
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(rx.len(), 0);
    }

    // ============================================================================
    // Blocking
    // ============================================================================

    #[test]
    fn recv_blocks_until_send() {
        let (mut tx, mut rx) = channel::<u64>(4);

        let handle = thread::spawn(move || rx.recv().unwrap());

        thread::sleep(Duration::from_millis(20));
        tx.send(42);

        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn recv_timeout_expires_when_empty() {
        let (_tx, mut rx) = channel::<u64>(4);

        let start = Instant::now();
        let timeout = Duration::from_millis(50);
        assert_eq!(rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout));
        assert!(start.elapsed() >= timeout);
    }

    #[test]
    fn recv_timeout_receives_in_time() {
        let (mut tx, mut rx) = channel::<u64>(4);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.send(9);
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(9));
        handle.join().unwrap();
    }

    // ============================================================================
    // Disconnection
    // ============================================================================

    #[test]
    fn recv_drains_before_disconnect_error() {
        let (mut tx, mut rx) = channel::<u64>(4);

        tx.send(1);
        tx.send(2);
        drop(tx);

        assert_eq!(rx.recv(), Ok(1));
        assert_eq!(rx.recv(), Ok(2));
        assert_eq!(rx.recv(), Err(RecvError));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn dropping_sender_wakes_parked_receiver() {
        let (tx, mut rx) = channel::<u64>(4);

        let handle = thread::spawn(move || rx.recv());

        thread::sleep(Duration::from_millis(20));
        drop(tx);

        assert_eq!(handle.join().unwrap(), Err(RecvError));
    }

    #[test]
    fn recv_timeout_reports_disconnect() {
        let (tx, mut rx) = channel::<u64>(4);

        drop(tx);

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)),
            Err(RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn sender_observes_receiver_drop() {
        let (tx, rx) = channel::<u64>(4);

        assert!(!tx.is_disconnected());
        drop(rx);
        assert!(tx.is_disconnected());
    }

    // ============================================================================
    // Cross-Thread Stress
    // ============================================================================

    #[test]
    fn stress_blocking_fifo() {
        const COUNT: u64 = 1_000_000;

        let (mut tx, mut rx) = channel::<u64>(100);

        let producer = thread::spawn(move || {
            for i in 0..COUNT {
                tx.send(i);
            }
        });

        let consumer = thread::spawn(move || {
            let mut prev = None;
            for _ in 0..COUNT {
                let v = rx.recv().unwrap();
                if let Some(p) = prev {
                    assert!(v > p, "FIFO order violated: {v} after {p}");
                }
                prev = Some(v);
            }
            rx
        });

        producer.join().unwrap();
        let rx = consumer.join().unwrap();
        assert_eq!(rx.len(), 0);
    }
}
