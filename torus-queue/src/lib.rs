//! An unbounded lock-free queue for a single producer and a single consumer.
//!
//! The queue is a circular ring of fixed power-of-two blocks: the producer
//! fills one end, the consumer drains the other, and when the ring runs out
//! of room the producer splices in a new block of twice the previous largest
//! size. Elements never move once written, enqueue and dequeue are wait-free
//! (growth costs one allocation, amortized O(log n) over the queue's
//! lifetime), and the hot fields of the two sides live on separate cache
//! lines.
//!
//! # Quick Start
//!
//! ```
//! let (mut tx, mut rx) = torus_queue::queue::<u64>(15);
//!
//! tx.push(42);
//! assert_eq!(rx.pop(), Some(42));
//! ```
//!
//! # Threading model
//!
//! Exactly one thread may drive the [`Producer`] and one (other) thread the
//! [`Consumer`]. Both endpoints are `Send`, and every mutating operation
//! takes `&mut self`, so the single-producer single-consumer discipline is
//! enforced by the type system rather than by runtime checks.
//!
//! Cross-thread communication is a handful of relaxed loads and stores
//! bracketed by explicit acquire/release fences. There are no
//! compare-and-swap operations anywhere; on x86-64 the hot paths compile to
//! plain loads and stores.
//!
//! # When to use this
//!
//! - The producer must never wait: [`Producer::push`] grows instead of
//!   blocking or failing.
//! - Bursty workloads: a drained ring is reused in place, so steady-state
//!   traffic allocates nothing.
//!
//! For a consumer that sleeps instead of spinning when the queue is empty,
//! wrap the endpoints with `torus-channel`.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, missing_debug_implementations)]

use core::fmt;

mod block;
mod cell;
mod queue;

pub use queue::{queue, Consumer, Producer};

/// Error returned when pushing to a full queue.
///
/// Contains the value that could not be pushed, returning ownership to the
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full<T>(pub T);

impl<T> Full<T> {
    /// Returns the value that could not be pushed.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Display for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue is full")
    }
}

impl<T: fmt::Debug> std::error::Error for Full<T> {}
