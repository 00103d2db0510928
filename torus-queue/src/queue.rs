//! The unbounded SPSC queue: a circular ring of power-of-two blocks.
//!
//! # Design
//!
//! ```text
//!             ┌─────────────────────────────────────────────┐
//!             ▼                                             │
//!       ┌──────────┐       ┌──────────┐       ┌──────────┐  │
//!       │ Block 16 │─next─►│ Block 32 │─next─►│ Block 64 │──┘
//!       └──────────┘       └──────────┘       └──────────┘
//!             ▲                                     ▲
//!        front_block                           tail_block
//!        (consumer)                            (producer)
//! ```
//!
//! The queue is a circular singly-linked list of fixed blocks. The consumer
//! drains `front_block`; the producer fills `tail_block`. When the tail
//! block fills up, the producer moves into the next block of the ring if the
//! consumer has fully drained it, and otherwise splices in a freshly
//! allocated block of twice the previous largest size. Blocks are never
//! removed or relocated, so a full block the producer has moved past keeps
//! its elements in place until the consumer reaches them, and a drained ring
//! serves any burst up to its capacity without touching the allocator again.
//!
//! Each side owns its variables outright: the producer writes `tail_block`,
//! every block's `tail` and `next`; the consumer writes `front_block` and
//! every block's `front`. The other side only ever reads them, through
//! relaxed cells, with explicit acquire/release fences at the few points
//! where one side publishes state to the other. Neither side can block the
//! other, and there are no compare-and-swap loops anywhere.
//!
//! # The tail snapshot
//!
//! [`Consumer::pop`] reads `tail_block` *before* the front block's indices.
//! The order matters: checked the other way around, the producer could fill
//! the front block and move past it between the two reads, and the consumer
//! would mistake the block it just saw empty for the end of the queue,
//! stranding a full block behind the tail. With the snapshot taken first,
//! staleness only ever makes the consumer report empty a beat early; it can
//! never skip data.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{compiler_fence, fence, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use crate::block::Block;
use crate::cell::RelaxedPtr;
use crate::Full;

/// Creates an unbounded SPSC queue able to hold `max_size` elements before
/// its first growth allocation.
///
/// The initial block gets `max_size + 1` slots, rounded up to a power of two
/// (one slot per block always stays unoccupied). Further capacity is added
/// by [`Producer::push`] in doubling steps and is never released until both
/// endpoints have been dropped.
///
/// # Panics
///
/// Panics if `max_size` is zero.
///
/// # Example
///
/// ```
/// let (mut tx, mut rx) = torus_queue::queue::<u64>(15);
///
/// tx.push(1);
/// tx.push(2);
///
/// assert_eq!(rx.pop(), Some(1));
/// assert_eq!(rx.pop(), Some(2));
/// assert_eq!(rx.pop(), None);
/// ```
pub fn queue<T>(max_size: usize) -> (Producer<T>, Consumer<T>) {
    assert!(max_size >= 1, "max_size must be at least 1");

    let size = (max_size + 1).next_power_of_two();
    let first = Block::<T>::allocate(size);
    unsafe { first.as_ref() }.next.set(first.as_ptr());

    let shared = Arc::new(Shared {
        front_block: CachePadded::new(RelaxedPtr::new(first.as_ptr())),
        tail_block: CachePadded::new(RelaxedPtr::new(first.as_ptr())),
        _marker: PhantomData,
    });

    (
        Producer {
            shared: Arc::clone(&shared),
            largest_block_size: size,
        },
        Consumer { shared },
    )
}

/// State shared by the two endpoints: the block cursors, each on its own
/// cache line.
struct Shared<T> {
    /// Block currently being drained. Consumer-owned, read by both threads.
    front_block: CachePadded<RelaxedPtr<Block<T>>>,
    /// Block currently being filled. Producer-owned, read by both threads.
    tail_block: CachePadded<RelaxedPtr<Block<T>>>,
    /// The ring owns its elements; dropping `Shared` drops them.
    _marker: PhantomData<T>,
}

// Safety: the protocol in this module keeps each field single-writer, and
// the elements themselves only ever move between the two threads.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    /// Sums `(tail - front) & mask` over the blocks from the front cursor to
    /// the tail cursor.
    ///
    /// Both cursors and all indices may move concurrently, so the result is
    /// a point-in-time estimate: never negative, never more than the number
    /// of elements that were logically queued at some instant during the
    /// call.
    fn size_approx(&self) -> usize {
        let tail_block = self.tail_block.get();
        fence(Ordering::Acquire);

        let mut block = self.front_block.get();
        let mut count = 0;
        loop {
            let b = unsafe { &*block };
            fence(Ordering::Acquire);
            count += b.tail.get().wrapping_sub(b.front.get()) & b.mask();
            if block == tail_block {
                break;
            }
            // Blocks at or before the tail snapshot always have a published
            // `next`; the walk never sees a link mid-splice.
            block = b.next.get();
        }
        count
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // Both endpoints are gone; the Arc release sequence has already
        // synchronized their final writes into this thread. Walk the ring
        // once from the front cursor, dropping survivors oldest-first, then
        // free each block.
        let front_block = self.front_block.get();
        let mut block = front_block;
        loop {
            let b = unsafe { &*block };
            let next = b.next.get();

            let tail = b.tail.get();
            let mut index = b.front.get();
            while index != tail {
                unsafe { ptr::drop_in_place(b.slot(index)) };
                index = (index + 1) & b.mask();
            }

            unsafe { Block::deallocate(NonNull::new_unchecked(block)) };
            block = next;
            if block == front_block {
                break;
            }
        }
    }
}

/// The producing half of the queue.
///
/// Only this endpoint can enqueue. Move it to the producer thread; all
/// mutating operations take `&mut self`, so exactly one thread can drive it
/// at a time.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    /// Slot count of the most recently allocated block; doubles on growth.
    largest_block_size: usize,
}

impl<T> Producer<T> {
    /// Enqueues `value`, allocating a new block if the ring is full.
    ///
    /// Never fails and never waits for the consumer: when no block has room,
    /// a block of twice the previous largest size is spliced into the ring.
    /// If the allocator itself fails, the process aborts per the global
    /// allocator's convention; the queue is not modified before the new
    /// block is fully linked. Use [`try_push`](Self::try_push) to refuse
    /// rather than grow.
    #[inline]
    pub fn push(&mut self, value: T) {
        if let Err(Full(value)) = self.try_push(value) {
            self.push_grow(value);
        }
    }

    /// Enqueues `value` if any block in the ring has room for it.
    ///
    /// Never allocates. Returns `Err(Full(value))`, handing the value back,
    /// if every block is occupied.
    ///
    /// # Example
    ///
    /// ```
    /// let (mut tx, mut rx) = torus_queue::queue::<u32>(1);
    ///
    /// assert!(tx.try_push(1).is_ok());
    /// assert!(tx.try_push(2).is_err());
    ///
    /// assert_eq!(rx.pop(), Some(1));
    /// assert!(tx.try_push(2).is_ok());
    /// ```
    #[inline]
    pub fn try_push(&mut self, value: T) -> Result<(), Full<T>> {
        let tail_block = self.shared.tail_block.get();
        let b = unsafe { &*tail_block };
        let block_front = b.front.get();
        let block_tail = b.tail.get();
        fence(Ordering::Acquire);

        let next_tail = (block_tail + 1) & b.mask();
        if next_tail != block_front {
            // Room in the current block.
            unsafe { b.slot(block_tail).write(value) };
            fence(Ordering::Release);
            b.tail.set(next_tail);
            return Ok(());
        }

        if b.next.get() != self.shared.front_block.get() {
            // The next block sits strictly between the two cursors, so the
            // consumer has fully drained it; start filling it. The front
            // block itself is never entered from this side: its remaining
            // elements are older than anything in the tail block.
            fence(Ordering::Acquire);
            let next_block = b.next.get();
            let nb = unsafe { &*next_block };
            let next_block_tail = nb.tail.get();
            fence(Ordering::Acquire);
            debug_assert_eq!(nb.front.get(), next_block_tail);

            unsafe { nb.slot(next_block_tail).write(value) };
            nb.tail.set((next_block_tail + 1) & nb.mask());

            fence(Ordering::Release);
            self.shared.tail_block.set(next_block);
            return Ok(());
        }

        Err(Full(value))
    }

    /// Splices a freshly allocated block in after the tail block, with
    /// `value` in its first slot.
    #[cold]
    fn push_grow(&mut self, value: T) {
        let tail_block = self.shared.tail_block.get();
        let b = unsafe { &*tail_block };

        let size = self.largest_block_size * 2;
        let new_block = Block::<T>::allocate(size);
        self.largest_block_size = size;
        let nb = unsafe { new_block.as_ref() };

        unsafe { nb.slot(0).write(value) };
        nb.tail.set(1);

        nb.next.set(b.next.get());
        b.next.set(new_block.as_ptr());

        // The consumer may see the spliced `next` before the new tail
        // cursor, but it never advances past the tail cursor, so it cannot
        // enter the new block until the store below publishes it.
        fence(Ordering::Release);
        self.shared.tail_block.set(new_block.as_ptr());
    }

    /// Number of elements the queue can hold without a growth allocation.
    ///
    /// One slot per block is always unoccupied, so this is the total slot
    /// count minus the number of blocks. Only the producer changes the ring,
    /// which is what makes this walk exact from this side.
    pub fn capacity(&self) -> usize {
        let start = self.shared.tail_block.get();
        let mut block = start;
        let mut capacity = 0;
        loop {
            let b = unsafe { &*block };
            capacity += b.mask();
            block = b.next.get();
            if block == start {
                break;
            }
        }
        capacity
    }

    /// Approximate number of queued elements; see [`Consumer::len`].
    #[inline]
    pub fn len(&self) -> usize {
        self.shared.size_approx()
    }

    /// Returns `true` if the queue appears empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

/// The consuming half of the queue.
///
/// Only this endpoint can dequeue. Move it to the consumer thread; `pop` and
/// `discard` take `&mut self`, so exactly one thread can drive it at a time.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Consumer<T> {
    /// Dequeues the oldest element, or returns `None` if the queue is
    /// observed empty.
    pub fn pop(&mut self) -> Option<T> {
        // The tail cursor must be snapshotted before the front block's
        // indices are read; see the module docs.
        let tail_block_at_start = self.shared.tail_block.get();
        fence(Ordering::Acquire);

        let front_block = self.shared.front_block.get();
        let fb = unsafe { &*front_block };
        let block_front = fb.front.get();
        let block_tail = fb.tail.get();
        fence(Ordering::Acquire);

        if block_front != block_tail {
            // Front block holds data; take from it.
            let value = unsafe { fb.slot(block_front).read() };
            fence(Ordering::Release);
            fb.front.set((block_front + 1) & fb.mask());
            return Some(value);
        }

        if front_block != tail_block_at_start {
            // Front block is drained but the tail has moved past it, so the
            // next block necessarily holds the oldest element. `next` needs
            // no acquire of its own: it is only ever rewritten while its
            // block is the tail block, and the snapshot fence above already
            // covers the case where this block recently was.
            let next_block = fb.next.get();
            let nb = unsafe { &*next_block };
            let next_block_front = nb.front.get();
            fence(Ordering::Acquire);
            debug_assert_ne!(next_block_front, nb.tail.get());

            // Hand the drained block back to the producer before moving on;
            // this publishes the front-index writes of the preceding pops.
            fence(Ordering::Release);
            self.shared.front_block.set(next_block);

            compiler_fence(Ordering::Release);

            let value = unsafe { nb.slot(next_block_front).read() };
            fence(Ordering::Release);
            nb.front.set((next_block_front + 1) & nb.mask());
            return Some(value);
        }

        // Front block is empty and it was the tail block at the snapshot:
        // nothing to take.
        None
    }

    /// Returns a reference to the oldest element without dequeuing it.
    ///
    /// The borrow holds this endpoint immutably, so the referent cannot be
    /// popped out from under the reference; it stays valid until the next
    /// [`pop`](Self::pop) or [`discard`](Self::discard).
    ///
    /// # Example
    ///
    /// ```
    /// let (mut tx, mut rx) = torus_queue::queue::<String>(7);
    ///
    /// tx.push("front".to_string());
    /// tx.push("back".to_string());
    ///
    /// assert_eq!(rx.peek().map(String::as_str), Some("front"));
    /// assert_eq!(rx.pop().as_deref(), Some("front"));
    /// ```
    pub fn peek(&self) -> Option<&T> {
        let tail_block_at_start = self.shared.tail_block.get();
        fence(Ordering::Acquire);

        let front_block = self.shared.front_block.get();
        let fb = unsafe { &*front_block };
        let block_front = fb.front.get();
        let block_tail = fb.tail.get();
        fence(Ordering::Acquire);

        if block_front != block_tail {
            return Some(unsafe { &*fb.slot(block_front) });
        }

        if front_block != tail_block_at_start {
            let nb = unsafe { &*fb.next.get() };
            let next_block_front = nb.front.get();
            fence(Ordering::Acquire);
            debug_assert_ne!(next_block_front, nb.tail.get());
            return Some(unsafe { &*nb.slot(next_block_front) });
        }

        None
    }

    /// Drops the oldest element in place without returning it.
    ///
    /// Returns `true` if an element was discarded, `false` if the queue was
    /// observed empty. Equivalent to `pop().is_some()` minus the move out of
    /// the slot.
    pub fn discard(&mut self) -> bool {
        let tail_block_at_start = self.shared.tail_block.get();
        fence(Ordering::Acquire);

        let front_block = self.shared.front_block.get();
        let fb = unsafe { &*front_block };
        let block_front = fb.front.get();
        let block_tail = fb.tail.get();
        fence(Ordering::Acquire);

        if block_front != block_tail {
            unsafe { ptr::drop_in_place(fb.slot(block_front)) };
            fence(Ordering::Release);
            fb.front.set((block_front + 1) & fb.mask());
            return true;
        }

        if front_block != tail_block_at_start {
            let next_block = fb.next.get();
            let nb = unsafe { &*next_block };
            let next_block_front = nb.front.get();
            fence(Ordering::Acquire);
            debug_assert_ne!(next_block_front, nb.tail.get());

            fence(Ordering::Release);
            self.shared.front_block.set(next_block);

            compiler_fence(Ordering::Release);

            unsafe { ptr::drop_in_place(nb.slot(next_block_front)) };
            fence(Ordering::Release);
            nb.front.set((next_block_front + 1) & nb.mask());
            return true;
        }

        false
    }

    /// Approximate number of queued elements.
    ///
    /// Exact when no producer is running concurrently. Under concurrency it
    /// is a snapshot: never negative, and never more than the number of
    /// elements that were logically queued at some instant during the call.
    #[inline]
    pub fn len(&self) -> usize {
        self.shared.size_approx()
    }

    /// Returns `true` if the queue appears empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
