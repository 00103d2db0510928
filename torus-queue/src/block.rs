//! Fixed-capacity blocks of raw element slots, the links of the queue's ring.

use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};

use crossbeam_utils::CachePadded;

use crate::cell::{RelaxedPtr, RelaxedUsize};

/// A power-of-two circular buffer of raw slots.
///
/// `front` and `tail` are block-local slot indices: the consumer owns
/// (writes) `front`, the producer owns `tail` and `next`. Slots in
/// `[front, tail)` modulo the size hold live elements; every other slot is
/// uninitialized storage. One slot always stays unoccupied so that
/// `front == tail` means empty rather than full.
///
/// The three mutable fields each sit on their own cache line. `next` is
/// barely contended but must not share a line with `tail`, which is.
#[repr(C)]
pub(crate) struct Block<T> {
    /// Next slot to dequeue from. Consumer-owned, read by both threads.
    pub(crate) front: CachePadded<RelaxedUsize>,
    /// Next slot to enqueue into. Producer-owned, read by both threads.
    pub(crate) tail: CachePadded<RelaxedUsize>,
    /// Next block in the ring. Producer-owned, only rewritten during growth.
    pub(crate) next: CachePadded<RelaxedPtr<Block<T>>>,
    data: *mut T,
    mask: usize,
}

impl<T> Block<T> {
    /// Allocates a detached, empty block with `size` slots and `next` unset.
    ///
    /// `size` must be a power of two, at least 2.
    pub(crate) fn allocate(size: usize) -> NonNull<Block<T>> {
        debug_assert!(size >= 2 && size.is_power_of_two());

        // Vec hands back element-aligned storage for the slot array; keep it
        // as a raw pointer and reconstitute the Vec only to free it.
        let data = ManuallyDrop::new(Vec::<T>::with_capacity(size)).as_mut_ptr();

        let block = Box::new(Block {
            front: CachePadded::new(RelaxedUsize::new(0)),
            tail: CachePadded::new(RelaxedUsize::new(0)),
            next: CachePadded::new(RelaxedPtr::new(ptr::null_mut())),
            data,
            mask: size - 1,
        });

        unsafe { NonNull::new_unchecked(Box::into_raw(block)) }
    }

    /// Frees the block header and its slot storage.
    ///
    /// # Safety
    ///
    /// `block` must have come from [`Block::allocate`], must not be reachable
    /// from any other live block, and its slots must no longer hold live
    /// elements. Whether a slot is live is a queue-level property, so the
    /// queue drops the elements before the blocks.
    pub(crate) unsafe fn deallocate(block: NonNull<Block<T>>) {
        let block = unsafe { Box::from_raw(block.as_ptr()) };
        let _ = unsafe { Vec::from_raw_parts(block.data, 0, block.size()) };
    }

    /// Number of slots, always a power of two.
    #[inline(always)]
    pub(crate) fn size(&self) -> usize {
        self.mask + 1
    }

    /// `size - 1`, for `&`-based index wrapping.
    #[inline(always)]
    pub(crate) fn mask(&self) -> usize {
        self.mask
    }

    /// Raw pointer to slot `index`.
    ///
    /// # Safety
    ///
    /// `index` must be less than [`size`](Self::size). The `[front, tail)`
    /// invariant governs whether the slot holds a live element; the caller
    /// must read or write accordingly.
    #[inline(always)]
    pub(crate) unsafe fn slot(&self, index: usize) -> *mut T {
        debug_assert!(index <= self.mask);
        unsafe { self.data.add(index) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_initializes_empty() {
        let block = Block::<u64>::allocate(8);

        unsafe {
            let b = block.as_ref();
            assert_eq!(b.size(), 8);
            assert_eq!(b.mask(), 7);
            assert_eq!(b.front.get(), 0);
            assert_eq!(b.tail.get(), 0);
            assert!(b.next.get().is_null());

            Block::deallocate(block);
        }
    }

    #[test]
    fn slots_are_distinct_and_writable() {
        let block = Block::<u64>::allocate(4);

        unsafe {
            let b = block.as_ref();
            b.slot(0).write(100);
            b.slot(3).write(103);

            assert_eq!(b.slot(0).read(), 100);
            assert_eq!(b.slot(3).read(), 103);

            Block::deallocate(block);
        }
    }

    #[test]
    fn zero_sized_slots() {
        let block = Block::<()>::allocate(4);

        unsafe {
            let b = block.as_ref();
            b.slot(0).write(());
            b.slot(0).read();

            Block::deallocate(block);
        }
    }
}
