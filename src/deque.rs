use crate::{
    NodeIndex,
    sync::{AtomicU32, AtomicUsize, Ordering, fence},
};
use core::fmt;
use crossbeam_utils::CachePadded;
use thiserror::Error;

/// Error returned when constructing a [`StealDeque`] with a bad capacity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QueueError {
    /// The requested capacity is zero or not a power of two.
    #[error("deque capacity must be a nonzero power of two, got {0}")]
    CapacityNotPowerOfTwo(usize),
}

/// A bounded single-owner/multi-thief deque of node indices.
///
/// The owning worker pushes and pops at the back (LIFO); any other worker
/// may steal from the front (FIFO from the thief's point of view). `front`
/// and `back` are monotonically increasing counters masked into a
/// power-of-two circular buffer.
///
/// Concurrency contract:
/// - `push`, `pop` and `clear` may only be called by the owner, and `clear`
///   not while a `pop` or `steal` is in flight.
/// - `steal` may be called from any thread, never blocks, and may return
///   `None` spuriously when it loses a race; the thief retries or moves on.
/// - With two or more elements present the owner and thieves touch disjoint
///   ends; the only contended case is the single remaining element, which is
///   resolved by a compare-and-swap on `front` that exactly one side wins.
/// - A release store of `back` publishes the slot write, so an element that
///   becomes visible to a thief is fully written.
pub struct StealDeque {
    buffer: Box<[AtomicU32]>,
    mask: usize,
    front: CachePadded<AtomicUsize>,
    back: CachePadded<AtomicUsize>,
}

// SAFETY: all shared state is atomic; slot reuse is fenced off by the
// index protocol described above.
unsafe impl Sync for StealDeque {}

impl StealDeque {
    /// Create a deque with room for `capacity` elements.
    ///
    /// # Errors
    /// If `capacity` is zero or not a power of two.
    pub fn with_capacity(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(QueueError::CapacityNotPowerOfTwo(capacity));
        }
        let buffer = (0..capacity).map(|_| AtomicU32::new(0)).collect();
        Ok(Self {
            buffer,
            mask: capacity - 1,
            front: CachePadded::new(AtomicUsize::new(0)),
            back: CachePadded::new(AtomicUsize::new(0)),
        })
    }

    /// Number of slots in the buffer.
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Append at the back. Owner-only. Returns `false` when full, leaving
    /// the contents untouched.
    pub fn push(&self, value: NodeIndex) -> bool {
        let b = self.back.load(Ordering::Relaxed);
        let f = self.front.load(Ordering::Acquire);
        if b.wrapping_sub(f) >= self.capacity() {
            return false;
        }
        self.buffer[b & self.mask].store(value, Ordering::Relaxed);
        self.back.store(b.wrapping_add(1), Ordering::Release);
        true
    }

    /// Remove from the back. Owner-only.
    ///
    /// When exactly one element remains the owner races any concurrent
    /// thief on `front`; the loser observes `None`.
    pub fn pop(&self) -> Option<NodeIndex> {
        let b = self.back.load(Ordering::Relaxed).wrapping_sub(1);
        self.back.store(b, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let f = self.front.load(Ordering::Relaxed);

        let size = b.wrapping_sub(f) as isize;
        if size < 0 {
            // Already empty; undo the reservation.
            self.back.store(b.wrapping_add(1), Ordering::Relaxed);
            return None;
        }
        let value = self.buffer[b & self.mask].load(Ordering::Relaxed);
        if size > 0 {
            // At least one element stays behind for thieves; no contention
            // is possible on ours.
            return Some(value);
        }
        // Last element: contend with thieves on `front`.
        let won = self
            .front
            .compare_exchange(f, f.wrapping_add(1), Ordering::SeqCst, Ordering::Relaxed)
            .is_ok();
        self.back.store(b.wrapping_add(1), Ordering::Relaxed);
        won.then_some(value)
    }

    /// Remove from the front. Safe from any thread; never blocks.
    ///
    /// Returns `None` when empty, or spuriously when another pop/steal won
    /// the race on `front`.
    pub fn steal(&self) -> Option<NodeIndex> {
        let f = self.front.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = self.back.load(Ordering::Acquire);
        if b.wrapping_sub(f) as isize <= 0 {
            return None;
        }
        let value = self.buffer[f & self.mask].load(Ordering::Relaxed);
        // The slot can only be overwritten after `front` has advanced past
        // `f`, in which case this exchange fails and the value is discarded.
        self.front
            .compare_exchange(f, f.wrapping_add(1), Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
            .then_some(value)
    }

    /// Copy of the front element without removing it. The result may be
    /// stale by the time the caller looks at it.
    pub fn peek_front(&self) -> Option<NodeIndex> {
        let f = self.front.load(Ordering::Acquire);
        let b = self.back.load(Ordering::Acquire);
        if b.wrapping_sub(f) as isize <= 0 {
            return None;
        }
        Some(self.buffer[f & self.mask].load(Ordering::Relaxed))
    }

    /// Reset both indices. Owner-only; not safe concurrently with a pop or
    /// steal in progress.
    pub fn clear(&self) {
        self.front.store(0, Ordering::Relaxed);
        self.back.store(0, Ordering::Relaxed);
    }

    /// Element count. Exact for the owner; a hint under concurrent stealing.
    pub fn len(&self) -> usize {
        let b = self.back.load(Ordering::Relaxed);
        let f = self.front.load(Ordering::Relaxed);
        (b.wrapping_sub(f) as isize).max(0) as usize
    }

    /// Whether no elements remain; subject to the same staleness as `len`.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }
}

impl fmt::Debug for StealDeque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StealDeque")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
