use core::fmt;
use core::mem::MaybeUninit;
use core::ptr;

/// Inline storage capacity of a [`ClosureCell`], one cache line.
pub const CELL_CAPACITY: usize = 64;

#[repr(align(64))]
struct CellStorage(MaybeUninit<[u8; CELL_CAPACITY]>);

/// A fixed-capacity, type-erased, move-only container for a callable.
///
/// The callable is stored inline in a cache-line-sized, cache-line-aligned
/// buffer; neither construction nor invocation allocates. Type erasure goes
/// through two monomorphized thunks instead of a boxed trait object, so the
/// cell itself is a plain value that can live in the scheduler's node arena.
///
/// Callables whose size or alignment exceed the cell's bounds are rejected
/// at compile time. There is no vacant state: a cell always holds a
/// callable, and Rust's move semantics make a moved-from cell unusable
/// statically.
pub struct ClosureCell {
    storage: CellStorage,
    call: unsafe fn(*mut u8),
    drop: unsafe fn(*mut u8),
}

impl ClosureCell {
    /// Wrap `callable` into a cell.
    ///
    /// Fails to compile if `size_of::<F>() > CELL_CAPACITY` or if `F`
    /// requires stricter alignment than the cell provides.
    pub fn new<F>(callable: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        const {
            assert!(
                size_of::<F>() <= CELL_CAPACITY,
                "callable exceeds the 64-byte ClosureCell capacity"
            );
            assert!(
                align_of::<F>() <= align_of::<CellStorage>(),
                "callable alignment exceeds the ClosureCell alignment bound"
            );
        }
        let mut storage = CellStorage(MaybeUninit::uninit());
        // SAFETY: the const assertions above guarantee that `F` fits the
        // storage in both size and alignment; the storage is uninitialized
        // and exclusively owned here.
        unsafe {
            ptr::write(storage.0.as_mut_ptr().cast::<F>(), callable);
        }
        Self {
            storage,
            call: call_thunk::<F>,
            drop: drop_thunk::<F>,
        }
    }

    /// Invoke the stored callable once.
    pub fn invoke(&mut self) {
        // SAFETY: the storage holds a valid `F` written by `new`; `&mut self`
        // gives exclusive access for the duration of the call.
        unsafe { (self.call)(self.storage.0.as_mut_ptr().cast()) }
    }
}

unsafe fn call_thunk<F: FnMut()>(erased: *mut u8) {
    // SAFETY: caller passes a pointer to the storage of the `F` this thunk
    // was monomorphized for.
    unsafe { (*erased.cast::<F>())() }
}

unsafe fn drop_thunk<F>(erased: *mut u8) {
    // SAFETY: same contract as `call_thunk`; runs at most once, from `Drop`.
    unsafe { erased.cast::<F>().drop_in_place() }
}

impl Drop for ClosureCell {
    fn drop(&mut self) {
        // SAFETY: the storage still holds the callable written by `new`;
        // moves relocate the bytes without running this destructor twice.
        unsafe { (self.drop)(self.storage.0.as_mut_ptr().cast()) }
    }
}

// SAFETY: `new` requires `F: Send`, and the thunks only ever touch the
// embedded `F`.
unsafe impl Send for ClosureCell {}

impl fmt::Debug for ClosureCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureCell").finish_non_exhaustive()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn invokes_stored_callable() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let mut cell = ClosureCell::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        cell.invoke();
        cell.invoke();
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn move_transfers_the_callable() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let cell = ClosureCell::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        let mut moved = cell;
        moved.invoke();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn drops_captures_exactly_once() {
        struct Probe(Arc<AtomicUsize>);
        impl Drop for Probe {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }
        let drops = Arc::new(AtomicUsize::new(0));
        let probe = Probe(Arc::clone(&drops));
        let cell = ClosureCell::new(move || {
            let _ = &probe;
        });
        let moved = cell;
        drop(moved);
        assert_eq!(drops.load(Ordering::Relaxed), 1);
    }
}
