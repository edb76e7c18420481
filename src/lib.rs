//! Parallel task-graph executor with per-worker work-stealing deques.
//!
//! This crate runs a Directed Acyclic Graph (DAG) of tasks across a fixed
//! pool of worker threads. It:
//! - Stores each task's callable inline in a cache-line-sized, type-erased
//!   cell, with no heap allocation per invocation.
//! - Levels the graph by longest-path depth (Kahn-style relaxation with
//!   cycle detection) before every run.
//! - Assigns the leveled plan round-robin to one bounded work-stealing
//!   deque per worker, deepest levels first, so each worker tends to meet
//!   its runnable work before its blocked work.
//! - Lets idle workers steal from their ring neighbor, re-validating every
//!   node's atomic dependency counter before running it.
//!
//! Key modules:
//! - `closure`: the fixed-capacity, move-only callable container.
//! - `scheduler`: task submission, edge declaration, leveling and the
//!   run/join front end.
//! - `pool`: the worker threads, the start gate and the completion signal.
//! - `deque`: the single-owner/multi-thief bounded deque backing each
//!   worker.
//! - `promise`: one-shot result futures for result-bearing tasks.
//!
//! Quick start:
//! 1. Create a `Scheduler` (the pool spawns once and is reused).
//! 2. `submit` closures (or `submit_with_result` for a `TaskFuture`),
//!    keeping the returned handles.
//! 3. Declare ordering with `add_edge`/`add_edges`/`add_chain`.
//! 4. Call `run()` + `join()`, or `run_and_wait()`.
//!
//! The graph is static while a run is in flight: build it fully, run it,
//! `join()`, and only then mutate it again. A task never executes before
//! every one of its predecessors has executed; tasks with no ordering
//! constraint between them run concurrently in unspecified order.

/// Fixed-capacity, type-erased, inline-stored callable wrapper.
pub mod closure;
/// The bounded single-owner/multi-thief work-stealing deque.
pub mod deque;
/// Dependency-graph vertices and the caller-facing task handle.
pub mod node;
/// The fixed worker-thread pool and its steal ring.
pub mod pool;
/// One-shot result channel for tasks submitted with a result.
pub mod promise;
/// Graph construction, leveling and the run/join API.
pub mod scheduler;
mod sync;

use core::cell::UnsafeCell;
use core::fmt;
use derive_more::{Deref, DerefMut};
use indexmap::IndexSet as _IndexSet;
use rustc_hash::FxBuildHasher;

/// Index of a task in the scheduler's node arena, in submission order.
pub type NodeIndex = u32;

pub(crate) type IndexSet<T> = _IndexSet<T, FxBuildHasher>;

/// A minimal `UnsafeCell` wrapper that can be shared across the pool's
/// threads.
///
/// Soundness rests on the run protocol, not on `T`: every node index is
/// handed out by the deques exactly once per run, so the worker that
/// obtained it has exclusive access to the wrapped value.
#[derive(Deref, DerefMut)]
#[repr(transparent)]
pub(crate) struct SyncUnsafeCell<T>(UnsafeCell<T>);

// SAFETY: see the scheduling argument above; `T: Send` because the value is
// used from whichever worker thread obtained its node.
unsafe impl<T: Send> Sync for SyncUnsafeCell<T> {}

impl<T> SyncUnsafeCell<T> {
    pub(crate) fn new(val: T) -> Self {
        Self(UnsafeCell::new(val))
    }
}

impl<T> fmt::Debug for SyncUnsafeCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncUnsafeCell").finish_non_exhaustive()
    }
}
