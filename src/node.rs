use crate::{IndexSet, NodeIndex, SyncUnsafeCell, closure::ClosureCell};
use core::sync::atomic::AtomicU32;
use crossbeam_utils::CachePadded;

/// One schedulable unit of work: a vertex of the dependency graph.
///
/// Nodes live in the scheduler's arena for the scheduler's lifetime and are
/// addressed by stable indices; successor edges are indices too, never
/// pointers, so arena growth cannot invalidate them.
#[derive(Debug)]
pub(crate) struct Node {
    /// The work itself. Mutated only by the worker that obtained this node
    /// from the deques, which is what makes the `Sync` wrapper sound.
    pub(crate) cell: SyncUnsafeCell<ClosureCell>,
    /// Outgoing edges, deduplicated, in declaration order.
    pub(crate) succs: IndexSet<NodeIndex>,
    /// Incoming-edge count, maintained at declaration time. The atomic
    /// `pending` counter is re-armed from this at every scheduling pass.
    pub(crate) indegree: u32,
    /// Longest-path distance from any root, assigned by `schedule()`.
    pub(crate) depth: u32,
    /// Predecessors not yet completed in the current run. The only per-node
    /// field mutated by threads other than the executing one.
    pub(crate) pending: CachePadded<AtomicU32>,
}

impl Node {
    pub(crate) fn new(cell: ClosureCell) -> Self {
        Self {
            cell: SyncUnsafeCell::new(cell),
            succs: IndexSet::default(),
            indegree: 0,
            depth: 0,
            pending: CachePadded::new(AtomicU32::new(0)),
        }
    }
}

/// A lightweight, move-only reference to one submitted task.
///
/// Returned by the scheduler's submission methods and used to declare
/// dependency edges (or to invoke the node directly for testing). A handle
/// is only meaningful with the scheduler that issued it and must not
/// outlive it.
#[derive(Debug)]
#[must_use]
pub struct TaskHandle {
    pub(crate) index: NodeIndex,
}
