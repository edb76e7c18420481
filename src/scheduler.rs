use crate::{
    NodeIndex,
    closure::ClosureCell,
    node::{Node, TaskHandle},
    pool::WorkerPool,
    promise::{self, TaskError, TaskFuture, panic_message},
};
use core::sync::atomic::Ordering;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Error returned by [`Scheduler::schedule`] (and `run`) when the task
/// graph cannot be turned into an executable plan.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScheduleError {
    /// The dependency graph contains cycle(s).
    #[error("task dependencies must be acyclic")]
    Cycle,
    /// There is nothing to execute.
    #[error("cannot schedule an empty task graph")]
    EmptyGraph,
}

/// Depth-ordered execution plan: `levels()[d]` holds every node whose
/// longest path from a root is `d` edges, in declaration order.
///
/// Produced fresh by each scheduling pass and consumed exactly once by the
/// worker pool.
#[derive(Debug)]
#[must_use]
pub struct LevelPlan {
    levels: Vec<Vec<NodeIndex>>,
}

impl LevelPlan {
    /// Node groups by depth.
    pub fn levels(&self) -> &[Vec<NodeIndex>] {
        &self.levels
    }

    /// Total number of scheduled nodes.
    pub fn num_tasks(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }
}

/// The task dependency graph and its execution front end.
///
/// Tasks are submitted first, edges declared second, and the whole graph is
/// run as one unit: `run()` levels the DAG and hands the plan to the worker
/// pool, `join()` blocks until the run has drained. The graph is static for
/// the duration of one run; mutating it again requires `join()` first, and
/// the scheduler panics loudly on violations rather than racing.
#[must_use]
#[derive(Debug)]
pub struct Scheduler {
    nodes: Arc<Vec<Node>>,
    pool: WorkerPool,
}

impl Scheduler {
    /// Scheduler with the default pool size: available hardware
    /// parallelism minus one, at least 1.
    pub fn new() -> Self {
        Self::with_workers(num_cpus::get().saturating_sub(1))
    }

    /// Scheduler with an explicit worker-thread count (clamped to at least 1).
    pub fn with_workers(workers: usize) -> Self {
        Self {
            nodes: Arc::new(Vec::new()),
            pool: WorkerPool::new(workers),
        }
    }

    /// Number of submitted tasks.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no tasks have been submitted yet.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Worker threads backing this scheduler.
    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    fn nodes_mut(&mut self) -> &mut Vec<Node> {
        Arc::get_mut(&mut self.nodes)
            .expect("task graph mutated while a run is active; call join() first")
    }

    /// Register a fire-and-forget task. Arguments are bound by closure
    /// capture; the whole capture must fit the closure cell. No execution
    /// happens until `run()`.
    pub fn submit<F>(&mut self, callable: F) -> TaskHandle
    where
        F: FnMut() + Send + 'static,
    {
        let nodes = self.nodes_mut();
        let index: NodeIndex = nodes.len().try_into().expect("Scheduler::submit: [1]");
        nodes.push(Node::new(ClosureCell::new(callable)));
        TaskHandle { index }
    }

    /// Register a task whose return value (or panic) is published through a
    /// one-shot result channel. The result corresponds to the graph's first
    /// run; later runs re-execute the node as a no-op.
    pub fn submit_with_result<F, R>(&mut self, callable: F) -> (TaskHandle, TaskFuture<R>)
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, future) = promise::result_channel();
        let mut slot = Some(callable);
        let handle = self.submit(move || {
            let Some(callable) = slot.take() else {
                return;
            };
            let result = panic::catch_unwind(AssertUnwindSafe(callable))
                .map_err(|payload| TaskError::Panicked(panic_message(&*payload)));
            let _ = tx.send(result);
        });
        (handle, future)
    }

    /// Declare that `to` runs only after `from` has completed. Duplicate
    /// edges are no-ops for the dependency counter. Self-edges and cycles
    /// are detected at scheduling time, not here.
    pub fn add_edge(&mut self, from: &TaskHandle, to: &TaskHandle) {
        let nodes = self.nodes_mut();
        if nodes[from.index as usize].succs.insert(to.index) {
            nodes[to.index as usize].indegree += 1;
        }
    }

    /// Declare separate edges from `from` to every listed target (fan-out).
    pub fn add_edges<'a>(
        &mut self,
        from: &TaskHandle,
        targets: impl IntoIterator<Item = &'a TaskHandle>,
    ) {
        for target in targets {
            self.add_edge(from, target);
        }
    }

    /// Declare a linear chain `tasks[0] -> tasks[1] -> ... -> tasks[k]`.
    pub fn add_chain<'a>(&mut self, tasks: impl IntoIterator<Item = &'a TaskHandle>) {
        let mut tasks = tasks.into_iter();
        let Some(mut prev) = tasks.next() else {
            return;
        };
        for next in tasks {
            self.add_edge(prev, next);
            prev = next;
        }
    }

    /// Longest-path depth of a task as of the last scheduling pass.
    pub fn depth(&self, handle: &TaskHandle) -> u32 {
        self.nodes[handle.index as usize].depth
    }

    /// Invoke a node's callable directly on the calling thread, bypassing
    /// the pool. Intended for tests and debugging.
    pub fn invoke(&mut self, handle: &TaskHandle) {
        let index = handle.index as usize;
        self.nodes_mut()[index].cell.get_mut().invoke();
    }

    /// Compute the level plan: every root (zero predecessors) gets depth 0
    /// and every other node `depth = 1 + max(depth of its predecessors)`.
    ///
    /// Nodes are processed Kahn-style, finalized only after all their
    /// predecessors, relaxing `depth(child)` with `max` along the way; any
    /// node left unprocessed when the worklist drains sits on a cycle. The
    /// pass also re-arms every node's atomic dependency counter from its
    /// indegree, so an unchanged graph can be scheduled and run again with
    /// identical results.
    ///
    /// # Errors
    /// [`ScheduleError::EmptyGraph`] on a graph with zero nodes,
    /// [`ScheduleError::Cycle`] if the edges are not acyclic (self-edges
    /// included). No plan is produced in either case.
    pub fn schedule(&mut self) -> Result<LevelPlan, ScheduleError> {
        let nodes = self.nodes_mut();
        if nodes.is_empty() {
            return Err(ScheduleError::EmptyGraph);
        }

        let mut unresolved: Vec<u32> = nodes.iter().map(|node| node.indegree).collect();
        let mut worklist: VecDeque<NodeIndex> = VecDeque::new();
        for (index, node) in nodes.iter_mut().enumerate() {
            node.depth = 0;
            if node.indegree == 0 {
                worklist.push_back(index as NodeIndex);
            }
        }

        let mut placed = 0usize;
        let mut scratch = Vec::new();
        while let Some(index) = worklist.pop_front() {
            placed += 1;
            let depth = nodes[index as usize].depth;
            scratch.clear();
            scratch.extend(nodes[index as usize].succs.iter().copied());
            for &succ in &scratch {
                let child = &mut nodes[succ as usize];
                // depth(child) = max(depth(child), depth(parent) + 1)
                let candidate = depth.checked_add(1).expect("Scheduler::schedule: [1]");
                if candidate > child.depth {
                    child.depth = candidate;
                }
                let left = unresolved[succ as usize]
                    .checked_sub(1)
                    .expect("Scheduler::schedule: [2]");
                unresolved[succ as usize] = left;
                if left == 0 {
                    worklist.push_back(succ);
                }
            }
        }

        if placed != nodes.len() {
            return Err(ScheduleError::Cycle);
        }

        let max_depth = nodes.iter().map(|node| node.depth).max().unwrap_or(0);
        let mut levels = vec![Vec::new(); max_depth as usize + 1];
        for (index, node) in nodes.iter().enumerate() {
            node.pending.store(node.indegree, Ordering::Relaxed);
            levels[node.depth as usize].push(index as NodeIndex);
        }
        debug!(
            tasks = nodes.len(),
            levels = levels.len(),
            "computed level plan"
        );
        Ok(LevelPlan { levels })
    }

    /// Schedule the graph and dispatch the plan to the worker pool,
    /// returning immediately; pair with [`Scheduler::join`].
    ///
    /// # Errors
    /// Propagates [`Scheduler::schedule`] failures; nothing is dispatched
    /// on error.
    pub fn run(&mut self) -> Result<(), ScheduleError> {
        let plan = self.schedule()?;
        self.pool.start(plan, Arc::clone(&self.nodes));
        Ok(())
    }

    /// Block until the worker pool has drained all work of the current run.
    pub fn join(&mut self) {
        self.pool.wait();
    }

    /// Synchronous `run()` + `join()`.
    ///
    /// # Errors
    /// Propagates [`Scheduler::schedule`] failures.
    pub fn run_and_wait(&mut self) -> Result<(), ScheduleError> {
        self.run()?;
        self.join();
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
