mod worker;

use crate::{NodeIndex, deque::StealDeque, node::Node, scheduler::LevelPlan};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;

/// Smallest deque allocated per worker, regardless of how few nodes a run
/// assigns to it.
const MIN_DEQUE_CAPACITY: usize = 32;

/// A fixed set of worker threads arranged in a steal ring.
///
/// Threads are spawned once at construction and reused across runs: between
/// runs they park on the start gate, and [`WorkerPool::start`] wakes them by
/// publishing a new run epoch under the same lock the workers wait on.
/// Each run gets one freshly sized [`StealDeque`] per worker; worker `i`
/// steals from worker `i + 1` (mod pool size), so all workers form one
/// cycle.
#[derive(Debug)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    threads: Vec<JoinHandle<()>>,
}

#[derive(Debug)]
pub(crate) struct PoolShared {
    /// Start gate. `Condvar`-signaled on every published run and on
    /// shutdown; the state is always checked under this lock, so there is
    /// no startup double-check race.
    state: Mutex<PoolState>,
    start_cond: Condvar,
    /// Signaled by the last worker returning to idle; observed by `wait()`.
    done_cond: Condvar,
    /// Broadcast on every node completion; workers holding a node whose
    /// dependency counter is still nonzero block here.
    dep_lock: Mutex<()>,
    dep_cond: Condvar,
    shutdown: AtomicBool,
}

#[derive(Debug, Default)]
struct PoolState {
    /// Bumped once per `start()`; workers track the last epoch they served.
    epoch: u64,
    run: Option<Arc<RunContext>>,
    /// Workers still busy with the current epoch.
    active: usize,
}

/// Everything the workers need for one run. Dropped by every worker before
/// it reports idle, so after `wait()` returns the node arena has no
/// pool-side references left.
#[derive(Debug)]
pub(crate) struct RunContext {
    nodes: Arc<Vec<Node>>,
    deques: Vec<StealDeque>,
    /// Nodes not yet executed in this run. Zero is the pool's explicit
    /// completion signal, independent of teardown.
    remaining: AtomicUsize,
}

impl WorkerPool {
    /// Spawn a pool with `workers` threads (clamped to at least 1).
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState::default()),
            start_cond: Condvar::new(),
            done_cond: Condvar::new(),
            dep_lock: Mutex::new(()),
            dep_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let threads = (0..workers)
            .map(|index| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("dagpool-worker-{index}"))
                    .spawn(move || worker::worker_loop(&shared, index, workers))
                    .expect("WorkerPool::new: failed to spawn worker thread")
            })
            .collect();
        debug!(workers, "worker pool started");
        Self { shared, threads }
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.threads.len()
    }

    /// Dispatch a leveled plan and wake the workers. Returns immediately.
    ///
    /// Nodes are assigned to deques round-robin, levels deepest first and in
    /// declaration order within a level, which places the shallowest (most
    /// immediately runnable) nodes nearest each owner's pop end. This is a
    /// heuristic only: every worker re-validates a node's dependency counter
    /// before running it.
    ///
    /// # Panics
    /// If the previous run has not been `wait()`ed for.
    pub(crate) fn start(&self, plan: LevelPlan, nodes: Arc<Vec<Node>>) {
        let workers = self.worker_count();
        let mut assignments: Vec<Vec<NodeIndex>> = vec![Vec::new(); workers];
        let mut processor = 0usize;
        for level in plan.levels().iter().rev() {
            for &index in level {
                assignments[processor % workers].push(index);
                processor += 1;
            }
        }
        let deques = assignments
            .iter()
            .map(|assigned| {
                let capacity = assigned.len().next_power_of_two().max(MIN_DEQUE_CAPACITY);
                let deque =
                    StealDeque::with_capacity(capacity).expect("WorkerPool::start: [1]");
                for &index in assigned {
                    let pushed = deque.push(index);
                    debug_assert!(pushed, "WorkerPool::start: [2]");
                }
                deque
            })
            .collect();

        let run = Arc::new(RunContext {
            nodes,
            deques,
            remaining: AtomicUsize::new(processor),
        });
        debug!(tasks = processor, workers, "dispatching run");

        let mut state = self.shared.state.lock();
        assert!(
            state.run.is_none() && state.active == 0,
            "WorkerPool::start: a run is already active; call wait() first"
        );
        state.epoch += 1;
        state.run = Some(run);
        state.active = workers;
        drop(state);
        self.shared.start_cond.notify_all();
    }

    /// Block until the current run (if any) has fully drained and every
    /// worker is idle again.
    pub fn wait(&self) {
        let mut state = self.shared.state.lock();
        while state.active != 0 {
            self.shared.done_cond.wait(&mut state);
        }
        // Drop the pool's own reference so the arena is exclusively the
        // scheduler's again.
        state.run = None;
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        // Empty critical sections order the flag before the broadcasts for
        // workers already inside a wait.
        drop(self.shared.state.lock());
        self.shared.start_cond.notify_all();
        drop(self.shared.dep_lock.lock());
        self.shared.dep_cond.notify_all();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}
