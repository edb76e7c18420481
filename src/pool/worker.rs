use super::{PoolShared, RunContext};
use crate::{NodeIndex, promise::panic_message};
use core::sync::atomic::Ordering;
use crossbeam_utils::Backoff;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, trace};

/// Body of one pool thread: park on the start gate, serve the published
/// run, report idle, repeat until shutdown.
pub(super) fn worker_loop(shared: &Arc<PoolShared>, index: usize, workers: usize) {
    let mut epoch_seen = 0u64;
    loop {
        let run = {
            let mut state = shared.state.lock();
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                if state.epoch > epoch_seen {
                    epoch_seen = state.epoch;
                    if let Some(run) = &state.run {
                        break Arc::clone(run);
                    }
                }
                shared.start_cond.wait(&mut state);
            }
        };
        trace!(worker = index, "run started");
        serve_run(shared, &run, index, workers);
        trace!(worker = index, "run finished");
        // Release the run (and with it the node arena) before reporting
        // idle, so `wait()` returning implies no worker-side references.
        drop(run);
        let mut state = shared.state.lock();
        state.active -= 1;
        if state.active == 0 {
            shared.done_cond.notify_all();
        }
    }
}

fn serve_run(shared: &PoolShared, run: &RunContext, index: usize, workers: usize) {
    let own = &run.deques[index];
    let backoff = Backoff::new();
    while run.remaining.load(Ordering::Acquire) != 0 {
        let node = own.pop().or_else(|| steal_from_ring(run, index, workers));
        let Some(node) = node else {
            if shared.shutdown.load(Ordering::Acquire) {
                return;
            }
            backoff.snooze();
            continue;
        };
        backoff.reset();
        if !execute_node(shared, run, node) {
            return;
        }
    }
}

/// Try the designated ring neighbor first, then keep advancing around the
/// ring, yielding between attempts, until something is stolen or the ring
/// is exhausted. A `None` from a victim may be spurious under contention;
/// the outer loop retries as long as the run has work left.
fn steal_from_ring(run: &RunContext, index: usize, workers: usize) -> Option<NodeIndex> {
    let mut victim = (index + 1) % workers;
    while victim != index {
        if let Some(node) = run.deques[victim].steal() {
            trace!(worker = index, victim, node, "stole task");
            return Some(node);
        }
        std::thread::yield_now();
        victim = (victim + 1) % workers;
    }
    None
}

/// Run one obtained node. Returns `false` if the pool shut down while
/// waiting on the node's dependencies.
fn execute_node(shared: &PoolShared, run: &RunContext, index: NodeIndex) -> bool {
    let node = &run.nodes[index as usize];
    if node.pending.load(Ordering::Acquire) != 0 {
        // Bounded by the DAG's critical path: own pops see shallowest-first
        // order and a worker only steals with an empty deque, so a blocked
        // worker never has runnable work parked behind it.
        let mut guard = shared.dep_lock.lock();
        while node.pending.load(Ordering::Acquire) != 0 {
            if shared.shutdown.load(Ordering::Acquire) {
                return false;
            }
            shared.dep_cond.wait(&mut guard);
        }
    }

    // SAFETY: each node index is pushed into the deques exactly once per
    // run and pop/steal never both yield the same element, so this worker
    // has exclusive access to the cell; the counter check above orders all
    // predecessor writes before the call.
    let cell = unsafe { &mut *node.cell.get() };
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| cell.invoke())) {
        // A fire-and-forget failure is not observable through the API;
        // result-bearing tasks have already routed it through their channel.
        error!(node = index, "task panicked: {}", panic_message(&*payload));
    }

    for &succ in &node.succs {
        run.nodes[succ as usize]
            .pending
            .fetch_sub(1, Ordering::AcqRel);
    }
    run.remaining.fetch_sub(1, Ordering::AcqRel);
    // Taking the lock between the decrements and the broadcast keeps a
    // waiter from missing the update between its check and its wait.
    drop(shared.dep_lock.lock());
    shared.dep_cond.notify_all();
    true
}
