#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

use dagpool::promise::TaskError;
use dagpool::scheduler::Scheduler;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Shared execution log: tasks append their label in completion order.
fn recorder(log: &Arc<Mutex<Vec<char>>>, label: char) -> impl FnMut() + Send + 'static {
    let log = Arc::clone(log);
    move || log.lock().unwrap().push(label)
}

fn position(log: &[char], label: char) -> usize {
    log.iter()
        .position(|&l| l == label)
        .unwrap_or_else(|| panic!("task {label} never executed"))
}

#[test]
fn dependencies_run_before_dependents() {
    init_tracing();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut scheduler = Scheduler::with_workers(4);

    let handles: Vec<_> = ('a'..='j')
        .map(|label| scheduler.submit(recorder(&log, label)))
        .collect();
    let [a, b, c, d, e, f, g, h, i, j] = handles.as_slice() else {
        unreachable!()
    };
    scheduler.add_chain([a, f, g, h, i, j]);
    scheduler.add_edge(b, g);
    scheduler.add_edge(c, h);
    scheduler.add_edge(d, i);
    scheduler.add_edge(e, j);

    scheduler.run_and_wait().expect("valid DAG");

    let log = log.lock().unwrap();
    // Every task ran exactly once.
    assert_eq!(log.len(), 10);
    for label in 'a'..='j' {
        assert_eq!(log.iter().filter(|&&l| l == label).count(), 1);
    }
    // g waits for both the a->f chain and b; j comes last of the chain.
    assert!(position(&log, 'f') > position(&log, 'a'));
    assert!(position(&log, 'g') > position(&log, 'f'));
    assert!(position(&log, 'g') > position(&log, 'b'));
    assert!(position(&log, 'h') > position(&log, 'g'));
    assert!(position(&log, 'h') > position(&log, 'c'));
    assert!(position(&log, 'i') > position(&log, 'h'));
    assert!(position(&log, 'i') > position(&log, 'd'));
    assert!(position(&log, 'j') > position(&log, 'i'));
    assert!(position(&log, 'j') > position(&log, 'e'));
    for label in ['f', 'g', 'h', 'i'] {
        assert!(position(&log, 'j') > position(&log, label));
    }
}

#[test]
fn single_worker_still_respects_ordering() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut scheduler = Scheduler::with_workers(1);

    let leaf = scheduler.submit(recorder(&log, 'z'));
    let mid = scheduler.submit(recorder(&log, 'm'));
    let root = scheduler.submit(recorder(&log, 'r'));
    scheduler.add_edge(&root, &mid);
    scheduler.add_edge(&mid, &leaf);

    scheduler.run_and_wait().expect("valid DAG");
    assert_eq!(*log.lock().unwrap(), vec!['r', 'm', 'z']);
}

#[test]
fn future_delivers_the_task_result() {
    let mut scheduler = Scheduler::with_workers(2);
    let (x, y, p) = (8, 9, 2.2);
    let (_task, future) = scheduler.submit_with_result(move || f64::from(x * y) + p);
    scheduler.run_and_wait().expect("valid DAG");
    let value = future.wait().expect("task succeeded");
    assert!((value - 74.2).abs() < 1e-9);
}

#[test]
fn future_can_be_polled() {
    let mut scheduler = Scheduler::with_workers(2);
    let (_task, future) = scheduler.submit_with_result(|| "done");
    assert_eq!(future.try_wait(), None);
    scheduler.run().expect("valid DAG");
    scheduler.join();
    assert_eq!(future.try_wait(), Some(Ok("done")));
}

#[test]
fn results_flow_through_a_dependency_chain() {
    let mut scheduler = Scheduler::with_workers(2);
    let input = Arc::new(AtomicUsize::new(0));

    let source = Arc::clone(&input);
    let producer = scheduler.submit(move || source.store(21, Ordering::Release));
    let sink = Arc::clone(&input);
    let (consumer, future) =
        scheduler.submit_with_result(move || sink.load(Ordering::Acquire) * 2);
    scheduler.add_edge(&producer, &consumer);

    scheduler.run_and_wait().expect("valid DAG");
    assert_eq!(future.wait(), Ok(42));
}

#[test]
fn panicking_task_does_not_poison_the_run() {
    init_tracing();
    let mut scheduler = Scheduler::with_workers(2);

    let bomb = scheduler.submit(|| panic!("boom"));
    let (survivor, future) = scheduler.submit_with_result(|| 5);
    scheduler.add_edge(&bomb, &survivor);

    // The failed predecessor still releases its successors.
    scheduler.run_and_wait().expect("valid DAG");
    assert_eq!(future.wait(), Ok(5));
}

#[test]
fn panic_is_reported_through_the_future() {
    let mut scheduler = Scheduler::with_workers(2);
    let (_task, future) = scheduler.submit_with_result(|| -> u32 { panic!("task failed") });
    scheduler.run_and_wait().expect("valid DAG");
    assert_eq!(
        future.wait(),
        Err(TaskError::Panicked("task failed".to_owned()))
    );
}

#[test]
fn dropping_the_scheduler_resolves_pending_futures() {
    let mut scheduler = Scheduler::with_workers(1);
    let (_task, future) = scheduler.submit_with_result(|| 1);
    drop(scheduler);
    assert_eq!(future.wait(), Err(TaskError::Dropped));
}

#[test]
fn the_same_graph_can_run_twice() {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut scheduler = Scheduler::with_workers(2);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let counter = Arc::clone(&runs);
            scheduler.submit(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect();
    scheduler.add_chain(handles.iter());

    scheduler.run_and_wait().expect("valid DAG");
    assert_eq!(runs.load(Ordering::Relaxed), 4);
    scheduler.run_and_wait().expect("valid DAG");
    assert_eq!(runs.load(Ordering::Relaxed), 8);
}

#[test]
fn wide_fan_out_executes_every_task_once() {
    init_tracing();
    let executed = Arc::new(AtomicUsize::new(0));
    let mut scheduler = Scheduler::with_workers(4);

    let counter = Arc::clone(&executed);
    let root = scheduler.submit(move || {
        counter.fetch_add(1, Ordering::Relaxed);
    });
    let leaves: Vec<_> = (0..200)
        .map(|_| {
            let counter = Arc::clone(&executed);
            scheduler.submit(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect();
    scheduler.add_edges(&root, leaves.iter());

    scheduler.run_and_wait().expect("valid DAG");
    assert_eq!(executed.load(Ordering::Relaxed), 201);
}

#[test]
fn run_is_asynchronous_until_join() {
    let mut scheduler = Scheduler::with_workers(2);
    let (_task, future) = scheduler.submit_with_result(|| 7);
    scheduler.run().expect("valid DAG");
    // The caller thread is free here; join() is the synchronization point.
    scheduler.join();
    assert_eq!(future.try_wait(), Some(Ok(7)));
}
