#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

use dagpool::deque::StealDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// One owner popping from the back while several thieves hammer the front:
/// every element must be claimed by exactly one thread.
#[test]
fn many_thieves_against_one_owner() {
    const ELEMENTS: usize = 1 << 14;
    const THIEVES: usize = 4;

    let deque = Arc::new(StealDeque::with_capacity(ELEMENTS).unwrap());
    for value in 0..ELEMENTS as u32 {
        assert!(deque.push(value));
    }
    let claimed = Arc::new(AtomicUsize::new(0));

    let thieves: Vec<_> = (0..THIEVES)
        .map(|_| {
            let deque = Arc::clone(&deque);
            let claimed = Arc::clone(&claimed);
            thread::spawn(move || {
                let mut taken = Vec::new();
                while claimed.load(Ordering::Acquire) < ELEMENTS {
                    match deque.steal() {
                        Some(value) => {
                            claimed.fetch_add(1, Ordering::AcqRel);
                            taken.push(value);
                        }
                        None => thread::yield_now(),
                    }
                }
                taken
            })
        })
        .collect();

    let mut all = Vec::new();
    while claimed.load(Ordering::Acquire) < ELEMENTS {
        if let Some(value) = deque.pop() {
            claimed.fetch_add(1, Ordering::AcqRel);
            all.push(value);
        }
    }
    for thief in thieves {
        all.extend(thief.join().unwrap());
    }

    assert!(deque.is_empty());
    all.sort_unstable();
    let expected: Vec<u32> = (0..ELEMENTS as u32).collect();
    assert_eq!(all, expected);
}

/// Thieves draining a deque the owner never touches must also partition it.
#[test]
fn thieves_drain_an_abandoned_deque() {
    const ELEMENTS: usize = 1 << 10;

    let deque = Arc::new(StealDeque::with_capacity(ELEMENTS).unwrap());
    for value in 0..ELEMENTS as u32 {
        assert!(deque.push(value));
    }
    let claimed = Arc::new(AtomicUsize::new(0));

    let thieves: Vec<_> = (0..3)
        .map(|_| {
            let deque = Arc::clone(&deque);
            let claimed = Arc::clone(&claimed);
            thread::spawn(move || {
                let mut taken = Vec::new();
                while claimed.load(Ordering::Acquire) < ELEMENTS {
                    if let Some(value) = deque.steal() {
                        claimed.fetch_add(1, Ordering::AcqRel);
                        taken.push(value);
                    }
                }
                taken
            })
        })
        .collect();

    let mut all = Vec::new();
    for thief in thieves {
        let taken = thief.join().unwrap();
        // Each thief observes the front in FIFO order.
        assert!(taken.is_sorted());
        all.extend(taken);
    }
    all.sort_unstable();
    let expected: Vec<u32> = (0..ELEMENTS as u32).collect();
    assert_eq!(all, expected);
}
