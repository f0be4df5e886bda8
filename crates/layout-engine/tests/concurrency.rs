//! Concurrent callers against one shared store.

use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

use layout_core::{LayoutError, LayoutResult};
use layout_engine::{CounterKey, SequenceAllocator, SerialLifecycle};
use layout_store::{LayoutStore, MemoryLayoutStore, SqliteLayoutStore, SqliteLayoutStoreConfig};
use layout_testkit::{fixtures, init_test_tracing_silent};

const THREADS: usize = 8;
const PER_THREAD: usize = 20;

fn shared_stores(dir: &tempfile::TempDir) -> Vec<Arc<dyn LayoutStore>> {
    vec![
        Arc::new(MemoryLayoutStore::default()),
        Arc::new(
            SqliteLayoutStore::open(
                dir.path().join("layout.db"),
                &SqliteLayoutStoreConfig::default(),
            )
            .unwrap(),
        ),
    ]
}

/// Run `op` on every thread at once and collect each thread's results.
fn race<T: Send + 'static>(
    threads: usize,
    op: impl Fn() -> LayoutResult<T> + Send + Sync + 'static,
) -> Vec<LayoutResult<T>> {
    let barrier = Arc::new(Barrier::new(threads));
    let op = Arc::new(op);
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let op = Arc::clone(&op);
            thread::spawn(move || {
                barrier.wait();
                op()
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn concurrent_identifier_sequences_are_distinct() {
    init_test_tracing_silent();
    let dir = tempfile::tempdir().unwrap();
    for store in shared_stores(&dir) {
        let allocator = SequenceAllocator::new(fixtures::config());
        let category = fixtures::category("CUBE");
        let worker_store = Arc::clone(&store);
        let results = race(THREADS, move || {
            (0..PER_THREAD)
                .map(|_| allocator.next(worker_store.as_ref(), &category))
                .collect::<LayoutResult<Vec<u32>>>()
        });

        let all: Vec<u32> = results.into_iter().flat_map(Result::unwrap).collect();
        let distinct: BTreeSet<u32> = all.iter().copied().collect();
        assert_eq!(all.len(), THREADS * PER_THREAD, "{}", store.backend());
        assert_eq!(distinct.len(), all.len(), "{}: duplicates issued", store.backend());
        let expected_max = u32::try_from(THREADS * PER_THREAD).unwrap();
        assert_eq!(distinct.first(), Some(&1));
        assert_eq!(distinct.last(), Some(&expected_max));
    }
}

#[test]
fn only_one_caller_gets_the_last_sequence() {
    init_test_tracing_silent();
    let dir = tempfile::tempdir().unwrap();
    for store in shared_stores(&dir) {
        // One digit: sequences 1..=9.
        let config = fixtures::tight_config(1, 1_048_575);
        let allocator = SequenceAllocator::new(config);
        let category = fixtures::category("CUBE");
        for _ in 0..8 {
            allocator.next(store.as_ref(), &category).unwrap();
        }

        let worker_store = Arc::clone(&store);
        let worker_allocator = allocator.clone();
        let worker_category = category.clone();
        let results = race(2, move || {
            worker_allocator.next(worker_store.as_ref(), &worker_category)
        });

        let granted: Vec<u32> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
        assert_eq!(granted, vec![9], "{}", store.backend());
        assert!(results.iter().any(|r| matches!(
            r,
            Err(LayoutError::CapacityExhausted { requested: 1, remaining: 0, .. })
        )));

        let mut tx = store.begin().unwrap();
        let key = CounterKey::Identifier(&category).storage_key();
        assert_eq!(tx.counter_get(&key).unwrap(), Some(9));
    }
}

#[test]
fn concurrent_serial_reservations_never_overlap() {
    init_test_tracing_silent();
    let dir = tempfile::tempdir().unwrap();
    for store in shared_stores(&dir) {
        let serials = SerialLifecycle::new(fixtures::config());
        let worker_store = Arc::clone(&store);
        let results = race(THREADS, move || {
            serials.reserve(worker_store.as_ref(), 5, &fixtures::array("B1", 1))
        });

        let mut seen = BTreeSet::new();
        for block in results {
            let block = block.unwrap();
            assert_eq!(block.len(), 5);
            // Each block is consecutive.
            assert_eq!(block[4].get() - block[0].get(), 4);
            for serial in block {
                assert!(seen.insert(serial), "{}: {serial} issued twice", store.backend());
            }
        }
        assert_eq!(seen.len(), THREADS * 5);
    }
}
