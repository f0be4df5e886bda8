//! The same behavioural checks run against every backend.

use std::sync::{Arc, Barrier};
use std::thread;

use layout_core::{
    AccessorySignature, ArrayRef, ArraySeq, BatchId, Category, IdentifierRecord, Item, NewItem,
    PublicIdentifier, RowId, Serial, SerialRecord, SlotPosition, Utc, WorkStatus,
};
use layout_store::{
    LayoutStore, MemoryLayoutStore, SqliteLayoutStore, SqliteLayoutStoreConfig, StoreError,
};

fn backends(dir: &tempfile::TempDir) -> Vec<Box<dyn LayoutStore>> {
    vec![
        Box::new(MemoryLayoutStore::default()),
        Box::new(
            SqliteLayoutStore::open(
                dir.path().join("layout.db"),
                &SqliteLayoutStoreConfig::default(),
            )
            .unwrap(),
        ),
    ]
}

fn batch() -> BatchId {
    BatchId::new("B-2024-01").unwrap()
}

fn array(seq: u32) -> ArrayRef {
    ArrayRef::new(batch(), ArraySeq::new(seq))
}

fn item(row: RowId, seq: u32, slot: u8) -> Item {
    Item::placed(
        NewItem::new(
            Category::new("CUBE").unwrap(),
            format!("ORD-{seq}-{slot}"),
            AccessorySignature::parse(["LED"]).unwrap(),
        ),
        batch(),
        row,
        ArraySeq::new(seq),
        SlotPosition::new(slot).unwrap(),
    )
}

fn identifier(seq: u32, sequence: u32) -> IdentifierRecord {
    IdentifierRecord {
        identifier: PublicIdentifier::new(Category::new("CUBE").unwrap(), sequence, 5).unwrap(),
        array: array(seq),
        created_at: Utc::now(),
    }
}

#[test]
fn identifier_uniqueness_is_enforced() {
    let dir = tempfile::tempdir().unwrap();
    for store in backends(&dir) {
        let mut tx = store.begin().unwrap();
        tx.insert_identifier(&identifier(1, 1)).unwrap();
        // Same array, different code.
        assert!(matches!(
            tx.insert_identifier(&identifier(1, 2)),
            Err(StoreError::UniqueViolation { .. })
        ), "{}", store.backend());
        // Same code, different array.
        assert!(matches!(
            tx.insert_identifier(&identifier(2, 1)),
            Err(StoreError::UniqueViolation { .. })
        ), "{}", store.backend());
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        let found = tx.identifier_for(&array(1)).unwrap().unwrap();
        assert_eq!(found.identifier.to_string(), "CUBE00001");
        assert_eq!(tx.identifier_for(&array(2)).unwrap(), None);
    }
}

#[test]
fn serial_values_are_never_reinserted() {
    let dir = tempfile::tempdir().unwrap();
    for store in backends(&dir) {
        let serial = Serial::new(7).unwrap();
        let mut tx = store.begin().unwrap();
        tx.insert_serial(&SerialRecord::reserved(serial, array(1), Utc::now()))
            .unwrap();
        assert!(matches!(
            tx.insert_serial(&SerialRecord::reserved(serial, array(2), Utc::now())),
            Err(StoreError::UniqueViolation { .. })
        ), "{}", store.backend());
        assert_eq!(tx.serials_for_array(&array(1)).unwrap().len(), 1);
        assert!(tx.serials_for_array(&array(2)).unwrap().is_empty());
    }
}

#[test]
fn batch_delete_only_touches_items() {
    let dir = tempfile::tempdir().unwrap();
    for store in backends(&dir) {
        let row = RowId::new();
        let mut tx = store.begin().unwrap();
        tx.insert_item(&item(row, 1, 1)).unwrap();
        tx.insert_item(&item(row, 1, 2)).unwrap();
        tx.insert_identifier(&identifier(1, 5)).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        assert_eq!(tx.delete_batch_items(&batch()).unwrap(), 2, "{}", store.backend());
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        assert!(tx.items_for_batch(&batch()).unwrap().is_empty());
        assert!(tx.identifier_for(&array(1)).unwrap().is_some());
    }
}

#[test]
fn status_and_moves_persist() {
    let dir = tempfile::tempdir().unwrap();
    for store in backends(&dir) {
        let row = RowId::new();
        let placed = item(row, 1, 1);
        let mut tx = store.begin().unwrap();
        tx.insert_item(&placed).unwrap();
        assert!(tx.set_item_status(placed.id, WorkStatus::InProgress).unwrap());
        assert!(tx.move_item(placed.id, ArraySeq::new(4), SlotPosition::new(6).unwrap()).unwrap());
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        let rows = tx.lock_row(row).unwrap();
        assert_eq!(rows.len(), 1, "{}", store.backend());
        assert_eq!(rows[0].array_seq, ArraySeq::new(4));
        assert_eq!(rows[0].slot.get(), 6);
        assert_eq!(rows[0].status, WorkStatus::InProgress);
    }
}

#[test]
fn concurrent_counter_increments_are_distinct() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 25;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    // Create the schema once before the race.
    drop(SqliteLayoutStore::open(&path, &SqliteLayoutStoreConfig::default()).unwrap());

    let memory: Arc<MemoryLayoutStore> = Arc::new(MemoryLayoutStore::default());
    for shared_sqlite in [false, true] {
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let memory = Arc::clone(&memory);
                let path = path.clone();
                thread::spawn(move || {
                    // Each thread gets its own connection for the SQLite run.
                    let own: Option<SqliteLayoutStore> = shared_sqlite.then(|| {
                        SqliteLayoutStore::open(&path, &SqliteLayoutStoreConfig::default())
                            .unwrap()
                    });
                    let store: &dyn LayoutStore = match &own {
                        Some(sqlite) => sqlite,
                        None => memory.as_ref(),
                    };
                    barrier.wait();
                    let mut seen = Vec::with_capacity(PER_THREAD);
                    for _ in 0..PER_THREAD {
                        let mut tx = store.begin().unwrap();
                        seen.push(tx.counter_add("CUBE", 1).unwrap());
                        tx.commit().unwrap();
                    }
                    seen
                })
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        let expected: Vec<u64> = (1..=(THREADS * PER_THREAD) as u64).collect();
        assert_eq!(all, expected, "sqlite={shared_sqlite}");
    }
}
