//! End-to-end flows through planner, workflow and redistribution.

use layout_core::{ArraySeq, LayoutError, SerialStatus, TxStage, WorkStatus};
use layout_engine::{
    ArrayWorkflow, BatchPlanner, BatchRequest, RedistributionEngine, SerialLifecycle,
};
use layout_store::{
    FaultPlan, LayoutStore, MemoryLayoutStore, SqliteLayoutStore, SqliteLayoutStoreConfig,
};
use layout_testkit::{fixtures, init_test_tracing};

fn positions(store: &dyn LayoutStore, batch: &str) -> Vec<(u32, u8, String)> {
    BatchPlanner::new(fixtures::config())
        .batch(store, &fixtures::batch(batch))
        .unwrap()
        .iter()
        .flat_map(|a| {
            a.items
                .iter()
                .map(|i| (i.array_seq.get(), i.slot.get(), i.order_ref.clone()))
        })
        .collect()
}

#[test]
fn ten_items_from_slot_four_fill_two_arrays() {
    init_test_tracing();
    let store = MemoryLayoutStore::default();
    let plan = BatchPlanner::new(fixtures::config())
        .create_batch(
            &store,
            BatchRequest::new(fixtures::batch("B1"), fixtures::plain_items("CUBE", 10))
                .with_start_offset(fixtures::slot(4)),
        )
        .unwrap();

    assert_eq!(plan.item_count(), 10);
    let arrays = &plan.categories[0].arrays;
    assert_eq!(arrays.len(), 2);
    assert_eq!(arrays[0].array.seq, ArraySeq::new(1));
    assert_eq!(
        arrays[0].occupied_slots().iter().map(|s| s.get()).collect::<Vec<_>>(),
        vec![4, 5, 6, 7, 8]
    );
    assert_eq!(
        arrays[1].occupied_slots().iter().map(|s| s.get()).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );
    assert_ne!(arrays[0].row, arrays[1].row);
}

#[test]
fn mixed_accessories_are_grouped_before_packing() {
    let store = MemoryLayoutStore::default();
    let items = fixtures::mixed_items("CUBE", 6, &[&["LED"], &["LED", "USB"], &[]]);
    let plan = BatchPlanner::new(fixtures::config())
        .create_batch(&store, BatchRequest::new(fixtures::batch("B1"), items))
        .unwrap();
    // Three distinct signatures, each appearing twice: two changes at best.
    assert_eq!(plan.categories[0].transitions, 2);
}

#[test]
fn full_array_lifecycle_on_sqlite() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store =
        SqliteLayoutStore::open(dir.path().join("layout.db"), &SqliteLayoutStoreConfig::default())
            .unwrap();
    let planner = BatchPlanner::new(fixtures::config());
    let workflow = ArrayWorkflow::new(fixtures::config());
    let plan = planner
        .create_batch(
            &store,
            BatchRequest::new(fixtures::batch("B1"), fixtures::plain_items("CUBE", 12)),
        )
        .unwrap();
    let first = plan.categories[0].arrays[0].array.clone();
    let second = plan.categories[0].arrays[1].array.clone();

    let sheet = workflow.start_array(&store, &first).unwrap();
    assert_eq!(sheet.identifier.to_string(), "CUBE00001");
    assert_eq!(sheet.serials.len(), 8);
    let done = workflow.complete_array(&store, &first).unwrap();
    assert_eq!(done.report.engraved_now, 8);
    assert!(workflow.is_array_done(&store, &first).unwrap());
    assert!(!workflow.is_array_done(&store, &second).unwrap());

    // A done array pins its row and its batch.
    let err = RedistributionEngine::new(fixtures::config())
        .redistribute(&store, done.array.row, fixtures::slot(3))
        .unwrap_err();
    assert!(matches!(err, LayoutError::InvalidTransition { .. }));
    let err = planner.delete_batch(&store, &fixtures::batch("B1")).unwrap_err();
    assert!(matches!(err, LayoutError::InvalidTransition { .. }));
    assert_eq!(positions(&store, "B1").len(), 12);
}

#[test]
fn redistributing_an_in_progress_row_rekeys_serials() {
    init_test_tracing();
    let store = MemoryLayoutStore::default();
    let plan = BatchPlanner::new(fixtures::config())
        .create_batch(
            &store,
            BatchRequest::new(fixtures::batch("B1"), fixtures::plain_items("CUBE", 5)),
        )
        .unwrap();
    let array = plan.categories[0].arrays[0].array.clone();
    let row = plan.categories[0].arrays[0].row;
    let workflow = ArrayWorkflow::new(fixtures::config());
    let started = workflow.start_array(&store, &array).unwrap();

    let report = RedistributionEngine::new(fixtures::config())
        .redistribute(&store, row, fixtures::slot(6))
        .unwrap();
    assert_eq!(report.serials_voided, 5);
    assert_eq!(report.serials_reserved, 5);
    assert_eq!(report.after, vec![ArraySeq::new(1), ArraySeq::new(2)]);

    let spilled = fixtures::array("B1", 2);
    let first_sheet = workflow.stamp_sheet(&store, &array).unwrap();
    let second_sheet = workflow.stamp_sheet(&store, &spilled).unwrap();
    assert_eq!(first_sheet.identifier, started.identifier);
    assert_ne!(second_sheet.identifier, started.identifier);
    assert_eq!(first_sheet.serials.len(), 3);
    assert_eq!(second_sheet.serials.len(), 2);
    assert_eq!(second_sheet.array.status, WorkStatus::InProgress);

    // The first reservation is voided, never reissued.
    let records = SerialLifecycle::new(fixtures::config())
        .for_array(&store, &array)
        .unwrap();
    for (_, serial) in &started.serials {
        let record = records.iter().find(|r| r.serial == *serial).unwrap();
        assert_eq!(record.status, SerialStatus::Voided);
    }

    workflow.complete_array(&store, &array).unwrap();
    workflow.complete_array(&store, &spilled).unwrap();
}

#[test]
fn failed_commit_leaves_no_trace() {
    init_test_tracing();
    let store = MemoryLayoutStore::default();
    let planner = BatchPlanner::new(fixtures::config());
    planner
        .create_batch(
            &store,
            BatchRequest::new(fixtures::batch("B1"), fixtures::plain_items("CUBE", 3)),
        )
        .unwrap();
    let array = fixtures::array("B1", 1);

    store.inject_faults(FaultPlan {
        fail_commit: true,
        ..FaultPlan::default()
    });
    let err = ArrayWorkflow::new(fixtures::config())
        .start_array(&store, &array)
        .unwrap_err();
    assert!(matches!(
        err,
        LayoutError::TransactionFailure { stage: TxStage::Commit, .. }
    ));

    let view = planner.array(&store, &array).unwrap();
    assert_eq!(view.status, WorkStatus::Pending);
    assert!(SerialLifecycle::new(fixtures::config())
        .for_array(&store, &array)
        .unwrap()
        .is_empty());

    // The retry succeeds and starts numbering from scratch.
    let sheet = ArrayWorkflow::new(fixtures::config())
        .start_array(&store, &array)
        .unwrap();
    assert_eq!(sheet.identifier.to_string(), "CUBE00001");
    assert_eq!(sheet.serials[0].1.get(), 1);
}

#[test]
fn deleting_a_batch_voids_reserved_serials() {
    let store = MemoryLayoutStore::default();
    let planner = BatchPlanner::new(fixtures::config());
    planner
        .create_batch(
            &store,
            BatchRequest::new(fixtures::batch("B1"), fixtures::plain_items("CUBE", 4)),
        )
        .unwrap();
    let array = fixtures::array("B1", 1);
    ArrayWorkflow::new(fixtures::config())
        .start_array(&store, &array)
        .unwrap();

    let report = planner.delete_batch(&store, &fixtures::batch("B1")).unwrap();
    assert_eq!(report.items_removed, 4);
    assert_eq!(report.serials_voided, 4);
    assert!(matches!(
        planner.batch(&store, &fixtures::batch("B1")),
        Err(LayoutError::NotFound(_))
    ));

    // Serials stay on record for audit.
    let records = SerialLifecycle::new(fixtures::config())
        .for_array(&store, &array)
        .unwrap();
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.status == SerialStatus::Voided));
}
