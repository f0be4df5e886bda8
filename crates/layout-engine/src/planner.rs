//! Batch Planner: turns a batch-creation request into persisted arrays.
//!
//! Also owns the batch-level operations that touch many rows at once: adding
//! items to an existing array, the row and array views, and batch deletion.

use std::collections::{BTreeMap, BTreeSet};

use layout_core::{
    ArrayRef, ArraySeq, ArrayView, BatchId, Category, Item, LayoutConfig, LayoutError,
    LayoutResult, NewItem, RowId, RowView, SlotPosition, WorkStatus,
};
use layout_store::{LayoutStore, LayoutTx};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::allocator::{CounterKey, SequenceAllocator};
use crate::sequencer::{BatchSequencer, count_transitions, sort_for_minimal_transitions};
use crate::serials::SerialLifecycle;
use crate::txn::with_transaction;

const fn first_slot() -> SlotPosition {
    SlotPosition::FIRST
}

/// Input of [`BatchPlanner::create_batch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub batch: BatchId,
    pub items: Vec<NewItem>,
    /// Start offset for categories without an override.
    #[serde(default = "first_slot")]
    pub start_offset: SlotPosition,
    /// Per-category start offsets.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub category_offsets: BTreeMap<Category, SlotPosition>,
}

impl BatchRequest {
    #[must_use]
    pub fn new(batch: BatchId, items: Vec<NewItem>) -> Self {
        Self {
            batch,
            items,
            start_offset: SlotPosition::FIRST,
            category_offsets: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn with_start_offset(mut self, offset: SlotPosition) -> Self {
        self.start_offset = offset;
        self
    }

    #[must_use]
    pub fn with_category_offset(mut self, category: Category, offset: SlotPosition) -> Self {
        self.category_offsets.insert(category, offset);
        self
    }

    fn offset_for(&self, category: &Category) -> SlotPosition {
        self.category_offsets
            .get(category)
            .copied()
            .unwrap_or(self.start_offset)
    }
}

/// Arrays created for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPlan {
    pub category: Category,
    pub start_offset: SlotPosition,
    /// Accessory transitions along the chosen order.
    pub transitions: usize,
    pub arrays: Vec<ArrayView>,
}

/// Result of [`BatchPlanner::create_batch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPlan {
    pub batch: BatchId,
    pub categories: Vec<CategoryPlan>,
}

impl BatchPlan {
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.categories
            .iter()
            .flat_map(|c| &c.arrays)
            .map(|a| a.items.len())
            .sum()
    }

    #[must_use]
    pub fn array_count(&self) -> usize {
        self.categories.iter().map(|c| c.arrays.len()).sum()
    }
}

/// Result of [`BatchPlanner::delete_batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReport {
    pub items_removed: usize,
    pub serials_voided: usize,
}

/// Creates batches and answers batch-level queries.
#[derive(Debug, Clone)]
pub struct BatchPlanner {
    config: LayoutConfig,
    allocator: SequenceAllocator,
    sequencer: BatchSequencer,
    serials: SerialLifecycle,
}

impl BatchPlanner {
    #[must_use]
    pub fn new(config: LayoutConfig) -> Self {
        Self {
            allocator: SequenceAllocator::new(config.clone()),
            sequencer: BatchSequencer::new(&config),
            serials: SerialLifecycle::new(config.clone()),
            config,
        }
    }

    /// Group, order, pack and persist a batch in one transaction.
    ///
    /// Each category is sequenced on its own (an array never mixes
    /// categories), packed from its start offset, and every created array
    /// gets a fresh logical row.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidInput`] for an empty request,
    /// [`LayoutError::Conflict`] if the batch already has items,
    /// [`LayoutError::SlotOverflow`] for an offset past the last slot and
    /// [`LayoutError::CapacityExhausted`] when array numbers run out.
    #[instrument(skip_all, fields(batch = %request.batch, items = request.items.len()))]
    pub fn create_batch(
        &self,
        store: &dyn LayoutStore,
        request: BatchRequest,
    ) -> LayoutResult<BatchPlan> {
        if request.items.is_empty() {
            return Err(LayoutError::invalid_input(format!(
                "batch {} has no items",
                request.batch
            )));
        }
        let offsets =
            std::iter::once(&request.start_offset).chain(request.category_offsets.values());
        for offset in offsets {
            self.sequencer.first_capacity(*offset)?;
        }

        let plan = with_transaction(store, "create_batch", |tx| {
            if !tx.items_for_batch(&request.batch)?.is_empty() {
                return Err(LayoutError::Conflict {
                    reason: format!("batch {} already exists", request.batch),
                });
            }

            let mut by_category: BTreeMap<Category, Vec<NewItem>> = BTreeMap::new();
            for item in request.items.iter().cloned() {
                by_category.entry(item.category.clone()).or_default().push(item);
            }

            let mut categories = Vec::with_capacity(by_category.len());
            for (category, items) in by_category {
                let start_offset = request.offset_for(&category);
                categories.push(self.place_category(
                    tx,
                    &request.batch,
                    category,
                    items,
                    start_offset,
                )?);
            }
            Ok(BatchPlan {
                batch: request.batch.clone(),
                categories,
            })
        })?;

        info!(
            batch = %plan.batch,
            items = plan.item_count(),
            arrays = plan.array_count(),
            "batch created"
        );
        Ok(plan)
    }

    fn place_category(
        &self,
        tx: &mut dyn LayoutTx,
        batch: &BatchId,
        category: Category,
        items: Vec<NewItem>,
        start_offset: SlotPosition,
    ) -> LayoutResult<CategoryPlan> {
        let ordered = sort_for_minimal_transitions(items);
        let transitions = count_transitions(&ordered);
        let needed = self.sequencer.arrays_needed(ordered.len(), start_offset)?;
        let count = u32::try_from(needed)
            .map_err(|_| LayoutError::invalid_input(format!("{needed} arrays for {category}")))?;
        let block = self
            .allocator
            .next_block_in(tx, CounterKey::ArraySeq(batch), count)?;
        let assignments =
            self.sequencer
                .assign_to_arrays(ordered, start_offset, ArraySeq::new(*block.start()))?;

        let mut arrays = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let row = RowId::new();
            let mut placed = Vec::with_capacity(assignment.len());
            for (slot, new) in assignment.placements {
                let item = Item::placed(new, batch.clone(), row, assignment.array_seq, slot);
                tx.insert_item(&item)?;
                placed.push(item);
            }
            arrays.push(ArrayView::from_items(placed)?);
        }
        debug!(
            %category,
            transitions,
            arrays = arrays.len(),
            start_offset = start_offset.get(),
            "category placed"
        );
        Ok(CategoryPlan {
            category,
            start_offset,
            transitions,
            arrays,
        })
    }

    /// Append items to an existing array after its highest occupied slot.
    ///
    /// Items added to an in-progress array get serials reserved right away,
    /// so the array can still be completed.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::SlotOverflow`] naming the array if the free
    /// slots are insufficient, [`LayoutError::InvalidTransition`] for a done
    /// array and [`LayoutError::InvalidInput`] for a category mismatch.
    #[instrument(skip_all, fields(array = %array, items = items.len()))]
    pub fn add_items(
        &self,
        store: &dyn LayoutStore,
        array: &ArrayRef,
        items: Vec<NewItem>,
    ) -> LayoutResult<ArrayView> {
        if items.is_empty() {
            return Err(LayoutError::invalid_input(format!("{array}: no items to add")));
        }
        with_transaction(store, "add_items", |tx| {
            let view = load_array(tx, array)?;
            if view.is_done() {
                return Err(LayoutError::invalid_transition(
                    array,
                    view.status,
                    "items added",
                ));
            }
            if let Some(odd) = items.iter().find(|item| item.category != view.category) {
                return Err(LayoutError::invalid_input(format!(
                    "{array} holds {}, cannot add {} item {}",
                    view.category, odd.category, odd.order_ref
                )));
            }

            let n = self.config.slots_per_array;
            let highest = view.occupied_slots().into_iter().max().map_or(0, SlotPosition::get);
            let available = usize::from(n.saturating_sub(highest));
            if items.len() > available {
                return Err(LayoutError::SlotOverflow {
                    array: array.to_string(),
                    capacity: n,
                    requested: items.len(),
                    available,
                });
            }

            let added = items.len();
            for (new, position) in items.into_iter().zip(highest + 1..=n) {
                let mut item = Item::placed(
                    new,
                    array.batch.clone(),
                    view.row,
                    array.seq,
                    SlotPosition::new(position)?,
                );
                item.status = view.status;
                tx.insert_item(&item)?;
            }
            if view.status == WorkStatus::InProgress {
                self.serials.reserve_in(tx, added, array)?;
            }
            info!(%array, added, "items added");
            load_array(tx, array)
        })
    }

    /// The one-to-many row view: every array the row currently spans.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::NotFound`] for an unknown row.
    pub fn row(&self, store: &dyn LayoutStore, row: RowId) -> LayoutResult<RowView> {
        with_transaction(store, "row", |tx| RowView::from_items(row, tx.lock_row(row)?))
    }

    /// One array with its items.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::NotFound`] for an empty array.
    pub fn array(&self, store: &dyn LayoutStore, array: &ArrayRef) -> LayoutResult<ArrayView> {
        with_transaction(store, "array", |tx| load_array(tx, array))
    }

    /// Every array of a batch, ordered by sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::NotFound`] for an unknown batch.
    pub fn batch(&self, store: &dyn LayoutStore, batch: &BatchId) -> LayoutResult<Vec<ArrayView>> {
        with_transaction(store, "batch", |tx| {
            let items = tx.items_for_batch(batch)?;
            if items.is_empty() {
                return Err(LayoutError::not_found(format!("batch {batch}")));
            }
            group_by_array(items)
        })
    }

    /// Remove every item of a batch and void its reserved serials, all or
    /// nothing. Identifier bindings and serial records are kept.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidTransition`] if any array is done and
    /// [`LayoutError::NotFound`] for an unknown batch.
    #[instrument(skip_all, fields(batch = %batch))]
    pub fn delete_batch(
        &self,
        store: &dyn LayoutStore,
        batch: &BatchId,
    ) -> LayoutResult<DeleteReport> {
        with_transaction(store, "delete_batch", |tx| {
            let items = tx.items_for_batch(batch)?;
            if items.is_empty() {
                return Err(LayoutError::not_found(format!("batch {batch}")));
            }
            if let Some(done) = items.iter().find(|item| item.status == WorkStatus::Done) {
                return Err(LayoutError::invalid_transition(
                    done.array_ref(),
                    WorkStatus::Done,
                    "deleted",
                ));
            }

            let arrays: BTreeSet<ArraySeq> = items.iter().map(|item| item.array_seq).collect();
            let mut serials_voided = 0;
            for seq in arrays {
                let array = ArrayRef::new(batch.clone(), seq);
                serials_voided += self.serials.void_reserved_for_array_in(tx, &array)?;
            }

            let items_removed = tx.delete_batch_items(batch)?;
            if items_removed != items.len() {
                return Err(LayoutError::Conflict {
                    reason: format!(
                        "batch {batch}: expected to remove {} items, removed {items_removed}",
                        items.len()
                    ),
                });
            }
            info!(%batch, items_removed, serials_voided, "batch deleted");
            Ok(DeleteReport {
                items_removed,
                serials_voided,
            })
        })
    }
}

/// Load one array's view inside a transaction.
pub(crate) fn load_array(tx: &mut dyn LayoutTx, array: &ArrayRef) -> LayoutResult<ArrayView> {
    let items = tx.items_for_array(array)?;
    if items.is_empty() {
        return Err(LayoutError::not_found(array));
    }
    ArrayView::from_items(items)
}

fn group_by_array(items: Vec<Item>) -> LayoutResult<Vec<ArrayView>> {
    let mut by_seq: BTreeMap<ArraySeq, Vec<Item>> = BTreeMap::new();
    for item in items {
        by_seq.entry(item.array_seq).or_default().push(item);
    }
    by_seq.into_values().map(ArrayView::from_items).collect()
}

#[cfg(test)]
mod tests {
    use layout_core::AccessorySignature;
    use layout_store::MemoryLayoutStore;

    use super::*;

    fn new_item(category: &str, order: usize, codes: &[&str]) -> NewItem {
        NewItem::new(
            Category::new(category).unwrap(),
            format!("ORD-{order}"),
            AccessorySignature::parse(codes.iter().copied()).unwrap(),
        )
    }

    fn slot(n: u8) -> SlotPosition {
        SlotPosition::new(n).unwrap()
    }

    fn planner() -> BatchPlanner {
        BatchPlanner::new(LayoutConfig::default())
    }

    #[test]
    fn categories_never_share_an_array() {
        let store = MemoryLayoutStore::default();
        let mut items: Vec<_> = (0..3).map(|i| new_item("CUBE", i, &["A"])).collect();
        items.extend((3..5).map(|i| new_item("SZ04", i, &["B"])));
        let plan = planner()
            .create_batch(&store, BatchRequest::new(BatchId::new("B1").unwrap(), items))
            .unwrap();

        assert_eq!(plan.categories.len(), 2);
        assert_eq!(plan.item_count(), 5);
        let seqs: Vec<u32> = plan
            .categories
            .iter()
            .flat_map(|c| c.arrays.iter().map(|a| a.array.seq.get()))
            .collect();
        assert_eq!(seqs, vec![1, 2]);
        for category in &plan.categories {
            assert!(category.arrays.iter().all(|a| a.category == category.category));
        }
    }

    #[test]
    fn per_category_offsets_apply() {
        let store = MemoryLayoutStore::default();
        let items: Vec<_> = (0..3).map(|i| new_item("CUBE", i, &[])).collect();
        let request = BatchRequest::new(BatchId::new("B1").unwrap(), items)
            .with_category_offset(Category::new("CUBE").unwrap(), slot(7));
        let plan = planner().create_batch(&store, request).unwrap();
        let arrays = &plan.categories[0].arrays;
        assert_eq!(arrays.len(), 2);
        assert_eq!(arrays[0].occupied_slots(), vec![slot(7), slot(8)]);
        assert_eq!(arrays[1].occupied_slots(), vec![slot(1)]);
        assert_ne!(arrays[0].row, arrays[1].row);
    }

    #[test]
    fn duplicate_batch_is_rejected() {
        let store = MemoryLayoutStore::default();
        let batch = BatchId::new("B1").unwrap();
        let p = planner();
        p.create_batch(&store, BatchRequest::new(batch.clone(), vec![new_item("CUBE", 0, &[])]))
            .unwrap();
        let err = p
            .create_batch(&store, BatchRequest::new(batch, vec![new_item("CUBE", 1, &[])]))
            .unwrap_err();
        assert!(matches!(err, LayoutError::Conflict { .. }));
    }

    #[test]
    fn add_items_fills_after_highest_slot() {
        let store = MemoryLayoutStore::default();
        let p = planner();
        let batch = BatchId::new("B1").unwrap();
        let items: Vec<_> = (0..3).map(|i| new_item("CUBE", i, &[])).collect();
        let request = BatchRequest::new(batch.clone(), items).with_start_offset(slot(3));
        p.create_batch(&store, request).unwrap();
        let array = ArrayRef::new(batch, ArraySeq::new(1));

        let view = p
            .add_items(&store, &array, vec![new_item("CUBE", 9, &[]), new_item("CUBE", 10, &[])])
            .unwrap();
        assert_eq!(view.occupied_slots(), (3..=7).map(slot).collect::<Vec<_>>());

        let err = p
            .add_items(&store, &array, vec![new_item("CUBE", 11, &[]), new_item("CUBE", 12, &[])])
            .unwrap_err();
        assert!(matches!(
            err,
            LayoutError::SlotOverflow { requested: 2, available: 1, .. }
        ));

        let err = p
            .add_items(&store, &array, vec![new_item("SZ04", 13, &[])])
            .unwrap_err();
        assert!(matches!(err, LayoutError::InvalidInput(_)));
    }

    #[test]
    fn delete_batch_removes_every_item() {
        let store = MemoryLayoutStore::default();
        let p = planner();
        let batch = BatchId::new("B1").unwrap();
        let items: Vec<_> = (0..10).map(|i| new_item("CUBE", i, &[])).collect();
        p.create_batch(&store, BatchRequest::new(batch.clone(), items)).unwrap();

        let report = p.delete_batch(&store, &batch).unwrap();
        assert_eq!(report.items_removed, 10);
        assert!(matches!(
            p.batch(&store, &batch),
            Err(LayoutError::NotFound(_))
        ));
        assert!(matches!(
            p.delete_batch(&store, &batch),
            Err(LayoutError::NotFound(_))
        ));
    }

    #[test]
    fn batch_request_reads_from_json() {
        let request: BatchRequest = serde_json::from_str(
            r#"{
                "batch": "B1",
                "items": [{"category": "CUBE", "order_ref": "ORD-1", "accessories": ["LED"]}],
                "category_offsets": {"CUBE": 3}
            }"#,
        )
        .unwrap();
        assert_eq!(request.start_offset, SlotPosition::FIRST);
        let cube = Category::new("CUBE").unwrap();
        assert_eq!(request.offset_for(&cube).get(), 3);
        assert_eq!(request.items[0].accessories.len(), 1);

        let bad = serde_json::from_str::<BatchRequest>(
            r#"{"batch": "B1", "items": [], "start_offset": 0}"#,
        );
        assert!(bad.is_err());
    }
}
