//! Redistribution Engine: re-pack one logical row from a new start offset.
//!
//! ```text
//!  lock row ──► plan ──► pass 1: (seq, slot) → (seq + temp offset, slot)
//!                         pass 2: temp → final (seq', slot')
//!                         normalise status, re-key serials, verify, commit
//! ```
//!
//! `(batch, array_seq, slot)` is unique at every instant, and the new layout
//! may reuse positions the old one still holds, so rows are parked in a
//! disjoint sequence space first. The logical row id never changes; only the
//! array sequence and slot of its items do.

use std::collections::{BTreeMap, BTreeSet};

use layout_core::{
    ArrayRef, ArraySeq, BatchId, Item, ItemId, LayoutConfig, LayoutError, LayoutResult, RowId,
    SlotPosition, WorkStatus,
};
use layout_store::{LayoutStore, LayoutTx};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::allocator::{CounterKey, SequenceAllocator};
use crate::sequencer::{ArrayAssignment, BatchSequencer, UnusableSlots};
use crate::serials::SerialLifecycle;
use crate::txn::with_transaction;

/// Outcome of a redistribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedistributionReport {
    pub row: RowId,
    pub batch: BatchId,
    pub start_offset: SlotPosition,
    /// Array sequences the row held before, ascending.
    pub before: Vec<ArraySeq>,
    /// Array sequences the row holds now, ascending.
    pub after: Vec<ArraySeq>,
    /// Sequences minted above the batch maximum.
    pub allocated: Vec<ArraySeq>,
    /// Items whose position changed.
    pub moved: usize,
    pub item_count: usize,
    /// Reserved serials voided because their array's contents changed.
    pub serials_voided: usize,
    /// Fresh serials reserved for in-progress arrays.
    pub serials_reserved: usize,
}

impl RedistributionReport {
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.moved == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Move {
    item: ItemId,
    from: (ArraySeq, SlotPosition),
    to: (ArraySeq, SlotPosition),
}

/// Moves rows between arrays transactionally.
#[derive(Debug, Clone)]
pub struct RedistributionEngine {
    config: LayoutConfig,
    allocator: SequenceAllocator,
    sequencer: BatchSequencer,
    serials: SerialLifecycle,
}

impl RedistributionEngine {
    #[must_use]
    pub fn new(config: LayoutConfig) -> Self {
        Self {
            allocator: SequenceAllocator::new(config.clone()),
            sequencer: BatchSequencer::new(&config),
            serials: SerialLifecycle::new(config.clone()),
            config,
        }
    }

    /// Re-pack the items of `row` so filling starts at `new_start_offset`.
    ///
    /// The row's items keep their current order. Array numbers the row
    /// already holds are reused lowest first; extra arrays get numbers above
    /// the batch's current maximum. Arrays the row no longer needs are
    /// released. Every individual move is checked and any failure rolls the
    /// whole redistribution back.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::NotFound`] for an unknown row,
    /// [`LayoutError::InvalidTransition`] if any of its arrays is done,
    /// [`LayoutError::SlotOverflow`] for an offset past the last slot,
    /// [`LayoutError::Conflict`] if a move fails or the result does not
    /// verify, and [`LayoutError::TransactionFailure`] if the store cannot
    /// commit or roll back.
    pub fn redistribute(
        &self,
        store: &dyn LayoutStore,
        row: RowId,
        new_start_offset: SlotPosition,
    ) -> LayoutResult<RedistributionReport> {
        self.redistribute_around(store, row, new_start_offset, &UnusableSlots::default())
    }

    /// [`redistribute`](Self::redistribute), packing around slots marked
    /// unusable. The offset applies to the first array with a usable slot at
    /// or after it; arrays with no usable slot are left out of the row.
    ///
    /// # Errors
    ///
    /// As for `redistribute`; [`LayoutError::CapacityExhausted`] if the
    /// batch runs out of array numbers.
    #[instrument(skip_all, fields(row = %row, offset = new_start_offset.get()))]
    pub fn redistribute_around(
        &self,
        store: &dyn LayoutStore,
        row: RowId,
        new_start_offset: SlotPosition,
        unusable: &UnusableSlots,
    ) -> LayoutResult<RedistributionReport> {
        self.sequencer.first_capacity(new_start_offset)?;
        let report = with_transaction(store, "redistribute", |tx| {
            self.redistribute_in(tx, row, new_start_offset, unusable)
        })?;
        if report.is_noop() {
            debug!(%row, "layout already matches; nothing moved");
        } else {
            info!(
                %row,
                batch = %report.batch,
                moved = report.moved,
                before = ?report.before,
                after = ?report.after,
                "row redistributed"
            );
        }
        Ok(report)
    }

    fn redistribute_in(
        &self,
        tx: &mut dyn LayoutTx,
        row: RowId,
        offset: SlotPosition,
        unusable: &UnusableSlots,
    ) -> LayoutResult<RedistributionReport> {
        // 1. Locked read of the row.
        let items = tx.lock_row(row)?;
        let first = items.first().ok_or_else(|| LayoutError::not_found(row))?;
        let batch = first.batch.clone();
        if let Some(odd) = items.iter().find(|item| item.batch != batch) {
            return Err(LayoutError::Conflict {
                reason: format!("{row} spans batches {batch} and {}", odd.batch),
            });
        }
        if let Some(done) = items.iter().find(|item| item.status == WorkStatus::Done) {
            return Err(LayoutError::invalid_transition(
                format!("{row} ({})", done.array_ref()),
                WorkStatus::Done,
                "redistributed",
            ));
        }
        let item_count = items.len();
        let held: Vec<ArraySeq> = items
            .iter()
            .map(|item| item.array_seq)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        // 2. Target arrays: reuse held numbers, mint the rest above the max.
        let (targets, allocated) =
            self.select_targets(tx, &batch, &held, item_count, offset, unusable)?;
        let assignments = self
            .sequencer
            .assign_around(items.clone(), offset, &targets, unusable)?;
        let moves: Vec<Move> = assignments
            .iter()
            .flat_map(|assignment| {
                assignment.placements.iter().map(move |(slot, item)| Move {
                    item: item.id,
                    from: (item.array_seq, item.slot),
                    to: (assignment.array_seq, *slot),
                })
            })
            .filter(|m| m.from != m.to)
            .collect();

        let mut report = RedistributionReport {
            row,
            batch: batch.clone(),
            start_offset: offset,
            before: held.clone(),
            after: targets.clone(),
            allocated,
            moved: moves.len(),
            item_count,
            serials_voided: 0,
            serials_reserved: 0,
        };
        if moves.is_empty() {
            return Ok(report);
        }
        debug!(%row, moves = moves.len(), targets = ?targets, "redistribution planned");

        // 3. Two-pass move through the temporary sequence space.
        for m in &moves {
            let parked = self.config.temp_seq(m.from.0);
            apply_move(tx, row, m.item, parked, m.from.1)?;
        }
        for m in &moves {
            apply_move(tx, row, m.item, m.to.0, m.to.1)?;
        }

        // Arrays must agree on status; the row takes its most advanced one.
        let status = items
            .iter()
            .map(|item| item.status)
            .max()
            .unwrap_or_default();
        let mut touched: BTreeSet<ArraySeq> = moves
            .iter()
            .flat_map(|m| [m.from.0, m.to.0])
            .collect();
        let mut promoted = BTreeSet::new();
        for assignment in &assignments {
            for (_, item) in &assignment.placements {
                if item.status != status {
                    if !tx.set_item_status(item.id, status)? {
                        return Err(vanished(row, item.id));
                    }
                    touched.insert(assignment.array_seq);
                    promoted.insert(assignment.array_seq);
                }
            }
        }
        if !promoted.is_empty() {
            info!(
                %row,
                %status,
                arrays = ?promoted,
                "arrays took the row's status during redistribution"
            );
        }

        // Serials reserved for the old contents no longer match; re-key them.
        for &seq in &touched {
            report.serials_voided += self
                .serials
                .void_reserved_for_array_in(tx, &ArrayRef::new(batch.clone(), seq))?;
        }
        if status == WorkStatus::InProgress {
            for assignment in assignments.iter().filter(|a| touched.contains(&a.array_seq)) {
                let array = ArrayRef::new(batch.clone(), assignment.array_seq);
                let category = &items[0].category;
                self.allocator.identifier_in(tx, &array, category)?;
                report.serials_reserved +=
                    self.serials.reserve_in(tx, assignment.len(), &array)?.len();
            }
        }

        // 4. Verify before handing back to the commit.
        self.verify(tx, row, &assignments, unusable, item_count)?;
        Ok(report)
    }

    /// Arrays that will hold the row, and the numbers minted for them.
    ///
    /// Held arrays come first, lowest number first; new numbers are minted
    /// one at a time above the batch maximum until the usable slots cover
    /// `item_count`.
    fn select_targets(
        &self,
        tx: &mut dyn LayoutTx,
        batch: &BatchId,
        held: &[ArraySeq],
        item_count: usize,
        offset: SlotPosition,
        unusable: &UnusableSlots,
    ) -> LayoutResult<(Vec<ArraySeq>, Vec<ArraySeq>)> {
        let key = CounterKey::ArraySeq(batch);
        let mut targets = Vec::new();
        let mut allocated = Vec::new();
        let mut capacity = 0;
        let mut held = held.iter().copied();
        while capacity < item_count {
            let seq = match held.next() {
                Some(seq) => seq,
                None => {
                    if allocated.is_empty() {
                        let max = tx.max_array_seq(batch)?.map_or(0, ArraySeq::get);
                        self.allocator.raise_floor_in(tx, key, max)?;
                    }
                    let seq = ArraySeq::new(self.allocator.next_in(tx, key)?);
                    allocated.push(seq);
                    seq
                }
            };
            let first_slot = if targets.is_empty() {
                offset
            } else {
                SlotPosition::FIRST
            };
            let usable = self.sequencer.usable_slots(seq, first_slot, unusable)?.len();
            if usable > 0 {
                targets.push(seq);
                capacity += usable;
            }
        }
        Ok((targets, allocated))
    }

    fn verify(
        &self,
        tx: &mut dyn LayoutTx,
        row: RowId,
        assignments: &[ArrayAssignment<Item>],
        unusable: &UnusableSlots,
        expected_count: usize,
    ) -> LayoutResult<()> {
        let after = tx.lock_row(row)?;
        if after.len() != expected_count {
            return Err(LayoutError::Conflict {
                reason: format!(
                    "{row}: expected {expected_count} items after redistribution, found {}",
                    after.len()
                ),
            });
        }
        let planned: BTreeMap<ItemId, (ArraySeq, SlotPosition)> = assignments
            .iter()
            .flat_map(|a| {
                a.placements
                    .iter()
                    .map(|(slot, item)| (item.id, (a.array_seq, *slot)))
            })
            .collect();
        for item in &after {
            if planned.get(&item.id) != Some(&(item.array_seq, item.slot)) {
                return Err(LayoutError::Conflict {
                    reason: format!(
                        "{row}: {} ended at array {} slot {}, not where planned",
                        item.id, item.array_seq, item.slot
                    ),
                });
            }
            if unusable.is_unusable(item.array_seq, item.slot) {
                return Err(LayoutError::Conflict {
                    reason: format!(
                        "{row}: {} placed on unusable slot {} of array {}",
                        item.id, item.slot, item.array_seq
                    ),
                });
            }
            if item.array_seq.get() > self.config.array_seq_max {
                return Err(LayoutError::Conflict {
                    reason: format!("{row}: {} left in the temporary sequence space", item.id),
                });
            }
        }
        Ok(())
    }
}

fn apply_move(
    tx: &mut dyn LayoutTx,
    row: RowId,
    item: ItemId,
    seq: ArraySeq,
    slot: SlotPosition,
) -> LayoutResult<()> {
    match tx.move_item(item, seq, slot) {
        Ok(true) => Ok(()),
        Ok(false) => Err(vanished(row, item)),
        Err(err) => Err(LayoutError::Conflict {
            reason: format!("{row}: moving {item} to array {seq} slot {slot} failed: {err}"),
        }),
    }
}

fn vanished(row: RowId, item: ItemId) -> LayoutError {
    LayoutError::Conflict {
        reason: format!("{row}: {item} disappeared during redistribution"),
    }
}

#[cfg(test)]
mod tests {
    use layout_core::{AccessorySignature, Category, NewItem};
    use layout_store::{FaultPlan, MemoryLayoutStore};

    use super::*;
    use crate::planner::{BatchPlanner, BatchRequest};
    use crate::workflow::ArrayWorkflow;

    fn slot(n: u8) -> SlotPosition {
        SlotPosition::new(n).unwrap()
    }

    fn seed(store: &MemoryLayoutStore, count: usize, offset: u8) -> RowId {
        let items = (0..count)
            .map(|i| {
                NewItem::new(
                    Category::new("CUBE").unwrap(),
                    format!("ORD-{i}"),
                    AccessorySignature::default(),
                )
            })
            .collect();
        let plan = BatchPlanner::new(LayoutConfig::default())
            .create_batch(
                store,
                BatchRequest::new(BatchId::new("B1").unwrap(), items)
                    .with_start_offset(slot(offset)),
            )
            .unwrap();
        plan.categories[0].arrays[0].row
    }

    fn positions(store: &MemoryLayoutStore, row: RowId) -> Vec<(u32, u8)> {
        BatchPlanner::new(LayoutConfig::default())
            .row(store, row)
            .unwrap()
            .arrays
            .iter()
            .flat_map(|a| a.items.iter().map(|i| (i.array_seq.get(), i.slot.get())))
            .collect()
    }

    #[test]
    fn shifting_right_spills_into_a_new_array() {
        let store = MemoryLayoutStore::default();
        let row = seed(&store, 5, 1);
        let engine = RedistributionEngine::new(LayoutConfig::default());

        let report = engine.redistribute(&store, row, slot(6)).unwrap();
        assert_eq!(report.before, vec![ArraySeq::new(1)]);
        assert_eq!(report.after, vec![ArraySeq::new(1), ArraySeq::new(2)]);
        assert_eq!(report.allocated, vec![ArraySeq::new(2)]);
        assert_eq!(positions(&store, row), vec![(1, 6), (1, 7), (1, 8), (2, 1), (2, 2)]);
    }

    #[test]
    fn shifting_left_releases_arrays() {
        let store = MemoryLayoutStore::default();
        let row = seed(&store, 5, 1);
        let engine = RedistributionEngine::new(LayoutConfig::default());
        engine.redistribute(&store, row, slot(6)).unwrap();

        let report = engine.redistribute(&store, row, slot(2)).unwrap();
        assert_eq!(report.after, vec![ArraySeq::new(1)]);
        assert!(report.allocated.is_empty());
        assert_eq!(
            positions(&store, row),
            vec![(1, 2), (1, 3), (1, 4), (1, 5), (1, 6)]
        );
    }

    #[test]
    fn same_offset_is_a_noop() {
        let store = MemoryLayoutStore::default();
        let row = seed(&store, 3, 4);
        let report = RedistributionEngine::new(LayoutConfig::default())
            .redistribute(&store, row, slot(4))
            .unwrap();
        assert!(report.is_noop());
        assert_eq!(positions(&store, row), vec![(1, 4), (1, 5), (1, 6)]);
    }

    #[test]
    fn failed_move_rolls_everything_back() {
        let store = MemoryLayoutStore::default();
        let row = seed(&store, 4, 1);
        let before = positions(&store, row);

        // Fail in the middle of the second pass.
        store.inject_faults(FaultPlan {
            fail_move_at: Some(5),
            ..FaultPlan::default()
        });
        let err = RedistributionEngine::new(LayoutConfig::default())
            .redistribute(&store, row, slot(7))
            .unwrap_err();
        assert!(matches!(err, LayoutError::Conflict { .. }));
        assert_eq!(positions(&store, row), before);
    }

    #[test]
    fn items_pack_around_unusable_slots() {
        let store = MemoryLayoutStore::default();
        let row = seed(&store, 5, 1);
        let engine = RedistributionEngine::new(LayoutConfig::default());

        let mut unusable = UnusableSlots::new();
        unusable.mark(ArraySeq::new(1), slot(2)).mark(ArraySeq::new(1), slot(3));
        let report = engine
            .redistribute_around(&store, row, slot(1), &unusable)
            .unwrap();
        assert_eq!(report.moved, 4);
        assert_eq!(
            positions(&store, row),
            vec![(1, 1), (1, 4), (1, 5), (1, 6), (1, 7)]
        );

        // Losing the tail of the array spills the rest into a new one.
        let mut unusable = UnusableSlots::new();
        for n in 4..=8 {
            unusable.mark(ArraySeq::new(1), slot(n));
        }
        let report = engine
            .redistribute_around(&store, row, slot(1), &unusable)
            .unwrap();
        assert_eq!(report.allocated, vec![ArraySeq::new(2)]);
        assert_eq!(
            positions(&store, row),
            vec![(1, 1), (1, 2), (1, 3), (2, 1), (2, 2)]
        );
    }

    #[test]
    fn pending_array_takes_the_rows_in_progress_status() {
        let store = MemoryLayoutStore::default();
        let row = seed(&store, 10, 1);
        let batch = BatchId::new("B1").unwrap();
        let first = ArrayRef::new(batch.clone(), ArraySeq::new(1));
        let second = ArrayRef::new(batch, ArraySeq::new(2));
        let flow = ArrayWorkflow::new(LayoutConfig::default());
        flow.start_array(&store, &first).unwrap();

        let report = RedistributionEngine::new(LayoutConfig::default())
            .redistribute(&store, row, slot(2))
            .unwrap();
        assert_eq!(report.serials_voided, 8);
        assert_eq!(report.serials_reserved, 10);

        let sheet = flow.stamp_sheet(&store, &second).unwrap();
        assert_eq!(sheet.array.status, WorkStatus::InProgress);
        assert_eq!(sheet.serials.len(), 3);
        assert_eq!(sheet.identifier.to_string(), "CUBE00002");
    }

    #[test]
    fn unknown_row_is_not_found() {
        let store = MemoryLayoutStore::default();
        let err = RedistributionEngine::new(LayoutConfig::default())
            .redistribute(&store, RowId::new(), slot(1))
            .unwrap_err();
        assert!(matches!(err, LayoutError::NotFound(_)));
    }
}
