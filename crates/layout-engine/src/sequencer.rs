//! Batch Sequencer: transition-minimising order and slot packing.
//!
//! Ordering groups items by accessory signature and chains the groups
//! greedily by overlap, which is O(g²) in the number of distinct signatures.
//! Batches are tens of items, so near-optimal beats an exact solver here.
//!
//! Tie-breaks are deterministic:
//! - the chain starts at the signature with the most codes, lexicographically
//!   smallest among equals;
//! - each step takes the unvisited group with the highest overlap with the
//!   last group, lexicographically smallest among equals.

use std::collections::{BTreeMap, BTreeSet};

use layout_core::{
    AccessorySignature, Accessorized, ArraySeq, LayoutConfig, LayoutError, LayoutResult,
    SlotPosition,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Items placed on one array: `(slot, item)` in slot order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayAssignment<T> {
    pub array_seq: ArraySeq,
    pub placements: Vec<(SlotPosition, T)>,
}

impl<T> ArrayAssignment<T> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.placements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    #[must_use]
    pub fn slots(&self) -> Vec<SlotPosition> {
        self.placements.iter().map(|(slot, _)| *slot).collect()
    }
}

/// Slots an operator has marked faulty, per array. Marked slots are skipped
/// when packing and never hold an item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnusableSlots {
    marked: BTreeMap<ArraySeq, BTreeSet<SlotPosition>>,
}

impl UnusableSlots {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one slot of `array_seq`.
    pub fn mark(&mut self, array_seq: ArraySeq, slot: SlotPosition) -> &mut Self {
        self.marked.entry(array_seq).or_default().insert(slot);
        self
    }

    /// Mark grid row `row` (zero-based) of an array laid out `columns` wide.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidInput`] for zero columns or a row
    /// outside `slots_per_array`.
    pub fn mark_grid_row(
        &mut self,
        array_seq: ArraySeq,
        row: u8,
        columns: u8,
        slots_per_array: u8,
    ) -> LayoutResult<&mut Self> {
        let slots = grid_slots(slots_per_array, columns, |index| index / columns == row)?;
        if slots.is_empty() {
            return Err(LayoutError::invalid_input(format!(
                "row {row} is outside a {slots_per_array}-slot array {columns} wide"
            )));
        }
        self.marked.entry(array_seq).or_default().extend(slots);
        Ok(self)
    }

    /// Mark grid column `column` (zero-based) of an array laid out `columns`
    /// wide.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidInput`] for zero columns or a column
    /// not below `columns`.
    pub fn mark_grid_column(
        &mut self,
        array_seq: ArraySeq,
        column: u8,
        columns: u8,
        slots_per_array: u8,
    ) -> LayoutResult<&mut Self> {
        if column >= columns {
            return Err(LayoutError::invalid_input(format!(
                "column {column} is outside a grid {columns} wide"
            )));
        }
        let slots = grid_slots(slots_per_array, columns, |index| index % columns == column)?;
        self.marked.entry(array_seq).or_default().extend(slots);
        Ok(self)
    }

    #[must_use]
    pub fn is_unusable(&self, array_seq: ArraySeq, slot: SlotPosition) -> bool {
        self.marked
            .get(&array_seq)
            .is_some_and(|slots| slots.contains(&slot))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.marked.values().all(BTreeSet::is_empty)
    }

    /// Marked slots, ascending by array then slot.
    pub fn iter(&self) -> impl Iterator<Item = (ArraySeq, SlotPosition)> + '_ {
        self.marked
            .iter()
            .flat_map(|(seq, slots)| slots.iter().map(move |slot| (*seq, *slot)))
    }
}

fn grid_slots(
    slots_per_array: u8,
    columns: u8,
    select: impl Fn(u8) -> bool,
) -> LayoutResult<Vec<SlotPosition>> {
    if columns == 0 {
        return Err(LayoutError::invalid_input("grid needs at least one column"));
    }
    (0..slots_per_array)
        .filter(|index| select(*index))
        .map(|index| SlotPosition::new(index + 1))
        .collect()
}

/// Order `items` so that adjacent items share accessory codes where possible.
///
/// Items with equal signatures stay in their input order.
#[must_use]
pub fn sort_for_minimal_transitions<T: Accessorized>(items: Vec<T>) -> Vec<T> {
    let total = items.len();
    let mut groups: BTreeMap<AccessorySignature, Vec<T>> = BTreeMap::new();
    for item in items {
        groups.entry(item.signature().clone()).or_default().push(item);
    }

    // Ascending signature order; strict comparisons keep the smallest on ties.
    let mut remaining: Vec<(AccessorySignature, Vec<T>)> = groups.into_iter().collect();
    let mut start = 0;
    for (i, (signature, _)) in remaining.iter().enumerate() {
        if signature.len() > remaining[start].0.len() {
            start = i;
        }
    }

    let mut ordered = Vec::with_capacity(total);
    if remaining.is_empty() {
        return ordered;
    }
    let (mut last, first_items) = remaining.remove(start);
    ordered.extend(first_items);

    while !remaining.is_empty() {
        let mut best = 0;
        let mut best_score = remaining[0].0.overlap(&last);
        for (i, (signature, _)) in remaining.iter().enumerate().skip(1) {
            let score = signature.overlap(&last);
            if score > best_score {
                best = i;
                best_score = score;
            }
        }
        let (signature, group) = remaining.remove(best);
        ordered.extend(group);
        last = signature;
    }
    ordered
}

/// Adjacent pairs whose signatures differ. Sequences of zero or one item
/// have none.
#[must_use]
pub fn count_transitions<T: Accessorized>(sequence: &[T]) -> usize {
    sequence
        .windows(2)
        .filter(|pair| pair[0].signature() != pair[1].signature())
        .count()
}

/// Packs sequences into fixed-capacity arrays.
#[derive(Debug, Clone, Copy)]
pub struct BatchSequencer {
    slots_per_array: u8,
}

impl BatchSequencer {
    #[must_use]
    pub const fn new(config: &LayoutConfig) -> Self {
        Self {
            slots_per_array: config.slots_per_array,
        }
    }

    #[must_use]
    pub const fn slots_per_array(&self) -> u8 {
        self.slots_per_array
    }

    /// Slots the first array offers when filling starts at `start_offset`.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::SlotOverflow`] when `start_offset` is past the
    /// last slot; positions never wrap.
    pub fn first_capacity(&self, start_offset: SlotPosition) -> LayoutResult<usize> {
        let n = self.slots_per_array;
        if start_offset.get() > n {
            return Err(LayoutError::SlotOverflow {
                array: format!("first array (start offset {start_offset})"),
                capacity: n,
                requested: 1,
                available: 0,
            });
        }
        Ok(usize::from(n - start_offset.get() + 1))
    }

    /// Arrays needed for `count` items starting at `start_offset`.
    ///
    /// # Errors
    ///
    /// See [`first_capacity`](Self::first_capacity).
    pub fn arrays_needed(&self, count: usize, start_offset: SlotPosition) -> LayoutResult<usize> {
        let first = self.first_capacity(start_offset)?;
        if count == 0 {
            return Ok(0);
        }
        if count <= first {
            return Ok(1);
        }
        Ok(1 + (count - first).div_ceil(usize::from(self.slots_per_array)))
    }

    /// Pack `sequence` into consecutive arrays numbered from
    /// `starting_array_seq`. The first array fills from `start_offset` and
    /// takes `N - start_offset + 1` items; later arrays fill from slot 1.
    ///
    /// # Errors
    ///
    /// See [`first_capacity`](Self::first_capacity).
    pub fn assign_to_arrays<T>(
        &self,
        sequence: Vec<T>,
        start_offset: SlotPosition,
        starting_array_seq: ArraySeq,
    ) -> LayoutResult<Vec<ArrayAssignment<T>>> {
        let needed = self.arrays_needed(sequence.len(), start_offset)?;
        let seqs: Vec<ArraySeq> = (0..needed)
            .map(|i| u32::try_from(i).map(|i| starting_array_seq.offset(i)))
            .collect::<Result<_, _>>()
            .map_err(|_| LayoutError::invalid_input("too many arrays for one sequence"))?;
        self.assign_onto(sequence, start_offset, &seqs)
    }

    /// Pack `sequence` onto the given array numbers, in the order given.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::SlotOverflow`] if `seqs` has fewer arrays than
    /// the sequence needs, or as for [`first_capacity`](Self::first_capacity).
    pub fn assign_onto<T>(
        &self,
        sequence: Vec<T>,
        start_offset: SlotPosition,
        seqs: &[ArraySeq],
    ) -> LayoutResult<Vec<ArrayAssignment<T>>> {
        self.assign_around(sequence, start_offset, seqs, &UnusableSlots::default())
    }

    /// Usable slots of `array_seq` from `first_slot` on, ascending.
    ///
    /// # Errors
    ///
    /// See [`first_capacity`](Self::first_capacity).
    pub fn usable_slots(
        &self,
        array_seq: ArraySeq,
        first_slot: SlotPosition,
        unusable: &UnusableSlots,
    ) -> LayoutResult<Vec<SlotPosition>> {
        self.first_capacity(first_slot)?;
        let slots = (first_slot.get()..=self.slots_per_array)
            .map(SlotPosition::new)
            .collect::<LayoutResult<Vec<_>>>()?;
        Ok(slots
            .into_iter()
            .filter(|slot| !unusable.is_unusable(array_seq, *slot))
            .collect())
    }

    /// Pack `sequence` onto `seqs`, skipping `unusable` slots.
    ///
    /// The first array with a usable slot at or after `start_offset` fills
    /// from there; every later array fills from slot 1. Arrays with nothing
    /// usable are passed over and get no assignment. Positions never wrap.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::SlotOverflow`] if `seqs` cannot hold the
    /// sequence, or as for [`first_capacity`](Self::first_capacity).
    pub fn assign_around<T>(
        &self,
        sequence: Vec<T>,
        start_offset: SlotPosition,
        seqs: &[ArraySeq],
        unusable: &UnusableSlots,
    ) -> LayoutResult<Vec<ArrayAssignment<T>>> {
        self.first_capacity(start_offset)?;
        let count = sequence.len();
        let mut items = sequence.into_iter().peekable();
        let mut assignments: Vec<ArrayAssignment<T>> = Vec::new();
        let mut available = 0;
        for &array_seq in seqs {
            let first_slot = if assignments.is_empty() {
                start_offset
            } else {
                SlotPosition::FIRST
            };
            let slots = self.usable_slots(array_seq, first_slot, unusable)?;
            available += slots.len();
            if items.peek().is_none() || slots.is_empty() {
                continue;
            }
            assignments.push(ArrayAssignment {
                array_seq,
                placements: slots.into_iter().zip(items.by_ref()).collect(),
            });
        }
        if items.peek().is_some() {
            return Err(LayoutError::SlotOverflow {
                array: format!("{} array(s) from offset {start_offset}", seqs.len()),
                capacity: self.slots_per_array,
                requested: count,
                available,
            });
        }
        debug!(
            items = count,
            arrays = assignments.len(),
            start_offset = start_offset.get(),
            skipped = unusable.iter().count(),
            "slots assigned"
        );
        Ok(assignments)
    }
}
