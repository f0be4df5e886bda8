//! Items, accessory signatures and the array/row views built from item rows.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    ArrayRef, ArraySeq, BatchId, Category, ItemId, LayoutError, RowId, SlotPosition, WorkStatus,
};

// ─────────────────────────────────────────────────────────────────────────────
// Accessory codes
// ─────────────────────────────────────────────────────────────────────────────

/// A short accessory requirement code (LED, lens or connector code).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessoryCode(String);

impl AccessoryCode {
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidInput`] for empty or whitespace-bearing codes.
    pub fn new(value: impl Into<String>) -> Result<Self, LayoutError> {
        let value = value.into();
        if value.is_empty() || value.chars().any(char::is_whitespace) {
            return Err(LayoutError::invalid_input(format!(
                "invalid accessory code: {value:?}"
            )));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccessoryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccessoryCode {
    type Error = LayoutError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AccessoryCode> for String {
    fn from(value: AccessoryCode) -> Self {
        value.0
    }
}

/// Order-independent multiset of the accessory codes an item requires.
///
/// Two items whose signatures are equal can run back to back without a
/// material change. Ordering is lexicographic over the sorted codes and is
/// the sequencer's tie-break.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "Vec<AccessoryCode>", into = "Vec<AccessoryCode>")]
pub struct AccessorySignature(Vec<AccessoryCode>);

impl AccessorySignature {
    #[must_use]
    pub fn new(mut codes: Vec<AccessoryCode>) -> Self {
        codes.sort();
        Self(codes)
    }

    /// Build a signature from raw strings.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidInput`] if any code is invalid.
    pub fn parse<I, S>(codes: I) -> Result<Self, LayoutError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        codes
            .into_iter()
            .map(AccessoryCode::new)
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    #[must_use]
    pub fn codes(&self) -> &[AccessoryCode] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of codes shared with `other`, counting repeats (multiset
    /// intersection size).
    #[must_use]
    pub fn overlap(&self, other: &Self) -> usize {
        let (mut i, mut j, mut shared) = (0, 0, 0);
        while i < self.0.len() && j < other.0.len() {
            match self.0[i].cmp(&other.0[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    shared += 1;
                    i += 1;
                    j += 1;
                }
            }
        }
        shared
    }
}

impl From<Vec<AccessoryCode>> for AccessorySignature {
    fn from(codes: Vec<AccessoryCode>) -> Self {
        Self::new(codes)
    }
}

impl From<AccessorySignature> for Vec<AccessoryCode> {
    fn from(value: AccessorySignature) -> Self {
        value.0
    }
}

impl fmt::Display for AccessorySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("-");
        }
        for (i, code) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("+")?;
            }
            f.write_str(code.as_str())?;
        }
        Ok(())
    }
}

/// Anything the sequencer can order by accessory signature.
pub trait Accessorized {
    fn signature(&self) -> &AccessorySignature;
}

// ─────────────────────────────────────────────────────────────────────────────
// Items
// ─────────────────────────────────────────────────────────────────────────────

/// An item as supplied by a batch-creation request, before placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub category: Category,
    /// Per-category sub-type (e.g. a board revision).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Per-instance key, usually the order number.
    pub order_ref: String,
    #[serde(default)]
    pub accessories: AccessorySignature,
}

impl NewItem {
    #[must_use]
    pub fn new(
        category: Category,
        order_ref: impl Into<String>,
        accessories: AccessorySignature,
    ) -> Self {
        Self {
            category,
            subtype: None,
            order_ref: order_ref.into(),
            accessories,
        }
    }

    #[must_use]
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }
}

impl Accessorized for NewItem {
    fn signature(&self) -> &AccessorySignature {
        &self.accessories
    }
}

/// A placed item row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub batch: BatchId,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    pub order_ref: String,
    pub accessories: AccessorySignature,
    /// Logical row; stable across redistribution.
    pub row: RowId,
    pub array_seq: ArraySeq,
    pub slot: SlotPosition,
    pub status: WorkStatus,
}

impl Item {
    /// Place a requested item at a concrete position.
    #[must_use]
    pub fn placed(
        new: NewItem,
        batch: BatchId,
        row: RowId,
        array_seq: ArraySeq,
        slot: SlotPosition,
    ) -> Self {
        Self {
            id: ItemId::new(),
            batch,
            category: new.category,
            subtype: new.subtype,
            order_ref: new.order_ref,
            accessories: new.accessories,
            row,
            array_seq,
            slot,
            status: WorkStatus::Pending,
        }
    }

    #[must_use]
    pub fn array_ref(&self) -> ArrayRef {
        ArrayRef::new(self.batch.clone(), self.array_seq)
    }
}

impl Accessorized for Item {
    fn signature(&self) -> &AccessorySignature {
        &self.accessories
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Views
// ─────────────────────────────────────────────────────────────────────────────

/// One array as seen through its item rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayView {
    pub array: ArrayRef,
    pub row: RowId,
    pub category: Category,
    pub status: WorkStatus,
    /// Items ordered by slot.
    pub items: Vec<Item>,
}

impl ArrayView {
    /// Build the view of a single array from its items.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::NotFound`] for an empty set and
    /// [`LayoutError::Conflict`] if the rows disagree on array, row, category
    /// or status.
    pub fn from_items(mut items: Vec<Item>) -> Result<Self, LayoutError> {
        items.sort_by_key(|item| item.slot);
        let first = items
            .first()
            .ok_or_else(|| LayoutError::not_found("array with no items"))?;
        let array = first.array_ref();
        let (row, category, status) = (first.row, first.category.clone(), first.status);
        if let Some(odd) = items.iter().find(|item| {
            item.array_ref() != array
                || item.row != row
                || item.category != category
                || item.status != status
        }) {
            return Err(LayoutError::Conflict {
                reason: format!("{array} has inconsistent item {}", odd.id),
            });
        }
        Ok(Self {
            array,
            row,
            category,
            status,
            items,
        })
    }

    #[must_use]
    pub fn occupied_slots(&self) -> Vec<SlotPosition> {
        self.items.iter().map(|item| item.slot).collect()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status == WorkStatus::Done
    }
}

/// A logical row and the arrays it currently spans (one-to-many).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowView {
    pub row: RowId,
    pub category: Category,
    /// Arrays ordered by sequence number.
    pub arrays: Vec<ArrayView>,
}

impl RowView {
    /// Group a row's items by array.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::NotFound`] for an empty set and
    /// [`LayoutError::Conflict`] when the items are not one consistent row.
    pub fn from_items(row: RowId, items: Vec<Item>) -> Result<Self, LayoutError> {
        if items.is_empty() {
            return Err(LayoutError::not_found(row));
        }
        let mut by_array: BTreeMap<ArraySeq, Vec<Item>> = BTreeMap::new();
        for item in items {
            if item.row != row {
                return Err(LayoutError::Conflict {
                    reason: format!("{} does not belong to {row}", item.id),
                });
            }
            by_array.entry(item.array_seq).or_default().push(item);
        }
        let arrays = by_array
            .into_values()
            .map(ArrayView::from_items)
            .collect::<Result<Vec<_>, _>>()?;
        let category = arrays[0].category.clone();
        if arrays.iter().any(|a| a.category != category) {
            return Err(LayoutError::Conflict {
                reason: format!("{row} mixes categories"),
            });
        }
        Ok(Self {
            row,
            category,
            arrays,
        })
    }

    #[must_use]
    pub fn item_count(&self) -> usize {
        self.arrays.iter().map(|a| a.items.len()).sum()
    }

    #[must_use]
    pub fn array_seqs(&self) -> Vec<ArraySeq> {
        self.arrays.iter().map(|a| a.array.seq).collect()
    }
}
