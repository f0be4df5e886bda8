//! Identifier newtypes for batches, categories, rows, arrays and slots.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::LayoutError;

/// Maximum length of a batch identifier.
pub const MAX_BATCH_ID_LEN: usize = 64;

/// Maximum length of a category code.
pub const MAX_CATEGORY_LEN: usize = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Batch
// ─────────────────────────────────────────────────────────────────────────────

/// Production batch identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BatchId(String);

impl BatchId {
    /// Create a validated batch identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidInput`] if the value is empty, too long
    /// or contains whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self, LayoutError> {
        let value = value.into();
        if value.is_empty() || value.len() > MAX_BATCH_ID_LEN {
            return Err(LayoutError::invalid_input(format!(
                "batch id must be 1..={MAX_BATCH_ID_LEN} characters, got {}",
                value.len()
            )));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(LayoutError::invalid_input(format!(
                "batch id contains whitespace: {value:?}"
            )));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BatchId {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for BatchId {
    type Error = LayoutError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BatchId> for String {
    fn from(value: BatchId) -> Self {
        value.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Category
// ─────────────────────────────────────────────────────────────────────────────

/// Product category code (the fixed prefix shared by all items of a kind).
///
/// Categories never share an array and each has its own identifier counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Category(String);

impl Category {
    /// Create a validated category code.
    ///
    /// Codes are 1..=16 ASCII letters, digits, `-` or `_`.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidInput`] for any other value.
    pub fn new(value: impl Into<String>) -> Result<Self, LayoutError> {
        let value = value.into();
        if value.is_empty() || value.len() > MAX_CATEGORY_LEN {
            return Err(LayoutError::invalid_input(format!(
                "category must be 1..={MAX_CATEGORY_LEN} characters, got {value:?}"
            )));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(LayoutError::invalid_input(format!(
                "category contains unsupported characters: {value:?}"
            )));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Category {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Category {
    type Error = LayoutError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        value.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row / Item
// ─────────────────────────────────────────────────────────────────────────────

/// Logical row identifier.
///
/// Assigned once when an array is first planned and never changed again, even
/// when redistribution spreads the row across several arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(Uuid);

impl RowId {
    /// Generate a fresh row id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row:{}", self.0)
    }
}

impl FromStr for RowId {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("row:").unwrap_or(s);
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|e| LayoutError::invalid_input(format!("invalid row id {s:?}: {e}")))
    }
}

/// Internal item identifier; immutable for the life of the item row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item:{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Array / Slot
// ─────────────────────────────────────────────────────────────────────────────

/// Array sequence number within a batch.
///
/// Mutable from the item's point of view: redistribution moves items to other
/// sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArraySeq(u32);

impl ArraySeq {
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Sequence number `n` places after this one.
    #[must_use]
    pub const fn offset(self, n: u32) -> Self {
        Self(self.0 + n)
    }
}

impl fmt::Display for ArraySeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 1-based slot position inside an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SlotPosition(u8);

impl SlotPosition {
    /// First slot of every array.
    pub const FIRST: Self = Self(1);

    /// Create a slot position; zero is rejected.
    ///
    /// Upper bounds depend on the configured array capacity and are checked
    /// by the sequencer.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidInput`] for zero.
    pub fn new(value: u8) -> Result<Self, LayoutError> {
        if value == 0 {
            return Err(LayoutError::invalid_input("slot positions start at 1"));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for SlotPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for SlotPosition {
    type Error = LayoutError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SlotPosition> for u8 {
    fn from(value: SlotPosition) -> Self {
        value.0
    }
}

/// Reference to one array of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArrayRef {
    pub batch: BatchId,
    pub seq: ArraySeq,
}

impl ArrayRef {
    #[must_use]
    pub const fn new(batch: BatchId, seq: ArraySeq) -> Self {
        Self { batch, seq }
    }
}

impl fmt::Display for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "array {}#{}", self.batch, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_id_validation() {
        assert!(BatchId::new("B-2024-117").is_ok());
        assert!(BatchId::new("").is_err());
        assert!(BatchId::new("has space").is_err());
        assert!(BatchId::new("x".repeat(MAX_BATCH_ID_LEN + 1)).is_err());
    }

    #[test]
    fn category_validation() {
        assert_eq!(Category::new("CUBE").unwrap().as_str(), "CUBE");
        assert!(Category::new("LXB-RT20").is_ok());
        assert!(Category::new("").is_err());
        assert!(Category::new("A/B").is_err());
        assert!(Category::new("@array").is_err());
        assert!(Category::new("X".repeat(MAX_CATEGORY_LEN + 1)).is_err());
    }

    #[test]
    fn category_serde_rejects_invalid() {
        let parsed: Result<Category, _> = serde_json::from_str("\"no spaces\"");
        assert!(parsed.is_err());
        let parsed: Category = serde_json::from_str("\"SZ04\"").unwrap();
        assert_eq!(parsed.as_str(), "SZ04");
    }

    #[test]
    fn row_id_parses_with_or_without_prefix() {
        let row = RowId::new();
        let shown = row.to_string();
        assert!(shown.starts_with("row:"));
        assert_eq!(shown.parse::<RowId>().unwrap(), row);
        assert_eq!(row.as_uuid().to_string().parse::<RowId>().unwrap(), row);
        assert!("row:nope".parse::<RowId>().is_err());
    }

    #[test]
    fn slot_position_rejects_zero() {
        assert!(SlotPosition::new(0).is_err());
        assert_eq!(SlotPosition::new(8).unwrap().get(), 8);
        let parsed: Result<SlotPosition, _> = serde_json::from_str("0");
        assert!(parsed.is_err());
    }

    #[test]
    fn array_ref_display() {
        let array = ArrayRef::new(BatchId::new("B7").unwrap(), ArraySeq::new(3));
        assert_eq!(array.to_string(), "array B7#3");
    }
}
