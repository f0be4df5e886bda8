//! Test fixtures for layout types.
//!
//! Fixture constructors panic on malformed literals; they are for tests only.

use layout_core::{
    AccessorySignature, ArrayRef, ArraySeq, BatchId, Category, LayoutConfig, NewItem,
    SlotPosition,
};

// ─────────────────────────────────────────────────────────────────────────────
// Identifier Fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// # Panics
///
/// Panics if `code` is not a valid category code.
#[must_use]
pub fn category(code: &str) -> Category {
    Category::new(code).unwrap_or_else(|e| panic!("fixture category {code:?}: {e}"))
}

/// # Panics
///
/// Panics if `id` is not a valid batch id.
#[must_use]
pub fn batch(id: &str) -> BatchId {
    BatchId::new(id).unwrap_or_else(|e| panic!("fixture batch {id:?}: {e}"))
}

#[must_use]
pub fn array(batch_id: &str, seq: u32) -> ArrayRef {
    ArrayRef::new(batch(batch_id), ArraySeq::new(seq))
}

/// # Panics
///
/// Panics if `value` is 0 or above the widest supported array.
#[must_use]
pub fn slot(value: u8) -> SlotPosition {
    SlotPosition::new(value).unwrap_or_else(|e| panic!("fixture slot {value}: {e}"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Item Fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// # Panics
///
/// Panics if any code is not a valid accessory code.
#[must_use]
pub fn signature(codes: &[&str]) -> AccessorySignature {
    AccessorySignature::parse(codes.iter().copied())
        .unwrap_or_else(|e| panic!("fixture signature {codes:?}: {e}"))
}

/// One item with the given accessories.
#[must_use]
pub fn item(category_code: &str, order_ref: &str, accessories: &[&str]) -> NewItem {
    NewItem::new(category(category_code), order_ref, signature(accessories))
}

/// `count` items of one category without accessories, order refs `ORD-0001..`.
#[must_use]
pub fn plain_items(category_code: &str, count: usize) -> Vec<NewItem> {
    (1..=count)
        .map(|i| item(category_code, &format!("ORD-{i:04}"), &[]))
        .collect()
}

/// Items cycling through `signatures`, so consecutive items differ.
#[must_use]
pub fn mixed_items(category_code: &str, count: usize, signatures: &[&[&str]]) -> Vec<NewItem> {
    (0..count)
        .map(|i| {
            let codes = if signatures.is_empty() {
                &[][..]
            } else {
                signatures[i % signatures.len()]
            };
            item(category_code, &format!("ORD-{:04}", i + 1), codes)
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// The default configuration (8 slots, 5-digit identifiers).
#[must_use]
pub fn config() -> LayoutConfig {
    LayoutConfig::default()
}

/// A configuration with tiny limits for exhaustion tests.
#[must_use]
pub fn tight_config(identifier_digits: u8, serial_max: u32) -> LayoutConfig {
    LayoutConfig {
        identifier_digits,
        serial_max,
        ..LayoutConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_items_cycle_signatures() {
        let items = mixed_items("CUBE", 4, &[&["A"], &["B", "C"]]);
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].accessories, items[2].accessories);
        assert_ne!(items[0].accessories, items[1].accessories);
        assert_eq!(items[3].order_ref, "ORD-0004");
    }

    #[test]
    fn tight_config_is_valid() {
        tight_config(1, 10).validate().unwrap();
    }
}
