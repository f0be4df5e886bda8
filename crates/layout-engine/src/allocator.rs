//! Sequence Allocator: per-key monotonic counters backed by the store.
//!
//! Two kinds of counter live in the same table: one per category for public
//! identifiers, and one per batch for array sequence numbers. Increments are
//! a single insert-or-increment statement inside the caller's transaction,
//! so concurrent callers in any number of processes never see the same value.

use std::fmt;
use std::ops::RangeInclusive;

use layout_core::{
    ArrayRef, ArraySeq, BatchId, Category, IdentifierRecord, LayoutConfig, LayoutError,
    LayoutResult, PublicIdentifier, Utc,
};
use layout_store::{LayoutStore, LayoutTx};
use tracing::{debug, info, instrument, warn};

use crate::txn::with_transaction;

/// Which counter to advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKey<'a> {
    /// Public identifier sequence of a category.
    Identifier(&'a Category),
    /// Array sequence numbers of a batch.
    ArraySeq(&'a BatchId),
}

impl CounterKey<'_> {
    /// Row key in the counters table. Category codes cannot contain `@` or
    /// `/`, so the two namespaces never collide.
    #[must_use]
    pub fn storage_key(&self) -> String {
        match self {
            Self::Identifier(category) => category.as_str().to_string(),
            Self::ArraySeq(batch) => format!("@array/{batch}"),
        }
    }
}

impl fmt::Display for CounterKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier(category) => write!(f, "identifier counter {category}"),
            Self::ArraySeq(batch) => write!(f, "array counter of batch {batch}"),
        }
    }
}

/// Mints identifiers and array sequence numbers.
#[derive(Debug, Clone)]
pub struct SequenceAllocator {
    config: LayoutConfig,
}

impl SequenceAllocator {
    #[must_use]
    pub const fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    fn limit(&self, key: CounterKey<'_>) -> u64 {
        match key {
            CounterKey::Identifier(_) => self.config.identifier_max(),
            CounterKey::ArraySeq(_) => u64::from(self.config.array_seq_max),
        }
    }

    /// Next identifier sequence for `category`, in its own transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::CapacityExhausted`] once the category has used
    /// every sequence its digit width allows; the counter stays at the max.
    #[instrument(skip_all, fields(category = %category))]
    pub fn next(&self, store: &dyn LayoutStore, category: &Category) -> LayoutResult<u32> {
        with_transaction(store, "next", |tx| {
            self.next_in(tx, CounterKey::Identifier(category))
        })
    }

    /// Advance `key` by one inside an open transaction.
    ///
    /// # Errors
    ///
    /// See [`next_block_in`](Self::next_block_in).
    pub fn next_in(&self, tx: &mut dyn LayoutTx, key: CounterKey<'_>) -> LayoutResult<u32> {
        self.next_block_in(tx, key, 1).map(|block| *block.start())
    }

    /// Reserve `count` consecutive values of `key`.
    ///
    /// On overflow the counter is restored to its value before the increment
    /// (never above the max) and nothing is handed out.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidInput`] for `count == 0` and
    /// [`LayoutError::CapacityExhausted`] when the block would pass the max.
    pub fn next_block_in(
        &self,
        tx: &mut dyn LayoutTx,
        key: CounterKey<'_>,
        count: u32,
    ) -> LayoutResult<RangeInclusive<u32>> {
        if count == 0 {
            return Err(LayoutError::invalid_input(format!(
                "{key}: cannot allocate an empty block"
            )));
        }
        let storage_key = key.storage_key();
        let limit = self.limit(key);
        let requested = u64::from(count);
        let last = tx.counter_add(&storage_key, requested)?;
        let previous = last - requested;

        if last > limit {
            tx.counter_set(&storage_key, previous)?;
            warn!(
                counter = %storage_key,
                requested,
                limit,
                "counter overflow; restored"
            );
            return Err(LayoutError::CapacityExhausted {
                resource: key.to_string(),
                requested,
                remaining: limit.saturating_sub(previous),
            });
        }

        let to_u32 = |value: u64| {
            u32::try_from(value).map_err(|_| {
                LayoutError::Store(format!("{key}: counter value {value} exceeds u32"))
            })
        };
        let block = to_u32(previous + 1)?..=to_u32(last)?;
        debug!(counter = %storage_key, first = block.start(), last = block.end(), "allocated");
        Ok(block)
    }

    /// Make sure the next value handed out for `key` is above `floor`.
    ///
    /// # Errors
    ///
    /// Returns a store error on failure.
    pub fn raise_floor_in(
        &self,
        tx: &mut dyn LayoutTx,
        key: CounterKey<'_>,
        floor: u32,
    ) -> LayoutResult<u64> {
        Ok(tx.counter_raise(&key.storage_key(), u64::from(floor))?)
    }

    /// Public identifier of `(batch, array_seq)`, minted on first request.
    ///
    /// Idempotent: an array that already has an identifier gets the same one
    /// back and the category counter does not move.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::CapacityExhausted`] when the category's digit
    /// width is used up and [`LayoutError::Conflict`] if the array is bound to
    /// an identifier of another category.
    #[instrument(skip_all, fields(batch = %batch, array_seq = %array_seq, category = %category))]
    pub fn get_or_create_identifier(
        &self,
        store: &dyn LayoutStore,
        batch: &BatchId,
        array_seq: ArraySeq,
        category: &Category,
    ) -> LayoutResult<PublicIdentifier> {
        let array = ArrayRef::new(batch.clone(), array_seq);
        with_transaction(store, "get_or_create_identifier", |tx| {
            self.identifier_in(tx, &array, category)
        })
    }

    /// [`get_or_create_identifier`](Self::get_or_create_identifier) inside an
    /// open transaction.
    ///
    /// # Errors
    ///
    /// As for `get_or_create_identifier`.
    pub fn identifier_in(
        &self,
        tx: &mut dyn LayoutTx,
        array: &ArrayRef,
        category: &Category,
    ) -> LayoutResult<PublicIdentifier> {
        if let Some(existing) = tx.identifier_for(array)? {
            if &existing.identifier.category != category {
                return Err(LayoutError::Conflict {
                    reason: format!(
                        "{array} is bound to {} not category {category}",
                        existing.identifier
                    ),
                });
            }
            return Ok(existing.identifier);
        }

        let sequence = self.next_in(tx, CounterKey::Identifier(category))?;
        let identifier =
            PublicIdentifier::new(category.clone(), sequence, self.config.identifier_digits)?;
        tx.insert_identifier(&IdentifierRecord {
            identifier: identifier.clone(),
            array: array.clone(),
            created_at: Utc::now(),
        })?;
        info!(%array, %identifier, "identifier minted");
        Ok(identifier)
    }
}

#[cfg(test)]
mod tests {
    use layout_store::MemoryLayoutStore;

    use super::*;

    fn cube() -> Category {
        Category::new("CUBE").unwrap()
    }

    fn allocator(digits: u8) -> SequenceAllocator {
        SequenceAllocator::new(LayoutConfig {
            identifier_digits: digits,
            ..LayoutConfig::default()
        })
    }

    #[test]
    fn next_is_monotonic_per_category() {
        let store = MemoryLayoutStore::default();
        let alloc = allocator(5);
        assert_eq!(alloc.next(&store, &cube()).unwrap(), 1);
        assert_eq!(alloc.next(&store, &cube()).unwrap(), 2);
        assert_eq!(alloc.next(&store, &Category::new("SZ04").unwrap()).unwrap(), 1);
    }

    #[test]
    fn overflow_restores_counter_to_max() {
        let store = MemoryLayoutStore::default();
        let alloc = allocator(1);
        for expected in 1..=9 {
            assert_eq!(alloc.next(&store, &cube()).unwrap(), expected);
        }
        let err = alloc.next(&store, &cube()).unwrap_err();
        assert!(matches!(
            err,
            LayoutError::CapacityExhausted { requested: 1, remaining: 0, .. }
        ));
        let current = with_transaction(&store, "read", |tx| Ok(tx.counter_get("CUBE")?)).unwrap();
        assert_eq!(current, Some(9));
    }

    #[test]
    fn unvalidated_wide_config_does_not_overflow() {
        let store = MemoryLayoutStore::default();
        let alloc = allocator(20);
        assert_eq!(alloc.next(&store, &cube()).unwrap(), 1);
    }

    #[test]
    fn block_overflow_reports_remaining() {
        let store = MemoryLayoutStore::default();
        let alloc = allocator(1);
        with_transaction(&store, "seed", |tx| Ok(tx.counter_set("CUBE", 7)?)).unwrap();
        let err = with_transaction(&store, "block", |tx| {
            alloc.next_block_in(tx, CounterKey::Identifier(&cube()), 3)
        })
        .unwrap_err();
        assert!(matches!(
            err,
            LayoutError::CapacityExhausted { requested: 3, remaining: 2, .. }
        ));
    }

    #[test]
    fn identifier_is_idempotent_per_array() {
        let store = MemoryLayoutStore::default();
        let alloc = allocator(5);
        let batch = BatchId::new("B1").unwrap();
        let first = alloc
            .get_or_create_identifier(&store, &batch, ArraySeq::new(1), &cube())
            .unwrap();
        let again = alloc
            .get_or_create_identifier(&store, &batch, ArraySeq::new(1), &cube())
            .unwrap();
        let second = alloc
            .get_or_create_identifier(&store, &batch, ArraySeq::new(2), &cube())
            .unwrap();
        assert_eq!(first.to_string(), "CUBE00001");
        assert_eq!(again, first);
        assert_eq!(second.to_string(), "CUBE00002");

        let other = alloc.get_or_create_identifier(
            &store,
            &batch,
            ArraySeq::new(1),
            &Category::new("SZ04").unwrap(),
        );
        assert!(matches!(other, Err(LayoutError::Conflict { .. })));
    }

    #[test]
    fn array_and_identifier_counters_are_separate() {
        let store = MemoryLayoutStore::default();
        let alloc = allocator(5);
        let batch = BatchId::new("CUBE").unwrap();
        let seq = with_transaction(&store, "seq", |tx| {
            alloc.next_in(tx, CounterKey::ArraySeq(&batch))
        })
        .unwrap();
        assert_eq!(seq, 1);
        assert_eq!(alloc.next(&store, &cube()).unwrap(), 1);
    }
}
