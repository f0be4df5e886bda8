//! Store interface for the layout tables.
//!
//! Every read and write happens inside a [`LayoutTx`]. A transaction holds the
//! store's write lock from [`LayoutStore::begin`] until it is committed or
//! rolled back, so reads made through it are locked reads: no other writer
//! can change the rows between the read and the transaction's own writes.

use chrono::{DateTime, Utc};
use layout_core::{
    ArrayRef, ArraySeq, BatchId, IdentifierRecord, Item, ItemId, RowId, Serial, SerialRecord,
    SerialStatus, SlotPosition, WorkStatus,
};

use crate::error::StoreError;

/// A transactional layout store (NORMATIVE).
pub trait LayoutStore: Send + Sync {
    /// Open a write transaction.
    ///
    /// # Errors
    /// Returns `Busy` if the write lock could not be acquired in time.
    fn begin(&self) -> Result<Box<dyn LayoutTx + '_>, StoreError>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// One open transaction.
///
/// Dropping an unfinished transaction rolls it back. After a failed
/// [`commit`](LayoutTx::commit) the transaction stays open and
/// [`rollback`](LayoutTx::rollback) may still be called.
pub trait LayoutTx {
    // ── Counters ────────────────────────────────────────────────────────────

    /// Add `delta` to a counter, creating it at `delta` when absent, and
    /// return the new value. A single statement; there is no read-then-write
    /// window.
    ///
    /// # Errors
    /// Returns a backend error on failure.
    fn counter_add(&mut self, key: &str, delta: u64) -> Result<u64, StoreError>;

    /// Raise a counter to at least `floor` and return its value.
    ///
    /// # Errors
    /// Returns a backend error on failure.
    fn counter_raise(&mut self, key: &str, floor: u64) -> Result<u64, StoreError>;

    /// Overwrite a counter.
    ///
    /// # Errors
    /// Returns a backend error on failure.
    fn counter_set(&mut self, key: &str, value: u64) -> Result<(), StoreError>;

    /// Current counter value, `None` if never touched.
    ///
    /// # Errors
    /// Returns a backend error on failure.
    fn counter_get(&mut self, key: &str) -> Result<Option<u64>, StoreError>;

    // ── Identifiers ─────────────────────────────────────────────────────────

    /// Identifier bound to `array`, if any.
    ///
    /// # Errors
    /// Returns a backend error on failure.
    fn identifier_for(&mut self, array: &ArrayRef)
    -> Result<Option<IdentifierRecord>, StoreError>;

    /// Bind an identifier.
    ///
    /// # Errors
    /// Returns `UniqueViolation` if the array already has an identifier or the
    /// `(category, sequence)` pair is taken.
    fn insert_identifier(&mut self, record: &IdentifierRecord) -> Result<(), StoreError>;

    // ── Serials ─────────────────────────────────────────────────────────────

    /// Highest serial ever recorded, in any status.
    ///
    /// # Errors
    /// Returns a backend error on failure.
    fn max_serial(&mut self) -> Result<Option<Serial>, StoreError>;

    /// Record a new serial.
    ///
    /// # Errors
    /// Returns `UniqueViolation` if the value was ever recorded before.
    fn insert_serial(&mut self, record: &SerialRecord) -> Result<(), StoreError>;

    /// Look up one serial.
    ///
    /// # Errors
    /// Returns a backend error on failure.
    fn serial(&mut self, serial: Serial) -> Result<Option<SerialRecord>, StoreError>;

    /// Serials recorded against `array`, ascending.
    ///
    /// # Errors
    /// Returns a backend error on failure.
    fn serials_for_array(&mut self, array: &ArrayRef) -> Result<Vec<SerialRecord>, StoreError>;

    /// Conditional status update: applies only while the serial is still in
    /// `from`. Returns whether a row changed.
    ///
    /// # Errors
    /// Returns `IllegalUpdate` if `from -> to` is not a lifecycle edge.
    fn transition_serial(
        &mut self,
        serial: Serial,
        from: SerialStatus,
        to: SerialStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    // ── Items ───────────────────────────────────────────────────────────────

    /// Insert a placed item.
    ///
    /// # Errors
    /// Returns `UniqueViolation` if its `(batch, array_seq, slot)` is taken.
    fn insert_item(&mut self, item: &Item) -> Result<(), StoreError>;

    /// All items of a row, ordered by `(array_seq, slot)`.
    ///
    /// # Errors
    /// Returns a backend error on failure.
    fn lock_row(&mut self, row: RowId) -> Result<Vec<Item>, StoreError>;

    /// Items of one array, ordered by slot.
    ///
    /// # Errors
    /// Returns a backend error on failure.
    fn items_for_array(&mut self, array: &ArrayRef) -> Result<Vec<Item>, StoreError>;

    /// Items of one batch, ordered by `(array_seq, slot)`.
    ///
    /// # Errors
    /// Returns a backend error on failure.
    fn items_for_batch(&mut self, batch: &BatchId) -> Result<Vec<Item>, StoreError>;

    /// Highest array sequence number currently occupied in `batch`.
    ///
    /// # Errors
    /// Returns a backend error on failure.
    fn max_array_seq(&mut self, batch: &BatchId) -> Result<Option<ArraySeq>, StoreError>;

    /// Move an item to `(array_seq, slot)` within its batch. Returns whether
    /// the item existed.
    ///
    /// # Errors
    /// Returns `UniqueViolation` if the target position is occupied.
    fn move_item(
        &mut self,
        item: ItemId,
        array_seq: ArraySeq,
        slot: SlotPosition,
    ) -> Result<bool, StoreError>;

    /// Set an item's work status. Returns whether the item existed.
    ///
    /// # Errors
    /// Returns a backend error on failure.
    fn set_item_status(&mut self, item: ItemId, status: WorkStatus) -> Result<bool, StoreError>;

    /// Delete every item of `batch`, returning how many were removed.
    ///
    /// # Errors
    /// Returns a backend error on failure.
    fn delete_batch_items(&mut self, batch: &BatchId) -> Result<usize, StoreError>;

    // ── Completion ──────────────────────────────────────────────────────────

    /// Make every write visible atomically.
    ///
    /// # Errors
    /// Returns `Finished` if already committed or rolled back, or the
    /// backend's failure; the transaction is then still open.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Discard every write.
    ///
    /// # Errors
    /// Returns `Finished` if already committed or rolled back, or the
    /// backend's failure.
    fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Checks a serial update against the lifecycle table.
pub(crate) fn check_serial_edge(
    serial: Serial,
    from: SerialStatus,
    to: SerialStatus,
) -> Result<(), StoreError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::IllegalUpdate(format!(
            "serial {serial}: {from} -> {to}"
        )))
    }
}
