//! In-memory layout store.
//!
//! A single mutex guards all tables. A transaction holds the guard and works
//! on a copy; commit swaps the copy in, anything else drops it. Unique
//! constraints mirror the SQLite schema.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use layout_core::{
    ArrayRef, ArraySeq, BatchId, Category, IdentifierRecord, Item, ItemId, RowId, Serial,
    SerialRecord, SerialStatus, SlotPosition, WorkStatus,
};
use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

use crate::error::StoreError;
use crate::store::{LayoutStore, LayoutTx, check_serial_edge};

/// Configuration for the in-memory store.
#[derive(Debug, Clone)]
pub struct MemoryLayoutStoreConfig {
    /// How long `begin` waits for the write lock before reporting `Busy`.
    pub lock_timeout: Duration,
}

impl Default for MemoryLayoutStoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Failures to inject into the next transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    pub fail_commit: bool,
    pub fail_rollback: bool,
    /// Fail the n-th `move_item` call (zero-based).
    pub fail_move_at: Option<usize>,
}

type SlotKey = (BatchId, ArraySeq, SlotPosition);

#[derive(Debug, Clone, Default)]
struct Tables {
    counters: BTreeMap<String, u64>,
    identifiers: BTreeMap<ArrayRef, IdentifierRecord>,
    identifier_codes: BTreeSet<(Category, u32)>,
    serials: BTreeMap<Serial, SerialRecord>,
    items: HashMap<ItemId, Item>,
    slots: HashMap<SlotKey, ItemId>,
}

impl Tables {
    fn sorted_items(&self, mut keep: impl FnMut(&Item) -> bool) -> Vec<Item> {
        let mut items: Vec<Item> = self.items.values().filter(|i| keep(i)).cloned().collect();
        items.sort_by_key(|item| (item.array_seq, item.slot));
        items
    }
}

fn slot_key(item: &Item) -> SlotKey {
    (item.batch.clone(), item.array_seq, item.slot)
}

/// In-memory [`LayoutStore`] for tests and single-process use.
pub struct MemoryLayoutStore {
    tables: Mutex<Tables>,
    faults: Mutex<FaultPlan>,
    config: MemoryLayoutStoreConfig,
}

impl MemoryLayoutStore {
    #[must_use]
    pub fn new(config: MemoryLayoutStoreConfig) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            faults: Mutex::new(FaultPlan::default()),
            config,
        }
    }

    /// Arm failures for the next transaction only.
    pub fn inject_faults(&self, plan: FaultPlan) {
        *self.faults.lock() = plan;
    }
}

impl Default for MemoryLayoutStore {
    fn default() -> Self {
        Self::new(MemoryLayoutStoreConfig::default())
    }
}

impl LayoutStore for MemoryLayoutStore {
    fn begin(&self) -> Result<Box<dyn LayoutTx + '_>, StoreError> {
        let guard = self
            .tables
            .try_lock_for(self.config.lock_timeout)
            .ok_or_else(|| {
                StoreError::Busy(format!(
                    "write lock not acquired within {:?}",
                    self.config.lock_timeout
                ))
            })?;
        let faults = std::mem::take(&mut *self.faults.lock());
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            faults,
            moves: 0,
            finished: false,
        }))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

struct MemoryTx<'a> {
    guard: MutexGuard<'a, Tables>,
    working: Tables,
    faults: FaultPlan,
    moves: usize,
    finished: bool,
}

impl MemoryTx<'_> {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            Err(StoreError::Finished)
        } else {
            Ok(())
        }
    }
}

impl LayoutTx for MemoryTx<'_> {
    fn counter_add(&mut self, key: &str, delta: u64) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let current = self.working.counters.entry(key.to_string()).or_insert(0);
        *current = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::Backend(format!("counter {key} overflows u64")))?;
        Ok(*current)
    }

    fn counter_raise(&mut self, key: &str, floor: u64) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let current = self.working.counters.entry(key.to_string()).or_insert(floor);
        *current = (*current).max(floor);
        Ok(*current)
    }

    fn counter_set(&mut self, key: &str, value: u64) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.working.counters.insert(key.to_string(), value);
        Ok(())
    }

    fn counter_get(&mut self, key: &str) -> Result<Option<u64>, StoreError> {
        self.ensure_open()?;
        Ok(self.working.counters.get(key).copied())
    }

    fn identifier_for(
        &mut self,
        array: &ArrayRef,
    ) -> Result<Option<IdentifierRecord>, StoreError> {
        self.ensure_open()?;
        Ok(self.working.identifiers.get(array).cloned())
    }

    fn insert_identifier(&mut self, record: &IdentifierRecord) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.working.identifiers.contains_key(&record.array) {
            return Err(StoreError::UniqueViolation {
                constraint: "identifiers_array",
                key: record.array.to_string(),
            });
        }
        let code = (
            record.identifier.category.clone(),
            record.identifier.sequence,
        );
        if !self.working.identifier_codes.insert(code) {
            return Err(StoreError::UniqueViolation {
                constraint: "identifiers_code",
                key: record.identifier.to_string(),
            });
        }
        self.working
            .identifiers
            .insert(record.array.clone(), record.clone());
        Ok(())
    }

    fn max_serial(&mut self) -> Result<Option<Serial>, StoreError> {
        self.ensure_open()?;
        Ok(self.working.serials.keys().next_back().copied())
    }

    fn insert_serial(&mut self, record: &SerialRecord) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.working.serials.contains_key(&record.serial) {
            return Err(StoreError::UniqueViolation {
                constraint: "serials_value",
                key: record.serial.to_string(),
            });
        }
        self.working.serials.insert(record.serial, record.clone());
        Ok(())
    }

    fn serial(&mut self, serial: Serial) -> Result<Option<SerialRecord>, StoreError> {
        self.ensure_open()?;
        Ok(self.working.serials.get(&serial).cloned())
    }

    fn serials_for_array(&mut self, array: &ArrayRef) -> Result<Vec<SerialRecord>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .working
            .serials
            .values()
            .filter(|record| &record.array == array)
            .cloned()
            .collect())
    }

    fn transition_serial(
        &mut self,
        serial: Serial,
        from: SerialStatus,
        to: SerialStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.ensure_open()?;
        check_serial_edge(serial, from, to)?;
        match self.working.serials.get_mut(&serial) {
            Some(record) if record.status == from => {
                record
                    .apply(to, at)
                    .map_err(|e| StoreError::IllegalUpdate(e.to_string()))?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn insert_item(&mut self, item: &Item) -> Result<(), StoreError> {
        self.ensure_open()?;
        let key = slot_key(item);
        if self.working.slots.contains_key(&key) {
            return Err(StoreError::UniqueViolation {
                constraint: "items_slot",
                key: format!("{}/{}", item.array_ref(), item.slot),
            });
        }
        if self.working.items.contains_key(&item.id) {
            return Err(StoreError::UniqueViolation {
                constraint: "items_id",
                key: item.id.to_string(),
            });
        }
        self.working.slots.insert(key, item.id);
        self.working.items.insert(item.id, item.clone());
        Ok(())
    }

    fn lock_row(&mut self, row: RowId) -> Result<Vec<Item>, StoreError> {
        self.ensure_open()?;
        Ok(self.working.sorted_items(|item| item.row == row))
    }

    fn items_for_array(&mut self, array: &ArrayRef) -> Result<Vec<Item>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .working
            .sorted_items(|item| item.batch == array.batch && item.array_seq == array.seq))
    }

    fn items_for_batch(&mut self, batch: &BatchId) -> Result<Vec<Item>, StoreError> {
        self.ensure_open()?;
        Ok(self.working.sorted_items(|item| &item.batch == batch))
    }

    fn max_array_seq(&mut self, batch: &BatchId) -> Result<Option<ArraySeq>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .working
            .items
            .values()
            .filter(|item| &item.batch == batch)
            .map(|item| item.array_seq)
            .max())
    }

    fn move_item(
        &mut self,
        id: ItemId,
        array_seq: ArraySeq,
        slot: SlotPosition,
    ) -> Result<bool, StoreError> {
        self.ensure_open()?;
        let attempt = self.moves;
        self.moves += 1;
        if self.faults.fail_move_at == Some(attempt) {
            return Err(StoreError::Backend(format!(
                "injected failure on move {attempt}"
            )));
        }

        let Some(item) = self.working.items.get(&id) else {
            return Ok(false);
        };
        let old_key = slot_key(item);
        let new_key = (item.batch.clone(), array_seq, slot);
        if new_key == old_key {
            return Ok(true);
        }
        if self.working.slots.contains_key(&new_key) {
            return Err(StoreError::UniqueViolation {
                constraint: "items_slot",
                key: format!("{}/{slot}", ArrayRef::new(item.batch.clone(), array_seq)),
            });
        }
        self.working.slots.remove(&old_key);
        self.working.slots.insert(new_key, id);
        if let Some(item) = self.working.items.get_mut(&id) {
            item.array_seq = array_seq;
            item.slot = slot;
        }
        Ok(true)
    }

    fn set_item_status(&mut self, id: ItemId, status: WorkStatus) -> Result<bool, StoreError> {
        self.ensure_open()?;
        let Some(item) = self.working.items.get_mut(&id) else {
            return Ok(false);
        };
        item.status = status;
        Ok(true)
    }

    fn delete_batch_items(&mut self, batch: &BatchId) -> Result<usize, StoreError> {
        self.ensure_open()?;
        let before = self.working.items.len();
        self.working.items.retain(|_, item| &item.batch != batch);
        self.working.slots.retain(|(b, _, _), _| b != batch);
        Ok(before - self.working.items.len())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.faults.fail_commit {
            self.faults.fail_commit = false;
            return Err(StoreError::Backend("injected commit failure".into()));
        }
        *self.guard = std::mem::take(&mut self.working);
        self.finished = true;
        trace!("memory transaction committed");
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.faults.fail_rollback {
            self.faults.fail_rollback = false;
            return Err(StoreError::Backend("injected rollback failure".into()));
        }
        self.working = Tables::default();
        self.finished = true;
        trace!("memory transaction rolled back");
        Ok(())
    }
}
