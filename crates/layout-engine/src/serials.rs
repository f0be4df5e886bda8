//! Serial Lifecycle service: reserve, commit (engrave) and void serials.
//!
//! Serials are handed out above the highest value ever recorded, so a value
//! is never issued twice, voided ones included. Status changes go through a
//! conditional update (`... WHERE status = 'reserved'`) and the number of
//! rows actually changed is checked against the number expected.

use std::collections::BTreeSet;

use layout_core::{
    ArrayRef, LayoutConfig, LayoutError, LayoutResult, Serial, SerialRecord, SerialStatus, Utc,
};
use layout_store::{LayoutStore, LayoutTx};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::txn::with_transaction;

/// Outcome of a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReport {
    /// Serials this call moved from reserved to engraved.
    pub engraved_now: usize,
    /// Serials found already engraved (a concurrent or repeated commit).
    pub already_engraved: usize,
}

impl CommitReport {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.engraved_now + self.already_engraved
    }
}

/// Owner of the serial pool.
#[derive(Debug, Clone)]
pub struct SerialLifecycle {
    config: LayoutConfig,
}

impl SerialLifecycle {
    #[must_use]
    pub const fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    /// Reserve `count` consecutive serials for `array`.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::CapacityExhausted`] if fewer than `count`
    /// serials remain in the pool.
    #[instrument(skip_all, fields(array = %array, count = count))]
    pub fn reserve(
        &self,
        store: &dyn LayoutStore,
        count: usize,
        array: &ArrayRef,
    ) -> LayoutResult<Vec<Serial>> {
        with_transaction(store, "reserve", |tx| self.reserve_in(tx, count, array))
    }

    /// [`reserve`](Self::reserve) inside an open transaction.
    ///
    /// # Errors
    ///
    /// As for `reserve`; [`LayoutError::InvalidInput`] for `count == 0`.
    pub fn reserve_in(
        &self,
        tx: &mut dyn LayoutTx,
        count: usize,
        array: &ArrayRef,
    ) -> LayoutResult<Vec<Serial>> {
        if count == 0 {
            return Err(LayoutError::invalid_input(format!(
                "{array}: cannot reserve zero serials"
            )));
        }
        let next = tx.max_serial()?.map_or(Serial::MIN, |s| s.get() + 1);
        let remaining = u64::from(self.config.serial_max.saturating_sub(next - 1));
        let requested = count as u64;
        if requested > remaining {
            return Err(LayoutError::CapacityExhausted {
                resource: "serial pool".to_string(),
                requested,
                remaining,
            });
        }

        let now = Utc::now();
        let mut reserved = Vec::with_capacity(count);
        for value in (next..).take(count) {
            let serial = Serial::new(value)?;
            tx.insert_serial(&SerialRecord::reserved(serial, array.clone(), now))?;
            reserved.push(serial);
        }
        info!(
            %array,
            first = %reserved[0],
            count,
            "serials reserved"
        );
        Ok(reserved)
    }

    /// Engrave reserved serials.
    ///
    /// Serials already engraved count as a recovered race when every target
    /// ends up engraved; a shortfall is a [`LayoutError::PartialCommit`].
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::NotFound`] for unknown serials,
    /// [`LayoutError::InvalidTransition`] when none of the targets is or can
    /// be engraved, and [`LayoutError::PartialCommit`] when only some are.
    #[instrument(skip_all, fields(count = serials.len()))]
    pub fn commit(
        &self,
        store: &dyn LayoutStore,
        serials: &[Serial],
    ) -> LayoutResult<CommitReport> {
        with_transaction(store, "commit", |tx| self.commit_in(tx, serials))
    }

    /// [`commit`](Self::commit) inside an open transaction.
    ///
    /// # Errors
    ///
    /// As for `commit`.
    pub fn commit_in(
        &self,
        tx: &mut dyn LayoutTx,
        serials: &[Serial],
    ) -> LayoutResult<CommitReport> {
        let targets: BTreeSet<Serial> = serials.iter().copied().collect();
        if targets.is_empty() {
            return Err(LayoutError::invalid_input("no serials to commit"));
        }
        for &serial in &targets {
            load(tx, serial)?;
        }

        let now = Utc::now();
        let mut engraved_now = 0;
        for &serial in &targets {
            if tx.transition_serial(serial, SerialStatus::Reserved, SerialStatus::Engraved, now)? {
                engraved_now += 1;
            }
        }

        let expected = targets.len();
        if engraved_now == expected {
            info!(count = expected, "serials engraved");
            return Ok(CommitReport {
                engraved_now,
                already_engraved: 0,
            });
        }

        let mut unresolved = Vec::new();
        for &serial in &targets {
            let record = load(tx, serial)?;
            if record.status != SerialStatus::Engraved {
                unresolved.push(record);
            }
        }
        let actual = expected - unresolved.len();
        if unresolved.is_empty() {
            warn!(
                expected,
                engraved_now,
                already_engraved = expected - engraved_now,
                "serials already engraved by another commit; proceeding"
            );
            return Ok(CommitReport {
                engraved_now,
                already_engraved: expected - engraved_now,
            });
        }
        if actual == 0 {
            let record = &unresolved[0];
            return Err(LayoutError::invalid_transition(
                format!("serial {}", record.serial),
                record.status,
                SerialStatus::Engraved,
            ));
        }
        warn!(expected, actual, unresolved = unresolved.len(), "partial commit");
        Err(LayoutError::PartialCommit {
            expected,
            actual,
            unresolved: unresolved.into_iter().map(|record| record.serial).collect(),
        })
    }

    /// Void reserved serials. Voided values are kept forever and never
    /// reissued.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::NotFound`] for unknown serials and
    /// [`LayoutError::InvalidTransition`] for any serial not reserved.
    #[instrument(skip_all, fields(count = serials.len()))]
    pub fn void(&self, store: &dyn LayoutStore, serials: &[Serial]) -> LayoutResult<usize> {
        with_transaction(store, "void", |tx| self.void_in(tx, serials))
    }

    /// [`void`](Self::void) inside an open transaction.
    ///
    /// # Errors
    ///
    /// As for `void`.
    pub fn void_in(&self, tx: &mut dyn LayoutTx, serials: &[Serial]) -> LayoutResult<usize> {
        let targets: BTreeSet<Serial> = serials.iter().copied().collect();
        let now = Utc::now();
        for &serial in &targets {
            let record = load(tx, serial)?;
            if !tx.transition_serial(serial, SerialStatus::Reserved, SerialStatus::Voided, now)? {
                return Err(LayoutError::invalid_transition(
                    format!("serial {serial}"),
                    record.status,
                    SerialStatus::Voided,
                ));
            }
        }
        if !targets.is_empty() {
            info!(count = targets.len(), "serials voided");
        }
        Ok(targets.len())
    }

    /// Void whatever is still reserved for `array`; returns how many.
    ///
    /// # Errors
    ///
    /// Returns a store error on failure.
    pub fn void_reserved_for_array_in(
        &self,
        tx: &mut dyn LayoutTx,
        array: &ArrayRef,
    ) -> LayoutResult<usize> {
        let reserved = reserved_for_array(tx, array)?;
        self.void_in(tx, &reserved)
    }

    /// Every serial recorded for `array`, ascending.
    ///
    /// # Errors
    ///
    /// Returns a store error on failure.
    pub fn for_array(
        &self,
        store: &dyn LayoutStore,
        array: &ArrayRef,
    ) -> LayoutResult<Vec<SerialRecord>> {
        with_transaction(store, "serials_for_array", |tx| {
            Ok(tx.serials_for_array(array)?)
        })
    }
}

/// Serials of `array` still in the reserved state.
pub(crate) fn reserved_for_array(
    tx: &mut dyn LayoutTx,
    array: &ArrayRef,
) -> LayoutResult<Vec<Serial>> {
    Ok(tx
        .serials_for_array(array)?
        .into_iter()
        .filter(|record| record.status == SerialStatus::Reserved)
        .map(|record| record.serial)
        .collect())
}

fn load(tx: &mut dyn LayoutTx, serial: Serial) -> LayoutResult<SerialRecord> {
    tx.serial(serial)?
        .ok_or_else(|| LayoutError::not_found(format!("serial {serial}")))
}

#[cfg(test)]
mod tests {
    use layout_core::{ArraySeq, BatchId};
    use layout_store::MemoryLayoutStore;

    use super::*;

    fn array() -> ArrayRef {
        ArrayRef::new(BatchId::new("B1").unwrap(), ArraySeq::new(1))
    }

    fn lifecycle() -> SerialLifecycle {
        SerialLifecycle::new(LayoutConfig::default())
    }

    #[test]
    fn reserves_consecutive_values_and_never_reuses() {
        let store = MemoryLayoutStore::default();
        let life = lifecycle();
        let first = life.reserve(&store, 3, &array()).unwrap();
        assert_eq!(first.iter().map(|s| s.get()).collect::<Vec<_>>(), vec![1, 2, 3]);

        life.void(&store, &first).unwrap();
        let next = life.reserve(&store, 1, &array()).unwrap();
        assert_eq!(next[0].get(), 4);
    }

    #[test]
    fn pool_exhaustion_is_reported() {
        let store = MemoryLayoutStore::default();
        let life = SerialLifecycle::new(LayoutConfig {
            serial_max: 5,
            ..LayoutConfig::default()
        });
        life.reserve(&store, 4, &array()).unwrap();
        let err = life.reserve(&store, 2, &array()).unwrap_err();
        assert!(matches!(
            err,
            LayoutError::CapacityExhausted { requested: 2, remaining: 1, .. }
        ));
        assert_eq!(life.reserve(&store, 1, &array()).unwrap()[0].get(), 5);
    }

    #[test]
    fn double_commit_is_a_clean_no_op() {
        let store = MemoryLayoutStore::default();
        let life = lifecycle();
        let serials = life.reserve(&store, 2, &array()).unwrap();

        let first = life.commit(&store, &serials).unwrap();
        assert_eq!(first, CommitReport { engraved_now: 2, already_engraved: 0 });

        let second = life.commit(&store, &serials).unwrap();
        assert_eq!(second, CommitReport { engraved_now: 0, already_engraved: 2 });

        let records = life.for_array(&store, &array()).unwrap();
        assert!(records.iter().all(|r| r.status == SerialStatus::Engraved));
        assert!(records.iter().all(|r| r.engraved_at.is_some()));
    }

    #[test]
    fn terminal_serials_reject_transitions() {
        let store = MemoryLayoutStore::default();
        let life = lifecycle();
        let serials = life.reserve(&store, 2, &array()).unwrap();
        life.commit(&store, &serials[..1]).unwrap();
        life.void(&store, &serials[1..]).unwrap();

        assert!(matches!(
            life.void(&store, &serials[..1]),
            Err(LayoutError::InvalidTransition { .. })
        ));
        assert!(matches!(
            life.commit(&store, &serials[1..]),
            Err(LayoutError::InvalidTransition { .. })
        ));
        assert!(matches!(
            life.commit(&store, &serials),
            Err(LayoutError::PartialCommit { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn shortfall_is_a_partial_commit_with_counts() {
        let store = MemoryLayoutStore::default();
        let life = lifecycle();
        let serials = life.reserve(&store, 3, &array()).unwrap();
        life.commit(&store, &serials[..1]).unwrap();
        life.void(&store, &serials[2..]).unwrap();

        let err = life.commit(&store, &serials).unwrap_err();
        match err {
            LayoutError::PartialCommit {
                expected,
                actual,
                unresolved,
            } => {
                // serials[1] engraves inside the call; the voided one cannot.
                assert_eq!(expected, 3);
                assert_eq!(actual, 2);
                assert_eq!(unresolved, vec![serials[2]]);
            }
            other => panic!("expected PartialCommit, got {other:?}"),
        }

        // The failed call changes nothing.
        let statuses: Vec<_> = life
            .for_array(&store, &array())
            .unwrap()
            .into_iter()
            .map(|r| r.status)
            .collect();
        assert_eq!(
            statuses,
            vec![SerialStatus::Engraved, SerialStatus::Reserved, SerialStatus::Voided]
        );
    }

    #[test]
    fn unknown_serial_is_not_found() {
        let store = MemoryLayoutStore::default();
        let err = lifecycle()
            .commit(&store, &[Serial::new(99).unwrap()])
            .unwrap_err();
        assert!(matches!(err, LayoutError::NotFound(_)));
    }
}
