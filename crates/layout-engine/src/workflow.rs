//! Array workflow: pending → in_progress → done.
//!
//! Starting an array reserves one serial per item and binds the array's
//! public identifier; completing it engraves those serials. Retry and
//! abandon void what was reserved, and voided serials are never reissued.

use layout_core::{
    ArrayRef, ArrayView, LayoutConfig, LayoutError, LayoutResult, PublicIdentifier, Serial,
    SlotPosition, WorkStatus,
};
use layout_store::{LayoutStore, LayoutTx};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::allocator::SequenceAllocator;
use crate::planner::load_array;
use crate::serials::{CommitReport, SerialLifecycle, reserved_for_array};
use crate::txn::with_transaction;

/// What the output stage needs to stamp an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampSheet {
    pub array: ArrayView,
    pub identifier: PublicIdentifier,
    /// One serial per occupied slot, in slot order.
    pub serials: Vec<(SlotPosition, Serial)>,
}

/// Result of [`ArrayWorkflow::complete_array`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedArray {
    pub array: ArrayView,
    pub engraved: Vec<Serial>,
    pub report: CommitReport,
}

/// Drives arrays through their work states.
#[derive(Debug, Clone)]
pub struct ArrayWorkflow {
    config: LayoutConfig,
    allocator: SequenceAllocator,
    serials: SerialLifecycle,
}

impl ArrayWorkflow {
    #[must_use]
    pub fn new(config: LayoutConfig) -> Self {
        Self {
            allocator: SequenceAllocator::new(config.clone()),
            serials: SerialLifecycle::new(config.clone()),
            config,
        }
    }

    /// Begin processing: pending → in_progress, reserve serials, bind the
    /// identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidTransition`] unless the array is
    /// pending, and [`LayoutError::CapacityExhausted`] if the serial pool or
    /// identifier width is used up.
    #[instrument(skip_all, fields(array = %array))]
    pub fn start_array(
        &self,
        store: &dyn LayoutStore,
        array: &ArrayRef,
    ) -> LayoutResult<StampSheet> {
        with_transaction(store, "start_array", |tx| {
            let view = load_array(tx, array)?;
            let next = view.status.transition(WorkStatus::InProgress, array)?;
            let identifier = self.allocator.identifier_in(tx, array, &view.category)?;
            let serials = self.serials.reserve_in(tx, view.items.len(), array)?;
            set_status(tx, &view, next)?;
            info!(%array, %identifier, items = view.items.len(), "array started");
            stamp_sheet(tx, array, identifier, serials)
        })
    }

    /// The stamp sheet of an in-progress array: identifier plus its reserved
    /// serials.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidTransition`] unless the array is in
    /// progress.
    pub fn stamp_sheet(
        &self,
        store: &dyn LayoutStore,
        array: &ArrayRef,
    ) -> LayoutResult<StampSheet> {
        with_transaction(store, "stamp_sheet", |tx| {
            let view = load_array(tx, array)?;
            require_in_progress(&view, "stamped")?;
            let identifier = self.allocator.identifier_in(tx, array, &view.category)?;
            let serials = reserved_for_array(tx, array)?;
            stamp_sheet(tx, array, identifier, serials)
        })
    }

    /// Finish processing: engrave the reserved serials, in_progress → done.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidTransition`] unless the array is in
    /// progress, [`LayoutError::Conflict`] if the reserved serials do not
    /// match the item count, and [`LayoutError::PartialCommit`] if not every
    /// serial could be engraved.
    #[instrument(skip_all, fields(array = %array))]
    pub fn complete_array(
        &self,
        store: &dyn LayoutStore,
        array: &ArrayRef,
    ) -> LayoutResult<CompletedArray> {
        with_transaction(store, "complete_array", |tx| {
            let view = load_array(tx, array)?;
            let next = view.status.transition(WorkStatus::Done, array)?;
            let reserved = reserved_for_array(tx, array)?;
            if reserved.len() != view.items.len() {
                return Err(LayoutError::Conflict {
                    reason: format!(
                        "{array} has {} reserved serials for {} items",
                        reserved.len(),
                        view.items.len()
                    ),
                });
            }
            let report = self.serials.commit_in(tx, &reserved)?;
            set_status(tx, &view, next)?;
            info!(%array, engraved = report.total(), "array completed");
            Ok(CompletedArray {
                array: load_array(tx, array)?,
                engraved: reserved,
                report,
            })
        })
    }

    /// Void the array's reserved serials and reserve a fresh set.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidTransition`] unless the array is in
    /// progress.
    #[instrument(skip_all, fields(array = %array))]
    pub fn retry_array(
        &self,
        store: &dyn LayoutStore,
        array: &ArrayRef,
    ) -> LayoutResult<StampSheet> {
        with_transaction(store, "retry_array", |tx| {
            let view = load_array(tx, array)?;
            require_in_progress(&view, "retried")?;
            let voided = self.serials.void_reserved_for_array_in(tx, array)?;
            let identifier = self.allocator.identifier_in(tx, array, &view.category)?;
            let serials = self.serials.reserve_in(tx, view.items.len(), array)?;
            info!(%array, voided, "array retried");
            stamp_sheet(tx, array, identifier, serials)
        })
    }

    /// Void the array's reserved serials; the array stays in progress.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidTransition`] unless the array is in
    /// progress.
    #[instrument(skip_all, fields(array = %array))]
    pub fn abandon_array(
        &self,
        store: &dyn LayoutStore,
        array: &ArrayRef,
    ) -> LayoutResult<usize> {
        with_transaction(store, "abandon_array", |tx| {
            let view = load_array(tx, array)?;
            require_in_progress(&view, "abandoned")?;
            let voided = self.serials.void_reserved_for_array_in(tx, array)?;
            info!(%array, voided, "array abandoned");
            Ok(voided)
        })
    }

    /// Whether the array is done; polled by the delivery stage.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::NotFound`] for an empty array.
    pub fn is_array_done(
        &self,
        store: &dyn LayoutStore,
        array: &ArrayRef,
    ) -> LayoutResult<bool> {
        with_transaction(store, "is_array_done", |tx| {
            Ok(load_array(tx, array)?.is_done())
        })
    }

    #[must_use]
    pub const fn config(&self) -> &LayoutConfig {
        &self.config
    }
}

fn require_in_progress(view: &ArrayView, action: &str) -> LayoutResult<()> {
    if view.status == WorkStatus::InProgress {
        Ok(())
    } else {
        Err(LayoutError::invalid_transition(&view.array, view.status, action))
    }
}

fn set_status(tx: &mut dyn LayoutTx, view: &ArrayView, status: WorkStatus) -> LayoutResult<()> {
    for item in &view.items {
        if !tx.set_item_status(item.id, status)? {
            return Err(LayoutError::Conflict {
                reason: format!("{}: {} disappeared", view.array, item.id),
            });
        }
    }
    Ok(())
}

fn stamp_sheet(
    tx: &mut dyn LayoutTx,
    array: &ArrayRef,
    identifier: PublicIdentifier,
    serials: Vec<Serial>,
) -> LayoutResult<StampSheet> {
    let view = load_array(tx, array)?;
    if serials.len() != view.items.len() {
        return Err(LayoutError::Conflict {
            reason: format!(
                "{array} has {} reserved serials for {} items",
                serials.len(),
                view.items.len()
            ),
        });
    }
    let serials = view.occupied_slots().into_iter().zip(serials).collect();
    Ok(StampSheet {
        array: view,
        identifier,
        serials,
    })
}
