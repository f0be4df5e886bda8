//! Layout Engine - allocation, sequencing and redistribution.
//!
//! # Overview
//!
//! - **Sequence Allocator**: gap-tolerant, never-reused identifier and array
//!   sequence numbers backed by per-key counters
//! - **Serial Lifecycle**: reserve, engrave and void 20-bit serials
//! - **Batch Sequencer**: accessory-aware ordering and slot packing
//! - **Batch Planner**: places a batch onto arrays, one category per array
//! - **Redistribution Engine**: transactional re-packing of a row at a new
//!   start offset
//! - **Array Workflow**: pending → in progress → done, with serials bound at
//!   start and engraved at completion
//!
//! Every operation runs in one store transaction through
//! [`with_transaction`]; the `*_in` variants compose inside a caller's
//! transaction.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::significant_drop_tightening)]

mod allocator;
mod planner;
mod redistribute;
mod sequencer;
mod serials;
mod txn;
mod workflow;

pub use allocator::{CounterKey, SequenceAllocator};
pub use planner::{BatchPlan, BatchPlanner, BatchRequest, CategoryPlan, DeleteReport};
pub use redistribute::{RedistributionEngine, RedistributionReport};
pub use sequencer::{
    ArrayAssignment, BatchSequencer, UnusableSlots, count_transitions,
    sort_for_minimal_transitions,
};
pub use serials::{CommitReport, SerialLifecycle};
pub use txn::with_transaction;
pub use workflow::{ArrayWorkflow, CompletedArray, StampSheet};
