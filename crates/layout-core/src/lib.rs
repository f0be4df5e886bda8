//! Layout Core - domain types for the production layout allocator.
//!
//! Items are grouped onto fixed-capacity arrays, each array is stamped with a
//! public identifier, and every item receives a never-reused 20-bit serial
//! that is printed as a 5x5 Micro-ID dot matrix.
//!
//! This crate is pure: no I/O beyond reading a config file. Persistence lives
//! in `layout-store`; allocation and placement live in `layout-engine`.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
mod config;
mod error;
mod identifier;
mod ids;
mod item;
mod lifecycle;
mod serial;

pub use codec::{Decoded, MicroIdGrid, decode, encode, encode_serial};
pub use config::{ConfigError, LayoutConfig, MAX_SLOTS_PER_ARRAY};
pub use error::{LayoutError, LayoutResult, TxStage};
pub use identifier::{IdentifierRecord, MAX_IDENTIFIER_DIGITS, PublicIdentifier, max_sequence};
pub use ids::{ArrayRef, ArraySeq, BatchId, Category, ItemId, RowId, SlotPosition};
pub use item::{
    AccessoryCode, AccessorySignature, Accessorized, ArrayView, Item, NewItem, RowView,
};
pub use lifecycle::{SerialStatus, WorkStatus};
pub use serial::{Serial, SerialRecord};

// Re-export commonly used external types
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
