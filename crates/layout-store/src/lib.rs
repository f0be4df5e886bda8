//! Layout Store - transactional persistence for counters, identifiers,
//! serials and placed items.
//!
//! Two backends implement [`LayoutStore`]:
//! - [`MemoryLayoutStore`]: mutex-guarded tables with fault injection, used in
//!   tests and single-process tools.
//! - [`SqliteLayoutStore`]: a SQLite file shared by any number of processes.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod memory;
mod sqlite;
mod store;

pub use error::StoreError;
pub use memory::{FaultPlan, MemoryLayoutStore, MemoryLayoutStoreConfig};
pub use sqlite::{SqliteLayoutStore, SqliteLayoutStoreConfig};
pub use store::{LayoutStore, LayoutTx};
