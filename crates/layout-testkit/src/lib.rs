//! Layout Test Kit - shared test tracing and fixtures.
//!
//! ```rust,ignore
//! use layout_testkit::{fixtures, init_test_tracing};
//!
//! #[test]
//! fn plans_a_batch() {
//!     init_test_tracing();
//!     let items = fixtures::plain_items("CUBE", 10);
//!     // ...
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod fixtures;
mod tracing_config;

pub use tracing_config::*;
