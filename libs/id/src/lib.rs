//! # relay-id
//!
//! Validated name types for the routing table: application names, backend names, and
//! normalized hostnames.
//!
//! Unlike a system-generated resource ID, these are operator-chosen labels pulled straight out
//! of the store, so validation is charset-and-length rather than a fixed binary layout.

mod error;
mod macros;
mod types;

pub use error::NameError;
pub use types::*;
