//! Schema migration
//!
//! Two pieces cooperate:
//!
//! - [`MigrationChain`] upgrades one record at a time and is installed as a
//!   collection's loader, so legacy records heal lazily on every read.
//! - [`StoreMigrationHelper`] runs once when a store opens. It decides from
//!   the store's metadata record whether the data is current, older, or
//!   newer than the running code, and for older data either refuses or
//!   rewrites every record through the chains in one atomic commit.

pub mod chain;
pub mod helper;

pub use chain::{MigrationChain, MigrationChainBuilder};
pub use helper::{MigrationStatus, StoreMigrationHelper, METADATA_SCHEMA_VERSION};
