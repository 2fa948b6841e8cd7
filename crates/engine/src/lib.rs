//! Schema engine for docket
//!
//! This crate owns everything that happens between opening a database and
//! handing collections to a typed store:
//! - `MigrationChain`: per-collection version-to-converter mapping, used as
//!   the collection's read loader
//! - `StoreMigrationHelper`: compares a store's stored schema version with
//!   the running code and migrates, refuses, or stamps accordingly
//! - `DocketConfig`: the `docket.toml` configuration file

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod migration;

pub use config::{Backend, DocketConfig, CONFIG_FILE_NAME};
pub use migration::{
    MigrationChain, MigrationChainBuilder, MigrationStatus, StoreMigrationHelper,
    METADATA_SCHEMA_VERSION,
};
