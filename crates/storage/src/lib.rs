//! Document storage for docket
//!
//! This crate implements the schemaless document layer every typed store
//! sits on:
//! - `DocumentDatabase`: named collections over one storage medium
//! - `DocumentCollection`: find / insert / update / delete by filter
//! - `Where`: equality and inequality filters with `$and` / `$or`
//! - `DocumentLoader`: per-record normalization on reads
//!
//! # Backends
//!
//! - `JsonFileDocumentDatabase`: one JSON file, atomic rewrite per write
//! - `TransientDocumentDatabase`: in memory only
//!
//! Both backends make each write atomic and all-or-nothing. A write that
//! fails to persist leaves the visible state unchanged.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collection;
pub mod database;
pub mod filter;
pub mod loader;

pub use collection::{DeleteResult, DocumentCollection, UpdateResult};
pub use database::{
    DocumentDatabase, JsonFileDocumentDatabase, Rewrite, TransientDocumentDatabase,
    FAILED_MIGRATIONS_COLLECTION, METADATA_COLLECTION,
};
pub use filter::{Condition, Where};
pub use loader::{loader_fn, DocumentLoader, ExactVersionLoader, FnLoader, IdentityLoader};
