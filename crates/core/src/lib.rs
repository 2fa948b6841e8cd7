//! Core types for Docket
//!
//! This crate defines the foundational types used throughout the system:
//! - Document: the versioned record every collection stores
//! - Version: semantic schema version (`MAJOR.MINOR.PATCH`)
//! - ObjectId / generate_id: opaque unique identifiers
//! - Timestamp helpers: UTC clock and ISO-8601 encoding
//! - Error: error type hierarchy shared by every layer

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod contract;
pub mod document;
pub mod error;
pub mod types;

pub use contract::{format_timestamp, parse_timestamp, utc_now, Version};
pub use document::Document;
pub use error::{Error, Result};
pub use types::{generate_id, ObjectId, TagId, ID_LENGTH};
