//! Contract types for persisted records
//!
//! - `version`: semantic schema versions carried by every record
//! - `timestamp`: the UTC clock and the timestamp encoding used on disk

pub mod timestamp;
pub mod version;

pub use timestamp::{format_timestamp, parse_timestamp, utc_now};
pub use version::Version;
