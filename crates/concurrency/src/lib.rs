//! Concurrency layer for docket
//!
//! This crate provides the lock every typed store uses to keep its
//! collections consistent:
//! - `ReaderWriterLock`: many concurrent readers or one exclusive writer
//! - FIFO fairness so neither readers nor writers starve
//! - Cancellation-safe acquisition
//! - Live counters for instrumented tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod rw_lock;

pub use rw_lock::{LockStats, ReadScope, ReaderWriterLock, WriteScope};
