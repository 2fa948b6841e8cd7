//! Reader-writer lock for typed stores
//!
//! Reader scope admits any number of concurrent holders and is excluded
//! only by an active writer. Writer scope is exclusive.
//!
//! # Fairness
//!
//! Waiters are granted in arrival order. A reader that arrives while a
//! writer is queued waits behind that writer, so a steady stream of readers
//! cannot starve writers, and queued readers are admitted together as soon
//! as the writer ahead of them releases.
//!
//! # Cancellation
//!
//! Acquisition is all-or-nothing. Dropping a `reader()` / `writer()` future
//! before it resolves leaves the lock exactly as it was.
//!
//! # Scope
//!
//! Acquisition is not reentrant: a task holding the writer scope must not
//! acquire either scope again. Stores call unlocked internal helpers from
//! inside a critical section instead.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

/// Snapshot of a lock's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    /// Readers currently inside a reader scope
    pub active_readers: usize,
    /// Whether a writer is inside the writer scope
    pub writer_active: bool,
    /// Writers waiting to acquire
    pub queued_writers: usize,
    /// Reader scopes granted since creation
    pub reads_granted: u64,
    /// Writer scopes granted since creation
    pub writes_granted: u64,
}

#[derive(Debug, Default)]
struct Counters {
    active_readers: AtomicUsize,
    writer_active: AtomicBool,
    queued_writers: AtomicUsize,
    reads_granted: AtomicU64,
    writes_granted: AtomicU64,
}

/// Many readers or one writer, granted in FIFO order
#[derive(Debug)]
pub struct ReaderWriterLock {
    name: String,
    inner: RwLock<()>,
    counters: Counters,
}

impl ReaderWriterLock {
    /// New unlocked lock; `name` labels trace events
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(()),
            counters: Counters::default(),
        }
    }

    /// Label given at construction
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enter the reader scope, waiting for any active or queued writer
    pub async fn reader(&self) -> ReadScope<'_> {
        let guard = self.inner.read().await;
        self.counters.active_readers.fetch_add(1, Ordering::SeqCst);
        self.counters.reads_granted.fetch_add(1, Ordering::Relaxed);
        trace!(lock = %self.name, "reader scope entered");
        ReadScope {
            _guard: guard,
            counters: &self.counters,
        }
    }

    /// Enter the writer scope, waiting for every earlier holder to leave
    pub async fn writer(&self) -> WriteScope<'_> {
        let queued = QueuedWriter::enter(&self.counters);
        let guard = self.inner.write().await;
        drop(queued);

        self.counters.writer_active.store(true, Ordering::SeqCst);
        self.counters.writes_granted.fetch_add(1, Ordering::Relaxed);
        trace!(lock = %self.name, "writer scope entered");
        WriteScope {
            _guard: guard,
            counters: &self.counters,
        }
    }

    /// Current counters
    pub fn stats(&self) -> LockStats {
        LockStats {
            active_readers: self.counters.active_readers.load(Ordering::SeqCst),
            writer_active: self.counters.writer_active.load(Ordering::SeqCst),
            queued_writers: self.counters.queued_writers.load(Ordering::SeqCst),
            reads_granted: self.counters.reads_granted.load(Ordering::Relaxed),
            writes_granted: self.counters.writes_granted.load(Ordering::Relaxed),
        }
    }

    /// Readers currently inside a reader scope
    pub fn active_readers(&self) -> usize {
        self.counters.active_readers.load(Ordering::SeqCst)
    }

    /// Whether a writer is inside the writer scope
    pub fn writer_active(&self) -> bool {
        self.counters.writer_active.load(Ordering::SeqCst)
    }
}

// Counts a writer from the start of its wait until it acquires or its
// future is dropped.
struct QueuedWriter<'a> {
    counters: &'a Counters,
}

impl<'a> QueuedWriter<'a> {
    fn enter(counters: &'a Counters) -> Self {
        counters.queued_writers.fetch_add(1, Ordering::SeqCst);
        Self { counters }
    }
}

impl Drop for QueuedWriter<'_> {
    fn drop(&mut self) {
        self.counters.queued_writers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Held reader scope; released on drop
#[must_use = "the reader scope ends as soon as this guard is dropped"]
pub struct ReadScope<'a> {
    _guard: RwLockReadGuard<'a, ()>,
    counters: &'a Counters,
}

impl Drop for ReadScope<'_> {
    fn drop(&mut self) {
        self.counters.active_readers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Held writer scope; released on drop
#[must_use = "the writer scope ends as soon as this guard is dropped"]
pub struct WriteScope<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
    counters: &'a Counters,
}

impl Drop for WriteScope<'_> {
    fn drop(&mut self) {
        self.counters.writer_active.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters_track_scopes() {
        let lock = ReaderWriterLock::new("test");

        {
            let _a = lock.reader().await;
            let _b = lock.reader().await;
            assert_eq!(lock.active_readers(), 2);
            assert!(!lock.writer_active());
        }
        assert_eq!(lock.active_readers(), 0);

        {
            let _w = lock.writer().await;
            assert!(lock.writer_active());
            assert_eq!(lock.active_readers(), 0);
        }

        let stats = lock.stats();
        assert!(!stats.writer_active);
        assert_eq!(stats.reads_granted, 2);
        assert_eq!(stats.writes_granted, 1);
        assert_eq!(stats.queued_writers, 0);
    }

    #[tokio::test]
    async fn test_sequential_writers() {
        let lock = ReaderWriterLock::new("test");
        for _ in 0..3 {
            let _w = lock.writer().await;
        }
        assert_eq!(lock.stats().writes_granted, 3);
    }
}
