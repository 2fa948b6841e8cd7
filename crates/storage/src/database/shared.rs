//! State shared by a database and its collection handles
//!
//! All mutations are serialized by an async write lock. Each mutation is
//! applied to a copy of the committed state, persisted, and only then
//! swapped in, so readers never observe a write that failed to reach the
//! backing medium and a failed write leaves no partial change behind.
//!
//! Persist and swap run on a spawned task that holds the write lock. A
//! caller that stops waiting (a dropped future, a timeout) cannot split
//! them: once the write starts it completes, and on success it becomes
//! visible, even though that caller sees no result.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use docket_core::{Document, Error, Result};

/// Collection name to records, insertion order preserved per collection
pub(crate) type Collections = BTreeMap<String, Vec<Document>>;

/// Backing medium for committed state
#[async_trait]
pub(crate) trait Persistence: Send + Sync {
    /// Encode the full state; `None` means nothing needs writing
    fn encode(&self, collections: &Collections) -> Result<Option<Vec<u8>>>;

    /// Durably write an encoded state
    async fn write(&self, bytes: Vec<u8>) -> Result<()>;
}

/// No backing medium; state lives only in memory
pub(crate) struct InMemory;

#[async_trait]
impl Persistence for InMemory {
    fn encode(&self, _collections: &Collections) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn write(&self, _bytes: Vec<u8>) -> Result<()> {
        Ok(())
    }
}

pub(crate) struct SharedState {
    committed: Arc<Mutex<Collections>>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
    persistence: Arc<dyn Persistence>,
}

impl SharedState {
    pub(crate) fn new(initial: Collections, persistence: Box<dyn Persistence>) -> Self {
        Self {
            committed: Arc::new(Mutex::new(initial)),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
            persistence: Arc::from(persistence),
        }
    }

    /// Snapshot of one collection's stored records
    pub(crate) fn documents(&self, name: &str) -> Result<Vec<Document>> {
        self.committed
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found_with(name, "Collection does not exist"))
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.committed.lock().contains_key(name)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.committed.lock().keys().cloned().collect()
    }

    /// Apply `f` atomically: persisted and visible on `Ok`, discarded on `Err`
    pub(crate) async fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Collections) -> Result<T> + Send,
        T: Send,
    {
        self.mutate_if_changed(move |collections| f(collections).map(|out| (out, true)))
            .await
    }

    /// Like [`mutate`](Self::mutate), but `f` also reports whether it
    /// changed anything; an unchanged state is not persisted
    pub(crate) async fn mutate_if_changed<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Collections) -> Result<(T, bool)> + Send,
        T: Send,
    {
        let write = Arc::clone(&self.write_lock).lock_owned().await;

        let mut next = self.committed.lock().clone();
        let (out, changed) = f(&mut next)?;
        if !changed {
            return Ok(out);
        }

        let Some(bytes) = self.persistence.encode(&next)? else {
            *self.committed.lock() = next;
            return Ok(out);
        };

        let committed = Arc::clone(&self.committed);
        let persistence = Arc::clone(&self.persistence);
        let commit = tokio::spawn(async move {
            let _write = write;
            persistence.write(bytes).await?;
            *committed.lock() = next;
            Ok::<(), Error>(())
        });

        commit
            .await
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        Ok(out)
    }
}
