//! In-memory backend
//!
//! Same semantics as the file backend without durability. State is lost
//! when the database is dropped.

use super::shared::{Collections, InMemory, SharedState};
use super::{delegate_document_database, DatabaseCore};

/// Document database held entirely in memory
pub struct TransientDocumentDatabase {
    core: DatabaseCore,
}

impl TransientDocumentDatabase {
    /// Empty database
    pub fn new() -> Self {
        Self {
            core: DatabaseCore::new(SharedState::new(Collections::new(), Box::new(InMemory))),
        }
    }
}

impl Default for TransientDocumentDatabase {
    fn default() -> Self {
        Self::new()
    }
}

delegate_document_database!(TransientDocumentDatabase);
