//! Document databases
//!
//! A [`DocumentDatabase`] owns a set of named collections backed by one
//! storage medium:
//!
//! - [`JsonFileDocumentDatabase`]: one JSON file, rewritten atomically on
//!   every committed write
//! - [`TransientDocumentDatabase`]: memory only, for tests and ephemeral runs
//!
//! # Example
//!
//! ```ignore
//! use docket_storage::{JsonFileDocumentDatabase, DocumentDatabase, IdentityLoader, Where};
//!
//! let db = JsonFileDocumentDatabase::open("agents.json").await?;
//! let agents = db.get_or_create_collection("agents", Arc::new(IdentityLoader)).await?;
//! let all = agents.find(&Where::all()).await?;
//! db.close().await?;
//! ```

pub mod json_file;
pub(crate) mod shared;
pub mod transient;

pub use json_file::JsonFileDocumentDatabase;
pub use transient::TransientDocumentDatabase;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use docket_core::{Document, Error, Result};

use crate::collection::{DocumentCollection, SharedCollection};
use crate::loader::DocumentLoader;
use shared::SharedState;

/// Reserved collection holding per-store schema metadata
pub const METADATA_COLLECTION: &str = "metadata";

/// Reserved collection holding records a migration dropped
pub const FAILED_MIGRATIONS_COLLECTION: &str = "failed_migrations";

/// One step of an atomic multi-collection rewrite
#[derive(Debug, Clone, PartialEq)]
pub enum Rewrite {
    /// Replace a collection's records wholesale (creating it if needed)
    Replace {
        /// Collection name
        collection: String,
        /// New records, in order
        documents: Vec<Document>,
    },
    /// Append records to a collection (creating it if needed)
    Append {
        /// Collection name
        collection: String,
        /// Records to add
        documents: Vec<Document>,
    },
}

/// A set of collections over one storage medium
#[async_trait]
pub trait DocumentDatabase: Send + Sync {
    /// Create a new collection; `InvalidOperation` if the name is taken
    async fn create_collection(
        &self,
        name: &str,
        loader: Arc<dyn DocumentLoader>,
    ) -> Result<Arc<dyn DocumentCollection>>;

    /// Handle to an existing collection; `NotFound` if absent
    async fn get_collection(
        &self,
        name: &str,
        loader: Arc<dyn DocumentLoader>,
    ) -> Result<Arc<dyn DocumentCollection>>;

    /// Handle to a collection, creating it if absent
    async fn get_or_create_collection(
        &self,
        name: &str,
        loader: Arc<dyn DocumentLoader>,
    ) -> Result<Arc<dyn DocumentCollection>>;

    /// Drop a collection and its records; `NotFound` if absent
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Whether a collection exists
    async fn has_collection(&self, name: &str) -> Result<bool>;

    /// Names of all collections
    async fn collection_names(&self) -> Result<Vec<String>>;

    /// Stored records of a collection without running any loader
    ///
    /// Returns an empty list for a missing collection.
    async fn raw_documents(&self, name: &str) -> Result<Vec<Document>>;

    /// Apply several rewrites as one atomic write
    ///
    /// Every record must carry `id` and `version`; nothing is written if
    /// any record is invalid.
    async fn commit(&self, rewrites: Vec<Rewrite>) -> Result<()>;
}

/// Behaviour common to every backend, parameterized by its shared state
pub(crate) struct DatabaseCore {
    state: Arc<SharedState>,
}

impl DatabaseCore {
    pub(crate) fn new(state: SharedState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    fn handle(&self, name: &str, loader: Arc<dyn DocumentLoader>) -> Arc<dyn DocumentCollection> {
        Arc::new(SharedCollection::new(
            name.to_string(),
            Arc::clone(&self.state),
            loader,
        ))
    }

    pub(crate) async fn create_collection(
        &self,
        name: &str,
        loader: Arc<dyn DocumentLoader>,
    ) -> Result<Arc<dyn DocumentCollection>> {
        let owned = name.to_string();
        self.state
            .mutate(move |collections| {
                if collections.contains_key(&owned) {
                    return Err(Error::InvalidOperation(format!(
                        "collection '{}' already exists",
                        owned
                    )));
                }
                collections.insert(owned, Vec::new());
                Ok(())
            })
            .await?;
        debug!(collection = name, "created collection");
        Ok(self.handle(name, loader))
    }

    pub(crate) async fn get_collection(
        &self,
        name: &str,
        loader: Arc<dyn DocumentLoader>,
    ) -> Result<Arc<dyn DocumentCollection>> {
        if !self.state.contains(name) {
            return Err(Error::not_found_with(name, "Collection does not exist"));
        }
        Ok(self.handle(name, loader))
    }

    pub(crate) async fn get_or_create_collection(
        &self,
        name: &str,
        loader: Arc<dyn DocumentLoader>,
    ) -> Result<Arc<dyn DocumentCollection>> {
        if self.state.contains(name) {
            return Ok(self.handle(name, loader));
        }
        let owned = name.to_string();
        let created = self
            .state
            .mutate(move |collections| {
                // Another caller may have created it while we waited.
                if collections.contains_key(&owned) {
                    return Ok(false);
                }
                collections.insert(owned, Vec::new());
                Ok(true)
            })
            .await?;
        if created {
            debug!(collection = name, "created collection");
        }
        Ok(self.handle(name, loader))
    }

    pub(crate) async fn delete_collection(&self, name: &str) -> Result<()> {
        let owned = name.to_string();
        self.state
            .mutate(move |collections| match collections.remove(&owned) {
                Some(_) => Ok(()),
                None => Err(Error::not_found_with(owned, "Collection does not exist")),
            })
            .await
    }

    pub(crate) fn has_collection(&self, name: &str) -> bool {
        self.state.contains(name)
    }

    pub(crate) fn collection_names(&self) -> Vec<String> {
        self.state.names()
    }

    pub(crate) fn raw_documents(&self, name: &str) -> Result<Vec<Document>> {
        if !self.state.contains(name) {
            return Ok(Vec::new());
        }
        self.state.documents(name)
    }

    pub(crate) async fn commit(&self, rewrites: Vec<Rewrite>) -> Result<()> {
        for rewrite in &rewrites {
            let (Rewrite::Replace { documents, .. } | Rewrite::Append { documents, .. }) = rewrite;
            for document in documents {
                document.validate()?;
            }
        }

        self.state
            .mutate(move |collections| {
                for rewrite in rewrites {
                    match rewrite {
                        Rewrite::Replace {
                            collection,
                            documents,
                        } => {
                            collections.insert(collection, documents);
                        }
                        Rewrite::Append {
                            collection,
                            documents,
                        } => {
                            collections.entry(collection).or_default().extend(documents);
                        }
                    }
                }
                Ok(())
            })
            .await
    }
}

/// Implement [`DocumentDatabase`] by delegating to a `core: DatabaseCore` field
macro_rules! delegate_document_database {
    ($ty:ty) => {
        #[async_trait::async_trait]
        impl $crate::database::DocumentDatabase for $ty {
            async fn create_collection(
                &self,
                name: &str,
                loader: std::sync::Arc<dyn $crate::loader::DocumentLoader>,
            ) -> docket_core::Result<std::sync::Arc<dyn $crate::collection::DocumentCollection>> {
                self.core.create_collection(name, loader).await
            }

            async fn get_collection(
                &self,
                name: &str,
                loader: std::sync::Arc<dyn $crate::loader::DocumentLoader>,
            ) -> docket_core::Result<std::sync::Arc<dyn $crate::collection::DocumentCollection>> {
                self.core.get_collection(name, loader).await
            }

            async fn get_or_create_collection(
                &self,
                name: &str,
                loader: std::sync::Arc<dyn $crate::loader::DocumentLoader>,
            ) -> docket_core::Result<std::sync::Arc<dyn $crate::collection::DocumentCollection>> {
                self.core.get_or_create_collection(name, loader).await
            }

            async fn delete_collection(&self, name: &str) -> docket_core::Result<()> {
                self.core.delete_collection(name).await
            }

            async fn has_collection(&self, name: &str) -> docket_core::Result<bool> {
                Ok(self.core.has_collection(name))
            }

            async fn collection_names(&self) -> docket_core::Result<Vec<String>> {
                Ok(self.core.collection_names())
            }

            async fn raw_documents(
                &self,
                name: &str,
            ) -> docket_core::Result<Vec<docket_core::Document>> {
                self.core.raw_documents(name)
            }

            async fn commit(
                &self,
                rewrites: Vec<$crate::database::Rewrite>,
            ) -> docket_core::Result<()> {
                self.core.commit(rewrites).await
            }
        }
    };
}

pub(crate) use delegate_document_database;
