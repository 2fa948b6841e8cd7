//! Document collections
//!
//! A collection is a named set of versioned records inside a
//! [`DocumentDatabase`](crate::DocumentDatabase). Reads pass every stored
//! record through the collection's loader before filtering; writes operate
//! on the stored representation and never invoke the loader.
//!
//! Ordering is insertion order: `find` returns matches in that order and
//! `find_one`, `update_one` and `delete_one` address the first match.

use async_trait::async_trait;
use std::sync::Arc;

use docket_core::{Document, Error, Result};

use crate::database::shared::SharedState;
use crate::filter::Where;
use crate::loader::DocumentLoader;

/// Outcome of `update_one`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    /// Number of records that matched the filter (0 or 1)
    pub matched_count: usize,
    /// Number of records whose content changed (0 or 1)
    pub modified_count: usize,
    /// The record after the update, or the upserted record
    pub updated_document: Option<Document>,
}

impl UpdateResult {
    /// True if an existing record matched
    pub fn matched(&self) -> bool {
        self.matched_count > 0
    }
}

/// Outcome of `delete_one`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteResult {
    /// Number of records removed (0 or 1)
    pub deleted_count: usize,
    /// The removed record
    pub deleted_document: Option<Document>,
}

/// CRUD and query operations over one collection
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    /// Collection name
    fn name(&self) -> &str;

    /// All loaded records matching `filters`
    async fn find(&self, filters: &Where) -> Result<Vec<Document>>;

    /// First loaded record matching `filters`
    async fn find_one(&self, filters: &Where) -> Result<Option<Document>>;

    /// Insert a record; `DuplicateKey` if its id exists
    async fn insert_one(&self, document: Document) -> Result<Document>;

    /// Apply `params` to the first stored record matching `filters`
    ///
    /// With no match and `upsert`, inserts the filter's equality constraints
    /// merged with `params`.
    async fn update_one(&self, filters: &Where, params: Document, upsert: bool)
        -> Result<UpdateResult>;

    /// Remove the first stored record matching `filters`
    async fn delete_one(&self, filters: &Where) -> Result<DeleteResult>;
}

/// Collection handle over a database's shared state
pub(crate) struct SharedCollection {
    name: String,
    state: Arc<SharedState>,
    loader: Arc<dyn DocumentLoader>,
}

impl SharedCollection {
    pub(crate) fn new(name: String, state: Arc<SharedState>, loader: Arc<dyn DocumentLoader>) -> Self {
        Self {
            name,
            state,
            loader,
        }
    }

    async fn loaded(&self, filters: &Where, limit: Option<usize>) -> Result<Vec<Document>> {
        let stored = self.state.documents(&self.name)?;
        let mut out = Vec::new();

        for document in stored {
            let Some(loaded) = self.loader.load(document).await? else {
                continue;
            };
            if filters.matches(&loaded) {
                out.push(loaded);
                if limit.is_some_and(|n| out.len() >= n) {
                    break;
                }
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl DocumentCollection for SharedCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, filters: &Where) -> Result<Vec<Document>> {
        self.loaded(filters, None).await
    }

    async fn find_one(&self, filters: &Where) -> Result<Option<Document>> {
        Ok(self.loaded(filters, Some(1)).await?.into_iter().next())
    }

    async fn insert_one(&self, document: Document) -> Result<Document> {
        document.validate()?;
        let name = self.name.clone();
        self.state
            .mutate(move |collections| {
                let records = collection_mut(collections, &name)?;
                let id = document.require_id()?;
                if records.iter().any(|d| d.id() == Some(id)) {
                    return Err(Error::DuplicateKey {
                        collection: name.clone(),
                        id: id.to_string(),
                    });
                }
                records.push(document.clone());
                Ok(document)
            })
            .await
    }

    async fn update_one(
        &self,
        filters: &Where,
        params: Document,
        upsert: bool,
    ) -> Result<UpdateResult> {
        let name = self.name.clone();
        let filters = filters.clone();
        self.state
            .mutate_if_changed(move |collections| {
                let records = collection_mut(collections, &name)?;

                if let Some(index) = records.iter().position(|d| filters.matches(d)) {
                    let mut updated = records[index].clone();
                    let modified = updated.merge(&params);
                    updated.validate()?;

                    let id = updated.require_id()?;
                    let collides = records
                        .iter()
                        .enumerate()
                        .any(|(i, d)| i != index && d.id() == Some(id));
                    if collides {
                        return Err(Error::DuplicateKey {
                            collection: name.clone(),
                            id: id.to_string(),
                        });
                    }

                    records[index] = updated.clone();
                    let result = UpdateResult {
                        matched_count: 1,
                        modified_count: usize::from(modified),
                        updated_document: Some(updated),
                    };
                    return Ok((result, modified));
                }

                if !upsert {
                    return Ok((UpdateResult::default(), false));
                }

                let mut inserted = filters.equality_constraints();
                inserted.merge(&params);
                inserted.validate()?;

                let id = inserted.require_id()?;
                if records.iter().any(|d| d.id() == Some(id)) {
                    return Err(Error::DuplicateKey {
                        collection: name.clone(),
                        id: id.to_string(),
                    });
                }

                records.push(inserted.clone());
                let result = UpdateResult {
                    matched_count: 0,
                    modified_count: 0,
                    updated_document: Some(inserted),
                };
                Ok((result, true))
            })
            .await
    }

    async fn delete_one(&self, filters: &Where) -> Result<DeleteResult> {
        let name = self.name.clone();
        let filters = filters.clone();
        self.state
            .mutate_if_changed(move |collections| {
                let records = collection_mut(collections, &name)?;
                match records.iter().position(|d| filters.matches(d)) {
                    Some(index) => {
                        let result = DeleteResult {
                            deleted_count: 1,
                            deleted_document: Some(records.remove(index)),
                        };
                        Ok((result, true))
                    }
                    None => Ok((DeleteResult::default(), false)),
                }
            })
            .await
    }
}

fn collection_mut<'a>(
    collections: &'a mut crate::database::shared::Collections,
    name: &str,
) -> Result<&'a mut Vec<Document>> {
    collections
        .get_mut(name)
        .ok_or_else(|| Error::not_found_with(name, "Collection was deleted"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::shared::{Collections, Persistence};
    use crate::loader::IdentityLoader;
    use docket_core::Version;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDisk {
        writes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Persistence for CountingDisk {
        fn encode(&self, _collections: &Collections) -> Result<Option<Vec<u8>>> {
            Ok(Some(Vec::new()))
        }

        async fn write(&self, _bytes: Vec<u8>) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn agents() -> (SharedCollection, Arc<AtomicUsize>) {
        let writes = Arc::new(AtomicUsize::new(0));
        let mut initial = Collections::new();
        initial.insert("agents".to_string(), Vec::new());
        let state = SharedState::new(
            initial,
            Box::new(CountingDisk {
                writes: Arc::clone(&writes),
            }),
        );
        let collection =
            SharedCollection::new("agents".to_string(), Arc::new(state), Arc::new(IdentityLoader));
        (collection, writes)
    }

    fn agent(id: &str) -> Document {
        Document::with_identity(id, Version::new(0, 1, 0))
    }

    #[tokio::test]
    async fn test_misses_do_not_persist() {
        let (agents, writes) = agents();
        agents.insert_one(agent("a1")).await.unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 1);

        let missed = agents
            .update_one(&Where::eq("id", "ghost"), agent("ghost"), false)
            .await
            .unwrap();
        assert!(!missed.matched());
        let deleted = agents.delete_one(&Where::eq("id", "ghost")).await.unwrap();
        assert_eq!(deleted.deleted_count, 0);
        assert_eq!(writes.load(Ordering::SeqCst), 1);

        agents.delete_one(&Where::eq("id", "a1")).await.unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_identical_update_does_not_persist() {
        let (agents, writes) = agents();
        agents.insert_one(agent("a1")).await.unwrap();

        let same = agents
            .update_one(&Where::eq("id", "a1"), agent("a1"), false)
            .await
            .unwrap();
        assert!(same.matched());
        assert_eq!(same.modified_count, 0);
        assert_eq!(writes.load(Ordering::SeqCst), 1);

        let upserted = agents
            .update_one(&Where::eq("id", "a2"), agent("a2"), true)
            .await
            .unwrap();
        assert!(upserted.updated_document.is_some());
        assert_eq!(writes.load(Ordering::SeqCst), 2);
    }
}
