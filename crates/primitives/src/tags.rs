//! Tag associations
//!
//! Every typed store keeps entity-to-tag links in a collection of its own,
//! one record per link:
//!
//! ```json
//! { "id": "...", "version": "0.3.0", "creation_utc": "...", "agent_id": "...", "tag_id": "..." }
//! ```
//!
//! `TagAssociations` wraps such a collection. It takes no lock; callers
//! invoke it from inside their own reader or writer scope.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use docket_core::{format_timestamp, generate_id, Document, Result, TagId, Version};
use docket_storage::{DocumentCollection, Where};

/// Entity ids admitted by a `list(tags)` filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagSelection {
    /// No tag filter
    All,
    /// Only entities with no associations; holds the ids that have some
    Untagged(HashSet<String>),
    /// Only entities associated with at least one requested tag
    AnyOf(HashSet<String>),
}

impl TagSelection {
    /// Whether `entity_id` passes
    pub fn admits(&self, entity_id: &str) -> bool {
        match self {
            TagSelection::All => true,
            TagSelection::Untagged(tagged) => !tagged.contains(entity_id),
            TagSelection::AnyOf(matching) => matching.contains(entity_id),
        }
    }

    /// True if no entity can pass
    pub fn is_empty(&self) -> bool {
        matches!(self, TagSelection::AnyOf(ids) if ids.is_empty())
    }
}

/// Entity-to-tag links stored in one collection
pub struct TagAssociations {
    collection: Arc<dyn DocumentCollection>,
    entity_field: &'static str,
    version: Version,
}

impl TagAssociations {
    /// Links in `collection`, keyed by `entity_field`, written at `version`
    pub fn new(
        collection: Arc<dyn DocumentCollection>,
        entity_field: &'static str,
        version: Version,
    ) -> Self {
        Self {
            collection,
            entity_field,
            version,
        }
    }

    /// Tags linked to an entity, in link order
    pub async fn tags_of(&self, entity_id: &str) -> Result<Vec<TagId>> {
        let links = self
            .collection
            .find(&Where::eq(self.entity_field, entity_id))
            .await?;
        Ok(links
            .iter()
            .filter_map(|d| d.get_str("tag_id"))
            .map(TagId::from)
            .collect())
    }

    /// Whether the link exists
    pub async fn contains(&self, entity_id: &str, tag_id: &TagId) -> Result<bool> {
        Ok(self
            .collection
            .find_one(&self.link_filter(entity_id, tag_id))
            .await?
            .is_some())
    }

    /// Insert a link without checking for an existing one
    pub async fn insert(
        &self,
        entity_id: &str,
        tag_id: &TagId,
        creation_utc: &DateTime<Utc>,
    ) -> Result<()> {
        let mut link = Document::with_identity(generate_id(), self.version);
        link.insert("creation_utc", Value::String(format_timestamp(creation_utc)));
        link.insert(self.entity_field, Value::String(entity_id.to_string()));
        link.insert("tag_id", Value::String(tag_id.to_string()));
        self.collection.insert_one(link).await?;
        Ok(())
    }

    /// Insert one link per distinct tag, keeping first-seen order
    ///
    /// Returns the tags actually linked.
    pub async fn insert_all(
        &self,
        entity_id: &str,
        tags: Vec<TagId>,
        creation_utc: &DateTime<Utc>,
    ) -> Result<Vec<TagId>> {
        let mut seen = HashSet::new();
        let distinct: Vec<TagId> = tags.into_iter().filter(|t| seen.insert(t.clone())).collect();
        for tag in &distinct {
            self.insert(entity_id, tag, creation_utc).await?;
        }
        Ok(distinct)
    }

    /// Remove one link; false if it did not exist
    pub async fn remove(&self, entity_id: &str, tag_id: &TagId) -> Result<bool> {
        let result = self
            .collection
            .delete_one(&self.link_filter(entity_id, tag_id))
            .await?;
        Ok(result.deleted_count > 0)
    }

    /// Remove every link of an entity, returning how many were removed
    pub async fn remove_all(&self, entity_id: &str) -> Result<usize> {
        let links = self
            .collection
            .find(&Where::eq(self.entity_field, entity_id))
            .await?;

        let mut removed = 0;
        for link in links {
            let Some(id) = link.id() else { continue };
            removed += self.collection.delete_one(&Where::eq("id", id)).await?.deleted_count;
        }
        Ok(removed)
    }

    /// Resolve a `list(tags)` argument
    ///
    /// - `None`: every entity
    /// - `Some(&[])`: entities with no links at all
    /// - `Some(tags)`: entities linked to at least one of `tags`
    pub async fn select(&self, tags: Option<&[TagId]>) -> Result<TagSelection> {
        let Some(tags) = tags else {
            return Ok(TagSelection::All);
        };

        if tags.is_empty() {
            let tagged = self.entity_ids(&Where::all()).await?;
            return Ok(TagSelection::Untagged(tagged));
        }

        let any_tag = Where::or(
            tags.iter()
                .map(|t| Where::eq("tag_id", t.as_str()))
                .collect(),
        );
        Ok(TagSelection::AnyOf(self.entity_ids(&any_tag).await?))
    }

    async fn entity_ids(&self, filter: &Where) -> Result<HashSet<String>> {
        Ok(self
            .collection
            .find(filter)
            .await?
            .iter()
            .filter_map(|d| d.get_str(self.entity_field))
            .map(str::to_string)
            .collect())
    }

    fn link_filter(&self, entity_id: &str, tag_id: &TagId) -> Where {
        Where::eq(self.entity_field, entity_id).and_eq("tag_id", tag_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_core::utc_now;
    use docket_storage::{DocumentDatabase, IdentityLoader, TransientDocumentDatabase};

    async fn associations() -> TagAssociations {
        let db = TransientDocumentDatabase::new();
        let collection = db
            .create_collection("links", Arc::new(IdentityLoader))
            .await
            .unwrap();
        TagAssociations::new(collection, "entity_id", Version::new(0, 1, 0))
    }

    #[tokio::test]
    async fn test_insert_and_remove() {
        let links = associations().await;
        let tag = TagId::from("t1");

        links.insert("e1", &tag, &utc_now()).await.unwrap();
        assert!(links.contains("e1", &tag).await.unwrap());
        assert_eq!(links.tags_of("e1").await.unwrap(), vec![tag.clone()]);

        assert!(links.remove("e1", &tag).await.unwrap());
        assert!(!links.remove("e1", &tag).await.unwrap());
        assert!(links.tags_of("e1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_select() {
        let links = associations().await;
        links.insert("e1", &TagId::from("a"), &utc_now()).await.unwrap();
        links.insert("e2", &TagId::from("b"), &utc_now()).await.unwrap();

        let all = links.select(None).await.unwrap();
        assert!(all.admits("e1") && all.admits("e3"));

        let untagged = links.select(Some(&[])).await.unwrap();
        assert!(!untagged.admits("e1"));
        assert!(untagged.admits("e3"));

        let any = links.select(Some(&[TagId::from("a")])).await.unwrap();
        assert!(any.admits("e1"));
        assert!(!any.admits("e2"));

        let none = links.select(Some(&[TagId::from("zzz")])).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_insert_all_skips_repeated_tags() {
        let links = associations().await;
        let linked = links
            .insert_all(
                "e1",
                vec![TagId::from("a"), TagId::from("b"), TagId::from("a")],
                &utc_now(),
            )
            .await
            .unwrap();

        assert_eq!(linked, vec![TagId::from("a"), TagId::from("b")]);
        assert!(links.remove("e1", &TagId::from("a")).await.unwrap());
        assert_eq!(links.tags_of("e1").await.unwrap(), vec![TagId::from("b")]);
    }

    #[tokio::test]
    async fn test_remove_all() {
        let links = associations().await;
        links.insert("e1", &TagId::from("a"), &utc_now()).await.unwrap();
        links.insert("e1", &TagId::from("b"), &utc_now()).await.unwrap();
        links.insert("e2", &TagId::from("a"), &utc_now()).await.unwrap();

        assert_eq!(links.remove_all("e1").await.unwrap(), 2);
        assert!(links.tags_of("e1").await.unwrap().is_empty());
        assert_eq!(links.tags_of("e2").await.unwrap().len(), 1);
    }
}
