//! GuidelineStore: condition/action guidelines and their tags
//!
//! Guidelines live in `guidelines`, tag links in
//! `guideline_tag_associations`. Locking follows the other stores: reader
//! scope for reads, writer scope for every mutation end to end.
//!
//! ## Schema history
//!
//! | From | To | Change |
//! |---|---|---|
//! | 0.1.0 | 0.2.0 | add `enabled = true` |
//! | 0.2.0 | 0.3.0 | offline step (drops guideline sets) |
//! | 0.3.0 | 0.4.0 | add `metadata = {}` |
//!
//! Tag links written at 0.3.0 are restamped 0.4.0 on read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use docket_concurrency::ReaderWriterLock;
use docket_core::{
    format_timestamp, generate_id, id_type, parse_timestamp, utc_now, Document, Error, Result,
    TagId, Version,
};
use docket_engine::{MigrationChain, StoreMigrationHelper};
use docket_storage::{loader_fn, DocumentCollection, DocumentDatabase, DocumentLoader, Where};

use crate::tags::TagAssociations;

id_type!(
    /// Identifier of a guideline
    GuidelineId
);

/// Store name used for schema metadata
pub const GUIDELINE_STORE: &str = "guidelines";
/// Primary collection
pub const GUIDELINES_COLLECTION: &str = "guidelines";
/// Tag link collection
pub const GUIDELINE_TAGS_COLLECTION: &str = "guideline_tag_associations";

/// When `condition` holds, do `action`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuidelineContent {
    /// Trigger
    pub condition: String,
    /// Response
    pub action: String,
}

impl GuidelineContent {
    /// Content from its two halves
    pub fn new(condition: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            action: action.into(),
        }
    }
}

/// A guideline
#[derive(Debug, Clone, PartialEq)]
pub struct Guideline {
    /// Id
    pub id: GuidelineId,
    /// Creation time
    pub creation_utc: DateTime<Utc>,
    /// Condition and action
    pub content: GuidelineContent,
    /// Disabled guidelines are kept but not applied
    pub enabled: bool,
    /// Linked tags
    pub tags: Vec<TagId>,
    /// Free-form JSON metadata
    pub metadata: Map<String, Value>,
}

impl fmt::Display for Guideline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "When {}, then {}",
            self.content.condition, self.content.action
        )
    }
}

/// Arguments to [`GuidelineStore::create_guideline`]
#[derive(Debug, Clone)]
pub struct GuidelineCreateParams {
    /// Condition and action
    pub content: GuidelineContent,
    /// Initial metadata
    pub metadata: Map<String, Value>,
    /// Creation time; now if absent
    pub creation_utc: Option<DateTime<Utc>>,
    /// Defaults to true
    pub enabled: bool,
    /// Tags to link
    pub tags: Vec<TagId>,
}

impl GuidelineCreateParams {
    /// Enabled guideline with no metadata or tags
    pub fn new(condition: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            content: GuidelineContent::new(condition, action),
            metadata: Map::new(),
            creation_utc: None,
            enabled: true,
            tags: Vec::new(),
        }
    }
}

/// Partial update; only `Some` fields change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuidelineUpdateParams {
    /// New condition
    pub condition: Option<String>,
    /// New action
    pub action: Option<String>,
    /// New enabled flag
    pub enabled: Option<bool>,
    /// Replacement metadata
    pub metadata: Option<Map<String, Value>>,
}

/// CRUD over guidelines
#[async_trait]
pub trait GuidelineStore: Send + Sync {
    /// Create a guideline and link its tags
    async fn create_guideline(&self, params: GuidelineCreateParams) -> Result<Guideline>;

    /// Guidelines passing the tag filter (see [`TagAssociations::select`])
    async fn list_guidelines(&self, tags: Option<&[TagId]>) -> Result<Vec<Guideline>>;

    /// One guideline; `NotFound` if absent
    async fn read_guideline(&self, guideline_id: &GuidelineId) -> Result<Guideline>;

    /// Delete a guideline and every tag link; `NotFound` if absent
    async fn delete_guideline(&self, guideline_id: &GuidelineId) -> Result<()>;

    /// Apply a partial update; `NotFound` if absent
    async fn update_guideline(
        &self,
        guideline_id: &GuidelineId,
        params: GuidelineUpdateParams,
    ) -> Result<Guideline>;

    /// First guideline with exactly this content; `NotFound` if none
    async fn find_guideline(&self, content: &GuidelineContent) -> Result<Guideline>;

    /// Link a tag; false (and no write) if already linked
    async fn upsert_tag(
        &self,
        guideline_id: &GuidelineId,
        tag_id: &TagId,
        creation_utc: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    /// Unlink a tag; `NotFound` if the link does not exist
    async fn remove_tag(&self, guideline_id: &GuidelineId, tag_id: &TagId) -> Result<()>;

    /// Merge keys into the metadata
    async fn add_metadata(
        &self,
        guideline_id: &GuidelineId,
        metadata: Map<String, Value>,
    ) -> Result<Guideline>;

    /// Drop keys from the metadata; absent keys are ignored
    async fn remove_metadata(&self, guideline_id: &GuidelineId, keys: &[&str])
        -> Result<Guideline>;
}

#[derive(Debug, Serialize, Deserialize)]
struct GuidelineRecord {
    id: GuidelineId,
    version: Version,
    creation_utc: String,
    condition: String,
    action: String,
    enabled: bool,
    #[serde(default)]
    metadata: Map<String, Value>,
}

/// [`GuidelineStore`] over document collections
pub struct GuidelineDocumentStore {
    guidelines: Arc<dyn DocumentCollection>,
    tags: TagAssociations,
    lock: ReaderWriterLock,
}

impl GuidelineDocumentStore {
    /// Schema version this code writes
    pub const VERSION: Version = Version::new(0, 4, 0);

    fn guidelines_chain() -> Result<MigrationChain> {
        MigrationChain::builder(GUIDELINES_COLLECTION, Self::VERSION)
            .step(
                Version::new(0, 1, 0),
                Version::new(0, 2, 0),
                |mut doc: Document| async move {
                    doc.insert("enabled", Value::Bool(true));
                    doc.set_version(Version::new(0, 2, 0));
                    Ok(Some(doc))
                },
            )
            .manual_step(Version::new(0, 2, 0), Version::new(0, 3, 0))
            .step(
                Version::new(0, 3, 0),
                Version::new(0, 4, 0),
                |mut doc: Document| async move {
                    doc.remove("guideline_set");
                    doc.insert("metadata", Value::Object(Map::new()));
                    doc.set_version(Version::new(0, 4, 0));
                    Ok(Some(doc))
                },
            )
            .build()
    }

    fn tag_loader() -> Arc<dyn DocumentLoader> {
        loader_fn(|mut doc: Document| async move {
            match doc.version_str() {
                Some("0.4.0") => Ok(Some(doc)),
                Some("0.3.0") => {
                    doc.set_version(GuidelineDocumentStore::VERSION);
                    Ok(Some(doc))
                }
                _ => Ok(None),
            }
        })
    }

    /// Check the schema, migrating if allowed, and open the collections
    pub async fn open(database: &dyn DocumentDatabase, allow_migration: bool) -> Result<Self> {
        let chain = Arc::new(Self::guidelines_chain()?);
        let tag_loader = Self::tag_loader();

        StoreMigrationHelper::new(database, GUIDELINE_STORE, Self::VERSION, allow_migration)
            .collection(GUIDELINES_COLLECTION, chain.clone())
            .collection(GUIDELINE_TAGS_COLLECTION, tag_loader.clone())
            .run()
            .await?;

        let guidelines = database
            .get_or_create_collection(GUIDELINES_COLLECTION, chain)
            .await?;
        let links = database
            .get_or_create_collection(GUIDELINE_TAGS_COLLECTION, tag_loader)
            .await?;

        Ok(Self {
            guidelines,
            tags: TagAssociations::new(links, "guideline_id", Self::VERSION),
            lock: ReaderWriterLock::new(GUIDELINE_STORE),
        })
    }

    /// The store's lock, for instrumentation
    pub fn lock(&self) -> &ReaderWriterLock {
        &self.lock
    }

    async fn require_record(&self, guideline_id: &GuidelineId) -> Result<GuidelineRecord> {
        self.guidelines
            .find_one(&Where::eq("id", guideline_id.as_str()))
            .await?
            .ok_or_else(|| Error::not_found(guideline_id.as_str()))?
            .into_record()
    }

    async fn write_record(&self, mut record: GuidelineRecord) -> Result<Guideline> {
        record.version = Self::VERSION;
        self.guidelines
            .update_one(
                &Where::eq("id", record.id.as_str()),
                Document::from_record(&record)?,
                false,
            )
            .await?;
        self.to_guideline(record).await
    }

    async fn to_guideline(&self, record: GuidelineRecord) -> Result<Guideline> {
        let tags = self.tags.tags_of(record.id.as_str()).await?;
        Ok(Guideline {
            creation_utc: parse_timestamp(&record.creation_utc)?,
            id: record.id,
            content: GuidelineContent {
                condition: record.condition,
                action: record.action,
            },
            enabled: record.enabled,
            tags,
            metadata: record.metadata,
        })
    }
}

#[async_trait]
impl GuidelineStore for GuidelineDocumentStore {
    async fn create_guideline(&self, params: GuidelineCreateParams) -> Result<Guideline> {
        let _scope = self.lock.writer().await;

        let creation_utc = params.creation_utc.unwrap_or_else(utc_now);
        let record = GuidelineRecord {
            id: GuidelineId::new(generate_id()),
            version: Self::VERSION,
            creation_utc: format_timestamp(&creation_utc),
            condition: params.content.condition,
            action: params.content.action,
            enabled: params.enabled,
            metadata: params.metadata,
        };

        self.guidelines
            .insert_one(Document::from_record(&record)?)
            .await?;
        let tags = self
            .tags
            .insert_all(record.id.as_str(), params.tags, &creation_utc)
            .await?;
        debug!(guideline_id = %record.id, "created guideline");

        Ok(Guideline {
            creation_utc: parse_timestamp(&record.creation_utc)?,
            id: record.id,
            content: GuidelineContent {
                condition: record.condition,
                action: record.action,
            },
            enabled: record.enabled,
            tags,
            metadata: record.metadata,
        })
    }

    async fn list_guidelines(&self, tags: Option<&[TagId]>) -> Result<Vec<Guideline>> {
        let _scope = self.lock.reader().await;

        let selection = self.tags.select(tags).await?;
        if selection.is_empty() {
            return Ok(Vec::new());
        }

        let mut guidelines = Vec::new();
        for doc in self.guidelines.find(&Where::all()).await? {
            if !doc.id().is_some_and(|id| selection.admits(id)) {
                continue;
            }
            guidelines.push(self.to_guideline(doc.into_record()?).await?);
        }
        Ok(guidelines)
    }

    async fn read_guideline(&self, guideline_id: &GuidelineId) -> Result<Guideline> {
        let _scope = self.lock.reader().await;
        let record = self.require_record(guideline_id).await?;
        self.to_guideline(record).await
    }

    async fn delete_guideline(&self, guideline_id: &GuidelineId) -> Result<()> {
        let _scope = self.lock.writer().await;

        let result = self
            .guidelines
            .delete_one(&Where::eq("id", guideline_id.as_str()))
            .await?;
        if result.deleted_count == 0 {
            return Err(Error::not_found(guideline_id.as_str()));
        }
        self.tags.remove_all(guideline_id.as_str()).await?;
        Ok(())
    }

    async fn update_guideline(
        &self,
        guideline_id: &GuidelineId,
        params: GuidelineUpdateParams,
    ) -> Result<Guideline> {
        let _scope = self.lock.writer().await;

        let mut record = self.require_record(guideline_id).await?;
        if let Some(condition) = params.condition {
            record.condition = condition;
        }
        if let Some(action) = params.action {
            record.action = action;
        }
        if let Some(enabled) = params.enabled {
            record.enabled = enabled;
        }
        if let Some(metadata) = params.metadata {
            record.metadata = metadata;
        }
        self.write_record(record).await
    }

    async fn find_guideline(&self, content: &GuidelineContent) -> Result<Guideline> {
        let _scope = self.lock.reader().await;

        let filter = Where::eq("condition", content.condition.as_str())
            .and_eq("action", content.action.as_str());
        let doc = self.guidelines.find_one(&filter).await?.ok_or_else(|| {
            Error::not_found_with(
                format!("{}{}", content.condition, content.action),
                "No guideline with this content",
            )
        })?;
        self.to_guideline(doc.into_record()?).await
    }

    async fn upsert_tag(
        &self,
        guideline_id: &GuidelineId,
        tag_id: &TagId,
        creation_utc: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let _scope = self.lock.writer().await;

        self.require_record(guideline_id).await?;
        if self.tags.contains(guideline_id.as_str(), tag_id).await? {
            return Ok(false);
        }
        let creation_utc = creation_utc.unwrap_or_else(utc_now);
        self.tags
            .insert(guideline_id.as_str(), tag_id, &creation_utc)
            .await?;
        Ok(true)
    }

    async fn remove_tag(&self, guideline_id: &GuidelineId, tag_id: &TagId) -> Result<()> {
        let _scope = self.lock.writer().await;

        if !self.tags.remove(guideline_id.as_str(), tag_id).await? {
            return Err(Error::not_found(tag_id.as_str()));
        }
        Ok(())
    }

    async fn add_metadata(
        &self,
        guideline_id: &GuidelineId,
        metadata: Map<String, Value>,
    ) -> Result<Guideline> {
        let _scope = self.lock.writer().await;

        let mut record = self.require_record(guideline_id).await?;
        record.metadata.extend(metadata);
        self.write_record(record).await
    }

    async fn remove_metadata(
        &self,
        guideline_id: &GuidelineId,
        keys: &[&str],
    ) -> Result<Guideline> {
        let _scope = self.lock.writer().await;

        let mut record = self.require_record(guideline_id).await?;
        for key in keys {
            record.metadata.remove(*key);
        }
        self.write_record(record).await
    }
}
