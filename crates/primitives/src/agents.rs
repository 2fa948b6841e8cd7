//! AgentStore: agents and their tags
//!
//! ## Design
//!
//! `AgentDocumentStore` keeps agents in the `agents` collection and their
//! tag links in `agent_tags`. It owns no database; both collection handles
//! share the database they were opened from.
//!
//! ## Locking
//!
//! Reads take the store's reader scope. Every mutation takes the writer
//! scope for its whole read-modify-write, including the cascade of tag
//! links on delete.
//!
//! ## Schema
//!
//! Current version 0.3.0. Records at 0.1.0 and 0.2.0 need the offline
//! migration step and fail with `ManualMigrationRequired`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use docket_concurrency::ReaderWriterLock;
use docket_core::{
    format_timestamp, generate_id, id_type, parse_timestamp, utc_now, Document, Error, Result,
    TagId, Version,
};
use docket_engine::{MigrationChain, StoreMigrationHelper};
use docket_storage::{DocumentCollection, DocumentDatabase, ExactVersionLoader, Where};

use crate::tags::TagAssociations;

id_type!(
    /// Identifier of an agent
    AgentId
);

/// Store name used for schema metadata
pub const AGENT_STORE: &str = "agents";
/// Primary collection
pub const AGENTS_COLLECTION: &str = "agents";
/// Tag link collection
pub const AGENT_TAGS_COLLECTION: &str = "agent_tags";

/// How an agent composes its replies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionMode {
    /// Free-form generation
    #[default]
    Fluid,
    /// Free-form, preferring canned utterances
    FluidUtterance,
    /// Canned utterances only
    StrictUtterance,
    /// Canned utterances recomposed by the model
    CompositedUtterance,
}

/// An agent
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    /// Id
    pub id: AgentId,
    /// Display name
    pub name: String,
    /// Free-text description
    pub description: Option<String>,
    /// Creation time
    pub creation_utc: DateTime<Utc>,
    /// Upper bound on engine iterations per turn
    pub max_engine_iterations: u32,
    /// Reply composition mode
    pub composition_mode: CompositionMode,
    /// Linked tags
    pub tags: Vec<TagId>,
}

/// Arguments to [`AgentStore::create_agent`]
#[derive(Debug, Clone, Default)]
pub struct AgentCreateParams {
    /// Display name
    pub name: String,
    /// Free-text description
    pub description: Option<String>,
    /// Creation time; now if absent
    pub creation_utc: Option<DateTime<Utc>>,
    /// Defaults to 1
    pub max_engine_iterations: Option<u32>,
    /// Defaults to `Fluid`
    pub composition_mode: Option<CompositionMode>,
    /// Tags to link
    pub tags: Vec<TagId>,
}

impl AgentCreateParams {
    /// Agent named `name` with every option defaulted
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Partial update; only `Some` fields change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentUpdateParams {
    /// New name
    pub name: Option<String>,
    /// New description (`Some(None)` clears it)
    pub description: Option<Option<String>>,
    /// New iteration bound
    pub max_engine_iterations: Option<u32>,
    /// New composition mode
    pub composition_mode: Option<CompositionMode>,
}

/// CRUD over agents
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Create an agent and link its tags
    async fn create_agent(&self, params: AgentCreateParams) -> Result<Agent>;

    /// Agents passing the tag filter (see [`TagAssociations::select`])
    async fn list_agents(&self, tags: Option<&[TagId]>) -> Result<Vec<Agent>>;

    /// One agent; `NotFound` if absent
    async fn read_agent(&self, agent_id: &AgentId) -> Result<Agent>;

    /// Apply a partial update; `NotFound` if absent
    async fn update_agent(&self, agent_id: &AgentId, params: AgentUpdateParams) -> Result<Agent>;

    /// Delete an agent and every tag link; `NotFound` if absent
    async fn delete_agent(&self, agent_id: &AgentId) -> Result<()>;

    /// Link a tag; false (and no write) if already linked
    async fn upsert_tag(
        &self,
        agent_id: &AgentId,
        tag_id: &TagId,
        creation_utc: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    /// Unlink a tag; `NotFound` if the link does not exist
    async fn remove_tag(&self, agent_id: &AgentId, tag_id: &TagId) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct AgentRecord {
    id: AgentId,
    version: Version,
    creation_utc: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_max_engine_iterations")]
    max_engine_iterations: u32,
    #[serde(default)]
    composition_mode: CompositionMode,
}

fn default_max_engine_iterations() -> u32 {
    1
}

/// [`AgentStore`] over document collections
pub struct AgentDocumentStore {
    agents: Arc<dyn DocumentCollection>,
    tags: TagAssociations,
    lock: ReaderWriterLock,
}

impl AgentDocumentStore {
    /// Schema version this code writes
    pub const VERSION: Version = Version::new(0, 3, 0);

    fn agents_chain() -> Result<MigrationChain> {
        MigrationChain::builder(AGENTS_COLLECTION, Self::VERSION)
            .manual_step(Version::new(0, 1, 0), Version::new(0, 2, 0))
            .manual_step(Version::new(0, 2, 0), Version::new(0, 3, 0))
            .build()
    }

    /// Check the schema, migrating if allowed, and open the collections
    ///
    /// # Errors
    ///
    /// `MigrationRequired`, `ServerOutdated` or a migration failure; see
    /// [`StoreMigrationHelper::run`].
    pub async fn open(database: &dyn DocumentDatabase, allow_migration: bool) -> Result<Self> {
        let chain = Arc::new(Self::agents_chain()?);
        let tag_loader = Arc::new(ExactVersionLoader::new(Self::VERSION));

        StoreMigrationHelper::new(database, AGENT_STORE, Self::VERSION, allow_migration)
            .collection(AGENTS_COLLECTION, chain.clone())
            .collection(AGENT_TAGS_COLLECTION, tag_loader.clone())
            .run()
            .await?;

        let agents = database
            .get_or_create_collection(AGENTS_COLLECTION, chain)
            .await?;
        let links = database
            .get_or_create_collection(AGENT_TAGS_COLLECTION, tag_loader)
            .await?;

        Ok(Self {
            agents,
            tags: TagAssociations::new(links, "agent_id", Self::VERSION),
            lock: ReaderWriterLock::new(AGENT_STORE),
        })
    }

    /// The store's lock, for instrumentation
    pub fn lock(&self) -> &ReaderWriterLock {
        &self.lock
    }

    async fn find_record(&self, agent_id: &AgentId) -> Result<Option<AgentRecord>> {
        match self
            .agents
            .find_one(&Where::eq("id", agent_id.as_str()))
            .await?
        {
            Some(doc) => Ok(Some(doc.into_record()?)),
            None => Ok(None),
        }
    }

    async fn require_record(&self, agent_id: &AgentId) -> Result<AgentRecord> {
        self.find_record(agent_id)
            .await?
            .ok_or_else(|| Error::not_found(agent_id.as_str()))
    }

    async fn to_agent(&self, record: AgentRecord) -> Result<Agent> {
        let tags = self.tags.tags_of(record.id.as_str()).await?;
        Ok(Agent {
            creation_utc: parse_timestamp(&record.creation_utc)?,
            id: record.id,
            name: record.name,
            description: record.description,
            max_engine_iterations: record.max_engine_iterations,
            composition_mode: record.composition_mode,
            tags,
        })
    }
}

#[async_trait]
impl AgentStore for AgentDocumentStore {
    async fn create_agent(&self, params: AgentCreateParams) -> Result<Agent> {
        let _scope = self.lock.writer().await;

        let creation_utc = params.creation_utc.unwrap_or_else(utc_now);
        let record = AgentRecord {
            id: AgentId::new(generate_id()),
            version: Self::VERSION,
            creation_utc: format_timestamp(&creation_utc),
            name: params.name,
            description: params.description,
            max_engine_iterations: params.max_engine_iterations.unwrap_or(1),
            composition_mode: params.composition_mode.unwrap_or_default(),
        };

        self.agents.insert_one(Document::from_record(&record)?).await?;
        let tags = self
            .tags
            .insert_all(record.id.as_str(), params.tags, &creation_utc)
            .await?;
        debug!(agent_id = %record.id, "created agent");

        Ok(Agent {
            creation_utc: parse_timestamp(&record.creation_utc)?,
            id: record.id,
            name: record.name,
            description: record.description,
            max_engine_iterations: record.max_engine_iterations,
            composition_mode: record.composition_mode,
            tags,
        })
    }

    async fn list_agents(&self, tags: Option<&[TagId]>) -> Result<Vec<Agent>> {
        let _scope = self.lock.reader().await;

        let selection = self.tags.select(tags).await?;
        if selection.is_empty() {
            return Ok(Vec::new());
        }

        let mut agents = Vec::new();
        for doc in self.agents.find(&Where::all()).await? {
            if !doc.id().is_some_and(|id| selection.admits(id)) {
                continue;
            }
            agents.push(self.to_agent(doc.into_record()?).await?);
        }
        Ok(agents)
    }

    async fn read_agent(&self, agent_id: &AgentId) -> Result<Agent> {
        let _scope = self.lock.reader().await;
        let record = self.require_record(agent_id).await?;
        self.to_agent(record).await
    }

    async fn update_agent(&self, agent_id: &AgentId, params: AgentUpdateParams) -> Result<Agent> {
        let _scope = self.lock.writer().await;

        let mut record = self.require_record(agent_id).await?;
        if let Some(name) = params.name {
            record.name = name;
        }
        if let Some(description) = params.description {
            record.description = description;
        }
        if let Some(max) = params.max_engine_iterations {
            record.max_engine_iterations = max;
        }
        if let Some(mode) = params.composition_mode {
            record.composition_mode = mode;
        }
        record.version = Self::VERSION;

        self.agents
            .update_one(
                &Where::eq("id", agent_id.as_str()),
                Document::from_record(&record)?,
                false,
            )
            .await?;
        self.to_agent(record).await
    }

    async fn delete_agent(&self, agent_id: &AgentId) -> Result<()> {
        let _scope = self.lock.writer().await;

        let result = self
            .agents
            .delete_one(&Where::eq("id", agent_id.as_str()))
            .await?;
        if result.deleted_count == 0 {
            return Err(Error::not_found(agent_id.as_str()));
        }
        let links = self.tags.remove_all(agent_id.as_str()).await?;
        debug!(agent_id = %agent_id, links, "deleted agent");
        Ok(())
    }

    async fn upsert_tag(
        &self,
        agent_id: &AgentId,
        tag_id: &TagId,
        creation_utc: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let _scope = self.lock.writer().await;

        self.require_record(agent_id).await?;
        if self.tags.contains(agent_id.as_str(), tag_id).await? {
            return Ok(false);
        }
        let creation_utc = creation_utc.unwrap_or_else(utc_now);
        self.tags
            .insert(agent_id.as_str(), tag_id, &creation_utc)
            .await?;
        Ok(true)
    }

    async fn remove_tag(&self, agent_id: &AgentId, tag_id: &TagId) -> Result<()> {
        let _scope = self.lock.writer().await;

        if !self.tags.remove(agent_id.as_str(), tag_id).await? {
            return Err(Error::not_found(tag_id.as_str()));
        }
        Ok(())
    }
}
