//! Typed stores for docket
//!
//! Each store is a domain CRUD facade over a primary document collection
//! plus a tag association collection:
//!
//! - **AgentStore**: agents and their tags
//! - **GuidelineStore**: condition/action guidelines, metadata and tags
//! - **CustomerStore**: customers, extra attributes and tags
//! - **ServiceRegistry**: tool services keyed by name
//!
//! ## Opening a store
//!
//! `open(database, allow_migration)` checks the store's schema stamp in the
//! database (migrating when permitted) before the first operation:
//!
//! ```rust,ignore
//! let db = JsonFileDocumentDatabase::open(dir.join("agents.json")).await?;
//! let agents = AgentDocumentStore::open(&db, false).await?;
//! let agent = agents.create_agent(AgentCreateParams::new("helper")).await?;
//! ```
//!
//! ## Concurrency
//!
//! Every store owns one [`ReaderWriterLock`](docket_concurrency::ReaderWriterLock).
//! Reads hold a reader scope; every mutation, including its cascades into
//! the association collection, runs inside a single writer scope.
//!
//! ## Atomicity
//!
//! Each collection write is all-or-nothing, on crash and on cancellation.
//! A store operation spanning several writes is not: a `create_*` dropped
//! between the primary insert and its tag links, or a delete dropped
//! mid-cascade, leaves the writes made so far in place. Callers that wrap
//! mutations in a timeout should re-read the entity afterwards.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agents;
pub mod customers;
pub mod entity_queries;
pub mod guidelines;
pub mod services;
pub mod tags;

pub use agents::{
    Agent, AgentCreateParams, AgentDocumentStore, AgentId, AgentStore, AgentUpdateParams,
    CompositionMode,
};
pub use customers::{
    Customer, CustomerCreateParams, CustomerDocumentStore, CustomerId, CustomerStore,
    CustomerUpdateParams,
};
pub use entity_queries::{agent_tag, EntityQueries};
pub use guidelines::{
    Guideline, GuidelineContent, GuidelineCreateParams, GuidelineDocumentStore, GuidelineId,
    GuidelineStore, GuidelineUpdateParams,
};
pub use services::{ServiceDocumentRegistry, ServiceRegistry, ToolService, ToolServiceKind};
pub use tags::{TagAssociations, TagSelection};
