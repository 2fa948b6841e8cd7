//! Docket - versioned document persistence for an agent orchestration server
//!
//! Docket keeps agents, guidelines, customers and tool services in
//! schema-versioned document collections. Each store checks its schema stamp
//! when opened and refuses to run against data it would have to migrate
//! unless migration is explicitly allowed.
//!
//! # Quick Start
//!
//! ```ignore
//! use docket::{AgentCreateParams, AgentStore, DocketConfig, Stores};
//!
//! let config = DocketConfig::default();
//! let stores = Stores::open(data_dir, &config, false).await?;
//!
//! let agent = stores.agents.create_agent(AgentCreateParams::new("helper")).await?;
//! stores.close().await?;
//! ```
//!
//! # Layout
//!
//! With the `json` backend every store owns one file in the data directory
//! (`agents.json`, `guidelines.json`, `customers.json`, `services.json`).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub use docket_concurrency::{LockStats, ReaderWriterLock};
pub use docket_core::{Document, Error, Result, TagId, Version};
pub use docket_engine::{Backend, DocketConfig, MigrationStatus, CONFIG_FILE_NAME};
pub use docket_primitives::*;
pub use docket_storage::{
    DocumentCollection, DocumentDatabase, JsonFileDocumentDatabase, TransientDocumentDatabase,
    Where,
};

/// Database behind one store
enum StoreDatabase {
    Json(JsonFileDocumentDatabase),
    Transient(TransientDocumentDatabase),
}

impl StoreDatabase {
    async fn open(backend: Backend, path: PathBuf) -> Result<Self> {
        match backend {
            Backend::Json => Ok(StoreDatabase::Json(
                JsonFileDocumentDatabase::open(path).await?,
            )),
            Backend::Transient => Ok(StoreDatabase::Transient(TransientDocumentDatabase::new())),
        }
    }

    fn as_dyn(&self) -> &dyn DocumentDatabase {
        match self {
            StoreDatabase::Json(db) => db,
            StoreDatabase::Transient(db) => db,
        }
    }

    async fn close(self) -> Result<()> {
        match self {
            StoreDatabase::Json(db) => db.close().await,
            StoreDatabase::Transient(_) => Ok(()),
        }
    }
}

/// Every store of a server, opened together
///
/// Databases are opened in the order agents, guidelines, customers,
/// services and closed in reverse.
pub struct Stores {
    /// Agents
    pub agents: Arc<AgentDocumentStore>,
    /// Guidelines
    pub guidelines: Arc<GuidelineDocumentStore>,
    /// Customers
    pub customers: Arc<CustomerDocumentStore>,
    /// Tool services
    pub services: Arc<ServiceDocumentRegistry>,
    databases: Vec<(&'static str, StoreDatabase)>,
}

impl Stores {
    /// Open every store under `data_dir`
    ///
    /// Fails with `MigrationRequired` if any store holds older data and
    /// `allow_migration` is false, or `ServerOutdated` if any holds newer
    /// data. Databases opened before the failure are closed again.
    pub async fn open(data_dir: &Path, config: &DocketConfig, allow_migration: bool) -> Result<Self> {
        let backend = config.backend()?;
        if backend == Backend::Json {
            std::fs::create_dir_all(data_dir)?;
        }
        let mut databases = Vec::new();

        match Self::open_all(data_dir, backend, allow_migration, &mut databases).await {
            Ok((agents, guidelines, customers, services)) => {
                info!(
                    data_dir = %data_dir.display(),
                    ?backend,
                    allow_migration,
                    "stores opened"
                );
                Ok(Self {
                    agents: Arc::new(agents),
                    guidelines: Arc::new(guidelines),
                    customers: Arc::new(customers),
                    services: Arc::new(services),
                    databases,
                })
            }
            Err(e) => {
                close_in_reverse(databases).await;
                Err(e)
            }
        }
    }

    async fn open_all(
        data_dir: &Path,
        backend: Backend,
        allow_migration: bool,
        databases: &mut Vec<(&'static str, StoreDatabase)>,
    ) -> Result<(
        AgentDocumentStore,
        GuidelineDocumentStore,
        CustomerDocumentStore,
        ServiceDocumentRegistry,
    )> {
        let db = Self::push_database(data_dir, backend, "agents", databases).await?;
        let agents = AgentDocumentStore::open(db, allow_migration).await?;

        let db = Self::push_database(data_dir, backend, "guidelines", databases).await?;
        let guidelines = GuidelineDocumentStore::open(db, allow_migration).await?;

        let db = Self::push_database(data_dir, backend, "customers", databases).await?;
        let customers = CustomerDocumentStore::open(db, allow_migration).await?;

        let db = Self::push_database(data_dir, backend, "services", databases).await?;
        let services = ServiceDocumentRegistry::open(db, allow_migration).await?;

        Ok((agents, guidelines, customers, services))
    }

    async fn push_database<'a>(
        data_dir: &Path,
        backend: Backend,
        name: &'static str,
        databases: &'a mut Vec<(&'static str, StoreDatabase)>,
    ) -> Result<&'a dyn DocumentDatabase> {
        let path = data_dir.join(format!("{name}.json"));
        databases.push((name, StoreDatabase::open(backend, path).await?));
        match databases.last() {
            Some((_, db)) => Ok(db.as_dyn()),
            None => Err(Error::InvalidOperation(format!("database {name} was not opened"))),
        }
    }

    /// Cross-store queries over these stores
    pub fn entity_queries(&self) -> EntityQueries {
        EntityQueries::new(self.agents.clone(), self.guidelines.clone())
    }

    /// Stop running services, then close databases in reverse order
    ///
    /// Returns the first close error, after attempting every close.
    pub async fn close(self) -> Result<()> {
        self.services.close().await;

        let mut first_error = None;
        for (name, db) in self.databases.into_iter().rev() {
            if let Err(e) = db.close().await {
                warn!(database = name, error = %e, "failed to close database");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn close_in_reverse(databases: Vec<(&'static str, StoreDatabase)>) {
    for (name, db) in databases.into_iter().rev() {
        if let Err(e) = db.close().await {
            warn!(database = name, error = %e, "failed to close database");
        }
    }
}
