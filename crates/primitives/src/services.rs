//! Tool-service registry
//!
//! Services are keyed by name. A service is one of a closed set of backend
//! kinds, stored with a `kind` discriminant:
//!
//! ```json
//! { "id": "weather", "version": "0.1.0", "name": "weather", "kind": "openapi",
//!   "url": "https://weather.example", "source": "https://weather.example/openapi.json" }
//! ```
//!
//! The registry keeps the running set in memory. Persisted services are
//! loaded into it on open and the set is released on close. `local` services
//! and services registered as transient only ever live in the running set.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use docket_concurrency::ReaderWriterLock;
use docket_core::{Document, Error, Result, Version};
use docket_engine::StoreMigrationHelper;
use docket_storage::{DocumentCollection, DocumentDatabase, ExactVersionLoader, Where};

/// Store name used for schema metadata
pub const SERVICE_STORE: &str = "tool_services";
/// Persisted services
pub const TOOL_SERVICES_COLLECTION: &str = "tool_services";

/// Stored discriminant of a [`ToolService`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolServiceKind {
    /// Described by an OpenAPI document
    #[serde(rename = "openapi")]
    OpenApi,
    /// Plugin server speaking the SDK protocol
    Sdk,
    /// In-process tools
    Local,
}

impl std::fmt::Display for ToolServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ToolServiceKind::OpenApi => "openapi",
            ToolServiceKind::Sdk => "sdk",
            ToolServiceKind::Local => "local",
        };
        f.write_str(s)
    }
}

/// A tool-service backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolService {
    /// OpenAPI server at `url`, described by the document at `source`
    OpenApi {
        /// Server base URL
        url: String,
        /// Path or URL of the OpenAPI document
        source: String,
    },
    /// SDK plugin server
    Sdk {
        /// Plugin URL
        url: String,
    },
    /// In-process tools
    Local,
}

impl ToolService {
    /// Discriminant
    pub fn kind(&self) -> ToolServiceKind {
        match self {
            ToolService::OpenApi { .. } => ToolServiceKind::OpenApi,
            ToolService::Sdk { .. } => ToolServiceKind::Sdk,
            ToolService::Local => ToolServiceKind::Local,
        }
    }

    /// Remote URL, if the backend has one
    pub fn url(&self) -> Option<&str> {
        match self {
            ToolService::OpenApi { url, .. } | ToolService::Sdk { url } => Some(url),
            ToolService::Local => None,
        }
    }

    /// Whether registering this service writes a record
    pub fn is_persistent(&self) -> bool {
        !matches!(self, ToolService::Local)
    }
}

/// Registry of tool services
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Register or replace the service `name`
    ///
    /// Non-local services are persisted unless `transient`.
    async fn update_tool_service(
        &self,
        name: &str,
        service: ToolService,
        transient: bool,
    ) -> Result<ToolService>;

    /// A running service; `NotFound` if absent
    async fn read_tool_service(&self, name: &str) -> Result<ToolService>;

    /// Every running service, ordered by name
    async fn list_tool_services(&self) -> Result<Vec<(String, ToolService)>>;

    /// Stop and forget a service; `NotFound` if neither running nor stored
    async fn delete_service(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct ToolServiceRecord {
    id: String,
    version: Version,
    name: String,
    kind: ToolServiceKind,
    url: Option<String>,
    source: Option<String>,
}

impl ToolServiceRecord {
    fn new(name: &str, service: &ToolService) -> Self {
        let (url, source) = match service {
            ToolService::OpenApi { url, source } => (Some(url.clone()), Some(source.clone())),
            ToolService::Sdk { url } => (Some(url.clone()), None),
            ToolService::Local => (None, None),
        };
        Self {
            id: name.to_string(),
            version: ServiceDocumentRegistry::VERSION,
            name: name.to_string(),
            kind: service.kind(),
            url,
            source,
        }
    }

    fn into_service(self) -> Result<ToolService> {
        let missing = |field: &str| {
            Error::InvalidDocument(format!(
                "{} service '{}' has no {}",
                self.kind, self.name, field
            ))
        };
        match self.kind {
            ToolServiceKind::OpenApi => Ok(ToolService::OpenApi {
                url: self.url.clone().ok_or_else(|| missing("url"))?,
                source: self.source.clone().ok_or_else(|| missing("source"))?,
            }),
            ToolServiceKind::Sdk => Ok(ToolService::Sdk {
                url: self.url.clone().ok_or_else(|| missing("url"))?,
            }),
            ToolServiceKind::Local => Err(Error::InvalidDocument(format!(
                "local service '{}' should not be stored",
                self.name
            ))),
        }
    }
}

/// [`ServiceRegistry`] over a document collection
pub struct ServiceDocumentRegistry {
    services: Arc<dyn DocumentCollection>,
    running: Mutex<BTreeMap<String, ToolService>>,
    lock: ReaderWriterLock,
}

impl ServiceDocumentRegistry {
    /// Schema version this code writes
    pub const VERSION: Version = Version::new(0, 1, 0);

    /// Check the schema and start every persisted service
    pub async fn open(database: &dyn DocumentDatabase, allow_migration: bool) -> Result<Self> {
        let loader = Arc::new(ExactVersionLoader::new(Self::VERSION));

        StoreMigrationHelper::new(database, SERVICE_STORE, Self::VERSION, allow_migration)
            .collection(TOOL_SERVICES_COLLECTION, loader.clone())
            .run()
            .await?;

        let services = database
            .get_or_create_collection(TOOL_SERVICES_COLLECTION, loader)
            .await?;

        let mut running = BTreeMap::new();
        for doc in services.find(&Where::all()).await? {
            let record: ToolServiceRecord = doc.into_record()?;
            let name = record.name.clone();
            running.insert(name, record.into_service()?);
        }
        info!(services = running.len(), "started tool services");

        Ok(Self {
            services,
            running: Mutex::new(running),
            lock: ReaderWriterLock::new(SERVICE_STORE),
        })
    }

    /// Release every running service
    pub async fn close(&self) {
        let _scope = self.lock.writer().await;
        let mut running = self.running.lock();
        debug!(services = running.len(), "stopping tool services");
        running.clear();
    }

    /// The registry's lock, for instrumentation
    pub fn lock(&self) -> &ReaderWriterLock {
        &self.lock
    }
}

#[async_trait]
impl ServiceRegistry for ServiceDocumentRegistry {
    async fn update_tool_service(
        &self,
        name: &str,
        service: ToolService,
        transient: bool,
    ) -> Result<ToolService> {
        if let ToolService::OpenApi { source, .. } = &service {
            if source.is_empty() {
                return Err(Error::InvalidOperation(format!(
                    "openapi service '{name}' requires a source"
                )));
            }
        }

        let _scope = self.lock.writer().await;

        if service.is_persistent() && !transient {
            let record = ToolServiceRecord::new(name, &service);
            self.services
                .update_one(&Where::eq("name", name), Document::from_record(&record)?, true)
                .await?;
        }

        if let Some(previous) = self.running.lock().insert(name.to_string(), service.clone()) {
            debug!(name, kind = %previous.kind(), "replaced running tool service");
        }
        info!(name, kind = %service.kind(), transient, "registered tool service");

        Ok(service)
    }

    async fn read_tool_service(&self, name: &str) -> Result<ToolService> {
        let _scope = self.lock.reader().await;
        self.running
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(name))
    }

    async fn list_tool_services(&self) -> Result<Vec<(String, ToolService)>> {
        let _scope = self.lock.reader().await;
        Ok(self
            .running
            .lock()
            .iter()
            .map(|(name, service)| (name.clone(), service.clone()))
            .collect())
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        let _scope = self.lock.writer().await;

        let is_local = matches!(self.running.lock().get(name), Some(ToolService::Local));
        if is_local {
            self.running.lock().remove(name);
        } else {
            // Storage first: a failed delete keeps the service running
            let result = self.services.delete_one(&Where::eq("name", name)).await?;
            let was_running = self.running.lock().remove(name).is_some();
            if result.deleted_count == 0 && !was_running {
                return Err(Error::not_found(name));
            }
        }
        info!(name, "deleted tool service");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_storage::TransientDocumentDatabase;

    fn openapi(url: &str) -> ToolService {
        ToolService::OpenApi {
            url: url.to_string(),
            source: format!("{url}/openapi.json"),
        }
    }

    #[tokio::test]
    async fn test_persistent_services_restart_on_open() {
        let db = TransientDocumentDatabase::new();
        let registry = ServiceDocumentRegistry::open(&db, false).await.unwrap();
        registry
            .update_tool_service("weather", openapi("http://w"), false)
            .await
            .unwrap();
        registry
            .update_tool_service("scratch", ToolService::Sdk { url: "http://s".into() }, true)
            .await
            .unwrap();
        registry
            .update_tool_service("builtin", ToolService::Local, false)
            .await
            .unwrap();
        assert_eq!(registry.list_tool_services().await.unwrap().len(), 3);
        registry.close().await;
        assert!(registry.list_tool_services().await.unwrap().is_empty());

        let reopened = ServiceDocumentRegistry::open(&db, false).await.unwrap();
        let listed = reopened.list_tool_services().await.unwrap();
        assert_eq!(listed, vec![("weather".to_string(), openapi("http://w"))]);
    }

    #[tokio::test]
    async fn test_kind_change_overwrites_record() {
        let db = TransientDocumentDatabase::new();
        let registry = ServiceDocumentRegistry::open(&db, false).await.unwrap();
        registry
            .update_tool_service("svc", openapi("http://a"), false)
            .await
            .unwrap();
        registry
            .update_tool_service("svc", ToolService::Sdk { url: "http://b".into() }, false)
            .await
            .unwrap();

        let stored = db.raw_documents(TOOL_SERVICES_COLLECTION).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].get_str("kind"), Some("sdk"));
        assert_eq!(stored[0].get("source"), Some(&serde_json::Value::Null));

        let svc = registry.read_tool_service("svc").await.unwrap();
        assert_eq!(svc, ToolService::Sdk { url: "http://b".into() });
    }

    #[tokio::test]
    async fn test_openapi_requires_source() {
        let db = TransientDocumentDatabase::new();
        let registry = ServiceDocumentRegistry::open(&db, false).await.unwrap();
        let err = registry
            .update_tool_service(
                "bad",
                ToolService::OpenApi {
                    url: "http://x".into(),
                    source: String::new(),
                },
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        assert!(registry.read_tool_service("bad").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_service() {
        let db = TransientDocumentDatabase::new();
        let registry = ServiceDocumentRegistry::open(&db, false).await.unwrap();
        registry
            .update_tool_service("weather", openapi("http://w"), false)
            .await
            .unwrap();
        registry
            .update_tool_service("builtin", ToolService::Local, false)
            .await
            .unwrap();

        registry.delete_service("weather").await.unwrap();
        registry.delete_service("builtin").await.unwrap();
        assert!(db.raw_documents(TOOL_SERVICES_COLLECTION).await.unwrap().is_empty());
        assert!(registry.delete_service("weather").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_failed_storage_delete_keeps_service_running() {
        let db = TransientDocumentDatabase::new();
        let registry = ServiceDocumentRegistry::open(&db, false).await.unwrap();
        registry
            .update_tool_service("weather", openapi("http://w"), false)
            .await
            .unwrap();

        db.delete_collection(TOOL_SERVICES_COLLECTION).await.unwrap();
        assert!(registry.delete_service("weather").await.is_err());
        assert_eq!(
            registry.read_tool_service("weather").await.unwrap(),
            openapi("http://w")
        );
    }
}
