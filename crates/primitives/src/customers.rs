//! CustomerStore: customers, their extra attributes, and tags
//!
//! Customers live in `customers`, tag links in `customer_tag_associations`.
//! `extra` is a flat string-to-string map edited key by key with
//! `add_extra` / `remove_extra`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
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
    /// Identifier of a customer
    CustomerId
);

/// Store name used for schema metadata
pub const CUSTOMER_STORE: &str = "customers";
/// Primary collection
pub const CUSTOMERS_COLLECTION: &str = "customers";
/// Tag link collection
pub const CUSTOMER_TAGS_COLLECTION: &str = "customer_tag_associations";

/// A customer
#[derive(Debug, Clone, PartialEq)]
pub struct Customer {
    /// Id
    pub id: CustomerId,
    /// Creation time
    pub creation_utc: DateTime<Utc>,
    /// Display name
    pub name: String,
    /// Free-form attributes
    pub extra: BTreeMap<String, String>,
    /// Linked tags
    pub tags: Vec<TagId>,
}

/// Arguments to [`CustomerStore::create_customer`]
#[derive(Debug, Clone, Default)]
pub struct CustomerCreateParams {
    /// Display name
    pub name: String,
    /// Initial attributes
    pub extra: BTreeMap<String, String>,
    /// Creation time; now if absent
    pub creation_utc: Option<DateTime<Utc>>,
    /// Tags to link
    pub tags: Vec<TagId>,
}

impl CustomerCreateParams {
    /// Customer named `name` with no attributes or tags
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Partial update; only `Some` fields change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerUpdateParams {
    /// New name
    pub name: Option<String>,
}

/// CRUD over customers
#[async_trait]
pub trait CustomerStore: Send + Sync {
    /// Create a customer and link its tags
    async fn create_customer(&self, params: CustomerCreateParams) -> Result<Customer>;

    /// One customer; `NotFound` if absent
    async fn read_customer(&self, customer_id: &CustomerId) -> Result<Customer>;

    /// Customers passing the tag filter (see [`TagAssociations::select`])
    async fn list_customers(&self, tags: Option<&[TagId]>) -> Result<Vec<Customer>>;

    /// Apply a partial update; `NotFound` if absent
    async fn update_customer(
        &self,
        customer_id: &CustomerId,
        params: CustomerUpdateParams,
    ) -> Result<Customer>;

    /// Delete a customer and every tag link; `NotFound` if absent
    async fn delete_customer(&self, customer_id: &CustomerId) -> Result<()>;

    /// Set attributes, overwriting existing keys
    async fn add_extra(
        &self,
        customer_id: &CustomerId,
        extra: BTreeMap<String, String>,
    ) -> Result<Customer>;

    /// Drop attributes; absent keys are ignored
    async fn remove_extra(&self, customer_id: &CustomerId, keys: &[&str]) -> Result<Customer>;

    /// Link a tag; false (and no write) if already linked
    async fn upsert_tag(
        &self,
        customer_id: &CustomerId,
        tag_id: &TagId,
        creation_utc: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    /// Unlink a tag; `NotFound` if the link does not exist
    async fn remove_tag(&self, customer_id: &CustomerId, tag_id: &TagId) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CustomerRecord {
    id: CustomerId,
    version: Version,
    creation_utc: String,
    name: String,
    #[serde(default)]
    extra: BTreeMap<String, String>,
}

/// [`CustomerStore`] over document collections
pub struct CustomerDocumentStore {
    customers: Arc<dyn DocumentCollection>,
    tags: TagAssociations,
    lock: ReaderWriterLock,
}

impl CustomerDocumentStore {
    /// Schema version this code writes
    pub const VERSION: Version = Version::new(0, 1, 0);

    /// Check the schema, migrating if allowed, and open the collections
    pub async fn open(database: &dyn DocumentDatabase, allow_migration: bool) -> Result<Self> {
        let chain = Arc::new(MigrationChain::builder(CUSTOMERS_COLLECTION, Self::VERSION).build()?);
        let tag_loader = Arc::new(ExactVersionLoader::new(Self::VERSION));

        StoreMigrationHelper::new(database, CUSTOMER_STORE, Self::VERSION, allow_migration)
            .collection(CUSTOMERS_COLLECTION, chain.clone())
            .collection(CUSTOMER_TAGS_COLLECTION, tag_loader.clone())
            .run()
            .await?;

        let customers = database
            .get_or_create_collection(CUSTOMERS_COLLECTION, chain)
            .await?;
        let links = database
            .get_or_create_collection(CUSTOMER_TAGS_COLLECTION, tag_loader)
            .await?;

        Ok(Self {
            customers,
            tags: TagAssociations::new(links, "customer_id", Self::VERSION),
            lock: ReaderWriterLock::new(CUSTOMER_STORE),
        })
    }

    /// The store's lock, for instrumentation
    pub fn lock(&self) -> &ReaderWriterLock {
        &self.lock
    }

    async fn require_record(&self, customer_id: &CustomerId) -> Result<CustomerRecord> {
        self.customers
            .find_one(&Where::eq("id", customer_id.as_str()))
            .await?
            .ok_or_else(|| Error::not_found(customer_id.as_str()))?
            .into_record()
    }

    async fn write_record(&self, record: CustomerRecord) -> Result<Customer> {
        self.customers
            .update_one(
                &Where::eq("id", record.id.as_str()),
                Document::from_record(&record)?,
                false,
            )
            .await?;
        self.to_customer(record).await
    }

    async fn to_customer(&self, record: CustomerRecord) -> Result<Customer> {
        let tags = self.tags.tags_of(record.id.as_str()).await?;
        Ok(Customer {
            creation_utc: parse_timestamp(&record.creation_utc)?,
            id: record.id,
            name: record.name,
            extra: record.extra,
            tags,
        })
    }
}

#[async_trait]
impl CustomerStore for CustomerDocumentStore {
    async fn create_customer(&self, params: CustomerCreateParams) -> Result<Customer> {
        let _scope = self.lock.writer().await;

        let creation_utc = params.creation_utc.unwrap_or_else(utc_now);
        let record = CustomerRecord {
            id: CustomerId::new(generate_id()),
            version: Self::VERSION,
            creation_utc: format_timestamp(&creation_utc),
            name: params.name,
            extra: params.extra,
        };

        self.customers
            .insert_one(Document::from_record(&record)?)
            .await?;
        let tags = self
            .tags
            .insert_all(record.id.as_str(), params.tags, &creation_utc)
            .await?;
        debug!(customer_id = %record.id, "created customer");

        Ok(Customer {
            creation_utc: parse_timestamp(&record.creation_utc)?,
            id: record.id,
            name: record.name,
            extra: record.extra,
            tags,
        })
    }

    async fn read_customer(&self, customer_id: &CustomerId) -> Result<Customer> {
        let _scope = self.lock.reader().await;
        let record = self.require_record(customer_id).await?;
        self.to_customer(record).await
    }

    async fn list_customers(&self, tags: Option<&[TagId]>) -> Result<Vec<Customer>> {
        let _scope = self.lock.reader().await;

        let selection = self.tags.select(tags).await?;
        if selection.is_empty() {
            return Ok(Vec::new());
        }

        let mut customers = Vec::new();
        for doc in self.customers.find(&Where::all()).await? {
            if !doc.id().is_some_and(|id| selection.admits(id)) {
                continue;
            }
            customers.push(self.to_customer(doc.into_record()?).await?);
        }
        Ok(customers)
    }

    async fn update_customer(
        &self,
        customer_id: &CustomerId,
        params: CustomerUpdateParams,
    ) -> Result<Customer> {
        let _scope = self.lock.writer().await;

        let mut record = self.require_record(customer_id).await?;
        if let Some(name) = params.name {
            record.name = name;
        }
        self.write_record(record).await
    }

    async fn delete_customer(&self, customer_id: &CustomerId) -> Result<()> {
        let _scope = self.lock.writer().await;

        let result = self
            .customers
            .delete_one(&Where::eq("id", customer_id.as_str()))
            .await?;
        if result.deleted_count == 0 {
            return Err(Error::not_found(customer_id.as_str()));
        }
        self.tags.remove_all(customer_id.as_str()).await?;
        Ok(())
    }

    async fn add_extra(
        &self,
        customer_id: &CustomerId,
        extra: BTreeMap<String, String>,
    ) -> Result<Customer> {
        let _scope = self.lock.writer().await;

        let mut record = self.require_record(customer_id).await?;
        record.extra.extend(extra);
        self.write_record(record).await
    }

    async fn remove_extra(&self, customer_id: &CustomerId, keys: &[&str]) -> Result<Customer> {
        let _scope = self.lock.writer().await;

        let mut record = self.require_record(customer_id).await?;
        for key in keys {
            record.extra.remove(*key);
        }
        self.write_record(record).await
    }

    async fn upsert_tag(
        &self,
        customer_id: &CustomerId,
        tag_id: &TagId,
        creation_utc: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let _scope = self.lock.writer().await;

        self.require_record(customer_id).await?;
        if self.tags.contains(customer_id.as_str(), tag_id).await? {
            return Ok(false);
        }
        let creation_utc = creation_utc.unwrap_or_else(utc_now);
        self.tags
            .insert(customer_id.as_str(), tag_id, &creation_utc)
            .await?;
        Ok(true)
    }

    async fn remove_tag(&self, customer_id: &CustomerId, tag_id: &TagId) -> Result<()> {
        let _scope = self.lock.writer().await;

        if !self.tags.remove(customer_id.as_str(), tag_id).await? {
            return Err(Error::not_found(tag_id.as_str()));
        }
        Ok(())
    }
}
