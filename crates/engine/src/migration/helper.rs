//! Open-time schema check for a store
//!
//! Each store keeps one record in the reserved `metadata` collection, keyed
//! by store name:
//!
//! ```json
//! { "id": "agents", "version": "0.1.0", "last_known_version": "0.3.0" }
//! ```
//!
//! On open the helper compares `last_known_version` with the store's
//! current version:
//!
//! | Stored vs current | Outcome |
//! |---|---|
//! | no record | stamp current version (`Fresh`) |
//! | equal | nothing (`UpToDate`) |
//! | older, migration not allowed | `MigrationRequired`, nothing written |
//! | older, migration allowed | rewrite every record, then stamp (`Migrated`) |
//! | newer | `ServerOutdated`, nothing written |
//!
//! A migration reads every stored record of every declared collection
//! through that collection's loader and buffers the results. Only when all
//! of them succeed is the rewrite committed, together with the new metadata
//! record, as a single database write. Records a loader drops are moved to
//! the `failed_migrations` collection in that same write.

use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use docket_core::{generate_id, Document, Error, Result, Version};
use docket_storage::{
    DocumentDatabase, DocumentLoader, Rewrite, FAILED_MIGRATIONS_COLLECTION, METADATA_COLLECTION,
};

/// Schema version of metadata and quarantine records themselves
pub const METADATA_SCHEMA_VERSION: Version = Version::new(0, 1, 0);

const LAST_KNOWN_VERSION_FIELD: &str = "last_known_version";

/// What opening a store did to its data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationStatus {
    /// No metadata existed; the current version was stamped
    Fresh,
    /// Stored version equals the current version
    UpToDate,
    /// Stored records were rewritten to the current version
    Migrated {
        /// Version the data was at
        from: Version,
        /// Version the data is now at
        to: Version,
        /// Records rewritten
        migrated: usize,
        /// Records moved to `failed_migrations`
        failed: usize,
    },
}

struct DeclaredCollection {
    name: String,
    loader: Arc<dyn DocumentLoader>,
}

/// Runs the open-time check for one store
pub struct StoreMigrationHelper<'a> {
    database: &'a dyn DocumentDatabase,
    store: String,
    current: Version,
    allow_migration: bool,
    collections: Vec<DeclaredCollection>,
}

impl<'a> StoreMigrationHelper<'a> {
    /// Helper for `store`, whose code writes records at `current`
    pub fn new(
        database: &'a dyn DocumentDatabase,
        store: impl Into<String>,
        current: Version,
        allow_migration: bool,
    ) -> Self {
        Self {
            database,
            store: store.into(),
            current,
            allow_migration,
            collections: Vec::new(),
        }
    }

    /// Declare a collection the store owns, with the loader that upgrades it
    pub fn collection(mut self, name: impl Into<String>, loader: Arc<dyn DocumentLoader>) -> Self {
        self.collections.push(DeclaredCollection {
            name: name.into(),
            loader,
        });
        self
    }

    /// Run the check, migrating if needed and permitted
    ///
    /// # Errors
    ///
    /// - `MigrationRequired` if the data is older and migration is not allowed
    /// - `ServerOutdated` if the data is newer than the running code
    /// - any loader error (e.g. `MigrationGap`), in which case nothing is written
    pub async fn run(self) -> Result<MigrationStatus> {
        let metadata = self.database.raw_documents(METADATA_COLLECTION).await?;
        let existing = metadata
            .iter()
            .find(|d| d.id() == Some(self.store.as_str()));

        let Some(existing) = existing else {
            self.database
                .commit(vec![Rewrite::Replace {
                    collection: METADATA_COLLECTION.to_string(),
                    documents: with_stamp(metadata, &self.store, self.current),
                }])
                .await?;
            info!(store = %self.store, version = %self.current, "stamped fresh store");
            return Ok(MigrationStatus::Fresh);
        };

        let stored = last_known_version(existing)?;

        if stored == self.current {
            return Ok(MigrationStatus::UpToDate);
        }

        if stored > self.current {
            return Err(Error::ServerOutdated {
                store: self.store,
                stored: stored.to_string(),
                current: self.current.to_string(),
            });
        }

        if !self.allow_migration {
            return Err(Error::MigrationRequired {
                store: self.store,
                from: stored.to_string(),
                to: self.current.to_string(),
            });
        }

        info!(store = %self.store, from = %stored, to = %self.current, "migrating store");

        let mut rewrites = Vec::with_capacity(self.collections.len() + 2);
        let mut quarantined = Vec::new();
        let mut migrated = 0;

        for declared in &self.collections {
            let raw = self.database.raw_documents(&declared.name).await?;
            let mut upgraded = Vec::with_capacity(raw.len());

            for document in raw {
                match declared.loader.load(document.clone()).await? {
                    Some(doc) => upgraded.push(doc),
                    None => quarantined.push(quarantine_record(&self.store, &declared.name, document)),
                }
            }

            migrated += upgraded.len();
            rewrites.push(Rewrite::Replace {
                collection: declared.name.clone(),
                documents: upgraded,
            });
        }

        let failed = quarantined.len();
        if failed > 0 {
            warn!(store = %self.store, failed, "records quarantined during migration");
            rewrites.push(Rewrite::Append {
                collection: FAILED_MIGRATIONS_COLLECTION.to_string(),
                documents: quarantined,
            });
        }

        rewrites.push(Rewrite::Replace {
            collection: METADATA_COLLECTION.to_string(),
            documents: with_stamp(metadata, &self.store, self.current),
        });

        self.database.commit(rewrites).await?;

        info!(store = %self.store, migrated, failed, "store migrated");
        Ok(MigrationStatus::Migrated {
            from: stored,
            to: self.current,
            migrated,
            failed,
        })
    }
}

fn last_known_version(metadata: &Document) -> Result<Version> {
    let raw = metadata.get_str(LAST_KNOWN_VERSION_FIELD).ok_or_else(|| {
        Error::InvalidDocument(format!(
            "metadata record '{}' has no {}",
            metadata.id().unwrap_or("?"),
            LAST_KNOWN_VERSION_FIELD
        ))
    })?;
    Version::parse(raw)
}

/// Metadata records with this store's entry set to `version`
fn with_stamp(mut metadata: Vec<Document>, store: &str, version: Version) -> Vec<Document> {
    let mut record = Document::with_identity(store, METADATA_SCHEMA_VERSION);
    record.insert(LAST_KNOWN_VERSION_FIELD, Value::String(version.to_string()));

    match metadata.iter_mut().find(|d| d.id() == Some(store)) {
        Some(existing) => *existing = record,
        None => metadata.push(record),
    }
    metadata
}

fn quarantine_record(store: &str, collection: &str, original: Document) -> Document {
    let mut record = Document::with_identity(generate_id(), METADATA_SCHEMA_VERSION);
    record.insert("store", Value::String(store.to_string()));
    record.insert("collection", Value::String(collection.to_string()));
    record.insert("document", original.into_value());
    record
}
