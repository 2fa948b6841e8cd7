//! Per-collection migration chains
//!
//! A chain maps each legacy version to the converter that lifts a record
//! one step forward:
//!
//! ```text
//! 0.1.0 --convert--> 0.2.0 --convert--> 0.3.0 (current)
//! ```
//!
//! Every registered version must reach the current version by following
//! steps. A version with no way forward is a configuration error reported
//! by [`MigrationChainBuilder::build`], before any record is read.
//!
//! A manual step marks a transition that cannot be done record by record;
//! reaching one fails with `ManualMigrationRequired`.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use docket_core::{Document, Error, Result, Version};
use docket_storage::DocumentLoader;

type Converter = Arc<dyn Fn(Document) -> BoxFuture<'static, Result<Option<Document>>> + Send + Sync>;

#[derive(Clone)]
enum Step {
    Convert { to: Version, convert: Converter },
    Manual { to: Version },
}

impl Step {
    fn to(&self) -> Version {
        match self {
            Step::Convert { to, .. } | Step::Manual { to } => *to,
        }
    }
}

/// Builder for [`MigrationChain`]
pub struct MigrationChainBuilder {
    collection: String,
    current: Version,
    steps: BTreeMap<Version, Step>,
}

impl MigrationChainBuilder {
    /// Register a converter from `from` to `to`
    ///
    /// The converter receives a record stamped `from` and must return one
    /// stamped `to`, or `None` to drop the record.
    pub fn step<F, Fut>(mut self, from: Version, to: Version, convert: F) -> Self
    where
        F: Fn(Document) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Option<Document>>> + Send + 'static,
    {
        let convert: Converter = Arc::new(move |doc| convert(doc).boxed());
        self.steps.insert(from, Step::Convert { to, convert });
        self
    }

    /// Register a transition that requires an offline migration
    pub fn manual_step(mut self, from: Version, to: Version) -> Self {
        self.steps.insert(from, Step::Manual { to });
        self
    }

    /// Validate and build
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if a step does not move strictly forward
    /// - `MigrationGap` if a registered version cannot reach the current one
    pub fn build(self) -> Result<MigrationChain> {
        for (from, step) in &self.steps {
            if step.to() <= *from {
                return Err(Error::InvalidOperation(format!(
                    "migration step {} -> {} for '{}' does not move forward",
                    from,
                    step.to(),
                    self.collection
                )));
            }
            if *from >= self.current {
                return Err(Error::InvalidOperation(format!(
                    "migration step from {} for '{}' is not older than current version {}",
                    from, self.collection, self.current
                )));
            }
        }

        for from in self.steps.keys() {
            let mut version = *from;
            while version != self.current {
                match self.steps.get(&version) {
                    Some(step) => version = step.to(),
                    None => {
                        return Err(Error::MigrationGap {
                            collection: self.collection,
                            version: version.to_string(),
                        })
                    }
                }
            }
        }

        Ok(MigrationChain {
            collection: self.collection,
            current: self.current,
            steps: self.steps,
        })
    }
}

/// Upgrades records of one collection to its current version
///
/// Installed as the collection's loader; also used directly by
/// [`StoreMigrationHelper`](super::StoreMigrationHelper) during the
/// open-time rewrite.
#[derive(Clone)]
pub struct MigrationChain {
    collection: String,
    current: Version,
    steps: BTreeMap<Version, Step>,
}

impl std::fmt::Debug for MigrationChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationChain")
            .field("collection", &self.collection)
            .field("current", &self.current)
            .field("from", &self.steps.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MigrationChain {
    /// Start a chain for `collection` whose records are current at `current`
    pub fn builder(collection: impl Into<String>, current: Version) -> MigrationChainBuilder {
        MigrationChainBuilder {
            collection: collection.into(),
            current,
            steps: BTreeMap::new(),
        }
    }

    /// Collection this chain belongs to
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Version every migrated record ends at
    pub fn current(&self) -> Version {
        self.current
    }

    /// Lift one record to the current version
    ///
    /// Returns `None` if a converter dropped the record.
    ///
    /// # Errors
    ///
    /// - `MigrationGap` for a version with no registered step
    /// - `ManualMigrationRequired` on a manual step
    /// - `InvalidDocument` if a converter stamps the wrong version
    pub async fn migrate(&self, mut document: Document) -> Result<Option<Document>> {
        let mut version = document.version()?;

        while version != self.current {
            let step = self.steps.get(&version).ok_or_else(|| Error::MigrationGap {
                collection: self.collection.clone(),
                version: version.to_string(),
            })?;

            match step {
                Step::Manual { .. } => {
                    return Err(Error::ManualMigrationRequired {
                        collection: self.collection.clone(),
                        version: version.to_string(),
                    })
                }
                Step::Convert { to, convert } => {
                    let id = document.id().map(str::to_string);
                    let Some(next) = convert(document).await? else {
                        warn!(
                            collection = %self.collection,
                            id = id.as_deref().unwrap_or("?"),
                            from = %version,
                            "migration dropped record"
                        );
                        return Ok(None);
                    };

                    let stamped = next.version()?;
                    if stamped != *to {
                        return Err(Error::InvalidDocument(format!(
                            "converter {} -> {} for '{}' produced version {}",
                            version, to, self.collection, stamped
                        )));
                    }
                    document = next;
                    version = stamped;
                }
            }
        }

        Ok(Some(document))
    }
}

#[async_trait]
impl DocumentLoader for MigrationChain {
    async fn load(&self, document: Document) -> Result<Option<Document>> {
        self.migrate(document).await
    }
}
