//! JSON file backend
//!
//! The whole database is one JSON object mapping collection name to an
//! array of records. Every committed write rewrites the file atomically:
//!
//! 1. Encode the full state
//! 2. Write it to `<file>.tmp` and fsync
//! 3. Rename over the original
//! 4. Fsync the parent directory
//!
//! A crash at any point leaves either the old or the new file on disk.
//! Opening never writes; a missing file reads as an empty database and is
//! only created by the first committed write.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use docket_core::{Document, Error, Result};

use super::shared::{Collections, Persistence, SharedState};
use super::{delegate_document_database, DatabaseCore};

// Files currently held open in this process. Two handles on one file would
// each overwrite the other's changes, so a second open is refused.
static OPEN_FILES: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Registry entry released when the database is dropped
struct FileClaim {
    path: PathBuf,
}

impl FileClaim {
    fn acquire(path: PathBuf) -> Result<Self> {
        let mut open = OPEN_FILES.lock();
        if !open.insert(path.clone()) {
            return Err(Error::InvalidOperation(format!(
                "database file '{}' is already open in this process",
                path.display()
            )));
        }
        Ok(Self { path })
    }
}

impl Drop for FileClaim {
    fn drop(&mut self) {
        OPEN_FILES.lock().remove(&self.path);
    }
}

struct JsonFile {
    path: PathBuf,
}

#[async_trait]
impl Persistence for JsonFile {
    fn encode(&self, collections: &Collections) -> Result<Option<Vec<u8>>> {
        Ok(Some(serde_json::to_vec_pretty(collections)?))
    }

    async fn write(&self, bytes: Vec<u8>) -> Result<()> {
        let temp_path = temp_path(&self.path);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path).await?;

        if let Some(parent) = self.path.parent() {
            let dir = tokio::fs::File::open(parent).await?;
            dir.sync_all().await?;
        }

        debug!(path = %self.path.display(), bytes = bytes.len(), "persisted database file");
        Ok(())
    }
}

/// Document database persisted to a single JSON file
pub struct JsonFileDocumentDatabase {
    core: DatabaseCore,
    claim: FileClaim,
}

impl JsonFileDocumentDatabase {
    /// Open the database at `path`
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if the file is already open in this process
    /// - `Serialization` / `InvalidDocument` if the file content is malformed
    /// - `Io` on read failure
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = absolute(path.as_ref()).await?;
        let claim = FileClaim::acquire(path.clone())?;

        let collections = read_collections(&path).await?;
        info!(
            path = %path.display(),
            collections = collections.len(),
            "opened database file"
        );

        let state = SharedState::new(collections, Box::new(JsonFile { path }));
        Ok(Self {
            core: DatabaseCore::new(state),
            claim,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.claim.path
    }

    /// Release the file
    ///
    /// Every write is already durable when it returns, so closing only
    /// releases the process-wide claim on the path.
    pub async fn close(self) -> Result<()> {
        debug!(path = %self.claim.path.display(), "closed database file");
        Ok(())
    }
}

delegate_document_database!(JsonFileDocumentDatabase);

/// Canonical key for the open-files registry
///
/// The parent directory is resolved through the filesystem when it exists,
/// so `dir/./db.json` and `dir/db.json` claim the same entry.
async fn absolute(path: &Path) -> Result<PathBuf> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
        return Err(Error::InvalidOperation(format!(
            "'{}' does not name a database file",
            path.display()
        )));
    };

    match tokio::fs::canonicalize(parent).await {
        Ok(dir) => Ok(dir.join(file_name)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(path
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect()),
        Err(e) => Err(e.into()),
    }
}

/// `<file>.tmp`, keeping the original extension
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

async fn read_collections(path: &Path) -> Result<Collections> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Collections::new()),
        Err(e) => return Err(e.into()),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Collections::new());
    }

    let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&bytes)?;
    let mut collections = Collections::new();
    for (name, records) in raw {
        let serde_json::Value::Array(records) = records else {
            return Err(Error::InvalidDocument(format!(
                "collection '{}' in '{}' is not an array",
                name,
                path.display()
            )));
        };
        let documents = records
            .into_iter()
            .map(Document::from_value)
            .collect::<Result<Vec<_>>>()?;
        collections.insert(name, documents);
    }
    Ok(collections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DocumentDatabase;
    use crate::loader::IdentityLoader;
    use docket_core::Version;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_missing_file_does_not_create_it() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");

        let db = JsonFileDocumentDatabase::open(&path).await.unwrap();
        assert!(db.collection_names().await.unwrap().is_empty());
        db.close().await.unwrap();

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_double_open_rejected_until_closed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");

        let db = JsonFileDocumentDatabase::open(&path).await.unwrap();
        let second = JsonFileDocumentDatabase::open(&path).await;
        assert!(matches!(second, Err(Error::InvalidOperation(_))));

        db.close().await.unwrap();
        let reopened = JsonFileDocumentDatabase::open(&path).await.unwrap();
        reopened.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_equivalent_paths_share_one_claim() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        let dotted = dir.path().join(".").join("db.json");

        let db = JsonFileDocumentDatabase::open(&path).await.unwrap();
        let second = JsonFileDocumentDatabase::open(&dotted).await;
        assert!(matches!(second, Err(Error::InvalidOperation(_))));
        db.close().await.unwrap();
    }

    #[test]
    fn test_temp_path_keeps_extension() {
        assert_eq!(
            temp_path(Path::new("/data/agents.json")),
            PathBuf::from("/data/agents.json.tmp")
        );
        assert_ne!(
            temp_path(Path::new("/data/x.json")),
            temp_path(Path::new("/data/x.yaml"))
        );
    }

    #[tokio::test]
    async fn test_writes_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");

        let db = JsonFileDocumentDatabase::open(&path).await.unwrap();
        let agents = db
            .create_collection("agents", Arc::new(IdentityLoader))
            .await
            .unwrap();
        agents
            .insert_one(Document::with_identity("a1", Version::new(0, 1, 0)))
            .await
            .unwrap();
        db.close().await.unwrap();

        let db = JsonFileDocumentDatabase::open(&path).await.unwrap();
        let stored = db.raw_documents("agents").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id(), Some("a1"));
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(&path, br#"{"agents": {"not": "an array"}}"#).unwrap();

        let result = JsonFileDocumentDatabase::open(&path).await;
        assert!(matches!(result, Err(Error::InvalidDocument(_))));
    }
}
