//! Integration tests for store migrations over a JSON file database
//!
//! The scenario throughout is a collection at 0.3.0 with two historical
//! schema changes:
//!
//! - 0.1.0 -> 0.2.0 adds `enabled = true`
//! - 0.2.0 -> 0.3.0 renames `condition` to `when`

use std::path::Path;
use std::sync::Arc;

use docket_core::{Document, Error, Version};
use docket_engine::{MigrationChain, MigrationStatus, StoreMigrationHelper};
use docket_storage::{
    DocumentDatabase, JsonFileDocumentDatabase, Where, FAILED_MIGRATIONS_COLLECTION,
    METADATA_COLLECTION,
};
use serde_json::{json, Value};
use tempfile::TempDir;

// ============================================================================
// Helpers
// ============================================================================

const STORE: &str = "rules";
const COLLECTION: &str = "rules";

fn v(major: u64, minor: u64, patch: u64) -> Version {
    Version::new(major, minor, patch)
}

fn current() -> Version {
    v(0, 3, 0)
}

fn chain() -> Arc<MigrationChain> {
    let chain = MigrationChain::builder(COLLECTION, current())
        .step(v(0, 1, 0), v(0, 2, 0), |mut doc: Document| async move {
            if doc.get("broken").is_some() {
                return Ok(None);
            }
            doc.insert("enabled", Value::Bool(true));
            doc.set_version(Version::new(0, 2, 0));
            Ok(Some(doc))
        })
        .step(v(0, 2, 0), v(0, 3, 0), |mut doc: Document| async move {
            doc.rename("condition", "when");
            doc.set_version(Version::new(0, 3, 0));
            Ok(Some(doc))
        })
        .build()
        .unwrap();
    Arc::new(chain)
}

/// Seed a database file holding `records` and a metadata stamp of `stamped`
fn seed(path: &Path, stamped: &str, records: Value) {
    let mut contents = serde_json::Map::new();
    contents.insert(
        METADATA_COLLECTION.to_string(),
        json!([{"id": STORE, "version": "0.1.0", "last_known_version": stamped}]),
    );
    contents.insert(COLLECTION.to_string(), records);
    std::fs::write(path, serde_json::to_vec_pretty(&contents).unwrap()).unwrap();
}

fn legacy_records() -> Value {
    json!([
        {"id": "r1", "version": "0.1.0", "condition": "user greets", "action": "greet back"},
        {"id": "r2", "version": "0.2.0", "condition": "user leaves", "action": "say bye", "enabled": false},
    ])
}

async fn open_helper_run(path: &Path, allow: bool) -> (JsonFileDocumentDatabase, Result<MigrationStatus, Error>) {
    let db = JsonFileDocumentDatabase::open(path).await.unwrap();
    let chain = chain();
    let status = StoreMigrationHelper::new(&db, STORE, current(), allow)
        .collection(COLLECTION, chain)
        .run()
        .await;
    (db, status)
}

// ============================================================================
// Refusal
// ============================================================================

mod refusal {
    use super::*;

    #[tokio::test]
    async fn test_refused_migration_leaves_file_byte_identical() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.json");
        seed(&path, "0.1.0", legacy_records());
        let before = std::fs::read(&path).unwrap();

        let (db, status) = open_helper_run(&path, false).await;
        match status {
            Err(Error::MigrationRequired { store, from, to }) => {
                assert_eq!(store, STORE);
                assert_eq!(from, "0.1.0");
                assert_eq!(to, "0.3.0");
            }
            other => panic!("expected MigrationRequired, got {:?}", other),
        }
        db.close().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_newer_data_leaves_file_byte_identical() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.json");
        seed(&path, "0.9.0", json!([]));
        let before = std::fs::read(&path).unwrap();

        let (db, status) = open_helper_run(&path, true).await;
        assert!(matches!(status, Err(Error::ServerOutdated { .. })));
        db.close().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_gap_aborts_without_partial_rewrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.json");
        seed(
            &path,
            "0.1.0",
            json!([
                {"id": "r1", "version": "0.1.0", "condition": "c", "action": "a"},
                {"id": "r0", "version": "0.0.1", "condition": "c", "action": "a"},
            ]),
        );
        let before = std::fs::read(&path).unwrap();

        let (db, status) = open_helper_run(&path, true).await;
        assert!(status.unwrap_err().is_migration_gap());
        db.close().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), before);
    }
}

// ============================================================================
// Permitted migration
// ============================================================================

mod permitted {
    use super::*;

    #[tokio::test]
    async fn test_migrated_records_match_fresh_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.json");
        seed(&path, "0.1.0", legacy_records());

        let (db, status) = open_helper_run(&path, true).await;
        assert_eq!(
            status.unwrap(),
            MigrationStatus::Migrated {
                from: v(0, 1, 0),
                to: v(0, 3, 0),
                migrated: 2,
                failed: 0,
            }
        );

        let stored = db.raw_documents(COLLECTION).await.unwrap();
        let expected = vec![
            Document::from_value(json!({
                "id": "r1", "version": "0.3.0", "when": "user greets",
                "action": "greet back", "enabled": true
            }))
            .unwrap(),
            Document::from_value(json!({
                "id": "r2", "version": "0.3.0", "when": "user leaves",
                "action": "say bye", "enabled": false
            }))
            .unwrap(),
        ];
        assert_eq!(stored, expected);
        db.close().await.unwrap();

        // A second open finds the store current.
        let (db, status) = open_helper_run(&path, false).await;
        assert_eq!(status.unwrap(), MigrationStatus::UpToDate);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_lazy_reads_match_migrated_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.json");
        seed(&path, "0.3.0", legacy_records());

        // Stamped current, so no rewrite; legacy rows heal on read.
        let (db, status) = open_helper_run(&path, false).await;
        assert_eq!(status.unwrap(), MigrationStatus::UpToDate);

        let rules = db.get_collection(COLLECTION, chain()).await.unwrap();
        let r1 = rules.find_one(&Where::eq("id", "r1")).await.unwrap().unwrap();
        assert_eq!(r1.version().unwrap(), current());
        assert_eq!(r1.get_str("when"), Some("user greets"));
        assert_eq!(r1.get("enabled"), Some(&Value::Bool(true)));

        // Filters apply to the loaded shape.
        let disabled = rules.find(&Where::eq("enabled", false)).await.unwrap();
        assert_eq!(disabled.len(), 1);
        assert_eq!(disabled[0].id(), Some("r2"));
    }

    #[tokio::test]
    async fn test_dropped_records_are_quarantined() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.json");
        seed(
            &path,
            "0.1.0",
            json!([
                {"id": "ok", "version": "0.1.0", "condition": "c", "action": "a"},
                {"id": "bad", "version": "0.1.0", "condition": "c", "broken": true},
            ]),
        );

        let (db, status) = open_helper_run(&path, true).await;
        assert!(matches!(
            status.unwrap(),
            MigrationStatus::Migrated {
                migrated: 1,
                failed: 1,
                ..
            }
        ));

        let stored = db.raw_documents(COLLECTION).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id(), Some("ok"));

        let failed = db.raw_documents(FAILED_MIGRATIONS_COLLECTION).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].get_str("collection"), Some(COLLECTION));
        assert_eq!(failed[0].get("document").unwrap()["id"], json!("bad"));
    }
}
