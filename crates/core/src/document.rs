//! Versioned records
//!
//! A [`Document`] is a flat mapping of field name to JSON value. Two fields
//! are mandatory on every persisted record:
//!
//! - `id`: opaque unique identifier (string)
//! - `version`: schema version of the code that wrote it (`MAJOR.MINOR.PATCH`)
//!
//! Typed stores define `serde` structs for their record shapes and convert
//! through [`Document::from_record`] / [`Document::into_record`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::contract::Version;
use crate::error::{Error, Result};

/// Name of the mandatory id field
pub const ID_FIELD: &str = "id";
/// Name of the mandatory version field
pub const VERSION_FIELD: &str = "version";

/// A versioned record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Empty document (no id/version yet)
    pub fn new() -> Self {
        Document(Map::new())
    }

    /// Document with the mandatory fields set
    pub fn with_identity(id: impl Into<String>, version: Version) -> Self {
        let mut doc = Document::new();
        doc.insert(ID_FIELD, Value::String(id.into()));
        doc.insert(VERSION_FIELD, Value::String(version.to_string()));
        doc
    }

    /// Serialize a typed record into a document
    ///
    /// # Errors
    ///
    /// Fails if the record does not serialize to a JSON object.
    pub fn from_record<T: Serialize>(record: &T) -> Result<Self> {
        match serde_json::to_value(record)? {
            Value::Object(map) => Ok(Document(map)),
            other => Err(Error::InvalidDocument(format!(
                "record serialized to {} instead of an object",
                json_type(&other)
            ))),
        }
    }

    /// Deserialize this document into a typed record
    pub fn into_record<T: DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.0))?)
    }

    /// Wrap a JSON value, which must be an object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Document(map)),
            other => Err(Error::InvalidDocument(format!(
                "expected an object, found {}",
                json_type(&other)
            ))),
        }
    }

    /// Unwrap into a JSON value
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// The record's `id`, if present and a string
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    /// The record's `id`, or `InvalidDocument`
    pub fn require_id(&self) -> Result<&str> {
        self.id()
            .ok_or_else(|| Error::InvalidDocument("record has no string 'id' field".to_string()))
    }

    /// The record's raw `version` string, if present
    pub fn version_str(&self) -> Option<&str> {
        self.0.get(VERSION_FIELD).and_then(Value::as_str)
    }

    /// The record's parsed `version`, or `InvalidDocument`
    pub fn version(&self) -> Result<Version> {
        let raw = self.version_str().ok_or_else(|| {
            Error::InvalidDocument(format!(
                "record '{}' has no string 'version' field",
                self.id().unwrap_or("?")
            ))
        })?;
        Version::parse(raw)
    }

    /// Stamp a new `version`
    pub fn set_version(&mut self, version: Version) {
        self.insert(VERSION_FIELD, Value::String(version.to_string()));
    }

    /// Check that both mandatory fields are present and well-formed
    pub fn validate(&self) -> Result<()> {
        self.require_id()?;
        self.version()?;
        Ok(())
    }

    /// Field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// String field value
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Set a field, returning the previous value
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Remove a field, returning its value
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Rename a field; no-op if absent
    pub fn rename(&mut self, from: &str, to: impl Into<String>) {
        if let Some(value) = self.0.remove(from) {
            self.0.insert(to.into(), value);
        }
    }

    /// True if the field is present (even if `null`)
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Overwrite fields with those present in `params`
    ///
    /// Fields absent from `params` are left untouched. Returns whether any
    /// field value actually changed.
    pub fn merge(&mut self, params: &Document) -> bool {
        let mut changed = false;
        for (field, value) in params.0.iter() {
            if self.0.get(field) != Some(value) {
                self.0.insert(field.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }

    /// Iterate over fields
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there are no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Document(map)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: String,
        version: Version,
        name: String,
    }

    #[test]
    fn test_document_identity_fields() {
        let doc = Document::with_identity("abc", Version::new(0, 1, 0));
        assert_eq!(doc.id(), Some("abc"));
        assert_eq!(doc.version().unwrap(), Version::new(0, 1, 0));
        doc.validate().unwrap();
    }

    #[test]
    fn test_document_validate_rejects_missing_fields() {
        let doc = Document::from_value(json!({"name": "x"})).unwrap();
        assert!(doc.validate().is_err());

        let doc = Document::from_value(json!({"id": "a", "version": "one"})).unwrap();
        assert!(matches!(doc.validate(), Err(Error::InvalidDocument(_))));
    }

    #[test]
    fn test_document_typed_round_trip() {
        let sample = Sample {
            id: "s1".to_string(),
            version: Version::new(0, 2, 0),
            name: "alpha".to_string(),
        };
        let doc = Document::from_record(&sample).unwrap();
        assert_eq!(doc.get_str("version"), Some("0.2.0"));
        assert_eq!(doc.into_record::<Sample>().unwrap(), sample);
    }

    #[test]
    fn test_document_from_non_object_fails() {
        assert!(Document::from_value(json!([1, 2])).is_err());
        assert!(Document::from_record(&42).is_err());
    }

    #[test]
    fn test_document_merge_only_touches_present_fields() {
        let mut doc = Document::from_value(json!({"id": "a", "version": "0.1.0", "x": 1, "y": 2}))
            .unwrap();
        let params = Document::from_value(json!({"y": 3})).unwrap();

        assert!(doc.merge(&params));
        assert_eq!(doc.get("x"), Some(&json!(1)));
        assert_eq!(doc.get("y"), Some(&json!(3)));

        assert!(!doc.merge(&params), "re-applying identical params changes nothing");
    }

    #[test]
    fn test_document_rename() {
        let mut doc = Document::from_value(json!({"old": true})).unwrap();
        doc.rename("old", "new");
        assert!(!doc.contains("old"));
        assert_eq!(doc.get("new"), Some(&json!(true)));

        doc.rename("missing", "other");
        assert!(!doc.contains("other"));
    }
}
