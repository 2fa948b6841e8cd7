//! Filter algebra for document queries
//!
//! A small query language over top-level record fields:
//!
//! | JSON form | Meaning |
//! |---|---|
//! | `{}` | every record |
//! | `{"f": {"$eq": v}}` | field `f` equals `v` |
//! | `{"f": {"$ne": v}}` | field `f` differs from `v` |
//! | `{"f": {...}, "g": {...}}` | conjunction of the field conditions |
//! | `{"$and": [w1, w2]}` | all sub-filters match |
//! | `{"$or": [w1, w2]}` | at least one sub-filter matches |
//!
//! A missing field compares as `null`. `$and: []` matches every record and
//! `$or: []` matches none.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use docket_core::{Document, Error, Result};

/// Comparison applied to one field
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals the value
    Eq(Value),
    /// Field does not equal the value
    Ne(Value),
}

impl Condition {
    fn matches(&self, actual: Option<&Value>) -> bool {
        let actual = actual.unwrap_or(&Value::Null);
        match self {
            Condition::Eq(expected) => actual == expected,
            Condition::Ne(expected) => actual != expected,
        }
    }

    fn to_json(&self) -> Value {
        let mut map = Map::new();
        match self {
            Condition::Eq(v) => map.insert("$eq".to_string(), v.clone()),
            Condition::Ne(v) => map.insert("$ne".to_string(), v.clone()),
        };
        Value::Object(map)
    }
}

/// Query filter
#[derive(Debug, Clone, PartialEq)]
pub enum Where {
    /// Conjunction of per-field conditions; empty matches everything
    Fields(BTreeMap<String, Condition>),
    /// All sub-filters match
    And(Vec<Where>),
    /// At least one sub-filter matches
    Or(Vec<Where>),
}

impl Default for Where {
    fn default() -> Self {
        Where::all()
    }
}

impl Where {
    /// Match every record
    pub fn all() -> Self {
        Where::Fields(BTreeMap::new())
    }

    /// `field == value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Where::all().and_eq(field, value)
    }

    /// `field != value`
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Where::all().and_ne(field, value)
    }

    /// All of `filters`
    pub fn and(filters: Vec<Where>) -> Self {
        Where::And(filters)
    }

    /// Any of `filters`
    pub fn or(filters: Vec<Where>) -> Self {
        Where::Or(filters)
    }

    /// Add an equality condition to a field conjunction
    ///
    /// Composite filters are wrapped in `$and`.
    pub fn and_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_condition(field.into(), Condition::Eq(value.into()))
    }

    /// Add an inequality condition to a field conjunction
    pub fn and_ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_condition(field.into(), Condition::Ne(value.into()))
    }

    fn with_condition(self, field: String, condition: Condition) -> Self {
        match self {
            Where::Fields(mut fields) if !fields.contains_key(&field) => {
                fields.insert(field, condition);
                Where::Fields(fields)
            }
            other => {
                let mut fields = BTreeMap::new();
                fields.insert(field, condition);
                Where::And(vec![other, Where::Fields(fields)])
            }
        }
    }

    /// True if this filter matches every record
    pub fn is_all(&self) -> bool {
        matches!(self, Where::Fields(fields) if fields.is_empty())
    }

    /// Evaluate against a record
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Where::Fields(fields) => fields
                .iter()
                .all(|(field, condition)| condition.matches(document.get(field))),
            Where::And(filters) => filters.iter().all(|f| f.matches(document)),
            Where::Or(filters) => filters.iter().any(|f| f.matches(document)),
        }
    }

    /// Field values pinned by `$eq` conditions that must hold for a match
    ///
    /// Used by upserts: the inserted record starts from these values.
    /// Conditions under `$or` are not definite and are skipped.
    pub fn equality_constraints(&self) -> Document {
        let mut out = Document::new();
        self.collect_equalities(&mut out);
        out
    }

    fn collect_equalities(&self, out: &mut Document) {
        match self {
            Where::Fields(fields) => {
                for (field, condition) in fields {
                    if let Condition::Eq(value) = condition {
                        out.insert(field.clone(), value.clone());
                    }
                }
            }
            Where::And(filters) => {
                for f in filters {
                    f.collect_equalities(out);
                }
            }
            Where::Or(_) => {}
        }
    }

    /// Parse the JSON form
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilter` for unknown operators or malformed operands.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::InvalidFilter(format!("expected an object, found {}", value)))?;

        let mut fields = BTreeMap::new();
        let mut composites = Vec::new();

        for (key, operand) in object {
            match key.as_str() {
                "$and" | "$or" => {
                    let items = operand.as_array().ok_or_else(|| {
                        Error::InvalidFilter(format!("{} expects an array", key))
                    })?;
                    let parsed = items
                        .iter()
                        .map(Where::from_json)
                        .collect::<Result<Vec<_>>>()?;
                    composites.push(if key == "$and" {
                        Where::And(parsed)
                    } else {
                        Where::Or(parsed)
                    });
                }
                op if op.starts_with('$') => {
                    return Err(Error::InvalidFilter(format!("unknown operator '{}'", op)));
                }
                field => {
                    fields.insert(field.to_string(), parse_condition(field, operand)?);
                }
            }
        }

        if composites.is_empty() {
            return Ok(Where::Fields(fields));
        }
        if !fields.is_empty() {
            composites.insert(0, Where::Fields(fields));
        }
        if composites.len() == 1 {
            return Ok(composites.remove(0));
        }
        Ok(Where::And(composites))
    }

    /// Render the JSON form
    pub fn to_json(&self) -> Value {
        match self {
            Where::Fields(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(field, condition)| (field.clone(), condition.to_json()))
                    .collect(),
            ),
            Where::And(filters) => {
                let mut map = Map::new();
                map.insert(
                    "$and".to_string(),
                    Value::Array(filters.iter().map(Where::to_json).collect()),
                );
                Value::Object(map)
            }
            Where::Or(filters) => {
                let mut map = Map::new();
                map.insert(
                    "$or".to_string(),
                    Value::Array(filters.iter().map(Where::to_json).collect()),
                );
                Value::Object(map)
            }
        }
    }
}

fn parse_condition(field: &str, operand: &Value) -> Result<Condition> {
    let ops = operand.as_object().ok_or_else(|| {
        Error::InvalidFilter(format!("condition on '{}' must be an object", field))
    })?;
    if ops.len() != 1 {
        return Err(Error::InvalidFilter(format!(
            "condition on '{}' must have exactly one operator",
            field
        )));
    }
    let (op, value) = ops.iter().next().ok_or_else(|| {
        Error::InvalidFilter(format!("condition on '{}' is empty", field))
    })?;
    match op.as_str() {
        "$eq" => Ok(Condition::Eq(value.clone())),
        "$ne" => Ok(Condition::Ne(value.clone())),
        other => Err(Error::InvalidFilter(format!(
            "unknown operator '{}' on '{}'",
            other, field
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(Where::all().matches(&doc(json!({"id": "a"}))));
        assert!(Where::all().is_all());
        assert!(Where::from_json(&json!({})).unwrap().is_all());
    }

    #[test]
    fn test_eq_and_ne() {
        let d = doc(json!({"id": "a", "tag": "t1"}));
        assert!(Where::eq("tag", "t1").matches(&d));
        assert!(!Where::eq("tag", "t2").matches(&d));
        assert!(Where::ne("tag", "t2").matches(&d));
        assert!(!Where::ne("tag", "t1").matches(&d));
    }

    #[test]
    fn test_missing_field_compares_as_null() {
        let d = doc(json!({"id": "a"}));
        assert!(Where::eq("description", Value::Null).matches(&d));
        assert!(Where::ne("description", "x").matches(&d));
        assert!(!Where::eq("description", "x").matches(&d));
    }

    #[test]
    fn test_field_conjunction() {
        let d = doc(json!({"condition": "c", "action": "a"}));
        let both = Where::eq("condition", "c").and_eq("action", "a");
        let mismatch = Where::eq("condition", "c").and_eq("action", "b");
        assert!(both.matches(&d));
        assert!(!mismatch.matches(&d));
    }

    #[test]
    fn test_empty_combinators() {
        let d = doc(json!({"id": "a"}));
        assert!(Where::and(vec![]).matches(&d));
        assert!(!Where::or(vec![]).matches(&d));
    }

    #[test]
    fn test_nested_combinators() {
        let d = doc(json!({"id": "b", "kind": "sdk"}));
        let f = Where::and(vec![
            Where::or(vec![Where::eq("id", "a"), Where::eq("id", "b")]),
            Where::ne("kind", "openapi"),
        ]);
        assert!(f.matches(&d));
    }

    #[test]
    fn test_and_eq_on_same_field_wraps() {
        let f = Where::eq("id", "a").and_eq("id", "b");
        assert!(matches!(f, Where::And(_)));
        assert!(!f.matches(&doc(json!({"id": "a"}))));
    }

    #[test]
    fn test_parse_json_form() {
        let f = Where::from_json(&json!({
            "agent_id": {"$eq": "x"},
            "$or": [{"tag_id": {"$eq": "t1"}}, {"tag_id": {"$eq": "t2"}}]
        }))
        .unwrap();
        assert!(f.matches(&doc(json!({"agent_id": "x", "tag_id": "t2"}))));
        assert!(!f.matches(&doc(json!({"agent_id": "y", "tag_id": "t2"}))));
    }

    #[test]
    fn test_parse_rejects_unknown_operators() {
        assert!(matches!(
            Where::from_json(&json!({"f": {"$gt": 1}})),
            Err(Error::InvalidFilter(_))
        ));
        assert!(Where::from_json(&json!({"$nor": []})).is_err());
        assert!(Where::from_json(&json!({"f": 1})).is_err());
        assert!(Where::from_json(&json!({"$and": {}})).is_err());
        assert!(Where::from_json(&json!([1])).is_err());
    }

    #[test]
    fn test_equality_constraints_skip_or_and_ne() {
        let f = Where::and(vec![
            Where::eq("name", "svc").and_ne("kind", "local"),
            Where::or(vec![Where::eq("x", 1)]),
        ]);
        let constraints = f.equality_constraints();
        assert_eq!(constraints.get("name"), Some(&json!("svc")));
        assert!(!constraints.contains("kind"));
        assert!(!constraints.contains("x"));
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            (0i64..4).prop_map(Value::from),
            "[ab]{0,2}".prop_map(Value::from),
        ]
    }

    fn arb_where() -> impl Strategy<Value = Where> {
        let leaf = prop_oneof![
            Just(Where::all()),
            ("[fg]", arb_value()).prop_map(|(f, v)| Where::eq(f, v)),
            ("[fg]", arb_value()).prop_map(|(f, v)| Where::ne(f, v)),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Where::And),
                prop::collection::vec(inner, 0..4).prop_map(Where::Or),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_json_form_preserves_semantics(
            filter in arb_where(),
            f in arb_value(),
            g in arb_value(),
        ) {
            let d = doc(json!({"f": f, "g": g}));
            let reparsed = Where::from_json(&filter.to_json()).unwrap();
            prop_assert_eq!(filter.matches(&d), reparsed.matches(&d));
        }

        #[test]
        fn prop_eq_and_ne_are_complements(field_value in arb_value(), candidate in arb_value()) {
            let d = doc(json!({"f": field_value}));
            prop_assert_ne!(
                Where::eq("f", candidate.clone()).matches(&d),
                Where::ne("f", candidate).matches(&d)
            );
        }
    }
}
