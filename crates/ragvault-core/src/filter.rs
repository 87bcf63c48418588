//! Metadata containment predicate.
//!
//! A filter matches a document when every key in the filter is present in
//! the document's metadata with an equal value. Nested objects are compared
//! by containment again, so `{"author": {"name": "x"}}` matches metadata
//! whose `author` object has `name == "x"` plus any other fields. Arrays and
//! scalars compare by equality, with numbers compared by value so `1` and
//! `1.0` are equal. The empty filter matches everything.

use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::models::Metadata;

/// A parsed metadata filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    required: Metadata,
}

impl MetadataFilter {
    /// The filter that matches every document.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn new(required: Metadata) -> Self {
        Self { required }
    }

    /// Build a filter from an arbitrary JSON value. `null` means no filter;
    /// anything other than an object is rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::any()),
            Value::Object(map) => Ok(Self::new(map)),
            other => Err(EngineError::invalid(format!(
                "filter must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        contains(metadata, &self.required)
    }
}

fn contains(haystack: &Metadata, needle: &Metadata) -> bool {
    needle.iter().all(|(key, want)| match haystack.get(key) {
        Some(have) => value_contains(have, want),
        None => false,
    })
}

fn value_contains(have: &Value, want: &Value) -> bool {
    match (have, want) {
        (Value::Object(h), Value::Object(w)) => contains(h, w),
        _ => value_eq(have, want),
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => match (x.as_u64(), y.as_u64()) {
                (Some(x), Some(y)) => x == y,
                _ => x.as_f64() == y.as_f64(),
            },
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| value_eq(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| value_eq(v, w)))
        }
        _ => a == b,
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
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

    fn meta(v: Value) -> Metadata {
        v.as_object().cloned().unwrap()
    }

    fn filter(v: Value) -> MetadataFilter {
        MetadataFilter::from_value(v).unwrap()
    }

    #[test]
    fn test_containment_examples() {
        let doc = meta(json!({"type": "faq"}));
        assert!(filter(json!({"type": "faq"})).matches(&doc));
        assert!(filter(json!({})).matches(&doc));
        assert!(!filter(json!({"type": "faq", "lang": "en"})).matches(&doc));
    }

    #[test]
    fn test_value_must_be_equal() {
        let doc = meta(json!({"type": "faq", "n": 1}));
        assert!(!filter(json!({"type": "blog"})).matches(&doc));
        assert!(!filter(json!({"n": "1"})).matches(&doc));
        assert!(filter(json!({"n": 1})).matches(&doc));
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let doc = meta(json!({"n": 1, "ratio": 0.5, "dims": [1, 2]}));
        assert!(filter(json!({"n": 1.0})).matches(&doc));
        assert!(filter(json!({"ratio": 0.5})).matches(&doc));
        assert!(filter(json!({"dims": [1.0, 2]})).matches(&doc));
        assert!(!filter(json!({"n": 1.5})).matches(&doc));

        let doc = meta(json!({"n": 2.0}));
        assert!(filter(json!({"n": 2})).matches(&doc));
    }

    #[test]
    fn test_nested_objects_use_containment() {
        let doc = meta(json!({"author": {"name": "ada", "born": 1815}}));
        assert!(filter(json!({"author": {"name": "ada"}})).matches(&doc));
        assert!(!filter(json!({"author": {"name": "bob"}})).matches(&doc));
    }

    #[test]
    fn test_arrays_compare_by_equality() {
        let doc = meta(json!({"tags": ["a", "b"]}));
        assert!(filter(json!({"tags": ["a", "b"]})).matches(&doc));
        assert!(!filter(json!({"tags": ["a"]})).matches(&doc));
    }

    #[test]
    fn test_null_is_no_filter_and_non_objects_rejected() {
        assert!(filter(Value::Null).is_empty());
        let err = MetadataFilter::from_value(json!([1])).unwrap_err();
        assert!(err.to_string().contains("an array"));
    }
}
