//! JSON helpers shared by the store, the transport and the public result types.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

/// A path into a GraphQL response, as found in [`crate::graphql::Error::path`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

/// One step of a [`Path`]: either an object key or a list index.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// A list index.
    Index(usize),

    /// An object key.
    Key(String),
}

impl Path {
    pub fn empty() -> Self {
        Path(Vec::new())
    }

    pub(crate) fn join(&self, element: impl Into<PathElement>) -> Self {
        let mut elements = self.0.clone();
        elements.push(element.into());
        Path(elements)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for PathElement {
    fn from(key: &str) -> Self {
        PathElement::Key(key.to_string())
    }
}

impl From<usize> for PathElement {
    fn from(index: usize) -> Self {
        PathElement::Index(index)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for element in &self.0 {
            f.write_str("/")?;
            match element {
                PathElement::Index(index) => write!(f, "{index}")?,
                PathElement::Key(key) => f.write_str(key)?,
            }
        }
        Ok(())
    }
}

pub(crate) trait ValueExt {
    /// Returns a copy of this value with every object's keys sorted, recursively.
    fn canonical(&self) -> Value;

    /// Serializes the canonical form of this value.
    fn to_canonical_string(&self) -> String;
}

impl ValueExt for Value {
    fn canonical(&self) -> Value {
        match self {
            Value::Object(object) => Value::Object(canonical_object(object)),
            Value::Array(items) => Value::Array(items.iter().map(ValueExt::canonical).collect()),
            other => other.clone(),
        }
    }

    fn to_canonical_string(&self) -> String {
        // serializing a json value cannot fail: keys are always strings
        serde_json::to_string(&self.canonical()).unwrap_or_default()
    }
}

/// Sorts the keys of `object` recursively.
pub(crate) fn canonical_object(object: &Object) -> Object {
    let mut entries: Vec<(&ByteString, &Value)> = object.iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.as_str().cmp(b.as_str()));
    let mut sorted = Object::new();
    for (key, value) in entries {
        sorted.insert(key.clone(), value.canonical());
    }
    sorted
}

/// Returns `base` with every entry of `overrides` inserted on top of it.
pub(crate) fn merge_objects(base: &Object, overrides: &Object) -> Object {
    let mut merged = base.clone();
    for (key, value) in overrides.iter() {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn canonical_sorts_nested_keys() {
        let value = json!({"b": {"z": 1, "a": [{"y": true, "x": null}]}, "a": "first"});
        assert_eq!(
            value.to_canonical_string(),
            r#"{"a":"first","b":{"a":[{"x":null,"y":true}],"z":1}}"#
        );
    }

    #[test]
    fn insertion_order_does_not_change_canonical_form() {
        let left = json!({"start": 0, "limit": 10});
        let right = json!({"limit": 10, "start": 0});
        assert_eq!(left.to_canonical_string(), right.to_canonical_string());
    }

    #[test]
    fn path_display() {
        let path = Path::empty().join("entry").join("comments").join(3usize);
        assert_eq!(path.to_string(), "/entry/comments/3");
        assert_eq!(Path::empty().to_string(), "/");
    }

    #[test]
    fn merge_overrides_keys() {
        let base = json!({"start": 0, "limit": 10});
        let overrides = json!({"start": 10});
        let merged = merge_objects(
            base.as_object().unwrap(),
            overrides.as_object().unwrap(),
        );
        assert_eq!(Value::Object(merged), json!({"start": 10, "limit": 10}));
    }
}
