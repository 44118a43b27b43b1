//! Identity derivation for response objects.

use std::fmt::Debug;

use serde_json_bytes::ByteString;

use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::spec::TYPENAME;

/// Derives the store identity of a response object.
///
/// Objects for which no identity can be derived are stored under a synthetic
/// identity built from the path that led to them.
pub trait IdentityStrategy: Debug + Send + Sync + 'static {
    /// The identity of `object`, or `None` to fall back to path based storage.
    fn identify(&self, object: &Object) -> Option<String>;

    /// Fields that must be selected for [`IdentityStrategy::identify`] to succeed.
    ///
    /// They are kept in the sub-selections computed by the diff engine, so that
    /// a partial fetch lands on the same identities as the original query.
    fn key_fields(&self) -> &[String] {
        &[]
    }
}

/// `Type:id` identities, built from `__typename` and one or more id fields.
///
/// With several id fields the identity becomes `Type:{"a":..,"b":..}`.
#[derive(Debug, Clone)]
pub struct TypenameAndId {
    id_fields: Vec<String>,
    key_fields: Vec<String>,
}

impl Default for TypenameAndId {
    fn default() -> Self {
        Self::new(vec!["id".to_string()])
    }
}

impl TypenameAndId {
    pub fn new(id_fields: Vec<String>) -> Self {
        let mut key_fields = vec![TYPENAME.to_string()];
        key_fields.extend(id_fields.iter().cloned());
        Self {
            id_fields,
            key_fields,
        }
    }
}

impl IdentityStrategy for TypenameAndId {
    fn identify(&self, object: &Object) -> Option<String> {
        let typename = object.get(TYPENAME)?.as_str()?;
        match self.id_fields.as_slice() {
            [] => None,
            [field] => match object.get(field.as_str())? {
                Value::String(id) => Some(format!("{typename}:{}", id.as_str())),
                Value::Number(id) => Some(format!("{typename}:{id}")),
                _ => None,
            },
            fields => {
                let mut key = Object::new();
                for field in fields {
                    match object.get(field.as_str()) {
                        None | Some(Value::Null) => return None,
                        Some(value) => {
                            key.insert(ByteString::from(field.as_str()), value.clone());
                        }
                    }
                }
                Some(format!(
                    "{typename}:{}",
                    Value::Object(key).to_canonical_string()
                ))
            }
        }
    }

    fn key_fields(&self) -> &[String] {
        &self.key_fields
    }
}

/// Never derives an identity: every object is stored under its path.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathOnly;

impl IdentityStrategy for PathOnly {
    fn identify(&self, _object: &Object) -> Option<String> {
        None
    }
}

/// Identity of an object reached through `storage_key` from the record `parent`.
pub(crate) fn generated_id(parent: &str, storage_key: &str) -> String {
    if parent.starts_with('$') {
        format!("{parent}.{storage_key}")
    } else {
        format!("${parent}.{storage_key}")
    }
}
