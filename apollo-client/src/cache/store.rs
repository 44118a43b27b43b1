//! The normalized store.
//!
//! A flat map from identity to record. Identities and field storage keys are
//! interned, references between records are handles, and records are shared
//! through `Arc` so that a snapshot of the whole store is three pointer copies.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use indexmap::IndexSet;
use serde_json_bytes::ByteString;

use crate::cache::WriteError;
use crate::json_ext::Object;
use crate::json_ext::Value;

/// Interned identity handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityId(u32);

/// Interned field storage key handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKeyId(u32);

#[derive(Clone, Debug, PartialEq)]
pub enum StoreValue {
    /// A leaf value. Objects found here are opaque JSON scalars.
    Scalar(Value),
    /// A nested object, stored in its own record.
    Reference { id: IdentityId, generated: bool },
    List(Vec<StoreValue>),
}

/// The fields known for one identity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreRecord {
    fields: IndexMap<FieldKeyId, StoreValue>,
}

impl StoreRecord {
    pub fn get(&self, key: FieldKeyId) -> Option<&StoreValue> {
        self.fields.get(&key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldKeyId, &StoreValue)> {
        self.fields.iter().map(|(key, value)| (*key, value))
    }
}

#[derive(Clone, Debug, Default)]
struct Interner {
    strings: Arc<IndexSet<String>>,
}

impl Interner {
    fn intern(&mut self, value: &str) -> u32 {
        if let Some(index) = self.strings.get_index_of(value) {
            return index as u32;
        }
        let (index, _) = Arc::make_mut(&mut self.strings).insert_full(value.to_string());
        index as u32
    }

    fn lookup(&self, value: &str) -> Option<u32> {
        self.strings.get_index_of(value).map(|index| index as u32)
    }

    fn resolve(&self, handle: u32) -> Option<&str> {
        self.strings
            .get_index(handle as usize)
            .map(String::as_str)
    }
}

#[derive(Clone, Default)]
pub struct NormalizedStore {
    identities: Interner,
    field_keys: Interner,
    records: Arc<IndexMap<IdentityId, Arc<StoreRecord>>>,
}

impl NormalizedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy-on-write copy of the store.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.get(identity).is_some()
    }

    pub fn get(&self, identity: &str) -> Option<&StoreRecord> {
        self.identity(identity).and_then(|id| self.record(id))
    }

    pub fn record(&self, id: IdentityId) -> Option<&StoreRecord> {
        self.records.get(&id).map(Arc::as_ref)
    }

    pub fn identity(&self, identity: &str) -> Option<IdentityId> {
        self.identities.lookup(identity).map(IdentityId)
    }

    pub fn identity_name(&self, id: IdentityId) -> Option<&str> {
        self.identities.resolve(id.0)
    }

    pub fn field_key(&self, storage_key: &str) -> Option<FieldKeyId> {
        self.field_keys.lookup(storage_key).map(FieldKeyId)
    }

    pub fn field_key_name(&self, key: FieldKeyId) -> Option<&str> {
        self.field_keys.resolve(key.0)
    }

    pub fn intern_identity(&mut self, identity: &str) -> IdentityId {
        IdentityId(self.identities.intern(identity))
    }

    pub fn intern_field_key(&mut self, storage_key: &str) -> FieldKeyId {
        FieldKeyId(self.field_keys.intern(storage_key))
    }

    /// Reads one field of a record.
    pub fn field(&self, identity: &str, storage_key: &str) -> Option<&StoreValue> {
        self.get(identity)?.get(self.field_key(storage_key)?)
    }

    /// Merges `fields` into the record of `id`, field by field.
    ///
    /// Returns whether any stored value changed.
    pub fn merge(
        &mut self,
        id: IdentityId,
        fields: impl IntoIterator<Item = (FieldKeyId, StoreValue)>,
    ) -> bool {
        let records = Arc::make_mut(&mut self.records);
        let mut created = false;
        let record = records.entry(id).or_insert_with(|| {
            created = true;
            Arc::new(StoreRecord::default())
        });
        let mut changed = created;
        for (key, value) in fields {
            if record.fields.get(&key) == Some(&value) {
                continue;
            }
            tracing::trace!(identity = ?id, field = ?key, "store merge");
            Arc::make_mut(record).fields.insert(key, value);
            changed = true;
        }
        changed
    }

    /// Removes the record of `identity`. References to it become dangling.
    pub fn evict(&mut self, identity: &str) -> bool {
        match self.identity(identity) {
            Some(id) => Arc::make_mut(&mut self.records).shift_remove(&id).is_some(),
            None => false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Serializes the store: one object per identity, references as
    /// `{"type":"id","id":..,"generated":..}`, object scalars as `{"type":"json","json":..}`.
    pub fn extract(&self) -> Object {
        let mut state = Object::new();
        for (id, record) in self.records.iter() {
            let Some(name) = self.identity_name(*id) else {
                continue;
            };
            let mut fields = Object::new();
            for (key, value) in record.iter() {
                if let Some(key) = self.field_key_name(key) {
                    fields.insert(ByteString::from(key), self.encode(value));
                }
            }
            state.insert(ByteString::from(name), Value::Object(fields));
        }
        state
    }

    fn encode(&self, value: &StoreValue) -> Value {
        match value {
            StoreValue::Scalar(Value::Object(json)) => {
                let mut encoded = Object::new();
                encoded.insert(ByteString::from("type"), Value::String("json".into()));
                encoded.insert(ByteString::from("json"), Value::Object(json.clone()));
                Value::Object(encoded)
            }
            StoreValue::Scalar(scalar) => scalar.clone(),
            StoreValue::Reference { id, generated } => {
                let mut encoded = Object::new();
                encoded.insert(ByteString::from("type"), Value::String("id".into()));
                encoded.insert(
                    ByteString::from("id"),
                    Value::String(self.identity_name(*id).unwrap_or_default().into()),
                );
                encoded.insert(ByteString::from("generated"), Value::Bool(*generated));
                Value::Object(encoded)
            }
            StoreValue::List(items) => {
                Value::Array(items.iter().map(|item| self.encode(item)).collect())
            }
        }
    }

    /// Merges a state produced by [`NormalizedStore::extract`] into the store.
    ///
    /// The state is validated completely before anything is merged.
    pub fn restore(&mut self, state: &Object) -> Result<(), WriteError> {
        let mut staged = Vec::with_capacity(state.len());
        for (identity, fields) in state.iter() {
            let fields = fields.as_object().ok_or_else(|| WriteError::MalformedState {
                reason: format!("record '{}' is not an object", identity.as_str()),
            })?;
            let mut record = Vec::with_capacity(fields.len());
            for (key, value) in fields.iter() {
                record.push((key.as_str(), decode(value)?));
            }
            staged.push((identity.as_str(), record));
        }

        for (identity, record) in staged {
            let id = self.intern_identity(identity);
            let fields: Vec<(FieldKeyId, StoreValue)> = record
                .into_iter()
                .map(|(key, value)| (self.intern_field_key(key), self.intern_value(value)))
                .collect();
            self.merge(id, fields);
        }
        Ok(())
    }

    pub(crate) fn intern_value(&mut self, value: DraftValue) -> StoreValue {
        match value {
            DraftValue::Scalar(scalar) => StoreValue::Scalar(scalar),
            DraftValue::Reference { id, generated } => StoreValue::Reference {
                id: self.intern_identity(&id),
                generated,
            },
            DraftValue::List(items) => StoreValue::List(
                items
                    .into_iter()
                    .map(|item| self.intern_value(item))
                    .collect(),
            ),
        }
    }
}

impl fmt::Debug for NormalizedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NormalizedStore")
            .field("records", &self.records.len())
            .finish()
    }
}

/// A store value whose references are not interned yet.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum DraftValue {
    Scalar(Value),
    Reference { id: String, generated: bool },
    List(Vec<DraftValue>),
}

fn decode(value: &Value) -> Result<DraftValue, WriteError> {
    Ok(match value {
        Value::Array(items) => DraftValue::List(items.iter().map(decode).collect::<Result<_, _>>()?),
        Value::Object(object) => match object.get("type").and_then(Value::as_str) {
            Some("id") => DraftValue::Reference {
                id: object
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| WriteError::MalformedState {
                        reason: "reference without an id".to_string(),
                    })?
                    .to_string(),
                generated: object
                    .get("generated")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            },
            Some("json") => DraftValue::Scalar(object.get("json").cloned().unwrap_or(Value::Null)),
            _ => {
                return Err(WriteError::MalformedState {
                    reason: "objects must be encoded as references or json scalars".to_string(),
                });
            }
        },
        scalar => DraftValue::Scalar(scalar.clone()),
    })
}
