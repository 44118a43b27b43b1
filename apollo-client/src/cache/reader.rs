use std::collections::HashSet;

use serde_json_bytes::ByteString;

use crate::cache::IdentityStrategy;
use crate::cache::NormalizedStore;
use crate::cache::ROOT_MUTATION;
use crate::cache::ROOT_QUERY;
use crate::cache::ReadError;
use crate::cache::StoreRecord;
use crate::cache::StoreValue;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::spec::Field;
use crate::spec::InlineFragment;
use crate::spec::Query;
use crate::spec::Selection;
use crate::spec::TYPENAME;

/// Outcome of checking a query against the store.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffResult {
    /// Whether every selected field resolved.
    pub complete: bool,
    /// Everything that could be read, shaped like the query response.
    pub result: Value,
    /// The smallest selection set, rooted at the operation, that would make
    /// the result complete. `None` when complete.
    pub missing: Option<Vec<Selection>>,
    /// Identities the diff looked up, including referenced ones that are absent.
    /// Only a write touching one of them can change this diff.
    pub dependencies: HashSet<String>,
    first_missing: Option<(String, Path)>,
}

impl DiffResult {
    /// The complete result, or the first missing field.
    pub fn into_result(self) -> Result<Value, ReadError> {
        match self.missing_error() {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }

    /// The error reported for the first missing field, if incomplete.
    pub fn missing_error(&self) -> Option<ReadError> {
        match &self.first_missing {
            Some((field, path)) if !self.complete => Some(ReadError::MissingField {
                field: field.clone(),
                path: path.to_string(),
            }),
            _ => None,
        }
    }

    /// A copy of `query` restricted to the missing selection, declaring only
    /// the variables and fragments that selection uses.
    pub fn missing_query(&self, query: &Query) -> Option<Query> {
        self.missing.as_ref().map(|missing| {
            let mut missing_query = Query {
                selection_set: missing.clone(),
                ..query.clone()
            };
            missing_query.retain_used_definitions();
            missing_query
        })
    }
}

/// Checks `query` against `store`.
#[tracing::instrument(skip_all, level = "trace", fields(operation = query.operation_name()))]
pub fn diff(
    store: &NormalizedStore,
    identity: &dyn IdentityStrategy,
    query: &Query,
    variables: &Object,
) -> DiffResult {
    let root = if query.is_mutation() {
        ROOT_MUTATION
    } else {
        ROOT_QUERY
    };
    let mut reader = Reader {
        store,
        identity,
        variables,
        first_missing: None,
        dependencies: HashSet::from([root.to_string()]),
    };
    // the root always resolves, even before anything was written
    let empty = StoreRecord::default();
    let record = store.get(root).unwrap_or(&empty);
    let (result, missing) = reader.diff_selection_set(record, &query.selection_set, &Path::empty());
    let complete = missing.is_empty();
    DiffResult {
        complete,
        result: Value::Object(result),
        missing: (!complete).then_some(missing),
        dependencies: reader.dependencies,
        first_missing: reader.first_missing,
    }
}

/// Reads `query` from `store`, failing when any selected field is missing.
pub fn read(
    store: &NormalizedStore,
    identity: &dyn IdentityStrategy,
    query: &Query,
    variables: &Object,
) -> Result<Value, ReadError> {
    diff(store, identity, query, variables).into_result()
}

enum ValueDiff {
    Complete(Value),
    Partial(Value, Vec<Selection>),
    Missing,
}

struct Reader<'a> {
    store: &'a NormalizedStore,
    identity: &'a dyn IdentityStrategy,
    variables: &'a Object,
    first_missing: Option<(String, Path)>,
    dependencies: HashSet<String>,
}

impl Reader<'_> {
    fn mark_missing(&mut self, field: &str, path: &Path) {
        if self.first_missing.is_none() {
            tracing::trace!(%path, field, "cache miss");
            self.first_missing = Some((field.to_string(), path.clone()));
        }
    }

    fn typename<'r>(&self, record: &'r StoreRecord) -> Option<&'r str> {
        match record.get(self.store.field_key(TYPENAME)?)? {
            StoreValue::Scalar(Value::String(typename)) => Some(typename.as_str()),
            _ => None,
        }
    }

    fn diff_selection_set(
        &mut self,
        record: &StoreRecord,
        selection_set: &[Selection],
        path: &Path,
    ) -> (Object, Vec<Selection>) {
        let mut result = Object::new();
        let mut missing = Vec::new();

        for selection in selection_set {
            match selection {
                Selection::Field(field) => {
                    if field.include_skip.should_skip(self.variables) {
                        continue;
                    }
                    let response_key = field.response_key();
                    let field_path = path.join(response_key);
                    let stored = self
                        .store
                        .field_key(&field.storage_key(self.variables))
                        .and_then(|key| record.get(key));
                    let Some(stored) = stored else {
                        self.mark_missing(response_key, &field_path);
                        missing.push(selection.clone());
                        continue;
                    };
                    match self.diff_value(stored, field.selection_set.as_deref(), &field_path) {
                        ValueDiff::Complete(value) => {
                            merge_value(&mut result, response_key, value);
                        }
                        ValueDiff::Partial(value, sub_selection) => {
                            merge_value(&mut result, response_key, value);
                            missing.push(Selection::Field(Field {
                                selection_set: Some(self.with_key_fields(field, sub_selection)),
                                ..field.clone()
                            }));
                        }
                        ValueDiff::Missing => {
                            self.mark_missing(response_key, &field_path);
                            missing.push(selection.clone());
                        }
                    }
                }
                Selection::InlineFragment(inline_fragment) => {
                    if inline_fragment.include_skip.should_skip(self.variables) {
                        continue;
                    }
                    if let (Some(condition), Some(typename)) =
                        (&inline_fragment.type_condition, self.typename(record))
                        && condition != typename
                    {
                        continue;
                    }
                    let (fragment_result, fragment_missing) =
                        self.diff_selection_set(record, &inline_fragment.selection_set, path);
                    for (key, value) in fragment_result.iter() {
                        merge_value(&mut result, key.as_str(), value.clone());
                    }
                    if !fragment_missing.is_empty() {
                        missing.push(Selection::InlineFragment(InlineFragment {
                            type_condition: inline_fragment.type_condition.clone(),
                            include_skip: inline_fragment.include_skip.clone(),
                            selection_set: fragment_missing,
                        }));
                    }
                }
                Selection::FragmentSpread(spread) => {
                    tracing::error!(fragment = %spread.name, "unresolved fragment spread in diff");
                    self.mark_missing(&spread.name, path);
                    missing.push(selection.clone());
                }
            }
        }
        (result, missing)
    }

    fn diff_value(
        &mut self,
        stored: &StoreValue,
        selection_set: Option<&[Selection]>,
        path: &Path,
    ) -> ValueDiff {
        match (stored, selection_set) {
            (StoreValue::Scalar(value), None) => ValueDiff::Complete(value.clone()),
            (StoreValue::Scalar(Value::Null), Some(_)) => ValueDiff::Complete(Value::Null),
            // a scalar where an object is selected, or the other way around:
            // the field was stored by a query of another shape
            (StoreValue::Scalar(_), Some(_)) | (StoreValue::Reference { .. }, None) => {
                ValueDiff::Missing
            }
            (StoreValue::Reference { id, .. }, Some(selection_set)) => {
                if let Some(name) = self.store.identity_name(*id) {
                    self.dependencies.insert(name.to_string());
                }
                let Some(record) = self.store.record(*id) else {
                    return ValueDiff::Missing;
                };
                let (result, missing) = self.diff_selection_set(record, selection_set, path);
                if missing.is_empty() {
                    ValueDiff::Complete(Value::Object(result))
                } else {
                    ValueDiff::Partial(Value::Object(result), missing)
                }
            }
            (StoreValue::List(items), selection_set) => {
                let mut values = Vec::with_capacity(items.len());
                let mut missing: Vec<Selection> = Vec::new();
                for (index, item) in items.iter().enumerate() {
                    match self.diff_value(item, selection_set, &path.join(index)) {
                        ValueDiff::Complete(value) => values.push(value),
                        ValueDiff::Partial(value, item_missing) => {
                            values.push(value);
                            for selection in item_missing {
                                if !missing.contains(&selection) {
                                    missing.push(selection);
                                }
                            }
                        }
                        ValueDiff::Missing => return ValueDiff::Missing,
                    }
                }
                if missing.is_empty() {
                    ValueDiff::Complete(Value::Array(values))
                } else {
                    ValueDiff::Partial(Value::Array(values), missing)
                }
            }
        }
    }

    /// Prepends the identity forming fields `field` selects to a missing sub-selection.
    fn with_key_fields(&self, field: &Field, mut missing: Vec<Selection>) -> Vec<Selection> {
        let Some(selection_set) = &field.selection_set else {
            return missing;
        };
        let mut key_fields = Vec::new();
        for selection in selection_set {
            if let Selection::Field(selected) = selection
                && selected.alias.is_none()
                && self.identity.key_fields().contains(&selected.name)
                && !missing.contains(selection)
            {
                key_fields.push(selection.clone());
            }
        }
        key_fields.append(&mut missing);
        key_fields
    }
}

/// Inserts `value` under `key`, merging objects selected more than once.
fn merge_value(result: &mut Object, key: &str, value: Value) {
    if let Value::Object(incoming) = &value
        && let Some(Value::Object(existing)) = result.get_mut(key)
    {
        for (key, value) in incoming.iter() {
            merge_value(existing, key.as_str(), value.clone());
        }
        return;
    }
    result.insert(ByteString::from(key), value);
}
