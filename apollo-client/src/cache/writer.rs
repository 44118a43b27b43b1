use indexmap::IndexMap;
use indexmap::IndexSet;

use crate::cache::IdentityStrategy;
use crate::cache::NormalizedStore;
use crate::cache::ROOT_MUTATION;
use crate::cache::ROOT_QUERY;
use crate::cache::WriteError;
use crate::cache::identity::generated_id;
use crate::cache::store::DraftValue;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::spec::Query;
use crate::spec::Selection;
use crate::spec::TYPENAME;

/// Outcome of a successful [`write_result`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteResult {
    /// Every identity the response described, whether or not its record changed.
    pub touched: IndexSet<String>,
    /// The touched identities whose record changed.
    pub changed: IndexSet<String>,
}

/// Normalizes `data`, the result of `query` run with `variables`, into `store`.
///
/// The whole batch of records is built before anything is merged: a response
/// that does not match the selection leaves the store untouched.
#[tracing::instrument(skip_all, level = "trace", fields(operation = query.operation_name()))]
pub fn write_result(
    store: &mut NormalizedStore,
    identity: &dyn IdentityStrategy,
    query: &Query,
    variables: &Object,
    data: &Object,
) -> Result<WriteResult, WriteError> {
    let root = if query.is_mutation() {
        ROOT_MUTATION
    } else {
        ROOT_QUERY
    };

    let mut writer = Writer {
        identity,
        variables,
        batch: IndexMap::new(),
    };
    writer.batch.entry(root.to_string()).or_default();
    writer.write_selection_set(root, data, &query.selection_set, &Path::empty(), false)?;

    let mut result = WriteResult::default();
    for (identity, fields) in writer.batch {
        let id = store.intern_identity(&identity);
        let fields: Vec<_> = fields
            .into_iter()
            .map(|(key, value)| (store.intern_field_key(&key), store.intern_value(value)))
            .collect();
        if store.merge(id, fields) {
            result.changed.insert(identity.clone());
        }
        result.touched.insert(identity);
    }
    tracing::trace!(
        touched = result.touched.len(),
        changed = result.changed.len(),
        "wrote result"
    );
    Ok(result)
}

struct Writer<'a> {
    identity: &'a dyn IdentityStrategy,
    variables: &'a Object,
    batch: IndexMap<String, IndexMap<String, DraftValue>>,
}

impl Writer<'_> {
    fn write_selection_set(
        &mut self,
        data_id: &str,
        object: &Object,
        selection_set: &[Selection],
        path: &Path,
        in_fragment: bool,
    ) -> Result<(), WriteError> {
        for selection in selection_set {
            match selection {
                Selection::Field(field) => {
                    if field.include_skip.should_skip(self.variables) {
                        continue;
                    }
                    let response_key = field.response_key();
                    let Some(value) = object.get(response_key) else {
                        if in_fragment {
                            continue;
                        }
                        return Err(WriteError::MissingField {
                            field: response_key.to_string(),
                            path: path.to_string(),
                        });
                    };
                    let storage_key = field.storage_key(self.variables);
                    let value = self.write_value(
                        generated_id(data_id, &storage_key),
                        value,
                        field.selection_set.as_deref(),
                        &path.join(response_key),
                    )?;
                    self.batch
                        .entry(data_id.to_string())
                        .or_default()
                        .insert(storage_key, value);
                }
                Selection::InlineFragment(inline_fragment) => {
                    if inline_fragment.include_skip.should_skip(self.variables) {
                        continue;
                    }
                    let typename = object.get(TYPENAME).and_then(Value::as_str);
                    if let (Some(condition), Some(typename)) =
                        (&inline_fragment.type_condition, typename)
                        && condition != typename
                    {
                        continue;
                    }
                    self.write_selection_set(
                        data_id,
                        object,
                        &inline_fragment.selection_set,
                        path,
                        true,
                    )?;
                }
                Selection::FragmentSpread(spread) => {
                    return Err(WriteError::UnresolvedFragment(spread.name.clone()));
                }
            }
        }
        Ok(())
    }

    fn write_value(
        &mut self,
        generated: String,
        value: &Value,
        selection_set: Option<&[Selection]>,
        path: &Path,
    ) -> Result<DraftValue, WriteError> {
        let Some(selection_set) = selection_set else {
            if let Value::Array(items) = value
                && items.iter().any(Value::is_object)
            {
                return Err(WriteError::MalformedSelection {
                    path: path.to_string(),
                    expected: "a list of scalars".to_string(),
                });
            }
            return Ok(DraftValue::Scalar(value.clone()));
        };

        match value {
            Value::Null => Ok(DraftValue::Scalar(Value::Null)),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    self.write_value(
                        format!("{generated}.{index}"),
                        item,
                        Some(selection_set),
                        &path.join(index),
                    )
                })
                .collect::<Result<Vec<_>, _>>()
                .map(DraftValue::List),
            Value::Object(object) => {
                let (id, is_generated) = match self.identity.identify(object) {
                    Some(id) => (id, false),
                    None => (generated, true),
                };
                self.batch.entry(id.clone()).or_default();
                self.write_selection_set(&id, object, selection_set, path, false)?;
                Ok(DraftValue::Reference {
                    id,
                    generated: is_generated,
                })
            }
            _ => Err(WriteError::MalformedSelection {
                path: path.to_string(),
                expected: "an object or a list of objects".to_string(),
            }),
        }
    }
}
