//! Document preparation before dispatch, and request keys.

use std::fmt;

use sha2::Digest;
use sha2::Sha256;

use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::spec::Field;
use crate::spec::FragmentRegistry;
use crate::spec::Query;
use crate::spec::Selection;
use crate::spec::SpecError;
use crate::spec::TYPENAME;

/// Stable key of a (query, variables) pair.
///
/// Identical documents with identical variables always produce the same key,
/// whatever the insertion order of the variables.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DispatchKey(Vec<u8>);

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DispatchKey")
            .field(&hex::encode(&self.0))
            .finish()
    }
}

/// Computes the [`DispatchKey`] of `query` run with `variables`.
pub fn canonicalize(query: &Query, variables: &Object) -> DispatchKey {
    let mut hasher = Sha256::new();
    hasher.update(query.to_string().as_bytes());
    // separates the document from the variables
    hasher.update([0xFF]);
    hasher.update(Value::Object(variables.clone()).to_canonical_string().as_bytes());
    DispatchKey(hasher.finalize().to_vec())
}

/// Prepares documents for the store and the network.
#[derive(Debug, Clone, Copy)]
pub struct DocumentTransform {
    pub add_typename: bool,
}

impl DocumentTransform {
    /// Inlines fragments, then injects `__typename` when configured.
    pub fn transform(&self, query: &Query, fragments: &FragmentRegistry) -> Result<Query, SpecError> {
        let resolved = fragments.resolve(query)?;
        Ok(if self.add_typename {
            add_typename(&resolved)
        } else {
            resolved
        })
    }
}

/// Adds a `__typename` field to every selection set below the operation root,
/// unless one is already selected there.
pub fn add_typename(query: &Query) -> Query {
    let mut query = query.clone();
    for selection in &mut query.selection_set {
        add_typename_to_selection(selection);
    }
    for fragment in query.fragments.values_mut() {
        add_typename_to_selection_set(&mut fragment.selection_set);
    }
    query
}

fn add_typename_to_selection(selection: &mut Selection) {
    match selection {
        Selection::Field(field) => {
            if let Some(selection_set) = &mut field.selection_set {
                add_typename_to_selection_set(selection_set);
            }
        }
        Selection::InlineFragment(inline_fragment) => {
            for selection in &mut inline_fragment.selection_set {
                add_typename_to_selection(selection);
            }
        }
        Selection::FragmentSpread(_) => {}
    }
}

fn add_typename_to_selection_set(selection_set: &mut Vec<Selection>) {
    for selection in selection_set.iter_mut() {
        add_typename_to_selection(selection);
    }
    let selected = selection_set.iter().any(|selection| {
        matches!(selection, Selection::Field(field) if field.name == TYPENAME && field.alias.is_none())
    });
    if !selected {
        selection_set.push(Selection::Field(Field::leaf(TYPENAME)));
    }
}
