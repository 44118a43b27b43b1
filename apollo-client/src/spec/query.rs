//! Query representation.
//!
//! Documents are parsed with `apollo-compiler` and converted once into the
//! selection model used by the store, so the cache never walks the AST.

use std::collections::HashSet;
use std::fmt;

use apollo_compiler::ast;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;

use crate::json_ext::Object;
use crate::spec::Fragment;
use crate::spec::InputValue;
use crate::spec::Selection;
use crate::spec::SpecError;
use crate::spec::selection::selection_set_from_ast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Query,
    Mutation,
}

impl OperationKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub name: String,
    /// The declared type, as written (`Int!`, `[String]`).
    pub ty: String,
    pub default_value: Option<InputValue>,
}

/// A parsed operation, plus the fragment definitions found in the same document.
///
/// Immutable once built; shared between watches and in-flight requests through `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variable_definitions: Vec<VariableDefinition>,
    pub selection_set: Vec<Selection>,
    pub fragments: IndexMap<String, Fragment>,
}

impl Query {
    /// Parses a document holding a single operation.
    pub fn parse(source: impl Into<String>) -> Result<Self, SpecError> {
        Self::parse_operation(source, None)
    }

    /// Parses a document and selects the operation named `operation_name`, or
    /// the only operation when no name is given.
    pub fn parse_operation(
        source: impl Into<String>,
        operation_name: Option<&str>,
    ) -> Result<Self, SpecError> {
        let source = source.into();
        let document = ast::Document::parse(source, "query.graphql").map_err(|invalid| {
            let errors = invalid.errors.to_string();
            tracing::debug!("parsing error(s): {}", errors);
            SpecError::ParsingError(errors)
        })?;

        let mut fragments = IndexMap::new();
        let mut operations = Vec::new();
        for definition in &document.definitions {
            match definition {
                ast::Definition::OperationDefinition(operation) => operations.push(operation),
                ast::Definition::FragmentDefinition(fragment) => {
                    let fragment = Fragment::from_ast(fragment)?;
                    fragments.insert(fragment.name.clone(), fragment);
                }
                _ => {}
            }
        }

        let operation = match operation_name {
            Some(name) => operations
                .into_iter()
                .find(|operation| operation.name.as_ref().is_some_and(|n| n.as_str() == name))
                .ok_or_else(|| SpecError::UnknownOperation(name.to_string()))?,
            None if operations.len() == 1 => operations.remove(0),
            None if operations.is_empty() => return Err(SpecError::MissingOperation),
            None => return Err(SpecError::AmbiguousOperation),
        };

        let kind = match operation.operation_type {
            ast::OperationType::Query => OperationKind::Query,
            ast::OperationType::Mutation => OperationKind::Mutation,
            ast::OperationType::Subscription => return Err(SpecError::SubscriptionNotSupported),
        };

        Ok(Query {
            kind,
            name: operation.name.as_ref().map(|name| name.as_str().to_string()),
            variable_definitions: operation
                .variables
                .iter()
                .map(|variable| VariableDefinition {
                    name: variable.name.as_str().to_string(),
                    ty: variable.ty.to_string(),
                    default_value: variable
                        .default_value
                        .as_ref()
                        .map(|value| InputValue::from_ast(value)),
                })
                .collect(),
            selection_set: selection_set_from_ast(&operation.selection_set, 0)?,
            fragments,
        })
    }

    pub fn operation_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_mutation(&self) -> bool {
        self.kind == OperationKind::Mutation
    }

    /// Fills in declared default values for the variables the caller left out.
    pub fn variables_with_defaults(&self, variables: &Object) -> Object {
        let mut resolved = Object::new();
        for definition in &self.variable_definitions {
            if variables.contains_key(definition.name.as_str()) {
                continue;
            }
            if let Some(value) = definition
                .default_value
                .as_ref()
                .and_then(|default| default.resolve(&Object::new()))
            {
                resolved.insert(ByteString::from(definition.name.as_str()), value);
            }
        }
        for (key, value) in variables.iter() {
            resolved.insert(key.clone(), value.clone());
        }
        resolved
    }

    /// Drops the variable and fragment definitions the selection set no longer
    /// uses, as required for a document derived from a larger one to validate.
    pub fn retain_used_definitions(&mut self) {
        let mut used = UsedDefinitions::default();
        used.selection_set(&self.selection_set, &self.fragments);
        self.variable_definitions
            .retain(|definition| used.variables.contains(&definition.name));
        self.fragments.retain(|name, _| used.fragments.contains(name));
    }

    /// The entries of `variables` this operation declares.
    pub fn declared_variables(&self, variables: &Object) -> Object {
        let mut declared = Object::new();
        for (name, value) in variables.iter() {
            if self
                .variable_definitions
                .iter()
                .any(|definition| definition.name == name.as_str())
            {
                declared.insert(name.clone(), value.clone());
            }
        }
        declared
    }
}

#[derive(Default)]
struct UsedDefinitions {
    variables: HashSet<String>,
    fragments: HashSet<String>,
}

impl UsedDefinitions {
    fn selection_set(&mut self, selection_set: &[Selection], fragments: &IndexMap<String, Fragment>) {
        for selection in selection_set {
            match selection {
                Selection::Field(field) => {
                    field.include_skip.collect_variables(&mut self.variables);
                    for (_, value) in &field.arguments {
                        value.collect_variables(&mut self.variables);
                    }
                    if let Some(selection_set) = &field.selection_set {
                        self.selection_set(selection_set, fragments);
                    }
                }
                Selection::InlineFragment(inline_fragment) => {
                    inline_fragment
                        .include_skip
                        .collect_variables(&mut self.variables);
                    self.selection_set(&inline_fragment.selection_set, fragments);
                }
                Selection::FragmentSpread(spread) => {
                    spread.include_skip.collect_variables(&mut self.variables);
                    if self.fragments.insert(spread.name.clone())
                        && let Some(fragment) = fragments.get(&spread.name)
                    {
                        self.selection_set(&fragment.selection_set, fragments);
                    }
                }
            }
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.as_str())?;
        if let Some(name) = &self.name {
            write!(f, " {name}")?;
        }
        if !self.variable_definitions.is_empty() {
            f.write_str("(")?;
            for (index, variable) in self.variable_definitions.iter().enumerate() {
                if index > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "${}: {}", variable.name, variable.ty)?;
                if let Some(default) = &variable.default_value {
                    write!(f, " = {default}")?;
                }
            }
            f.write_str(")")?;
        }
        f.write_str(" ")?;
        write_selection_set(f, &self.selection_set, 0)?;
        for fragment in self.fragments.values() {
            write!(f, "\n\n{fragment}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fragment {} on {} ", self.name, self.type_condition)?;
        write_selection_set(f, &self.selection_set, 0)
    }
}

pub(crate) fn write_selection_set(
    f: &mut fmt::Formatter<'_>,
    selection_set: &[Selection],
    indent: usize,
) -> fmt::Result {
    f.write_str("{\n")?;
    for selection in selection_set {
        write_indent(f, indent + 1)?;
        match selection {
            Selection::Field(field) => {
                if let Some(alias) = &field.alias {
                    write!(f, "{alias}: ")?;
                }
                f.write_str(&field.name)?;
                if !field.arguments.is_empty() {
                    f.write_str("(")?;
                    for (index, (name, value)) in field.arguments.iter().enumerate() {
                        if index > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{name}: {value}")?;
                    }
                    f.write_str(")")?;
                }
                f.write_str(&field.include_skip.directives())?;
                if let Some(selection_set) = &field.selection_set {
                    f.write_str(" ")?;
                    write_selection_set(f, selection_set, indent + 1)?;
                }
            }
            Selection::InlineFragment(inline_fragment) => {
                f.write_str("...")?;
                if let Some(type_condition) = &inline_fragment.type_condition {
                    write!(f, " on {type_condition}")?;
                }
                f.write_str(&inline_fragment.include_skip.directives())?;
                f.write_str(" ")?;
                write_selection_set(f, &inline_fragment.selection_set, indent + 1)?;
            }
            Selection::FragmentSpread(spread) => {
                write!(f, "...{}", spread.name)?;
                f.write_str(&spread.include_skip.directives())?;
            }
        }
        f.write_str("\n")?;
    }
    write_indent(f, indent)?;
    f.write_str("}")
}

fn write_indent(f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    for _ in 0..indent {
        f.write_str("  ")?;
    }
    Ok(())
}
