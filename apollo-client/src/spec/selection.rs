use std::collections::HashSet;
use std::fmt;

use apollo_compiler::ast;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;

use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::spec::RECURSION_LIMIT;
use crate::spec::SpecError;

/// One entry of a selection set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selection {
    Field(Field),
    InlineFragment(InlineFragment),
    FragmentSpread(FragmentSpread),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<(String, InputValue)>,
    pub include_skip: IncludeSkip,
    /// `None` for leaf fields.
    pub selection_set: Option<Vec<Selection>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InlineFragment {
    pub type_condition: Option<String>,
    pub include_skip: IncludeSkip,
    pub selection_set: Vec<Selection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FragmentSpread {
    pub name: String,
    pub include_skip: IncludeSkip,
}

/// An argument or default value as written in the document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputValue {
    Variable(String),
    Enum(String),
    /// Null, boolean, number or string literal.
    Scalar(Value),
    List(Vec<InputValue>),
    Object(Vec<(String, InputValue)>),
}

impl Selection {
    pub(crate) fn from_ast(selection: &ast::Selection, mut count: usize) -> Result<Self, SpecError> {
        if count > RECURSION_LIMIT {
            tracing::error!("selection processing recursion limit({RECURSION_LIMIT}) exceeded");
            return Err(SpecError::RecursionLimitExceeded);
        }
        count += 1;

        Ok(match selection {
            ast::Selection::Field(field) => {
                let selection_set = if field.selection_set.is_empty() {
                    None
                } else {
                    Some(selection_set_from_ast(&field.selection_set, count)?)
                };
                Selection::Field(Field {
                    alias: field.alias.as_ref().map(|alias| alias.as_str().to_string()),
                    name: field.name.as_str().to_string(),
                    arguments: field
                        .arguments
                        .iter()
                        .map(|argument| {
                            (
                                argument.name.as_str().to_string(),
                                InputValue::from_ast(&argument.value),
                            )
                        })
                        .collect(),
                    include_skip: IncludeSkip::parse(&field.directives),
                    selection_set,
                })
            }
            ast::Selection::InlineFragment(inline_fragment) => {
                Selection::InlineFragment(InlineFragment {
                    type_condition: inline_fragment
                        .type_condition
                        .as_ref()
                        .map(|name| name.as_str().to_string()),
                    include_skip: IncludeSkip::parse(&inline_fragment.directives),
                    selection_set: selection_set_from_ast(&inline_fragment.selection_set, count)?,
                })
            }
            ast::Selection::FragmentSpread(fragment_spread) => {
                Selection::FragmentSpread(FragmentSpread {
                    name: fragment_spread.fragment_name.as_str().to_string(),
                    include_skip: IncludeSkip::parse(&fragment_spread.directives),
                })
            }
        })
    }
}

pub(crate) fn selection_set_from_ast(
    selection_set: &[ast::Selection],
    count: usize,
) -> Result<Vec<Selection>, SpecError> {
    selection_set
        .iter()
        .map(|selection| Selection::from_ast(selection, count))
        .collect()
}

impl Field {
    /// A leaf field with no arguments.
    pub fn leaf(name: impl Into<String>) -> Self {
        Field {
            alias: None,
            name: name.into(),
            arguments: Vec::new(),
            include_skip: IncludeSkip::default(),
            selection_set: None,
        }
    }

    /// The key under which this field appears in a response.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// The key under which this field is stored in a record: the field name,
    /// followed by its arguments serialized with sorted keys when there are any.
    ///
    /// Arguments bound to an absent variable are left out.
    pub fn storage_key(&self, variables: &Object) -> String {
        if self.arguments.is_empty() {
            return self.name.clone();
        }
        let mut arguments = Object::new();
        for (name, value) in &self.arguments {
            if let Some(value) = value.resolve(variables) {
                arguments.insert(ByteString::from(name.as_str()), value);
            }
        }
        format!(
            "{}({})",
            self.name,
            Value::Object(arguments).to_canonical_string()
        )
    }
}

impl InputValue {
    pub(crate) fn from_ast(value: &ast::Value) -> Self {
        match value {
            ast::Value::Null => InputValue::Scalar(Value::Null),
            ast::Value::Enum(name) => InputValue::Enum(name.as_str().to_string()),
            ast::Value::Variable(name) => InputValue::Variable(name.as_str().to_string()),
            ast::Value::String(string) => InputValue::Scalar(Value::String(string.as_str().into())),
            ast::Value::Float(float) => {
                let text = float.to_string();
                InputValue::Scalar(
                    text.parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                        .map(Value::Number)
                        .unwrap_or_else(|| Value::String(text.into())),
                )
            }
            ast::Value::Int(int) => {
                let text = int.to_string();
                InputValue::Scalar(
                    text.parse::<i64>()
                        .map(Value::from)
                        .unwrap_or_else(|_| Value::String(text.into())),
                )
            }
            ast::Value::Boolean(boolean) => InputValue::Scalar(Value::Bool(*boolean)),
            ast::Value::List(items) => {
                InputValue::List(items.iter().map(|item| InputValue::from_ast(item)).collect())
            }
            ast::Value::Object(fields) => InputValue::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.as_str().to_string(), InputValue::from_ast(value)))
                    .collect(),
            ),
        }
    }

    /// Substitutes variables; `None` when the value is a variable that was not provided.
    pub fn resolve(&self, variables: &Object) -> Option<Value> {
        match self {
            InputValue::Variable(name) => variables.get(name.as_str()).cloned(),
            InputValue::Enum(name) => Some(Value::String(name.as_str().into())),
            InputValue::Scalar(value) => Some(value.clone()),
            InputValue::List(items) => Some(Value::Array(
                items
                    .iter()
                    .map(|item| item.resolve(variables).unwrap_or(Value::Null))
                    .collect(),
            )),
            InputValue::Object(fields) => {
                let mut object = Object::new();
                for (name, value) in fields {
                    if let Some(value) = value.resolve(variables) {
                        object.insert(ByteString::from(name.as_str()), value);
                    }
                }
                Some(Value::Object(object))
            }
        }
    }
}

impl InputValue {
    /// Adds the names of the variables this value refers to.
    pub(crate) fn collect_variables(&self, variables: &mut HashSet<String>) {
        match self {
            InputValue::Variable(name) => {
                variables.insert(name.clone());
            }
            InputValue::Enum(_) | InputValue::Scalar(_) => {}
            InputValue::List(items) => {
                for item in items {
                    item.collect_variables(variables);
                }
            }
            InputValue::Object(fields) => {
                for (_, value) in fields {
                    value.collect_variables(variables);
                }
            }
        }
    }
}

impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputValue::Variable(name) => write!(f, "${name}"),
            InputValue::Enum(name) => f.write_str(name),
            InputValue::Scalar(value) => {
                f.write_str(&serde_json::to_string(value).map_err(|_| fmt::Error)?)
            }
            InputValue::List(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            InputValue::Object(fields) => {
                f.write_str("{")?;
                for (index, (name, value)) in fields.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncludeSkip {
    include: Condition,
    skip: Condition,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    Yes,
    No,
    Variable(String),
}

impl Default for IncludeSkip {
    fn default() -> Self {
        Self {
            include: Condition::Yes,
            skip: Condition::No,
        }
    }
}

impl IncludeSkip {
    pub(crate) fn parse(directives: &ast::DirectiveList) -> Self {
        let mut include = None;
        let mut skip = None;
        for directive in &directives.0 {
            if include.is_none() && directive.name == "include" {
                include = Condition::parse(directive)
            }
            if skip.is_none() && directive.name == "skip" {
                skip = Condition::parse(directive)
            }
        }
        Self {
            include: include.unwrap_or(Condition::Yes),
            skip: skip.unwrap_or(Condition::No),
        }
    }

    pub(crate) fn should_skip(&self, variables: &Object) -> bool {
        // an unbound condition variable behaves as if the directive was absent
        self.skip.eval(variables).unwrap_or(false) || !self.include.eval(variables).unwrap_or(true)
    }

    pub(crate) fn collect_variables(&self, variables: &mut HashSet<String>) {
        for condition in [&self.include, &self.skip] {
            if let Condition::Variable(name) = condition {
                variables.insert(name.clone());
            }
        }
    }

    pub(crate) fn is_default(&self) -> bool {
        self.include == Condition::Yes && self.skip == Condition::No
    }

    pub(crate) fn directives(&self) -> String {
        let mut printed = String::new();
        match &self.include {
            Condition::Yes => {}
            Condition::No => printed.push_str(" @include(if: false)"),
            Condition::Variable(name) => printed.push_str(&format!(" @include(if: ${name})")),
        }
        match &self.skip {
            Condition::No => {}
            Condition::Yes => printed.push_str(" @skip(if: true)"),
            Condition::Variable(name) => printed.push_str(&format!(" @skip(if: ${name})")),
        }
        printed
    }
}

impl Condition {
    pub(crate) fn parse(directive: &ast::Directive) -> Option<Self> {
        match &**directive.specified_argument_by_name("if")? {
            ast::Value::Boolean(true) => Some(Condition::Yes),
            ast::Value::Boolean(false) => Some(Condition::No),
            ast::Value::Variable(variable) => {
                Some(Condition::Variable(variable.as_str().to_owned()))
            }
            _ => None,
        }
    }

    pub(crate) fn eval(&self, variables: &Object) -> Option<bool> {
        match self {
            Condition::Yes => Some(true),
            Condition::No => Some(false),
            Condition::Variable(variable_name) => variables
                .get(variable_name.as_str())
                .and_then(|v| v.as_bool()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    fn field(name: &str, arguments: Vec<(&str, InputValue)>) -> Field {
        Field {
            arguments: arguments
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
            ..Field::leaf(name)
        }
    }

    #[test]
    fn storage_key_without_arguments_is_the_name() {
        assert_eq!(field("entry", vec![]).storage_key(&Object::new()), "entry");
    }

    #[test]
    fn storage_key_sorts_and_resolves_arguments() {
        let comments = field(
            "comments",
            vec![
                ("start", InputValue::Variable("start".into())),
                ("limit", InputValue::Variable("limit".into())),
            ],
        );
        let variables = json!({"start": 0, "limit": 10});
        assert_eq!(
            comments.storage_key(variables.as_object().unwrap()),
            r#"comments({"limit":10,"start":0})"#
        );
    }

    #[test]
    fn storage_key_drops_unbound_variables() {
        let entry = field(
            "entry",
            vec![
                ("repoFullName", InputValue::Variable("repoName".into())),
                ("sort", InputValue::Enum("NEWEST".into())),
            ],
        );
        assert_eq!(
            entry.storage_key(&Object::new()),
            r#"entry({"sort":"NEWEST"})"#
        );
    }

    #[test]
    fn include_skip_evaluates_variables() {
        let include_skip = IncludeSkip {
            include: Condition::Variable("withText".into()),
            skip: Condition::No,
        };
        let on = json!({"withText": true});
        let off = json!({"withText": false});
        assert!(!include_skip.should_skip(on.as_object().unwrap()));
        assert!(include_skip.should_skip(off.as_object().unwrap()));
        assert!(!include_skip.should_skip(&Object::new()));
    }

    #[test]
    fn conditions_are_read_from_directives() {
        let query = crate::spec::Query::parse(
            "query q($withText: Boolean!) { text @include(if: $withText) id @skip(if: true) name }",
        )
        .unwrap();
        let conditions: Vec<_> = query
            .selection_set
            .iter()
            .map(|selection| match selection {
                Selection::Field(field) => field.include_skip.clone(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            conditions,
            vec![
                IncludeSkip {
                    include: Condition::Variable("withText".into()),
                    skip: Condition::No,
                },
                IncludeSkip {
                    include: Condition::Yes,
                    skip: Condition::Yes,
                },
                IncludeSkip::default(),
            ]
        );
        let off = json!({"withText": false});
        assert!(conditions[0].should_skip(off.as_object().unwrap()));
        assert!(conditions[1].should_skip(&Object::new()));
    }

    #[test]
    fn variables_are_collected_from_arguments_and_conditions() {
        let mut variables = HashSet::new();
        InputValue::Object(vec![
            ("after".into(), InputValue::Variable("cursor".into())),
            (
                "tags".into(),
                InputValue::List(vec![InputValue::Variable("tag".into())]),
            ),
        ])
        .collect_variables(&mut variables);
        IncludeSkip {
            include: Condition::Yes,
            skip: Condition::Variable("hidden".into()),
        }
        .collect_variables(&mut variables);
        let mut variables: Vec<_> = variables.into_iter().collect();
        variables.sort();
        assert_eq!(variables, vec!["cursor", "hidden", "tag"]);
    }

    #[test]
    fn input_values_print_as_graphql() {
        let value = InputValue::Object(vec![
            ("first".into(), InputValue::Scalar(Value::from(10))),
            ("after".into(), InputValue::Variable("cursor".into())),
            (
                "tags".into(),
                InputValue::List(vec![
                    InputValue::Enum("NEW".into()),
                    InputValue::Scalar(Value::String("x".into())),
                ]),
            ),
        ]);
        assert_eq!(
            value.to_string(),
            r#"{first: 10, after: $cursor, tags: [NEW, "x"]}"#
        );
    }
}
