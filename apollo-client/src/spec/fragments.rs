use apollo_compiler::Node;
use apollo_compiler::ast;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use crate::spec::FragmentSpread;
use crate::spec::InlineFragment;
use crate::spec::Query;
use crate::spec::RECURSION_LIMIT;
use crate::spec::Selection;
use crate::spec::SpecError;
use crate::spec::selection::selection_set_from_ast;

/// A named fragment definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fragment {
    pub name: String,
    pub type_condition: String,
    pub selection_set: Vec<Selection>,
}

impl Fragment {
    pub(crate) fn from_ast(definition: &Node<ast::FragmentDefinition>) -> Result<Self, SpecError> {
        Ok(Fragment {
            name: definition.name.as_str().to_string(),
            type_condition: definition.type_condition.as_str().to_string(),
            selection_set: selection_set_from_ast(&definition.selection_set, 0)?,
        })
    }
}

/// Fragments known to a client, independent of any one document.
///
/// Registering a name twice keeps the last definition.
#[derive(Debug, Clone, Default)]
pub struct FragmentRegistry {
    fragments: IndexMap<String, Fragment>,
}

impl FragmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        type_condition: impl Into<String>,
        selection_set: Vec<Selection>,
    ) {
        self.register_fragment(Fragment {
            name: name.into(),
            type_condition: type_condition.into(),
            selection_set,
        });
    }

    pub fn register_fragment(&mut self, fragment: Fragment) {
        if self.fragments.contains_key(&fragment.name) {
            tracing::debug!(name = %fragment.name, "overwriting registered fragment");
        }
        self.fragments.insert(fragment.name.clone(), fragment);
    }

    /// Registers every `fragment X on T { .. }` definition of `source`.
    ///
    /// Operations in the document are ignored. Returns the number of fragments registered.
    pub fn register_document(&mut self, source: &str) -> Result<usize, SpecError> {
        let document = ast::Document::parse(source, "fragments.graphql")
            .map_err(|invalid| SpecError::ParsingError(invalid.errors.to_string()))?;
        let mut registered = 0;
        for definition in &document.definitions {
            if let ast::Definition::FragmentDefinition(definition) = definition {
                self.register_fragment(Fragment::from_ast(definition)?);
                registered += 1;
            }
        }
        Ok(registered)
    }

    pub fn get(&self, name: &str) -> Option<&Fragment> {
        self.fragments.get(name)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Replaces every fragment spread of `query` by an inline fragment carrying
    /// the fragment's type condition.
    ///
    /// Definitions from the query's own document take precedence over registered ones.
    pub fn resolve(&self, query: &Query) -> Result<Query, SpecError> {
        let resolver = Resolver {
            local: &query.fragments,
            registry: self,
        };
        let mut visiting = Vec::new();
        let selection_set = resolver.resolve_selection_set(&query.selection_set, &mut visiting, 0)?;
        Ok(Query {
            kind: query.kind,
            name: query.name.clone(),
            variable_definitions: query.variable_definitions.clone(),
            selection_set,
            fragments: IndexMap::new(),
        })
    }
}

struct Resolver<'a> {
    local: &'a IndexMap<String, Fragment>,
    registry: &'a FragmentRegistry,
}

impl<'a> Resolver<'a> {
    fn lookup(&self, name: &str) -> Option<&'a Fragment> {
        self.local.get(name).or_else(|| self.registry.get(name))
    }

    fn resolve_selection_set(
        &self,
        selection_set: &[Selection],
        visiting: &mut Vec<&'a str>,
        depth: usize,
    ) -> Result<Vec<Selection>, SpecError> {
        if depth > RECURSION_LIMIT {
            tracing::error!("fragment resolution recursion limit({RECURSION_LIMIT}) exceeded");
            return Err(SpecError::RecursionLimitExceeded);
        }

        let mut resolved = Vec::with_capacity(selection_set.len());
        for selection in selection_set {
            resolved.push(match selection {
                Selection::Field(field) => {
                    let mut field = field.clone();
                    if let Some(selection_set) = &field.selection_set {
                        field.selection_set =
                            Some(self.resolve_selection_set(selection_set, visiting, depth + 1)?);
                    }
                    Selection::Field(field)
                }
                Selection::InlineFragment(inline_fragment) => {
                    Selection::InlineFragment(InlineFragment {
                        type_condition: inline_fragment.type_condition.clone(),
                        include_skip: inline_fragment.include_skip.clone(),
                        selection_set: self.resolve_selection_set(
                            &inline_fragment.selection_set,
                            visiting,
                            depth + 1,
                        )?,
                    })
                }
                Selection::FragmentSpread(FragmentSpread { name, include_skip }) => {
                    let fragment = self
                        .lookup(name)
                        .ok_or_else(|| SpecError::UnknownFragment(name.clone()))?;
                    if visiting.contains(&fragment.name.as_str()) {
                        tracing::error!(fragment = %name, "fragment spreads form a cycle");
                        return Err(SpecError::RecursionLimitExceeded);
                    }
                    visiting.push(fragment.name.as_str());
                    let selection_set =
                        self.resolve_selection_set(&fragment.selection_set, visiting, depth + 1)?;
                    visiting.pop();
                    Selection::InlineFragment(InlineFragment {
                        type_condition: Some(fragment.type_condition.clone()),
                        include_skip: include_skip.clone(),
                        selection_set,
                    })
                }
            });
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Field;

    #[test]
    fn spreads_become_inline_fragments() {
        let mut registry = FragmentRegistry::new();
        registry
            .register_document("fragment textFragment on Comment { text __typename }")
            .unwrap();
        let query =
            Query::parse("query { entry { comments { ...textFragment } } }").unwrap();
        let resolved = registry.resolve(&query).unwrap();

        insta::assert_snapshot!(resolved.to_string(), @r###"
        query {
          entry {
            comments {
              ... on Comment {
                text
                __typename
              }
            }
          }
        }
        "###);
    }

    #[test]
    fn document_fragments_win_over_registered_ones() {
        let mut registry = FragmentRegistry::new();
        registry.register("info", "Entry", vec![Selection::Field(Field::leaf("score"))]);
        let query = Query::parse("{ entry { ...info } } fragment info on Entry { id }").unwrap();
        let resolved = registry.resolve(&query).unwrap();
        let Selection::Field(entry) = &resolved.selection_set[0] else {
            panic!("expected a field");
        };
        assert_eq!(
            entry.selection_set.as_deref(),
            Some(
                &[Selection::InlineFragment(InlineFragment {
                    type_condition: Some("Entry".into()),
                    include_skip: Default::default(),
                    selection_set: vec![Selection::Field(Field::leaf("id"))],
                })][..]
            )
        );
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = FragmentRegistry::new();
        registry.register("info", "Entry", vec![Selection::Field(Field::leaf("score"))]);
        registry.register("info", "Entry", vec![Selection::Field(Field::leaf("id"))]);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("info").unwrap().selection_set,
            vec![Selection::Field(Field::leaf("id"))]
        );
    }

    #[test]
    fn unknown_fragment() {
        let registry = FragmentRegistry::new();
        let query = Query::parse("{ entry { ...missing } }").unwrap();
        assert!(matches!(
            registry.resolve(&query),
            Err(SpecError::UnknownFragment(name)) if name == "missing"
        ));
    }

    #[test]
    fn cycles_are_rejected() {
        let registry = FragmentRegistry::new();
        let query = Query::parse(
            "{ entry { ...a } } fragment a on Entry { b { ...b } } fragment b on Entry { a { ...a } }",
        )
        .unwrap();
        assert!(matches!(
            registry.resolve(&query),
            Err(SpecError::RecursionLimitExceeded)
        ));
    }
}
