//! GraphQL documents, as seen by the cache.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

mod fragments;
mod query;
mod selection;

use displaydoc::Display;
pub use fragments::Fragment;
pub use fragments::FragmentRegistry;
pub use query::OperationKind;
pub use query::Query;
pub use query::VariableDefinition;
pub use selection::Condition;
pub use selection::Field;
pub use selection::FragmentSpread;
pub use selection::IncludeSkip;
pub use selection::InlineFragment;
pub use selection::InputValue;
pub use selection::Selection;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub const TYPENAME: &str = "__typename";

// The RECURSION_LIMIT is chosen to be:
//   < # expected to cause stack overflow &&
//   > # expected in a legitimate query
pub(crate) const RECURSION_LIMIT: usize = 512;

/// GraphQL document errors.
#[derive(Error, Debug, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum SpecError {
    /// parsing error: {0}
    ParsingError(String),
    /// selection processing recursion limit exceeded
    RecursionLimitExceeded,
    /// unknown fragment "{0}"
    UnknownFragment(String),
    /// Unknown operation named "{0}"
    UnknownOperation(String),
    /// document does not contain an operation
    MissingOperation,
    /// document contains several operations, an operation name is required
    AmbiguousOperation,
    /// subscription operation is not supported
    SubscriptionNotSupported,
}
