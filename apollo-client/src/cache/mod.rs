//! Normalized caching of query results.

mod identity;
mod reader;
mod store;
mod writer;

use displaydoc::Display;
pub use identity::IdentityStrategy;
pub use identity::PathOnly;
pub use identity::TypenameAndId;
pub use reader::DiffResult;
pub use reader::diff;
pub use reader::read;
use serde::Deserialize;
use serde::Serialize;
pub use store::FieldKeyId;
pub use store::IdentityId;
pub use store::NormalizedStore;
pub use store::StoreRecord;
pub use store::StoreValue;
use thiserror::Error;
pub use writer::WriteResult;
pub use writer::write_result;

/// Identity of the query root record.
pub const ROOT_QUERY: &str = "ROOT_QUERY";
/// Identity of the record mutation results are written under.
pub const ROOT_MUTATION: &str = "ROOT_MUTATION";

/// A response could not be normalized into the store. Nothing was written.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum WriteError {
    /// missing field '{field}' at {path}
    MissingField { field: String, path: String },
    /// malformed selection at {path}: expected {expected}
    MalformedSelection { path: String, expected: String },
    /// fragment '{0}' must be resolved before writing
    UnresolvedFragment(String),
    /// malformed store state: {reason}
    MalformedState { reason: String },
}

/// A query could not be fully served from the store.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ReadError {
    /// missing field '{field}' at {path}
    MissingField { field: String, path: String },
}
