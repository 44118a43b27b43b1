//! Client errors.
use displaydoc::Display;
use serde::Serialize;
use thiserror::Error;

pub use crate::cache::ReadError;
pub use crate::cache::WriteError;
pub use crate::configuration::ConfigurationError;
use crate::graphql;
use crate::query_manager::QueryId;
pub use crate::spec::SpecError;

/// Errors returned by the client, and attached to emitted query results.
///
/// Cloneable so that one failure can be delivered to every listener of a watch.
#[derive(Error, Display, Debug, Clone, Serialize, PartialEq)]
#[non_exhaustive]
pub enum ClientError {
    /// network error: {0}
    Network(#[from] FetchError),

    /// the response contained GraphQL errors: {0:?}
    GraphQl(Vec<graphql::Error>),

    /// invalid document: {0}
    Spec(#[from] SpecError),

    /// could not write to the store: {0}
    Write(#[from] WriteError),

    /// could not read from the store: {0}
    Read(#[from] ReadError),

    /// query {0} was stopped
    QueryStopped(QueryId),
}

impl ClientError {
    /// GraphQL errors carried by this error, if any.
    pub fn graphql_errors(&self) -> &[graphql::Error] {
        match self {
            ClientError::GraphQl(errors) => errors,
            _ => &[],
        }
    }
}

/// Error types for the transport.
///
/// Note that these relate to transport failures and not to GraphQL errors,
/// which travel inside a successful [`graphql::Response`].
#[derive(Error, Display, Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(untagged)]
#[non_exhaustive]
pub enum FetchError {
    /// HTTP fetch failed: {reason}
    Transport {
        /// The reason the fetch failed.
        reason: String,
    },

    /// response was malformed: {reason}
    MalformedResponse {
        /// The reason the deserialization failed.
        reason: String,
    },

    /// no mocked response for operation {operation}
    NoMockedResponse {
        /// The printed operation that was requested.
        operation: String,
    },

    /// the request was dropped before it completed
    Canceled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages() {
        assert_eq!(
            ClientError::from(FetchError::Transport {
                reason: "connection refused".to_string()
            })
            .to_string(),
            "network error: HTTP fetch failed: connection refused"
        );
        assert_eq!(
            ClientError::from(SpecError::UnknownFragment("textFragment".into())).to_string(),
            "invalid document: unknown fragment \"textFragment\""
        );
        assert_eq!(
            ClientError::QueryStopped(QueryId::from(3)).to_string(),
            "query 3 was stopped"
        );
    }

    #[test]
    fn graphql_errors_are_exposed() {
        let error = ClientError::GraphQl(vec![graphql::Error::builder().message("nope").build()]);
        assert_eq!(error.graphql_errors().len(), 1);
        assert!(ClientError::from(FetchError::Canceled).graphql_errors().is_empty());
    }
}
