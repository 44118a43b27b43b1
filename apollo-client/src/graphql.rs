//! Types related to GraphQL requests, responses, etc.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;

use crate::error::FetchError;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::spec::Query;

/// A request handed to the [`crate::NetworkInterface`].
///
/// Carries both the structured operation and its printed text; only the
/// printed text, operation name and variables go on the wire.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// The printed operation.
    pub query: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,

    #[serde(skip_serializing_if = "Object::is_empty")]
    pub variables: Object,

    /// The operation the query text was printed from.
    #[serde(skip)]
    pub document: Arc<Query>,
}

#[buildstructor::buildstructor]
impl Request {
    #[builder(visibility = "pub")]
    fn new(document: Arc<Query>, variables: JsonMap<ByteString, Value>) -> Self {
        Self {
            query: document.to_string(),
            operation_name: document.name.clone(),
            variables,
            document,
        }
    }
}

/// A GraphQL response, as returned by the transport.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Response {
    /// The response data.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,

    /// The optional graphql errors encountered.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Error>,

    /// The optional graphql extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Response {
    /// Constructor
    #[builder(visibility = "pub")]
    fn new(
        data: Option<Value>,
        errors: Vec<Error>,
        extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        Self {
            data,
            errors,
            extensions,
        }
    }

    /// Create a [`Response`] from the supplied [`Value`].
    pub fn from_value(value: Value) -> Result<Response, FetchError> {
        serde_json_bytes::from_value(value).map_err(|error| FetchError::MalformedResponse {
            reason: error.to_string(),
        })
    }
}

/// A [GraphQL error](https://spec.graphql.org/October2021/#sec-Errors)
/// as may be found in the `errors` field of a GraphQL [`Response`].
///
/// Converted to (or from) JSON with serde.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Error {
    /// The error message.
    pub message: String,

    /// The locations of the error in the GraphQL document of the originating request.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub locations: Vec<Location>,

    /// If this is a field error, the JSON path to that field in [`Response::data`]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<Path>,

    /// The optional GraphQL extensions for this error.
    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

/// A location in the request that triggered a GraphQL error.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

#[buildstructor::buildstructor]
impl Error {
    /// Returns a builder that builds a GraphQL [`Error`] from its components.
    ///
    /// Builder methods:
    ///
    /// * `.message(impl Into<`[`String`]`>)`
    ///   Required.
    ///   Sets [`Error::message`].
    ///
    /// * `.location(impl Into<`[`Location`]`>)`
    ///   Optional, may be called multiple times.
    ///   Adds one item at the end of [`Error::locations`].
    ///
    /// * `.path(impl Into<`[`Path`]`>)`
    ///   Optional.
    ///   Sets [`Error::path`].
    ///
    /// * `.extension(impl Into<`[`ByteString`]`>, impl Into<`[`Value`]`>)`
    ///   Optional, may be called multiple times.
    ///   Adds one item to the [`Error::extensions`] map.
    ///
    /// * `.build()`
    ///   Finishes the builder and returns a GraphQL [`Error`].
    #[builder(visibility = "pub")]
    fn new(
        message: String,
        locations: Vec<Location>,
        path: Option<Path>,
        // Skip the `Object` type alias in order to use buildstructor’s map special-casing
        extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        Self {
            message,
            locations,
            path,
            extensions,
        }
    }
}

/// Displays (only) the error message.
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn response_from_value() {
        let response = Response::from_value(json!({
            "data": {"entry": {"value": 1}},
            "errors": [{"message": "partial", "path": ["entry", "author"]}]
        }))
        .unwrap();
        assert_eq!(response.data, Some(json!({"entry": {"value": 1}})));
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].message, "partial");
        assert_eq!(
            response.errors[0].path.as_ref().map(ToString::to_string),
            Some("/entry/author".to_string())
        );
    }

    #[test]
    fn malformed_response() {
        assert!(matches!(
            Response::from_value(json!({"errors": "nope"})),
            Err(FetchError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn request_carries_printed_query() {
        let query = Query::parse("query one($id: ID!) { node(id: $id) { id } }").unwrap();
        let request = Request::builder()
            .document(Arc::new(query))
            .variable("id", "1")
            .build();
        assert_eq!(request.operation_name.as_deref(), Some("one"));
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({
                "query": "query one($id: ID!) {\n  node(id: $id) {\n    id\n  }\n}",
                "operationName": "one",
                "variables": {"id": "1"}
            })
        );
    }

    #[test]
    fn error_builder() {
        let error = Error::builder()
            .message("boom")
            .extension("code", "FAILED")
            .build();
        assert_eq!(error.to_string(), "boom");
        assert_eq!(error.extensions.get("code"), Some(&json!("FAILED")));
    }
}
