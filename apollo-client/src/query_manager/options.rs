use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;

use crate::error::ClientError;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::spec::Query;

/// Where a query may read its result from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchPolicy {
    /// Serve from the store when complete, fetch otherwise.
    #[default]
    CacheFirst,
    /// Serve from the store when complete, and always fetch.
    CacheAndNetwork,
    /// Always fetch, then write to the store.
    NetworkOnly,
    /// Never fetch.
    CacheOnly,
    /// Always fetch, and do not write the result to the store.
    NoCache,
}

/// What a query is doing, as reported with each [`QueryResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    Loading,
    Refetch,
    FetchMore,
    Poll,
    Ready,
    Error,
}

impl NetworkStatus {
    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            NetworkStatus::Loading
                | NetworkStatus::Refetch
                | NetworkStatus::FetchMore
                | NetworkStatus::Poll
        )
    }
}

/// One emission of a watched query, or the result of a one-shot operation.
///
/// The last known data is kept when an error is attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub data: Value,
    pub loading: bool,
    pub network_status: NetworkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ClientError>,
}

impl QueryResult {
    pub(crate) fn ready(data: Value) -> Self {
        Self {
            data,
            loading: false,
            network_status: NetworkStatus::Ready,
            error: None,
        }
    }

    pub(crate) fn with_error(mut self, error: Option<ClientError>) -> Self {
        if error.is_some() {
            self.network_status = NetworkStatus::Error;
        }
        self.error = error;
        self
    }

    pub(crate) fn loading(data: Value, network_status: NetworkStatus) -> Self {
        Self {
            data,
            loading: true,
            network_status,
            error: None,
        }
    }
}

/// What a `fetch_more` reducer receives besides the previous result.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchMoreResult {
    /// The data returned by the server for the additional fetch.
    pub data: Value,
    /// The variables the additional fetch was sent with.
    pub variables: Object,
}

#[derive(Debug, Clone)]
pub struct WatchQueryOptions {
    pub query: Query,
    pub variables: Object,
    pub fetch_policy: FetchPolicy,
    pub poll_interval: Option<Duration>,
}

#[buildstructor::buildstructor]
impl WatchQueryOptions {
    #[builder(visibility = "pub")]
    fn new(
        query: Query,
        variables: JsonMap<ByteString, Value>,
        fetch_policy: Option<FetchPolicy>,
        poll_interval: Option<Duration>,
    ) -> Self {
        Self {
            query,
            variables,
            fetch_policy: fetch_policy.unwrap_or_default(),
            poll_interval,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub query: Query,
    pub variables: Object,
    pub fetch_policy: FetchPolicy,
}

#[buildstructor::buildstructor]
impl QueryOptions {
    #[builder(visibility = "pub")]
    fn new(
        query: Query,
        variables: JsonMap<ByteString, Value>,
        fetch_policy: Option<FetchPolicy>,
    ) -> Self {
        Self {
            query,
            variables,
            fetch_policy: fetch_policy.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MutationOptions {
    pub mutation: Query,
    pub variables: Object,
    /// Operation names of the active watches to refetch once the mutation is written.
    pub refetch_queries: Vec<String>,
}

#[buildstructor::buildstructor]
impl MutationOptions {
    #[builder(visibility = "pub")]
    fn new(
        mutation: Query,
        variables: JsonMap<ByteString, Value>,
        refetch_queries: Vec<String>,
    ) -> Self {
        Self {
            mutation,
            variables,
            refetch_queries,
        }
    }
}

/// An additional fetch for a watched query.
///
/// Without a query, the watch's query runs with its variables overridden by
/// `variables`. With a query, only `variables` are used.
#[derive(Debug, Clone, Default)]
pub struct FetchMoreOptions {
    pub query: Option<Query>,
    pub variables: Object,
}

#[buildstructor::buildstructor]
impl FetchMoreOptions {
    #[builder(visibility = "pub")]
    fn new(query: Option<Query>, variables: JsonMap<ByteString, Value>) -> Self {
        Self { query, variables }
    }
}
