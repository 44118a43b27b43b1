//! The transport seam.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::ClientError;
use crate::error::FetchError;
use crate::graphql::Request;
use crate::graphql::Response;
use crate::json_ext::Value;
use crate::spec::FragmentRegistry;
use crate::spec::Query;
use crate::transform::DispatchKey;
use crate::transform::add_typename;
use crate::transform::canonicalize;

/// Sends operations to a GraphQL server.
///
/// Implementations own everything below the client: HTTP, batching, persisted
/// queries. GraphQL errors belong in the [`Response`]; `Err` is for transport failures.
#[async_trait]
pub trait NetworkInterface: Send + Sync + 'static {
    async fn execute(&self, request: Request) -> Result<Response, FetchError>;
}

struct MockedResponse {
    result: Result<Response, FetchError>,
    delay: Option<Duration>,
}

#[derive(Default)]
struct MockState {
    mocks: HashMap<DispatchKey, VecDeque<MockedResponse>>,
    requests: Vec<Request>,
}

/// A [`NetworkInterface`] answering from a table of canned responses.
///
/// Each mocked response is served once, in registration order. Requests with
/// no mocked response left fail with [`FetchError::NoMockedResponse`].
/// Mocked documents are prepared like the client prepares them: local
/// fragments are inlined and `__typename` is added unless disabled.
#[derive(Clone)]
pub struct MockNetworkInterface {
    // shared so that a clone handed to a client still sees later mocks
    state: Arc<Mutex<MockState>>,
    add_typename: bool,
}

impl Default for MockNetworkInterface {
    fn default() -> Self {
        Self {
            state: Default::default(),
            add_typename: true,
        }
    }
}

impl MockNetworkInterface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches documents as sent by a client configured without `add_typename`.
    pub fn without_typename(mut self) -> Self {
        self.add_typename = false;
        self
    }

    pub fn mock(&self, query: &str, variables: Value, response: Value) -> Result<&Self, ClientError> {
        self.push(query, variables, Ok(Response::from_value(response)?), None)
    }

    /// Like [`MockNetworkInterface::mock`], answering after `delay`.
    pub fn mock_delayed(
        &self,
        query: &str,
        variables: Value,
        response: Value,
        delay: Duration,
    ) -> Result<&Self, ClientError> {
        self.push(query, variables, Ok(Response::from_value(response)?), Some(delay))
    }

    /// Fails the matching request with a transport error.
    pub fn mock_error(
        &self,
        query: &str,
        variables: Value,
        error: FetchError,
    ) -> Result<&Self, ClientError> {
        self.push(query, variables, Err(error), None)
    }

    fn push(
        &self,
        query: &str,
        variables: Value,
        result: Result<Response, FetchError>,
        delay: Option<Duration>,
    ) -> Result<&Self, ClientError> {
        let mut document = FragmentRegistry::new().resolve(&Query::parse(query)?)?;
        if self.add_typename {
            document = add_typename(&document);
        }
        let variables = match variables {
            Value::Object(variables) => document.variables_with_defaults(&variables),
            _ => document.variables_with_defaults(&Default::default()),
        };
        let key = canonicalize(&document, &variables);
        self.state
            .lock()
            .mocks
            .entry(key)
            .or_default()
            .push_back(MockedResponse { result, delay });
        Ok(self)
    }

    /// Number of requests received so far, matched or not.
    pub fn call_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().requests.clone()
    }
}

#[async_trait]
impl NetworkInterface for MockNetworkInterface {
    async fn execute(&self, request: Request) -> Result<Response, FetchError> {
        let key = canonicalize(&request.document, &request.variables);
        let mocked = {
            let mut state = self.state.lock();
            state.requests.push(request.clone());
            state.mocks.get_mut(&key).and_then(VecDeque::pop_front)
        };
        let Some(mocked) = mocked else {
            tracing::warn!(operation = %request.query, "no mocked response");
            return Err(FetchError::NoMockedResponse {
                operation: request.query,
            });
        };
        if let Some(delay) = mocked.delay {
            tokio::time::sleep(delay).await;
        }
        mocked.result
    }
}
