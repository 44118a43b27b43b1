//! Handles on watched queries.

use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use futures::Stream;
use futures::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::ClientError;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::query_manager::FetchMoreOptions;
use crate::query_manager::FetchMoreResult;
use crate::query_manager::ListenerId;
use crate::query_manager::QueryId;
use crate::query_manager::QueryManager;
use crate::query_manager::QueryResult;

struct Handle {
    id: QueryId,
    manager: Arc<QueryManager>,
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.manager.release(self.id);
    }
}

/// A query kept up to date with the store.
///
/// Nothing is fetched until the first [`ObservableQuery::subscribe`]. When the
/// last subscription is dropped the query stops: polling ends, responses still
/// in flight are discarded, and operations fail with
/// [`ClientError::QueryStopped`] until it is subscribed to again.
#[derive(Clone)]
pub struct ObservableQuery {
    handle: Arc<Handle>,
}

impl std::fmt::Debug for ObservableQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableQuery")
            .field("id", &self.handle.id)
            .finish()
    }
}

impl ObservableQuery {
    pub(crate) fn new(id: QueryId, manager: Arc<QueryManager>) -> Self {
        Self {
            handle: Arc::new(Handle { id, manager }),
        }
    }

    pub fn query_id(&self) -> QueryId {
        self.handle.id
    }

    /// Starts receiving results.
    ///
    /// The first subscription starts the query; later ones immediately receive
    /// the last result. Must be called from within a tokio runtime.
    pub fn subscribe(&self) -> Result<QuerySubscription, ClientError> {
        let (listener, receiver) = self.handle.manager.subscribe(self.handle.id)?;
        Ok(QuerySubscription {
            observable: self.clone(),
            listener,
            receiver: UnboundedReceiverStream::new(receiver),
        })
    }

    /// The last result, flagged as loading while a fetch is in flight.
    pub fn current_result(&self) -> Option<QueryResult> {
        self.handle.manager.current_result(self.handle.id)
    }

    pub fn variables(&self) -> Object {
        self.handle
            .manager
            .variables(self.handle.id)
            .unwrap_or_default()
    }

    /// Fetches the query again from the network.
    ///
    /// `variables` are merged over the current ones and kept for later fetches.
    /// A refetch superseded by a later one resolves with its own data but is
    /// never emitted.
    pub async fn refetch(&self, variables: Option<Object>) -> Result<QueryResult, ClientError> {
        self.handle.manager.refetch(self.handle.id, variables).await
    }

    /// Runs an additional fetch and folds its result into this query's result.
    ///
    /// `reducer` receives the previous result data and the additional fetch;
    /// what it returns is emitted to subscribers but never written to the
    /// store. The additional fetch itself is written to the store. Resolves
    /// with the additional fetch's own result.
    pub async fn fetch_more<F>(
        &self,
        options: FetchMoreOptions,
        reducer: F,
    ) -> Result<QueryResult, ClientError>
    where
        F: FnOnce(&Value, FetchMoreResult) -> Value + Send,
    {
        self.handle
            .manager
            .fetch_more(self.handle.id, options, reducer)
            .await
    }

    /// Replaces this query's result with what `updater` returns, given the
    /// previous result data and the current variables.
    ///
    /// The store is left alone: the new result holds until a store change
    /// produces different data for this query. The update is dropped when a
    /// new result was emitted while `updater` ran.
    pub fn update_query<F>(&self, updater: F) -> Result<(), ClientError>
    where
        F: FnOnce(&Value, &Object) -> Value,
    {
        self.handle.manager.update_query(self.handle.id, updater)
    }

    /// Refetches every `interval`, skipping ticks while a fetch is in flight.
    pub fn start_polling(&self, interval: Duration) -> Result<(), ClientError> {
        self.handle
            .manager
            .start_polling(self.handle.id, interval)
    }

    pub fn stop_polling(&self) -> Result<(), ClientError> {
        self.handle.manager.stop_polling(self.handle.id)
    }
}

/// A stream of [`QueryResult`]s for one subscriber of an [`ObservableQuery`].
///
/// Dropping it unsubscribes.
pub struct QuerySubscription {
    observable: ObservableQuery,
    listener: ListenerId,
    receiver: UnboundedReceiverStream<QueryResult>,
}

impl QuerySubscription {
    pub fn observable(&self) -> &ObservableQuery {
        &self.observable
    }

    pub fn unsubscribe(self) {}
}

impl Stream for QuerySubscription {
    type Item = QueryResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_next_unpin(cx)
    }
}

impl Drop for QuerySubscription {
    fn drop(&mut self) {
        self.observable
            .handle
            .manager
            .unsubscribe(self.observable.handle.id, self.listener);
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;
    use crate::Client;
    use crate::network::MockNetworkInterface;
    use crate::query_manager::WatchQueryOptions;
    use crate::spec::Query;

    const ENTRY: &str = "query entry { entry { value } }";

    fn client(network: &MockNetworkInterface) -> Client {
        Client::builder()
            .network_interface(network.clone())
            .build()
            .unwrap()
    }

    fn entry(value: i64) -> Value {
        json!({"data": {"entry": {"value": value, "__typename": "Entry"}}})
    }

    fn watch(client: &Client) -> ObservableQuery {
        client
            .watch_query(
                WatchQueryOptions::builder()
                    .query(Query::parse(ENTRY).unwrap())
                    .build(),
            )
            .unwrap()
    }

    #[tokio::test]
    async fn nothing_is_fetched_before_subscribing() {
        let network = MockNetworkInterface::new();
        network.mock(ENTRY, json!({}), entry(1)).unwrap();
        let client = client(&network);
        let observable = watch(&client);
        tokio::task::yield_now().await;
        assert_eq!(network.call_count(), 0);
        assert_eq!(observable.current_result(), None);

        let mut subscription = observable.subscribe().unwrap();
        let result = subscription.next().await.unwrap();
        assert_eq!(
            result.data,
            json!({"entry": {"value": 1, "__typename": "Entry"}})
        );
        assert!(!result.loading);
        assert_eq!(network.call_count(), 1);
    }

    #[tokio::test]
    async fn second_subscribers_get_the_last_result() {
        let network = MockNetworkInterface::new();
        network.mock(ENTRY, json!({}), entry(1)).unwrap();
        let client = client(&network);
        let observable = watch(&client);

        let mut first = observable.subscribe().unwrap();
        let emitted = first.next().await.unwrap();
        let mut second = observable.subscribe().unwrap();
        assert_eq!(second.next().await.unwrap(), emitted);
        assert_eq!(network.call_count(), 1);
    }

    #[tokio::test]
    async fn dropping_the_last_subscription_stops_the_query() {
        let network = MockNetworkInterface::new();
        network.mock(ENTRY, json!({}), entry(1)).unwrap();
        network.mock(ENTRY, json!({}), entry(2)).unwrap();
        let client = client(&network);
        let observable = watch(&client);

        let mut subscription = observable.subscribe().unwrap();
        subscription.next().await.unwrap();
        subscription.unsubscribe();
        assert!(matches!(
            observable.refetch(None).await,
            Err(ClientError::QueryStopped(_))
        ));

        // subscribing again starts over, from the store
        let mut subscription = observable.subscribe().unwrap();
        assert_eq!(
            subscription.next().await.unwrap().data["entry"]["value"],
            json!(1)
        );
        assert_eq!(network.call_count(), 1);
    }

    #[tokio::test]
    async fn refetch_merges_variables() {
        let query = "query node($id: ID!, $full: Boolean = false) { node(id: $id) { id } }";
        let network = MockNetworkInterface::new();
        network
            .mock(
                query,
                json!({"id": "1"}),
                json!({"data": {"node": {"id": "1", "__typename": "Node"}}}),
            )
            .unwrap();
        network
            .mock(
                query,
                json!({"id": "2"}),
                json!({"data": {"node": {"id": "2", "__typename": "Node"}}}),
            )
            .unwrap();
        let client = client(&network);
        let observable = client
            .watch_query(
                WatchQueryOptions::builder()
                    .query(Query::parse(query).unwrap())
                    .variables(json!({"id": "1"}).as_object().unwrap().clone())
                    .build(),
            )
            .unwrap();
        let mut subscription = observable.subscribe().unwrap();
        subscription.next().await.unwrap();

        let refetched = observable
            .refetch(Some(json!({"id": "2"}).as_object().unwrap().clone()))
            .await
            .unwrap();
        assert_eq!(refetched.data["node"]["id"], json!("2"));
        assert_eq!(
            Value::Object(observable.variables()),
            json!({"full": false, "id": "2"})
        );
        assert_eq!(
            subscription.next().await.unwrap().data["node"]["id"],
            json!("2")
        );
    }
}
