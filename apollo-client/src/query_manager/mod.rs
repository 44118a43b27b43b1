//! Coordinates watched queries, the store and the network.
//!
//! Every mutation of the store and of the watch table happens under one lock,
//! which is never held across an await point nor while user code runs.
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing
    )
)]

mod dedup;
mod options;
mod state;

use std::fmt;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;
use std::time::Instant;

use indexmap::IndexMap;
use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use self::dedup::Deduplicator;
pub use self::options::FetchMoreOptions;
pub use self::options::FetchMoreResult;
pub use self::options::FetchPolicy;
pub use self::options::MutationOptions;
pub use self::options::NetworkStatus;
pub use self::options::QueryOptions;
pub use self::options::QueryResult;
pub use self::options::WatchQueryOptions;
pub(crate) use self::state::ListenerId;
use self::state::QueryState;
use self::state::WatchedQuery;
use crate::cache;
use crate::cache::IdentityStrategy;
use crate::cache::NormalizedStore;
use crate::configuration::Configuration;
use crate::error::ClientError;
use crate::error::FetchError;
use crate::graphql::Request;
use crate::graphql::Response;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::json_ext::merge_objects;
use crate::network::NetworkInterface;
use crate::spec::FragmentRegistry;
use crate::spec::Query;
use crate::spec::SpecError;
use crate::transform::DocumentTransform;

/// Identifies a watched query for the lifetime of its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(u64);

impl From<u64> for QueryId {
    fn from(id: u64) -> Self {
        QueryId(id)
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type FetchReply = oneshot::Receiver<Result<QueryResult, ClientError>>;

struct Inner {
    store: NormalizedStore,
    fragments: FragmentRegistry,
    watches: IndexMap<QueryId, WatchedQuery>,
    next_query_id: u64,
    next_listener_id: ListenerId,
}

/// A fetch started on behalf of a watch.
struct WatchFetch {
    id: QueryId,
    generation: u64,
    query: Arc<Query>,
    variables: Object,
    fetch_policy: FetchPolicy,
}

/// The watch whose own fetch completed, and the GraphQL errors it returned.
struct Origin {
    id: QueryId,
    error: Option<ClientError>,
}

pub(crate) struct QueryManager {
    inner: Mutex<Inner>,
    network: Arc<dyn NetworkInterface>,
    deduplicator: Deduplicator,
    configuration: Configuration,
    identity: Arc<dyn IdentityStrategy>,
    transform: DocumentTransform,
    created_at: Instant,
}

impl QueryManager {
    pub(crate) fn new(
        network: Arc<dyn NetworkInterface>,
        configuration: Configuration,
        identity: Arc<dyn IdentityStrategy>,
        store: NormalizedStore,
        fragments: FragmentRegistry,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                store,
                fragments,
                watches: IndexMap::new(),
                next_query_id: 0,
                next_listener_id: 0,
            }),
            network,
            deduplicator: Deduplicator::default(),
            transform: DocumentTransform {
                add_typename: configuration.add_typename,
            },
            configuration,
            identity,
            created_at: Instant::now(),
        }
    }

    fn prepare(&self, fragments: &FragmentRegistry, query: &Query) -> Result<Arc<Query>, SpecError> {
        self.transform.transform(query, fragments).map(Arc::new)
    }

    /// The policy actually applied: server rendering never forces a fetch.
    fn effective_policy(&self, fetch_policy: FetchPolicy) -> FetchPolicy {
        let restricted = self.configuration.ssr_mode
            || self.created_at.elapsed() < self.configuration.ssr_force_fetch_delay;
        match fetch_policy {
            FetchPolicy::NetworkOnly | FetchPolicy::CacheAndNetwork if restricted => {
                tracing::debug!(?fetch_policy, "serving forced fetch from the cache");
                FetchPolicy::CacheFirst
            }
            fetch_policy => fetch_policy,
        }
    }

    async fn fetch(
        &self,
        query: Arc<Query>,
        variables: Object,
        deduplicate: bool,
    ) -> Result<Response, FetchError> {
        let request = Request::builder()
            .document(query)
            .variables(variables)
            .build();
        tracing::debug!(operation = ?request.operation_name, "sending request");
        if deduplicate && self.configuration.query_deduplication {
            self.deduplicator
                .execute(self.network.clone(), request)
                .await
        } else {
            self.network.execute(request).await
        }
    }

    pub(crate) fn register_fragments(&self, source: &str) -> Result<usize, SpecError> {
        self.inner.lock().fragments.register_document(source)
    }

    pub(crate) fn watch_query(&self, options: WatchQueryOptions) -> Result<QueryId, ClientError> {
        let mut inner = self.inner.lock();
        let query = self.prepare(&inner.fragments, &options.query)?;
        let variables = query.variables_with_defaults(&options.variables);
        inner.next_query_id += 1;
        let id = QueryId(inner.next_query_id);
        tracing::debug!(query = %id, operation = query.operation_name(), "watching query");
        inner.watches.insert(
            id,
            WatchedQuery::new(
                query,
                variables,
                options.fetch_policy,
                options.poll_interval,
            ),
        );
        Ok(id)
    }

    /// Forgets a watch once nothing can subscribe to it anymore.
    pub(crate) fn release(&self, id: QueryId) {
        if self.inner.lock().watches.shift_remove(&id).is_some() {
            tracing::debug!(query = %id, "released query");
        }
    }

    /// Adds a listener to a watch, starting the watch for its first listener.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn subscribe(
        self: &Arc<Self>,
        id: QueryId,
    ) -> Result<(ListenerId, mpsc::UnboundedReceiver<QueryResult>), ClientError> {
        let mut inner = self.inner.lock();
        inner.next_listener_id += 1;
        let listener = inner.next_listener_id;
        let (sender, receiver) = mpsc::unbounded_channel();
        let watch = inner
            .watches
            .get_mut(&id)
            .ok_or(ClientError::QueryStopped(id))?;
        if watch.add_listener(listener, sender) {
            self.start(&mut inner, id);
        }
        Ok((listener, receiver))
    }

    /// Removes a listener, stopping the watch when it was the last one.
    pub(crate) fn unsubscribe(&self, id: QueryId, listener: ListenerId) {
        let mut inner = self.inner.lock();
        if let Some(watch) = inner.watches.get_mut(&id)
            && !watch.remove_listener(listener)
            && watch.state != QueryState::Stopped
        {
            tracing::debug!(query = %id, "last subscriber detached, stopping query");
            watch.stop();
        }
    }

    fn start(self: &Arc<Self>, inner: &mut Inner, id: QueryId) {
        let Some(watch) = inner.watches.get_mut(&id) else {
            return;
        };
        let fetch_policy = self.effective_policy(watch.fetch_policy);
        let poll_interval = watch.poll_interval;
        let mut diff = match fetch_policy {
            FetchPolicy::NetworkOnly | FetchPolicy::NoCache => None,
            _ => Some(cache::diff(
                &inner.store,
                &*self.identity,
                &watch.query,
                &watch.variables,
            )),
        };
        if let Some(diff) = &mut diff {
            watch.dependencies = Some(std::mem::take(&mut diff.dependencies));
        }

        match (fetch_policy, diff) {
            (FetchPolicy::CacheOnly, Some(diff)) => {
                let error = diff.missing_error().map(ClientError::from);
                watch.state = QueryState::Ready;
                watch.network_status = NetworkStatus::Ready;
                watch.last_store_data = Some(diff.result.clone());
                watch.emit(QueryResult::ready(diff.result).with_error(error));
            }
            (FetchPolicy::CacheFirst, Some(diff)) if diff.complete => {
                watch.state = QueryState::Ready;
                watch.network_status = NetworkStatus::Ready;
                watch.last_store_data = Some(diff.result.clone());
                watch.emit(QueryResult::ready(diff.result));
            }
            (FetchPolicy::CacheAndNetwork, Some(diff)) if diff.complete => {
                watch.last_store_data = Some(diff.result.clone());
                watch.emit(QueryResult::loading(diff.result, NetworkStatus::Loading));
                self.start_fetch(inner, id, NetworkStatus::Loading, None);
            }
            (FetchPolicy::CacheFirst, Some(diff)) if self.configuration.partial_fetching => {
                let missing = diff.missing_query(&watch.query).map(Arc::new);
                self.start_fetch(inner, id, NetworkStatus::Loading, missing);
            }
            _ => {
                self.start_fetch(inner, id, NetworkStatus::Loading, None);
            }
        }

        if let Some(interval) = poll_interval {
            self.schedule_polling(inner, id, interval);
        }
    }

    /// Starts a network fetch for a watch, superseding any fetch in flight.
    ///
    /// `query` overrides the watch's document, for fetching a missing subset.
    fn start_fetch(
        self: &Arc<Self>,
        inner: &mut Inner,
        id: QueryId,
        network_status: NetworkStatus,
        query: Option<Arc<Query>>,
    ) -> Option<FetchReply> {
        let watch = inner.watches.get_mut(&id)?;
        watch.generation += 1;
        watch.state = QueryState::Fetching;
        watch.network_status = network_status;
        let (query, variables) = match query {
            Some(query) => {
                let variables = query.declared_variables(&watch.variables);
                (query, variables)
            }
            None => (watch.query.clone(), watch.variables.clone()),
        };
        let fetch = WatchFetch {
            id,
            generation: watch.generation,
            query,
            variables,
            fetch_policy: watch.fetch_policy,
        };
        tracing::trace!(query = %id, generation = fetch.generation, ?network_status, "starting fetch");

        let (sender, receiver) = oneshot::channel();
        let manager = self.clone();
        tokio::task::spawn(async move {
            let outcome = manager
                .fetch(fetch.query.clone(), fetch.variables.clone(), true)
                .await;
            let _ = sender.send(manager.complete_fetch(fetch, outcome));
        });
        Some(receiver)
    }

    fn complete_fetch(
        &self,
        fetch: WatchFetch,
        outcome: Result<Response, FetchError>,
    ) -> Result<QueryResult, ClientError> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let Some(watch) = inner
            .watches
            .get_mut(&fetch.id)
            .filter(|watch| watch.state != QueryState::Stopped)
        else {
            tracing::debug!(query = %fetch.id, "discarding response for a stopped query");
            return Err(ClientError::QueryStopped(fetch.id));
        };

        if watch.generation != fetch.generation {
            tracing::debug!(
                query = %fetch.id,
                generation = fetch.generation,
                current = watch.generation,
                "discarding stale response"
            );
            let response = outcome?;
            return Ok(QueryResult::ready(response.data.unwrap_or(Value::Null)));
        }

        let response = match outcome {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(query = %fetch.id, %error, "fetch failed");
                let error = ClientError::from(error);
                watch.state = QueryState::Ready;
                watch.network_status = NetworkStatus::Error;
                watch.emit(QueryResult::ready(watch.last_data()).with_error(Some(error.clone())));
                return Err(error);
            }
        };

        let error = graphql_error(&response);
        if fetch.fetch_policy == FetchPolicy::NoCache {
            let result =
                QueryResult::ready(response.data.unwrap_or(Value::Null)).with_error(error);
            watch.state = QueryState::Ready;
            watch.network_status = result.network_status;
            watch.emit(result.clone());
            return Ok(result);
        }

        let changed = match &response.data {
            Some(Value::Object(data)) => match cache::write_result(
                &mut inner.store,
                &*self.identity,
                &fetch.query,
                &fetch.variables,
                data,
            ) {
                Ok(written) => written.changed,
                Err(error) => {
                    tracing::warn!(query = %fetch.id, %error, "could not write response");
                    let error = ClientError::from(error);
                    watch.state = QueryState::Ready;
                    watch.network_status = NetworkStatus::Error;
                    watch.emit(
                        QueryResult::ready(watch.last_data()).with_error(Some(error.clone())),
                    );
                    return Err(error);
                }
            },
            _ => IndexSet::new(),
        };

        self.broadcast(
            inner,
            Some(Origin {
                id: fetch.id,
                error,
            }),
            Some(&changed),
        )
        .ok_or(ClientError::QueryStopped(fetch.id))
    }

    /// Re-diffs active watches after a store write.
    ///
    /// Only watches whose last diff depended on a `changed` identity are
    /// re-diffed; `None` re-diffs them all. The origin watch always emits; any
    /// other watch emits when its data is complete and differs from what it
    /// last saw. Returns the origin's result.
    fn broadcast(
        &self,
        inner: &mut Inner,
        origin: Option<Origin>,
        changed: Option<&IndexSet<String>>,
    ) -> Option<QueryResult> {
        let Inner { store, watches, .. } = inner;
        let mut origin_result = None;
        for (id, watch) in watches.iter_mut() {
            let own = origin.as_ref().filter(|origin| origin.id == *id);
            if own.is_none() {
                if !watch.is_active() || watch.fetch_policy == FetchPolicy::NoCache {
                    continue;
                }
                if let (Some(changed), Some(dependencies)) = (changed, &watch.dependencies)
                    && !changed.iter().any(|identity| dependencies.contains(identity))
                {
                    continue;
                }
            }
            let mut diff = cache::diff(store, &*self.identity, &watch.query, &watch.variables);
            watch.dependencies = Some(std::mem::take(&mut diff.dependencies));
            if let Some(own) = own {
                let error = own
                    .error
                    .clone()
                    .or_else(|| diff.missing_error().map(ClientError::from));
                let result = QueryResult::ready(diff.result.clone()).with_error(error);
                watch.state = QueryState::Ready;
                watch.network_status = result.network_status;
                watch.last_store_data = Some(diff.result);
                watch.emit(result.clone());
                origin_result = Some(result);
            } else if diff.complete && watch.last_store_data.as_ref() != Some(&diff.result) {
                tracing::trace!(query = %id, "store changed under query");
                watch.state = QueryState::Ready;
                watch.network_status = NetworkStatus::Ready;
                watch.last_store_data = Some(diff.result.clone());
                watch.emit(QueryResult::ready(diff.result));
            }
        }
        origin_result
    }

    pub(crate) async fn refetch(
        self: &Arc<Self>,
        id: QueryId,
        variables: Option<Object>,
    ) -> Result<QueryResult, ClientError> {
        let reply = {
            let mut inner = self.inner.lock();
            let watch = live_watch(&mut inner, id)?;
            if let Some(variables) = variables {
                watch.variables = watch
                    .query
                    .variables_with_defaults(&merge_objects(&watch.variables, &variables));
            }
            self.start_fetch(&mut inner, id, NetworkStatus::Refetch, None)
        };
        match reply {
            Some(reply) => reply
                .await
                .unwrap_or(Err(ClientError::Network(FetchError::Canceled))),
            None => Err(ClientError::QueryStopped(id)),
        }
    }

    pub(crate) async fn fetch_more<F>(
        &self,
        id: QueryId,
        options: FetchMoreOptions,
        reducer: F,
    ) -> Result<QueryResult, ClientError>
    where
        F: FnOnce(&Value, FetchMoreResult) -> Value + Send,
    {
        let (query, variables, fetch_policy) = {
            let mut inner = self.inner.lock();
            let inner = &mut *inner;
            let prepared = match &options.query {
                Some(query) => Some(self.prepare(&inner.fragments, query)?),
                None => None,
            };
            let watch = live_watch(inner, id)?;
            let (query, variables) = match prepared {
                Some(query) => {
                    let variables = query.variables_with_defaults(&options.variables);
                    (query, variables)
                }
                None => (
                    watch.query.clone(),
                    merge_objects(&watch.variables, &options.variables),
                ),
            };
            watch.fetching_more += 1;
            (query, variables, watch.fetch_policy)
        };
        let _fetching_more = FetchingMore { manager: self, id };

        let response = self.fetch(query.clone(), variables.clone(), true).await?;
        let error = graphql_error(&response);
        let data = response.data.unwrap_or(Value::Null);

        let previous = {
            let mut inner = self.inner.lock();
            if fetch_policy != FetchPolicy::NoCache
                && let Value::Object(object) = &data
            {
                let written =
                    cache::write_result(&mut inner.store, &*self.identity, &query, &variables, object)?;
                self.broadcast(&mut inner, None, Some(&written.changed));
            }
            live_watch(&mut inner, id)?.last_data()
        };

        let next = reducer(
            &previous,
            FetchMoreResult {
                data: data.clone(),
                variables,
            },
        );

        live_watch(&mut self.inner.lock(), id)?.emit(QueryResult::ready(next));
        Ok(QueryResult::ready(data).with_error(error))
    }

    pub(crate) fn update_query<F>(&self, id: QueryId, updater: F) -> Result<(), ClientError>
    where
        F: FnOnce(&Value, &Object) -> Value,
    {
        let (previous, variables, revision) = {
            let mut inner = self.inner.lock();
            let watch = live_watch(&mut inner, id)?;
            (watch.last_data(), watch.variables.clone(), watch.revision())
        };
        let next = updater(&previous, &variables);

        let mut inner = self.inner.lock();
        let watch = live_watch(&mut inner, id)?;
        if watch.revision() != revision {
            tracing::debug!(query = %id, "result changed while updating, dropping update");
            return Ok(());
        }
        let mut result = watch
            .current_result()
            .unwrap_or_else(|| QueryResult::ready(Value::Null));
        result.data = next;
        watch.emit(result);
        Ok(())
    }

    pub(crate) fn start_polling(
        self: &Arc<Self>,
        id: QueryId,
        interval: Duration,
    ) -> Result<(), ClientError> {
        let mut inner = self.inner.lock();
        let watch = live_watch(&mut inner, id)?;
        watch.poll_interval = Some(interval);
        if watch.is_active() {
            self.schedule_polling(&mut inner, id, interval);
        }
        Ok(())
    }

    pub(crate) fn stop_polling(&self, id: QueryId) -> Result<(), ClientError> {
        let mut inner = self.inner.lock();
        let watch = live_watch(&mut inner, id)?;
        watch.poll_interval = None;
        watch.stop_polling();
        Ok(())
    }

    fn schedule_polling(self: &Arc<Self>, inner: &mut Inner, id: QueryId, interval: Duration) {
        let Some(watch) = inner.watches.get_mut(&id) else {
            return;
        };
        let manager: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::task::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if !manager.poll(id) {
                    break;
                }
            }
        });
        watch.set_polling(handle);
    }

    /// Returns whether polling should go on.
    fn poll(self: &Arc<Self>, id: QueryId) -> bool {
        let mut inner = self.inner.lock();
        let Some(state) = inner.watches.get(&id).map(|watch| watch.state) else {
            return false;
        };
        match state {
            QueryState::Ready => {
                self.start_fetch(&mut inner, id, NetworkStatus::Poll, None);
                true
            }
            QueryState::Fetching => {
                tracing::trace!(query = %id, "skipping poll while fetching");
                true
            }
            QueryState::Idle | QueryState::Stopped => false,
        }
    }

    pub(crate) fn current_result(&self, id: QueryId) -> Option<QueryResult> {
        self.inner
            .lock()
            .watches
            .get(&id)
            .and_then(WatchedQuery::current_result)
    }

    pub(crate) fn variables(&self, id: QueryId) -> Option<Object> {
        self.inner
            .lock()
            .watches
            .get(&id)
            .map(|watch| watch.variables.clone())
    }

    pub(crate) async fn query(&self, options: QueryOptions) -> Result<QueryResult, ClientError> {
        let fetch_policy = self.effective_policy(options.fetch_policy);
        let (query, variables, fetch_query, fetch_variables) = {
            let inner = self.inner.lock();
            let query = self.prepare(&inner.fragments, &options.query)?;
            let variables = query.variables_with_defaults(&options.variables);
            let mut fetch_query = query.clone();
            let mut fetch_variables = variables.clone();
            match fetch_policy {
                FetchPolicy::CacheOnly => {
                    let data = cache::read(&inner.store, &*self.identity, &query, &variables)?;
                    return Ok(QueryResult::ready(data));
                }
                FetchPolicy::CacheFirst | FetchPolicy::CacheAndNetwork => {
                    let diff = cache::diff(&inner.store, &*self.identity, &query, &variables);
                    if diff.complete {
                        return Ok(QueryResult::ready(diff.result));
                    }
                    if self.configuration.partial_fetching
                        && let Some(missing) = diff.missing_query(&query)
                    {
                        fetch_variables = missing.declared_variables(&variables);
                        fetch_query = Arc::new(missing);
                    }
                }
                FetchPolicy::NetworkOnly | FetchPolicy::NoCache => {}
            }
            (query, variables, fetch_query, fetch_variables)
        };

        let response = self
            .fetch(fetch_query.clone(), fetch_variables.clone(), true)
            .await?;
        let error = graphql_error(&response);
        if fetch_policy == FetchPolicy::NoCache {
            return Ok(QueryResult::ready(response.data.unwrap_or(Value::Null)).with_error(error));
        }

        let mut inner = self.inner.lock();
        if let Some(Value::Object(data)) = &response.data {
            let written = cache::write_result(
                &mut inner.store,
                &*self.identity,
                &fetch_query,
                &fetch_variables,
                data,
            )?;
            self.broadcast(&mut inner, None, Some(&written.changed));
        }
        let diff = cache::diff(&inner.store, &*self.identity, &query, &variables);
        let error = error.or_else(|| diff.missing_error().map(ClientError::from));
        Ok(QueryResult::ready(diff.result).with_error(error))
    }

    pub(crate) async fn mutate(
        self: &Arc<Self>,
        options: MutationOptions,
    ) -> Result<QueryResult, ClientError> {
        let mutation = {
            let inner = self.inner.lock();
            self.prepare(&inner.fragments, &options.mutation)?
        };
        let variables = mutation.variables_with_defaults(&options.variables);
        // mutations are never shared
        let response = self.fetch(mutation.clone(), variables.clone(), false).await?;
        let error = graphql_error(&response);
        let data = response.data.unwrap_or(Value::Null);

        let mut inner = self.inner.lock();
        if let Value::Object(object) = &data {
            let written =
                cache::write_result(&mut inner.store, &*self.identity, &mutation, &variables, object)?;
            self.broadcast(&mut inner, None, Some(&written.changed));
        }
        let refetch: Vec<QueryId> = inner
            .watches
            .iter()
            .filter(|(_, watch)| {
                watch.is_active()
                    && watch.query.operation_name().is_some_and(|name| {
                        options.refetch_queries.iter().any(|refetch| refetch == name)
                    })
            })
            .map(|(id, _)| *id)
            .collect();
        for id in refetch {
            tracing::debug!(query = %id, "refetching after mutation");
            self.start_fetch(&mut inner, id, NetworkStatus::Refetch, None);
        }
        Ok(QueryResult::ready(data).with_error(error))
    }

    pub(crate) fn read_query(&self, query: &Query, variables: &Object) -> Result<Value, ClientError> {
        let inner = self.inner.lock();
        let query = self.prepare(&inner.fragments, query)?;
        let variables = query.variables_with_defaults(variables);
        Ok(cache::read(&inner.store, &*self.identity, &query, &variables)?)
    }

    pub(crate) fn write_query(
        &self,
        query: &Query,
        variables: &Object,
        data: &Object,
    ) -> Result<(), ClientError> {
        let mut inner = self.inner.lock();
        let query = self.prepare(&inner.fragments, query)?;
        let variables = query.variables_with_defaults(variables);
        let written = cache::write_result(&mut inner.store, &*self.identity, &query, &variables, data)?;
        self.broadcast(&mut inner, None, Some(&written.changed));
        Ok(())
    }

    /// Empties the store, then refetches every active watch.
    pub(crate) async fn reset_store(self: &Arc<Self>) -> Result<(), ClientError> {
        let replies: Vec<FetchReply> = {
            let mut inner = self.inner.lock();
            inner.store.reset();
            let active: Vec<QueryId> = inner
                .watches
                .iter()
                .filter(|(_, watch)| watch.is_active())
                .map(|(id, _)| *id)
                .collect();
            tracing::debug!(active = active.len(), "reset store");
            active
                .into_iter()
                .filter_map(|id| self.start_fetch(&mut inner, id, NetworkStatus::Refetch, None))
                .collect()
        };
        for result in futures::future::join_all(replies).await {
            match result.unwrap_or(Err(ClientError::Network(FetchError::Canceled))) {
                Ok(_) | Err(ClientError::QueryStopped(_)) => {}
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    pub(crate) fn extract(&self) -> Object {
        self.inner.lock().store.extract()
    }

    /// Merges an extracted state into the store, then notifies every active watch.
    pub(crate) fn restore(&self, state: &Object) -> Result<(), ClientError> {
        let mut inner = self.inner.lock();
        inner.store.restore(state)?;
        self.broadcast(&mut inner, None, None);
        Ok(())
    }
}

/// Keeps a watch flagged as fetching more until dropped, whatever way
/// `fetch_more` returns.
struct FetchingMore<'a> {
    manager: &'a QueryManager,
    id: QueryId,
}

impl Drop for FetchingMore<'_> {
    fn drop(&mut self) {
        if let Some(watch) = self.manager.inner.lock().watches.get_mut(&self.id) {
            watch.fetching_more = watch.fetching_more.saturating_sub(1);
        }
    }
}

fn live_watch(inner: &mut Inner, id: QueryId) -> Result<&mut WatchedQuery, ClientError> {
    inner
        .watches
        .get_mut(&id)
        .filter(|watch| watch.state != QueryState::Stopped)
        .ok_or(ClientError::QueryStopped(id))
}

fn graphql_error(response: &Response) -> Option<ClientError> {
    (!response.errors.is_empty()).then(|| ClientError::GraphQl(response.errors.clone()))
}
