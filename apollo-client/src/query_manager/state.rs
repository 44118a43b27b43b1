use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::FetchPolicy;
use super::NetworkStatus;
use super::QueryResult;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::spec::Query;

pub(crate) type ListenerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueryState {
    /// Registered, never subscribed.
    Idle,
    Fetching,
    Ready,
    /// The last subscriber detached.
    Stopped,
}

/// A query kept up to date with the store on behalf of its subscribers.
pub(crate) struct WatchedQuery {
    /// The prepared document.
    pub(crate) query: Arc<Query>,
    pub(crate) variables: Object,
    pub(crate) fetch_policy: FetchPolicy,
    pub(crate) poll_interval: Option<Duration>,
    pub(crate) state: QueryState,
    pub(crate) network_status: NetworkStatus,
    /// Bumped by every fetch started for this watch; a response from an older
    /// fetch is stale.
    pub(crate) generation: u64,
    /// What the store held for this query at the last emission it drove.
    pub(crate) last_store_data: Option<Value>,
    /// Identities the last diff of this query read; `None` until diffed.
    pub(crate) dependencies: Option<HashSet<String>>,
    /// Number of `fetch_more` calls in flight.
    pub(crate) fetching_more: usize,
    /// Bumped by every emission.
    revision: u64,
    last_result: Option<QueryResult>,
    listeners: Vec<(ListenerId, mpsc::UnboundedSender<QueryResult>)>,
    polling: Option<JoinHandle<()>>,
}

impl WatchedQuery {
    pub(crate) fn new(
        query: Arc<Query>,
        variables: Object,
        fetch_policy: FetchPolicy,
        poll_interval: Option<Duration>,
    ) -> Self {
        Self {
            query,
            variables,
            fetch_policy,
            poll_interval,
            state: QueryState::Idle,
            network_status: NetworkStatus::Loading,
            generation: 0,
            last_store_data: None,
            dependencies: None,
            fetching_more: 0,
            revision: 0,
            last_result: None,
            listeners: Vec::new(),
            polling: None,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        matches!(self.state, QueryState::Fetching | QueryState::Ready)
    }

    /// Adds a listener, replaying the last result to it.
    ///
    /// Returns whether the watch must be started.
    pub(crate) fn add_listener(
        &mut self,
        id: ListenerId,
        sender: mpsc::UnboundedSender<QueryResult>,
    ) -> bool {
        if let Some(last_result) = &self.last_result {
            let _ = sender.send(last_result.clone());
        }
        self.listeners.push((id, sender));
        matches!(self.state, QueryState::Idle | QueryState::Stopped)
    }

    /// Removes a listener, returning whether any are left.
    pub(crate) fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.retain(|(listener, _)| *listener != id);
        !self.listeners.is_empty()
    }

    /// Sends `result` to every listener, unless it is the last result sent.
    pub(crate) fn emit(&mut self, result: QueryResult) {
        if self.last_result.as_ref() == Some(&result) {
            return;
        }
        self.listeners
            .retain(|(_, sender)| sender.send(result.clone()).is_ok());
        self.last_result = Some(result);
        self.revision += 1;
    }

    pub(crate) fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn last_data(&self) -> Value {
        self.last_result
            .as_ref()
            .map(|result| result.data.clone())
            .unwrap_or(Value::Null)
    }

    pub(crate) fn current_result(&self) -> Option<QueryResult> {
        let mut result = self.last_result.clone()?;
        if self.state == QueryState::Fetching {
            result.loading = true;
            result.network_status = self.network_status;
        } else if self.fetching_more > 0 {
            result.loading = true;
            result.network_status = NetworkStatus::FetchMore;
        }
        Some(result)
    }

    pub(crate) fn set_polling(&mut self, handle: JoinHandle<()>) {
        self.stop_polling();
        self.polling = Some(handle);
    }

    pub(crate) fn stop_polling(&mut self) {
        if let Some(handle) = self.polling.take() {
            handle.abort();
        }
    }

    /// Detaches everything; a later subscription starts over.
    pub(crate) fn stop(&mut self) {
        self.stop_polling();
        self.state = QueryState::Stopped;
        // anything still in flight is now stale
        self.generation += 1;
        self.listeners.clear();
        self.last_result = None;
        self.last_store_data = None;
        self.dependencies = None;
    }
}

impl Drop for WatchedQuery {
    fn drop(&mut self) {
        self.stop_polling();
    }
}
