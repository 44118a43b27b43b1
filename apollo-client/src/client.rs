//! The client entry point.

use std::sync::Arc;

use crate::cache::IdentityStrategy;
use crate::cache::NormalizedStore;
use crate::configuration::Configuration;
use crate::error::ClientError;
use crate::error::ConfigurationError;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::network::NetworkInterface;
use crate::observable::ObservableQuery;
use crate::query_manager::MutationOptions;
use crate::query_manager::QueryManager;
use crate::query_manager::QueryOptions;
use crate::query_manager::QueryResult;
use crate::query_manager::WatchQueryOptions;
use crate::spec::FragmentRegistry;
use crate::spec::Query;

/// A GraphQL client with a normalized cache.
///
/// Cheap to clone: clones share the store, the watched queries and the
/// network interface.
#[derive(Clone)]
pub struct Client {
    manager: Arc<QueryManager>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Registers a query to keep up to date with the store.
    pub fn watch_query(&self, options: WatchQueryOptions) -> Result<ObservableQuery, ClientError> {
        let id = self.manager.watch_query(options)?;
        Ok(ObservableQuery::new(id, self.manager.clone()))
    }

    /// Runs a query once, honoring its fetch policy.
    pub async fn query(&self, options: QueryOptions) -> Result<QueryResult, ClientError> {
        self.manager.query(options).await
    }

    /// Sends a mutation, writes its result under the mutation root, then
    /// refetches the active queries named in `refetch_queries`.
    pub async fn mutate(&self, options: MutationOptions) -> Result<QueryResult, ClientError> {
        self.manager.mutate(options).await
    }

    /// Reads a query from the store without touching the network.
    pub fn read_query(&self, query: &Query, variables: &Object) -> Result<Value, ClientError> {
        self.manager.read_query(query, variables)
    }

    /// Writes `data` into the store as the result of `query`, notifying
    /// watched queries.
    ///
    /// `data` must carry `__typename` on every object when `add_typename` is
    /// enabled.
    pub fn write_query(
        &self,
        query: &Query,
        variables: &Object,
        data: &Object,
    ) -> Result<(), ClientError> {
        self.manager.write_query(query, variables, data)
    }

    /// Empties the store and refetches every active query.
    pub async fn reset_store(&self) -> Result<(), ClientError> {
        self.manager.reset_store().await
    }

    /// Serializes the store content.
    pub fn extract(&self) -> Object {
        self.manager.extract()
    }

    /// Merges a previous [`Client::extract`] into the store, field by field.
    ///
    /// Records and fields absent from `state` are kept.
    pub fn restore(&self, state: &Object) -> Result<(), ClientError> {
        self.manager.restore(state)
    }

    /// Registers the fragment definitions of `source`, for spreads that the
    /// documents using them do not define.
    pub fn register_fragments(&self, source: &str) -> Result<usize, ClientError> {
        Ok(self.manager.register_fragments(source)?)
    }
}

/// Builder for a [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    network: Option<Arc<dyn NetworkInterface>>,
    configuration: Option<Configuration>,
    identity: Option<Arc<dyn IdentityStrategy>>,
    initial_state: Option<Object>,
    fragments: FragmentRegistry,
}

// Not using buildstructor because the trait object setters take generic arguments
impl ClientBuilder {
    /// The transport used for every operation. Required.
    pub fn network_interface(mut self, network: impl NetworkInterface) -> Self {
        self.network = Some(Arc::new(network));
        self
    }

    /// Like [`ClientBuilder::network_interface`], for an interface shared elsewhere.
    pub fn shared_network_interface(mut self, network: Arc<dyn NetworkInterface>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    /// Overrides the identity strategy from the configuration.
    pub fn identity_strategy(mut self, identity: impl IdentityStrategy) -> Self {
        self.identity = Some(Arc::new(identity));
        self
    }

    /// Store content to start from, as returned by [`Client::extract`].
    pub fn initial_state(mut self, state: Object) -> Self {
        self.initial_state = Some(state);
        self
    }

    pub fn fragments(mut self, fragments: FragmentRegistry) -> Self {
        self.fragments = fragments;
        self
    }

    pub fn build(self) -> Result<Client, ConfigurationError> {
        let network = self
            .network
            .ok_or_else(|| ConfigurationError::InvalidConfiguration {
                message: "network_interface",
                error: "a network interface is required".to_string(),
            })?;
        let configuration = self.configuration.unwrap_or_default().validate()?;

        let mut store = NormalizedStore::new();
        if let Some(state) = &self.initial_state {
            store
                .restore(state)
                .map_err(|error| ConfigurationError::InvalidConfiguration {
                    message: "initial_state",
                    error: error.to_string(),
                })?;
        }
        let identity = self
            .identity
            .unwrap_or_else(|| configuration.identity.strategy());
        tracing::debug!(
            records = store.len(),
            fragments = self.fragments.len(),
            "creating client"
        );

        Ok(Client {
            manager: Arc::new(QueryManager::new(
                network,
                configuration,
                identity,
                store,
                self.fragments,
            )),
        })
    }
}
