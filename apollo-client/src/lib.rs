//! A GraphQL client with a normalized cache.
//!
//! Responses are flattened into a [`cache::NormalizedStore`] keyed by object
//! identity. Watched queries are re-read from the store after every write, so
//! that a change fetched by one query reaches every other query selecting the
//! same objects.

#![warn(unreachable_pub)]

pub mod cache;
mod client;
mod configuration;
pub mod error;
pub mod graphql;
pub mod json_ext;
pub mod network;
mod observable;
mod query_manager;
pub mod spec;
pub mod transform;

pub use client::Client;
pub use client::ClientBuilder;
pub use configuration::Configuration;
pub use configuration::Identity;
pub use network::MockNetworkInterface;
pub use network::NetworkInterface;
pub use observable::ObservableQuery;
pub use observable::QuerySubscription;
pub use query_manager::FetchMoreOptions;
pub use query_manager::FetchMoreResult;
pub use query_manager::FetchPolicy;
pub use query_manager::MutationOptions;
pub use query_manager::NetworkStatus;
pub use query_manager::QueryId;
pub use query_manager::QueryOptions;
pub use query_manager::QueryResult;
pub use query_manager::WatchQueryOptions;
pub use spec::Query;
