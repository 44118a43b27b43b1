//! Client configuration.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use derivative::Derivative;
use displaydoc::Display;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::cache::IdentityStrategy;
use crate::cache::PathOnly;
use crate::cache::TypenameAndId;

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
    /// could not deserialize configuration: {0}
    DeserializeConfigError(serde_json::Error),
    /// could not deserialize configuration: {0}
    DeserializeYamlConfigError(serde_yaml::Error),
}

const DEFAULT_SSR_FORCE_FETCH_DELAY: Duration = Duration::from_secs(0);

fn default_true() -> bool {
    true
}

fn default_ssr_force_fetch_delay() -> Duration {
    DEFAULT_SSR_FORCE_FETCH_DELAY
}

/// The configuration for the client.
///
/// Can be created through `serde::Deserialize` from various formats,
/// or inline in Rust code with the builder.
#[derive(Clone, Derivative, Deserialize, Serialize, JsonSchema)]
#[derivative(Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Add `__typename` to every selection set below the operation root; defaults to true
    #[serde(default = "default_true")]
    pub add_typename: bool,

    /// Share one network request between identical concurrent requests; defaults to true
    #[serde(default = "default_true")]
    pub query_deduplication: bool,

    /// Never force a network fetch, as when rendering on a server; defaults to false
    #[serde(default)]
    pub ssr_mode: bool,

    /// Serve forced network fetches from the cache for this long after the
    /// client is created, in human-readable format; defaults to 0s
    #[serde(
        deserialize_with = "humantime_serde::deserialize",
        serialize_with = "humantime_serde::serialize",
        default = "default_ssr_force_fetch_delay"
    )]
    #[schemars(with = "String", default = "default_ssr_force_fetch_delay")]
    pub ssr_force_fetch_delay: Duration,

    /// Fetch only the part of a query missing from the cache; defaults to false
    #[serde(default)]
    pub partial_fetching: bool,

    /// How store identities are derived from response objects
    #[serde(default)]
    pub identity: Identity,
}

/// Store identity derivation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum Identity {
    /// `Type:id` from `__typename` and the given id fields
    TypenameAndId {
        #[serde(default = "default_id_fields")]
        id_fields: Vec<String>,
    },
    /// Every object is stored under the path that reached it
    Path,
}

fn default_id_fields() -> Vec<String> {
    vec!["id".to_string()]
}

impl Default for Identity {
    fn default() -> Self {
        Identity::TypenameAndId {
            id_fields: default_id_fields(),
        }
    }
}

impl Identity {
    pub(crate) fn strategy(&self) -> Arc<dyn IdentityStrategy> {
        match self {
            Identity::TypenameAndId { id_fields } => Arc::new(TypenameAndId::new(id_fields.clone())),
            Identity::Path => Arc::new(PathOnly),
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            add_typename: true,
            query_deduplication: true,
            ssr_mode: false,
            ssr_force_fetch_delay: DEFAULT_SSR_FORCE_FETCH_DELAY,
            partial_fetching: false,
            identity: Identity::default(),
        }
    }
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder(visibility = "pub")]
    fn new(
        add_typename: Option<bool>,
        query_deduplication: Option<bool>,
        ssr_mode: Option<bool>,
        ssr_force_fetch_delay: Option<Duration>,
        partial_fetching: Option<bool>,
        identity: Option<Identity>,
    ) -> Result<Self, ConfigurationError> {
        let configuration = Self {
            add_typename: add_typename.unwrap_or(true),
            query_deduplication: query_deduplication.unwrap_or(true),
            ssr_mode: ssr_mode.unwrap_or_default(),
            ssr_force_fetch_delay: ssr_force_fetch_delay
                .unwrap_or_else(default_ssr_force_fetch_delay),
            partial_fetching: partial_fetching.unwrap_or_default(),
            identity: identity.unwrap_or_default(),
        };
        configuration.validate()
    }

    /// Parses a JSON configuration.
    pub fn from_json(s: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str::<Self>(s)
            .map_err(ConfigurationError::DeserializeConfigError)?
            .validate()
    }

    pub(crate) fn validate(self) -> Result<Self, ConfigurationError> {
        if let Identity::TypenameAndId { id_fields } = &self.identity {
            if id_fields.is_empty() {
                return Err(ConfigurationError::InvalidConfiguration {
                    message: "identity.typename_and_id.id_fields",
                    error: "at least one id field is required".to_string(),
                });
            }
            if id_fields.iter().any(|field| field.is_empty()) {
                return Err(ConfigurationError::InvalidConfiguration {
                    message: "identity.typename_and_id.id_fields",
                    error: "id fields must not be empty".to_string(),
                });
            }
        }
        Ok(self)
    }
}

/// Parse configuration from a string in YAML syntax
impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str::<Self>(s)
            .map_err(ConfigurationError::DeserializeYamlConfigError)?
            .validate()
    }
}
