//! Secrets and environment variables injected into every process.
//!
//! Values never pass through the orchestrator. Each variable is a reference
//! into the environment's secret store, resolved by the cluster at start-up.

use serde::{Deserialize, Serialize};

use crate::naming;

/// Keys read from the environment's secret store.
pub const SECRET_KEYS: [&str; 10] = [
    "DB_PASS",
    "DB_USER",
    "DFUSE_API_KEY",
    "DJANGO_SECRET_KEY",
    "ETHERSCAN_API_KEY",
    "INFURA_API_KEY",
    "ETH_GAS_STATION",
    "LAUNCH_DARKLY_SDK_KEY",
    "RABBIT_PASS",
    "RABBIT_USER",
];

/// Variable carrying the environment name.
pub const ENVIRONMENT_VAR: &str = "ENVIRONMENT";

/// Where an environment variable's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnvSource {
    /// A literal value.
    Literal {
        /// The value.
        value: String,
    },
    /// A key in a named secret store.
    Secret {
        /// Secret store name.
        store: String,
        /// Key within the store.
        key: String,
    },
}

/// A container environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Value source.
    pub source: EnvSource,
}

impl EnvVar {
    /// A literal variable.
    #[must_use]
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: EnvSource::Literal {
                value: value.into(),
            },
        }
    }

    /// A variable sourced from a secret store key of the same name.
    #[must_use]
    pub fn secret(store: impl Into<String>, key: &str) -> Self {
        Self {
            name: key.to_owned(),
            source: EnvSource::Secret {
                store: store.into(),
                key: key.to_owned(),
            },
        }
    }
}

/// Full environment for an application container: the environment name
/// followed by every secret reference.
#[must_use]
pub fn process_env(service: &str, environment: &str) -> Vec<EnvVar> {
    let store = naming::secret_store(service, environment);
    std::iter::once(EnvVar::literal(ENVIRONMENT_VAR, environment))
        .chain(SECRET_KEYS.iter().map(|key| EnvVar::secret(&store, key)))
        .collect()
}
