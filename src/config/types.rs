use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Optional on-disk configuration: named environments mapping to endpoint
/// sets, plus overridable execution defaults. Everything here can also be
/// supplied (or overridden) on the command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentConfig>,

    #[serde(default)]
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub endpoints: Vec<Endpoint>,
}

/// One backend log-query service instance (e.g. one regional deployment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Maximum duration covered by a single backend query.
    #[serde(with = "humantime_serde", default = "default_batch_size")]
    pub batch_size: Duration,

    /// Per-request timeout, distinct from any overall budget.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-batch line limit passed to the backend.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            timeout: default_timeout(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            limit: default_limit(),
        }
    }
}

fn default_batch_size() -> Duration {
    Duration::from_secs(14_400)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_concurrency() -> usize {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_limit() -> usize {
    5000
}
