pub mod parse;
pub mod types;

pub use parse::{load_config, resolve_config_path, resolve_endpoints, ConfigError};
pub use types::{Config, DefaultsConfig, Endpoint, EnvironmentConfig};
