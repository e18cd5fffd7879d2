use crate::config::types::{Config, Endpoint};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("environment '{0}' defines no endpoints")]
    EmptyEnvironment(String),

    #[error("no endpoints for environment '{0}'; add it to the config file or pass --loki-url")]
    UnknownEnvironment(String),

    #[error("endpoint url '{0}' is not a valid http(s) URL")]
    InvalidUrl(String),
}

/// Load and validate a YAML config file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let config: Config = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;

    for (name, env) in &config.environments {
        if env.endpoints.is_empty() {
            return Err(ConfigError::EmptyEnvironment(name.clone()));
        }
        for endpoint in &env.endpoints {
            validate_url(&endpoint.url)?;
        }
    }

    Ok(config)
}

/// Find the config file: explicit path, then `~/.config/logsift/config.yml`,
/// then `/etc/logsift/config.yml`.
pub fn resolve_config_path(explicit_path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path);
    }

    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(".config/logsift/config.yml");
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from("/etc/logsift/config.yml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Resolve the endpoint set for this invocation.
///
/// Explicit `--loki-url` values win and bypass the environment entirely.
/// Otherwise the named environment is looked up in the config; `dev`
/// falls back to a local instance when unconfigured.
pub fn resolve_endpoints(
    config: Option<&Config>,
    environment: &str,
    urls: &[String],
) -> Result<Vec<Endpoint>, ConfigError> {
    if !urls.is_empty() {
        return urls
            .iter()
            .map(|url| {
                validate_url(url)?;
                Ok(Endpoint {
                    name: endpoint_name(url),
                    url: url.trim_end_matches('/').to_string(),
                })
            })
            .collect();
    }

    if let Some(env) = config.and_then(|c| c.environments.get(environment)) {
        return Ok(env
            .endpoints
            .iter()
            .map(|e| Endpoint {
                name: e.name.clone(),
                url: e.url.trim_end_matches('/').to_string(),
            })
            .collect());
    }

    if environment == "dev" {
        return Ok(vec![Endpoint {
            name: "dev".to_string(),
            url: "http://localhost:3100".to_string(),
        }]);
    }

    Err(ConfigError::UnknownEnvironment(environment.to_string()))
}

fn validate_url(url: &str) -> Result<(), ConfigError> {
    let parsed = reqwest::Url::parse(url).map_err(|_| ConfigError::InvalidUrl(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(ConfigError::InvalidUrl(url.to_string())),
    }
}

/// Derive a short display name for an ad-hoc endpoint from its host.
fn endpoint_name(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| url.to_string())
}
