use std::time::Duration;
use thiserror::Error;

/// Closed classification of per-task backend failures, constructed by a
/// single classification pass at the HTTP boundary.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("connection to {url} failed: {message}")]
    Connectivity { url: String, message: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("{url} returned server error {status}")]
    Server { url: String, status: u16 },

    #[error("{url} rate-limited the request (HTTP 429)")]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },

    #[error("{url} rejected the query with HTTP {status}: {message}")]
    Client {
        url: String,
        status: u16,
        message: String,
    },

    #[error("malformed response from {url}: {message}")]
    Parse { url: String, message: String },
}

impl QueryError {
    /// Whether retrying the same request can possibly succeed.
    ///
    /// Client rejections and unparseable payloads are terminal: the query
    /// or the endpoint is wrong, and retrying cannot change that.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueryError::Connectivity { .. }
                | QueryError::Timeout { .. }
                | QueryError::Server { .. }
                | QueryError::RateLimited { .. }
        )
    }

    /// Actionable hint paired with every user-visible failure.
    pub fn suggestion(&self) -> &'static str {
        match self {
            QueryError::Connectivity { .. } => {
                "check network/VPN reachability and the endpoint URL"
            }
            QueryError::Timeout { .. } => "reduce --batch-size or raise --timeout",
            QueryError::Server { .. } => "reduce --batch-size so each query scans less data",
            QueryError::RateLimited { .. } => "reduce --concurrency to ease pressure on the endpoint",
            QueryError::Client { .. } => "check the query, label selectors, and endpoint URL",
            QueryError::Parse { .. } => "confirm the endpoint serves the Loki query_range API",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds_are_retryable() {
        assert!(QueryError::Connectivity {
            url: "u".into(),
            message: "m".into()
        }
        .is_retryable());
        assert!(QueryError::Timeout { url: "u".into() }.is_retryable());
        assert!(QueryError::Server {
            url: "u".into(),
            status: 503
        }
        .is_retryable());
        assert!(QueryError::RateLimited {
            url: "u".into(),
            retry_after: None
        }
        .is_retryable());
    }

    #[test]
    fn test_terminal_kinds_are_not_retryable() {
        assert!(!QueryError::Client {
            url: "u".into(),
            status: 400,
            message: "bad query".into()
        }
        .is_retryable());
        assert!(!QueryError::Parse {
            url: "u".into(),
            message: "not json".into()
        }
        .is_retryable());
    }
}
