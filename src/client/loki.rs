use crate::client::error::QueryError;
use crate::config::types::Endpoint;
use crate::timerange::TimeWindow;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A single matched log line, tagged with its source endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub line: String,
    pub labels: HashMap<String, String>,
    pub endpoint: String,
}

/// One range query against one backend instance. `LokiClient` is the real
/// implementation; tests substitute their own.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn query_range(
        &self,
        endpoint: &Endpoint,
        query: &str,
        window: &TimeWindow,
        limit: usize,
    ) -> Result<Vec<LogEntry>, QueryError>;
}

/// HTTP client for the Loki `query_range` API.
#[derive(Debug, Clone)]
pub struct LokiClient {
    http: reqwest::Client,
}

impl LokiClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl QueryBackend for LokiClient {
    async fn query_range(
        &self,
        endpoint: &Endpoint,
        query: &str,
        window: &TimeWindow,
        limit: usize,
    ) -> Result<Vec<LogEntry>, QueryError> {
        let url = format!(
            "{}/loki/api/v1/query_range",
            endpoint.url.trim_end_matches('/')
        );

        let response = self
            .http
            .get(&url)
            .query(&[
                ("query", query.to_string()),
                ("start", to_unix_nanos(window.start).to_string()),
                ("end", to_unix_nanos(window.end).to_string()),
                ("limit", limit.to_string()),
                ("direction", "forward".to_string()),
            ])
            .send()
            .await
            .map_err(|e| classify_transport(&endpoint.url, e))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(QueryError::RateLimited {
                url: endpoint.url.clone(),
                retry_after,
            });
        }
        if status.is_server_error() {
            return Err(QueryError::Server {
                url: endpoint.url.clone(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(QueryError::Client {
                url: endpoint.url.clone(),
                status: status.as_u16(),
                message: truncate(&message, 200),
            });
        }

        let payload: QueryResponse =
            response.json().await.map_err(|e| QueryError::Parse {
                url: endpoint.url.clone(),
                message: e.to_string(),
            })?;

        flatten_streams(payload, endpoint)
    }
}

// ===== Response payload =====

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    data: QueryData,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: Vec<LogStream>,
}

#[derive(Debug, Deserialize)]
struct LogStream {
    stream: HashMap<String, String>,
    values: Vec<(String, String)>,
}

/// Flatten the stream-list payload into endpoint-tagged entries, sorted by
/// timestamp (streams arrive ordered individually but interleave).
fn flatten_streams(payload: QueryResponse, endpoint: &Endpoint) -> Result<Vec<LogEntry>, QueryError> {
    if payload.status != "success" {
        return Err(QueryError::Parse {
            url: endpoint.url.clone(),
            message: format!("backend reported status '{}'", payload.status),
        });
    }
    if payload.data.result_type != "streams" {
        return Err(QueryError::Parse {
            url: endpoint.url.clone(),
            message: format!("unexpected result type '{}'", payload.data.result_type),
        });
    }

    let mut entries = Vec::new();
    for stream in payload.data.result {
        for (ts, line) in stream.values {
            let nanos: i64 = ts.parse().map_err(|_| QueryError::Parse {
                url: endpoint.url.clone(),
                message: format!("unparseable timestamp '{}'", ts),
            })?;
            entries.push(LogEntry {
                timestamp: Utc.timestamp_nanos(nanos),
                line,
                labels: stream.stream.clone(),
                endpoint: endpoint.name.clone(),
            });
        }
    }

    entries.sort_by_key(|e| e.timestamp);
    Ok(entries)
}

fn classify_transport(url: &str, error: reqwest::Error) -> QueryError {
    if error.is_timeout() {
        QueryError::Timeout {
            url: url.to_string(),
        }
    } else {
        QueryError::Connectivity {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

/// Nanosecond epoch for the Loki API; saturates for dates beyond 2262.
fn to_unix_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
