pub mod error;
pub mod loki;
pub mod retry;

pub use error::QueryError;
pub use loki::{LogEntry, LokiClient, QueryBackend};
pub use retry::{query_with_retry, RetryPolicy, TaskFailure};
