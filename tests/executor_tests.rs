use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use logsift::client::{LogEntry, QueryBackend, QueryError, RetryPolicy};
use logsift::config::Endpoint;
use logsift::executor::{build_tasks, run_search, ExecutorOptions, ProgressTracker};
use logsift::planner::plan_batches;
use logsift::timerange::TimeWindow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn endpoint(name: &str) -> Endpoint {
    Endpoint {
        name: name.to_string(),
        url: format!("http://{}.example.com", name),
    }
}

fn window_hours(hours: i64) -> TimeWindow {
    let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
    TimeWindow {
        start,
        end: start + chrono::Duration::hours(hours),
    }
}

fn entry(nanos: i64, line: &str, endpoint: &str) -> LogEntry {
    LogEntry {
        timestamp: Utc.timestamp_nanos(nanos),
        line: line.to_string(),
        labels: HashMap::new(),
        endpoint: endpoint.to_string(),
    }
}

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        rate_limit_floor: Duration::from_millis(1),
    }
}

fn options(concurrency: usize, limit: usize, retry: RetryPolicy) -> ExecutorOptions {
    ExecutorOptions {
        concurrency,
        limit,
        retry,
    }
}

/// Returns no entries; counts every backend call.
struct CountingBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl QueryBackend for CountingBackend {
    async fn query_range(
        &self,
        _endpoint: &Endpoint,
        _query: &str,
        _window: &TimeWindow,
        _limit: usize,
    ) -> Result<Vec<LogEntry>, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![])
    }
}

/// Per-endpoint canned entries with optional delivery delays, so tests can
/// force any task completion order.
struct ScriptedBackend {
    entries: HashMap<String, Vec<LogEntry>>,
    delays: HashMap<String, Duration>,
}

#[async_trait]
impl QueryBackend for ScriptedBackend {
    async fn query_range(
        &self,
        endpoint: &Endpoint,
        _query: &str,
        _window: &TimeWindow,
        _limit: usize,
    ) -> Result<Vec<LogEntry>, QueryError> {
        if let Some(delay) = self.delays.get(&endpoint.name) {
            tokio::time::sleep(*delay).await;
        }
        Ok(self.entries.get(&endpoint.name).cloned().unwrap_or_default())
    }
}

/// Fails with a 503 a fixed number of times, then succeeds.
struct FlakyBackend {
    failures_before_success: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl QueryBackend for FlakyBackend {
    async fn query_range(
        &self,
        endpoint: &Endpoint,
        _query: &str,
        _window: &TimeWindow,
        _limit: usize,
    ) -> Result<Vec<LogEntry>, QueryError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures_before_success {
            Err(QueryError::Server {
                url: endpoint.url.clone(),
                status: 503,
            })
        } else {
            Ok(vec![entry(1_000_000_000, "recovered", &endpoint.name)])
        }
    }
}

/// Always rejects with HTTP 400.
struct RejectingBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl QueryBackend for RejectingBackend {
    async fn query_range(
        &self,
        endpoint: &Endpoint,
        _query: &str,
        _window: &TimeWindow,
        _limit: usize,
    ) -> Result<Vec<LogEntry>, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(QueryError::Client {
            url: endpoint.url.clone(),
            status: 400,
            message: "parse error in query".to_string(),
        })
    }
}

#[tokio::test]
async fn test_executor_creates_endpoint_times_batch_tasks_and_resolves_all() {
    let endpoints = vec![endpoint("a"), endpoint("b"), endpoint("c")];
    let batches = plan_batches(&window_hours(16), chrono::Duration::hours(4));
    let tasks = build_tasks(&endpoints, &batches);
    assert_eq!(tasks.len(), 12);

    let backend = Arc::new(CountingBackend {
        calls: AtomicUsize::new(0),
    });
    let progress = Arc::new(ProgressTracker::new(tasks.len()));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let results = run_search(
        backend.clone(),
        tasks,
        "{job=~\".+\"} |= \"x\"".to_string(),
        options(3, 5000, fast_retry(0)),
        progress.clone(),
        cancel_rx,
    )
    .await;

    assert_eq!(backend.calls.load(Ordering::SeqCst), 12);
    assert_eq!(results.tasks_total, 12);
    assert_eq!(results.failures.len(), 0);
    assert_eq!(results.tasks_skipped, 0);
    assert_eq!(progress.snapshot().tasks_done(), 12);
}

#[tokio::test]
async fn test_merge_order_independent_of_completion_order() {
    let t1 = 1_000_000_000;
    let t2 = 2_000_000_000;
    let t3 = 3_000_000_000;

    // Run twice with the delay on opposite endpoints; the slow side
    // finishes last either way, but the merged order must not move.
    for slow in ["a", "b"] {
        let mut entries = HashMap::new();
        entries.insert(
            "a".to_string(),
            vec![entry(t1, "first", "a"), entry(t3, "third", "a")],
        );
        entries.insert("b".to_string(), vec![entry(t2, "second", "b")]);

        let mut delays = HashMap::new();
        delays.insert(slow.to_string(), Duration::from_millis(50));

        let backend = Arc::new(ScriptedBackend { entries, delays });
        let endpoints = vec![endpoint("a"), endpoint("b")];
        let batches = plan_batches(&window_hours(1), chrono::Duration::hours(4));
        let tasks = build_tasks(&endpoints, &batches);
        let progress = Arc::new(ProgressTracker::new(tasks.len()));
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let results = run_search(
            backend,
            tasks,
            "q".to_string(),
            options(2, 5000, fast_retry(0)),
            progress,
            cancel_rx,
        )
        .await;

        let lines: Vec<&str> = results.entries.iter().map(|e| e.line.as_str()).collect();
        assert_eq!(lines, vec!["first", "second", "third"], "slow={}", slow);
    }
}

#[tokio::test]
async fn test_transient_failures_retried_until_success() {
    let backend = Arc::new(FlakyBackend {
        failures_before_success: 3,
        calls: AtomicUsize::new(0),
    });
    let endpoints = vec![endpoint("a")];
    let batches = plan_batches(&window_hours(1), chrono::Duration::hours(4));
    let tasks = build_tasks(&endpoints, &batches);
    let progress = Arc::new(ProgressTracker::new(tasks.len()));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let results = run_search(
        backend.clone(),
        tasks,
        "q".to_string(),
        options(1, 5000, fast_retry(3)),
        progress,
        cancel_rx,
    )
    .await;

    // Three 503s, three retries, fourth attempt lands.
    assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
    assert_eq!(results.failures.len(), 0);
    assert_eq!(results.entries.len(), 1);
    assert_eq!(results.entries[0].line, "recovered");
}

#[tokio::test]
async fn test_exhausted_retries_recorded_not_fatal() {
    let backend = Arc::new(FlakyBackend {
        failures_before_success: usize::MAX,
        calls: AtomicUsize::new(0),
    });
    let endpoints = vec![endpoint("a")];
    let batches = plan_batches(&window_hours(1), chrono::Duration::hours(4));
    let tasks = build_tasks(&endpoints, &batches);
    let progress = Arc::new(ProgressTracker::new(tasks.len()));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let results = run_search(
        backend.clone(),
        tasks,
        "q".to_string(),
        options(1, 5000, fast_retry(2)),
        progress,
        cancel_rx,
    )
    .await;

    // Initial attempt plus two retries.
    assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    assert_eq!(results.failures.len(), 1);
    assert!(results.failures[0].failure.retries_exhausted);
}

#[tokio::test]
async fn test_client_error_is_never_retried() {
    let backend = Arc::new(RejectingBackend {
        calls: AtomicUsize::new(0),
    });
    let endpoints = vec![endpoint("a")];
    let batches = plan_batches(&window_hours(1), chrono::Duration::hours(4));
    let tasks = build_tasks(&endpoints, &batches);
    let progress = Arc::new(ProgressTracker::new(tasks.len()));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let results = run_search(
        backend.clone(),
        tasks,
        "q".to_string(),
        options(1, 5000, fast_retry(3)),
        progress,
        cancel_rx,
    )
    .await;

    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    assert_eq!(results.failures.len(), 1);
    let failure = &results.failures[0].failure;
    assert!(!failure.retries_exhausted);
    assert!(matches!(failure.error, QueryError::Client { status: 400, .. }));
}

#[tokio::test]
async fn test_partial_failure_keeps_sibling_results() {
    struct HalfBackend {
        good: ScriptedBackend,
    }

    #[async_trait]
    impl QueryBackend for HalfBackend {
        async fn query_range(
            &self,
            endpoint: &Endpoint,
            query: &str,
            window: &TimeWindow,
            limit: usize,
        ) -> Result<Vec<LogEntry>, QueryError> {
            if endpoint.name == "bad" {
                Err(QueryError::Client {
                    url: endpoint.url.clone(),
                    status: 404,
                    message: "no such tenant".to_string(),
                })
            } else {
                self.good.query_range(endpoint, query, window, limit).await
            }
        }
    }

    let mut entries = HashMap::new();
    entries.insert(
        "good".to_string(),
        vec![entry(1_000_000_000, "kept", "good")],
    );

    let backend = Arc::new(HalfBackend {
        good: ScriptedBackend {
            entries,
            delays: HashMap::new(),
        },
    });
    let endpoints = vec![endpoint("good"), endpoint("bad")];
    let batches = plan_batches(&window_hours(1), chrono::Duration::hours(4));
    let tasks = build_tasks(&endpoints, &batches);
    let progress = Arc::new(ProgressTracker::new(tasks.len()));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let results = run_search(
        backend,
        tasks,
        "q".to_string(),
        options(2, 5000, fast_retry(0)),
        progress,
        cancel_rx,
    )
    .await;

    assert_eq!(results.entries.len(), 1);
    assert_eq!(results.entries[0].line, "kept");
    assert_eq!(results.failures.len(), 1);
    assert_eq!(results.failures[0].endpoint.name, "bad");
}

#[tokio::test]
async fn test_cancellation_skips_queued_tasks() {
    let backend = Arc::new(CountingBackend {
        calls: AtomicUsize::new(0),
    });
    let endpoints = vec![endpoint("a"), endpoint("b")];
    let batches = plan_batches(&window_hours(8), chrono::Duration::hours(4));
    let tasks = build_tasks(&endpoints, &batches);
    let total = tasks.len();
    let progress = Arc::new(ProgressTracker::new(total));

    let (cancel_tx, cancel_rx) = watch::channel(false);
    cancel_tx.send(true).unwrap();

    let results = run_search(
        backend.clone(),
        tasks,
        "q".to_string(),
        options(2, 5000, fast_retry(0)),
        progress,
        cancel_rx,
    )
    .await;

    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    assert_eq!(results.tasks_skipped, total);
    assert!(results.entries.is_empty());
}

#[tokio::test]
async fn test_batch_hitting_limit_is_flagged_as_truncated() {
    let mut entries = HashMap::new();
    entries.insert(
        "a".to_string(),
        vec![
            entry(1_000_000_000, "one", "a"),
            entry(2_000_000_000, "two", "a"),
        ],
    );

    let backend = Arc::new(ScriptedBackend {
        entries,
        delays: HashMap::new(),
    });
    let endpoints = vec![endpoint("a")];
    let batches = plan_batches(&window_hours(1), chrono::Duration::hours(4));
    let tasks = build_tasks(&endpoints, &batches);
    let progress = Arc::new(ProgressTracker::new(tasks.len()));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let results = run_search(
        backend,
        tasks,
        "q".to_string(),
        options(1, 2, fast_retry(0)),
        progress,
        cancel_rx,
    )
    .await;

    assert_eq!(results.entries.len(), 2);
    assert_eq!(results.truncated.len(), 1);
    assert_eq!(results.truncated[0].returned, 2);
}
