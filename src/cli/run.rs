use crate::client::loki::{LokiClient, QueryBackend};
use crate::client::retry::RetryPolicy;
use crate::config::{self, ConfigError};
use crate::executor::progress::{run_renderer, ProgressTracker};
use crate::executor::runner::{build_tasks, run_search, ExecutorOptions};
use crate::output::{render_entries, render_summary, OutputFormat};
use crate::planner::plan_batches;
use crate::query::{build_query, KeywordLogic, MatchMode, QueryBuildError, SearchSpec};
use crate::timerange::{self, TimeRangeError};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("time range error: {0}")]
    TimeRange(#[from] TimeRangeError),

    #[error("query error: {0}")]
    Query(#[from] QueryBuildError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("--batch-size must be between 1 second and 1 year")]
    InvalidBatchSize,

    #[error("all {0} tasks failed")]
    AllTasksFailed(usize),

    #[error("output error: {0}")]
    Output(#[from] std::io::Error),
}

impl SearchError {
    /// 1 when the search ran and nothing succeeded; 2 when the spec was
    /// invalid and nothing was attempted.
    pub fn exit_code(&self) -> i32 {
        match self {
            SearchError::AllTasksFailed(_) => 1,
            _ => 2,
        }
    }
}

/// Resolved invocation options, handed over by the argument parser.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub keywords: Vec<String>,
    pub mode: MatchMode,
    pub require_all: bool,
    pub labels: Vec<String>,
    pub environment: String,
    pub loki_urls: Vec<String>,
    pub relative: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub batch_size_secs: Option<u64>,
    pub concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub limit: Option<usize>,
    pub dry_run: bool,
    pub verbose: bool,
    pub quiet: bool,
    pub format: OutputFormat,
    pub config_path: Option<PathBuf>,
}

/// Resolve the spec, plan the work, and either print the plan (dry run)
/// or execute it and render the results.
pub async fn run(options: SearchOptions) -> Result<(), SearchError> {
    let config = match config::resolve_config_path(options.config_path.clone()) {
        Some(path) => Some(config::load_config(&path)?),
        None => None,
    };
    let defaults = config
        .as_ref()
        .map(|c| c.defaults.clone())
        .unwrap_or_default();

    let endpoints =
        config::resolve_endpoints(config.as_ref(), &options.environment, &options.loki_urls)?;

    let window = timerange::resolve(
        options.relative.as_deref(),
        options.start.as_deref(),
        options.end.as_deref(),
        Utc::now(),
    )?;

    const MAX_BATCH_SECS: u64 = 366 * 24 * 3600;
    let batch_size_secs = options
        .batch_size_secs
        .unwrap_or(defaults.batch_size.as_secs());
    if batch_size_secs == 0 || batch_size_secs > MAX_BATCH_SECS {
        return Err(SearchError::InvalidBatchSize);
    }
    let batch_size = chrono::Duration::seconds(batch_size_secs as i64);

    let spec = SearchSpec {
        keywords: options.keywords.clone(),
        mode: options.mode,
        logic: if options.require_all {
            KeywordLogic::And
        } else {
            KeywordLogic::Or
        },
        labels: options.labels.clone(),
        limit: options.limit.unwrap_or(defaults.limit),
    };
    let query = build_query(&spec)?;

    let batches = plan_batches(&window, batch_size);
    let tasks = build_tasks(&endpoints, &batches);

    info!(
        window = %window,
        batches = batches.len(),
        endpoints = endpoints.len(),
        tasks = tasks.len(),
        "Planned search"
    );

    if options.dry_run {
        println!(
            "dry run: {} batches x {} endpoints = {} tasks",
            batches.len(),
            endpoints.len(),
            tasks.len()
        );
        println!("query: {}", query);
        for task in &tasks {
            println!(
                "  [{:>3}] {} {}",
                task.batch.index, task.endpoint.name, task.batch.window
            );
        }
        return Ok(());
    }

    let timeout = options
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(defaults.timeout);
    let retry = RetryPolicy {
        max_retries: options.max_retries.unwrap_or(defaults.max_retries),
        ..RetryPolicy::default()
    };
    let concurrency = options.concurrency.unwrap_or(defaults.concurrency);

    let backend: Arc<dyn QueryBackend> = Arc::new(LokiClient::new(timeout)?);
    let progress = Arc::new(ProgressTracker::new(tasks.len()));

    // Ctrl+C flips the cancellation flag; tasks drain cooperatively and
    // whatever has been aggregated is still emitted.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, draining in-flight tasks");
            let _ = cancel_tx.send(true);
        }
    });

    let renderer = if options.quiet {
        None
    } else {
        Some(tokio::spawn(run_renderer(
            progress.clone(),
            options.verbose,
        )))
    };

    let started = Instant::now();
    let results = run_search(
        backend,
        tasks,
        query,
        ExecutorOptions {
            concurrency,
            limit: spec.limit,
            retry,
        },
        progress.clone(),
        cancel_rx,
    )
    .await;

    if let Some(handle) = renderer {
        handle.abort();
        let _ = handle.await;
    }

    render_entries(&results, options.format, &mut std::io::stdout().lock())?;
    render_summary(&results, started.elapsed(), &mut std::io::stderr().lock())?;

    if results.tasks_total > 0 && results.failures.len() == results.tasks_total {
        return Err(SearchError::AllTasksFailed(results.tasks_total));
    }

    Ok(())
}
