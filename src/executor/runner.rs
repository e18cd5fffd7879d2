use crate::client::loki::{LogEntry, QueryBackend};
use crate::client::retry::{query_with_retry, RetryPolicy, TaskFailure};
use crate::config::types::Endpoint;
use crate::executor::progress::ProgressTracker;
use crate::planner::Batch;
use crate::timerange::TimeWindow;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error};

/// The unit of execution: one batch window against one endpoint.
/// Identity is (endpoint, batch.index).
#[derive(Debug, Clone)]
pub struct SearchTask {
    pub endpoint: Endpoint,
    pub batch: Batch,
}

#[derive(Debug)]
pub enum TaskOutcome {
    Success { entries: Vec<LogEntry> },
    Failure(TaskFailure),
}

/// How one task ended up. Skipped covers tasks abandoned after an
/// operator interrupt, before any request was issued.
#[derive(Debug)]
enum Resolution {
    Outcome(TaskOutcome),
    Skipped,
}

struct TaskMessage {
    index: usize,
    resolution: Resolution,
}

/// A task that terminally failed, kept for the final summary.
#[derive(Debug)]
pub struct FailedTask {
    pub endpoint: Endpoint,
    pub window: TimeWindow,
    pub failure: TaskFailure,
}

/// A task whose entry count hit the per-batch limit: the backend may hold
/// more matching lines in that window than were returned.
#[derive(Debug)]
pub struct TruncatedBatch {
    pub endpoint: Endpoint,
    pub window: TimeWindow,
    pub returned: usize,
}

/// Union of all successful task entries in deterministic global order,
/// plus everything the summary needs to report.
#[derive(Debug)]
pub struct SearchResults {
    pub entries: Vec<LogEntry>,
    pub failures: Vec<FailedTask>,
    pub truncated: Vec<TruncatedBatch>,
    pub tasks_total: usize,
    pub tasks_skipped: usize,
}

pub struct ExecutorOptions {
    pub concurrency: usize,
    pub limit: usize,
    pub retry: RetryPolicy,
}

/// Build the full task set: every batch against every endpoint,
/// batch-major so the plan reads chronologically.
pub fn build_tasks(endpoints: &[Endpoint], batches: &[Batch]) -> Vec<SearchTask> {
    let mut tasks = Vec::with_capacity(endpoints.len() * batches.len());
    for batch in batches {
        for endpoint in endpoints {
            tasks.push(SearchTask {
                endpoint: endpoint.clone(),
                batch: *batch,
            });
        }
    }
    tasks
}

/// Run every task through a bounded worker pool and merge the outcomes.
///
/// At most `concurrency` tasks are in flight at any instant, regardless
/// of how many endpoints or batches exist. A failing task never aborts
/// its siblings; cancellation is cooperative and leaves in-flight
/// requests to finish on their own.
pub async fn run_search(
    backend: Arc<dyn QueryBackend>,
    tasks: Vec<SearchTask>,
    query: String,
    options: ExecutorOptions,
    progress: Arc<ProgressTracker>,
    cancel: watch::Receiver<bool>,
) -> SearchResults {
    let tasks_total = tasks.len();
    let limit = options.limit;
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let retry = Arc::new(options.retry);
    let query = Arc::new(query);
    let (tx, mut rx) = mpsc::channel::<TaskMessage>(tasks_total.max(1));

    let mut handles = Vec::with_capacity(tasks_total);
    for (index, task) in tasks.iter().cloned().enumerate() {
        let backend = backend.clone();
        let retry = retry.clone();
        let query = query.clone();
        let tx = tx.clone();
        let semaphore = semaphore.clone();
        let mut cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let _ = tx
                        .send(TaskMessage {
                            index,
                            resolution: Resolution::Skipped,
                        })
                        .await;
                    return;
                }
            };

            // Abandon still-queued work once the operator interrupts;
            // whatever is already aggregated still gets emitted.
            if *cancel.borrow() {
                let _ = tx
                    .send(TaskMessage {
                        index,
                        resolution: Resolution::Skipped,
                    })
                    .await;
                return;
            }

            debug!(
                endpoint = %task.endpoint.name,
                window = %task.batch.window,
                "Task started"
            );

            let resolution = match query_with_retry(
                backend.as_ref(),
                &retry,
                &task.endpoint,
                &query,
                &task.batch.window,
                limit,
                &mut cancel,
            )
            .await
            {
                Ok(entries) => Resolution::Outcome(TaskOutcome::Success { entries }),
                Err(failure) => Resolution::Outcome(TaskOutcome::Failure(failure)),
            };

            let _ = tx.send(TaskMessage { index, resolution }).await;
        }));
    }
    drop(tx);

    // Single aggregation point: the progress counters and the accumulator
    // are only touched here, never by workers.
    let mut slots: Vec<Option<Resolution>> = Vec::with_capacity(tasks_total);
    slots.resize_with(tasks_total, || None);

    while let Some(TaskMessage { index, resolution }) = rx.recv().await {
        match &resolution {
            Resolution::Outcome(TaskOutcome::Success { entries }) => {
                progress.record_success(&tasks[index].endpoint.name, entries.len());
            }
            Resolution::Outcome(TaskOutcome::Failure(failure)) => {
                debug!(
                    endpoint = %tasks[index].endpoint.name,
                    error = %failure.error,
                    "Task failed terminally"
                );
                progress.record_failure();
            }
            Resolution::Skipped => progress.record_skipped(),
        }
        slots[index] = Some(resolution);
    }

    // Surface panicked workers rather than silently losing their slot.
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!(error = %e, "Worker task join error");
        }
    }

    let mut entries = Vec::new();
    let mut failures = Vec::new();
    let mut truncated = Vec::new();
    let mut tasks_skipped = 0;

    for (index, slot) in slots.into_iter().enumerate() {
        let task = &tasks[index];
        match slot {
            Some(Resolution::Outcome(TaskOutcome::Success {
                entries: task_entries,
            })) => {
                if limit > 0 && task_entries.len() >= limit {
                    truncated.push(TruncatedBatch {
                        endpoint: task.endpoint.clone(),
                        window: task.batch.window,
                        returned: task_entries.len(),
                    });
                }
                entries.extend(task_entries);
            }
            Some(Resolution::Outcome(TaskOutcome::Failure(failure))) => {
                failures.push(FailedTask {
                    endpoint: task.endpoint.clone(),
                    window: task.batch.window,
                    failure,
                });
            }
            Some(Resolution::Skipped) | None => tasks_skipped += 1,
        }
    }

    // Global order is by timestamp then endpoint, independent of task
    // completion order. The sort is stable and the accumulation order
    // above is deterministic, so full ties stay reproducible too.
    entries.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.endpoint.cmp(&b.endpoint))
    });

    SearchResults {
        entries,
        failures,
        truncated,
        tasks_total,
        tasks_skipped,
    }
}
