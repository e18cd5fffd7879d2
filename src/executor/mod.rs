pub mod progress;
pub mod runner;

pub use progress::{run_renderer, ProgressSnapshot, ProgressTracker};
pub use runner::{
    build_tasks, run_search, ExecutorOptions, FailedTask, SearchResults, SearchTask, TaskOutcome,
    TruncatedBatch,
};
