use logsift::cli::run::{run, SearchOptions};
use logsift::output::OutputFormat;
use logsift::planner::plan_batches;
use logsift::query::MatchMode;
use logsift::timerange;
use chrono::{TimeZone, Utc};

fn base_options() -> SearchOptions {
    SearchOptions {
        keywords: vec!["needle".to_string()],
        mode: MatchMode::Contains,
        require_all: false,
        labels: vec![],
        environment: "dev".to_string(),
        // Unroutable on purpose: these tests must not depend on a backend.
        loki_urls: vec!["http://127.0.0.1:1".to_string()],
        relative: None,
        start: Some("2023-01-01T00:00:00Z".to_string()),
        end: Some("2023-01-01T08:00:00Z".to_string()),
        batch_size_secs: Some(14_400),
        concurrency: Some(2),
        timeout_secs: Some(1),
        max_retries: Some(0),
        limit: None,
        dry_run: false,
        verbose: false,
        quiet: true,
        format: OutputFormat::Text,
        config_path: None,
    }
}

#[test]
fn test_eight_hour_window_plans_two_batches() {
    let window = timerange::resolve(
        None,
        Some("2023-01-01T00:00:00Z"),
        Some("2023-01-01T08:00:00Z"),
        Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap(),
    )
    .unwrap();

    let batches = plan_batches(&window, chrono::Duration::seconds(14_400));
    assert_eq!(batches.len(), 2);
}

#[tokio::test]
async fn test_dry_run_succeeds_without_reachable_backend() {
    let options = SearchOptions {
        dry_run: true,
        ..base_options()
    };

    // The endpoint is unroutable, so success here means the plan was
    // printed without any network activity.
    run(options).await.unwrap();
}

#[tokio::test]
async fn test_invalid_relative_expression_is_a_spec_error() {
    let options = SearchOptions {
        relative: Some("5 fortnights".to_string()),
        start: None,
        end: None,
        ..base_options()
    };

    let err = run(options).await.unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_invalid_label_is_a_spec_error() {
    let options = SearchOptions {
        labels: vec!["notaselector".to_string()],
        ..base_options()
    };

    let err = run(options).await.unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_unresolvable_environment_is_a_spec_error() {
    let options = SearchOptions {
        loki_urls: vec![],
        environment: "prod".to_string(),
        dry_run: true,
        ..base_options()
    };

    let err = run(options).await.unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_every_task_failing_exits_nonzero() {
    let options = base_options();

    let err = run(options).await.unwrap_err();
    assert_eq!(err.exit_code(), 1);
}
