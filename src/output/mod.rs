use crate::executor::progress::format_duration;
use crate::executor::runner::SearchResults;
use chrono::SecondsFormat;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{self, Write};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct JsonEntry<'a> {
    timestamp: String,
    line: &'a str,
    labels: &'a HashMap<String, String>,
}

/// Render matched lines to stdout. Text mode is one line per entry;
/// JSON mode is a single array in the same order.
pub fn render_entries(
    results: &SearchResults,
    format: OutputFormat,
    out: &mut impl Write,
) -> io::Result<()> {
    match format {
        OutputFormat::Text => {
            for entry in &results.entries {
                writeln!(
                    out,
                    "{} | {}",
                    entry.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
                    entry.line
                )?;
            }
        }
        OutputFormat::Json => {
            let entries: Vec<JsonEntry> = results
                .entries
                .iter()
                .map(|e| JsonEntry {
                    timestamp: e.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
                    line: &e.line,
                    labels: &e.labels,
                })
                .collect();
            serde_json::to_writer(&mut *out, &entries)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// Trailing run summary. Always written to stderr by the caller so it
/// never pollutes machine-parsed stdout.
pub fn render_summary(
    results: &SearchResults,
    elapsed: Duration,
    err: &mut impl Write,
) -> io::Result<()> {
    let succeeded = results
        .tasks_total
        .saturating_sub(results.failures.len() + results.tasks_skipped);

    writeln!(
        err,
        "search complete: {} lines from {}/{} tasks in {}",
        results.entries.len(),
        succeeded,
        results.tasks_total,
        format_duration(elapsed)
    )?;

    if results.tasks_skipped > 0 {
        writeln!(
            err,
            "{} tasks abandoned after interrupt",
            results.tasks_skipped
        )?;
    }

    if !results.truncated.is_empty() {
        writeln!(
            err,
            "batches that hit the per-batch limit (lower --batch-size or raise --limit to see everything):"
        )?;
        for t in &results.truncated {
            writeln!(
                err,
                "  {} {}: {} lines returned",
                t.endpoint.name, t.window, t.returned
            )?;
        }
    }

    if !results.failures.is_empty() {
        writeln!(err, "failed tasks:")?;
        for f in &results.failures {
            writeln!(
                err,
                "  {} {}: {} (hint: {})",
                f.endpoint.name,
                f.window,
                f.failure.error,
                f.failure.error.suggestion()
            )?;
        }
    }

    Ok(())
}
