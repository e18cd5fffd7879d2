use console::Term;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Shared progress state, updated once per task completion.
///
/// Updates are counter increments only; rendering happens in a separate
/// loop so it never blocks the worker pool. Created at executor start,
/// discarded at process end.
pub struct ProgressTracker {
    tasks_total: usize,
    started_at: Instant,
    tasks_succeeded: AtomicUsize,
    tasks_failed: AtomicUsize,
    tasks_skipped: AtomicUsize,
    lines_retrieved: AtomicU64,
    lines_per_endpoint: Mutex<BTreeMap<String, u64>>,
}

impl ProgressTracker {
    pub fn new(tasks_total: usize) -> Self {
        Self {
            tasks_total,
            started_at: Instant::now(),
            tasks_succeeded: AtomicUsize::new(0),
            tasks_failed: AtomicUsize::new(0),
            tasks_skipped: AtomicUsize::new(0),
            lines_retrieved: AtomicU64::new(0),
            lines_per_endpoint: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn record_success(&self, endpoint: &str, lines: usize) {
        self.tasks_succeeded.fetch_add(1, Ordering::Relaxed);
        self.lines_retrieved
            .fetch_add(lines as u64, Ordering::Relaxed);
        if let Ok(mut per_endpoint) = self.lines_per_endpoint.lock() {
            *per_endpoint.entry(endpoint.to_string()).or_insert(0) += lines as u64;
        }
    }

    pub fn record_failure(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.tasks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let lines_per_endpoint = self
            .lines_per_endpoint
            .lock()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default();

        ProgressSnapshot {
            tasks_total: self.tasks_total,
            tasks_succeeded: self.tasks_succeeded.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_skipped: self.tasks_skipped.load(Ordering::Relaxed),
            lines_retrieved: self.lines_retrieved.load(Ordering::Relaxed),
            elapsed: self.started_at.elapsed(),
            lines_per_endpoint,
        }
    }
}

/// A consistent-enough point-in-time view for rendering.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub tasks_total: usize,
    pub tasks_succeeded: usize,
    pub tasks_failed: usize,
    pub tasks_skipped: usize,
    pub lines_retrieved: u64,
    pub elapsed: Duration,
    pub lines_per_endpoint: Vec<(String, u64)>,
}

impl ProgressSnapshot {
    pub fn tasks_done(&self) -> usize {
        self.tasks_succeeded + self.tasks_failed + self.tasks_skipped
    }

    /// Completed tasks per second since the run started.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.tasks_done() as f64 / secs
    }

    /// Remaining work divided by observed rate; None until the first task
    /// completes.
    pub fn eta(&self) -> Option<Duration> {
        let rate = self.rate();
        if rate <= 0.0 {
            return None;
        }
        let remaining = self.tasks_total.saturating_sub(self.tasks_done());
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }

    pub fn render_line(&self, verbose: bool) -> String {
        let percent = if self.tasks_total > 0 {
            self.tasks_done() * 100 / self.tasks_total
        } else {
            100
        };

        let eta = match self.eta() {
            Some(eta) => format_duration(eta),
            None => "--".to_string(),
        };

        let mut line = format!(
            "{}/{} tasks ({}%) | {:.1} tasks/s | {} lines | ETA {}",
            self.tasks_done(),
            self.tasks_total,
            percent,
            self.rate(),
            self.lines_retrieved,
            eta,
        );

        if self.tasks_failed > 0 {
            line.push_str(&format!(" | {} failed", self.tasks_failed));
        }

        if verbose && !self.lines_per_endpoint.is_empty() {
            let breakdown: Vec<String> = self
                .lines_per_endpoint
                .iter()
                .map(|(name, lines)| format!("{}: {}", name, lines))
                .collect();
            line.push_str(&format!(" [{}]", breakdown.join(", ")));
        }

        line
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// Periodic progress renderer, decoupled from the worker pool.
///
/// Writes to stderr only when attached to a terminal, so redirected
/// output never collects control sequences. Exits once every task is
/// accounted for; the caller aborts it as a backstop.
pub async fn run_renderer(progress: Arc<ProgressTracker>, verbose: bool) {
    let term = Term::stderr();
    if !term.is_term() {
        return;
    }

    let mut interval = tokio::time::interval(Duration::from_millis(500));
    loop {
        interval.tick().await;
        let snapshot = progress.snapshot();
        let _ = term.clear_line();
        let _ = term.write_str(&snapshot.render_line(verbose));
        if snapshot.tasks_total == 0 || snapshot.tasks_done() >= snapshot.tasks_total {
            break;
        }
    }
    let _ = term.clear_line();
}
