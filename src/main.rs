use clap::{Parser, ValueEnum};
use logsift::cli::run::{run, SearchOptions};
use logsift::output::OutputFormat;
use logsift::query::MatchMode;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "logsift")]
#[command(about = "Parallel keyword search across Loki log endpoints", long_about = None)]
struct Cli {
    /// Keywords (or regex fragments with --mode regex) to search for
    #[arg(required = true)]
    keywords: Vec<String>,

    /// Named environment whose endpoints to search
    #[arg(long, default_value = "dev")]
    env: String,

    /// How keywords match log lines
    #[arg(long, value_enum, default_value_t = MatchModeArg::Contains)]
    mode: MatchModeArg,

    /// Require every keyword to match (default: any keyword matches)
    #[arg(long = "and")]
    and_logic: bool,

    /// Relative window like '30m', '4h', or 'last 2d'
    #[arg(long, conflicts_with_all = ["start", "end"])]
    relative: Option<String>,

    /// Absolute window start ('2023-01-01', '2023-01-01 08:30:00', RFC 3339)
    #[arg(long)]
    start: Option<String>,

    /// Absolute window end; defaults to now
    #[arg(long)]
    end: Option<String>,

    /// Explicit endpoint URL (repeatable); overrides --env
    #[arg(long = "loki-url")]
    loki_url: Vec<String>,

    /// Stream label selector like 'app=shipper' (repeatable)
    #[arg(long = "label")]
    label: Vec<String>,

    /// Per-request window size in seconds
    #[arg(long = "batch-size")]
    batch_size: Option<u64>,

    /// Maximum tasks in flight
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Retry budget for transient failures
    #[arg(long = "max-retries")]
    max_retries: Option<u32>,

    /// Per-batch line limit
    #[arg(long)]
    limit: Option<usize>,

    /// Print the planned tasks and compiled query without any network activity
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Live progress with per-endpoint breakdown
    #[arg(short, long)]
    verbose: bool,

    /// Suppress the live progress line; only the final summary is printed
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Output format for matched lines
    #[arg(long = "output-format", value_enum, default_value_t = OutputFormatArg::Text)]
    output_format: OutputFormatArg,

    /// Config file path (default: ~/.config/logsift/config.yml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum MatchModeArg {
    Contains,
    Regex,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormatArg {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    // Diagnostics go to stderr so stdout stays machine-parseable.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logsift=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let options = SearchOptions {
        keywords: cli.keywords,
        mode: match cli.mode {
            MatchModeArg::Contains => MatchMode::Contains,
            MatchModeArg::Regex => MatchMode::Regex,
        },
        require_all: cli.and_logic,
        labels: cli.label,
        environment: cli.env,
        loki_urls: cli.loki_url,
        relative: cli.relative,
        start: cli.start,
        end: cli.end,
        batch_size_secs: cli.batch_size,
        concurrency: cli.concurrency,
        timeout_secs: cli.timeout,
        max_retries: cli.max_retries,
        limit: cli.limit,
        dry_run: cli.dry_run,
        verbose: cli.verbose,
        quiet: cli.quiet,
        format: match cli.output_format {
            OutputFormatArg::Text => OutputFormat::Text,
            OutputFormatArg::Json => OutputFormat::Json,
        },
        config_path: cli.config,
    };

    if let Err(e) = run(options).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}
