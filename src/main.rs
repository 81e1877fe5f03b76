use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use muxtail::{
    parse_start_time, CyclePolicy, DirectoryService, Orchestrator, TailConfig, WriterSink,
};

fn parse_duration(s: &str) -> std::result::Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

/// A duration that drives a loop, so it must not be zero.
fn parse_period(s: &str) -> std::result::Result<Duration, String> {
    match humantime::parse_duration(s) {
        Ok(period) if period.is_zero() => Err("must be greater than zero".to_string()),
        Ok(period) => Ok(period),
        Err(e) => Err(e.to_string()),
    }
}

/// Follow every log stream whose group and stream names match
#[derive(Parser, Debug)]
#[command(name = "muxtail")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the log groups
    #[arg(long, env = "MUXTAIL_ROOT", default_value = ".")]
    root: PathBuf,

    /// Regex match of log group names
    #[arg(short = 'l', long = "log", default_value = "")]
    group: String,

    /// Regex match of stream names
    #[arg(short, long, default_value = "")]
    stream: String,

    /// Start time of logs (e.g. `15m`, `2h ago`, `2024-03-01T12:00:00Z`)
    #[arg(long, default_value = "")]
    start: String,

    /// Turn on debug logs
    #[arg(short, long)]
    debug: bool,

    /// Idle time between two fetches of one stream
    #[arg(long, value_parser = parse_period, default_value = "10s")]
    poll_interval: Duration,

    /// Rediscover streams on this period, stopping tailers of streams that
    /// no longer match
    #[arg(long, value_parser = parse_period, default_value = "30s")]
    rediscover: Duration,

    /// Only rediscover once every tailer of a cycle has ended
    #[arg(long, conflicts_with = "rediscover")]
    until_all_ended: bool,

    /// Pause before rediscovering when using `--until-all-ended`
    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    cycle_delay: Duration,

    /// Maximum number of fetch calls in flight
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Number of events requested by the first fetch of a stream
    #[arg(long, default_value_t = muxtail::config::DEFAULT_FIRST_PAGE_LIMIT)]
    first_page: usize,
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let start_time = parse_start_time(&cli.start, SystemTime::now())?;
    if let Some(start_time) = start_time {
        debug!(
            input = %cli.start,
            parsed = %humantime::format_rfc3339_seconds(start_time),
            "parsed start time"
        );
    }

    let cycle_policy = if cli.until_all_ended {
        CyclePolicy::UntilAllEnded
    } else {
        CyclePolicy::Rediscover(cli.rediscover)
    };
    let config = TailConfig::new(cli.group, cli.stream)
        .with_start_time(start_time)
        .with_poll_interval(cli.poll_interval)
        .with_cycle_policy(cycle_policy)
        .with_cycle_delay(cli.cycle_delay)
        .with_first_page_limit(cli.first_page)
        .with_max_concurrent_fetches(cli.max_concurrent);

    let service = Arc::new(DirectoryService::new(&cli.root));
    let orchestrator = Orchestrator::new(service, config, Arc::new(WriterSink::stdout()))?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, stopping");
                shutdown.cancel();
            }
        }
    });

    info!(root = %cli.root.display(), "muxtail starting");
    orchestrator
        .run(shutdown)
        .await
        .with_context(|| format!("Tailing logs under {}", cli.root.display()))
}
