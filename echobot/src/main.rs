//! echobot - keyword retweeter and scheduled poster
//!
//! Watches a keyword search, retweets what passes the block lists, and posts
//! weekly stats and weather reports until it receives a stop signal.

use anyhow::Context;
use clap::Parser;
use libechobot::logging::{LogFormat, LoggingConfig};
use libechobot::{Bot, BotError, Config, RunOptions};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "echobot")]
#[command(version)]
#[command(about = "Keyword retweeter with weekly stats and weather posts")]
#[command(long_about = "\
echobot - keyword retweeter with weekly stats and weather posts

DESCRIPTION:
    echobot is a long-running daemon that searches the platform for posts
    matching a set of keywords and retweets the ones that pass the block
    lists. Progress is kept in an offset file, so a restart resumes where
    the previous run stopped.

    Optional workers post a weekly follower/retweet summary and regular
    weather reports read from an XML forecast feed.

USAGE:
    # Run in foreground (logs to stderr)
    echobot

    # Use a specific configuration file
    echobot --config ./echobot.toml

    # Only run the retweet watcher, with debug logging
    echobot --no-stats --no-weather --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current item)

CONFIGURATION:
    Configuration file: ~/.config/echobot/config.toml
    (override with --config or ECHOBOT_CONFIG)
    Bearer token may be supplied through ECHOBOT_BEARER_TOKEN.

    [watcher]
    keywords = [\"magadan\", \"магадан\"]
    check_interval = 60   # seconds between searches

    [retry]
    error_interval = 60   # seconds between retries of a failed call

LOGGING:
    ECHOBOT_LOG_FORMAT    text (default), json or pretty
    ECHOBOT_LOG_LEVEL     default level when RUST_LOG is not set

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Configuration file to use instead of the default location
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Log output format
    #[arg(long, value_name = "FORMAT")]
    #[arg(help = "Log format: text, json or pretty")]
    log_format: Option<LogFormat>,

    /// Run one watcher cycle and exit (for testing)
    #[arg(long, hide = true)]
    once: bool,

    /// Do not start the weekly stats worker
    #[arg(long)]
    no_stats: bool,

    /// Do not start the weather worker
    #[arg(long)]
    no_weather: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env(cli.verbose);
    if let Some(format) = cli.log_format {
        logging.format = format;
    }
    logging.init();

    if let Err(e) = run(cli).await {
        let code = e.downcast_ref::<BotError>().map_or(1, BotError::exit_code);
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }?;

    let mut options = RunOptions::from_config(&config);
    options.stats &= !cli.no_stats;
    options.weather &= !cli.no_weather;

    let bot = Bot::from_config(config).await?;
    info!("echobot starting");

    if cli.once {
        let (trigger, shutdown) = libechobot::shutdown::channel();
        let stop = tokio::spawn(async move {
            if let Ok(signal) = shutdown_signal().await {
                signal.await;
                trigger.trigger();
            }
        });
        let report = bot.run_once(&shutdown).await?;
        stop.abort();
        if let Some(report) = report {
            info!(
                fetched = report.fetched,
                acted = report.acted,
                skipped = report.skipped,
                failed = report.failed,
                "echobot: processed one cycle, exiting"
            );
        }
        return Ok(());
    }

    let signal = shutdown_signal().await?;
    bot.run(options, signal).await?;

    info!("echobot stopped");
    Ok(())
}

/// Future resolving on SIGINT or SIGTERM
#[cfg(unix)]
async fn shutdown_signal() -> anyhow::Result<impl std::future::Future<Output = ()>> {
    use futures::stream::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Signal setup failed")?;
    let handle = signals.handle();

    Ok(async move {
        if let Some(signal) = signals.next().await {
            info!(signal, "Received shutdown signal, stopping gracefully");
        }
        handle.close();
    })
}

/// Future resolving on Ctrl-C
#[cfg(not(unix))]
async fn shutdown_signal() -> anyhow::Result<impl std::future::Future<Output = ()>> {
    Ok(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, stopping gracefully"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    })
}
