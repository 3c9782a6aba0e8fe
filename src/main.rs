mod brewery;
mod cache;
mod commands;
mod config;
mod db;
mod favorites;
mod net;
mod query;
mod worker;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cache::{CacheStore, SqliteStorage};
use net::HttpFetcher;
use worker::ServiceWorker;

const LOG_ENV: &str = "BREWDEX_LOG";

#[derive(Parser, Debug)]
#[command(name = "brewdex")]
#[command(about = "Offline-first brewery browser with a request cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/brewdex/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Keep the guard alive so buffered log lines are flushed on exit
  let _guard = init_logging(&config, args.verbose)?;

  let storage = SqliteStorage::open(&config.cache_db_path()?)?;
  let store = CacheStore::new(Arc::new(storage));
  let fetcher = HttpFetcher::new(&config.http)?;
  let worker = Arc::new(ServiceWorker::new(&config, store, Arc::new(fetcher))?);

  let result = commands::run(args.command, &config, Arc::clone(&worker)).await;

  // Let background revalidations finish writing before the process exits
  worker.wait_until_idle().await;

  result
}

fn init_logging(config: &config::Config, verbose: bool) -> Result<WorkerGuard> {
  let log_dir = config.log_dir()?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
    &log_dir,
    "brewdex.log",
  ));

  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
  let stderr = verbose.then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(stderr)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
