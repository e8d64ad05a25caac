mod commands;
mod config;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use typed_rows::Database;

#[derive(Parser, Debug)]
#[command(name = "typed-rows")]
#[command(about = "Typed SQLite queries with lazy, invalidatable result caches")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/typed-rows/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Database file (default: $XDG_DATA_HOME/typed-rows/data.db)
  #[arg(short, long)]
  database: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Override database if specified on command line
  if let Some(path) = args.database {
    config.database.path = Some(path);
  }

  let _guard = init_logging(&config)?;

  let db = Database::open(&config.database)?;
  let ctx = config.context();
  commands::run(args.command, &db, &ctx).await?;

  Ok(())
}

/// Log to a daily file so stdout stays clean for command output.
fn init_logging(config: &config::Config) -> Result<WorkerGuard> {
  let dir = config.log_dir()?;
  std::fs::create_dir_all(&dir)?;

  let appender = tracing_appender::rolling::daily(dir, "typed-rows.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let filter =
    EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log.level))?;

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
