use ambassador::api::{ApiClient, CachedClient};
use ambassador::cache::{CacheStorage, FetchCache, NoopStorage, PersistentCache, SqliteStorage};
use ambassador::commands::{self, Command, RunOptions};
use ambassador::config::Config;
use ambassador::logging;
use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ambassador")]
#[command(about = "Ambassador dashboard in the terminal, with an offline cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/ambassador/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Ignore cached data for this read and fetch from the backend
  #[arg(short, long, global = true)]
  refresh: bool,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let _log_guard = logging::init()?;
  info!(api = %config.api.url, cache = config.cache.enabled, "starting");

  let options = RunOptions {
    refresh: args.refresh,
    default_email: config.api.email.clone(),
  };

  if config.cache.enabled {
    let path = match &config.cache.path {
      Some(path) => path.clone(),
      None => SqliteStorage::default_path(&config.api.url)?,
    };
    run(&config, SqliteStorage::open(&path)?, args.command, &options).await
  } else {
    run(&config, NoopStorage, args.command, &options).await
  }
}

async fn run<S: CacheStorage + 'static>(
  config: &Config,
  storage: S,
  command: Command,
  options: &RunOptions,
) -> Result<()> {
  let cache = FetchCache::new(PersistentCache::new(storage));
  let client = CachedClient::new(ApiClient::new(config)?, cache);
  commands::run(command, &client, options).await
}
