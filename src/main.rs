mod console;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use console::{ConsoleRenderer, Viewport};
use image_magic::cache::FreshnessPolicy;
use image_magic::worker::WorkerPool;
use image_magic::{
  logging, CacheKey, CacheStore, Config, HttpFetcher, LoadOutcome, LoadRequest, Loader,
  RasterDecoder, RefreshResult,
};

#[derive(Parser, Debug)]
#[command(name = "image-magic")]
#[command(about = "Load images through a staleness-aware disk cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/image-magic/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Trace every cache step
  #[arg(short, long)]
  debug: bool,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Load images, each into its own viewport
  Load {
    #[arg(required = true)]
    urls: Vec<String>,

    /// Cache key to use instead of the URL (shared by all URLs)
    #[arg(short, long)]
    key: Option<String>,

    /// Refresh even if the cached copy is fresh
    #[arg(short, long)]
    force: bool,
  },
  /// Show the cache state of a key
  Inspect { key: String },
  /// Delete the cached copy of a key
  Evict { key: String },
  /// Print the cache directory
  Path,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override tracing if specified on command line
  let config = if args.debug {
    Config {
      debug_tracing: true,
      ..config
    }
  } else {
    config
  };

  let _guard = logging::init(&config, args.log_file.as_deref())?;

  match args.command {
    Command::Load { urls, key, force } => load(&config, urls, key, force).await,
    Command::Inspect { key } => inspect(&config, &key).await,
    Command::Evict { key } => {
      let store = open_store(&config)?;
      store.delete(&CacheKey::from(key.as_str())).await?;
      println!("evicted {}", key);
      Ok(())
    }
    Command::Path => {
      println!("{}", config.cache_dir()?.display());
      Ok(())
    }
  }
}

async fn load(config: &Config, urls: Vec<String>, key: Option<String>, force: bool) -> Result<()> {
  let fetcher = Arc::new(HttpFetcher::new(&config.http)?);
  let loader = Loader::new(config, fetcher, RasterDecoder::new(), ConsoleRenderer)?;

  let mut viewports = Vec::new();
  let mut handles = Vec::new();
  for (i, url) in urls.iter().enumerate() {
    let viewport = Arc::new(Viewport::new(format!("view-{}", i + 1)));
    let mut request = LoadRequest::new(url.as_str()).force_update(force);
    if let Some(key) = &key {
      request = request.key(key.as_str());
    }

    handles.push(loader.request(request, &viewport));
    viewports.push(viewport);
  }

  tokio::select! {
    outcomes = futures::future::join_all(handles) => {
      for ((viewport, url), outcome) in viewports.iter().zip(&urls).zip(outcomes) {
        let outcome = outcome.map_err(|e| eyre!("Load task failed: {}", e))?;
        let shown = viewport
          .shown()
          .map(|(w, h)| format!(", showing {}x{}", w, h))
          .unwrap_or_default();
        println!("{} [{}]: {}{}", viewport.name(), url, describe(&outcome), shown);
      }
    }
    _ = tokio::signal::ctrl_c() => {
      warn!("Interrupted, cancelling pending loads");
    }
  }

  loader.close();
  Ok(())
}

fn describe(outcome: &LoadOutcome) -> String {
  match outcome {
    LoadOutcome::Cancelled => "cancelled".to_string(),
    LoadOutcome::Failed(e) => format!("failed: {}", e),
    LoadOutcome::Done(report) => {
      let refresh = match &report.refresh {
        RefreshResult::NotNeeded => "cache is fresh".to_string(),
        RefreshResult::FetchFailed(e) => format!("refresh failed ({})", e),
        RefreshResult::WriteFailed(e) => format!("could not write cache ({})", e),
        RefreshResult::Undecodable => "downloaded file is not an image".to_string(),
        RefreshResult::Updated { rendered: true } => "updated".to_string(),
        RefreshResult::Updated { rendered: false } => "cache updated, not displayed".to_string(),
      };
      match &report.refresh_reason {
        Some(reason) => format!("{} [{}]", refresh, reason),
        None => refresh,
      }
    }
  }
}

fn open_store(config: &Config) -> Result<CacheStore> {
  let dir = config.cache_dir()?;
  CacheStore::open(&dir, WorkerPool::new(1))
    .map_err(|e| eyre!("Failed to open cache directory {}: {}", dir.display(), e))
}

async fn inspect(config: &Config, key: &str) -> Result<()> {
  let store = open_store(config)?;
  let key = CacheKey::from(key);

  println!("key:    {}", key);
  println!("file:   {}", store.entry_path(&key).display());

  if !store.exists(&key).await? {
    println!("cached: no");
    return Ok(());
  }

  let last_modified = store.last_modified(&key).await?;
  let age = Utc::now() - last_modified;
  let policy = FreshnessPolicy::new(config.freshness_window());

  println!("cached: yes");
  println!("age:    {}s", age.num_seconds());
  println!(
    "state:  {}",
    if policy.is_stale(last_modified, Utc::now()) {
      "stale"
    } else {
      "fresh"
    }
  );
  info!(key = %key, "Inspected cache entry");

  Ok(())
}
