//! The loader: read-through cache with per-key supersession.
//!
//! Each request runs as its own task:
//! 1. Cancel whatever job is registered for the key and register the new one
//! 2. Decode the cached entry, if any, and render it right away
//! 3. Refresh when forced, undecodable, missing or stale
//! 4. Stream the response into the store atomically, decode and render it
//!    with a cross-fade
//! 5. Deregister, whichever way the job ended
//!
//! Failures never reach the caller. A failed refresh keeps the previous
//! entry (and whatever is displayed); a cancelled job leaves the store as it
//! found it.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, warn, Instrument};

use crate::cache::{CacheKey, CacheStore, EntryState, FreshnessPolicy, RefreshReason};
use crate::config::Config;
use crate::decode::Decoder;
use crate::error::{DecodeError, FetchError, LoadError};
use crate::fetch::Fetcher;
use crate::jobs::{JobRegistry, LoadJob};
use crate::render::{RenderContext, RenderStatus, Renderer};
use crate::worker::WorkerPool;

/// A request to show `url` on a target.
#[derive(Debug, Clone)]
pub struct LoadRequest {
  url: String,
  key: Option<String>,
  force_update: bool,
}

impl LoadRequest {
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      key: None,
      force_update: false,
    }
  }

  /// Cache under `key` instead of the URL.
  pub fn key(mut self, key: impl Into<String>) -> Self {
    self.key = Some(key.into());
    self
  }

  /// Refresh from the network even if the cached entry is fresh.
  pub fn force_update(mut self, force_update: bool) -> Self {
    self.force_update = force_update;
    self
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn cache_key(&self) -> CacheKey {
    CacheKey::from(self.key.as_deref().unwrap_or(&self.url))
  }
}

impl From<&str> for LoadRequest {
  fn from(url: &str) -> Self {
    Self::new(url)
  }
}

impl From<String> for LoadRequest {
  fn from(url: String) -> Self {
    Self::new(url)
  }
}

/// What happened to the cached entry before any refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachedRender {
  #[default]
  Missing,
  Rendered,
  /// Present but unreadable or undecodable; forces a refresh
  Undecodable,
  /// Decoded, but the target was already gone
  TargetGone,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RefreshResult {
  #[default]
  NotNeeded,
  /// Fetch failed; the previous entry is untouched
  FetchFailed(FetchError),
  /// Writing the entry failed; the previous entry is untouched
  WriteFailed(String),
  /// The entry was replaced but the new content does not decode
  Undecodable,
  Updated {
    rendered: bool,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoadReport {
  pub cached: CachedRender,
  pub refresh_reason: Option<RefreshReason>,
  pub refresh: RefreshResult,
}

#[derive(Debug)]
pub enum LoadOutcome {
  Done(LoadReport),
  /// Superseded by a newer request for the same key, or shut down
  Cancelled,
  /// Infrastructure failure, e.g. a worker task panicked
  Failed(LoadError),
}

impl LoadOutcome {
  pub fn report(&self) -> Option<&LoadReport> {
    match self {
      Self::Done(report) => Some(report),
      _ => None,
    }
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, Self::Cancelled)
  }
}

/// Loads images through the disk cache onto render targets.
///
/// Must be created inside a Tokio runtime. Dropping the loader closes it.
pub struct Loader<D, R>
where
  D: Decoder,
  R: Renderer<Image = D::Image>,
{
  inner: Arc<Inner<D, R>>,
}

struct Inner<D, R>
where
  D: Decoder,
  R: Renderer<Image = D::Image>,
{
  store: CacheStore,
  pool: WorkerPool,
  fetcher: Arc<dyn Fetcher>,
  decoder: Arc<D>,
  render: RenderContext<R>,
  registry: JobRegistry,
  policy: FreshnessPolicy,
  transition: Duration,
  shutdown: CancellationToken,
  closed: AtomicBool,
}

impl<D, R> Loader<D, R>
where
  D: Decoder,
  R: Renderer<Image = D::Image>,
{
  pub fn new(config: &Config, fetcher: Arc<dyn Fetcher>, decoder: D, renderer: R) -> Result<Self> {
    let pool = WorkerPool::new(config.workers);
    let dir = config.cache_dir()?;
    let store = CacheStore::open(&dir, pool.clone())
      .map_err(|e| eyre!("Failed to create cache directory {}: {}", dir.display(), e))?;

    let shutdown = CancellationToken::new();
    let (render, _task) = RenderContext::spawn(renderer, shutdown.clone());

    debug!(
      dir = %dir.display(),
      workers = pool.size(),
      freshness_window_ms = config.freshness_window_ms,
      "Loader ready"
    );

    Ok(Self {
      inner: Arc::new(Inner {
        store,
        pool,
        fetcher,
        decoder: Arc::new(decoder),
        render,
        registry: JobRegistry::new(),
        policy: FreshnessPolicy::new(config.freshness_window()),
        transition: config.transition_duration(),
        shutdown,
        closed: AtomicBool::new(false),
      }),
    })
  }

  /// Load an image onto `target`, fire-and-forget.
  ///
  /// The only observable effect is the eventual render. A pending load for
  /// the same cache key is cancelled.
  pub fn load_image(&self, request: impl Into<LoadRequest>, target: &Arc<R::Target>) {
    drop(self.request(request.into(), target));
  }

  /// Like [`Loader::load_image`], but hands back the job's outcome.
  ///
  /// Only a weak reference to `target` is kept; dropping the target turns
  /// pending renders into no-ops.
  pub fn request(&self, request: LoadRequest, target: &Arc<R::Target>) -> JoinHandle<LoadOutcome> {
    let key = request.cache_key();
    if self.is_closed() {
      debug!(%key, url = request.url(), "Loader is closed, ignoring request");
      return tokio::spawn(async { LoadOutcome::Cancelled });
    }

    let job = Arc::new(LoadJob::new(
      key,
      request.url(),
      self.inner.shutdown.child_token(),
    ));
    if let Some(previous) = self.inner.registry.supersede(Arc::clone(&job)) {
      debug!(key = %previous.key(), job = previous.id(), url = previous.url(), "Cancel current job");
      previous.cancel();
    }

    let span = debug_span!("load", key = %job.key(), job = job.id(), url = request.url());
    let inner = Arc::clone(&self.inner);
    let target = Arc::downgrade(target);
    tokio::spawn(
      async move { inner.run(job, target, request.force_update).await }.instrument(span),
    )
  }

  /// Cancel all jobs and release the worker pool and render task.
  ///
  /// Idempotent; later requests are ignored.
  pub fn close(&self) {
    if self.inner.closed.swap(true, Ordering::SeqCst) {
      return;
    }

    let cancelled = self.inner.registry.cancel_all();
    debug!(cancelled, "Closing loader");
    self.inner.shutdown.cancel();
    self.inner.pool.close();
  }

  pub fn is_closed(&self) -> bool {
    self.inner.closed.load(Ordering::SeqCst)
  }

  /// Number of registered (not yet finished) jobs.
  pub fn active_jobs(&self) -> usize {
    self.inner.registry.count()
  }

  pub fn cache_store(&self) -> &CacheStore {
    &self.inner.store
  }
}

impl<D, R> Drop for Loader<D, R>
where
  D: Decoder,
  R: Renderer<Image = D::Image>,
{
  fn drop(&mut self) {
    self.close();
  }
}

impl<D, R> Inner<D, R>
where
  D: Decoder,
  R: Renderer<Image = D::Image>,
{
  async fn run(
    self: Arc<Self>,
    job: Arc<LoadJob>,
    target: Weak<R::Target>,
    force_update: bool,
  ) -> LoadOutcome {
    let result = self.load(&job, &target, force_update).await;
    self.registry.remove(&job);

    match result {
      Ok(report) => {
        debug!(?report, "Load finished");
        LoadOutcome::Done(report)
      }
      Err(LoadError::Cancelled) => {
        debug!("Load cancelled");
        LoadOutcome::Cancelled
      }
      // Shutdown closes the pool under a running job
      Err(_) if job.is_cancelled() => {
        debug!("Load cancelled");
        LoadOutcome::Cancelled
      }
      Err(e) => {
        warn!(error = %e, "Load aborted");
        LoadOutcome::Failed(e)
      }
    }
  }

  async fn load(
    &self,
    job: &Arc<LoadJob>,
    target: &Weak<R::Target>,
    force_update: bool,
  ) -> Result<LoadReport, LoadError> {
    let key = job.key();
    let mut report = LoadReport::default();

    job.checkpoint()?;
    let present = self.store.exists(key).await?;
    debug!(file = %key.file_name(), exists = present, "Cache check");

    let mut entry = EntryState {
      present,
      decode_error: false,
      last_modified: DateTime::<Utc>::UNIX_EPOCH,
    };

    if present {
      job.checkpoint()?;
      match self.read_and_decode(key).await {
        Ok(Some(image)) => {
          job.checkpoint()?;
          report.cached = match self.render.submit(job, target, image, Duration::ZERO).await {
            RenderStatus::Rendered => CachedRender::Rendered,
            RenderStatus::TargetGone => CachedRender::TargetGone,
            RenderStatus::Cancelled => return Err(LoadError::Cancelled),
          };
        }
        // Deleted between the existence check and the read
        Ok(None) => entry.present = false,
        Err(e) if e.is_recoverable() => {
          debug!(error = %e, "Could not read cached file");
          entry.decode_error = true;
          report.cached = CachedRender::Undecodable;
        }
        Err(e) => return Err(e),
      }
    }

    job.checkpoint()?;
    entry.last_modified = self.store.last_modified(key).await?;

    let Some(reason) = self.policy.evaluate(force_update, entry, Utc::now()) else {
      debug!("Cached file is fresh");
      return Ok(report);
    };

    debug!(%reason, "Cached file will be updated");
    report.refresh_reason = Some(reason);
    report.refresh = self.refresh(job, target).await?;
    Ok(report)
  }

  async fn refresh(
    &self,
    job: &Arc<LoadJob>,
    target: &Weak<R::Target>,
  ) -> Result<RefreshResult, LoadError> {
    let key = job.key();

    job.checkpoint()?;
    let fetched = tokio::select! {
      biased;
      _ = job.cancelled() => return Err(LoadError::Cancelled),
      fetched = self.fetcher.fetch(job.url()) => fetched,
    };

    let body = match fetched {
      Ok(body) => body,
      Err(e) => {
        debug!(error = %e, "Fetch failed, keeping cached file");
        return Ok(RefreshResult::FetchFailed(e));
      }
    };

    match self.store.write_atomic(key, body, job.token()).await {
      Ok(bytes) => debug!(bytes, "Cache updated"),
      Err(LoadError::Fetch(e)) => {
        debug!(error = %e, "Download failed, keeping cached file");
        return Ok(RefreshResult::FetchFailed(e));
      }
      Err(LoadError::Io(e)) => {
        debug!(error = %e, "Could not write cached file");
        return Ok(RefreshResult::WriteFailed(e.to_string()));
      }
      Err(LoadError::Cancelled) => {
        debug!("Download cancelled");
        return Err(LoadError::Cancelled);
      }
      Err(e) => return Err(e),
    }

    if target.strong_count() == 0 {
      debug!("Target is gone, skipping decode");
      return Ok(RefreshResult::Updated { rendered: false });
    }

    job.checkpoint()?;
    let image = match self.read_and_decode(key).await {
      Ok(Some(image)) => image,
      Ok(None) => return Ok(RefreshResult::Undecodable),
      Err(e) if e.is_recoverable() => {
        debug!(error = %e, "Could not decode updated file");
        return Ok(RefreshResult::Undecodable);
      }
      Err(e) => return Err(e),
    };

    job.checkpoint()?;
    match self.render.submit(job, target, image, self.transition).await {
      RenderStatus::Rendered => Ok(RefreshResult::Updated { rendered: true }),
      RenderStatus::TargetGone => Ok(RefreshResult::Updated { rendered: false }),
      RenderStatus::Cancelled => Err(LoadError::Cancelled),
    }
  }

  async fn read_and_decode(&self, key: &CacheKey) -> Result<Option<D::Image>, LoadError> {
    let Some(bytes) = self.store.read(key).await? else {
      return Ok(None);
    };

    let decoder = Arc::clone(&self.decoder);
    let image = match self.pool.run(move || decoder.decode(&bytes)).await {
      Ok(decoded) => decoded?,
      // A crashing codec is a bad file like any other
      Err(LoadError::Worker(e)) if e.is_panic() => {
        warn!(key = %key, "Decoder panicked");
        return Err(DecodeError::new("decoder panicked").into());
      }
      Err(e) => return Err(e),
    };
    Ok(Some(image))
  }
}
