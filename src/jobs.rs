//! In-flight load jobs, at most one per cache key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::cache::CacheKey;
use crate::error::LoadError;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Coordination handle of one running load.
///
/// The registry holds this handle, not any cache content. Cancelling it is
/// cooperative: the job observes the token at each suspension point.
#[derive(Debug)]
pub struct LoadJob {
  id: u64,
  key: CacheKey,
  url: String,
  token: CancellationToken,
}

impl LoadJob {
  pub fn new(key: CacheKey, url: impl Into<String>, token: CancellationToken) -> Self {
    Self {
      id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
      key,
      url: url.into(),
      token,
    }
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn token(&self) -> &CancellationToken {
    &self.token
  }

  pub fn cancel(&self) {
    self.token.cancel();
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }

  pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
    self.token.cancelled()
  }

  /// Suspension-point check: `Err(Cancelled)` once the job was cancelled.
  pub fn checkpoint(&self) -> Result<(), LoadError> {
    if self.is_cancelled() {
      Err(LoadError::Cancelled)
    } else {
      Ok(())
    }
  }
}

/// Maps each cache key to its single live job.
#[derive(Debug, Default)]
pub struct JobRegistry {
  jobs: Mutex<HashMap<CacheKey, Arc<LoadJob>>>,
}

impl JobRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  // Every critical section is a single map operation, so a poisoned map is
  // still consistent.
  fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<LoadJob>>> {
    self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Register `job` under its key and return the job it displaced.
  ///
  /// Insert and swap happen under one lock, so of two concurrent callers for
  /// the same key exactly one sees the other's job as its predecessor.
  pub fn supersede(&self, job: Arc<LoadJob>) -> Option<Arc<LoadJob>> {
    self.lock().insert(job.key().clone(), job)
  }

  /// Remove `job` if it is still the registered job for its key.
  ///
  /// A job finishing after it was superseded leaves the newer entry alone.
  pub fn remove(&self, job: &Arc<LoadJob>) -> bool {
    let mut jobs = self.lock();
    match jobs.get(job.key()) {
      Some(current) if Arc::ptr_eq(current, job) => {
        jobs.remove(job.key());
        true
      }
      _ => false,
    }
  }

  pub fn is_current(&self, job: &Arc<LoadJob>) -> bool {
    self
      .lock()
      .get(job.key())
      .is_some_and(|current| Arc::ptr_eq(current, job))
  }

  /// Request cancellation of every registered job; returns how many.
  ///
  /// Entries stay in place until each job removes itself.
  pub fn cancel_all(&self) -> usize {
    let jobs = self.lock();
    for job in jobs.values() {
      job.cancel();
    }
    jobs.len()
  }

  /// Number of registered jobs.
  pub fn count(&self) -> usize {
    self.lock().len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn job(key: &str) -> Arc<LoadJob> {
    Arc::new(LoadJob::new(
      CacheKey::from(key),
      format!("https://example.com/{}", key),
      CancellationToken::new(),
    ))
  }

  #[test]
  fn test_supersede_returns_previous() {
    let registry = JobRegistry::new();
    let first = job("a");
    let second = job("a");

    assert!(registry.supersede(first.clone()).is_none());
    let previous = registry.supersede(second.clone()).unwrap();

    assert!(Arc::ptr_eq(&previous, &first));
    assert!(registry.is_current(&second));
    assert_eq!(registry.count(), 1);
  }

  #[test]
  fn test_keys_are_independent() {
    let registry = JobRegistry::new();
    assert!(registry.supersede(job("a")).is_none());
    assert!(registry.supersede(job("b")).is_none());
    assert_eq!(registry.count(), 2);
  }

  #[test]
  fn test_stale_remove_keeps_newer_job() {
    let registry = JobRegistry::new();
    let first = job("a");
    let second = job("a");
    registry.supersede(first.clone());
    registry.supersede(second.clone());

    assert!(!registry.remove(&first));
    assert!(registry.is_current(&second));
    assert!(registry.remove(&second));
    assert_eq!(registry.count(), 0);
    assert!(!registry.remove(&second));
  }

  #[test]
  fn test_cancel_all() {
    let registry = JobRegistry::new();
    let a = job("a");
    let b = job("b");
    registry.supersede(a.clone());
    registry.supersede(b.clone());

    assert_eq!(registry.cancel_all(), 2);
    assert!(a.is_cancelled());
    assert!(b.is_cancelled());
    assert!(matches!(a.checkpoint(), Err(LoadError::Cancelled)));
    assert_eq!(registry.cancel_all(), 2);
  }

  #[test]
  fn test_job_ids_are_unique() {
    assert_ne!(job("a").id(), job("a").id());
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_supersede_leaves_one_live_job() {
    let registry = Arc::new(JobRegistry::new());

    let tasks: Vec<_> = (0..64)
      .map(|_| {
        let registry = registry.clone();
        tokio::spawn(async move {
          let job = job("same");
          if let Some(previous) = registry.supersede(job.clone()) {
            previous.cancel();
          }
          job
        })
      })
      .collect();

    let mut jobs = Vec::new();
    for task in tasks {
      jobs.push(task.await.unwrap());
    }

    assert_eq!(registry.count(), 1);
    let live: Vec<_> = jobs.iter().filter(|j| !j.is_cancelled()).collect();
    assert_eq!(live.len(), 1);
    assert!(registry.is_current(live[0]));
  }
}
