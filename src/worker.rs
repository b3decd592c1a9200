//! Bounded pool for blocking disk and decode work.
//!
//! Every blocking step of a job runs through [`WorkerPool::run`]. With the
//! default size of one, disk access and decoding are serialized across all
//! keys. That bounds throughput; correctness never depends on it, since
//! different keys never touch the same file and writes are atomic.

use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::LoadError;

#[derive(Debug, Clone)]
pub struct WorkerPool {
  permits: Arc<Semaphore>,
  size: usize,
}

impl WorkerPool {
  /// Create a pool running at most `size` closures at once (at least one).
  pub fn new(size: usize) -> Self {
    let size = size.max(1);
    Self {
      permits: Arc::new(Semaphore::new(size)),
      size,
    }
  }

  pub fn size(&self) -> usize {
    self.size
  }

  /// Run a blocking closure on the pool.
  ///
  /// Fails with [`LoadError::ShutDown`] once the pool is closed.
  pub async fn run<F, T>(&self, f: F) -> Result<T, LoadError>
  where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
  {
    let _permit = self
      .permits
      .acquire()
      .await
      .map_err(|_| LoadError::ShutDown)?;

    Ok(tokio::task::spawn_blocking(f).await?)
  }

  /// Stop accepting work. Closures already running finish normally.
  pub fn close(&self) {
    self.permits.close();
  }
}
