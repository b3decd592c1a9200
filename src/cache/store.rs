//! Filesystem-backed blob store, one file per cache key.
//!
//! There is no index: the presence of a key's file is the index. Writes go
//! to a temporary file in the cache directory and are renamed over the
//! entry's canonical name only once complete, so readers see either the old
//! content or the new content, never a partial file.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::key::CacheKey;
use crate::error::LoadError;
use crate::fetch::ByteStream;
use crate::worker::WorkerPool;

const TEMP_PREFIX: &str = ".img-";
const TEMP_SUFFIX: &str = ".part";

#[derive(Debug, Clone)]
pub struct CacheStore {
  dir: PathBuf,
  pool: WorkerPool,
}

impl CacheStore {
  /// Open the store rooted at `dir`, creating the directory if needed.
  ///
  /// Temporary files left behind by a crashed process are removed. All
  /// later file access happens on `pool`.
  pub fn open(dir: impl Into<PathBuf>, pool: WorkerPool) -> io::Result<Self> {
    let dir = dir.into();
    fs::create_dir_all(&dir)?;
    remove_leftover_temp_files(&dir)?;
    Ok(Self { dir, pool })
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// Canonical path of the file backing `key`.
  pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
    self.dir.join(key.file_name())
  }

  pub async fn exists(&self, key: &CacheKey) -> Result<bool, LoadError> {
    let path = self.entry_path(key);
    self.pool.run(move || path.is_file()).await
  }

  /// Last modification time of the entry.
  ///
  /// Absent or unreadable entries report the Unix epoch, i.e. they are
  /// infinitely stale.
  pub async fn last_modified(&self, key: &CacheKey) -> Result<DateTime<Utc>, LoadError> {
    let path = self.entry_path(key);
    self
      .pool
      .run(move || {
        fs::metadata(&path)
          .and_then(|meta| meta.modified())
          .map(DateTime::<Utc>::from)
          .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
      })
      .await
  }

  /// Read the whole entry. `Ok(None)` if it does not exist.
  pub async fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, LoadError> {
    let path = self.entry_path(key);
    let bytes = self
      .pool
      .run(move || match fs::read(&path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
      })
      .await??;
    Ok(bytes)
  }

  /// Stream `body` into the entry for `key`, replacing it atomically.
  ///
  /// `cancel` is checked between chunks. On cancellation, a body error or an
  /// I/O error the temporary file is removed and the committed entry is left
  /// untouched. Returns the number of bytes written.
  pub async fn write_atomic(
    &self,
    key: &CacheKey,
    mut body: ByteStream,
    cancel: &CancellationToken,
  ) -> Result<u64, LoadError> {
    let dir = self.dir.clone();
    let mut temp = self
      .pool
      .run(move || {
        tempfile::Builder::new()
          .prefix(TEMP_PREFIX)
          .suffix(TEMP_SUFFIX)
          .tempfile_in(dir)
      })
      .await??;

    let mut written = 0u64;
    loop {
      let chunk = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(LoadError::Cancelled),
        chunk = body.next() => chunk,
      };
      let Some(chunk) = chunk else { break };
      let chunk = chunk?;
      let len = chunk.len() as u64;

      let (returned, result) = self
        .pool
        .run(move || {
          let result = temp.write_all(&chunk);
          (temp, result)
        })
        .await?;
      temp = returned;
      result?;
      written += len;

      if cancel.is_cancelled() {
        return Err(LoadError::Cancelled);
      }
      tokio::task::yield_now().await;
    }

    if cancel.is_cancelled() {
      return Err(LoadError::Cancelled);
    }

    let path = self.entry_path(key);
    self.pool.run(move || commit(temp, &path)).await??;
    Ok(written)
  }

  /// Delete the entry. Deleting a missing entry is not an error.
  pub async fn delete(&self, key: &CacheKey) -> Result<(), LoadError> {
    let path = self.entry_path(key);
    self
      .pool
      .run(move || match fs::remove_file(&path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
      })
      .await??;
    Ok(())
  }
}

fn is_temp_file_name(name: &str) -> bool {
  name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

fn remove_leftover_temp_files(dir: &Path) -> io::Result<()> {
  for entry in fs::read_dir(dir)? {
    let entry = entry?;
    if !is_temp_file_name(&entry.file_name().to_string_lossy()) {
      continue;
    }

    match fs::remove_file(entry.path()) {
      Ok(()) => debug!(path = %entry.path().display(), "Removed leftover temp file"),
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => warn!(path = %entry.path().display(), error = %e, "Could not remove temp file"),
    }
  }
  Ok(())
}

fn commit(mut temp: NamedTempFile, path: &Path) -> io::Result<()> {
  temp.flush()?;
  temp.as_file().sync_all()?;
  temp.persist(path).map_err(|e| e.error)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::FetchError;
  use bytes::Bytes;
  use futures::stream;

  fn store() -> (tempfile::TempDir, CacheStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path().join("cache"), WorkerPool::new(1)).unwrap();
    (dir, store)
  }

  fn body(chunks: &[&'static [u8]]) -> ByteStream {
    stream::iter(
      chunks
        .iter()
        .map(|c| Ok::<_, FetchError>(Bytes::from_static(c)))
        .collect::<Vec<_>>(),
    )
    .boxed()
  }

  fn leftover_temp_files(store: &CacheStore) -> usize {
    fs::read_dir(store.dir())
      .unwrap()
      .filter_map(|e| e.ok())
      .filter(|e| e.file_name().to_string_lossy().ends_with(TEMP_SUFFIX))
      .count()
  }

  #[tokio::test]
  async fn test_open_creates_directory() {
    let (_dir, store) = store();
    assert!(store.dir().is_dir());
  }

  #[tokio::test]
  async fn test_open_removes_leftover_temp_files() {
    let (dir, store) = store();
    let key = CacheKey::from("kept");
    fs::write(store.entry_path(&key), b"entry").unwrap();
    fs::write(store.dir().join(".img-crashed.part"), b"half").unwrap();
    fs::write(store.dir().join("notes.part"), b"unrelated").unwrap();
    assert_eq!(leftover_temp_files(&store), 2);

    let store = CacheStore::open(dir.path().join("cache"), WorkerPool::new(1)).unwrap();

    assert!(!store.dir().join(".img-crashed.part").exists());
    assert!(store.dir().join("notes.part").exists());
    assert_eq!(store.read(&key).await.unwrap().unwrap(), b"entry");
  }

  #[tokio::test]
  async fn test_missing_entry() {
    let (_dir, store) = store();
    let key = CacheKey::from("missing");
    assert!(!store.exists(&key).await.unwrap());
    assert_eq!(store.read(&key).await.unwrap(), None);
    assert_eq!(store.last_modified(&key).await.unwrap(), DateTime::<Utc>::UNIX_EPOCH);
  }

  #[tokio::test]
  async fn test_write_then_read() {
    let (_dir, store) = store();
    let key = CacheKey::from("a");
    let token = CancellationToken::new();

    let written = store
      .write_atomic(&key, body(&[b"hello ", b"world"]), &token)
      .await
      .unwrap();

    assert_eq!(written, 11);
    assert!(store.exists(&key).await.unwrap());
    assert_eq!(store.read(&key).await.unwrap().unwrap(), b"hello world");
    assert!(store.last_modified(&key).await.unwrap() > Utc::now() - chrono::Duration::minutes(1));
    assert_eq!(leftover_temp_files(&store), 0);
  }

  #[tokio::test]
  async fn test_write_replaces_previous_content() {
    let (_dir, store) = store();
    let key = CacheKey::from("a");
    let token = CancellationToken::new();

    store.write_atomic(&key, body(&[b"old"]), &token).await.unwrap();
    store.write_atomic(&key, body(&[b"new"]), &token).await.unwrap();

    assert_eq!(store.read(&key).await.unwrap().unwrap(), b"new");
  }

  #[tokio::test]
  async fn test_cancelled_write_keeps_committed_entry() {
    let (_dir, store) = store();
    let key = CacheKey::from("a");

    store
      .write_atomic(&key, body(&[b"committed"]), &CancellationToken::new())
      .await
      .unwrap();

    let token = CancellationToken::new();
    let (tx, rx) = futures::channel::mpsc::unbounded::<Result<Bytes, FetchError>>();
    tx.unbounded_send(Ok(Bytes::from_static(b"part"))).unwrap();
    let cancel = token.clone();
    tokio::spawn(async move {
      tokio::time::sleep(std::time::Duration::from_millis(20)).await;
      cancel.cancel();
      // keep the stream open until after cancellation
      drop(tx);
    });

    let result = store.write_atomic(&key, rx.boxed(), &token).await;
    assert!(matches!(result, Err(LoadError::Cancelled)));
    assert_eq!(store.read(&key).await.unwrap().unwrap(), b"committed");
    assert_eq!(leftover_temp_files(&store), 0);
  }

  #[tokio::test]
  async fn test_body_error_leaves_no_entry() {
    let (_dir, store) = store();
    let key = CacheKey::from("a");
    let failing = stream::iter(vec![
      Ok(Bytes::from_static(b"part")),
      Err(FetchError::Transport("connection reset".into())),
    ])
    .boxed();

    let result = store
      .write_atomic(&key, failing, &CancellationToken::new())
      .await;
    assert!(matches!(result, Err(LoadError::Fetch(_))));
    assert!(!store.exists(&key).await.unwrap());
    assert_eq!(leftover_temp_files(&store), 0);
  }

  #[tokio::test]
  async fn test_delete_is_idempotent() {
    let (_dir, store) = store();
    let key = CacheKey::from("a");
    store
      .write_atomic(&key, body(&[b"x"]), &CancellationToken::new())
      .await
      .unwrap();

    store.delete(&key).await.unwrap();
    store.delete(&key).await.unwrap();
    assert!(!store.exists(&key).await.unwrap());
  }

  #[tokio::test]
  async fn test_closed_pool_fails_operations() {
    let dir = tempfile::tempdir().unwrap();
    let pool = WorkerPool::new(1);
    let store = CacheStore::open(dir.path(), pool.clone()).unwrap();
    pool.close();
    assert!(matches!(
      store.exists(&CacheKey::from("a")).await,
      Err(LoadError::ShutDown)
    ));
  }
}
