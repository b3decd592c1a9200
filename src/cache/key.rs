//! Cache keys and their mapping to file names.

use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

const FILE_PREFIX: &str = "img-";
const FILE_EXTENSION: &str = ".dat";

/// Identifies the cache slot of a logical resource.
///
/// Defaults to the source URL, but any string works: several URLs may share
/// one slot, and one URL may be cached under several keys.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
  pub fn new(key: impl Into<Arc<str>>) -> Self {
    Self(key.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Name of the file backing this key, see [`file_name_for`].
  pub fn file_name(&self) -> String {
    file_name_for(&self.0)
  }
}

impl From<&str> for CacheKey {
  fn from(key: &str) -> Self {
    Self::new(key)
  }
}

impl From<String> for CacheKey {
  fn from(key: String) -> Self {
    Self::new(key)
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl fmt::Debug for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "CacheKey({:?})", &*self.0)
  }
}

/// Map a key to a filesystem-safe cache file name.
///
/// The name is derived from the key only, never from the content, so a
/// refreshed resource replaces its previous file.
pub fn file_name_for(key: &str) -> String {
  // SHA256 hash for stable, fixed-length names
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  let result = hasher.finalize();
  format!("{}{}{}", FILE_PREFIX, hex::encode(result), FILE_EXTENSION)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_same_key_same_name() {
    assert_eq!(
      file_name_for("https://example.com/a.png"),
      file_name_for("https://example.com/a.png")
    );
  }

  #[test]
  fn test_different_keys_different_names() {
    assert_ne!(
      file_name_for("https://example.com/a.png"),
      file_name_for("https://example.com/b.png")
    );
  }

  #[test]
  fn test_empty_key_is_hashed() {
    // sha256 of the empty string
    assert_eq!(
      file_name_for(""),
      "img-e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855.dat"
    );
  }

  #[test]
  fn test_name_shape() {
    let name = CacheKey::from("avatar:42").file_name();
    assert_eq!(name.len(), FILE_PREFIX.len() + 64 + FILE_EXTENSION.len());
    assert!(name.starts_with(FILE_PREFIX));
    assert!(name.ends_with(FILE_EXTENSION));
    assert!(!name.contains('/'));
  }
}
