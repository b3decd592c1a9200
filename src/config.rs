use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Loader configuration. Fixed once a `Loader` has been built from it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Maximum age of a cache entry before it gets refreshed
  pub freshness_window_ms: u64,
  /// Cross-fade duration for refreshed images (0 = swap immediately)
  pub transition_duration_ms: u64,
  /// Name of the directory created under `cache_root`
  pub cache_directory_name: String,
  /// Root directory for the cache (defaults to the platform cache directory)
  pub cache_root: Option<PathBuf>,
  /// Log every protocol step at debug level
  pub debug_tracing: bool,
  /// Size of the worker pool for disk and decode work
  pub workers: usize,
  pub http: HttpConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      freshness_window_ms: 5 * 60 * 1000,
      transition_duration_ms: 500,
      cache_directory_name: "image_magic".to_string(),
      cache_root: None,
      debug_tracing: false,
      workers: 1,
      http: HttpConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
  pub user_agent: String,
  pub connect_timeout_ms: u64,
  /// Timeout for the whole request including the body; none by default
  pub timeout_ms: Option<u64>,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self {
      user_agent: concat!("image-magic/", env!("CARGO_PKG_VERSION")).to_string(),
      connect_timeout_ms: 10_000,
      timeout_ms: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./image-magic.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/image-magic/config.yaml
  /// 4. Built-in defaults
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("image-magic.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("image-magic").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  /// Parse and validate a YAML document.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.workers == 0 {
      return Err(eyre!("`workers` must be at least 1"));
    }
    if self.cache_directory_name.trim().is_empty() {
      return Err(eyre!("`cache_directory_name` must not be empty"));
    }
    Ok(())
  }

  pub fn freshness_window(&self) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(self.freshness_window_ms).unwrap_or(i64::MAX))
  }

  pub fn transition_duration(&self) -> Duration {
    Duration::from_millis(self.transition_duration_ms)
  }

  /// Resolve the directory holding the cache files.
  pub fn cache_dir(&self) -> Result<PathBuf> {
    let root = match &self.cache_root {
      Some(root) => root.clone(),
      None => dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|p| p.join(".cache")))
        .ok_or_else(|| eyre!("Could not determine cache directory"))?,
    };

    Ok(root.join(&self.cache_directory_name))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.freshness_window_ms, 300_000);
    assert_eq!(config.transition_duration(), Duration::from_millis(500));
    assert_eq!(config.cache_directory_name, "image_magic");
    assert_eq!(config.workers, 1);
    assert!(!config.debug_tracing);
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml("freshness_window_ms: 1000\ndebug_tracing: true\n").unwrap();
    assert_eq!(config.freshness_window(), chrono::Duration::seconds(1));
    assert!(config.debug_tracing);
    assert_eq!(config.transition_duration_ms, 500);
    assert_eq!(config.http.connect_timeout_ms, 10_000);
  }

  #[test]
  fn test_zero_workers_rejected() {
    assert!(Config::from_yaml("workers: 0").is_err());
  }

  #[test]
  fn test_cache_dir_uses_root_and_name() {
    let config = Config::from_yaml("cache_root: /tmp/somewhere\ncache_directory_name: thumbs").unwrap();
    assert_eq!(
      config.cache_dir().unwrap(),
      PathBuf::from("/tmp/somewhere/thumbs")
    );
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "transition_duration_ms: 0\nhttp:\n  timeout_ms: 2500\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.transition_duration(), Duration::ZERO);
    assert_eq!(config.http.timeout_ms, Some(2500));
  }
}
