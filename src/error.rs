//! Error taxonomy of the loading engine.
//!
//! None of these errors ever reach the caller of `Loader::load_image`. They
//! steer the per-job protocol (refresh, abort the refresh, stop) and end up in
//! traces and in the `LoadOutcome` of a request.

use std::io;

use thiserror::Error;

/// Why fetching a remote resource failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  /// The URL could not be parsed
  #[error("invalid url {url}: {reason}")]
  InvalidUrl { url: String, reason: String },
  /// The server answered with a non-success status
  #[error("unexpected response status {0}")]
  Status(u16),
  /// Connecting, sending or reading the body failed
  #[error("transport error: {0}")]
  Transport(String),
}

impl FetchError {
  pub fn transport(err: impl std::fmt::Display) -> Self {
    Self::Transport(err.to_string())
  }
}

/// Bytes that could not be turned into an image.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct DecodeError(pub String);

impl DecodeError {
  pub fn new(reason: impl Into<String>) -> Self {
    Self(reason.into())
  }
}

/// Everything that can stop a step of a load job.
#[derive(Debug, Error)]
pub enum LoadError {
  #[error("fetch failed: {0}")]
  Fetch(#[from] FetchError),
  #[error("cache i/o failed: {0}")]
  Io(#[from] io::Error),
  #[error("could not decode image: {0}")]
  Decode(#[from] DecodeError),
  /// Not a failure: the job was superseded or the loader shut down
  #[error("job was cancelled")]
  Cancelled,
  #[error("worker pool has been shut down")]
  ShutDown,
  #[error("worker task failed: {0}")]
  Worker(#[from] tokio::task::JoinError),
}

impl LoadError {
  /// Errors after which the current refresh is abandoned but the job itself
  /// completes normally.
  pub fn is_recoverable(&self) -> bool {
    matches!(self, Self::Fetch(_) | Self::Io(_) | Self::Decode(_))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_recoverable_classification() {
    assert!(LoadError::from(FetchError::Status(404)).is_recoverable());
    assert!(LoadError::from(io::Error::other("disk full")).is_recoverable());
    assert!(LoadError::from(DecodeError::new("bad magic")).is_recoverable());
    assert!(!LoadError::Cancelled.is_recoverable());
    assert!(!LoadError::ShutDown.is_recoverable());
  }

  #[test]
  fn test_messages() {
    assert_eq!(
      FetchError::Status(503).to_string(),
      "unexpected response status 503"
    );
    assert_eq!(
      LoadError::from(DecodeError::new("truncated")).to_string(),
      "could not decode image: truncated"
    );
  }
}
