//! Deciding whether a cache entry needs a refresh.

use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Why a load job refreshes its entry from the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
  /// The caller asked for a refresh
  Forced,
  /// The entry exists but could not be decoded
  DecodeError,
  /// There is no entry yet
  Missing,
  /// The entry is older than the freshness window
  Stale { age: Duration },
}

impl fmt::Display for RefreshReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Forced => write!(f, "forced update"),
      Self::DecodeError => write!(f, "cached file could not be decoded"),
      Self::Missing => write!(f, "not cached"),
      Self::Stale { age } => write!(f, "stale ({}s old)", age.num_seconds()),
    }
  }
}

/// What the cache check found out about an entry.
#[derive(Debug, Clone, Copy)]
pub struct EntryState {
  pub present: bool,
  pub decode_error: bool,
  pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
  window: Duration,
}

impl FreshnessPolicy {
  pub fn new(window: Duration) -> Self {
    Self { window }
  }

  /// Check if an entry modified at `last_modified` is stale at `now`.
  pub fn is_stale(&self, last_modified: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - last_modified > self.window
  }

  /// The reason to refresh, or `None` if the entry can be kept as is.
  pub fn evaluate(
    &self,
    force_update: bool,
    entry: EntryState,
    now: DateTime<Utc>,
  ) -> Option<RefreshReason> {
    if force_update {
      Some(RefreshReason::Forced)
    } else if entry.decode_error {
      Some(RefreshReason::DecodeError)
    } else if !entry.present {
      Some(RefreshReason::Missing)
    } else if self.is_stale(entry.last_modified, now) {
      Some(RefreshReason::Stale {
        age: now - entry.last_modified,
      })
    } else {
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn policy() -> FreshnessPolicy {
    FreshnessPolicy::new(Duration::minutes(5))
  }

  fn entry(age: Duration) -> (EntryState, DateTime<Utc>) {
    let now = Utc::now();
    (
      EntryState {
        present: true,
        decode_error: false,
        last_modified: now - age,
      },
      now,
    )
  }

  #[test]
  fn test_fresh_entry_is_kept() {
    let (entry, now) = entry(Duration::minutes(1));
    assert_eq!(policy().evaluate(false, entry, now), None);
  }

  #[test]
  fn test_exactly_window_old_is_fresh() {
    let (entry, now) = entry(Duration::minutes(5));
    assert_eq!(policy().evaluate(false, entry, now), None);
  }

  #[test]
  fn test_old_entry_is_stale() {
    let (entry, now) = entry(Duration::minutes(6));
    assert_eq!(
      policy().evaluate(false, entry, now),
      Some(RefreshReason::Stale {
        age: Duration::minutes(6)
      })
    );
  }

  #[test]
  fn test_force_wins_over_fresh() {
    let (entry, now) = entry(Duration::zero());
    assert_eq!(
      policy().evaluate(true, entry, now),
      Some(RefreshReason::Forced)
    );
  }

  #[test]
  fn test_decode_error_ignores_age() {
    let (mut entry, now) = entry(Duration::zero());
    entry.decode_error = true;
    assert_eq!(
      policy().evaluate(false, entry, now),
      Some(RefreshReason::DecodeError)
    );
  }

  #[test]
  fn test_missing_entry() {
    let entry = EntryState {
      present: false,
      decode_error: false,
      last_modified: DateTime::<Utc>::UNIX_EPOCH,
    };
    assert_eq!(
      policy().evaluate(false, entry, Utc::now()),
      Some(RefreshReason::Missing)
    );
  }

  #[test]
  fn test_epoch_is_always_stale() {
    assert!(policy().is_stale(DateTime::<Utc>::UNIX_EPOCH, Utc::now()));
  }
}
