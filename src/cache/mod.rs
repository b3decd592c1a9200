//! Disk cache: key hashing, the blob store and the freshness policy.
//!
//! The filesystem is the source of truth. Nothing about an entry is kept in
//! memory between requests:
//! - one file per key, named after the hash of the key
//! - the file's mtime is the entry's age
//! - writes are atomic (temporary file + rename)

mod freshness;
mod key;
mod store;

pub use freshness::{EntryState, FreshnessPolicy, RefreshReason};
pub use key::{file_name_for, CacheKey};
pub use store::CacheStore;
