//! Disk-backed, staleness-aware image loading.
//!
//! A [`Loader`] serves the cached copy of an image first, then refreshes it
//! from the network when it is stale, and keeps at most one job per cache key
//! in flight: a newer request for a key cancels the older one.
//!
//! ```ignore
//! let loader = Loader::new(&config, Arc::new(HttpFetcher::new(&config.http)?), RasterDecoder::new(), renderer)?;
//!
//! loader.load_image("https://example.com/cat.png", &view);
//! loader.load_image(
//!   LoadRequest::new("https://example.com/cat.png").force_update(true),
//!   &view,
//! );
//!
//! // On teardown
//! loader.close();
//! ```

pub mod cache;
pub mod config;
pub mod decode;
pub mod error;
pub mod fetch;
pub mod jobs;
pub mod loader;
pub mod logging;
pub mod render;
pub mod worker;

pub use cache::{CacheKey, CacheStore, RefreshReason};
pub use config::Config;
pub use decode::{Decoder, RasterDecoder};
pub use error::{DecodeError, FetchError, LoadError};
pub use fetch::{ByteStream, Fetcher, HttpFetcher};
pub use loader::{CachedRender, LoadOutcome, LoadReport, LoadRequest, Loader, RefreshResult};
pub use render::{RenderStatus, Renderer};
