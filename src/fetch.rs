//! Fetching remote resources as byte streams.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use std::time::Duration;

use crate::config::HttpConfig;
use crate::error::FetchError;

/// Body of a successful fetch, delivered in chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Source of remote bytes.
///
/// Returning from `fetch` means the response was successful; the body is
/// then pulled chunk by chunk, and dropping the stream abandons the transfer.
pub trait Fetcher: Send + Sync + 'static {
  fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ByteStream, FetchError>>;
}

/// HTTP(S) fetcher backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(config: &HttpConfig) -> color_eyre::Result<Self> {
    let mut builder = reqwest::Client::builder()
      .user_agent(config.user_agent.clone())
      .connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    if let Some(timeout) = config.timeout_ms {
      builder = builder.timeout(Duration::from_millis(timeout));
    }

    let client = builder
      .build()
      .map_err(|e| color_eyre::eyre::eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Fetcher for HttpFetcher {
  fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ByteStream, FetchError>> {
    Box::pin(async move {
      let url = url::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
      })?;

      let response = self
        .client
        .get(url)
        .send()
        .await
        .map_err(FetchError::transport)?;

      let status = response.status();
      if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
      }

      Ok(response.bytes_stream().map_err(FetchError::transport).boxed())
    })
  }
}
