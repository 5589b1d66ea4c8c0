//! Fetch seam for the preview cache.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use thiserror::Error;

/// Boxed future returned by [`PreviewFetcher::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Bytes, FetchError>> + Send + 'a>>;

/// Errors from fetching preview bytes.
///
/// Cloneable so one failed fetch can be broadcast to every attached
/// waiter. Failures are never cached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The origin fetch itself failed
    #[error("preview fetch failed: {0}")]
    Origin(String),

    /// The shared fetch ended without delivering a result
    #[error("preview fetch ended without a result")]
    Interrupted,
}

/// Source of preview bytes (remote thumbnail endpoint, local reader).
///
/// The cache guarantees at most one in-flight `fetch` per key; once a
/// fetch starts it runs to completion — cancellation is not supported.
pub trait PreviewFetcher: Send + Sync + 'static {
    /// Fetch the bytes for one preview key.
    fn fetch(&self, key: &str) -> FetchFuture<'_>;
}
