use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::{error::NetResult, types::RangeSpec};

/// Byte-range resource access.
///
/// The playback engine fetches playlists and fragment byte ranges through
/// this seam only. The embedding application can route it to plain HTTP,
/// a local origin, or an authenticated chunked transport.
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Fetch the whole resource.
    async fn fetch_bytes(&self, url: &Url) -> NetResult<Bytes>;

    /// Fetch a byte range of the resource.
    async fn fetch_range(&self, url: &Url, range: RangeSpec) -> NetResult<Bytes>;
}
