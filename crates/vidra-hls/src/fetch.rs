//! Playlist fetching over the byte-range seam.

use std::sync::Arc;

use tracing::debug;
use url::Url;
use vidra_net::RangeFetcher;

use crate::{
    error::{HlsError, HlsResult},
    playlist::{MasterPlaylist, MediaPlaylist, Variant, parse_master_playlist,
               parse_media_playlist},
};

#[derive(Clone)]
pub struct PlaylistFetcher {
    fetcher: Arc<dyn RangeFetcher>,
}

impl PlaylistFetcher {
    pub fn new(fetcher: Arc<dyn RangeFetcher>) -> Self {
        Self { fetcher }
    }

    pub async fn master(&self, url: &Url) -> HlsResult<MasterPlaylist> {
        let bytes = self.fetcher.fetch_bytes(url).await?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|e| HlsError::ParseMaster(format!("invalid UTF-8: {e}")))?;
        let master = parse_master_playlist(text, url)?;
        debug!(url = %url, variants = master.variants.len(), "master playlist fetched");
        Ok(master)
    }

    pub async fn media(&self, variant: &Variant) -> HlsResult<MediaPlaylist> {
        let bytes = self.fetcher.fetch_bytes(&variant.url).await?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|e| HlsError::ParsePlaylist(format!("invalid UTF-8: {e}")))?;
        let media = parse_media_playlist(text, &variant.url)?;
        debug!(
            url = %variant.url,
            fragments = media.fragments.len(),
            "media playlist fetched"
        );
        Ok(media)
    }
}
