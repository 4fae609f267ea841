//! Per-variant fragment loading: byte-range fetch, persist, demux.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::OnceCell;
use tracing::{debug, trace};
use vidra_media::{DecodedFragment, MediaTime, SegmentDemuxer};
use vidra_net::{RangeFetcher, RangeSpec};

use crate::{
    cache::FragmentCache,
    error::{HlsError, HlsResult},
    playlist::{MasterId, MediaPlaylist, Variant, VariantId},
};

/// A fragment that survived loading and demuxing.
#[derive(Debug)]
pub struct LoadedFragment {
    pub fragment: DecodedFragment,
    pub variant: VariantId,
    /// Bytes fetched from the network for this load (0 on cache hits).
    pub bytes: u64,
    /// Wall-clock time spent fetching.
    pub elapsed: Duration,
    pub from_cache: bool,
}

/// Outcome of a load attempt.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(LoadedFragment),
    /// The session moved on (seek or quality change) while this load was
    /// in flight; the result is to be discarded without error.
    Stale,
}

/// Loads one variant's fragments. The initialization segment is fetched at
/// most once per loader lifetime; fragments go through the on-disk scratch
/// so a variant switch can reuse bytes downloaded under a different
/// quality.
pub struct FragmentLoader {
    variant_id: VariantId,
    variant: Variant,
    playlist: MediaPlaylist,
    master_id: MasterId,
    fetcher: Arc<dyn RangeFetcher>,
    cache: FragmentCache,
    demuxer: Arc<dyn SegmentDemuxer>,
    epoch: Arc<AtomicU64>,
    init: OnceCell<Bytes>,
}

impl FragmentLoader {
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        variant_id: VariantId,
        variant: Variant,
        playlist: MediaPlaylist,
        master_id: MasterId,
        fetcher: Arc<dyn RangeFetcher>,
        cache: FragmentCache,
        demuxer: Arc<dyn SegmentDemuxer>,
        epoch: Arc<AtomicU64>,
    ) -> Self {
        Self {
            variant_id,
            variant,
            playlist,
            master_id,
            fetcher,
            cache,
            demuxer,
            epoch,
            init: OnceCell::new(),
        }
    }

    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    fn is_stale(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) != epoch
    }

    /// Load fragment `index`, demuxed and translated to `basetime`.
    ///
    /// `epoch` is the caller's snapshot of the session epoch; the loader
    /// re-checks it after every suspension point and reports
    /// [`LoadOutcome::Stale`] instead of applying side effects for a
    /// superseded generation.
    pub async fn load(
        &self,
        index: usize,
        basetime: MediaTime,
        epoch: u64,
    ) -> HlsResult<LoadOutcome> {
        let fragment = self
            .playlist
            .fragments
            .get(index)
            .ok_or(HlsError::FragmentNotFound(index))?;

        if let Some(path) = self.cache.get(&self.master_id, self.variant.bandwidth, index) {
            trace!(index, variant = self.variant_id.0, "fragment cache hit");
            let Some(mut decoded) = self.demux(path, basetime, index, epoch).await? else {
                return Ok(LoadOutcome::Stale);
            };
            decoded.from_cache = true;
            return Ok(LoadOutcome::Loaded(LoadedFragment {
                fragment: decoded,
                variant: self.variant_id,
                bytes: 0,
                elapsed: Duration::ZERO,
                from_cache: true,
            }));
        }

        let started = Instant::now();
        let mut fetched: u64 = 0;

        let init = match self.init.get() {
            Some(init) => init.clone(),
            None => {
                let range = RangeSpec::with_length(
                    self.playlist.init.byte_range.start,
                    self.playlist.init.byte_range.length,
                );
                let bytes = self.fetcher.fetch_range(&self.playlist.init.url, range).await?;
                fetched += bytes.len() as u64;
                // A racing load may have set it first; both fetched the
                // same range, keep whichever landed.
                let _ = self.init.set(bytes.clone());
                bytes
            }
        };
        if self.is_stale(epoch) {
            return Ok(LoadOutcome::Stale);
        }

        let range = RangeSpec::with_length(fragment.byte_range.start, fragment.byte_range.length);
        let media = self.fetcher.fetch_range(&fragment.url, range).await?;
        fetched += media.len() as u64;
        let elapsed = started.elapsed();
        if self.is_stale(epoch) {
            return Ok(LoadOutcome::Stale);
        }

        let mut data = Vec::with_capacity(init.len() + media.len());
        data.extend_from_slice(&init);
        data.extend_from_slice(&media);
        let path = self
            .cache
            .save(&self.master_id, self.variant.bandwidth, index, &data)?;

        debug!(
            index,
            variant = self.variant_id.0,
            bytes = fetched,
            elapsed_ms = elapsed.as_millis(),
            "fragment fetched"
        );

        let Some(decoded) = self.demux(path, basetime, index, epoch).await? else {
            return Ok(LoadOutcome::Stale);
        };

        Ok(LoadOutcome::Loaded(LoadedFragment {
            fragment: decoded,
            variant: self.variant_id,
            bytes: fetched,
            elapsed,
            from_cache: false,
        }))
    }

    /// Demux on the blocking pool; `None` when the epoch moved on.
    async fn demux(
        &self,
        path: std::path::PathBuf,
        basetime: MediaTime,
        index: usize,
        epoch: u64,
    ) -> HlsResult<Option<DecodedFragment>> {
        let demuxer = Arc::clone(&self.demuxer);
        let decoded = tokio::task::spawn_blocking(move || demuxer.demux(&path, basetime, index))
            .await
            .map_err(|e| HlsError::LocalFilesAccess(format!("demux task failed: {e}")))??;

        if self.is_stale(epoch) {
            return Ok(None);
        }
        Ok(Some(decoded))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tempfile::TempDir;
    use url::Url;
    use vidra_media::mock::MockDemuxer;
    use vidra_net::{NetError, NetResult};

    use super::*;
    use crate::playlist::{parse_master_playlist, parse_media_playlist};

    /// In-memory range fetcher over a fixed URL -> bytes map.
    pub(crate) struct MapFetcher {
        resources: HashMap<Url, Bytes>,
        pub range_calls: AtomicUsize,
    }

    impl MapFetcher {
        pub(crate) fn new(resources: HashMap<Url, Bytes>) -> Self {
            Self {
                resources,
                range_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RangeFetcher for MapFetcher {
        async fn fetch_bytes(&self, url: &Url) -> NetResult<Bytes> {
            self.resources
                .get(url)
                .cloned()
                .ok_or_else(|| NetError::HttpError {
                    url: url.clone(),
                    status: 404,
                    body: None,
                })
        }

        async fn fetch_range(&self, url: &Url, range: RangeSpec) -> NetResult<Bytes> {
            self.range_calls.fetch_add(1, Ordering::Relaxed);
            let body = self.fetch_bytes(url).await?;
            let start = range.start as usize;
            let end = range
                .end
                .map_or(body.len(), |e| (e as usize + 1).min(body.len()));
            if start > body.len() || start > end {
                return Err(NetError::HttpError {
                    url: url.clone(),
                    status: 416,
                    body: None,
                });
            }
            Ok(body.slice(start..end))
        }
    }

    fn fixture() -> (FragmentLoader, Arc<AtomicU64>, TempDir, Arc<MapFetcher>) {
        let base: Url = "http://127.0.0.1/s/master.m3u8".parse().unwrap();
        let master = parse_master_playlist(
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1500000,RESOLUTION=1280x720\nhls_level_720.m3u8\n",
            &base,
        )
        .unwrap();
        let media_url = master.variants[0].url.clone();
        let media = parse_media_playlist(
            "#EXTM3U\n\
             #EXT-X-VERSION:6\n\
             #EXT-X-TARGETDURATION:6\n\
             #EXT-X-MEDIA-SEQUENCE:0\n\
             #EXT-X-MAP:URI=\"partfile7.mp4\",BYTERANGE=\"16@0\"\n\
             #EXTINF:6.0,\n\
             #EXT-X-BYTERANGE:32@16\n\
             partfile7.mp4\n\
             #EXTINF:6.0,\n\
             #EXT-X-BYTERANGE:32@48\n\
             partfile7.mp4\n",
            &media_url,
        )
        .unwrap();

        let part_url: Url = "http://127.0.0.1/s/partfile7.mp4".parse().unwrap();
        let body: Bytes = Bytes::from((0u8..80).collect::<Vec<u8>>());
        let fetcher = Arc::new(MapFetcher::new(HashMap::from([(part_url, body)])));

        let tmp = TempDir::new().unwrap();
        let cache = FragmentCache::with_root(tmp.path().join("hls"));
        cache.prepare_session(&master).unwrap();

        let epoch = Arc::new(AtomicU64::new(0));
        let loader = FragmentLoader::new(
            VariantId(0),
            master.variants[0].clone(),
            media,
            master.id.clone(),
            Arc::clone(&fetcher) as Arc<dyn RangeFetcher>,
            cache,
            Arc::new(MockDemuxer::default()),
            Arc::clone(&epoch),
        );
        (loader, epoch, tmp, fetcher)
    }

    #[tokio::test]
    async fn init_is_fetched_once_per_loader() {
        let (loader, _epoch, _tmp, fetcher) = fixture();

        let first = loader.load(0, MediaTime::ZERO, 0).await.unwrap();
        let LoadOutcome::Loaded(first) = first else {
            panic!("expected loaded fragment");
        };
        // Init (16 bytes) + fragment (32 bytes).
        assert_eq!(first.bytes, 48);
        assert!(!first.from_cache);
        assert_eq!(fetcher.range_calls.load(Ordering::Relaxed), 2);

        let second = loader
            .load(1, MediaTime::with_seconds(6.0, 90_000), 0)
            .await
            .unwrap();
        let LoadOutcome::Loaded(second) = second else {
            panic!("expected loaded fragment");
        };
        // Only the fragment range this time.
        assert_eq!(second.bytes, 32);
        assert_eq!(fetcher.range_calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn second_load_of_same_fragment_hits_the_cache() {
        let (loader, _epoch, _tmp, fetcher) = fixture();

        let LoadOutcome::Loaded(_) = loader.load(0, MediaTime::ZERO, 0).await.unwrap() else {
            panic!("expected loaded fragment");
        };
        let calls_after_first = fetcher.range_calls.load(Ordering::Relaxed);

        let LoadOutcome::Loaded(hit) = loader.load(0, MediaTime::ZERO, 0).await.unwrap() else {
            panic!("expected loaded fragment");
        };
        assert!(hit.from_cache);
        assert!(hit.fragment.from_cache);
        assert_eq!(hit.bytes, 0);
        assert_eq!(fetcher.range_calls.load(Ordering::Relaxed), calls_after_first);
    }

    #[tokio::test]
    async fn bumped_epoch_discards_the_result() {
        let (loader, epoch, _tmp, _fetcher) = fixture();

        epoch.store(1, Ordering::Release);
        let outcome = loader.load(0, MediaTime::ZERO, 0).await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Stale));
    }

    #[tokio::test]
    async fn missing_fragment_index_is_an_error() {
        let (loader, _epoch, _tmp, _fetcher) = fixture();

        let err = loader.load(9, MediaTime::ZERO, 0).await.unwrap_err();
        assert!(matches!(err, HlsError::FragmentNotFound(9)));
    }
}
