//! Plays a synthetic session against the loopback origin and prints
//! status snapshots until playback finishes.
//!
//! ```sh
//! RUST_LOG=vidra_hls=debug,vidra_player=debug cargo run --example local_playback
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use url::Url;
use vidra_hls::FragmentCache;
use vidra_media::mock::MockDemuxer;
use vidra_net::{HttpClient, NetError, NetOptions, NetResult, RangeFetcher, RangeSpec};
use vidra_origin::{HlsOrigin, SessionSpec, VariantSpec};
use vidra_player::{PlayState, Player, PlayerOptions};
use vidra_render::mock::{CountingLayer, CountingSink};

const FRAGMENTS: usize = 4;

struct MemoryStore {
    resources: HashMap<Url, Bytes>,
}

#[async_trait]
impl RangeFetcher for MemoryStore {
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
        let body = self.fetch_bytes(url).await?;
        let start = range.start as usize;
        let end = range
            .end
            .map_or(body.len(), |e| (e as usize + 1).min(body.len()));
        Ok(body.slice(start.min(body.len())..end))
    }
}

fn provider_playlist(file_id: u64) -> String {
    let mut text = String::from(
        "#EXTM3U\n\
         #EXT-X-VERSION:6\n\
         #EXT-X-TARGETDURATION:6\n\
         #EXT-X-MEDIA-SEQUENCE:0\n",
    );
    text.push_str(&format!(
        "#EXT-X-MAP:URI=\"mtproto:{file_id}\",BYTERANGE=\"64@0\"\n"
    ));
    for i in 0..FRAGMENTS {
        text.push_str(&format!(
            "#EXTINF:6.000,\n#EXT-X-BYTERANGE:128@{}\nmtproto:{file_id}\n",
            64 + i * 128
        ));
    }
    text
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let upstream: Url = "upstream://file/1".parse().unwrap();
    let store = Arc::new(MemoryStore {
        resources: HashMap::from([(
            upstream.clone(),
            Bytes::from(vec![0u8; 64 + FRAGMENTS * 128]),
        )]),
    });

    let origin = HlsOrigin::bind(store).await.unwrap();
    origin.register(
        "demo",
        SessionSpec {
            variants: vec![VariantSpec {
                bandwidth: 1_500_000,
                width: 1280,
                height: 720,
            }],
            playlists: HashMap::from([(720, provider_playlist(1))]),
            files: HashMap::from([(1u64, upstream)]),
        },
    );

    let (layer, _) = CountingLayer::new(usize::MAX);
    let (sink, _) = CountingSink::new(usize::MAX);
    let tmp = TempDir::new().unwrap();
    let cache = FragmentCache::with_root(tmp.path().join("hls"));
    cache.sweep_stale();

    let player = Player::new(
        Arc::new(HttpClient::new(NetOptions::default()).unwrap()),
        cache,
        Arc::new(MockDemuxer::default()),
        Box::new(layer),
        Box::new(sink),
        PlayerOptions::default(),
    );

    player.load(origin.master_url("demo").unwrap());
    player.set_base_rate(8.0);
    player.play().await;

    let mut status = player.status();
    loop {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let snapshot = status.borrow_and_update().clone();
        println!(
            "t={:6.2}s buffered={:5.2}s state={:?} buffering={}",
            snapshot.position_secs, snapshot.buffered_secs, snapshot.state, snapshot.buffering
        );
        if snapshot.state == PlayState::Finished {
            break;
        }
    }
}
