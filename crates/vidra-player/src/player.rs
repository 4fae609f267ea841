//! The facade wiring the session driver to the buffers renderer.

use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;
use vidra_hls::{
    FragmentCache, HlsError, HlsSession, MediaPlaylist, PlaylistFetcher, SessionOptions,
    SessionSink, abr::QualitySelection,
};
use vidra_media::{DecodedFragment, MEDIA_TIMESCALE, MediaTime, SegmentDemuxer};
use vidra_net::RangeFetcher;
use vidra_render::{AudioSink, BuffersRenderer, RendererOptions, VideoLayer};

use crate::status::{BufferingStatus, PlayState, PlayerStatus};

/// Margin under which end-of-stream and buffer starvation trip.
const STALL_MARGIN_SECS: f64 = 0.05;

#[derive(Clone, Debug)]
pub struct PlayerOptions {
    pub session: SessionOptions,
    pub renderer: RendererOptions,
    /// Cadence of the display tick driving the renderer and status.
    pub display_interval: Duration,
    /// Delay before a failed master load is retried.
    pub retry_delay: Duration,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            session: SessionOptions::default(),
            renderer: RendererOptions::default(),
            display_interval: Duration::from_millis(16),
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Facade-level events.
#[derive(Clone, Debug)]
pub enum PlayerEvent {
    /// A master load attempt failed; a retry is scheduled.
    LoadFailed { error: String },
    /// The session is constructed and fetching.
    SessionLoaded { variants: usize },
    /// Playback reached the end of the timeline.
    Finished,
}

type CompletedListener = Arc<dyn Fn() + Send + Sync>;

struct PlayerInner {
    renderer: Arc<BuffersRenderer>,
    session: RwLock<Option<Arc<HlsSession>>>,
    play_state: Mutex<PlayState>,
    seek_id: Mutex<Uuid>,
    status_tx: watch::Sender<PlayerStatus>,
    buffering_tx: watch::Sender<BufferingStatus>,
    events: broadcast::Sender<PlayerEvent>,
    completed: Mutex<HashMap<u64, CompletedListener>>,
    next_listener: AtomicU64,
    fetcher: Arc<dyn RangeFetcher>,
    cache: FragmentCache,
    demuxer: Arc<dyn SegmentDemuxer>,
    options: PlayerOptions,
}

/// Bridges the session driver to the renderer. Holds only the renderer,
/// so a running session never keeps the facade alive.
struct RendererSink {
    renderer: Arc<BuffersRenderer>,
}

impl SessionSink for RendererSink {
    fn playhead(&self) -> (f64, f64) {
        (
            self.renderer.clock_time().seconds(),
            self.renderer.base_rate(),
        )
    }

    fn on_fragment(&self, fragment: DecodedFragment) {
        self.renderer.schedule(&fragment);
    }

    fn on_fragment_error(&self, error: HlsError) {
        warn!(error = %error, "fragment load failed");
    }
}

/// The public playback handle.
///
/// `load` hands off to the HLS stack and retries failed master loads on a
/// fixed delay; transport controls drive the renderer; the display tick
/// aggregates both sides into status snapshots.
pub struct Player {
    inner: Arc<PlayerInner>,
    cancel: CancellationToken,
}

impl Player {
    pub fn new(
        fetcher: Arc<dyn RangeFetcher>,
        cache: FragmentCache,
        demuxer: Arc<dyn SegmentDemuxer>,
        layer: Box<dyn VideoLayer>,
        audio: Box<dyn AudioSink>,
        options: PlayerOptions,
    ) -> Self {
        let renderer = Arc::new(BuffersRenderer::with_options(
            layer,
            audio,
            options.renderer.clone(),
        ));
        let (status_tx, _) = watch::channel(PlayerStatus::default());
        let (buffering_tx, _) = watch::channel(BufferingStatus::default());
        let (events, _) = broadcast::channel(32);

        let inner = Arc::new(PlayerInner {
            renderer,
            session: RwLock::new(None),
            play_state: Mutex::new(PlayState::Paused),
            seek_id: Mutex::new(Uuid::nil()),
            status_tx,
            buffering_tx,
            events,
            completed: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
            fetcher,
            cache,
            demuxer,
            options,
        });

        let cancel = CancellationToken::new();
        tokio::spawn(Self::display_loop(Arc::clone(&inner), cancel.clone()));

        Self { inner, cancel }
    }

    /// Load a master playlist URL. Any error schedules a retry after the
    /// configured delay; retries are unbounded.
    pub fn load(&self, master_url: Url) {
        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                match Self::try_load(&inner, &master_url).await {
                    Ok(session) => {
                        let variants = session.variants().len();
                        session.start().await;
                        *inner.session.write() = Some(Arc::new(session));
                        let _ = inner.events.send(PlayerEvent::SessionLoaded { variants });
                        debug!(url = %master_url, variants, "player session loaded");
                        return;
                    }
                    Err(error) => {
                        warn!(url = %master_url, error = %error, "master load failed, retrying");
                        let _ = inner.events.send(PlayerEvent::LoadFailed {
                            error: error.to_string(),
                        });
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(inner.options.retry_delay) => {}
                }
            }
        });
    }

    async fn try_load(inner: &Arc<PlayerInner>, master_url: &Url) -> Result<HlsSession, HlsError> {
        let playlist_fetcher = PlaylistFetcher::new(Arc::clone(&inner.fetcher));
        let master = playlist_fetcher.master(master_url).await?;

        let mut playlists: Vec<(usize, MediaPlaylist)> = Vec::new();
        for (index, variant) in master.variants.iter().enumerate() {
            match playlist_fetcher.media(variant).await {
                Ok(media) => playlists.push((index, media)),
                Err(error) => {
                    // A broken variant costs quality, not the session.
                    warn!(
                        url = %variant.url,
                        error = %error,
                        "variant playlist failed, dropping variant"
                    );
                }
            }
        }

        let sink = Arc::new(RendererSink {
            renderer: Arc::clone(&inner.renderer),
        });

        HlsSession::spawn(
            &master,
            playlists,
            sink,
            Arc::clone(&inner.fetcher),
            inner.cache.clone(),
            Arc::clone(&inner.demuxer),
            inner.options.session.clone(),
        )
        .ok_or_else(|| HlsError::VariantNotFound("no usable variant in master".to_string()))
    }

    pub async fn play(&self) {
        let finished = *self.inner.play_state.lock() == PlayState::Finished;
        if finished {
            self.seek(0.0).await;
        }
        *self.inner.play_state.lock() = PlayState::Playing;
        self.inner.renderer.play();
    }

    pub async fn pause(&self) {
        *self.inner.play_state.lock() = PlayState::Paused;
        self.inner.renderer.pause();
    }

    pub async fn toggle_play_pause(&self) {
        let playing = *self.inner.play_state.lock() == PlayState::Playing;
        if playing {
            self.pause().await;
        } else {
            self.play().await;
        }
    }

    pub async fn seek(&self, secs: f64) {
        let secs = secs.max(0.0);
        *self.inner.seek_id.lock() = Uuid::new_v4();

        self.inner
            .renderer
            .seek(MediaTime::with_seconds(secs, MEDIA_TIMESCALE));

        let session = self.inner.session.read().clone();
        if let Some(session) = session {
            session.seek(secs).await;

            // Leaving the finished state by seeking away from the end.
            let mut state = self.inner.play_state.lock();
            if *state == PlayState::Finished
                && session.duration_secs() - secs > STALL_MARGIN_SECS
            {
                *state = PlayState::Paused;
            }
        }
    }

    pub fn set_base_rate(&self, rate: f64) {
        self.inner.renderer.set_base_rate(rate);
    }

    pub fn set_volume(&self, volume: f32) {
        self.inner.renderer.set_volume(volume);
    }

    pub fn set_sound_enabled(&self, enabled: bool) {
        self.inner.renderer.set_muted(!enabled);
    }

    /// Pin or release the video quality. Already-buffered samples of the
    /// old quality are flushed; the session re-selects at the current
    /// fragment boundary.
    pub async fn set_quality(&self, quality: QualitySelection) {
        let session = self.inner.session.read().clone();
        if let Some(session) = session {
            self.inner.renderer.flush();
            session.set_quality(quality).await;
        }
    }

    pub fn play_state(&self) -> PlayState {
        *self.inner.play_state.lock()
    }

    pub fn status(&self) -> watch::Receiver<PlayerStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn buffering_status(&self) -> watch::Receiver<BufferingStatus> {
        self.inner.buffering_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.inner.events.subscribe()
    }

    pub fn add_playback_completed(&self, listener: impl Fn() + Send + Sync + 'static) -> u64 {
        let handle = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.completed.lock().insert(handle, Arc::new(listener));
        handle
    }

    pub fn remove_playback_completed(&self, handle: u64) {
        self.inner.completed.lock().remove(&handle);
    }

    async fn display_loop(inner: Arc<PlayerInner>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(inner.options.display_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => Self::display_tick(&inner),
            }
        }
    }

    fn display_tick(inner: &Arc<PlayerInner>) {
        inner.renderer.display_tick();

        let session = inner.session.read().clone();
        let clock = inner.renderer.clock_time().seconds();

        let mut finished_now = false;
        if let Some(session) = &session {
            let mut state = inner.play_state.lock();

            if session.duration_secs() - clock < STALL_MARGIN_SECS {
                if *state != PlayState::Finished {
                    *state = PlayState::Finished;
                    finished_now = true;
                }
                if inner.renderer.is_running() {
                    inner.renderer.pause();
                }
            } else {
                let margin = session.loading_progress() - clock;
                if margin < STALL_MARGIN_SECS && inner.renderer.is_running() {
                    // Starved: halt the clock without leaving `Playing`.
                    inner.renderer.pause();
                } else if margin > STALL_MARGIN_SECS
                    && !inner.renderer.is_running()
                    && *state == PlayState::Playing
                {
                    inner.renderer.play();
                }
            }
        }

        if finished_now {
            debug!("playback finished");
            let _ = inner.events.send(PlayerEvent::Finished);
            let listeners: Vec<CompletedListener> =
                inner.completed.lock().values().cloned().collect();
            for listener in listeners {
                listener();
            }
        }

        let state = *inner.play_state.lock();
        let buffered_secs = session.as_ref().map_or(0.0, |s| s.loading_progress());
        let status = PlayerStatus {
            state,
            position_secs: clock,
            buffering: state == PlayState::Playing && !inner.renderer.is_running(),
            buffered_secs,
            base_rate: inner.renderer.base_rate(),
            seek_id: *inner.seek_id.lock(),
        };
        let _ = inner.status_tx.send_replace(status);

        let _ = inner.buffering_tx.send_replace(BufferingStatus {
            buffered_secs,
            total_secs: session.as_ref().map_or(0.0, |s| s.duration_secs()),
        });
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
