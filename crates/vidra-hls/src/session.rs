//! The HLS session: a timer-driven loop that advances the fragment index,
//! asks ABR which variant's copy to fetch, and emits decoded fragments in
//! presentation order.
//!
//! Invalidation model: the session owns a monotone epoch. Every seek and
//! quality change bumps it; loaders snapshot the epoch when a load starts
//! and every completion is checked against the current value before side
//! effects apply. A superseded completion is dropped silently, so re-seeks
//! never deliver stale fragments downstream.

use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vidra_media::{DecodedFragment, MEDIA_TIMESCALE, MediaTime, SegmentDemuxer};
use vidra_net::RangeFetcher;

use crate::{
    abr::{AbrController, BitrateEstimator, QualitySelection},
    cache::FragmentCache,
    error::{HlsError, HlsResult},
    events::SessionEvent,
    loader::{FragmentLoader, LoadOutcome},
    options::SessionOptions,
    playlist::{MasterPlaylist, MediaPlaylist, Variant, VariantId},
    timeline::Timeline,
};

/// The session's view of the renderer side.
///
/// Implementations must not block: `playhead` is called on every driver
/// tick and `on_fragment` hands over an already-decoded fragment.
pub trait SessionSink: Send + Sync + 'static {
    /// Current player time (seconds) and playback rate.
    fn playhead(&self) -> (f64, f64);

    /// A fragment is ready, in strictly ascending index order.
    fn on_fragment(&self, fragment: DecodedFragment);

    /// A fragment load failed; the same index will be retried on the next
    /// tick, possibly on a different variant.
    fn on_fragment_error(&self, error: HlsError);
}

#[derive(Clone, Debug)]
enum SessionCommand {
    Start,
    Stop,
    Seek(f64),
    SetQuality(QualitySelection),
}

/// State shared between the driver task and session handle readers.
#[derive(Debug)]
struct SessionShared {
    current_index: AtomicUsize,
    /// Seconds already promised to the renderer, as f64 bits.
    loading_progress: AtomicU64,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            current_index: AtomicUsize::new(0),
            loading_progress: AtomicU64::new(0f64.to_bits()),
        }
    }

    fn progress(&self) -> f64 {
        f64::from_bits(self.loading_progress.load(Ordering::Acquire))
    }

    fn set_progress(&self, secs: f64) {
        self.loading_progress.store(secs.to_bits(), Ordering::Release);
    }
}

/// Handle to a running session. Dropping it tears the driver down and
/// removes the session's fragment scratch.
pub struct HlsSession {
    shared: Arc<SessionShared>,
    timeline: Timeline,
    cmd_tx: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
    variants: Vec<Variant>,
}

impl HlsSession {
    /// Build and spawn a session from a parsed master playlist and the
    /// media playlists fetched for it; each entry pairs a master-variant
    /// index with that variant's playlist.
    ///
    /// Variants whose fragment grid disagrees with the first playlist are
    /// dropped with a warning. Returns `None` when no usable variant
    /// remains or the timeline is empty.
    pub fn spawn(
        master: &MasterPlaylist,
        playlists: Vec<(usize, MediaPlaylist)>,
        sink: Arc<dyn SessionSink>,
        fetcher: Arc<dyn RangeFetcher>,
        cache: FragmentCache,
        demuxer: Arc<dyn SegmentDemuxer>,
        options: SessionOptions,
    ) -> Option<Self> {
        let mut kept: Vec<(Variant, MediaPlaylist)> = Vec::new();
        let mut timeline: Option<Timeline> = None;

        for (master_index, playlist) in playlists {
            let Some(variant) = master.variants.get(master_index) else {
                warn!(master_index, "playlist for unknown variant index, dropping");
                continue;
            };
            match &timeline {
                None => {
                    let grid = Timeline::from_playlist(&playlist);
                    if grid.is_empty() {
                        warn!(master_index, "variant playlist has no fragments, dropping");
                        continue;
                    }
                    timeline = Some(grid);
                    kept.push((variant.clone(), playlist));
                }
                Some(grid) if grid.matches(&playlist) => {
                    kept.push((variant.clone(), playlist));
                }
                Some(_) => {
                    warn!(
                        master_index,
                        bandwidth = variant.bandwidth,
                        "variant fragment grid disagrees with session timeline, dropping"
                    );
                }
            }
        }

        let timeline = timeline?;
        if kept.is_empty() {
            return None;
        }

        if let Err(e) = cache.prepare_session(master) {
            warn!(master = %master.id, error = %e, "fragment cache prepare failed");
            return None;
        }

        let shared = Arc::new(SessionShared::new());
        let epoch_handle = Arc::new(AtomicU64::new(0));
        // The loaders observe the same epoch cell the driver bumps.
        let shared_epoch = Arc::clone(&epoch_handle);

        let variants: Vec<Variant> = kept.iter().map(|(v, _)| v.clone()).collect();
        let loaders: Vec<Arc<FragmentLoader>> = kept
            .into_iter()
            .enumerate()
            .map(|(i, (variant, playlist))| {
                Arc::new(FragmentLoader::new(
                    VariantId(i),
                    variant,
                    playlist,
                    master.id.clone(),
                    Arc::clone(&fetcher),
                    cache.clone(),
                    Arc::clone(&demuxer),
                    Arc::clone(&shared_epoch),
                ))
            })
            .collect();

        let estimator = match options.abr.initial_bitrate {
            Some(bps) => BitrateEstimator::with_estimate(&options.abr, bps),
            None => BitrateEstimator::new(&options.abr),
        };
        let abr = AbrController::new(options.abr.clone(), variants.clone(), estimator);

        let (cmd_tx, cmd_rx) = mpsc::channel(options.command_capacity);
        let (events, _) = broadcast::channel(options.event_capacity);
        let (load_tx, load_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let driver = SessionDriver {
            timeline: timeline.clone(),
            abr,
            loaders,
            sink,
            shared: Arc::clone(&shared),
            epoch: epoch_handle,
            events: events.clone(),
            options,
            cmd_rx,
            load_tx,
            load_rx,
            cancel: cancel.clone(),
            cache,
            master_id: master.id.clone(),
            started: false,
            load_in_flight: false,
            finished_emitted: false,
        };
        tokio::spawn(driver.run());

        debug!(
            master = %master.id,
            variants = variants.len(),
            fragments = timeline.len(),
            "hls session spawned"
        );

        Some(Self {
            shared,
            timeline,
            cmd_tx,
            events,
            cancel,
            variants,
        })
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// Seconds already promised to the renderer.
    pub fn loading_progress(&self) -> f64 {
        self.shared.progress()
    }

    /// Next fragment index the driver will request.
    pub fn current_fragment_index(&self) -> usize {
        self.shared.current_index.load(Ordering::Acquire)
    }

    pub fn fragment_count(&self) -> usize {
        self.timeline.len()
    }

    pub fn finish_time(&self) -> MediaTime {
        self.timeline.finish_time()
    }

    pub fn duration_secs(&self) -> f64 {
        self.timeline.finish_time().seconds()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn start(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Start).await;
    }

    pub async fn stop(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Stop).await;
    }

    pub async fn seek(&self, secs: f64) {
        let _ = self.cmd_tx.send(SessionCommand::Seek(secs)).await;
    }

    pub async fn set_quality(&self, quality: QualitySelection) {
        let _ = self.cmd_tx.send(SessionCommand::SetQuality(quality)).await;
    }
}

impl Drop for HlsSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct LoadDone {
    fragment_index: usize,
    variant: VariantId,
    epoch: u64,
    result: HlsResult<LoadOutcome>,
}

struct SessionDriver {
    timeline: Timeline,
    abr: AbrController,
    loaders: Vec<Arc<FragmentLoader>>,
    sink: Arc<dyn SessionSink>,
    shared: Arc<SessionShared>,
    epoch: Arc<AtomicU64>,
    events: broadcast::Sender<SessionEvent>,
    options: SessionOptions,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    load_tx: mpsc::Sender<LoadDone>,
    load_rx: mpsc::Receiver<LoadDone>,
    cancel: CancellationToken,
    cache: FragmentCache,
    master_id: crate::playlist::MasterId,
    started: bool,
    /// One load at a time: set when a tick dispatches a loader, cleared on
    /// any completion. Guarantees ascending-index emission.
    load_in_flight: bool,
    finished_emitted: bool,
}

impl SessionDriver {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.options.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(cmd) = self.cmd_rx.recv() => self.handle_command(cmd),
                Some(done) = self.load_rx.recv() => self.handle_load_done(done),
                _ = ticker.tick() => self.tick(),
            }
        }

        self.cache.finish_session(&self.master_id);
        debug!(master = %self.master_id, "hls session driver stopped");
    }

    fn tick(&mut self) {
        if !self.started || self.load_in_flight {
            return;
        }

        let index = self.shared.current_index.load(Ordering::Acquire);
        if index >= self.timeline.len() {
            if !self.finished_emitted {
                self.finished_emitted = true;
                let _ = self.events.send(SessionEvent::EndOfStream);
            }
            return;
        }

        let (player_time, rate) = self.sink.playhead();
        let progress = self.shared.progress();
        let Some(choice) = self.abr.choose(index, player_time, progress, rate) else {
            // Buffer is full; the pull resumes once playback advances.
            return;
        };

        let Some(slot) = self.timeline.get(index) else {
            return;
        };

        self.load_in_flight = true;
        let epoch = self.epoch.load(Ordering::Acquire);
        let _ = self.events.send(SessionEvent::VariantChosen {
            fragment_index: index,
            variant: choice.variant,
            reason: choice.reason,
        });

        let loader = Arc::clone(&self.loaders[choice.variant.0]);
        let load_tx = self.load_tx.clone();
        tokio::spawn(async move {
            let result = loader.load(index, slot.timestamp, epoch).await;
            let _ = load_tx
                .send(LoadDone {
                    fragment_index: index,
                    variant: choice.variant,
                    epoch,
                    result,
                })
                .await;
        });
    }

    fn handle_load_done(&mut self, done: LoadDone) {
        // The guard resets on every outcome, stale and failed included.
        self.load_in_flight = false;

        if done.epoch != self.epoch.load(Ordering::Acquire) {
            return;
        }

        match done.result {
            Ok(LoadOutcome::Stale) => {}
            Ok(LoadOutcome::Loaded(loaded)) => {
                // The loader advances loading progress to the end of this
                // fragment. Idempotent against a seek that reset the
                // progress below the fragment's basetime.
                self.shared.set_progress(loaded.fragment.end_time().seconds());
                self.shared
                    .current_index
                    .store(done.fragment_index + 1, Ordering::Release);
                self.abr.loaded(
                    done.fragment_index,
                    done.variant,
                    loaded.bytes,
                    loaded.elapsed,
                    loaded.from_cache,
                );
                let _ = self.events.send(SessionEvent::FragmentLoaded {
                    fragment_index: done.fragment_index,
                    variant: done.variant,
                    bytes: loaded.bytes,
                    elapsed: loaded.elapsed,
                    from_cache: loaded.from_cache,
                });
                self.sink.on_fragment(loaded.fragment);
            }
            Err(error) => {
                warn!(
                    fragment_index = done.fragment_index,
                    error = %error,
                    "fragment load failed"
                );
                let _ = self.events.send(SessionEvent::FragmentError {
                    fragment_index: done.fragment_index,
                    error: error.to_string(),
                });
                self.sink.on_fragment_error(error);
            }
        }
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Start => self.started = true,
            SessionCommand::Stop => self.started = false,
            SessionCommand::Seek(secs) => self.seek_to(secs),
            SessionCommand::SetQuality(quality) => {
                self.abr.set_quality(quality);
                // Re-select at the current fragment boundary; the facade
                // flushes the renderer's already-buffered samples.
                let (player_time, _) = self.sink.playhead();
                self.seek_to(player_time);
            }
        }
    }

    fn seek_to(&mut self, secs: f64) {
        let secs = secs.max(0.0);
        let index = self
            .timeline
            .index_for(MediaTime::with_seconds(secs, MEDIA_TIMESCALE));

        self.shared.current_index.store(index, Ordering::Release);
        self.shared.set_progress(secs);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.finished_emitted = false;

        debug!(secs, fragment_index = index, "session seek");
        let _ = self.events.send(SessionEvent::Seeked {
            fragment_index: index,
            progress_secs: secs,
        });
    }
}
