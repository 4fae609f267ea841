//! Dual-queue sample scheduler driven by a display-rate cadence.

use parking_lot::Mutex;
use tracing::{debug, trace};
use vidra_media::{DecodedFragment, MediaTime};

use crate::{
    clock::PlaybackClock,
    ring::SampleRing,
    sink::{AudioSink, VideoLayer},
};

#[derive(Clone, Debug)]
pub struct RendererOptions {
    /// Seed capacity of the video sample ring.
    pub video_capacity: usize,
    /// Seed capacity of the audio sample ring.
    pub audio_capacity: usize,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            video_capacity: 2000,
            audio_capacity: 500,
        }
    }
}

struct RendererInner {
    video_ring: SampleRing<vidra_media::VideoSample>,
    audio_ring: SampleRing<vidra_media::AudioSample>,
    clock: PlaybackClock,
    layer: Box<dyn VideoLayer>,
    audio: Box<dyn AudioSink>,
    base_rate: f64,
    enqueue_in_progress: bool,
}

/// Enqueues decoded fragments into the synchronized video/audio layers.
///
/// `schedule` truncates each incoming fragment at the last key frame at or
/// before the clock, so playback can restart cleanly after seeks and
/// quality changes. `display_tick` drains the rings into the layers while
/// they accept samples.
pub struct BuffersRenderer {
    inner: Mutex<RendererInner>,
}

impl BuffersRenderer {
    pub fn new(layer: Box<dyn VideoLayer>, audio: Box<dyn AudioSink>) -> Self {
        Self::with_options(layer, audio, RendererOptions::default())
    }

    pub fn with_options(
        layer: Box<dyn VideoLayer>,
        audio: Box<dyn AudioSink>,
        options: RendererOptions,
    ) -> Self {
        Self {
            inner: Mutex::new(RendererInner {
                video_ring: SampleRing::with_capacity(options.video_capacity),
                audio_ring: SampleRing::with_capacity(options.audio_capacity),
                clock: PlaybackClock::new(),
                layer,
                audio,
                base_rate: 1.0,
                enqueue_in_progress: false,
            }),
        }
    }

    /// Current media time of the shared clock.
    pub fn clock_time(&self) -> MediaTime {
        self.inner.lock().clock.now()
    }

    /// Live rate of the clock: 0 when paused.
    pub fn rate(&self) -> f64 {
        self.inner.lock().clock.rate()
    }

    pub fn is_running(&self) -> bool {
        self.rate() != 0.0
    }

    pub fn base_rate(&self) -> f64 {
        self.inner.lock().base_rate
    }

    /// User-selected playback rate; applied immediately when running.
    pub fn set_base_rate(&self, rate: f64) {
        let mut inner = self.inner.lock();
        inner.base_rate = rate;
        if inner.clock.rate() != 0.0 {
            inner.clock.set_rate(rate);
        }
    }

    pub fn set_volume(&self, volume: f32) {
        self.inner.lock().audio.set_volume(volume.clamp(0.0, 1.0));
    }

    pub fn set_muted(&self, muted: bool) {
        self.inner.lock().audio.set_muted(muted);
    }

    /// Enqueue a decoded fragment into both rings.
    ///
    /// Video samples are cut at the largest index whose timestamp is at or
    /// behind the clock and which is a key frame; when every sample is
    /// ahead of the clock the whole sequence is kept. Audio gets the same
    /// cut with every sample counting as key.
    pub fn schedule(&self, fragment: &DecodedFragment) {
        let mut inner = self.inner.lock();
        let clock = inner.clock.now();

        let video_cut = fragment
            .video
            .iter()
            .enumerate()
            .rev()
            .find(|(_, s)| s.pts <= clock && s.is_key)
            .map_or(0, |(i, _)| i);
        for sample in &fragment.video[video_cut..] {
            inner.video_ring.push(sample.clone());
        }

        let audio_cut = fragment
            .audio
            .iter()
            .enumerate()
            .rev()
            .find(|(_, s)| s.pts <= clock)
            .map_or(0, |(i, _)| i);
        for sample in &fragment.audio[audio_cut..] {
            inner.audio_ring.push(sample.clone());
        }

        trace!(
            fragment_index = fragment.fragment_index,
            video_cut,
            audio_cut,
            clock_secs = clock.seconds(),
            "fragment scheduled"
        );
    }

    /// Drain the rings into the layers. Called on a ~60 Hz cadence.
    pub fn display_tick(&self) {
        let mut inner = self.inner.lock();
        if inner.enqueue_in_progress {
            return;
        }
        inner.enqueue_in_progress = true;

        if inner.clock.rate() != 0.0 {
            // A layer that stopped accepting samples while the next queued
            // one is already due is stuck on stale content from before a
            // seek; flushing it unblocks the drain.
            if !inner.layer.is_ready_for_more() {
                let clock = inner.clock.now();
                let behind = inner
                    .video_ring
                    .peek()
                    .is_some_and(|next| next.pts < clock);
                if behind {
                    debug!("video layer stalled behind the clock, flushing");
                    inner.layer.flush();
                }
            }

            while inner.layer.is_ready_for_more() {
                let Some(sample) = inner.video_ring.pop() else {
                    break;
                };
                inner.layer.enqueue(sample);
            }

            while inner.audio.is_ready_for_more() {
                let Some(sample) = inner.audio_ring.pop() else {
                    break;
                };
                inner.audio.enqueue(sample);
            }
        }

        inner.enqueue_in_progress = false;
    }

    /// Run the clock at the base rate.
    pub fn play(&self) {
        let mut inner = self.inner.lock();
        let rate = inner.base_rate;
        inner.clock.set_rate(rate);
    }

    /// Freeze the clock.
    pub fn pause(&self) {
        self.inner.lock().clock.set_rate(0.0);
    }

    /// Move the clock to `time` (paused there) and drop everything queued.
    pub fn seek(&self, time: MediaTime) {
        let mut inner = self.inner.lock();
        inner.clock.set_rate_at(0.0, time);
        inner.layer.flush();
        inner.audio.flush();
        inner.video_ring.clear();
        inner.audio_ring.clear();
        debug!(secs = time.seconds(), "renderer seek");
    }

    /// Drop everything queued, keeping the clock where it is. Used on
    /// quality changes to replace buffered samples.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        inner.layer.flush();
        inner.audio.flush();
        inner.video_ring.clear();
        inner.audio_ring.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use vidra_media::{
        AudioSample, DecodedFragment, MEDIA_TIMESCALE, MediaTime, VideoSample,
    };

    use super::*;
    use crate::mock::{CountingLayer, CountingSink};

    fn secs(s: f64) -> MediaTime {
        MediaTime::with_seconds(s, MEDIA_TIMESCALE)
    }

    /// `frames` video samples starting at `base`, one per 100 ms, key
    /// every `key_interval`; audio at the same cadence.
    fn fragment(base: f64, frames: usize, key_interval: usize) -> DecodedFragment {
        let video = (0..frames)
            .map(|i| VideoSample {
                pts: secs(base + i as f64 * 0.1),
                dts: secs(base + i as f64 * 0.1),
                duration: secs(0.1),
                is_key: i % key_interval == 0,
                data: Bytes::new(),
            })
            .collect();
        let audio = (0..frames)
            .map(|i| AudioSample {
                pts: secs(base + i as f64 * 0.1),
                duration: secs(0.1),
                data: Bytes::new(),
            })
            .collect();
        DecodedFragment {
            fragment_index: 0,
            basetime: secs(base),
            duration: secs(frames as f64 * 0.1),
            from_cache: false,
            video,
            audio,
        }
    }

    fn renderer(
        video_limit: usize,
        audio_limit: usize,
    ) -> (
        BuffersRenderer,
        std::sync::Arc<crate::mock::CountingState>,
        std::sync::Arc<crate::mock::CountingState>,
    ) {
        let (layer, video_state) = CountingLayer::new(video_limit);
        let (sink, audio_state) = CountingSink::new(audio_limit);
        let renderer = BuffersRenderer::with_options(
            Box::new(layer),
            Box::new(sink),
            RendererOptions {
                video_capacity: 8,
                audio_capacity: 8,
            },
        );
        (renderer, video_state, audio_state)
    }

    #[test]
    fn tick_drains_both_rings_in_order() {
        let (renderer, video, audio) = renderer(usize::MAX, usize::MAX);

        renderer.schedule(&fragment(0.0, 5, 1));
        renderer.play();
        renderer.display_tick();

        let pts: Vec<f64> = video.enqueued().iter().map(|t| t.seconds()).collect();
        assert_eq!(pts.len(), 5);
        assert!(pts.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(audio.enqueued_count(), 5);
    }

    #[test]
    fn paused_renderer_does_not_drain() {
        let (renderer, video, _audio) = renderer(usize::MAX, usize::MAX);

        renderer.schedule(&fragment(0.0, 5, 1));
        renderer.display_tick();
        assert_eq!(video.enqueued_count(), 0);
    }

    #[test]
    fn backpressure_stops_the_drain() {
        let (renderer, video, _audio) = renderer(3, usize::MAX);

        renderer.schedule(&fragment(0.0, 10, 1));
        renderer.play();
        renderer.display_tick();
        assert_eq!(video.enqueued_count(), 3);

        // The layer consumes two samples; the next tick tops it up.
        video.consume(2);
        renderer.display_tick();
        assert_eq!(video.enqueued_count(), 5);
    }

    #[test]
    fn schedule_cuts_at_last_key_frame_behind_clock() {
        let (renderer, video, audio) = renderer(usize::MAX, usize::MAX);

        // Clock at 1.05 s; samples 0.0..2.0 s with keys every 0.5 s.
        renderer.seek(secs(1.05));
        renderer.schedule(&fragment(0.0, 20, 5));
        renderer.play();
        renderer.display_tick();

        // Last key at or before 1.05 s is sample 10 (pts 1.0).
        let pts = video.enqueued();
        assert!((pts[0].seconds() - 1.0).abs() < 1e-6);
        assert_eq!(pts.len(), 10);

        // Audio cuts at any sample at or before the clock: sample 10.
        let audio_pts = audio.enqueued();
        assert!((audio_pts[0].seconds() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn schedule_keeps_everything_when_ahead_of_clock() {
        let (renderer, video, _audio) = renderer(usize::MAX, usize::MAX);

        // Clock at 0; fragment starts at 6 s.
        renderer.schedule(&fragment(6.0, 5, 1));
        renderer.play();
        renderer.display_tick();
        assert_eq!(video.enqueued_count(), 5);
    }

    #[test]
    fn stalled_layer_behind_clock_is_flushed() {
        let (renderer, video, _audio) = renderer(0, usize::MAX);

        renderer.schedule(&fragment(0.0, 5, 1));
        renderer.play();
        std::thread::sleep(Duration::from_millis(30));

        // Layer never ready, next queued sample (pts 0) is behind the
        // clock: recovery flush fires. After the flush the layer still
        // reports not-ready (limit 0), so nothing is enqueued.
        renderer.display_tick();
        assert_eq!(video.flushes(), 1);
    }

    #[test]
    fn seek_flushes_layers_and_rings() {
        let (renderer, video, audio) = renderer(usize::MAX, usize::MAX);

        renderer.schedule(&fragment(0.0, 5, 1));
        renderer.seek(secs(12.0));
        assert_eq!(video.flushes(), 1);
        assert_eq!(audio.flushes(), 1);
        assert!((renderer.clock_time().seconds() - 12.0).abs() < 1e-6);
        assert!(!renderer.is_running());

        // The rings were cleared: nothing drains after play.
        renderer.play();
        renderer.display_tick();
        assert_eq!(video.enqueued_count(), 0);
    }

    #[test]
    fn flush_keeps_the_clock() {
        let (renderer, video, _audio) = renderer(usize::MAX, usize::MAX);

        renderer.seek(secs(3.0));
        renderer.schedule(&fragment(3.0, 5, 1));
        renderer.flush();
        assert_eq!(video.flushes(), 2);
        assert!((renderer.clock_time().seconds() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn base_rate_applies_on_play_and_live_when_running() {
        let (renderer, _video, _audio) = renderer(usize::MAX, usize::MAX);

        renderer.set_base_rate(2.0);
        assert!(!renderer.is_running());
        renderer.play();
        assert!((renderer.rate() - 2.0).abs() < 1e-9);

        renderer.set_base_rate(0.5);
        assert!((renderer.rate() - 0.5).abs() < 1e-9);

        renderer.pause();
        assert_eq!(renderer.rate(), 0.0);
        assert!((renderer.base_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn rings_grow_past_seed_capacity() {
        let (renderer, video, _audio) = renderer(usize::MAX, usize::MAX);

        // 8-seed ring takes 40 samples without dropping.
        renderer.schedule(&fragment(6.0, 40, 1));
        renderer.play();
        renderer.display_tick();
        assert_eq!(video.enqueued_count(), 40);
    }
}
