//! Counting layer/sink doubles for tests.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use vidra_media::{AudioSample, MediaTime, VideoSample};

use crate::sink::{AudioSink, VideoLayer};

/// Observable state shared between a counting double and the test.
#[derive(Debug)]
pub struct CountingState {
    /// How many samples the layer accepts before reporting not-ready.
    /// `usize::MAX` means always ready.
    pub ready_limit: AtomicUsize,
    queued: AtomicUsize,
    flushes: AtomicUsize,
    enqueued: Mutex<Vec<MediaTime>>,
    volume: Mutex<f32>,
    muted: AtomicBool,
}

impl CountingState {
    fn new(ready_limit: usize) -> Arc<Self> {
        Arc::new(Self {
            ready_limit: AtomicUsize::new(ready_limit),
            queued: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
            enqueued: Mutex::new(Vec::new()),
            volume: Mutex::new(1.0),
            muted: AtomicBool::new(false),
        })
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock()
    }

    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn enqueued(&self) -> Vec<MediaTime> {
        self.enqueued.lock().clone()
    }

    pub fn enqueued_count(&self) -> usize {
        self.enqueued.lock().len()
    }

    /// Simulate the platform layer consuming `n` queued samples.
    pub fn consume(&self, n: usize) {
        let _ = self
            .queued
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |q| {
                Some(q.saturating_sub(n))
            });
    }

    fn ready(&self) -> bool {
        self.queued.load(Ordering::Relaxed) < self.ready_limit.load(Ordering::Relaxed)
    }

    fn record(&self, pts: MediaTime) {
        self.queued.fetch_add(1, Ordering::Relaxed);
        self.enqueued.lock().push(pts);
    }

    fn flush(&self) {
        self.queued.store(0, Ordering::Relaxed);
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }
}

/// A [`VideoLayer`] that records enqueued timestamps.
pub struct CountingLayer {
    state: Arc<CountingState>,
}

impl CountingLayer {
    pub fn new(ready_limit: usize) -> (Self, Arc<CountingState>) {
        let state = CountingState::new(ready_limit);
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

impl VideoLayer for CountingLayer {
    fn is_ready_for_more(&self) -> bool {
        self.state.ready()
    }

    fn enqueue(&mut self, sample: VideoSample) {
        self.state.record(sample.pts);
    }

    fn flush(&mut self) {
        self.state.flush();
    }
}

/// An [`AudioSink`] that records enqueued timestamps and volume changes.
pub struct CountingSink {
    state: Arc<CountingState>,
}

impl CountingSink {
    pub fn new(ready_limit: usize) -> (Self, Arc<CountingState>) {
        let state = CountingState::new(ready_limit);
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

impl AudioSink for CountingSink {
    fn is_ready_for_more(&self) -> bool {
        self.state.ready()
    }

    fn enqueue(&mut self, sample: AudioSample) {
        self.state.record(sample.pts);
    }

    fn flush(&mut self) {
        self.state.flush();
    }

    fn set_volume(&mut self, volume: f32) {
        *self.state.volume.lock() = volume;
    }

    fn set_muted(&mut self, muted: bool) {
        self.state.muted.store(muted, Ordering::Relaxed);
    }
}
