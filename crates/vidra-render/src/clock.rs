//! The renderer's media clock: an anchored, rate-scaled monotonic time.

use std::time::Instant;

use vidra_media::{MEDIA_TIMESCALE, MediaTime};

/// Media time derived from a host-monotonic anchor and a rate.
///
/// `now() = anchor_media + (Instant::now() - anchor_instant) * rate`.
/// Rate changes re-anchor, so time never jumps on a rate change; only
/// [`PlaybackClock::set_rate_at`] moves the clock (the atomic
/// set-rate-at-time used by seeks).
#[derive(Debug)]
pub struct PlaybackClock {
    anchor_instant: Instant,
    anchor_media: MediaTime,
    rate: f64,
}

impl PlaybackClock {
    /// A paused clock at media time zero.
    pub fn new() -> Self {
        Self {
            anchor_instant: Instant::now(),
            anchor_media: MediaTime::new(0, MEDIA_TIMESCALE),
            rate: 0.0,
        }
    }

    pub fn now(&self) -> MediaTime {
        let elapsed = self.anchor_instant.elapsed().as_secs_f64();
        self.anchor_media + MediaTime::with_seconds(elapsed * self.rate, MEDIA_TIMESCALE)
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Change the rate, keeping the current media time.
    pub fn set_rate(&mut self, rate: f64) {
        let now = self.now();
        self.anchor_media = now;
        self.anchor_instant = Instant::now();
        self.rate = rate;
    }

    /// Atomically set rate and media time.
    pub fn set_rate_at(&mut self, rate: f64, time: MediaTime) {
        self.anchor_media = time;
        self.anchor_instant = Instant::now();
        self.rate = rate;
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}
